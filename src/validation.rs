//! File Readiness - Rule/Outcome Separation
//!
//! Rules inspect a newly created file.
//! A rejected file is never retried; a file that is not ready yet is.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

/// Why a file cannot be taken into a batch right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The file will never qualify (temporary file, wrong type).
    Rejected(String),
    /// The file may qualify once the writer is done with it.
    NotReady(String),
}

impl Readiness {
    pub fn reason(&self) -> &str {
        match self {
            Readiness::Rejected(r) | Readiness::NotReady(r) => r,
        }
    }
}

/// Readiness rule trait
pub trait FileCheck: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, path: &Path) -> Result<(), Readiness>;
}

// --- Concrete Rules ---

/// Rejects files the capture software is still writing under a scratch name.
pub struct TemporaryFileRule {
    pub suffix: String,
}

impl FileCheck for TemporaryFileRule {
    fn name(&self) -> &'static str { "temporary_file" }

    fn check(&self, path: &Path) -> Result<(), Readiness> {
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        if !self.suffix.is_empty() && name.ends_with(self.suffix.as_str()) {
            return Err(Readiness::Rejected(format!("temporary file {}", name)));
        }
        Ok(())
    }
}

/// Rejects files whose extension is not in the allowed list (case-insensitive).
pub struct ExtensionRule {
    pub allowed: Vec<String>,
}

impl FileCheck for ExtensionRule {
    fn name(&self) -> &'static str { "extension" }

    fn check(&self, path: &Path) -> Result<(), Readiness> {
        if self.allowed.is_empty() {
            return Ok(());
        }
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if self.allowed.iter().any(|a| a.eq_ignore_ascii_case(&ext)) {
            Ok(())
        } else {
            Err(Readiness::Rejected(format!("unsupported extension {:?}", ext)))
        }
    }
}

pub struct ExistsRule;

impl FileCheck for ExistsRule {
    fn name(&self) -> &'static str { "exists" }

    fn check(&self, path: &Path) -> Result<(), Readiness> {
        match path.metadata() {
            Ok(meta) if meta.is_dir() => Err(Readiness::Rejected("is a directory".to_string())),
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Readiness::NotReady("file does not exist yet".to_string()))
            }
            Err(e) => Err(Readiness::NotReady(format!("metadata unavailable: {}", e))),
        }
    }
}

pub struct NonEmptyRule;

impl FileCheck for NonEmptyRule {
    fn name(&self) -> &'static str { "non_empty" }

    fn check(&self, path: &Path) -> Result<(), Readiness> {
        let len = path
            .metadata()
            .map_err(|e| Readiness::NotReady(format!("metadata unavailable: {}", e)))?
            .len();
        if len == 0 {
            Err(Readiness::NotReady("file is empty".to_string()))
        } else {
            Ok(())
        }
    }
}

/// The writer may still hold the file locked; reading one byte proves it is released.
pub struct ReadableRule;

impl FileCheck for ReadableRule {
    fn name(&self) -> &'static str { "readable" }

    fn check(&self, path: &Path) -> Result<(), Readiness> {
        let mut byte = [0u8; 1];
        File::open(path)
            .and_then(|mut f| f.read(&mut byte))
            .map_err(|e| match e.kind() {
                ErrorKind::PermissionDenied => {
                    Readiness::NotReady("file still being written (permission denied)".to_string())
                }
                _ => Readiness::NotReady(format!("file not readable: {}", e)),
            })
            .and_then(|read| {
                if read == 1 {
                    Ok(())
                } else {
                    Err(Readiness::NotReady("no bytes readable yet".to_string()))
                }
            })
    }
}

/// Runs the readiness rules in order and stops at the first failure.
pub struct ReadinessChecker {
    rules: Vec<Box<dyn FileCheck>>,
}

impl ReadinessChecker {
    pub fn new(temp_suffix: impl Into<String>, allowed_extensions: Vec<String>) -> Self {
        Self {
            rules: vec![
                Box::new(TemporaryFileRule { suffix: temp_suffix.into() }),
                Box::new(ExtensionRule { allowed: allowed_extensions }),
                Box::new(ExistsRule),
                Box::new(NonEmptyRule),
                Box::new(ReadableRule),
            ],
        }
    }

    /// Only the cheap name-based rules; used before any waiting happens.
    pub fn precheck(&self, path: &Path) -> Result<(), Readiness> {
        self.rules
            .iter()
            .filter(|r| matches!(r.name(), "temporary_file" | "extension"))
            .try_for_each(|r| r.check(path))
    }

    pub fn check(&self, path: &Path) -> Result<(), Readiness> {
        self.rules.iter().try_for_each(|r| r.check(path))
    }
}

impl Default for ReadinessChecker {
    fn default() -> Self {
        Self::new(".tmp", vec!["jpg".into(), "jpeg".into(), "png".into()])
    }
}
