//! Booth configuration, loaded from an optional JSON file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::collector::StabilizePolicy;
use crate::print::{PageGeometry, DEFAULT_PRINT_SCALE};
use crate::validation::ReadinessChecker;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoothConfig {
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    /// Root of saved collages; consumed photos go to its `single_images` folder.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_template_path")]
    pub template_path: PathBuf,
    #[serde(default = "default_copies")]
    pub default_copies: u32,
    /// Ask on the console for each collage instead of using `defaultCopies`.
    #[serde(default = "default_true")]
    pub prompt_copies: bool,
    #[serde(default)]
    pub scan_existing: bool,
    #[serde(default = "default_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_temp_suffix")]
    pub temp_suffix: String,
    #[serde(default)]
    pub stabilize: StabilizeConfig,
    #[serde(default)]
    pub print: PrintConfig,
}

fn default_true() -> bool { true }
fn default_input_dir() -> PathBuf { PathBuf::from("processed_full") }
fn default_output_dir() -> PathBuf { PathBuf::from("merged_images") }
fn default_template_path() -> PathBuf { PathBuf::from("template/template1.png") }
fn default_copies() -> u32 { 1 }
fn default_temp_suffix() -> String { ".tmp".to_string() }

fn default_extensions() -> Vec<String> {
    vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StabilizeConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_initial_delay_ms() -> u64 { 1000 }
fn default_attempts() -> u32 { 5 }
fn default_backoff_ms() -> u64 { 1000 }

impl Default for StabilizeConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            attempts: default_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl StabilizeConfig {
    pub fn policy(&self) -> StabilizePolicy {
        StabilizePolicy {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            attempts: self.attempts,
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintConfig {
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub page: PageGeometry,
    #[serde(default)]
    pub sink: SinkConfig,
}

fn default_pacing_ms() -> u64 { 2000 }
fn default_shutdown_timeout_ms() -> u64 { 5000 }
fn default_scale() -> f64 { DEFAULT_PRINT_SCALE }

impl Default for PrintConfig {
    fn default() -> Self {
        Self {
            pacing_ms: default_pacing_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            scale: default_scale(),
            page: PageGeometry::default(),
            sink: SinkConfig::default(),
        }
    }
}

impl PrintConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Rendered pages are written to a directory.
    Spool { dir: PathBuf },
    /// Rendered pages are handed to a command, e.g. `lp -d booth`.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig::Spool { dir: PathBuf::from("print_spool") }
    }
}

impl Default for BoothConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            template_path: default_template_path(),
            default_copies: default_copies(),
            prompt_copies: true,
            scan_existing: false,
            allowed_extensions: default_extensions(),
            temp_suffix: default_temp_suffix(),
            stabilize: StabilizeConfig::default(),
            print: PrintConfig::default(),
        }
    }
}

impl BoothConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: BoothConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stabilize.attempts == 0 {
            return Err(ConfigError::Invalid("stabilize.attempts must be at least 1".into()));
        }
        if !(self.print.scale > 0.0 && self.print.scale <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "print.scale must be in (0, 1], got {}",
                self.print.scale
            )));
        }
        if self.input_dir == self.output_dir {
            return Err(ConfigError::Invalid(
                "inputDir and outputDir must differ, archived photos would be picked up again".into(),
            ));
        }
        PageGeometry::new(
            self.print.page.physical_width,
            self.print.page.physical_height,
            self.print.page.margin_left,
            self.print.page.margin_top,
        )
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn readiness_checker(&self) -> ReadinessChecker {
        ReadinessChecker::new(self.temp_suffix.clone(), self.allowed_extensions.clone())
    }
}
