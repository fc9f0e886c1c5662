//! Copy count acquisition for a finished collage.

use crossbeam_channel::{select, Receiver};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::thread;
use tracing::{info, warn};

/// Decides how many prints a collage gets. Zero means do not print.
pub trait CopyCountSource: Send + Sync {
    fn copies_for(&self, collage: &Path) -> u32;
}

/// Always the same count.
#[derive(Debug, Clone, Copy)]
pub struct FixedCopies(pub u32);

impl CopyCountSource for FixedCopies {
    fn copies_for(&self, _collage: &Path) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyAnswer {
    Entered(u32),
    Default(u32),
    /// Unparseable input; carries the default used instead.
    Invalid(u32),
}

impl CopyAnswer {
    pub fn copies(&self) -> u32 {
        match *self {
            CopyAnswer::Entered(n) | CopyAnswer::Default(n) | CopyAnswer::Invalid(n) => n,
        }
    }
}

/// Interpret one line typed by the operator.
///
/// Empty input takes the default. Anything that is not a non-negative
/// integer also falls back to the default.
pub fn parse_copy_count(input: &str, default: u32) -> CopyAnswer {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return CopyAnswer::Default(default);
    }
    match trimmed.parse::<u32>() {
        Ok(n) => CopyAnswer::Entered(n),
        Err(_) => CopyAnswer::Invalid(default),
    }
}

/// Asks on the console.
///
/// Runs on whichever thread performs the batch cycle, never on the print
/// worker. Lines are read by a `stdin-reader` thread so an interrupt can
/// end a pending prompt; it then takes the default.
pub struct PromptCopies {
    default: u32,
    lines: Receiver<io::Result<String>>,
    interrupt: Receiver<()>,
}

impl PromptCopies {
    pub fn stdin(default: u32, interrupt: Receiver<()>) -> io::Result<Self> {
        Self::with_reader(default, io::BufReader::new(io::stdin()), interrupt)
    }

    pub fn with_reader<R>(default: u32, reader: R, interrupt: Receiver<()>) -> io::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        thread::Builder::new()
            .name("stdin-reader".to_string())
            .spawn(move || {
                for line in reader.lines() {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })?;
        Ok(Self::with_lines(default, rx, interrupt))
    }

    /// Build around an existing line source.
    pub fn with_lines(default: u32, lines: Receiver<io::Result<String>>, interrupt: Receiver<()>) -> Self {
        Self {
            default,
            lines,
            interrupt,
        }
    }

    fn read_answer(&self) -> (CopyAnswer, String) {
        select! {
            recv(self.lines) -> line => match line {
                Ok(Ok(line)) => (parse_copy_count(&line, self.default), line),
                Ok(Err(e)) => {
                    warn!(error = %e, "Failed to read copy count");
                    (CopyAnswer::Default(self.default), String::new())
                }
                // end of input
                Err(_) => (CopyAnswer::Default(self.default), String::new()),
            },
            recv(self.interrupt) -> _ => {
                info!("Interrupted while waiting for copy count");
                (CopyAnswer::Default(self.default), String::new())
            }
        }
    }
}

impl CopyCountSource for PromptCopies {
    fn copies_for(&self, collage: &Path) -> u32 {
        let name = collage.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        let mut stdout = io::stdout().lock();
        let _ = write!(
            stdout,
            "\nCollage ready: {}\nHow many copies? (default: {}, Enter for default): ",
            name, self.default
        );
        let _ = stdout.flush();
        drop(stdout);

        let (answer, line) = self.read_answer();
        match answer {
            CopyAnswer::Invalid(fallback) => {
                warn!(input = %line.trim(), fallback, "Invalid copy count, using default");
            }
            CopyAnswer::Default(n) => info!(copies = n, "Using default copy count"),
            CopyAnswer::Entered(n) => info!(copies = n, "Copy count entered"),
        }
        answer.copies()
    }
}
