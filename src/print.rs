//! Print Sink System
//!
//! The worker only knows the `PrintSink` trait. A sink reports the page
//! geometry once per job and accepts one copy at a time.

use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PrintError {
    #[error("Printer unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to read print image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Print command {program} exited with {status}")]
    CommandFailed { program: String, status: String },

    #[error("Invalid page geometry: {0}")]
    InvalidGeometry(&'static str),
}

/// Physical page size and unprintable offsets, in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageGeometry {
    pub physical_width: u32,
    pub physical_height: u32,
    #[serde(default)]
    pub margin_left: u32,
    #[serde(default)]
    pub margin_top: u32,
}

impl Default for PageGeometry {
    /// 6x8 inch page at 300 dpi.
    fn default() -> Self {
        Self {
            physical_width: 1800,
            physical_height: 2400,
            margin_left: 0,
            margin_top: 0,
        }
    }
}

impl PageGeometry {
    pub fn new(width: u32, height: u32, margin_left: u32, margin_top: u32) -> Result<Self, PrintError> {
        if width == 0 || height == 0 {
            return Err(PrintError::InvalidGeometry("page size must be non-zero"));
        }
        if margin_left >= width || margin_top >= height {
            return Err(PrintError::InvalidGeometry("margins must be inside the page"));
        }
        Ok(Self {
            physical_width: width,
            physical_height: height,
            margin_left,
            margin_top,
        })
    }
}

/// Where the image lands on the page, relative to the printable origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub width: u32,
    pub height: u32,
    pub x_offset: i64,
    pub y_offset: i64,
}

impl Placement {
    /// Stretch to `scale` of the physical page and center it.
    pub fn fit(page: &PageGeometry, scale: f64) -> Self {
        let width = ((page.physical_width as f64 * scale) as u32).max(1);
        let height = ((page.physical_height as f64 * scale) as u32).max(1);
        let x_offset = -(page.margin_left as i64) + (page.physical_width as i64 - width as i64) / 2;
        let y_offset = -(page.margin_top as i64) + (page.physical_height as i64 - height as i64) / 2;
        Self { width, height, x_offset, y_offset }
    }
}

/// Default share of the physical page the image covers.
pub const DEFAULT_PRINT_SCALE: f64 = 0.95;

/// Destination for print copies.
pub trait PrintSink: Send + Sync {
    fn name(&self) -> &str;

    fn page_geometry(&self) -> Result<PageGeometry, PrintError>;

    fn print(&self, image: &Path, page: &PageGeometry) -> Result<(), PrintError>;
}

/// Render one physical page: white paper with the image placed on it.
pub fn render_page(image: &Path, page: &PageGeometry, scale: f64) -> Result<RgbImage, PrintError> {
    let source = image::open(image).map_err(|source| PrintError::Image {
        path: image.display().to_string(),
        source,
    })?;
    let placement = Placement::fit(page, scale);
    let resized = source
        .resize_exact(placement.width, placement.height, FilterType::Lanczos3)
        .to_rgb8();

    // Offsets are relative to the printable area; the page canvas starts at the physical edge.
    let mut canvas = RgbImage::from_pixel(page.physical_width, page.physical_height, Rgb([255, 255, 255]));
    image::imageops::overlay(
        &mut canvas,
        &resized,
        placement.x_offset + page.margin_left as i64,
        placement.y_offset + page.margin_top as i64,
    );

    debug!(
        page = %format!("{}x{}", page.physical_width, page.physical_height),
        placed = %format!("{}x{}", placement.width, placement.height),
        x_offset = placement.x_offset,
        y_offset = placement.y_offset,
        "Rendered print page"
    );
    Ok(canvas)
}

/// Writes every copy as a rendered page into a spool directory.
///
/// A print server (or a person) picks pages up from there.
pub struct SpoolSink {
    dir: PathBuf,
    page: PageGeometry,
    scale: f64,
    counter: AtomicU64,
}

impl SpoolSink {
    pub fn new(dir: impl Into<PathBuf>, page: PageGeometry, scale: f64) -> Result<Self, PrintError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            page,
            scale,
            counter: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl PrintSink for SpoolSink {
    fn name(&self) -> &str {
        "spool"
    }

    fn page_geometry(&self) -> Result<PageGeometry, PrintError> {
        if !self.dir.is_dir() {
            return Err(PrintError::Unavailable(format!(
                "spool directory {} is missing",
                self.dir.display()
            )));
        }
        Ok(self.page)
    }

    fn print(&self, image: &Path, page: &PageGeometry) -> Result<(), PrintError> {
        let canvas = render_page(image, page, self.scale)?;
        let seq = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let stem = image.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
        let out = self.dir.join(format!("{}_page{:04}.png", stem, seq));
        canvas.save(&out).map_err(|source| PrintError::Image {
            path: out.display().to_string(),
            source,
        })?;
        info!(page = %out.display(), "Spooled print page");
        Ok(())
    }
}

/// Hands each copy to an external print command, e.g. `lp -d booth`.
///
/// The rendered page is written next to the collage and passed as the last argument.
pub struct CommandSink {
    program: String,
    args: Vec<String>,
    page: PageGeometry,
    scale: f64,
}

impl CommandSink {
    pub fn new(program: impl Into<String>, args: Vec<String>, page: PageGeometry, scale: f64) -> Self {
        Self {
            program: program.into(),
            args,
            page,
            scale,
        }
    }
}

impl PrintSink for CommandSink {
    fn name(&self) -> &str {
        &self.program
    }

    fn page_geometry(&self) -> Result<PageGeometry, PrintError> {
        Ok(self.page)
    }

    fn print(&self, image: &Path, page: &PageGeometry) -> Result<(), PrintError> {
        let canvas = render_page(image, page, self.scale)?;
        let page_file = image.with_extension("page.png");
        canvas.save(&page_file).map_err(|source| PrintError::Image {
            path: page_file.display().to_string(),
            source,
        })?;

        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(&page_file)
            .status()?;
        if !status.success() {
            return Err(PrintError::CommandFailed {
                program: self.program.clone(),
                status: status.to_string(),
            });
        }
        info!(program = %self.program, page = %page_file.display(), "Sent page to print command");
        Ok(())
    }
}
