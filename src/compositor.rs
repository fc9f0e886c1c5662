//! Collage Compositor
//!
//! Pastes three photos into the template windows. A photo that cannot be
//! used is replaced by a grey placeholder; composing itself never fails.

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbImage, RgbaImage};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::archive::Archive;
use crate::collector::{Batch, BatchRenderer};
use crate::templates::{CollageLayout, Region, TemplateError, PHOTOS_PER_COLLAGE};

/// Placeholder fill for a slot whose photo failed.
pub const PLACEHOLDER_COLOR: Rgba<u8> = Rgba([200, 200, 200, 255]);

#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Failed to save collage {path}: {source}")]
    Save {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SlotOutcome {
    Placed,
    Placeholder { reason: String },
}

/// A single collage plus what happened in each slot.
#[derive(Debug)]
pub struct Composite {
    pub image: RgbaImage,
    pub slots: [SlotOutcome; PHOTOS_PER_COLLAGE],
}

impl Composite {
    pub fn placeholders(&self) -> usize {
        self.slots.iter().filter(|s| matches!(s, SlotOutcome::Placeholder { .. })).count()
    }
}

/// Scale `photo` to cover `width` x `height`, then center-crop to exactly that size.
pub fn fit_cover(photo: &DynamicImage, width: u32, height: u32) -> RgbaImage {
    let (src_w, src_h) = (photo.width().max(1), photo.height().max(1));
    let scale = f64::max(width as f64 / src_w as f64, height as f64 / src_h as f64);

    let scaled_w = ((src_w as f64 * scale) as u32).max(width);
    let scaled_h = ((src_h as f64 * scale) as u32).max(height);
    let scaled = photo.resize_exact(scaled_w, scaled_h, FilterType::Lanczos3);

    let left = (scaled_w - width) / 2;
    let top = (scaled_h - height) / 2;
    scaled.crop_imm(left, top, width, height).to_rgba8()
}

pub fn placeholder(region: &Region) -> RgbaImage {
    RgbaImage::from_pixel(region.width, region.height, PLACEHOLDER_COLOR)
}

/// Two copies of the collage next to each other, alpha dropped.
pub fn side_by_side(collage: &RgbaImage) -> RgbImage {
    let single = DynamicImage::ImageRgba8(collage.clone()).to_rgb8();
    let mut doubled = RgbImage::new(single.width() * 2, single.height());
    imageops::replace(&mut doubled, &single, 0, 0);
    imageops::replace(&mut doubled, &single, single.width() as i64, 0);
    doubled
}

pub struct Compositor {
    template: RgbaImage,
    layout: CollageLayout,
}

impl Compositor {
    pub fn new(template: RgbaImage, layout: CollageLayout) -> Result<Self, CompositeError> {
        layout.check_fits(template.width(), template.height())?;
        Ok(Self { template, layout })
    }

    pub fn layout(&self) -> &CollageLayout {
        &self.layout
    }

    /// Paste each photo into its window on a copy of the template.
    pub fn compose<P: AsRef<Path>>(&self, photos: &[P; PHOTOS_PER_COLLAGE]) -> Composite {
        let mut canvas = self.template.clone();
        let slots = std::array::from_fn(|i| {
            let region = &self.layout.regions[i];
            let path = photos[i].as_ref();
            let (tile, outcome) = match image::open(path) {
                Ok(photo) if photo.width() > 0 && photo.height() > 0 => {
                    (fit_cover(&photo, region.width, region.height), SlotOutcome::Placed)
                }
                Ok(_) => (placeholder(region), placeholder_outcome(path, "image has no pixels")),
                Err(e) => (placeholder(region), placeholder_outcome(path, &e.to_string())),
            };
            imageops::replace(&mut canvas, &tile, region.x as i64, region.y as i64);
            outcome
        });
        Composite { image: canvas, slots }
    }
}

fn placeholder_outcome(path: &Path, reason: &str) -> SlotOutcome {
    warn!(photo = %path.display(), reason, "Photo unusable, substituting placeholder");
    SlotOutcome::Placeholder { reason: reason.to_string() }
}

/// Composes a batch, doubles it and saves it under the archive root.
pub struct CollageRenderer {
    compositor: Compositor,
    archive: Archive,
}

impl CollageRenderer {
    pub fn new(compositor: Compositor, archive: Archive) -> Self {
        Self { compositor, archive }
    }

    pub fn render_paths<P: AsRef<Path>>(
        &self,
        photos: &[P; PHOTOS_PER_COLLAGE],
        stamp: &str,
    ) -> Result<(PathBuf, Composite), CompositeError> {
        let composite = self.compositor.compose(photos);
        let doubled = side_by_side(&composite.image);
        let path = self.archive.collage_path(stamp);
        doubled.save(&path).map_err(|source| CompositeError::Save {
            path: path.display().to_string(),
            source,
        })?;
        info!(
            collage = %path.display(),
            placeholders = composite.placeholders(),
            "Saved collage"
        );
        Ok((path, composite))
    }
}

impl BatchRenderer for CollageRenderer {
    fn render(&self, batch: &Batch, stamp: &str) -> Result<PathBuf, CompositeError> {
        self.render_paths(&batch.paths(), stamp).map(|(path, _)| path)
    }
}
