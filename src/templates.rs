//! Template System - Fixed Photo Strip Layout
//!
//! The template is a decorated image with three transparent windows.
//! Photos are pasted into those windows at fixed coordinates.

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Failed to load template {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("Region {index} ({region}) does not fit inside the {width}x{height} template")]
    RegionOutOfBounds {
        index: usize,
        region: Region,
        width: u32,
        height: u32,
    },
}

/// A rectangle on the template, in template pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    pub fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0 && self.height > 0 && self.right() <= width as u64 && self.bottom() <= height as u64
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Number of photos in one collage.
pub const PHOTOS_PER_COLLAGE: usize = 3;

/// The three photo windows of a collage, top to bottom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollageLayout {
    pub regions: [Region; PHOTOS_PER_COLLAGE],
}

impl CollageLayout {
    /// Geometry of the booth's photo strip template.
    pub const fn photo_strip() -> Self {
        Self {
            regions: [
                Region::new(98, 333, 885, 639),
                Region::new(98, 1062, 885, 639),
                Region::new(98, 1790, 885, 639),
            ],
        }
    }

    /// Smallest template size that holds every region.
    pub fn required_size(&self) -> (u64, u64) {
        let width = self.regions.iter().map(Region::right).max().unwrap_or(0);
        let height = self.regions.iter().map(Region::bottom).max().unwrap_or(0);
        (width, height)
    }

    pub fn check_fits(&self, width: u32, height: u32) -> Result<(), TemplateError> {
        for (index, region) in self.regions.iter().enumerate() {
            if !region.fits_within(width, height) {
                return Err(TemplateError::RegionOutOfBounds {
                    index,
                    region: *region,
                    width,
                    height,
                });
            }
        }
        Ok(())
    }
}

impl Default for CollageLayout {
    fn default() -> Self {
        Self::photo_strip()
    }
}

/// Load the template image and make sure the layout fits on it.
pub fn load_template(path: &Path, layout: &CollageLayout) -> Result<RgbaImage, TemplateError> {
    let template = image::open(path)
        .map_err(|source| TemplateError::Load {
            path: path.display().to_string(),
            source,
        })?
        .to_rgba8();

    layout.check_fits(template.width(), template.height())?;
    Ok(template)
}

/// A connected transparent area found on a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransparentRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Number of transparent pixels in the area.
    pub area: u64,
}

impl TransparentRegion {
    pub fn as_region(&self) -> Region {
        Region::new(self.x, self.y, self.width, self.height)
    }
}

/// Default alpha below which a template pixel counts as a photo window.
pub const DEFAULT_ALPHA_THRESHOLD: u8 = 50;

/// Default minimum side length for a transparent area to count as a window.
pub const DEFAULT_MIN_WINDOW_SIDE: u32 = 100;

/// Find the transparent windows of a template.
///
/// Uses a 4-connected flood fill over pixels with alpha below
/// `alpha_threshold`. Areas whose bounding box is not larger than
/// `min_side` on both axes are ignored. Results are sorted top to bottom.
pub fn find_transparent_regions(
    template: &RgbaImage,
    alpha_threshold: u8,
    min_side: u32,
) -> Vec<TransparentRegion> {
    let (width, height) = template.dimensions();
    let idx = |x: u32, y: u32| y as usize * width as usize + x as usize;
    let is_clear = |x: u32, y: u32| template.get_pixel(x, y)[3] < alpha_threshold;

    let mut visited = vec![false; width as usize * height as usize];
    let mut regions = vec![];
    let mut stack = vec![];

    for y in 0..height {
        for x in 0..width {
            if visited[idx(x, y)] || !is_clear(x, y) {
                continue;
            }

            let (mut min_x, mut max_x, mut min_y, mut max_y) = (x, x, y, y);
            let mut area = 0u64;
            visited[idx(x, y)] = true;
            stack.push((x, y));

            while let Some((cx, cy)) = stack.pop() {
                area += 1;
                min_x = min_x.min(cx);
                max_x = max_x.max(cx);
                min_y = min_y.min(cy);
                max_y = max_y.max(cy);

                let neighbours = [
                    (cx.checked_sub(1), Some(cy)),
                    (cx.checked_add(1).filter(|&nx| nx < width), Some(cy)),
                    (Some(cx), cy.checked_sub(1)),
                    (Some(cx), cy.checked_add(1).filter(|&ny| ny < height)),
                ];
                for (nx, ny) in neighbours {
                    if let (Some(nx), Some(ny)) = (nx, ny) {
                        if !visited[idx(nx, ny)] && is_clear(nx, ny) {
                            visited[idx(nx, ny)] = true;
                            stack.push((nx, ny));
                        }
                    }
                }
            }

            let region_width = max_x - min_x + 1;
            let region_height = max_y - min_y + 1;
            if region_width > min_side && region_height > min_side {
                regions.push(TransparentRegion {
                    x: min_x,
                    y: min_y,
                    width: region_width,
                    height: region_height,
                    area,
                });
            }
        }
    }

    regions.sort_by_key(|r| (r.y, r.x));
    regions
}
