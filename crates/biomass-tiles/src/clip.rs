//! Clipping rasters to parcel polygons.

use crate::index::Band;
use crate::raster::{PixelWindow, Raster};
use biomass_common::{Bounds, ACRES_PER_M2};
use geo::{BoundingRect, Contains, MultiPolygon, Point};
use std::collections::BTreeMap;

/// WorldCover "Tree cover" class.
pub const WORLDCOVER_FOREST_CLASS: u8 = 10;

/// WorldCover nodata value.
pub const WORLDCOVER_NODATA: u8 = 0;

/// Ground area of one 10 m WorldCover pixel.
pub const WORLDCOVER_PIXEL_AREA_M2: f64 = 100.0;

/// Pixels of one band under a parcel. Pixels outside the polygon or
/// holding nodata are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct ClippedBand {
    pub width: u32,
    pub height: u32,
    pub values: Vec<f32>,
}

impl ClippedBand {
    /// Finite values inside the parcel.
    pub fn valid_values(&self) -> impl Iterator<Item = f32> + '_ {
        self.values.iter().copied().filter(|v| v.is_finite())
    }

    pub fn valid_count(&self) -> usize {
        self.valid_values().count()
    }

    /// Pixel at `(col, row)` or NaN.
    pub fn value(&self, col: u32, row: u32) -> f32 {
        if col >= self.width || row >= self.height {
            return f32::NAN;
        }
        self.values[(row * self.width + col) as usize]
    }
}

/// Sentinel-2 pixels for one parcel, all bands from the same tile.
#[derive(Debug, Clone, PartialEq)]
pub struct ParcelPixels {
    pub tile_id: String,
    pub acquisition_date: Option<String>,
    pub bands: BTreeMap<Band, ClippedBand>,
}

impl ParcelPixels {
    pub fn band(&self, band: Band) -> Option<&ClippedBand> {
        self.bands.get(&band)
    }

    /// Largest valid-pixel count across bands.
    pub fn valid_pixel_count(&self) -> usize {
        self.bands
            .values()
            .map(ClippedBand::valid_count)
            .max()
            .unwrap_or(0)
    }
}

/// WorldCover class histogram for a parcel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassCounts {
    counts: BTreeMap<u8, u64>,
}

impl ClassCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, class: u8, pixels: u64) {
        if pixels > 0 {
            *self.counts.entry(class).or_insert(0) += pixels;
        }
    }

    pub fn merge(&mut self, other: &ClassCounts) {
        for (&class, &pixels) in &other.counts {
            self.add(class, pixels);
        }
    }

    pub fn count(&self, class: u8) -> u64 {
        self.counts.get(&class).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// `(class, pixels)` in ascending class order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, u64)> + '_ {
        self.counts.iter().map(|(&c, &n)| (c, n))
    }
}

impl FromIterator<(u8, u64)> for ClassCounts {
    fn from_iter<I: IntoIterator<Item = (u8, u64)>>(iter: I) -> Self {
        let mut counts = ClassCounts::new();
        for (class, pixels) in iter {
            counts.add(class, pixels);
        }
        counts
    }
}

/// Forest share of a parcel's WorldCover pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldCoverSummary {
    pub forest_pixel_count: u64,
    pub total_pixel_count: u64,
    pub forest_area_acres: f64,
    pub forest_percent: f64,
}

impl WorldCoverSummary {
    /// `None` when the histogram holds no pixels.
    pub fn from_counts(counts: &ClassCounts) -> Option<Self> {
        let total = counts.total();
        if total == 0 {
            return None;
        }
        let forest = counts.count(WORLDCOVER_FOREST_CLASS);
        Some(Self {
            forest_pixel_count: forest,
            total_pixel_count: total,
            forest_area_acres: forest as f64 * WORLDCOVER_PIXEL_AREA_M2 * ACRES_PER_M2,
            forest_percent: forest as f64 / total as f64 * 100.0,
        })
    }
}

/// Pixel window of `raster` under `shape`, without buffer.
fn shape_window(raster: &Raster, shape: &MultiPolygon<f64>) -> Option<PixelWindow> {
    let rect = shape.bounding_rect()?;
    let (width, height) = raster.dimensions();
    PixelWindow::for_bounds(raster.transform(), width, height, &Bounds::from(rect), 0)
}

/// Clip `raster` to `shape` (given in the raster's CRS). A pixel belongs to
/// the parcel when its centre lies inside the polygon.
pub fn clip_band(raster: &Raster, shape: &MultiPolygon<f64>) -> ClippedBand {
    let Some(window) = shape_window(raster, shape) else {
        return ClippedBand {
            width: 0,
            height: 0,
            values: Vec::new(),
        };
    };
    let transform = raster.transform();
    let mut values = Vec::with_capacity(window.pixel_count() as usize);
    for row in window.row_off..window.row_off + window.height {
        for col in window.col_off..window.col_off + window.width {
            let (x, y) = transform.pixel_center(col, row);
            let value = if shape.contains(&Point::new(x, y)) {
                raster.get(col, row).unwrap_or(f32::NAN)
            } else {
                f32::NAN
            };
            values.push(value);
        }
    }
    ClippedBand {
        width: window.width,
        height: window.height,
        values,
    }
}

/// Histogram of WorldCover classes under `shape` (in the raster's CRS).
pub fn class_counts(raster: &Raster, shape: &MultiPolygon<f64>) -> ClassCounts {
    let clipped = clip_band(raster, shape);
    let mut counts = ClassCounts::new();
    for value in clipped.valid_values() {
        let class = value.round();
        if (0.0..=255.0).contains(&class) && class as u8 != WORLDCOVER_NODATA {
            counts.add(class as u8, 1);
        }
    }
    counts
}
