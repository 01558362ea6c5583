//! Input records read from the parcel, crop and forest inventory stores.

use crate::ParcelGeometry;
use serde::{Deserialize, Serialize};

/// A cadastral parcel. Area and centroid are derived from the geometry.
#[derive(Debug, Clone)]
pub struct Parcel {
    pub parcel_id: String,
    pub state_fips: String,
    pub county_fips: String,
    pub geometry: ParcelGeometry,
    pub centroid_lon: f64,
    pub centroid_lat: f64,
    pub area_acres: f64,
}

impl Parcel {
    /// Build a parcel, computing centroid and acres from the geometry.
    pub fn new(
        parcel_id: impl Into<String>,
        state_fips: impl Into<String>,
        county_fips: impl Into<String>,
        geometry: ParcelGeometry,
    ) -> Self {
        let (centroid_lon, centroid_lat) = geometry.centroid().unwrap_or((f64::NAN, f64::NAN));
        let area_acres = geometry.area_acres();
        Self {
            parcel_id: parcel_id.into(),
            state_fips: state_fips.into(),
            county_fips: county_fips.into(),
            geometry,
            centroid_lon,
            centroid_lat,
            area_acres,
        }
    }

    /// Five-digit state + county FIPS.
    pub fn full_county_fips(&self) -> String {
        format!("{}{}", self.state_fips, self.county_fips)
    }
}

/// One crop code's overlap with a parcel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropIntersection {
    pub crop_code: i32,
    pub intersection_area_m2: f64,
    pub parcel_area_m2: f64,
    pub coverage_percent: f64,
}

/// Plot-level dry biomass aggregates in tons per acre.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlotBiomass {
    pub drybio_ag: f64,
    pub drybio_bg: f64,
    pub drybio_bole: f64,
    pub drybio_sawlog: f64,
    pub drybio_stem: f64,
    pub drybio_branch: f64,
    pub drybio_foliage: f64,
    pub drybio_stump: f64,
}

/// Stand condition attributes recorded for a plot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandAttributes {
    pub stand_age: Option<f64>,
    pub forest_type_code: Option<i32>,
    pub ownership_group: Option<i32>,
    /// Years in which silvicultural treatments were recorded.
    pub treatment_years: Vec<i32>,
}

/// An FIA plot near a parcel centroid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestPlot {
    pub plot_id: String,
    pub lat: f64,
    pub lon: f64,
    pub inventory_year: Option<i32>,
    /// Planar distance to the query point in degrees.
    pub distance_degrees: f64,
    pub biomass: Option<PlotBiomass>,
    pub stand: StandAttributes,
}

/// A live FIA tree. Biomass components are dry pounds per tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeRecord {
    pub tree_id: String,
    pub plot_id: String,
    pub species_code: Option<i32>,
    pub status_code: i32,
    /// Diameter at breast height in inches.
    pub dia: Option<f64>,
    /// Total height in feet.
    pub ht: Option<f64>,
    /// Trees per acre this record represents.
    pub tpa_unadj: Option<f64>,
    pub drybio_ag: f64,
    pub drybio_bg: f64,
    pub drybio_bole: f64,
    pub drybio_sawlog: f64,
    pub drybio_stem: f64,
    pub drybio_branch: f64,
    pub drybio_foliage: f64,
    pub drybio_stump: f64,
}
