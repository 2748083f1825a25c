use crate::catalog::CatalogItem;
use crate::error::{Result, S2MosaicError};
use crate::geometry::AreaOfInterest;
use crate::mosaic::MosaicBuilder;
use chrono::NaiveDate;
use geo::{Area, BooleanOps, MultiPolygon};
use log::debug;
use ndarray::parallel::prelude::*;
use ndarray::Array3;

/// Scene-classification band identifier.
pub const SCL_BAND: &str = "SCL";

/// SCL classes treated as unusable: defective, cloud shadow, cloud (medium/high), thin cirrus.
pub const INVALID_SCL_CLASSES: [u16; 5] = [1, 3, 8, 9, 10];

/// Coverage and cloud evaluation for one acquisition date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverageResult {
    pub date: NaiveDate,
    pub area_covered: bool,
    percent_novalid: Option<f64>,
}

impl CoverageResult {
    pub fn uncovered(date: NaiveDate) -> Self {
        Self {
            date,
            area_covered: false,
            percent_novalid: None,
        }
    }

    pub fn covered(date: NaiveDate, percent_novalid: f64) -> Self {
        Self {
            date,
            area_covered: true,
            percent_novalid: Some(percent_novalid.clamp(0.0, 1.0)),
        }
    }

    /// Fraction of invalid pixels; present exactly when the area is covered.
    pub fn percent_novalid(&self) -> Option<f64> {
        self.percent_novalid
    }

    pub fn passes(&self, threshold: f64) -> bool {
        self.area_covered && self.percent_novalid.map_or(false, |p| p <= threshold)
    }
}

/// Part of the AOI left after removing every footprint.
pub fn uncovered_remainder(aoi: &AreaOfInterest, items: &[CatalogItem]) -> MultiPolygon<f64> {
    items.iter().fold(
        MultiPolygon::new(vec![aoi.polygon().clone()]),
        |remainder, item| remainder.difference(&item.footprint),
    )
}

/// Whether the footprints jointly cover the AOI, up to `tolerance` square degrees.
pub fn is_area_covered(aoi: &AreaOfInterest, items: &[CatalogItem], tolerance: f64) -> bool {
    let remainder = uncovered_remainder(aoi, items);
    if remainder.0.is_empty() {
        return true;
    }
    let area = remainder.unsigned_area();
    debug!("Uncovered remainder: {} parts, area {:e}", remainder.0.len(), area);
    area <= tolerance
}

/// Fraction of pixels in an SCL composite that belong to an invalid class.
pub fn invalid_fraction(scl: &Array3<u16>) -> Result<f64> {
    let total = scl.len();
    if total == 0 {
        return Err(S2MosaicError::Mosaic("empty scene classification mosaic".to_string()));
    }
    let invalid = scl
        .par_iter()
        .filter(|value| INVALID_SCL_CLASSES.contains(*value))
        .count();
    Ok(invalid as f64 / total as f64)
}

/// Computes a [`CoverageResult`] for the items of one date.
pub trait DateEvaluator {
    fn evaluate(&self, date: NaiveDate, items: &[CatalogItem]) -> Result<CoverageResult>;
}

/// Evaluates coverage geometrically, then cloudiness from the SCL mosaic.
pub struct CoverageEvaluator<'a> {
    builder: &'a MosaicBuilder<'a>,
    aoi: &'a AreaOfInterest,
    tolerance: f64,
}

impl<'a> CoverageEvaluator<'a> {
    pub fn new(builder: &'a MosaicBuilder<'a>, aoi: &'a AreaOfInterest, tolerance: f64) -> Self {
        Self {
            builder,
            aoi,
            tolerance,
        }
    }
}

impl DateEvaluator for CoverageEvaluator<'_> {
    fn evaluate(&self, date: NaiveDate, items: &[CatalogItem]) -> Result<CoverageResult> {
        if !is_area_covered(self.aoi, items, self.tolerance) {
            debug!("{}: {} items do not cover the area", date, items.len());
            return Ok(CoverageResult::uncovered(date));
        }

        let mosaic = self
            .builder
            .build(items, SCL_BAND, self.aoi)
            .map_err(|e| S2MosaicError::coverage(date, e))?;
        let fraction =
            invalid_fraction(&mosaic.data).map_err(|e| S2MosaicError::coverage(date, e))?;
        debug!("{}: {:.4} of pixels invalid", date, fraction);

        Ok(CoverageResult::covered(date, fraction))
    }
}
