use crate::error::{Result, S2MosaicError};
use std::time::Duration;

pub const DEFAULT_CATALOG_URL: &str = "https://earth-search.aws.element84.com/v0";
pub const DEFAULT_COLLECTION: &str = "sentinel-s2-l2a-cogs";
pub const DEFAULT_CLOUD_COVERAGE_THRESHOLD: f64 = 0.05;

/// Frequencies at or below this many days disable the spacing heuristic.
pub const MIN_FREQUENCY_DAYS: u32 = 7;

/// Catalog and date-selection settings.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub catalog_url: String,
    pub collection: String,
    pub cloud_coverage_threshold: f64,
    pub frequency: Option<u32>,
    /// Uncovered remainder area (squared degrees) still treated as empty.
    pub coverage_tolerance: f64,
    pub http_timeout: Duration,
    pub page_size: usize,
    pub max_pages: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            cloud_coverage_threshold: DEFAULT_CLOUD_COVERAGE_THRESHOLD,
            frequency: None,
            coverage_tolerance: 0.0,
            http_timeout: Duration::from_secs(60),
            page_size: 100,
            max_pages: 50,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.cloud_coverage_threshold) {
            return Err(S2MosaicError::InvalidConfig(format!(
                "cloud coverage threshold {} outside [0, 1]",
                self.cloud_coverage_threshold
            )));
        }
        if self.coverage_tolerance < 0.0 || !self.coverage_tolerance.is_finite() {
            return Err(S2MosaicError::InvalidConfig(format!(
                "coverage tolerance {} must be a finite non-negative area",
                self.coverage_tolerance
            )));
        }
        if self.page_size == 0 || self.max_pages == 0 {
            return Err(S2MosaicError::InvalidConfig(
                "page size and max pages must be positive".to_string(),
            ));
        }
        if self.collection.trim().is_empty() {
            return Err(S2MosaicError::InvalidConfig(
                "collection id is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Frequency honoured by the date selector, if any.
    pub fn effective_frequency(&self) -> Option<u32> {
        self.frequency.filter(|&days| days > MIN_FREQUENCY_DAYS)
    }
}

/// Settings shared by every mosaic built for a date/band.
#[derive(Debug, Clone)]
pub struct MosaicConfig {
    pub nodata: u16,
    /// Distance in output CRS units within which tile grids are considered aligned.
    pub merge_precision: f64,
    pub chunk_size: usize,
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self {
            nodata: 0,
            merge_precision: 50.0,
            chunk_size: 2048,
        }
    }
}

impl MosaicConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(S2MosaicError::InvalidChunkSize(self.chunk_size));
        }
        if self.merge_precision < 0.0 || !self.merge_precision.is_finite() {
            return Err(S2MosaicError::InvalidConfig(format!(
                "merge precision {} must be finite and non-negative",
                self.merge_precision
            )));
        }
        Ok(())
    }
}

/// GeoTIFF creation settings.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub compression: String,
    pub block_size: usize,
    /// Bands to write; `None` writes the full band list.
    pub bands: Option<Vec<String>>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            compression: "DEFLATE".to_string(),
            block_size: 512,
            bands: None,
        }
    }
}

impl OutputConfig {
    pub fn validate(&self) -> Result<()> {
        crate::io::validate_compression(&self.compression)?;
        crate::io::validate_tile_size(self.block_size)?;
        if let Some(bands) = &self.bands {
            if bands.is_empty() || bands.iter().any(|b| b.trim().is_empty()) {
                return Err(S2MosaicError::InvalidConfig(format!(
                    "band list {:?} is empty or has blank entries",
                    bands
                )));
            }
        }
        Ok(())
    }
}

/// Every setting for one search/download run.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub search: SearchConfig,
    pub mosaic: MosaicConfig,
    pub output: OutputConfig,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.search.validate()?;
        self.mosaic.validate()?;
        self.output.validate()
    }
}
