use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum S2MosaicError {
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Array shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Coverage evaluation failed for {date}: {reason}")]
    CoverageEvaluation { date: NaiveDate, reason: String },

    #[error("Georeferencing failed for item {item}: {reason}")]
    Georeferencing { item: String, reason: String },

    #[error("Mosaic error: {0}")]
    Mosaic(String),

    #[error("Download failed for {date}: {source}")]
    Download {
        date: NaiveDate,
        #[source]
        source: Box<S2MosaicError>,
    },

    #[error("Invalid area of interest: {0}")]
    InvalidAoi(String),

    #[error("Invalid date range: {0} is after {1}")]
    InvalidDateRange(NaiveDate, NaiveDate),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid chunk size: {0} (must be positive)")]
    InvalidChunkSize(usize),

    #[error("CRS error: {0}")]
    Crs(String),

    #[error("Invalid compression type: {0}")]
    InvalidCompression(String),

    #[error("Invalid tile size: {0} (must be multiple of 16)")]
    InvalidTileSize(usize),
}

impl S2MosaicError {
    pub fn georeferencing(item: &str, reason: impl Into<String>) -> Self {
        S2MosaicError::Georeferencing {
            item: item.to_string(),
            reason: reason.into(),
        }
    }

    /// Wrap a failure while evaluating one acquisition date.
    pub fn coverage(date: NaiveDate, cause: S2MosaicError) -> Self {
        match cause {
            already @ S2MosaicError::CoverageEvaluation { .. } => already,
            other => S2MosaicError::CoverageEvaluation {
                date,
                reason: other.to_string(),
            },
        }
    }

    /// Catalog failures are the only ones that abort a whole search.
    pub fn is_fatal(&self) -> bool {
        matches!(self, S2MosaicError::CatalogUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, S2MosaicError>;
