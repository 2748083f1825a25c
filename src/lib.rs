// Library exports for testing and reuse

pub mod catalog;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod coverage;
pub mod crs;
pub mod download;
pub mod error;
pub mod geometry;
pub mod georef;
pub mod io;
pub mod mosaic;
pub mod pipeline;
pub mod raster;
pub mod selection;
pub mod stac;

// Re-export commonly used types
pub use catalog::{Catalog, CatalogItem, DateGroup};
pub use config::{MosaicConfig, OutputConfig, SearchConfig, Settings};
pub use coverage::CoverageResult;
pub use download::{DateDownload, DownloadReport, OutputRoot};
pub use error::{Result, S2MosaicError};
pub use geometry::{AreaOfInterest, DateRange};
pub use georef::TileInfoSource;
pub use io::{BandSource, GdalBandSource};
pub use pipeline::{download_sentinel2, search_sentinel2, Services};
pub use selection::{DateOutcome, SearchReport, SelectionTable};
pub use stac::StacClient;
