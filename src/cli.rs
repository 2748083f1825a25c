use crate::config::{
    OutputConfig, SearchConfig, Settings, DEFAULT_CATALOG_URL, DEFAULT_CLOUD_COVERAGE_THRESHOLD,
    DEFAULT_COLLECTION,
};
use crate::download::OutputRoot;
use crate::error::Result;
use crate::geometry::{looks_like_wkt, AreaOfInterest, DateRange};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::fs;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "s2-mosaic")]
#[command(about = "Select low-cloud Sentinel-2 dates over an area and download per-band mosaics")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Number of threads (default: all available)
    #[arg(short, long, value_name = "N", global = true)]
    pub threads: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the dates that cover the area with few invalid pixels
    Search(QueryArgs),
    /// Search, then write every band of the selected dates
    Download(DownloadArgs),
}

#[derive(clap::Args, Debug)]
pub struct QueryArgs {
    /// Polygon as GeoJSON or WKT, given inline or as a file path
    #[arg(long, value_name = "POLYGON", conflicts_with = "bbox", required_unless_present = "bbox")]
    pub aoi: Option<String>,

    /// Bounding box as min_lon,min_lat,max_lon,max_lat
    #[arg(long, value_name = "BBOX", value_parser = parse_bbox, allow_hyphen_values = true)]
    pub bbox: Option<[f64; 4]>,

    /// First acquisition date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub start: NaiveDate,

    /// Last acquisition date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub end: NaiveDate,

    /// Maximum fraction of invalid pixels
    #[arg(long, value_name = "FRACTION", default_value_t = DEFAULT_CLOUD_COVERAGE_THRESHOLD)]
    pub threshold: f64,

    /// Minimum spacing between selected dates in days (7 or less disables)
    #[arg(long, value_name = "DAYS")]
    pub frequency: Option<u32>,

    /// Catalog collection id
    #[arg(long, default_value = DEFAULT_COLLECTION)]
    pub collection: String,

    /// STAC API root URL
    #[arg(long, value_name = "URL", default_value = DEFAULT_CATALOG_URL)]
    pub catalog_url: String,

    /// Uncovered area (square degrees) still treated as full coverage
    #[arg(long, value_name = "AREA", default_value_t = 0.0)]
    pub coverage_tolerance: f64,

    /// HTTP timeout in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 60)]
    pub timeout: u64,
}

#[derive(clap::Args, Debug)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub query: QueryArgs,

    /// Output directory or s3://bucket/prefix; files land in {year}/{month}/{day}/
    #[arg(short, long, value_name = "DIR")]
    pub destination: String,

    /// Compression type (DEFLATE, LZW, ZSTD, NONE)
    #[arg(short, long, default_value = "DEFLATE")]
    pub compression: String,

    /// Internal tile size (must be multiple of 16)
    #[arg(long, default_value_t = 512)]
    pub block_size: usize,

    /// Only write these bands (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub bands: Option<Vec<String>>,
}

fn parse_bbox(value: &str) -> std::result::Result<[f64; 4], String> {
    let parts = value
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("{}: {}", p, e)))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    match parts.as_slice() {
        [l, b, r, t] => Ok([*l, *b, *r, *t]),
        _ => Err(format!("expected 4 comma-separated numbers, got {}", parts.len())),
    }
}

impl QueryArgs {
    pub fn area_of_interest(&self) -> Result<AreaOfInterest> {
        if let Some([l, b, r, t]) = self.bbox {
            return AreaOfInterest::from_bbox(l, b, r, t);
        }
        let source = self.aoi.as_deref().unwrap_or_default();
        if source.trim_start().starts_with('{') || looks_like_wkt(source) {
            AreaOfInterest::parse(source)
        } else {
            AreaOfInterest::parse(&fs::read_to_string(source)?)
        }
    }

    pub fn date_range(&self) -> Result<DateRange> {
        DateRange::new(self.start, self.end)
    }

    pub fn search_config(&self) -> SearchConfig {
        SearchConfig {
            catalog_url: self.catalog_url.clone(),
            collection: self.collection.clone(),
            cloud_coverage_threshold: self.threshold,
            frequency: self.frequency,
            coverage_tolerance: self.coverage_tolerance,
            http_timeout: Duration::from_secs(self.timeout),
            ..SearchConfig::default()
        }
    }

    pub fn settings(&self) -> Settings {
        Settings {
            search: self.search_config(),
            ..Settings::default()
        }
    }
}

impl DownloadArgs {
    pub fn destination(&self) -> Result<OutputRoot> {
        OutputRoot::parse(&self.destination)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            output: OutputConfig {
                compression: self.compression.to_uppercase(),
                block_size: self.block_size,
                bands: self.bands.clone(),
            },
            ..self.query.settings()
        }
    }
}
