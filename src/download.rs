use crate::catalog::{search_by_date, Catalog, CatalogItem, DateGroup};
use crate::config::{OutputConfig, SearchConfig};
use crate::error::{Result, S2MosaicError};
use crate::geometry::{AreaOfInterest, DateRange};
use crate::io::{gdal_path, write_mosaic};
use crate::mosaic::MosaicBuilder;
use crate::selection::SelectionTable;
use chrono::{Datelike, NaiveDate};
use log::{debug, error, info};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

/// Bands written for every selected date.
pub const BAND_LIST: [&str; 14] = [
    "visual", "B01", "B02", "B03", "B04", "B05", "B06", "B07", "B08", "B8A", "B09", "B11", "B12",
    "SCL",
];

/// `root/{year}/{month}/{day}/{band}_{YYYYMMDD}.tif`, directories unpadded.
pub fn output_path(root: &Path, date: NaiveDate, band: &str) -> PathBuf {
    root.join(date.year().to_string())
        .join(date.month().to_string())
        .join(date.day().to_string())
        .join(format!("{}_{}.tif", band, date.format("%Y%m%d")))
}

/// Where mosaics are written: a local directory or an S3 prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputRoot {
    Local(PathBuf),
    /// `bucket/prefix` without the scheme.
    S3(String),
}

impl OutputRoot {
    /// `s3://bucket/prefix` selects S3; other URL schemes are rejected.
    pub fn parse(root: &str) -> Result<Self> {
        if let Some(rest) = root.strip_prefix("s3://") {
            let prefix = rest.trim_end_matches('/');
            if prefix.is_empty() {
                return Err(S2MosaicError::InvalidConfig(format!(
                    "destination {} names no bucket",
                    root
                )));
            }
            return Ok(Self::S3(prefix.to_string()));
        }
        if let Some((scheme, _)) = root.split_once("://") {
            return Err(S2MosaicError::InvalidConfig(format!(
                "cannot write to {} destination {}",
                scheme, root
            )));
        }
        Ok(Self::Local(PathBuf::from(root)))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::S3(_))
    }

    /// Output file for `band` on `date`, as a GDAL path for remote roots.
    pub fn file_path(&self, date: NaiveDate, band: &str) -> PathBuf {
        match self {
            Self::Local(root) => output_path(root, date, band),
            Self::S3(prefix) => {
                let key = output_path(Path::new(prefix), date, band);
                PathBuf::from(gdal_path(&format!("s3://{}", key.display())))
            }
        }
    }
}

impl std::fmt::Display for OutputRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(root) => write!(f, "{}", root.display()),
            Self::S3(prefix) => write!(f, "s3://{}", prefix),
        }
    }
}

/// Files produced for one date, and the error that stopped it if any.
#[derive(Debug)]
pub struct DateDownload {
    pub date: NaiveDate,
    pub written: Vec<PathBuf>,
    pub error: Option<S2MosaicError>,
}

impl DateDownload {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Default)]
pub struct DownloadReport {
    pub dates: Vec<DateDownload>,
}

impl DownloadReport {
    pub fn written(&self) -> impl Iterator<Item = &Path> {
        self.dates
            .iter()
            .flat_map(|d| d.written.iter().map(PathBuf::as_path))
    }

    pub fn failures(&self) -> impl Iterator<Item = &DateDownload> {
        self.dates.iter().filter(|d| !d.is_complete())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

/// Re-queries the catalog, then mosaics and writes every band of the selected dates.
pub struct AssetDownloader<'a> {
    catalog: &'a dyn Catalog,
    builder: &'a MosaicBuilder<'a>,
    search: &'a SearchConfig,
    output: &'a OutputConfig,
    bands: Vec<String>,
}

impl<'a> AssetDownloader<'a> {
    pub fn new(
        catalog: &'a dyn Catalog,
        builder: &'a MosaicBuilder<'a>,
        search: &'a SearchConfig,
        output: &'a OutputConfig,
    ) -> Self {
        Self {
            catalog,
            builder,
            search,
            output,
            bands: output
                .bands
                .clone()
                .unwrap_or_else(|| BAND_LIST.iter().map(|b| b.to_string()).collect()),
        }
    }

    /// Only catalog failures are returned as `Err`; per-date failures land in the report.
    pub fn download(
        &self,
        aoi: &AreaOfInterest,
        range: &DateRange,
        selection: &SelectionTable,
        destination: &OutputRoot,
    ) -> Result<DownloadReport> {
        let groups = search_by_date(
            self.catalog,
            aoi,
            range,
            &self.search.collection,
            self.search.page_size,
        )?;
        Ok(self.download_groups(aoi, &groups, selection, destination))
    }

    pub fn download_groups(
        &self,
        aoi: &AreaOfInterest,
        groups: &DateGroup,
        selection: &SelectionTable,
        destination: &OutputRoot,
    ) -> DownloadReport {
        info!(
            "Downloading {} bands for {} dates into {}",
            self.bands.len(),
            selection.len(),
            destination
        );

        let dates: Vec<DateDownload> = selection
            .rows()
            .par_iter()
            .map(|row| match groups.get(&row.date) {
                Some(items) => self.download_date(aoi, row.date, items, destination),
                None => {
                    error!("Error while processing {}: no catalog items", row.date);
                    DateDownload {
                        date: row.date,
                        written: Vec::new(),
                        error: Some(S2MosaicError::Download {
                            date: row.date,
                            source: Box::new(S2MosaicError::Mosaic(
                                "date no longer returned by the catalog".to_string(),
                            )),
                        }),
                    }
                }
            })
            .collect();

        let report = DownloadReport { dates };
        info!(
            "Wrote {} files, {} dates incomplete",
            report.written().count(),
            report.failures().count()
        );
        report
    }

    /// Bands run in order; the first failure abandons the rest of the date.
    fn download_date(
        &self,
        aoi: &AreaOfInterest,
        date: NaiveDate,
        items: &[CatalogItem],
        destination: &OutputRoot,
    ) -> DateDownload {
        let mut written = Vec::with_capacity(self.bands.len());
        for band in &self.bands {
            match self.download_band(aoi, date, items, band, destination) {
                Ok(path) => written.push(path),
                Err(e) => {
                    error!("Error while processing {} ({}): {}", date, band, e);
                    return DateDownload {
                        date,
                        written,
                        error: Some(S2MosaicError::Download {
                            date,
                            source: Box::new(e),
                        }),
                    };
                }
            }
        }
        DateDownload {
            date,
            written,
            error: None,
        }
    }

    fn download_band(
        &self,
        aoi: &AreaOfInterest,
        date: NaiveDate,
        items: &[CatalogItem],
        band: &str,
        destination: &OutputRoot,
    ) -> Result<PathBuf> {
        debug!("Building {} mosaic for {}", band, date);
        let mosaic = self.builder.build(items, band, aoi)?;

        let path = destination.file_path(date, band);
        if !destination.is_remote() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        write_mosaic(&path, &mosaic, self.output)?;
        Ok(path)
    }
}
