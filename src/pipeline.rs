use crate::catalog::{search_by_date, Catalog};
use crate::config::Settings;
use crate::coverage::CoverageEvaluator;
use crate::download::{AssetDownloader, DownloadReport, OutputRoot};
use crate::error::Result;
use crate::geometry::{AreaOfInterest, DateRange};
use crate::georef::{TileGeoreferencer, TileInfoSource};
use crate::io::BandSource;
use crate::mosaic::MosaicBuilder;
use crate::selection::{DateSelector, SearchReport, SelectionTable};
use log::info;

/// External services used by a run.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub catalog: &'a dyn Catalog,
    pub tile_info: &'a dyn TileInfoSource,
    pub bands: &'a dyn BandSource,
}

impl<'a> Services<'a> {
    fn mosaic_builder(&self, settings: &'a Settings) -> MosaicBuilder<'a> {
        MosaicBuilder::new(
            self.bands,
            TileGeoreferencer::new(self.tile_info),
            &settings.mosaic,
        )
    }
}

/// Find the dates whose tiles cover the AOI with few enough invalid pixels.
///
/// Only an unreachable catalog or invalid settings fail the call; per-date
/// failures are recorded in the report.
pub fn search_sentinel2(
    services: Services<'_>,
    aoi: &AreaOfInterest,
    range: &DateRange,
    settings: &Settings,
) -> Result<SearchReport> {
    settings.validate()?;
    let search = &settings.search;
    info!("Searching {} for {}", search.collection, range.to_interval());

    let groups = search_by_date(
        services.catalog,
        aoi,
        range,
        &search.collection,
        search.page_size,
    )?;

    let builder = services.mosaic_builder(settings);
    let evaluator = CoverageEvaluator::new(&builder, aoi, search.coverage_tolerance);
    let selector = DateSelector::new(search.effective_frequency(), search.cloud_coverage_threshold);

    Ok(selector.scan(&groups, &evaluator))
}

/// Write every band of the selected dates under `destination`, locally or on S3.
pub fn download_sentinel2(
    services: Services<'_>,
    aoi: &AreaOfInterest,
    range: &DateRange,
    selection: &SelectionTable,
    destination: &OutputRoot,
    settings: &Settings,
) -> Result<DownloadReport> {
    settings.validate()?;
    let builder = services.mosaic_builder(settings);
    AssetDownloader::new(services.catalog, &builder, &settings.search, &settings.output)
        .download(aoi, range, selection, destination)
}
