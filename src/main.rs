use clap::Parser;
use env_logger::Env;
use log::{info, warn};

use s2_mosaic::cli::{Args, Command, QueryArgs};
use s2_mosaic::error::{Result, S2MosaicError};
use s2_mosaic::geometry::{AreaOfInterest, DateRange};
use s2_mosaic::selection::SearchReport;
use s2_mosaic::{
    download_sentinel2, search_sentinel2, GdalBandSource, Services, Settings, StacClient,
};

fn run_search(
    services: Services<'_>,
    query: &QueryArgs,
    settings: &Settings,
) -> Result<(AreaOfInterest, DateRange, SearchReport)> {
    let aoi = query.area_of_interest()?;
    let range = query.date_range()?;
    let report = search_sentinel2(services, &aoi, &range, settings)?;

    for (date, error) in report.failures() {
        warn!("Date {} dropped: {}", date, error);
    }
    info!("Selected {} dates", report.selection.len());
    Ok((aoi, range, report))
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logger
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    info!("=== Sentinel-2 Mosaic ===");

    // Set thread pool size if specified
    if let Some(n_threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build_global()
            .map_err(|e| S2MosaicError::InvalidConfig(format!("thread pool: {}", e)))?;
        info!("Using {} threads", n_threads);
    } else {
        info!("Using all available threads");
    }

    match &args.command {
        Command::Search(query) => {
            let settings = query.settings();
            let client = StacClient::new(&settings.search)?;
            let services = Services {
                catalog: &client,
                tile_info: &client,
                bands: &GdalBandSource,
            };

            let (_, _, report) = run_search(services, query, &settings)?;
            println!("date\tpercent_novalid");
            for row in report.selection.rows() {
                println!("{}\t{:.4}", row.date, row.percent_novalid().unwrap_or_default());
            }
        }
        Command::Download(download) => {
            let settings = download.settings();
            let destination = download.destination()?;
            let client = StacClient::new(&settings.search)?;
            let services = Services {
                catalog: &client,
                tile_info: &client,
                bands: &GdalBandSource,
            };

            let (aoi, range, report) = run_search(services, &download.query, &settings)?;
            if report.selection.is_empty() {
                warn!("No date satisfies the coverage and cloud criteria");
                return Ok(());
            }

            let downloads = download_sentinel2(
                services,
                &aoi,
                &range,
                &report.selection,
                &destination,
                &settings,
            )?;
            for failed in downloads.failures() {
                if let Some(error) = &failed.error {
                    warn!(
                        "{} incomplete after {} files: {}",
                        failed.date,
                        failed.written.len(),
                        error
                    );
                }
            }
            info!("Wrote {} files", downloads.written().count());
        }
    }

    info!("=== Done! ===");
    Ok(())
}
