use crate::catalog::CatalogItem;
use crate::config::OutputConfig;
use crate::crs::Crs;
use crate::error::{Result, S2MosaicError};
use crate::raster::{GeoTransform, Georeference, Mosaic, TileRaster, Window, WindowReader};
use gdal::cpl::CslStringList;
use gdal::raster::Buffer;
use gdal::{Dataset, DriverManager};
use log::{debug, info};
use ndarray::{s, Array3, Axis};
use std::path::Path;

/// Opens a catalog item's band as a lazily-read raster.
pub trait BandSource: Send + Sync {
    fn open(&self, item: &CatalogItem, band: &str) -> Result<TileRaster>;
}

/// GDAL-backed band source reading remote assets through virtual file systems.
#[derive(Debug, Default, Clone, Copy)]
pub struct GdalBandSource;

impl BandSource for GdalBandSource {
    fn open(&self, item: &CatalogItem, band: &str) -> Result<TileRaster> {
        let asset = item.asset(band).ok_or_else(|| {
            S2MosaicError::Mosaic(format!("item {} has no asset {}", item.id, band))
        })?;
        let path = gdal_path(&asset.href);
        debug!("Opening {} {} from {}", item.id, band, path);

        let reader = GdalReader::open(&path)?;
        let georef = reader.georeference()?;
        Ok(TileRaster::new(item.id.clone(), Box::new(reader), georef))
    }
}

/// Map an asset href to a path GDAL can open.
pub fn gdal_path(href: &str) -> String {
    if let Some(rest) = href.strip_prefix("s3://") {
        format!("/vsis3/{}", rest)
    } else if href.starts_with("http://") || href.starts_with("https://") {
        format!("/vsicurl/{}", href)
    } else {
        href.to_string()
    }
}

/// Window reader over a GDAL dataset.
pub struct GdalReader {
    dataset: Dataset,
}

impl GdalReader {
    pub fn open(path: &str) -> Result<Self> {
        let dataset = Dataset::open(path)?;
        let (width, height) = dataset.raster_size();
        if width == 0 || height == 0 || dataset.raster_count() == 0 {
            return Err(S2MosaicError::Mosaic(format!(
                "{} has invalid dimensions {}x{}x{}",
                path,
                dataset.raster_count(),
                width,
                height
            )));
        }
        Ok(Self { dataset })
    }

    /// Embedded CRS and transform, or `None` when the file carries no CRS.
    pub fn georeference(&self) -> Result<Option<Georeference>> {
        match Crs::from_projection(&self.dataset.projection()) {
            Some(crs) => Ok(Some(Georeference {
                crs,
                transform: GeoTransform(self.dataset.geo_transform()?),
            })),
            None => Ok(None),
        }
    }

    pub fn nodata(&self) -> Result<Option<f64>> {
        Ok(self.dataset.rasterband(1)?.no_data_value())
    }
}

impl WindowReader for GdalReader {
    fn size(&self) -> (usize, usize) {
        self.dataset.raster_size()
    }

    fn band_count(&self) -> usize {
        self.dataset.raster_count()
    }

    fn read_window(&self, window: &Window) -> Result<Array3<u16>> {
        let bands = self.band_count();
        let mut data = Array3::<u16>::zeros((bands, window.height, window.width));

        for band_index in 0..bands {
            let rasterband = self.dataset.rasterband(band_index + 1)?;
            let buffer = rasterband.read_as::<u16>(
                (window.x_off as isize, window.y_off as isize),
                (window.width, window.height),
                (window.width, window.height),
                None,
            )?;
            let values: Vec<u16> = buffer.into_iter().collect();
            let plane = ndarray::Array2::from_shape_vec((window.height, window.width), values)?;
            data.slice_mut(s![band_index, .., ..]).assign(&plane);
        }

        Ok(data)
    }
}

/// Validate compression type
pub fn validate_compression(compression: &str) -> Result<()> {
    let valid_types = ["DEFLATE", "LZW", "ZSTD", "NONE"];
    if !valid_types.contains(&compression) {
        return Err(S2MosaicError::InvalidCompression(compression.to_string()));
    }
    Ok(())
}

/// Validate tile size (must be multiple of 16)
pub fn validate_tile_size(tile_size: usize) -> Result<()> {
    if tile_size == 0 || tile_size % 16 != 0 {
        return Err(S2MosaicError::InvalidTileSize(tile_size));
    }
    Ok(())
}

/// GTiff creation options for tiled, compressed output.
pub fn create_dataset_options(output: &OutputConfig) -> Vec<String> {
    vec![
        format!("COMPRESS={}", output.compression),
        "TILED=YES".to_string(),
        format!("BLOCKXSIZE={}", output.block_size),
        format!("BLOCKYSIZE={}", output.block_size),
        "BIGTIFF=IF_SAFER".to_string(),
    ]
}

/// Write a mosaic as a UInt16 GeoTIFF with CRS, transform and nodata embedded.
/// Whether `path` names a GDAL virtual file system such as `/vsis3/`.
pub fn is_virtual_path(path: &Path) -> bool {
    path.to_str().is_some_and(|p| p.starts_with("/vsi"))
}

pub fn write_mosaic(path: &Path, mosaic: &Mosaic, output: &OutputConfig) -> Result<()> {
    info!("Saving file: {}", path.display());

    // GTiff writes seek backwards, which /vsis3/ only supports through a local spool.
    if is_virtual_path(path) {
        gdal::config::set_thread_local_config_option(
            "CPL_VSIL_USE_TEMP_FILE_FOR_RANDOM_WRITE",
            "YES",
        )?;
    }

    let (width, height) = (mosaic.width(), mosaic.height());
    if width == 0 || height == 0 {
        return Err(S2MosaicError::Mosaic(format!(
            "refusing to write empty mosaic to {}",
            path.display()
        )));
    }

    let mut options = CslStringList::new();
    // Block sizes larger than the image are rejected by the driver.
    if width >= output.block_size && height >= output.block_size {
        for opt in create_dataset_options(output) {
            options.add_string(&opt)?;
        }
    } else {
        options.add_string(&format!("COMPRESS={}", output.compression))?;
    }

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset = driver.create_with_band_type_with_options::<u16, _>(
        path,
        width,
        height,
        mosaic.band_count(),
        &options,
    )?;

    dataset.set_geo_transform(&mosaic.transform.0)?;
    dataset.set_projection(&mosaic.crs.to_wkt()?)?;

    for (i, plane) in mosaic.data.axis_iter(Axis(0)).enumerate() {
        let band_index = i + 1;
        let mut raster_band = dataset.rasterband(band_index)?;

        let values: Vec<u16> = plane.iter().copied().collect();
        let mut buffer = Buffer::new((width, height), values);
        raster_band.write((0, 0), (width, height), &mut buffer)?;
        raster_band.set_no_data_value(Some(mosaic.nodata as f64))?;
        debug!("Wrote band {} ({}x{})", band_index, width, height);
    }

    Ok(())
}

/// Read a GeoTIFF written by [`write_mosaic`] back into memory.
pub fn read_mosaic(path: &Path) -> Result<Mosaic> {
    let path_str = path.to_string_lossy();
    let reader = GdalReader::open(&path_str)?;
    let georef = reader
        .georeference()?
        .ok_or_else(|| S2MosaicError::Crs(format!("{} has no CRS", path.display())))?;
    let nodata = reader.nodata()?.unwrap_or(0.0) as u16;

    let (width, height) = reader.size();
    let data = reader.read_window(&Window::new(0, 0, width, height))?;

    Ok(Mosaic {
        data,
        nodata,
        resolution: georef.resolution(),
        transform: georef.transform,
        crs: georef.crs,
    })
}
