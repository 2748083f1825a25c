//! Recovery of missing georeferencing for Sentinel-2 tiles.
//!
//! Some catalog tiles (notably JPEG2000 assets) load without a CRS. Their
//! grid is still fully determined by the tile origin published in the
//! per-tile `tileInfo.json`, the band's ground sample distance, and the fixed
//! 109.8 km extent of a Sentinel-2 MGRS tile.

use crate::catalog::CatalogItem;
use crate::crs::Crs;
use crate::error::{Result, S2MosaicError};
use crate::raster::{GeoTransform, Georeference, TileRaster};
use log::{debug, info};
use ndarray::Array1;
use serde::Deserialize;

/// Physical side length of a Sentinel-2 tile in meters.
pub const TILE_EXTENT_METERS: u32 = 109_800;

/// Coefficients at or below this magnitude count as zero.
const ZERO_TOLERANCE: f64 = 1e-15;

/// Origin and CRS name published for a tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileInfo {
    pub crs_name: String,
    pub origin: (f64, f64),
}

#[derive(Deserialize)]
struct RawTileInfo {
    #[serde(rename = "tileOrigin")]
    tile_origin: RawTileOrigin,
}

#[derive(Deserialize)]
struct RawTileOrigin {
    crs: RawCrs,
    coordinates: Vec<f64>,
}

#[derive(Deserialize)]
struct RawCrs {
    properties: RawCrsProperties,
}

#[derive(Deserialize)]
struct RawCrsProperties {
    name: String,
}

impl TileInfo {
    pub fn from_json(item_id: &str, text: &str) -> Result<Self> {
        let raw: RawTileInfo = serde_json::from_str(text).map_err(|e| {
            S2MosaicError::georeferencing(item_id, format!("invalid tile info: {}", e))
        })?;

        match raw.tile_origin.coordinates.as_slice() {
            [x, y, ..] => Ok(Self {
                crs_name: raw.tile_origin.crs.properties.name,
                origin: (*x, *y),
            }),
            _ => Err(S2MosaicError::georeferencing(
                item_id,
                "tile origin has fewer than two coordinates",
            )),
        }
    }
}

/// Source of per-tile auxiliary metadata.
pub trait TileInfoSource: Send + Sync {
    fn tile_info(&self, item: &CatalogItem) -> Result<TileInfo>;
}

/// Georeferencing facts recovered for a tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileMetadata {
    pub crs: Crs,
    pub origin: (f64, f64),
    pub gsd: u32,
}

/// Ground sample distance of `band`, from asset metadata or the href's resolution folder.
pub fn asset_gsd(item: &CatalogItem, band: &str) -> Result<u32> {
    let asset = item
        .asset(band)
        .ok_or_else(|| S2MosaicError::georeferencing(&item.id, format!("no asset {}", band)))?;

    if let Some(gsd) = asset.gsd.filter(|g| g.is_finite() && *g >= 1.0) {
        return Ok(gsd.round() as u32);
    }

    // e.g. s3://sentinel-s2-l2a/tiles/32/T/NQ/2018/1/2/0/R60m/B01.jp2
    [("10m", 10), ("20m", 20), ("60m", 60)]
        .iter()
        .find(|(hint, _)| asset.href.contains(hint))
        .map(|&(_, gsd)| gsd)
        .ok_or_else(|| {
            S2MosaicError::georeferencing(
                &item.id,
                format!("cannot determine ground sample distance for {} ({})", band, asset.href),
            )
        })
}

/// Pixel shape (rows, cols) of a full tile at `gsd`.
pub fn tile_shape(gsd: u32) -> (usize, usize) {
    let side = (TILE_EXTENT_METERS / gsd) as usize;
    (side, side)
}

/// Transform and pixel-centre coordinates of a reconstructed tile grid.
#[derive(Debug, Clone, PartialEq)]
pub struct TileCoordinates {
    pub transform: GeoTransform,
    pub x_coords: Vec<f64>,
    pub y_coords: Vec<f64>,
}

/// Build the transform and coordinate arrays for a tile of `shape` (rows, cols).
pub fn generate_coordinates(
    origin: (f64, f64),
    shape: (usize, usize),
    gsd: f64,
) -> TileCoordinates {
    let transform = GeoTransform::north_up(origin.0, origin.1, gsd, gsd);
    let [a, b, c, d, e, f] = transform.affine();

    // Zero diagonal means rows and columns are swapped in the grid.
    let (step, ordered_shape) = if a.abs() <= ZERO_TOLERANCE && e.abs() <= ZERO_TOLERANCE {
        ((d, b), (shape.1, shape.0))
    } else {
        ((e, a), shape)
    };

    let start = (f + step.0 / 2.0, c + step.1 / 2.0);
    let end = (
        start.0 + step.0 * (ordered_shape.0.saturating_sub(1)) as f64,
        start.1 + step.1 * (ordered_shape.1.saturating_sub(1)) as f64,
    );

    TileCoordinates {
        transform,
        y_coords: Array1::linspace(start.0, end.0, shape.0).to_vec(),
        x_coords: Array1::linspace(start.1, end.1, shape.1).to_vec(),
    }
}

/// Reconstructs CRS and grid for tiles that load without one.
pub struct TileGeoreferencer<'a> {
    source: &'a dyn TileInfoSource,
}

impl<'a> TileGeoreferencer<'a> {
    pub fn new(source: &'a dyn TileInfoSource) -> Self {
        Self { source }
    }

    pub fn recover_metadata(&self, item: &CatalogItem, band: &str) -> Result<TileMetadata> {
        let info = self.source.tile_info(item)?;
        let crs = Crs::from_name(&info.crs_name)
            .map_err(|e| S2MosaicError::georeferencing(&item.id, e.to_string()))?;
        let gsd = asset_gsd(item, band)?;

        debug!(
            "Tile {} band {}: crs={}, origin=({}, {}), gsd={}",
            item.id, band, crs, info.origin.0, info.origin.1, gsd
        );

        Ok(TileMetadata {
            crs,
            origin: info.origin,
            gsd,
        })
    }

    /// Attach the recovered CRS, transform and coordinates to `tile`.
    pub fn georeference(
        &self,
        item: &CatalogItem,
        band: &str,
        tile: &mut TileRaster,
    ) -> Result<TileMetadata> {
        info!("Tile {} has no CRS; reconstructing from tile info", item.id);
        let metadata = self.recover_metadata(item, band)?;

        let shape = tile_shape(metadata.gsd);
        let (width, height) = tile.reader.size();
        if (height, width) != shape {
            return Err(S2MosaicError::georeferencing(
                &item.id,
                format!(
                    "raster is {}x{} but a {} m tile should be {}x{}",
                    width, height, metadata.gsd, shape.1, shape.0
                ),
            ));
        }

        let coords = generate_coordinates(metadata.origin, shape, metadata.gsd as f64);
        tile.georef = Some(Georeference {
            crs: metadata.crs.clone(),
            transform: coords.transform,
        });
        tile.x_coords = Some(coords.x_coords);
        tile.y_coords = Some(coords.y_coords);

        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::AssetDescriptor;
    use crate::raster::{Window, WindowReader};
    use approx::assert_relative_eq;
    use chrono::Utc;
    use geo::MultiPolygon;
    use ndarray::Array3;
    use std::collections::HashMap;

    const TILE_INFO: &str = r#"{
        "path": "tiles/32/T/NQ/2018/1/2/0",
        "tileOrigin": {
            "type": "Point",
            "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG:8.8.1:32632" } },
            "coordinates": [499980.0, 5000040.0]
        }
    }"#;

    struct FixedInfo;

    impl TileInfoSource for FixedInfo {
        fn tile_info(&self, item: &CatalogItem) -> Result<TileInfo> {
            TileInfo::from_json(&item.id, TILE_INFO)
        }
    }

    struct BlankReader(usize);

    impl WindowReader for BlankReader {
        fn size(&self) -> (usize, usize) {
            (self.0, self.0)
        }

        fn band_count(&self) -> usize {
            1
        }

        fn read_window(&self, window: &Window) -> Result<Array3<u16>> {
            Ok(Array3::zeros((1, window.height, window.width)))
        }
    }

    fn item(assets: &[(&str, &str, Option<f64>)]) -> CatalogItem {
        CatalogItem {
            id: "S2A_32TNQ_20180102_0_L2A".to_string(),
            datetime: Utc::now(),
            footprint: MultiPolygon::new(vec![]),
            assets: assets
                .iter()
                .map(|(key, href, gsd)| {
                    (
                        key.to_string(),
                        AssetDescriptor {
                            href: href.to_string(),
                            gsd: *gsd,
                        },
                    )
                })
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_tile_info_parsing() {
        let info = TileInfo::from_json("x", TILE_INFO).unwrap();
        assert_eq!(info.crs_name, "urn:ogc:def:crs:EPSG:8.8.1:32632");
        assert_eq!(info.origin, (499980.0, 5000040.0));
    }

    #[test]
    fn test_tile_info_missing_origin() {
        let result = TileInfo::from_json("x", r#"{"path": "tiles/32/T/NQ"}"#);
        assert!(matches!(result, Err(S2MosaicError::Georeferencing { .. })));
    }

    #[test]
    fn test_gsd_from_asset_property() {
        let item = item(&[("B02", "s3://bucket/R20m/B02.jp2", Some(10.0))]);
        assert_eq!(asset_gsd(&item, "B02").unwrap(), 10);
    }

    #[test]
    fn test_gsd_from_href_hint() {
        let item = item(&[
            ("B01", "s3://sentinel-s2-l2a/tiles/32/T/NQ/2018/1/2/0/R60m/B01.jp2", None),
            ("B05", "s3://sentinel-s2-l2a/tiles/32/T/NQ/2018/1/2/0/R20m/B05.jp2", None),
            ("B04", "s3://sentinel-s2-l2a/tiles/32/T/NQ/2018/1/2/0/R10m/B04.jp2", None),
        ]);
        assert_eq!(asset_gsd(&item, "B01").unwrap(), 60);
        assert_eq!(asset_gsd(&item, "B05").unwrap(), 20);
        assert_eq!(asset_gsd(&item, "B04").unwrap(), 10);
    }

    #[test]
    fn test_gsd_unresolvable() {
        let item = item(&[("SCL", "s3://bucket/tiles/SCL.jp2", None)]);
        assert!(matches!(
            asset_gsd(&item, "SCL"),
            Err(S2MosaicError::Georeferencing { .. })
        ));
        assert!(asset_gsd(&item, "B12").is_err());
    }

    #[test]
    fn test_tile_shape() {
        assert_eq!(tile_shape(10), (10980, 10980));
        assert_eq!(tile_shape(20), (5490, 5490));
        assert_eq!(tile_shape(60), (1830, 1830));
    }

    #[test]
    fn test_coordinate_reconstruction_round_trip() {
        let shape = tile_shape(20);
        let coords = generate_coordinates((499980.0, 5000040.0), shape, 20.0);

        assert_eq!(coords.transform.affine(), [20.0, 0.0, 499980.0, 0.0, -20.0, 5000040.0]);
        assert_eq!(coords.x_coords.len(), shape.1);
        assert_eq!(coords.y_coords.len(), shape.0);

        assert_relative_eq!(coords.x_coords[0], 499990.0, epsilon = 1e-6);
        assert_relative_eq!(*coords.x_coords.last().unwrap(), 609770.0, epsilon = 1e-6);
        assert_relative_eq!(coords.y_coords[0], 5000030.0, epsilon = 1e-6);
        assert_relative_eq!(*coords.y_coords.last().unwrap(), 4890250.0, epsilon = 1e-6);

        // Pixel centres are evenly spaced by the gsd.
        assert_relative_eq!(coords.x_coords[1] - coords.x_coords[0], 20.0, epsilon = 1e-6);
        assert_relative_eq!(coords.y_coords[1] - coords.y_coords[0], -20.0, epsilon = 1e-6);
    }

    #[test]
    fn test_georeference_assigns_crs_and_coords() {
        let item = item(&[
            ("B01", "s3://bucket/R60m/B01.jp2", None),
            ("info", "s3://bucket/tileInfo.json", None),
        ]);
        let mut tile = TileRaster::new(item.id.clone(), Box::new(BlankReader(1830)), None);

        let georeferencer = TileGeoreferencer::new(&FixedInfo);
        let metadata = georeferencer.georeference(&item, "B01", &mut tile).unwrap();

        assert_eq!(metadata.crs, Crs::Epsg(32632));
        assert_eq!(metadata.gsd, 60);
        let georef = tile.georef.as_ref().unwrap();
        assert_eq!(georef.resolution(), (60.0, 60.0));
        assert_eq!(georef.transform.origin(), (499980.0, 5000040.0));
        assert_eq!(tile.x_coords.as_ref().unwrap().len(), 1830);
        assert_eq!(tile.y_coords.as_ref().unwrap().len(), 1830);
    }

    #[test]
    fn test_georeference_rejects_shape_mismatch() {
        let item = item(&[("B01", "s3://bucket/R60m/B01.jp2", None)]);
        let mut tile = TileRaster::new(item.id.clone(), Box::new(BlankReader(1000)), None);

        let georeferencer = TileGeoreferencer::new(&FixedInfo);
        assert!(georeferencer.georeference(&item, "B01", &mut tile).is_err());
        assert!(tile.georef.is_none());
    }
}
