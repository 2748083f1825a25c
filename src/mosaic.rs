use crate::catalog::CatalogItem;
use crate::chunking::read_window_chunked;
use crate::config::MosaicConfig;
use crate::crs::{Crs, CrsUnits, Reprojector};
use crate::error::{Result, S2MosaicError};
use crate::geometry::AreaOfInterest;
use crate::georef::TileGeoreferencer;
use crate::io::BandSource;
use crate::raster::{GeoTransform, Georeference, Mosaic, TileRaster, Window};
use geo::{BoundingRect, Coord, Intersects, Polygon, Rect};
use log::{debug, info, warn};
use ndarray::{Array2, Array3, Axis};
use rayon::prelude::*;

/// Samples taken along each edge when projecting tile bounds.
const EDGE_SAMPLES: usize = 21;

/// A tile cut down to the pixels touching the AOI.
#[derive(Debug, Clone, PartialEq)]
pub struct ClippedTile {
    pub item_id: String,
    pub data: Array3<u16>,
    pub georef: Georeference,
}

impl ClippedTile {
    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }
}

/// Builds one composite per (items, band) from lazily opened tiles.
pub struct MosaicBuilder<'a> {
    bands: &'a dyn BandSource,
    georeferencer: TileGeoreferencer<'a>,
    config: &'a MosaicConfig,
}

impl<'a> MosaicBuilder<'a> {
    pub fn new(
        bands: &'a dyn BandSource,
        georeferencer: TileGeoreferencer<'a>,
        config: &'a MosaicConfig,
    ) -> Self {
        Self {
            bands,
            georeferencer,
            config,
        }
    }

    /// Open a band, mark nodata and recover georeferencing when missing.
    pub fn load_tile(&self, item: &CatalogItem, band: &str) -> Result<TileRaster> {
        let mut tile = self.bands.open(item, band)?;
        tile.set_nodata(self.config.nodata);
        if !tile.has_crs() {
            self.georeferencer.georeference(item, band, &mut tile)?;
        }
        Ok(tile)
    }

    pub fn build(&self, items: &[CatalogItem], band: &str, aoi: &AreaOfInterest) -> Result<Mosaic> {
        if items.is_empty() {
            return Err(S2MosaicError::Mosaic(format!("no items to mosaic for {}", band)));
        }

        let mut clipped = Vec::with_capacity(items.len());
        for item in items {
            let tile = self.load_tile(item, band)?;
            match clip_to_aoi(&tile, aoi, self.config.chunk_size)? {
                Some(tile) => clipped.push(tile),
                None => debug!("Item {} does not touch the AOI for {}", item.id, band),
            }
        }

        let first = clipped.first().ok_or_else(|| {
            S2MosaicError::Mosaic(format!("no {} tile intersects the area of interest", band))
        })?;

        let target_crs = Crs::Epsg(aoi.estimate_utm_epsg());
        let resolution = first.georef.resolution();
        if first.georef.crs != target_crs && first.georef.crs.units()? != CrsUnits::Meters {
            warn!(
                "First {} tile is in {} with non-metric units; resolution {:?} applied to {}",
                band, first.georef.crs, resolution, target_crs
            );
        }

        info!(
            "Merging {} {} tiles into {} at {:?}",
            clipped.len(),
            band,
            target_crs,
            resolution
        );
        merge_tiles(
            &clipped,
            &target_crs,
            resolution,
            self.config.nodata,
            self.config.merge_precision,
        )
    }
}

/// Clip a tile to the AOI, keeping every pixel the polygon touches.
///
/// Returns `None` when the AOI lies outside the tile.
pub fn clip_to_aoi(
    tile: &TileRaster,
    aoi: &AreaOfInterest,
    chunk_size: usize,
) -> Result<Option<ClippedTile>> {
    let georef = tile.georef.as_ref().ok_or_else(|| {
        S2MosaicError::georeferencing(&tile.item_id, "tile has no CRS after georeferencing")
    })?;
    tile.check_coordinates()?;
    if !georef.transform.is_north_up() {
        return Err(S2MosaicError::Mosaic(format!(
            "tile {} has a rotated geotransform",
            tile.item_id
        )));
    }

    let polygon =
        Reprojector::new(&Crs::wgs84(), &georef.crs)?.transform_polygon(aoi.polygon())?;
    let Some(window) = clip_window(&polygon, &georef.transform, tile.reader.size()) else {
        return Ok(None);
    };

    let mut data = read_window_chunked(tile.reader.as_ref(), &window, chunk_size)?;
    let transform = georef.transform.shifted(window.x_off, window.y_off);
    let mask = all_touched_mask(&polygon, &transform, window.height, window.width);

    for mut plane in data.axis_iter_mut(Axis(0)) {
        plane.zip_mut_with(&mask, |value, &inside| {
            if !inside {
                *value = tile.nodata;
            }
        });
    }

    Ok(Some(ClippedTile {
        item_id: tile.item_id.clone(),
        data,
        georef: Georeference {
            crs: georef.crs.clone(),
            transform,
        },
    }))
}

/// Pixel window of a raster of `size` (width, height) covering the polygon's bounds.
pub fn clip_window(
    polygon: &Polygon<f64>,
    transform: &GeoTransform,
    size: (usize, usize),
) -> Option<Window> {
    let rect = polygon.bounding_rect()?;
    let (c0, r0) = transform.ground_to_pixel(rect.min().x, rect.min().y);
    let (c1, r1) = transform.ground_to_pixel(rect.max().x, rect.max().y);

    let col_min = c0.min(c1).floor().max(0.0);
    let row_min = r0.min(r1).floor().max(0.0);
    let col_max = c0.max(c1).ceil().min(size.0 as f64);
    let row_max = r0.max(r1).ceil().min(size.1 as f64);

    if col_min >= col_max || row_min >= row_max {
        return None;
    }

    Some(Window::new(
        col_min as usize,
        row_min as usize,
        (col_max - col_min) as usize,
        (row_max - row_min) as usize,
    ))
}

/// `true` for every pixel whose cell intersects the polygon.
pub fn all_touched_mask(
    polygon: &Polygon<f64>,
    transform: &GeoTransform,
    height: usize,
    width: usize,
) -> Array2<bool> {
    let mut mask = Array2::from_elem((height, width), false);
    mask.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(row, mut cells)| {
            for (col, touched) in cells.iter_mut().enumerate() {
                let (x0, y0) = transform.pixel_to_ground(col as f64, row as f64);
                let (x1, y1) = transform.pixel_to_ground(col as f64 + 1.0, row as f64 + 1.0);
                let cell = Rect::new(Coord { x: x0, y: y0 }, Coord { x: x1, y: y1 });
                *touched = polygon.intersects(&cell);
            }
        });
    mask
}

/// Bounds of a tile expressed in `target` CRS coordinates.
fn projected_bounds(tile: &ClippedTile, to_target: &Reprojector) -> Result<(f64, f64, f64, f64)> {
    let transform = &tile.georef.transform;
    if to_target.is_identity() {
        return Ok(transform.bounds(tile.width(), tile.height()));
    }

    let (w, h) = (tile.width() as f64, tile.height() as f64);
    let mut xs = Vec::with_capacity(EDGE_SAMPLES * 4);
    let mut ys = Vec::with_capacity(EDGE_SAMPLES * 4);
    for i in 0..EDGE_SAMPLES {
        let t = i as f64 / (EDGE_SAMPLES - 1) as f64;
        for (col, row) in [(t * w, 0.0), (t * w, h), (0.0, t * h), (w, t * h)] {
            let (x, y) = transform.pixel_to_ground(col, row);
            xs.push(x);
            ys.push(y);
        }
    }
    to_target.transform(&mut xs, &mut ys)?;

    let fold = |values: &[f64]| {
        values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    };
    let (min_x, max_x) = fold(&xs);
    let (min_y, max_y) = fold(&ys);
    Ok((min_x, min_y, max_x, max_y))
}

/// Merge clipped tiles onto a common grid in `target_crs` at `resolution`.
///
/// Earlier tiles win where tiles overlap; pixels outside every tile stay `nodata`.
pub fn merge_tiles(
    tiles: &[ClippedTile],
    target_crs: &Crs,
    resolution: (f64, f64),
    nodata: u16,
    precision: f64,
) -> Result<Mosaic> {
    let first = tiles
        .first()
        .ok_or_else(|| S2MosaicError::Mosaic("no tiles to merge".to_string()))?;
    let band_count = first.data.dim().0;
    if let Some(odd) = tiles.iter().find(|t| t.data.dim().0 != band_count) {
        return Err(S2MosaicError::Mosaic(format!(
            "tile {} has {} bands, expected {}",
            odd.item_id,
            odd.data.dim().0,
            band_count
        )));
    }
    let (res_x, res_y) = (resolution.0.abs(), resolution.1.abs());
    if res_x <= 0.0 || res_y <= 0.0 {
        return Err(S2MosaicError::Mosaic(format!("invalid resolution {:?}", resolution)));
    }

    let to_target = tiles
        .iter()
        .map(|t| Reprojector::new(&t.georef.crs, target_crs))
        .collect::<Result<Vec<_>>>()?;

    let mut union = (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
    for (tile, reprojector) in tiles.iter().zip(&to_target) {
        let (min_x, min_y, max_x, max_y) = projected_bounds(tile, reprojector)?;
        union = (union.0.min(min_x), union.1.min(min_y), union.2.max(max_x), union.3.max(max_y));
    }
    let (min_x, min_y, max_x, max_y) = union;

    let width = (((max_x - min_x) / res_x) - 1e-6).ceil().max(1.0) as usize;
    let height = (((max_y - min_y) / res_y) - 1e-6).ceil().max(1.0) as usize;
    let transform = GeoTransform::north_up(min_x, max_y, res_x, res_y);
    debug!("Merge grid: {}x{} at {:?}, origin ({}, {})", width, height, resolution, min_x, max_y);

    let mut data = Array3::from_elem((band_count, height, width), nodata);
    for (tile, reprojector) in tiles.iter().zip(&to_target) {
        let (tile_res_x, tile_res_y) = tile.georef.resolution();
        let same_grid = reprojector.is_identity()
            && (tile_res_x - res_x).abs() < 1e-9
            && (tile_res_y - res_y).abs() < 1e-9;

        if same_grid {
            paste_aligned(&mut data, tile, &transform, nodata, precision)?;
        } else {
            sample_reprojected(&mut data, tile, &transform, target_crs, nodata)?;
        }
    }

    Ok(Mosaic {
        data,
        nodata,
        transform,
        crs: target_crs.clone(),
        resolution: (res_x, res_y),
    })
}

/// Copy a tile already on the output grid, snapping offsets within `precision`.
fn paste_aligned(
    output: &mut Array3<u16>,
    tile: &ClippedTile,
    transform: &GeoTransform,
    nodata: u16,
    precision: f64,
) -> Result<()> {
    let (tile_x, tile_y) = tile.georef.transform.origin();
    let (col, row) = transform.ground_to_pixel(tile_x, tile_y);
    let (col_off, row_off) = (col.round(), row.round());

    let (res_x, res_y) = transform.resolution();
    let drift = ((col - col_off).abs() * res_x).max((row - row_off).abs() * res_y);
    if drift > precision {
        return Err(S2MosaicError::Mosaic(format!(
            "tile {} is offset {:.3} units from the output grid (precision {})",
            tile.item_id, drift, precision
        )));
    }

    let (_, out_height, out_width) = output.dim();
    let (col_off, row_off) = (col_off as i64, row_off as i64);
    for ((band, r, c), &value) in tile.data.indexed_iter() {
        if value == nodata {
            continue;
        }
        let (out_r, out_c) = (row_off + r as i64, col_off + c as i64);
        if out_r < 0 || out_c < 0 || out_r >= out_height as i64 || out_c >= out_width as i64 {
            continue;
        }
        let target = &mut output[[band, out_r as usize, out_c as usize]];
        if *target == nodata {
            *target = value;
        }
    }
    Ok(())
}

/// Nearest-neighbour resample of a tile in another CRS or resolution.
fn sample_reprojected(
    output: &mut Array3<u16>,
    tile: &ClippedTile,
    transform: &GeoTransform,
    target_crs: &Crs,
    nodata: u16,
) -> Result<()> {
    let to_tile = Reprojector::new(target_crs, &tile.georef.crs)?;
    let (bands, out_height, out_width) = output.dim();
    let (tile_height, tile_width) = (tile.height() as f64, tile.width() as f64);

    for out_r in 0..out_height {
        let mut xs = Vec::with_capacity(out_width);
        let mut ys = Vec::with_capacity(out_width);
        for out_c in 0..out_width {
            let (x, y) = transform.pixel_to_ground(out_c as f64 + 0.5, out_r as f64 + 0.5);
            xs.push(x);
            ys.push(y);
        }
        to_tile.transform(&mut xs, &mut ys)?;

        for out_c in 0..out_width {
            let (col, row) = tile.georef.transform.ground_to_pixel(xs[out_c], ys[out_c]);
            if !(0.0..tile_width).contains(&col) || !(0.0..tile_height).contains(&row) {
                continue;
            }
            let (src_r, src_c) = (row.floor() as usize, col.floor() as usize);
            for band in 0..bands {
                let value = tile.data[[band, src_r, src_c]];
                let target = &mut output[[band, out_r, out_c]];
                if value != nodata && *target == nodata {
                    *target = value;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::LineString;

    fn tile(id: &str, origin: (f64, f64), data: Array3<u16>) -> ClippedTile {
        ClippedTile {
            item_id: id.to_string(),
            data,
            georef: Georeference {
                crs: Crs::Epsg(32633),
                transform: GeoTransform::north_up(origin.0, origin.1, 10.0, 10.0),
            },
        }
    }

    /// 3x3 tile at 60 m in zone 32N, valued 1..=9 row by row.
    fn zone_32_tile() -> ClippedTile {
        ClippedTile {
            item_id: "32TQQ".to_string(),
            data: Array3::from_shape_fn((1, 3, 3), |(_, r, c)| (r * 3 + c + 1) as u16),
            georef: Georeference {
                crs: Crs::Epsg(32632),
                transform: GeoTransform::north_up(728_000.0, 4_986_000.0, 60.0, 60.0),
            },
        }
    }

    fn project(from: u32, to: u32, x: f64, y: f64) -> (f64, f64) {
        let reprojector = Reprojector::new(&Crs::Epsg(from), &Crs::Epsg(to)).unwrap();
        let (mut xs, mut ys) = ([x], [y]);
        reprojector.transform(&mut xs, &mut ys).unwrap();
        (xs[0], ys[0])
    }

    fn value_at(mosaic: &Mosaic, x: f64, y: f64) -> u16 {
        let (col, row) = mosaic.transform.ground_to_pixel(x, y);
        mosaic.data[[0, row.floor() as usize, col.floor() as usize]]
    }

    #[test]
    fn test_merge_reprojects_foreign_zone_tile() {
        let source = zone_32_tile();
        let mosaic = merge_tiles(&[source], &Crs::Epsg(32633), (10.0, 10.0), 0, 1.0).unwrap();

        assert_eq!(mosaic.crs, Crs::Epsg(32633));
        let (left, bottom, right, top) = mosaic.bounds();
        for (x, y) in [
            (728_000.0, 4_986_000.0),
            (728_180.0, 4_986_000.0),
            (728_000.0, 4_985_820.0),
            (728_180.0, 4_985_820.0),
        ] {
            let (px, py) = project(32632, 32633, x, y);
            assert!(px >= left - 1e-6 && px <= right + 1e-6, "x {} outside", px);
            assert!(py >= bottom - 1e-6 && py <= top + 1e-6, "y {} outside", py);
        }

        // Centre of the middle source pixel.
        let (x, y) = project(32632, 32633, 728_090.0, 4_985_910.0);
        assert_eq!(value_at(&mosaic, x, y), 5);
        // Centre of the top-left source pixel.
        let (x, y) = project(32632, 32633, 728_030.0, 4_985_970.0);
        assert_eq!(value_at(&mosaic, x, y), 1);
    }

    #[test]
    fn test_merge_mixes_pasted_and_resampled_tiles() {
        let foreign = zone_32_tile();
        let to_target = Reprojector::new(&Crs::Epsg(32632), &Crs::Epsg(32633)).unwrap();
        let (min_x, min_y, max_x, max_y) = projected_bounds(&foreign, &to_target).unwrap();

        // Native tile on the output grid, ten pixels or more east of the foreign one.
        let columns = ((max_x - min_x) / 10.0).ceil() + 10.0;
        let native_x = min_x + columns * 10.0;
        let native = tile("33TUL", (native_x, max_y), Array3::from_elem((1, 4, 4), 9));

        let mosaic =
            merge_tiles(&[native, foreign], &Crs::Epsg(32633), (10.0, 10.0), 0, 1.0).unwrap();

        let (left, bottom, right, top) = mosaic.bounds();
        assert!(left <= min_x + 1e-6 && bottom <= min_y + 1e-6);
        assert!(right >= native_x + 40.0 - 1e-6);
        assert!((top - max_y).abs() < 1e-6);

        assert_eq!(value_at(&mosaic, native_x + 15.0, max_y - 15.0), 9);
        let (x, y) = project(32632, 32633, 728_090.0, 4_985_910.0);
        assert_eq!(value_at(&mosaic, x, y), 5);

        // Between the two tiles nothing was written.
        assert_eq!(value_at(&mosaic, max_x + 50.0, max_y - 15.0), 0);
        let gap = mosaic.transform.ground_to_pixel(max_x + 50.0, max_y - 15.0).0 as usize;
        assert!(mosaic.data.index_axis(Axis(2), gap).iter().all(|&v| v == 0));
    }

    #[test]
    fn test_merge_disjoint_tiles_fills_gap_with_nodata() {
        // Two 2x2 tiles, 20 m apart horizontally, same row band.
        let left = tile("left", (1000.0, 2000.0), Array3::from_elem((1, 2, 2), 5));
        let right = tile("right", (1040.0, 2000.0), Array3::from_elem((1, 2, 2), 7));

        let mosaic = merge_tiles(&[left, right], &Crs::Epsg(32633), (10.0, 10.0), 0, 50.0).unwrap();

        assert_eq!(mosaic.bounds(), (1000.0, 1980.0, 1060.0, 2000.0));
        assert_eq!(mosaic.data.dim(), (1, 2, 6));
        for r in 0..2 {
            assert_eq!(mosaic.data[[0, r, 0]], 5);
            assert_eq!(mosaic.data[[0, r, 1]], 5);
            assert_eq!(mosaic.data[[0, r, 2]], 0);
            assert_eq!(mosaic.data[[0, r, 3]], 0);
            assert_eq!(mosaic.data[[0, r, 4]], 7);
            assert_eq!(mosaic.data[[0, r, 5]], 7);
        }
        assert_eq!(mosaic.crs, Crs::Epsg(32633));
        assert_eq!(mosaic.resolution, (10.0, 10.0));
    }

    #[test]
    fn test_merge_overlap_first_tile_wins() {
        let mut first = Array3::from_elem((1, 2, 2), 1);
        first[[0, 1, 1]] = 0;
        let a = tile("a", (0.0, 20.0), first);
        let b = tile("b", (10.0, 20.0), Array3::from_elem((1, 2, 2), 2));

        let mosaic = merge_tiles(&[a, b], &Crs::Epsg(32633), (10.0, 10.0), 0, 50.0).unwrap();

        assert_eq!(mosaic.data.dim(), (1, 2, 3));
        assert_eq!(mosaic.data[[0, 0, 1]], 1);
        // Nodata in the first tile lets the second one through.
        assert_eq!(mosaic.data[[0, 1, 1]], 2);
        assert_eq!(mosaic.data[[0, 0, 2]], 2);
    }

    #[test]
    fn test_merge_snaps_subpixel_offsets() {
        let a = tile("a", (0.0, 20.0), Array3::from_elem((1, 2, 2), 1));
        let b = tile("b", (20.4, 20.0), Array3::from_elem((1, 2, 2), 2));

        let mosaic = merge_tiles(&[a, b], &Crs::Epsg(32633), (10.0, 10.0), 0, 50.0).unwrap();
        assert_eq!(mosaic.data[[0, 0, 2]], 2);
        assert_eq!(mosaic.data[[0, 0, 3]], 2);
    }

    #[test]
    fn test_merge_rejects_band_mismatch() {
        let a = tile("a", (0.0, 20.0), Array3::from_elem((1, 2, 2), 1));
        let b = tile("b", (20.0, 20.0), Array3::from_elem((3, 2, 2), 2));

        let result = merge_tiles(&[a, b], &Crs::Epsg(32633), (10.0, 10.0), 0, 50.0);
        assert!(matches!(result, Err(S2MosaicError::Mosaic(_))));
    }

    #[test]
    fn test_merge_empty() {
        assert!(merge_tiles(&[], &Crs::Epsg(32633), (10.0, 10.0), 0, 50.0).is_err());
    }

    #[test]
    fn test_clip_window_clamps_to_raster() {
        let transform = GeoTransform::north_up(0.0, 100.0, 10.0, 10.0);
        let polygon =
            Rect::new(Coord { x: -15.0, y: 45.0 }, Coord { x: 32.0, y: 200.0 }).to_polygon();

        let window = clip_window(&polygon, &transform, (10, 10)).unwrap();
        assert_eq!(window, Window::new(0, 0, 4, 6));
    }

    #[test]
    fn test_clip_window_outside_raster() {
        let transform = GeoTransform::north_up(0.0, 100.0, 10.0, 10.0);
        let polygon =
            Rect::new(Coord { x: 500.0, y: 0.0 }, Coord { x: 600.0, y: 50.0 }).to_polygon();
        assert!(clip_window(&polygon, &transform, (10, 10)).is_none());
    }

    #[test]
    fn test_all_touched_keeps_partial_pixels() {
        // Triangle covering the lower-left half of a 4x4 grid of 1-unit cells.
        let transform = GeoTransform::north_up(0.0, 4.0, 1.0, 1.0);
        let triangle = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (4.0, 0.0), (0.0, 4.0), (0.0, 0.0)]),
            vec![],
        );

        let mask = all_touched_mask(&triangle, &transform, 4, 4);
        // Cells crossed by the hypotenuse are kept.
        assert!(mask[[0, 0]]);
        assert!(mask[[3, 3]]);
        assert!(mask[[1, 2]]);
        // Top-right cells lie entirely outside.
        assert!(!mask[[0, 3]]);
        assert!(!mask[[0, 2]]);
        assert_eq!(mask.iter().filter(|&&v| v).count(), 13);
    }
}
