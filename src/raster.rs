use crate::crs::Crs;
use crate::error::{Result, S2MosaicError};
use ndarray::Array3;

/// Affine pixel-to-ground mapping in GDAL order
/// `[origin_x, pixel_width, row_rotation, origin_y, col_rotation, pixel_height]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// North-up transform with the origin at the top-left corner.
    pub fn north_up(origin_x: f64, origin_y: f64, res_x: f64, res_y: f64) -> Self {
        GeoTransform([origin_x, res_x.abs(), 0.0, origin_y, 0.0, -res_y.abs()])
    }

    /// Coefficients in affine (rasterio) order: `(a, b, c, d, e, f)`.
    pub fn affine(&self) -> [f64; 6] {
        let gt = self.0;
        [gt[1], gt[2], gt[0], gt[4], gt[5], gt[3]]
    }

    pub fn origin(&self) -> (f64, f64) {
        (self.0[0], self.0[3])
    }

    /// Absolute pixel size as (x, y).
    pub fn resolution(&self) -> (f64, f64) {
        (self.0[1].abs(), self.0[5].abs())
    }

    pub fn is_north_up(&self) -> bool {
        self.0[2] == 0.0 && self.0[4] == 0.0
    }

    pub fn pixel_to_ground(&self, col: f64, row: f64) -> (f64, f64) {
        let gt = self.0;
        (
            gt[0] + col * gt[1] + row * gt[2],
            gt[3] + col * gt[4] + row * gt[5],
        )
    }

    /// Fractional pixel position of a ground coordinate (north-up grids only).
    pub fn ground_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let gt = self.0;
        ((x - gt[0]) / gt[1], (y - gt[3]) / gt[5])
    }

    /// Transform of a sub-window starting at pixel `(x_off, y_off)`.
    pub fn shifted(&self, x_off: usize, y_off: usize) -> Self {
        let (x, y) = self.pixel_to_ground(x_off as f64, y_off as f64);
        let mut gt = self.0;
        gt[0] = x;
        gt[3] = y;
        GeoTransform(gt)
    }

    /// Ground bounds `(min_x, min_y, max_x, max_y)` of a `width` x `height` grid.
    pub fn bounds(&self, width: usize, height: usize) -> (f64, f64, f64, f64) {
        let corners = [
            self.pixel_to_ground(0.0, 0.0),
            self.pixel_to_ground(width as f64, 0.0),
            self.pixel_to_ground(0.0, height as f64),
            self.pixel_to_ground(width as f64, height as f64),
        ];
        corners.iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(min_x, min_y, max_x, max_y), &(x, y)| {
                (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
            },
        )
    }
}

/// Pixel window into a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub x_off: usize,
    pub y_off: usize,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub fn new(x_off: usize, y_off: usize, width: usize, height: usize) -> Self {
        Self {
            x_off,
            y_off,
            width,
            height,
        }
    }
}

/// Deferred access to a band's pixels; nothing is read until a window is requested.
pub trait WindowReader {
    /// Raster size as (width, height).
    fn size(&self) -> (usize, usize);

    fn band_count(&self) -> usize;

    /// Read a window as a `(band, row, col)` array.
    fn read_window(&self, window: &Window) -> Result<Array3<u16>>;
}

/// CRS and transform attached to a tile.
#[derive(Debug, Clone, PartialEq)]
pub struct Georeference {
    pub crs: Crs,
    pub transform: GeoTransform,
}

impl Georeference {
    pub fn resolution(&self) -> (f64, f64) {
        self.transform.resolution()
    }
}

/// Ground distance under which coordinates and transform agree.
const COORDINATE_TOLERANCE: f64 = 1e-6;

/// One catalog item's band, opened lazily.
pub struct TileRaster {
    pub item_id: String,
    pub reader: Box<dyn WindowReader>,
    pub georef: Option<Georeference>,
    pub nodata: u16,
    /// Pixel-centre coordinates, present when georeferencing was reconstructed.
    pub x_coords: Option<Vec<f64>>,
    pub y_coords: Option<Vec<f64>>,
}

impl TileRaster {
    pub fn new(
        item_id: impl Into<String>,
        reader: Box<dyn WindowReader>,
        georef: Option<Georeference>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            reader,
            georef,
            nodata: 0,
            x_coords: None,
            y_coords: None,
        }
    }

    pub fn set_nodata(&mut self, nodata: u16) {
        self.nodata = nodata;
    }

    pub fn has_crs(&self) -> bool {
        self.georef.is_some()
    }

    /// Check reconstructed pixel-centre coordinates against the transform.
    pub fn check_coordinates(&self) -> Result<()> {
        let (Some(georef), Some(xs), Some(ys)) = (&self.georef, &self.x_coords, &self.y_coords)
        else {
            return Ok(());
        };
        let (width, height) = self.reader.size();
        if xs.len() != width || ys.len() != height {
            return Err(S2MosaicError::georeferencing(
                &self.item_id,
                format!(
                    "{} x / {} y coordinates for a {}x{} raster",
                    xs.len(),
                    ys.len(),
                    width,
                    height
                ),
            ));
        }

        let transform = &georef.transform;
        let expected = [
            (xs.first(), transform.pixel_to_ground(0.5, 0.5).0),
            (xs.last(), transform.pixel_to_ground(width as f64 - 0.5, 0.5).0),
            (ys.first(), transform.pixel_to_ground(0.5, 0.5).1),
            (ys.last(), transform.pixel_to_ground(0.5, height as f64 - 0.5).1),
        ];
        for (actual, wanted) in expected {
            if let Some(&actual) = actual {
                if (actual - wanted).abs() > COORDINATE_TOLERANCE {
                    return Err(S2MosaicError::georeferencing(
                        &self.item_id,
                        format!("pixel centre {} does not match transform ({})", actual, wanted),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Composite raster for one date and band.
#[derive(Debug, Clone, PartialEq)]
pub struct Mosaic {
    /// `(band, row, col)` pixel values.
    pub data: Array3<u16>,
    pub nodata: u16,
    pub transform: GeoTransform,
    pub crs: Crs,
    pub resolution: (f64, f64),
}

impl Mosaic {
    pub fn band_count(&self) -> usize {
        self.data.dim().0
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.transform.bounds(self.width(), self.height())
    }

    pub fn pixel_count(&self) -> usize {
        self.data.len()
    }
}
