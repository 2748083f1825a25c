use crate::error::{Result, S2MosaicError};
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use geo::{Coord, LineString, Polygon};
use log::{debug, warn};
use std::fmt;

pub const WGS84_EPSG: u32 = 4326;

/// Coordinate reference system, kept as an EPSG code whenever one is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Crs {
    Epsg(u32),
    Wkt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrsUnits {
    Meters,
    Degrees,
    Other,
}

impl Crs {
    pub fn wgs84() -> Self {
        Crs::Epsg(WGS84_EPSG)
    }

    /// Parse CRS names such as `urn:ogc:def:crs:EPSG:8.8.1:32632`,
    /// `urn:ogc:def:crs:EPSG::32632` or `EPSG:32632`.
    pub fn from_name(name: &str) -> Result<Self> {
        let trimmed = name.trim();
        if !trimmed.to_ascii_uppercase().contains("EPSG") {
            return Err(S2MosaicError::Crs(format!(
                "unsupported CRS name: {}",
                name
            )));
        }
        trimmed
            .rsplit(':')
            .next()
            .and_then(|code| code.parse::<u32>().ok())
            .map(Crs::Epsg)
            .ok_or_else(|| S2MosaicError::Crs(format!("no EPSG code in CRS name: {}", name)))
    }

    /// Build from a dataset projection; returns `None` for an empty projection.
    pub fn from_projection(projection: &str) -> Option<Self> {
        if projection.trim().is_empty() {
            return None;
        }
        match SpatialRef::from_wkt(projection) {
            Ok(srs) => {
                let is_epsg = srs
                    .auth_name()
                    .map(|name| name.eq_ignore_ascii_case("EPSG"))
                    .unwrap_or(false);
                match srs.auth_code() {
                    Ok(code) if is_epsg && code > 0 => Some(Crs::Epsg(code as u32)),
                    _ => Some(Crs::Wkt(projection.to_string())),
                }
            }
            Err(e) => {
                warn!("Failed to parse projection WKT, keeping it verbatim: {}", e);
                Some(Crs::Wkt(projection.to_string()))
            }
        }
    }

    /// Spatial reference with x = easting/longitude, y = northing/latitude.
    pub fn to_spatial_ref(&self) -> Result<SpatialRef> {
        let mut srs = match self {
            Crs::Epsg(code) => SpatialRef::from_epsg(*code)?,
            Crs::Wkt(wkt) => SpatialRef::from_wkt(wkt)?,
        };
        srs.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
        Ok(srs)
    }

    pub fn to_wkt(&self) -> Result<String> {
        match self {
            Crs::Wkt(wkt) => Ok(wkt.clone()),
            Crs::Epsg(_) => Ok(self.to_spatial_ref()?.to_wkt()?),
        }
    }

    pub fn units(&self) -> Result<CrsUnits> {
        let srs = self.to_spatial_ref()?;
        if srs.is_geographic() {
            return Ok(CrsUnits::Degrees);
        }
        if srs.is_projected() && (srs.linear_units() - 1.0).abs() < 0.01 {
            return Ok(CrsUnits::Meters);
        }
        Ok(CrsUnits::Other)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Epsg(code) => write!(f, "EPSG:{}", code),
            Crs::Wkt(wkt) => {
                let head: String = wkt.chars().take(48).collect();
                write!(f, "WKT[{}...]", head)
            }
        }
    }
}

/// Reusable point transformation between two reference systems.
pub struct Reprojector {
    transform: Option<CoordTransform>,
}

impl Reprojector {
    pub fn new(from: &Crs, to: &Crs) -> Result<Self> {
        if from == to {
            return Ok(Self { transform: None });
        }
        debug!("Creating coordinate transform {} -> {}", from, to);
        let transform = CoordTransform::new(&from.to_spatial_ref()?, &to.to_spatial_ref()?)
            .map_err(|e| S2MosaicError::Crs(format!("{} -> {}: {}", from, to, e)))?;
        Ok(Self {
            transform: Some(transform),
        })
    }

    pub fn is_identity(&self) -> bool {
        self.transform.is_none()
    }

    /// Transform coordinates in place.
    pub fn transform(&self, xs: &mut [f64], ys: &mut [f64]) -> Result<()> {
        if let Some(transform) = &self.transform {
            transform
                .transform_coords(xs, ys, &mut [])
                .map_err(|e| S2MosaicError::Crs(format!("coordinate transform failed: {}", e)))?;
        }
        Ok(())
    }

    pub fn transform_polygon(&self, polygon: &Polygon<f64>) -> Result<Polygon<f64>> {
        if self.is_identity() {
            return Ok(polygon.clone());
        }
        let exterior = self.transform_ring(polygon.exterior())?;
        let interiors = polygon
            .interiors()
            .iter()
            .map(|ring| self.transform_ring(ring))
            .collect::<Result<Vec<_>>>()?;
        Ok(Polygon::new(exterior, interiors))
    }

    fn transform_ring(&self, ring: &LineString<f64>) -> Result<LineString<f64>> {
        let mut xs: Vec<f64> = ring.coords().map(|c| c.x).collect();
        let mut ys: Vec<f64> = ring.coords().map(|c| c.y).collect();
        self.transform(&mut xs, &mut ys)?;
        Ok(LineString::new(
            xs.into_iter()
                .zip(ys)
                .map(|(x, y)| Coord { x, y })
                .collect(),
        ))
    }
}
