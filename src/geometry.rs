use crate::error::{Result, S2MosaicError};
use chrono::NaiveDate;
use geo::{Area, BoundingRect, Centroid, Coord, LineString, MultiPolygon, Point, Polygon, Rect};
use serde::Deserialize;

/// Region to process, in EPSG:4326 (x = longitude, y = latitude).
#[derive(Debug, Clone, PartialEq)]
pub struct AreaOfInterest {
    polygon: Polygon<f64>,
    bounds: Rect<f64>,
}

impl AreaOfInterest {
    pub fn new(polygon: Polygon<f64>) -> Result<Self> {
        let exterior = polygon.exterior();
        if exterior.0.len() < 4 {
            return Err(S2MosaicError::InvalidAoi(format!(
                "polygon ring has {} coordinates, need at least 4",
                exterior.0.len()
            )));
        }
        for coord in exterior.coords() {
            if !coord.x.is_finite() || !coord.y.is_finite() {
                return Err(S2MosaicError::InvalidAoi(
                    "polygon has non-finite coordinates".to_string(),
                ));
            }
            if coord.x.abs() > 180.0 || coord.y.abs() > 90.0 {
                return Err(S2MosaicError::InvalidAoi(format!(
                    "coordinate ({}, {}) is outside longitude/latitude bounds",
                    coord.x, coord.y
                )));
            }
        }
        if polygon.unsigned_area() <= 0.0 {
            return Err(S2MosaicError::InvalidAoi("polygon has zero area".to_string()));
        }
        let bounds = polygon
            .bounding_rect()
            .ok_or_else(|| S2MosaicError::InvalidAoi("polygon is empty".to_string()))?;

        Ok(Self { polygon, bounds })
    }

    pub fn from_bbox(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<Self> {
        if min_x >= max_x || min_y >= max_y {
            return Err(S2MosaicError::InvalidAoi(format!(
                "degenerate bbox [{}, {}, {}, {}]",
                min_x, min_y, max_x, max_y
            )));
        }
        let rect = Rect::new(
            Coord { x: min_x, y: min_y },
            Coord { x: max_x, y: max_y },
        );
        Self::new(rect.to_polygon())
    }

    /// Parse a GeoJSON `Polygon` geometry, or a `Feature` wrapping one.
    pub fn from_geojson(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let geometry_value = match value.get("type").and_then(|t| t.as_str()) {
            Some("Feature") => value
                .get("geometry")
                .cloned()
                .ok_or_else(|| S2MosaicError::InvalidAoi("feature has no geometry".to_string()))?,
            _ => value,
        };
        let geometry: GeoJsonGeometry = serde_json::from_value(geometry_value)?;
        match geometry.into_multi_polygon()?.0.as_slice() {
            [polygon] => Self::new(polygon.clone()),
            other => Err(S2MosaicError::InvalidAoi(format!(
                "expected a single polygon, got {}",
                other.len()
            ))),
        }
    }

    /// Parse a WKT `POLYGON`, or a `MULTIPOLYGON` holding exactly one polygon.
    pub fn from_wkt(text: &str) -> Result<Self> {
        let geometry = gdal::vector::Geometry::from_wkt(text.trim())
            .map_err(|e| S2MosaicError::InvalidAoi(format!("invalid WKT: {}", e)))?;
        match geometry.to_geo()? {
            geo::Geometry::Polygon(polygon) => Self::new(polygon),
            geo::Geometry::MultiPolygon(multi) => match multi.0.as_slice() {
                [polygon] => Self::new(polygon.clone()),
                other => Err(S2MosaicError::InvalidAoi(format!(
                    "expected a single polygon, got {}",
                    other.len()
                ))),
            },
            _ => Err(S2MosaicError::InvalidAoi(format!(
                "expected a WKT polygon, got {}",
                geometry.geometry_name()
            ))),
        }
    }

    /// Parse GeoJSON (text starting with `{`) or WKT polygon text.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim_start();
        if text.starts_with('{') {
            Self::from_geojson(text)
        } else if looks_like_wkt(text) {
            Self::from_wkt(text)
        } else {
            Err(S2MosaicError::InvalidAoi("expected GeoJSON or a WKT polygon".to_string()))
        }
    }

    pub fn polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }

    /// Axis-aligned bounds as (left, bottom, right, top).
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        (
            self.bounds.min().x,
            self.bounds.min().y,
            self.bounds.max().x,
            self.bounds.max().y,
        )
    }

    /// Bounding box polygon used for catalog searches.
    pub fn bbox_polygon(&self) -> Polygon<f64> {
        let (left, bottom, right, top) = self.bounds();
        Polygon::new(
            LineString::from(vec![
                (left, bottom),
                (left, top),
                (right, top),
                (right, bottom),
                (left, bottom),
            ]),
            vec![],
        )
    }

    pub fn centroid(&self) -> Point<f64> {
        // A validated polygon has positive area, so a centroid always exists.
        self.polygon
            .centroid()
            .unwrap_or_else(|| self.bounds.center().into())
    }

    /// EPSG code of the UTM zone containing the AOI centroid.
    pub fn estimate_utm_epsg(&self) -> u32 {
        let centroid = self.centroid();
        utm_epsg_for(centroid.x(), centroid.y())
    }
}

/// Whether `text` starts with a WKT polygon keyword.
pub fn looks_like_wkt(text: &str) -> bool {
    let upper = text.trim_start().to_ascii_uppercase();
    upper.starts_with("POLYGON") || upper.starts_with("MULTIPOLYGON")
}

/// EPSG code of the WGS84 UTM zone containing a longitude/latitude.
pub fn utm_epsg_for(lon: f64, lat: f64) -> u32 {
    let zone = (((lon + 180.0) / 6.0).floor() as i64).clamp(0, 59) as u32 + 1;
    if lat >= 0.0 {
        32600 + zone
    } else {
        32700 + zone
    }
}

/// Inclusive acquisition date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(S2MosaicError::InvalidDateRange(start, end));
        }
        Ok(Self { start, end })
    }

    /// STAC `datetime` interval, `YYYY-MM-DD/YYYY-MM-DD`.
    pub fn to_interval(&self) -> String {
        format!(
            "{}/{}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum GeoJsonGeometry {
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Vec<f64>>>> },
}

impl GeoJsonGeometry {
    pub(crate) fn into_multi_polygon(self) -> Result<MultiPolygon<f64>> {
        match self {
            GeoJsonGeometry::Polygon { coordinates } => {
                Ok(MultiPolygon::new(vec![rings_to_polygon(coordinates)?]))
            }
            GeoJsonGeometry::MultiPolygon { coordinates } => coordinates
                .into_iter()
                .map(rings_to_polygon)
                .collect::<Result<Vec<_>>>()
                .map(MultiPolygon::new),
        }
    }
}

fn rings_to_polygon(rings: Vec<Vec<Vec<f64>>>) -> Result<Polygon<f64>> {
    let mut rings = rings.into_iter().map(positions_to_ring);
    let exterior = rings
        .next()
        .ok_or_else(|| S2MosaicError::InvalidAoi("polygon without rings".to_string()))??;
    let interiors = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn positions_to_ring(positions: Vec<Vec<f64>>) -> Result<LineString<f64>> {
    positions
        .into_iter()
        .map(|position| match position.as_slice() {
            [x, y, ..] => Ok(Coord { x: *x, y: *y }),
            _ => Err(S2MosaicError::InvalidAoi(
                "position with fewer than two ordinates".to_string(),
            )),
        })
        .collect::<Result<Vec<_>>>()
        .map(LineString::new)
}
