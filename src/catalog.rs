use crate::error::Result;
use crate::geometry::{AreaOfInterest, DateRange, GeoJsonGeometry};
use chrono::{DateTime, NaiveDate, Utc};
use geo::{MultiPolygon, Polygon};
use log::info;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};

/// Server-side cloud cover bound; real filtering happens on the SCL band.
pub const RELAXED_CLOUD_COVER: f64 = 100.0;

/// Access descriptor for one band of an item.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssetDescriptor {
    pub href: String,
    #[serde(default)]
    pub gsd: Option<f64>,
}

/// One source tile returned by the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub id: String,
    pub datetime: DateTime<Utc>,
    pub footprint: MultiPolygon<f64>,
    pub assets: HashMap<String, AssetDescriptor>,
}

impl CatalogItem {
    pub fn date(&self) -> NaiveDate {
        self.datetime.date_naive()
    }

    pub fn asset(&self, key: &str) -> Option<&AssetDescriptor> {
        self.assets.get(key)
    }
}

#[derive(Debug, Deserialize)]
struct RawItem {
    id: String,
    geometry: GeoJsonGeometry,
    properties: RawProperties,
    #[serde(default)]
    assets: HashMap<String, AssetDescriptor>,
}

#[derive(Debug, Deserialize)]
struct RawProperties {
    datetime: DateTime<Utc>,
}

impl CatalogItem {
    /// Build an item from a STAC Item JSON value.
    pub fn from_stac(value: Value) -> Result<Self> {
        let raw: RawItem = serde_json::from_value(value)?;
        Ok(Self {
            id: raw.id,
            datetime: raw.properties.datetime,
            footprint: raw.geometry.into_multi_polygon()?,
            assets: raw.assets,
        })
    }
}

/// Parameters of a single catalog search.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub collection: String,
    pub intersects: Polygon<f64>,
    pub datetime: String,
    pub max_cloud_cover: f64,
    pub limit: usize,
}

impl SearchRequest {
    /// Search over the AOI's bounding box, not the exact polygon.
    pub fn new(aoi: &AreaOfInterest, range: &DateRange, collection: &str, limit: usize) -> Self {
        Self {
            collection: collection.to_string(),
            intersects: aoi.bbox_polygon(),
            datetime: range.to_interval(),
            max_cloud_cover: RELAXED_CLOUD_COVER,
            limit,
        }
    }

    /// STAC API `POST /search` body.
    pub fn to_json(&self) -> Value {
        let ring: Vec<[f64; 2]> = self
            .intersects
            .exterior()
            .coords()
            .map(|c| [c.x, c.y])
            .collect();
        json!({
            "collections": [self.collection],
            "intersects": {
                "type": "Polygon",
                "coordinates": [ring],
            },
            "datetime": self.datetime,
            "query": {
                "eo:cloud_cover": { "lte": self.max_cloud_cover }
            },
            "limit": self.limit,
        })
    }
}

/// Image catalog queried for items over an area and date range.
pub trait Catalog: Send + Sync {
    /// Every item matching the request, in catalog order.
    fn search(&self, request: &SearchRequest) -> Result<Vec<CatalogItem>>;
}

/// Items keyed by acquisition date, iterated in calendar order.
pub type DateGroup = BTreeMap<NaiveDate, Vec<CatalogItem>>;

/// Group items by the date portion of their acquisition time.
pub fn group_by_date(items: Vec<CatalogItem>) -> DateGroup {
    let mut groups = DateGroup::new();
    for item in items {
        groups.entry(item.date()).or_default().push(item);
    }
    groups
}

/// Run one search and group the results by date.
pub fn search_by_date(
    catalog: &dyn Catalog,
    aoi: &AreaOfInterest,
    range: &DateRange,
    collection: &str,
    page_size: usize,
) -> Result<DateGroup> {
    let request = SearchRequest::new(aoi, range, collection, page_size);
    let items = catalog.search(&request)?;
    info!("{} Items found", items.len());

    let groups = group_by_date(items);
    info!("Items span {} acquisition dates", groups.len());
    Ok(groups)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use geo::{Coord, LineString, Rect};

    pub(crate) fn item_with_footprint(id: &str, date: NaiveDate, rect: Rect<f64>) -> CatalogItem {
        CatalogItem {
            id: id.to_string(),
            datetime: Utc
                .from_utc_datetime(&date.and_hms_opt(10, 20, 30).expect("valid time")),
            footprint: MultiPolygon::new(vec![rect.to_polygon()]),
            assets: HashMap::new(),
        }
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn unit_rect() -> Rect<f64> {
        Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 })
    }

    #[test]
    fn test_from_stac_item() {
        let value = json!({
            "type": "Feature",
            "id": "S2B_32TNQ_20200501_0_L2A",
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[9.0, 45.0], [10.4, 45.0], [10.4, 46.0], [9.0, 46.0], [9.0, 45.0]]]
            },
            "properties": { "datetime": "2020-05-01T10:27:34Z", "eo:cloud_cover": 12.5 },
            "assets": {
                "B01": { "href": "https://example.com/tiles/32/T/NQ/2020/5/1/0/R60m/B01.tif", "gsd": 60 },
                "info": { "href": "https://example.com/tiles/32/T/NQ/2020/5/1/0/tileInfo.json" },
                "SCL": { "href": "https://example.com/SCL.tif", "proj:epsg": 32632 }
            }
        });

        let item = CatalogItem::from_stac(value).unwrap();
        assert_eq!(item.id, "S2B_32TNQ_20200501_0_L2A");
        assert_eq!(item.date(), ymd(2020, 5, 1));
        assert_eq!(item.footprint.0.len(), 1);
        assert_eq!(item.asset("B01").unwrap().gsd, Some(60.0));
        assert!(item.asset("B12").is_none());
    }

    #[test]
    fn test_group_by_date_sorts_dates() {
        let items = vec![
            item_with_footprint("c", ymd(2020, 5, 12), unit_rect()),
            item_with_footprint("a", ymd(2020, 5, 1), unit_rect()),
            item_with_footprint("d", ymd(2020, 5, 12), unit_rect()),
            item_with_footprint("b", ymd(2020, 5, 3), unit_rect()),
        ];

        let groups = group_by_date(items);
        let dates: Vec<_> = groups.keys().copied().collect();
        assert_eq!(dates, vec![ymd(2020, 5, 1), ymd(2020, 5, 3), ymd(2020, 5, 12)]);

        let ids: Vec<_> = groups[&ymd(2020, 5, 12)].iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);
    }

    #[test]
    fn test_search_request_uses_bbox_and_relaxed_cloud_cover() {
        let aoi = AreaOfInterest::new(geo::Polygon::new(
            LineString::from(vec![(14.0, 40.0), (14.2, 40.1), (14.1, 40.3), (14.0, 40.0)]),
            vec![],
        ))
        .unwrap();
        let range = DateRange::new(ymd(2020, 6, 14), ymd(2022, 6, 14)).unwrap();

        let body = SearchRequest::new(&aoi, &range, "sentinel-s2-l2a-cogs", 100).to_json();
        assert_eq!(body["collections"][0], "sentinel-s2-l2a-cogs");
        assert_eq!(body["datetime"], "2020-06-14/2022-06-14");
        assert_eq!(body["query"]["eo:cloud_cover"]["lte"], 100.0);
        assert_eq!(body["intersects"]["coordinates"][0][0], json!([14.0, 40.0]));
        assert_eq!(body["intersects"]["coordinates"][0][2], json!([14.2, 40.3]));
    }
}
