use crate::catalog::{Catalog, CatalogItem, SearchRequest};
use crate::config::SearchConfig;
use crate::error::{Result, S2MosaicError};
use crate::georef::{TileInfo, TileInfoSource};
use log::{debug, info, warn};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct ItemPage {
    #[serde(default)]
    features: Vec<Value>,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    context: Option<PageContext>,
    #[serde(rename = "numberMatched", default)]
    number_matched: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PageContext {
    #[serde(default)]
    matched: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct Link {
    rel: String,
    href: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    merge: bool,
}

/// Blocking STAC API client.
pub struct StacClient {
    client: Client,
    search_url: String,
    max_pages: usize,
}

impl StacClient {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .user_agent(concat!("s2-mosaic/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                S2MosaicError::CatalogUnavailable(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            search_url: format!("{}/search", config.catalog_url.trim_end_matches('/')),
            max_pages: config.max_pages,
        })
    }

    fn fetch_page(&self, url: &str, method: &str, body: Option<&Value>) -> Result<ItemPage> {
        debug!("{} {}", method, url);
        let request = if method.eq_ignore_ascii_case("GET") {
            self.client.get(url)
        } else {
            self.client.post(url).json(&body.cloned().unwrap_or(Value::Null))
        };

        let response = request.send().map_err(|e| {
            S2MosaicError::CatalogUnavailable(format!("request to {} failed: {}", url, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(S2MosaicError::CatalogUnavailable(format!(
                "HTTP {} from {}: {}",
                status.as_u16(),
                url,
                text
            )));
        }

        response.json::<ItemPage>().map_err(|e| {
            S2MosaicError::CatalogUnavailable(format!("malformed search response: {}", e))
        })
    }
}

impl Catalog for StacClient {
    fn search(&self, request: &SearchRequest) -> Result<Vec<CatalogItem>> {
        let mut items = Vec::new();
        let mut url = self.search_url.clone();
        let mut method = "POST".to_string();
        let mut body = Some(request.to_json());

        for page_number in 1..=self.max_pages {
            let page = self.fetch_page(&url, &method, body.as_ref())?;

            if page_number == 1 {
                let matched = page
                    .number_matched
                    .or_else(|| page.context.as_ref().and_then(|c| c.matched));
                if let Some(matched) = matched {
                    info!("{} Items matched", matched);
                }
            }

            for feature in page.features {
                items.push(CatalogItem::from_stac(feature).map_err(|e| {
                    S2MosaicError::CatalogUnavailable(format!("malformed item: {}", e))
                })?);
            }

            let Some(next) = page.links.into_iter().find(|link| link.rel == "next") else {
                return Ok(items);
            };

            method = next.method.unwrap_or_else(|| "GET".to_string());
            body = next_body(next.body, next.merge, body);
            url = next.href;
        }

        warn!(
            "Stopped paging after {} pages; {} items collected",
            self.max_pages,
            items.len()
        );
        Ok(items)
    }
}

impl TileInfoSource for StacClient {
    fn tile_info(&self, item: &CatalogItem) -> Result<TileInfo> {
        let asset = item
            .asset("info")
            .ok_or_else(|| S2MosaicError::georeferencing(&item.id, "item has no info asset"))?;
        let url = http_url(&asset.href);
        debug!("Fetching tile info: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                S2MosaicError::georeferencing(&item.id, format!("tile info request failed: {}", e))
            })?;

        let text = response.text().map_err(|e| {
            S2MosaicError::georeferencing(&item.id, format!("tile info unreadable: {}", e))
        })?;
        TileInfo::from_json(&item.id, &text)
    }
}

/// Body for the request following a `next` link.
///
/// A `merge` link overlays its body on the previous one; any other link body
/// replaces it, and a link without a body reuses the previous request body.
fn next_body(link_body: Option<Value>, merge: bool, previous: Option<Value>) -> Option<Value> {
    match (link_body, merge, previous) {
        (Some(Value::Object(extra)), true, Some(Value::Object(mut base))) => {
            base.extend(extra);
            Some(Value::Object(base))
        }
        (Some(link_body), _, _) => Some(link_body),
        (None, _, previous) => previous,
    }
}

/// Rewrite `s3://bucket/key` to the bucket's public HTTPS address.
pub fn http_url(href: &str) -> String {
    match href.strip_prefix("s3://") {
        Some(rest) => match rest.split_once('/') {
            Some((bucket, key)) => format!("https://{}.s3.amazonaws.com/{}", bucket, key),
            None => format!("https://{}.s3.amazonaws.com/", rest),
        },
        None => href.to_string(),
    }
}
