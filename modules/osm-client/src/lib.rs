pub mod error;

pub use error::{OsmError, Result};

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

/// A map element with its tags and a representative point.
#[derive(Debug, Clone, PartialEq)]
pub struct OsmElement {
    /// `type/id`, e.g. `way/123456`. Unique across element types.
    pub id: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub tags: BTreeMap<String, String>,
}

fn build_http(user_agent: &str, timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
        .map_err(OsmError::from)
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(OsmError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(resp)
}

// --- Overpass ---

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    kind: String,
    id: i64,
    lat: Option<f64>,
    lon: Option<f64>,
    center: Option<LatLon>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct LatLon {
    lat: f64,
    lon: f64,
}

impl From<OverpassElement> for OsmElement {
    fn from(e: OverpassElement) -> Self {
        let (lat, lon) = match (e.lat, e.lon, e.center) {
            (Some(lat), Some(lon), _) => (Some(lat), Some(lon)),
            (_, _, Some(c)) => (Some(c.lat), Some(c.lon)),
            _ => (None, None),
        };
        Self {
            id: format!("{}/{}", e.kind, e.id),
            lat,
            lon,
            tags: e.tags,
        }
    }
}

/// Client for an Overpass API `interpreter` endpoint.
pub struct OverpassClient {
    client: reqwest::Client,
    base_url: String,
}

impl OverpassClient {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_http(user_agent, timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// All nodes, ways and relations within `radius_m` of the point that
    /// carry at least one of `keys`. Ways and relations report their centre.
    pub async fn around(
        &self,
        lat: f64,
        lon: f64,
        radius_m: f64,
        keys: &[&str],
    ) -> Result<Vec<OsmElement>> {
        let query = around_query(lat, lon, radius_m, keys);
        debug!(lat, lon, radius_m, "Overpass around query");

        let resp = self
            .client
            .post(format!("{}/interpreter", self.base_url))
            .form(&[("data", query.as_str())])
            .send()
            .await?;
        let body: OverpassResponse = check_status(resp).await?.json().await?;

        Ok(body.elements.into_iter().map(OsmElement::from).collect())
    }
}

/// Overpass QL union of one `nwr(around:...)[key]` clause per key.
pub fn around_query(lat: f64, lon: f64, radius_m: f64, keys: &[&str]) -> String {
    let mut q = String::from("[out:json][timeout:25];\n(\n");
    for key in keys {
        q.push_str(&format!("  nwr(around:{radius_m:.0},{lat},{lon})[\"{key}\"];\n"));
    }
    q.push_str(");\nout center tags;\n");
    q
}

// --- Nominatim ---

/// `address` keys from most to least specific.
const ADDRESS_ORDER: &[&str] = &[
    "amenity",
    "building",
    "office",
    "school",
    "college",
    "university",
    "hospital",
    "neighbourhood",
    "suburb",
    "city_district",
    "city",
    "town",
    "village",
    "county",
    "state",
];

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    address: BTreeMap<String, String>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for a Nominatim `reverse` endpoint.
pub struct NominatimClient {
    client: reqwest::Client,
    base_url: String,
}

impl NominatimClient {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_http(user_agent, timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Place names containing the point, most specific first. An
    /// ungeocodable point yields an empty list rather than an error.
    pub async fn reverse(&self, lat: f64, lon: f64) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(format!("{}/reverse", self.base_url))
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("zoom", "18".to_string()),
                ("addressdetails", "1".to_string()),
            ])
            .send()
            .await?;
        let body: ReverseResponse = check_status(resp).await?.json().await?;

        if let Some(err) = body.error {
            debug!(lat, lon, error = err.as_str(), "Nominatim could not geocode point");
            return Ok(Vec::new());
        }
        Ok(ordered_place_names(body.name.as_deref(), &body.address))
    }
}

fn ordered_place_names(name: Option<&str>, address: &BTreeMap<String, String>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let candidates = name
        .into_iter()
        .chain(ADDRESS_ORDER.iter().filter_map(|k| address.get(*k).map(String::as_str)));
    for n in candidates {
        let n = n.trim();
        if !n.is_empty() && !names.iter().any(|seen| seen.eq_ignore_ascii_case(n)) {
            names.push(n.to_string());
        }
    }
    names
}
