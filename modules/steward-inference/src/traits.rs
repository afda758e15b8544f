// Trait seams for the collaborators the inference core consumes.
//
// SpatialQuery: read-only feature search around a point (Overpass in production).
// PlaceNames: reverse lookup of containing place names (Nominatim in production).
// PageFetcher: fetch one public page and hand back text, links and mailto targets.
//
// The pipeline only sees these traits, so tests drive it with the mocks in
// `testing` and never touch the network.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use steward_common::{Coordinate, RawFeature};

#[async_trait]
pub trait SpatialQuery: Send + Sync {
    /// Features within `radius_m` of `at` carrying at least one of `type_keys`.
    async fn features_near(
        &self,
        at: Coordinate,
        radius_m: f64,
        type_keys: &[&str],
    ) -> Result<Vec<RawFeature>>;
}

#[async_trait]
pub trait PlaceNames: Send + Sync {
    /// Names of the places containing `at`, most specific first.
    async fn place_names(&self, at: Coordinate) -> Result<Vec<String>>;
}

/// A fetched page reduced to what email extraction needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    /// Readable text of the page.
    pub text: String,
    /// Raw `mailto:` targets, scheme stripped.
    pub mailtos: Vec<String>,
    /// Absolute http(s) links found on the page.
    pub links: Vec<String>,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch one page. Non-2xx responses are errors.
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Production implementations for the OSM clients
// ---------------------------------------------------------------------------

#[async_trait]
impl SpatialQuery for osm_client::OverpassClient {
    async fn features_near(
        &self,
        at: Coordinate,
        radius_m: f64,
        type_keys: &[&str],
    ) -> Result<Vec<RawFeature>> {
        let elements = self.around(at.lat, at.lng, radius_m, type_keys).await?;
        Ok(elements
            .into_iter()
            .map(|e| RawFeature {
                id: e.id,
                centroid: match (e.lat, e.lon) {
                    (Some(lat), Some(lng)) => Some(Coordinate::new(lat, lng)),
                    _ => None,
                },
                tags: e.tags,
            })
            .collect())
    }
}

#[async_trait]
impl PlaceNames for osm_client::NominatimClient {
    async fn place_names(&self, at: Coordinate) -> Result<Vec<String>> {
        Ok(self.reverse(at.lat, at.lng).await?)
    }
}
