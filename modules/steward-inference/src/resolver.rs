//! Coordinate + report text → ranked map features.
//!
//! Raw spatial answers are cached per coordinate bucket; scoring against the
//! report text happens on every call, so two reports at the same spot share
//! the spatial query but rank features by their own wording.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use steward_common::{Coordinate, Feature, RawFeature, StewardError, FEATURE_TYPE_KEYS};

use crate::cache::{CacheKey, Evidence, EvidenceCache};
use crate::deadline::Deadline;
use crate::rate_gate::RateGate;
use crate::traits::{PlaceNames, SpatialQuery};

/// Words too common in feature names to count as overlap.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "near", "building", "center", "centre", "hall",
];

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub radius_m: f64,
    pub name_weight: f64,
    pub distance_weight: f64,
    pub bucket_precision: u32,
    pub op_timeout: Duration,
}

pub struct FeatureResolver {
    spatial: Arc<dyn SpatialQuery>,
    places: Arc<dyn PlaceNames>,
    cache: Arc<EvidenceCache>,
    gate: Arc<RateGate>,
    settings: ResolverSettings,
}

impl FeatureResolver {
    pub fn new(
        spatial: Arc<dyn SpatialQuery>,
        places: Arc<dyn PlaceNames>,
        cache: Arc<EvidenceCache>,
        gate: Arc<RateGate>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            spatial,
            places,
            cache,
            gate,
            settings,
        }
    }

    /// Features near `at`, most relevant first. Timeouts, collaborator errors
    /// and an empty answer all surface as `ResolutionEmpty`.
    pub async fn resolve(
        &self,
        at: Coordinate,
        report: &str,
        deadline: Deadline,
    ) -> Result<Vec<Feature>, StewardError> {
        let key = CacheKey::features(at, self.settings.bucket_precision);
        let raw = match self.cached_features(&key).await {
            Some(raw) => raw,
            None => {
                let Ok(_claim) = tokio::time::timeout_at(deadline.at(), self.cache.claim(&key)).await else {
                    warn!(lat = at.lat, lng = at.lng, "Spatial query timed out");
                    return Err(StewardError::ResolutionEmpty);
                };
                self.fetch_features(at, &key, deadline).await?
            }
        };

        let features = rank_features(raw, at, report, &self.settings);
        if features.is_empty() {
            return Err(StewardError::ResolutionEmpty);
        }
        info!(
            lat = at.lat,
            lng = at.lng,
            count = features.len(),
            top = features[0].display_name().unwrap_or_default(),
            "Features resolved"
        );
        Ok(features)
    }

    /// Containing place names, most specific first. Failures yield an empty list.
    pub async fn place_names(&self, at: Coordinate, deadline: Deadline) -> Vec<String> {
        let key = CacheKey::places(at, self.settings.bucket_precision);
        if let Some(Evidence::PlaceNames(names)) = self.cache.get(&key).await {
            return names;
        }
        let Ok(_claim) = tokio::time::timeout_at(deadline.at(), self.cache.claim(&key)).await else {
            warn!(lat = at.lat, lng = at.lng, "Place name lookup timed out");
            return Vec::new();
        };
        if let Some(Evidence::PlaceNames(names)) = self.cache.get(&key).await {
            return names;
        }

        let attempt = deadline
            .bound(self.settings.op_timeout, async {
                self.gate.acquire().await;
                self.places.place_names(at).await
            })
            .await;
        match attempt {
            Ok(Ok(names)) => {
                self.cache.insert(key, Evidence::PlaceNames(names.clone())).await;
                names
            }
            Ok(Err(e)) => {
                warn!(lat = at.lat, lng = at.lng, error = %e, "Place name lookup failed");
                Vec::new()
            }
            Err(_) => {
                warn!(lat = at.lat, lng = at.lng, "Place name lookup timed out");
                Vec::new()
            }
        }
    }

    async fn cached_features(&self, key: &CacheKey) -> Option<Vec<RawFeature>> {
        match self.cache.get(key).await {
            Some(Evidence::Features(raw)) => {
                debug!(bucket = key.bucket.as_str(), "Features served from cache");
                Some(raw)
            }
            _ => None,
        }
    }

    /// Spatial query under a held claim on `key`.
    async fn fetch_features(
        &self,
        at: Coordinate,
        key: &CacheKey,
        deadline: Deadline,
    ) -> Result<Vec<RawFeature>, StewardError> {
        if let Some(raw) = self.cached_features(key).await {
            return Ok(raw);
        }
        let attempt = deadline
            .bound(self.settings.op_timeout, async {
                self.gate.acquire().await;
                self.spatial
                    .features_near(at, self.settings.radius_m, FEATURE_TYPE_KEYS)
                    .await
            })
            .await;
        match attempt {
            Ok(Ok(raw)) => {
                self.cache.insert(key.clone(), Evidence::Features(raw.clone())).await;
                Ok(raw)
            }
            Ok(Err(e)) => {
                warn!(lat = at.lat, lng = at.lng, error = %e, "Spatial query failed");
                Err(StewardError::ResolutionEmpty)
            }
            Err(_) => {
                warn!(lat = at.lat, lng = at.lng, "Spatial query timed out");
                Err(StewardError::ResolutionEmpty)
            }
        }
    }
}

/// Score, filter and order raw features.
///
/// `score = name_weight * overlap + distance_weight / (1 + metres)`. Features
/// without a name or operator, or without an allowed type tag, are dropped.
/// Duplicate ids keep their first record. Ties go to the nearer feature, then
/// the lexically smaller name, then the id.
pub fn rank_features(
    raw: Vec<RawFeature>,
    at: Coordinate,
    report: &str,
    settings: &ResolverSettings,
) -> Vec<Feature> {
    let report_tokens: HashSet<String> = tokens(report).collect();
    let mut seen = HashSet::new();

    let mut features: Vec<Feature> = raw
        .into_iter()
        .filter(|r| seen.insert(r.id.clone()))
        .filter_map(|r| {
            let distance_m = r
                .centroid
                .map(|c| at.distance_m(&c))
                .unwrap_or(settings.radius_m);
            let mut feature = Feature {
                id: r.id,
                tags: r.tags,
                centroid: r.centroid,
                distance_m,
                text_overlap: 0.0,
                score: 0.0,
            };
            if feature.display_name().is_none() || feature.feature_type().is_none() {
                return None;
            }
            feature.text_overlap = text_overlap(feature.display_name().unwrap_or_default(), &report_tokens);
            feature.score = settings.name_weight * feature.text_overlap
                + settings.distance_weight / (1.0 + feature.distance_m);
            Some(feature)
        })
        .collect();

    features.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.distance_m.total_cmp(&b.distance_m))
            .then_with(|| a.display_name().cmp(&b.display_name()))
            .then_with(|| a.id.cmp(&b.id))
    });
    features
}

/// Share of the name's significant tokens present in the report, in `[0, 1]`.
pub fn text_overlap(name: &str, report_tokens: &HashSet<String>) -> f64 {
    let name_tokens: HashSet<String> = tokens(name).collect();
    if name_tokens.is_empty() {
        return 0.0;
    }
    let hits = name_tokens.iter().filter(|t| report_tokens.contains(*t)).count();
    hits as f64 / name_tokens.len() as f64
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
}

/// Nearest campus-type feature other than `except`.
pub fn nearest_campus<'a>(features: &'a [Feature], except: &str) -> Option<&'a Feature> {
    features
        .iter()
        .filter(|f| f.id != except && f.is_campus())
        .min_by(|a, b| {
            a.distance_m
                .partial_cmp(&b.distance_m)
                .unwrap_or(Ordering::Equal)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::testing::{MockPlaces, MockSpatial};

    fn settings() -> ResolverSettings {
        ResolverSettings {
            radius_m: 200.0,
            name_weight: 1.0,
            distance_weight: 5.0,
            bucket_precision: 5,
            op_timeout: Duration::from_secs(1),
        }
    }

    fn raw(id: &str, at: Option<(f64, f64)>, tags: &[(&str, &str)]) -> RawFeature {
        RawFeature {
            id: id.into(),
            centroid: at.map(|(lat, lng)| Coordinate::new(lat, lng)),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    const HERE: (f64, f64) = (34.0727, -118.4380);

    #[test]
    fn report_wording_outranks_slightly_nearer_features() {
        let at = Coordinate::new(HERE.0, HERE.1);
        let ranked = rank_features(
            vec![
                raw("way/1", Some((34.0728, -118.4380)), &[("name", "Parking Structure 3"), ("amenity", "parking")]),
                raw("way/2", Some((34.0730, -118.4380)), &[("name", "UCLA School of Law"), ("building", "university")]),
            ],
            at,
            "Overflowing bin by the law school entrance",
            &settings(),
        );
        assert_eq!(ranked[0].id, "way/2");
        assert!((ranked[0].text_overlap - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(ranked[1].text_overlap, 0.0);
    }

    #[test]
    fn unnamed_or_untyped_features_are_excluded() {
        let at = Coordinate::new(HERE.0, HERE.1);
        let ranked = rank_features(
            vec![
                raw("node/1", Some(HERE), &[("amenity", "bench")]),
                raw("node/2", Some(HERE), &[("name", "Somewhere")]),
                raw("node/3", Some(HERE), &[("operator", "City of Santa Monica"), ("amenity", "waste_basket")]),
                raw("node/3", Some(HERE), &[("name", "Duplicate"), ("amenity", "bench")]),
            ],
            at,
            "",
            &settings(),
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, "node/3");
        assert_eq!(ranked[0].display_name(), Some("City of Santa Monica"));
    }

    #[test]
    fn ties_break_on_distance_then_name() {
        let at = Coordinate::new(HERE.0, HERE.1);
        let ranked = rank_features(
            vec![
                raw("way/9", None, &[("name", "Beta"), ("office", "government")]),
                raw("way/8", None, &[("name", "Alpha"), ("office", "government")]),
                raw("way/7", Some(HERE), &[("name", "Gamma"), ("office", "government")]),
            ],
            at,
            "",
            &settings(),
        );
        let ids: Vec<&str> = ranked.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["way/7", "way/8", "way/9"]);
        assert_eq!(ranked[1].distance_m, 200.0);
    }

    #[test]
    fn overlap_ignores_short_and_common_words() {
        let report: HashSet<String> = tokens("the hall of the science building").collect();
        assert_eq!(text_overlap("Science Hall", &report), 1.0);
        assert_eq!(text_overlap("The Hall", &report), 0.0);
    }

    #[test]
    fn nearest_campus_skips_the_feature_itself() {
        let at = Coordinate::new(HERE.0, HERE.1);
        let ranked = rank_features(
            vec![
                raw("way/1", Some(HERE), &[("name", "Royce Hall"), ("amenity", "university")]),
                raw("rel/2", Some((34.0700, -118.4400)), &[("name", "UCLA"), ("amenity", "university")]),
                raw("rel/3", Some((34.0800, -118.4500)), &[("name", "Far College"), ("amenity", "college")]),
            ],
            at,
            "",
            &settings(),
        );
        assert_eq!(nearest_campus(&ranked, "way/1").map(|f| f.id.as_str()), Some("rel/2"));
    }

    fn resolver(spatial: Arc<MockSpatial>, places: Arc<MockPlaces>) -> FeatureResolver {
        FeatureResolver::new(
            spatial,
            places,
            Arc::new(EvidenceCache::new(Duration::from_secs(600), 100)),
            Arc::new(RateGate::new("map", Duration::ZERO)),
            settings(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_resolves_share_one_spatial_query() {
        let spatial = Arc::new(
            MockSpatial::new()
                .with_latency(Duration::from_millis(50))
                .with_features(vec![raw("way/2", Some(HERE), &[("name", "UCLA School of Law"), ("building", "university")])]),
        );
        let r = resolver(spatial.clone(), Arc::new(MockPlaces::new(&[])));
        let at = Coordinate::new(HERE.0, HERE.1);
        let deadline = Deadline::after(Duration::from_secs(30));

        let (a, b) = tokio::join!(
            r.resolve(at, "Leak", deadline),
            r.resolve(at, "Different wording", deadline),
        );
        assert_eq!(a.unwrap()[0].id, "way/2");
        assert_eq!(b.unwrap()[0].id, "way/2");
        assert_eq!(spatial.calls(), 1);
    }

    #[tokio::test]
    async fn place_names_are_looked_up_once_per_bucket() {
        let places = Arc::new(MockPlaces::new(&["Westwood", "Los Angeles"]));
        let r = resolver(Arc::new(MockSpatial::new()), places.clone());
        let deadline = Deadline::after(Duration::from_secs(30));

        let first = r.place_names(Coordinate::new(HERE.0, HERE.1), deadline).await;
        let nearby = r.place_names(Coordinate::new(34.072701, -118.438001), deadline).await;
        assert_eq!(first, vec!["Westwood", "Los Angeles"]);
        assert_eq!(nearby, first);
        assert_eq!(places.calls(), 1);

        r.place_names(Coordinate::new(34.0092, -118.4976), deadline).await;
        assert_eq!(places.calls(), 2);
    }

    #[tokio::test]
    async fn failed_place_lookup_is_empty_and_retried_later() {
        let places = Arc::new(MockPlaces::failing());
        let r = resolver(Arc::new(MockSpatial::new()), places.clone());
        let at = Coordinate::new(HERE.0, HERE.1);
        let deadline = Deadline::after(Duration::from_secs(30));

        assert!(r.place_names(at, deadline).await.is_empty());
        assert!(r.place_names(at, deadline).await.is_empty());
        assert_eq!(places.calls(), 2);
    }
}
