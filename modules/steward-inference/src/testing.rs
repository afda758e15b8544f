// Test mocks for the inference pipeline.
//
// One mock per trait boundary, builder-style, counting calls:
// - MockSpatial (SpatialQuery): fixed features, a failure, or a stall
// - MockPlaces (PlaceNames): fixed place names or a failure
// - MockFetcher (PageFetcher): HashMap-based URL→page, Err for unregistered URLs
// - RecordingNotifier (Notifier): records recipients, fails on request
//
// Plus helpers for raw features, pages and a fast test configuration.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use steward_common::{Candidate, Config, Coordinate, RawFeature};

use crate::notify::{Notifier, ReportContext};
use crate::pipeline::{Steward, StewardDeps};
use crate::traits::{FetchedPage, PageFetcher, PlaceNames, SpatialQuery};

// ---------------------------------------------------------------------------
// Test constants
// ---------------------------------------------------------------------------

/// UCLA School of Law, Los Angeles.
pub const UCLA_LAW: (f64, f64) = (34.0726, -118.4381);
/// Santa Monica Pier.
pub const SANTA_MONICA: (f64, f64) = (34.0092, -118.4976);

// ---------------------------------------------------------------------------
// MockSpatial
// ---------------------------------------------------------------------------

enum SpatialBehavior {
    Features(Vec<RawFeature>),
    Fail(String),
    Stall,
}

pub struct MockSpatial {
    behavior: SpatialBehavior,
    latency: Duration,
    calls: AtomicUsize,
}

impl MockSpatial {
    /// Answers every query with no features.
    pub fn new() -> Self {
        Self {
            behavior: SpatialBehavior::Features(Vec::new()),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep before answering, so overlapping calls actually overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_features(mut self, features: Vec<RawFeature>) -> Self {
        self.behavior = SpatialBehavior::Features(features);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.behavior = SpatialBehavior::Fail(message.to_string());
        self
    }

    /// Never answers; only a timeout gets the caller out.
    pub fn stalled(mut self) -> Self {
        self.behavior = SpatialBehavior::Stall;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockSpatial {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpatialQuery for MockSpatial {
    async fn features_near(
        &self,
        _at: Coordinate,
        _radius_m: f64,
        _type_keys: &[&str],
    ) -> Result<Vec<RawFeature>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match &self.behavior {
            SpatialBehavior::Features(features) => Ok(features.clone()),
            SpatialBehavior::Fail(message) => bail!("{message}"),
            SpatialBehavior::Stall => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// MockPlaces
// ---------------------------------------------------------------------------

pub struct MockPlaces {
    names: Vec<String>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockPlaces {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|s| s.to_string()).collect(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(&[])
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaceNames for MockPlaces {
    async fn place_names(&self, _at: Coordinate) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("reverse lookup unavailable");
        }
        Ok(self.names.clone())
    }
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// HashMap-based page fetcher. Returns `Err` for unregistered URLs.
/// URLs match with any trailing `/` ignored.
pub struct MockFetcher {
    pages: HashMap<String, FetchedPage>,
    latency: Duration,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before answering, so overlapping fetches actually overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn on_page(mut self, url: &str, page: FetchedPage) -> Self {
        self.pages.insert(url_key(url), page);
        self
    }

    /// Every URL fetched, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

fn url_key(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        self.calls.lock().unwrap().push(url.to_string());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.pages.get(&url_key(url)) {
            Some(page) => Ok(page.clone()),
            None => bail!("MockFetcher: no page registered for {url}"),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

pub struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
    fail_for: HashSet<String>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_for: HashSet::new(),
        }
    }

    pub fn failing_for(mut self, address: &str) -> Self {
        self.fail_for.insert(address.to_string());
        self
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, recipient: &Candidate, _report: &ReportContext) -> Result<()> {
        if self.fail_for.contains(&recipient.address) {
            bail!("mailbox unavailable");
        }
        self.sent.lock().unwrap().push(recipient.address.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Feature with no centroid (scored at the edge of the search radius).
pub fn raw_feature(id: &str, tags: &[(&str, &str)]) -> RawFeature {
    RawFeature {
        id: id.to_string(),
        centroid: None,
        tags: tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
    }
}

pub fn raw_feature_at(id: &str, at: (f64, f64), tags: &[(&str, &str)]) -> RawFeature {
    RawFeature {
        centroid: Some(Coordinate::new(at.0, at.1)),
        ..raw_feature(id, tags)
    }
}

pub fn page(url: &str, text: &str, mailtos: &[&str], links: &[&str]) -> FetchedPage {
    FetchedPage {
        url: url.to_string(),
        text: text.to_string(),
        mailtos: mailtos.iter().map(|s| s.to_string()).collect(),
        links: links.iter().map(|s| s.to_string()).collect(),
    }
}

/// Defaults with the politeness gates off so tests run without waiting.
pub fn test_config() -> Config {
    Config {
        map_interval: Duration::ZERO,
        web_interval: Duration::ZERO,
        ..Config::default()
    }
}

pub fn coordinate(at: (f64, f64)) -> Coordinate {
    Coordinate::new(at.0, at.1)
}

/// Steward over the given mocks with [`test_config`].
pub fn test_steward(
    spatial: Arc<MockSpatial>,
    places: Arc<MockPlaces>,
    fetcher: Arc<MockFetcher>,
) -> Steward {
    test_steward_with(spatial, places, fetcher, test_config())
}

pub fn test_steward_with(
    spatial: Arc<MockSpatial>,
    places: Arc<MockPlaces>,
    fetcher: Arc<MockFetcher>,
    config: Config,
) -> Steward {
    Steward::new(
        StewardDeps::builder()
            .spatial(spatial)
            .places(places)
            .fetcher(fetcher)
            .config(config)
            .build(),
    )
    .expect("test steward")
}
