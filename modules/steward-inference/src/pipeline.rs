//! The public entry point: coordinate + report text → ranked contacts.
//!
//! resolve → direct tags (tier 0) → linked sites (tier 1) → hierarchy walk
//! (tiers 1-3) → dedupe/rank → quality gate → truncate.
//!
//! Component failures never abort a call; they leave fewer or lower-tier
//! candidates. The call ends `NoCandidates` only when nothing survives.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use typed_builder::TypedBuilder;

use steward_common::{Candidate, Config, Coordinate, RankedResult, StewardError, Tier};

use crate::cache::{CacheBackend, EvidenceCache};
use crate::deadline::Deadline;
use crate::domain::DomainDeriver;
use crate::hierarchy::{build_levels, fallback_levels, HierarchyWalker};
use crate::quality::{GateStats, QualityGate};
use crate::ranking::{dedupe_and_rank, truncate};
use crate::rate_gate::RateGate;
use crate::resolver::{FeatureResolver, ResolverSettings};
use crate::roles::RoleHeuristics;
use crate::scraper::{site_url, SiteScraper};
use crate::tags;
use crate::traits::{PageFetcher, PlaceNames, SpatialQuery};

/// Slack past the call deadline before the backstop cancels the whole call.
/// Every collaborator call is already bounded by the deadline, so the
/// backstop only fires if something ignores it.
const BACKSTOP_GRACE: Duration = Duration::from_secs(1);

/// Long-lived collaborators and settings for a [`Steward`].
#[derive(Clone, TypedBuilder)]
pub struct StewardDeps {
    pub spatial: Arc<dyn SpatialQuery>,
    pub places: Arc<dyn PlaceNames>,
    pub fetcher: Arc<dyn PageFetcher>,
    #[builder(default)]
    pub cache_backend: Option<Arc<dyn CacheBackend>>,
    #[builder(default)]
    pub config: Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceStatus {
    Found,
    NoCandidates,
    Disabled,
    TimedOut,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMode {
    /// Map features resolved; the hierarchy starts at the top feature.
    Features,
    /// No feature; place names alone seeded the hierarchy.
    Fallback,
    #[default]
    Unresolved,
}

/// Why the result looks the way it does.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub resolution: ResolutionMode,
    pub features_considered: usize,
    pub levels_walked: usize,
    pub scrape_failures: usize,
    /// Before dedupe, duplicates included.
    pub candidates_generated: usize,
    pub rejected: GateStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceOutcome {
    pub status: InferenceStatus,
    pub result: RankedResult,
    pub diagnostics: Diagnostics,
}

impl InferenceOutcome {
    fn empty(status: InferenceStatus, diagnostics: Diagnostics) -> Self {
        Self {
            status,
            result: RankedResult::default(),
            diagnostics,
        }
    }

    /// `(RankedResult, error)` view. An empty disabled result is not an error.
    pub fn into_result(self) -> Result<RankedResult, StewardError> {
        match self.status {
            InferenceStatus::Found | InferenceStatus::Disabled => Ok(self.result),
            InferenceStatus::NoCandidates | InferenceStatus::TimedOut => Err(StewardError::NoCandidates),
        }
    }
}

pub struct Steward {
    config: Config,
    cache: Arc<EvidenceCache>,
    resolver: FeatureResolver,
    scraper: Arc<SiteScraper>,
    walker: HierarchyWalker,
    gate: QualityGate,
}

impl Steward {
    /// Compiles the rule tables; an invalid rule is a startup error.
    pub fn new(deps: StewardDeps) -> Result<Self, StewardError> {
        let config = deps.config;
        config.validate()?;

        let mut cache = EvidenceCache::new(config.cache_ttl, config.cache_max_entries);
        if let Some(backend) = deps.cache_backend {
            cache = cache.with_backend(backend);
        }
        let cache = Arc::new(cache);
        let map_gate = Arc::new(RateGate::new("map", config.map_interval));
        let web_gate = Arc::new(RateGate::new("web", config.web_interval));

        let resolver = FeatureResolver::new(
            deps.spatial,
            deps.places,
            cache.clone(),
            map_gate,
            ResolverSettings {
                radius_m: config.search_radius_m,
                name_weight: config.name_weight,
                distance_weight: config.distance_weight,
                bucket_precision: config.bucket_precision,
                op_timeout: config.op_timeout,
            },
        );
        let scraper = Arc::new(SiteScraper::new(
            deps.fetcher,
            cache.clone(),
            web_gate,
            config.op_timeout,
        ));
        let walker = HierarchyWalker::new(
            Arc::new(DomainDeriver::new(&config.rules.domain_rules)?),
            Arc::new(RoleHeuristics::new(&config.rules)),
            scraper.clone(),
            config.scrape_concurrency,
        );
        let gate = QualityGate::new(&config.rules)?;

        Ok(Self {
            config,
            cache,
            resolver,
            scraper,
            walker,
            gate,
        })
    }

    /// Shared across every call on this instance.
    pub fn cache(&self) -> &Arc<EvidenceCache> {
        &self.cache
    }

    /// Infer up to `max_results` contacts (config default when `None` or 0)
    /// for a report at `at`. Never panics or errors on bad upstream data.
    pub async fn infer(&self, at: Coordinate, report: &str, max_results: Option<usize>) -> InferenceOutcome {
        if !self.config.enabled {
            info!("Inference disabled, skipping");
            return InferenceOutcome::empty(InferenceStatus::Disabled, Diagnostics::default());
        }
        if !at.is_valid() {
            warn!(lat = at.lat, lng = at.lng, "Invalid coordinate");
            return InferenceOutcome::empty(InferenceStatus::NoCandidates, Diagnostics::default());
        }

        let max_results = max_results
            .filter(|n| *n > 0)
            .unwrap_or(self.config.max_results);
        let deadline = Deadline::after(self.config.call_timeout);
        let span = info_span!("infer", lat = at.lat, lng = at.lng);

        let run = self.run(at, report, max_results, deadline).instrument(span);
        match tokio::time::timeout_at(deadline.at() + BACKSTOP_GRACE, run).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(lat = at.lat, lng = at.lng, "Inference call timed out");
                InferenceOutcome::empty(InferenceStatus::TimedOut, Diagnostics::default())
            }
        }
    }

    async fn run(&self, at: Coordinate, report: &str, max_results: usize, deadline: Deadline) -> InferenceOutcome {
        let mut diag = Diagnostics::default();
        let mut candidates: Vec<Candidate> = Vec::new();

        let (resolved, place_names) = tokio::join!(
            self.resolver.resolve(at, report, deadline),
            self.resolver.place_names(at, deadline),
        );

        let levels = match resolved {
            Ok(features) => {
                diag.resolution = ResolutionMode::Features;
                diag.features_considered = features.len();
                let top = &features[0];
                let evidence = tags::extract(top);
                candidates.extend(evidence.candidates);

                let levels = build_levels(&features, &place_names, self.config.max_levels);

                // Level websites are scraped by the walker.
                let level_sites: HashSet<String> = levels
                    .iter()
                    .filter_map(|l| l.website.as_deref().and_then(site_url))
                    .collect();
                let mut linked_sites = HashSet::new();
                let linked: Vec<String> = evidence
                    .urls
                    .into_iter()
                    .filter(|u| site_url(u).is_some_and(|s| !level_sites.contains(&s) && linked_sites.insert(s)))
                    .collect();

                let scraped: Vec<_> = stream::iter(linked.iter().map(|url| async move {
                    (url, self.scraper.scrape(url, deadline).await)
                }))
                .buffered(self.config.scrape_concurrency.max(1))
                .collect()
                .await;
                for (url, outcome) in scraped {
                    if outcome.failed {
                        diag.scrape_failures += 1;
                    }
                    candidates.extend(outcome.emails.iter().filter_map(|addr| {
                        Candidate::new(
                            addr,
                            Tier::WebsiteScrape,
                            0,
                            format!("found on {url} (linked from {})", top.id),
                        )
                    }));
                }
                levels
            }
            Err(e) => {
                let levels = fallback_levels(&place_names, self.config.max_levels);
                if levels.is_empty() {
                    warn!(lat = at.lat, lng = at.lng, error = %e, "No feature and no place names");
                    return InferenceOutcome::empty(InferenceStatus::NoCandidates, diag);
                }
                info!(lat = at.lat, lng = at.lng, error = %e, "Falling back to place-name hierarchy");
                diag.resolution = ResolutionMode::Fallback;
                levels
            }
        };

        let walk = self.walker.walk(levels, deadline).await;
        diag.levels_walked = walk.levels_walked;
        diag.scrape_failures += walk.scrape_failures;
        candidates.extend(walk.candidates);
        diag.candidates_generated = candidates.len();

        let (kept, rejected) = self.gate.filter(dedupe_and_rank(candidates));
        diag.rejected = rejected;
        let result = truncate(kept, max_results);

        let status = if result.is_empty() {
            InferenceStatus::NoCandidates
        } else {
            InferenceStatus::Found
        };
        info!(
            status = ?status,
            returned = result.len(),
            generated = diag.candidates_generated,
            rejected = diag.rejected.total(),
            "Inference complete"
        );
        InferenceOutcome {
            status,
            result,
            diagnostics: diag,
        }
    }
}
