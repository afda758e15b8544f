//! Ownership chain construction and the per-level heuristic walk.

use std::collections::HashSet;
use std::pin::pin;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info};

use steward_common::{Candidate, Feature, HierarchyLevel, LevelKind, Tier};

use crate::deadline::Deadline;
use crate::domain::DomainDeriver;
use crate::resolver::nearest_campus;
use crate::roles::RoleHeuristics;
use crate::scraper::{site_url, SiteScraper};

/// Consecutive levels with no new address before the walk gives up.
pub const MAX_EMPTY_STREAK: usize = 3;

/// Levels for the top-ranked feature: the feature, its campus, its operator.
/// Place names only fill a campus or operator rung the features leave empty.
/// Names repeat at most once (case-insensitive), which also breaks
/// operator-of-operator cycles.
pub fn build_levels(features: &[Feature], place_names: &[String], max_levels: usize) -> Vec<HierarchyLevel> {
    let Some(top) = features.first() else {
        return fallback_levels(place_names, max_levels);
    };
    let Some(top_name) = top.display_name() else {
        return fallback_levels(place_names, max_levels);
    };
    let mut chain = Chain::new(max_levels, 0);
    let mut places = place_names.iter();
    chain.push(LevelKind::Feature, top_name, top.website(), top.subdivision());

    let campus = nearest_campus(features, &top.id);
    match campus.and_then(|c| c.display_name().map(|name| (c, name))) {
        Some((c, name)) => chain.push(LevelKind::Campus, name, c.website(), c.subdivision()),
        None => chain.fill_from(LevelKind::Campus, &mut places),
    }

    let operator = top
        .operator()
        .map(|name| (name, top.operator_website()))
        .or_else(|| campus.and_then(|c| c.operator().map(|name| (name, c.operator_website()))));
    match operator {
        Some((name, website)) => chain.push(LevelKind::Operator, name, website, None),
        None => chain.fill_from(LevelKind::Place, &mut places),
    }
    chain.levels
}

/// Hierarchy when no feature resolved: place names only, numbered from 1 so
/// every heuristic they produce is a parent-level guess.
pub fn fallback_levels(place_names: &[String], max_levels: usize) -> Vec<HierarchyLevel> {
    let mut chain = Chain::new(max_levels, 1);
    for place in place_names {
        chain.push(LevelKind::Place, place, None, None);
    }
    chain.levels
}

struct Chain {
    levels: Vec<HierarchyLevel>,
    seen: HashSet<String>,
    max: usize,
    first_index: usize,
}

impl Chain {
    fn new(max: usize, first_index: usize) -> Self {
        Self {
            levels: Vec::new(),
            seen: HashSet::new(),
            max,
            first_index,
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.seen.contains(&name.trim().to_lowercase())
    }

    /// Push the next place name not already in the chain.
    fn fill_from<'a>(&mut self, kind: LevelKind, places: &mut impl Iterator<Item = &'a String>) {
        if let Some(place) = places.find(|p| !p.trim().is_empty() && !self.contains(p)) {
            self.push(kind, place, None, None);
        }
    }

    fn push(&mut self, kind: LevelKind, name: &str, website: Option<&str>, subdivision: Option<&str>) {
        let name = name.trim();
        if name.is_empty() || self.levels.len() >= self.max || !self.seen.insert(name.to_lowercase()) {
            return;
        }
        let inherited = self.levels.last().and_then(|l| l.subdivision.clone());
        self.levels.push(HierarchyLevel {
            index: self.levels.len() + self.first_index,
            kind,
            name: name.to_string(),
            website: website.map(str::to_string),
            subdivision: subdivision.map(str::to_string).or(inherited),
        });
    }
}

/// Everything the walk produced, duplicates included so provenance can merge.
#[derive(Debug, Clone, Default)]
pub struct WalkReport {
    pub candidates: Vec<Candidate>,
    pub levels_walked: usize,
    pub scrape_failures: usize,
}

struct LevelYield {
    candidates: Vec<Candidate>,
    scrape_failed: bool,
}

pub struct HierarchyWalker {
    deriver: Arc<DomainDeriver>,
    roles: Arc<RoleHeuristics>,
    scraper: Arc<SiteScraper>,
    concurrency: usize,
}

impl HierarchyWalker {
    pub fn new(
        deriver: Arc<DomainDeriver>,
        roles: Arc<RoleHeuristics>,
        scraper: Arc<SiteScraper>,
        concurrency: usize,
    ) -> Self {
        Self {
            deriver,
            roles,
            scraper,
            concurrency: concurrency.max(1),
        }
    }

    /// Levels run concurrently up to the worker limit but are consumed in
    /// order, so the empty-streak stop rule sees them most specific first.
    /// Stopping drops any level still in flight.
    pub async fn walk(&self, levels: Vec<HierarchyLevel>, deadline: Deadline) -> WalkReport {
        let mut report = WalkReport::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut empty_streak = 0;

        // A site shared by several levels is scraped for the first of them only.
        let mut sites = HashSet::new();
        let plan: Vec<(HierarchyLevel, bool)> = levels
            .into_iter()
            .map(|level| {
                let scrape = level
                    .website
                    .as_deref()
                    .and_then(site_url)
                    .is_some_and(|site| sites.insert(site));
                (level, scrape)
            })
            .collect();

        let mut yields = pin!(stream::iter(
            plan.into_iter()
                .map(|(level, scrape)| self.walk_level(level, scrape, deadline))
        )
        .buffered(self.concurrency));

        while let Some(level) = yields.next().await {
            report.levels_walked += 1;
            if level.scrape_failed {
                report.scrape_failures += 1;
            }
            let fresh = level
                .candidates
                .iter()
                .filter(|c| seen.insert(c.address.clone()))
                .count();
            report.candidates.extend(level.candidates);

            if fresh == 0 {
                empty_streak += 1;
                if empty_streak >= MAX_EMPTY_STREAK {
                    debug!(levels_walked = report.levels_walked, "Walk stopped after empty levels");
                    break;
                }
            } else {
                empty_streak = 0;
            }
        }

        info!(
            levels_walked = report.levels_walked,
            candidates = report.candidates.len(),
            "Hierarchy walked"
        );
        report
    }

    async fn walk_level(&self, level: HierarchyLevel, scrape: bool, deadline: Deadline) -> LevelYield {
        let mut out = LevelYield {
            candidates: Vec::new(),
            scrape_failed: false,
        };

        if let Some(website) = level.website.as_deref().filter(|_| scrape) {
            let scraped = self.scraper.scrape(website, deadline).await;
            out.scrape_failed = scraped.failed;
            out.candidates.extend(scraped.emails.iter().filter_map(|addr| {
                Candidate::new(
                    addr,
                    Tier::WebsiteScrape,
                    level.index,
                    format!("found on {website} ({} level {})", level.kind, level.index),
                )
            }));
        }

        match self.deriver.derive_for_level(&level) {
            Ok(domain) => {
                out.candidates.extend(self.roles.generate(
                    &domain,
                    level.subdivision.as_deref(),
                    level.index,
                ));
            }
            Err(e) => {
                debug!(level = level.index, name = level.name.as_str(), error = %e, "Level contributes no heuristics");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn feature(id: &str, distance_m: f64, tags: &[(&str, &str)]) -> Feature {
        Feature {
            id: id.into(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            centroid: None,
            distance_m,
            text_overlap: 0.0,
            score: 0.0,
        }
    }

    fn names(levels: &[HierarchyLevel]) -> Vec<(usize, LevelKind, &str)> {
        levels.iter().map(|l| (l.index, l.kind, l.name.as_str())).collect()
    }

    #[test]
    fn resolved_chain_leaves_surrounding_places_out() {
        let features = vec![
            feature(
                "way/1",
                20.0,
                &[("name", "UCLA School of Law"), ("building", "university"), ("website", "https://law.ucla.edu"), ("department", "School of Law")],
            ),
            feature(
                "rel/2",
                300.0,
                &[("name", "UCLA"), ("amenity", "university"), ("operator", "University of California, Los Angeles")],
            ),
        ];
        let places = vec!["Westwood".to_string(), "Los Angeles County".to_string(), "California".to_string()];
        let levels = build_levels(&features, &places, 6);
        assert_eq!(
            names(&levels),
            vec![
                (0, LevelKind::Feature, "UCLA School of Law"),
                (1, LevelKind::Campus, "UCLA"),
                (2, LevelKind::Operator, "University of California, Los Angeles"),
            ]
        );
        assert_eq!(levels[0].website.as_deref(), Some("https://law.ucla.edu"));
        assert!(levels.iter().all(|l| l.subdivision.as_deref() == Some("School of Law")));
    }

    #[test]
    fn campus_falls_back_to_a_place_name() {
        let features = vec![feature("node/1", 5.0, &[("name", "Main Library"), ("amenity", "library")])];
        let places = vec!["Main Library".to_string(), "Pomona College".to_string()];
        let levels = build_levels(&features, &places, 6);
        assert_eq!(
            names(&levels),
            vec![(0, LevelKind::Feature, "Main Library"), (1, LevelKind::Campus, "Pomona College")]
        );
    }

    #[test]
    fn place_names_fill_missing_campus_and_operator_only() {
        let features = vec![feature("node/1", 5.0, &[("name", "Kiosk"), ("amenity", "kiosk")])];
        let places: Vec<String> = (0..20).map(|i| format!("Place {i}")).collect();
        assert_eq!(
            names(&build_levels(&features, &places, 6)),
            vec![
                (0, LevelKind::Feature, "Kiosk"),
                (1, LevelKind::Campus, "Place 0"),
                (2, LevelKind::Place, "Place 1"),
            ]
        );
    }

    #[test]
    fn depth_is_capped() {
        let features = vec![feature("node/1", 5.0, &[("name", "Kiosk"), ("amenity", "kiosk")])];
        let places: Vec<String> = (0..20).map(|i| format!("Place {i}")).collect();
        assert_eq!(build_levels(&features, &places, 2).len(), 2);
        assert_eq!(fallback_levels(&places, 4).len(), 4);
    }

    #[test]
    fn fallback_levels_start_at_one() {
        let places = vec!["Westwood".to_string(), "westwood".to_string(), "Los Angeles".to_string()];
        let levels = fallback_levels(&places, 6);
        assert_eq!(
            names(&levels),
            vec![(1, LevelKind::Place, "Westwood"), (2, LevelKind::Place, "Los Angeles")]
        );
        assert!(build_levels(&[], &places, 6).iter().all(|l| l.index >= 1));
    }
}
