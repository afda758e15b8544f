//! Result-shape guarantees, determinism and cache discipline.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use steward_common::{Config, RawFeature};
use steward_inference::quality::QualityGate;
use steward_inference::testing::{
    coordinate, page, raw_feature_at, test_config, test_steward, test_steward_with, MockFetcher,
    MockPlaces, MockSpatial, SANTA_MONICA, UCLA_LAW,
};
use steward_inference::{InferenceOutcome, InferenceStatus};

fn neighborhood() -> Vec<RawFeature> {
    vec![
        raw_feature_at(
            "way/1",
            UCLA_LAW,
            &[
                ("name", "UCLA School of Law"),
                ("building", "university"),
                ("website", "https://law.ucla.edu"),
                ("contact:email", "Dean@Law.UCLA.edu; dean@law.ucla.edu"),
                ("department", "School of Law"),
            ],
        ),
        raw_feature_at(
            "relation/2",
            (34.0689, -118.4452),
            &[
                ("name", "UCLA"),
                ("amenity", "university"),
                ("operator", "University of California, Los Angeles"),
                ("operator:website", "https://www.ucla.edu"),
            ],
        ),
        raw_feature_at(
            "node/3",
            (34.0727, -118.4383),
            &[("name", "Law Library Cafe"), ("amenity", "cafe"), ("email", "test@cafe.example.com")],
        ),
    ]
}

fn fetcher() -> MockFetcher {
    MockFetcher::new()
        .on_page(
            "https://law.ucla.edu/",
            page(
                "https://law.ucla.edu/",
                "Contact the Dean's office at DEAN@law.ucla.edu.",
                &["info@law.ucla.edu"],
                &[],
            ),
        )
        .on_page(
            "https://www.ucla.edu/",
            page("https://www.ucla.edu/", "", &["support@ucla.edu"], &[]),
        )
}

fn places() -> MockPlaces {
    MockPlaces::new(&["Westwood", "Los Angeles", "Los Angeles County", "California"])
}

fn assert_well_formed(out: &InferenceOutcome, max: usize) {
    assert!(out.result.len() <= max, "{} > {max}", out.result.len());

    let mut seen = HashSet::new();
    for c in out.result.iter() {
        assert!(seen.insert(c.address.to_lowercase()), "duplicate {}", c.address);
    }

    let tiers: Vec<_> = out.result.iter().map(|c| c.tier).collect();
    assert!(tiers.windows(2).all(|w| w[0] <= w[1]), "tiers out of order: {tiers:?}");
}

#[tokio::test]
async fn results_are_bounded_distinct_and_ordered() {
    let steward = test_steward(
        Arc::new(MockSpatial::new().with_features(neighborhood())),
        Arc::new(places()),
        Arc::new(fetcher()),
    );
    for max in [1, 3, 5, 8, 25, 200] {
        let out = steward
            .infer(coordinate(UCLA_LAW), "Flooded stairwell in the law school", Some(max))
            .await;
        assert_eq!(out.status, InferenceStatus::Found);
        assert_well_formed(&out, max);
    }
}

#[tokio::test]
async fn evidence_tiers_lead_the_result() {
    let steward = test_steward(
        Arc::new(MockSpatial::new().with_features(neighborhood())),
        Arc::new(places()),
        Arc::new(fetcher()),
    );
    let out = steward
        .infer(coordinate(UCLA_LAW), "Flooded stairwell in the law school", Some(200))
        .await;

    let addrs = out.result.addresses();
    // Tag (case-folded, merged with the scraped copy), then the scraped pages.
    assert_eq!(&addrs[..3], &["dean@law.ucla.edu", "info@law.ucla.edu", "support@ucla.edu"]);
    let dean = &out.result.candidates[0];
    assert!(dean.provenance.iter().any(|p| p.starts_with("tag contact:email")));
    assert!(dean.provenance.iter().any(|p| p.starts_with("found on https://law.ucla.edu")));

    // Subdivision forms inherit up to the campus domain.
    assert!(addrs.contains(&"custodian-school-of-law@ucla.edu"));
    // Another feature's placeholder tag never appears.
    assert!(!addrs.iter().any(|a| a.contains("cafe.example.com")));
}

#[tokio::test]
async fn identical_inputs_give_identical_output() {
    let run = || async {
        let steward = test_steward(
            Arc::new(MockSpatial::new().with_features(neighborhood())),
            Arc::new(places()),
            Arc::new(fetcher()),
        );
        let out = steward
            .infer(coordinate(UCLA_LAW), "Flooded stairwell in the law school", Some(10))
            .await;
        serde_json::to_string(&out).unwrap()
    };
    assert_eq!(run().await, run().await);
}

#[tokio::test]
async fn warm_cache_answers_the_same_without_refetching() {
    let spatial = Arc::new(MockSpatial::new().with_features(neighborhood()));
    let fetcher = Arc::new(fetcher());
    let steward = test_steward(spatial.clone(), Arc::new(places()), fetcher.clone());
    let at = coordinate(UCLA_LAW);

    let cold = steward.infer(at, "Flooded stairwell", Some(10)).await;
    let fetches = fetcher.call_count();
    let warm = steward.infer(at, "Flooded stairwell", Some(10)).await;

    assert_eq!(cold.result, warm.result);
    assert_eq!(spatial.calls(), 1);
    assert_eq!(fetcher.call_count(), fetches);
    assert!(!steward.cache().is_empty().await);
    // Homepage plus at most one contact page per distinct site.
    assert!(fetches <= 4, "{:?}", fetcher.calls());
}

#[tokio::test]
async fn nearby_reports_share_the_spatial_answer() {
    let spatial = Arc::new(MockSpatial::new().with_features(neighborhood()));
    let steward = test_steward(spatial.clone(), Arc::new(places()), Arc::new(fetcher()));

    steward
        .infer(coordinate((34.072600, -118.438100)), "Leak", None)
        .await;
    steward
        .infer(coordinate((34.072602, -118.438098)), "Different wording entirely", None)
        .await;
    assert_eq!(spatial.calls(), 1);

    steward.infer(coordinate(SANTA_MONICA), "Leak", None).await;
    assert_eq!(spatial.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn expired_evidence_is_fetched_again() {
    let spatial = Arc::new(MockSpatial::new().with_features(neighborhood()));
    let config = Config {
        cache_ttl: Duration::from_secs(600),
        ..test_config()
    };
    let steward = test_steward_with(spatial.clone(), Arc::new(places()), Arc::new(fetcher()), config);
    let at = coordinate(UCLA_LAW);

    steward.infer(at, "Leak", None).await;
    tokio::time::advance(Duration::from_secs(300)).await;
    steward.infer(at, "Leak", None).await;
    assert_eq!(spatial.calls(), 1);

    tokio::time::advance(Duration::from_secs(301)).await;
    steward.infer(at, "Leak", None).await;
    assert_eq!(spatial.calls(), 2);
}

#[tokio::test]
async fn gate_is_idempotent_on_final_output() {
    let config = test_config();
    let steward = test_steward_with(
        Arc::new(MockSpatial::new().with_features(neighborhood())),
        Arc::new(places()),
        Arc::new(fetcher()),
        config.clone(),
    );
    let out = steward.infer(coordinate(UCLA_LAW), "Leak", Some(50)).await;

    let gate = QualityGate::new(&config.rules).unwrap();
    let (again, stats) = gate.filter(out.result.candidates.clone());
    assert_eq!(again, out.result.candidates);
    assert_eq!(stats.total(), 0);
}

#[tokio::test]
async fn concurrent_calls_share_one_steward() {
    let steward = Arc::new(test_steward(
        Arc::new(MockSpatial::new().with_features(neighborhood())),
        Arc::new(places()),
        Arc::new(fetcher()),
    ));
    let at = coordinate(UCLA_LAW);
    let (a, b) = tokio::join!(
        steward.infer(at, "Leak", Some(5)),
        steward.infer(at, "Leak", Some(5)),
    );
    assert_eq!(a.result, b.result);
    assert_well_formed(&a, 5);
}
