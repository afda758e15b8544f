//! Direct evidence carried on the feature itself.

use tracing::debug;

use steward_common::{Candidate, Feature, Tier, EMAIL_TAG_KEYS, WEBSITE_TAG_KEYS};

/// Tier-0 addresses and linkable URLs pulled from one feature's tags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagEvidence {
    pub candidates: Vec<Candidate>,
    /// Website URLs worth scraping, in tag-key order, deduplicated.
    pub urls: Vec<String>,
}

/// Pure: no network, no failure beyond an empty result. Malformed addresses
/// are skipped.
pub fn extract(feature: &Feature) -> TagEvidence {
    let mut out = TagEvidence::default();

    for key in EMAIL_TAG_KEYS {
        let Some(value) = feature.tag(key) else {
            continue;
        };
        for raw in value.split(';').map(str::trim).filter(|v| !v.is_empty()) {
            let note = format!("tag {key} on {}", feature.id);
            match Candidate::new(raw, Tier::OsmTag, 0, note) {
                Some(c) if !out.candidates.iter().any(|seen| seen.address == c.address) => {
                    out.candidates.push(c)
                }
                Some(_) => {}
                None => debug!(feature = feature.id.as_str(), key, value = raw, "Skipping malformed email tag"),
            }
        }
    }

    let url_keys = WEBSITE_TAG_KEYS.iter().chain(std::iter::once(&"operator:website"));
    for key in url_keys {
        if let Some(url) = feature.tag(key) {
            if !out.urls.iter().any(|u| u == url) {
                out.urls.push(url.to_string());
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn feature(tags: &[(&str, &str)]) -> Feature {
        Feature {
            id: "way/1".into(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            centroid: None,
            distance_m: 0.0,
            text_overlap: 0.0,
            score: 0.0,
        }
    }

    #[test]
    fn contact_email_becomes_tier_zero() {
        let ev = extract(&feature(&[("contact:email", "facilities@law.ucla.edu")]));
        assert_eq!(ev.candidates.len(), 1);
        assert_eq!(ev.candidates[0].address, "facilities@law.ucla.edu");
        assert_eq!(ev.candidates[0].tier, Tier::OsmTag);
        assert_eq!(ev.candidates[0].provenance, vec!["tag contact:email on way/1"]);
    }

    #[test]
    fn multi_valued_tags_split_and_dedup() {
        let ev = extract(&feature(&[
            ("email", "a@city.gov; b@city.gov"),
            ("contact:email", "A@city.gov"),
            ("operator:email", "not-an-email"),
        ]));
        let addrs: Vec<&str> = ev.candidates.iter().map(|c| c.address.as_str()).collect();
        assert_eq!(addrs, vec!["a@city.gov", "b@city.gov"]);
    }

    #[test]
    fn urls_collect_site_and_operator_site() {
        let ev = extract(&feature(&[
            ("website", "https://law.ucla.edu"),
            ("contact:website", "https://law.ucla.edu"),
            ("operator:website", "https://www.ucla.edu"),
        ]));
        assert_eq!(ev.urls, vec!["https://law.ucla.edu", "https://www.ucla.edu"]);
        assert!(ev.candidates.is_empty());
    }

    #[test]
    fn bare_feature_yields_nothing() {
        assert_eq!(extract(&feature(&[("name", "Shed")])), TagEvidence::default());
    }
}
