//! Merge candidates from every stage into one ordered list.

use std::collections::HashMap;

use steward_common::{Candidate, RankedResult};

/// Group by address (case-insensitive), keep the most confident tier per
/// address and merge provenance. Ordered by tier, then by first appearance,
/// so equal-tier candidates keep the order the stages produced them in.
///
/// When one address is seen at several tiers the lowest tier wins and its
/// level is kept; provenance from every occurrence is appended in arrival
/// order without duplicates.
pub fn dedupe_and_rank(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<Candidate> = Vec::new();

    for c in candidates {
        let key = c.address.to_lowercase();
        match index.get(&key) {
            Some(&i) => {
                let existing = &mut merged[i];
                if c.tier < existing.tier {
                    existing.tier = c.tier;
                    existing.level = c.level;
                }
                for note in c.provenance {
                    if !existing.provenance.contains(&note) {
                        existing.provenance.push(note);
                    }
                }
            }
            None => {
                index.insert(key, merged.len());
                merged.push(Candidate {
                    address: c.address.to_lowercase(),
                    ..c
                });
            }
        }
    }

    // Stable: first-seen order survives within a tier.
    merged.sort_by_key(|c| c.tier);
    merged
}

pub fn truncate(mut ranked: Vec<Candidate>, max_results: usize) -> RankedResult {
    ranked.truncate(max_results);
    RankedResult { candidates: ranked }
}
