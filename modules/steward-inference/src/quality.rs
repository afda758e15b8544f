//! Last filter before delivery.
//!
//! Checks, in order: address grammar, placeholder local parts, and (for
//! heuristic tiers only) the domain allowlist. Observed addresses (tags,
//! scraped pages) are never dropped for their domain. Idempotent: feeding
//! the output back in removes nothing.

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use steward_common::{is_valid_email, Candidate, Rulesets, StewardError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    InvalidSyntax,
    Placeholder,
    NotAllowlisted,
}

/// Per-reason rejection counts for one filter pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GateStats {
    pub invalid_syntax: usize,
    pub placeholder: usize,
    pub not_allowlisted: usize,
}

impl GateStats {
    pub fn total(&self) -> usize {
        self.invalid_syntax + self.placeholder + self.not_allowlisted
    }
}

pub struct QualityGate {
    placeholder: Option<Regex>,
    allowlist: Vec<String>,
}

impl QualityGate {
    pub fn new(rules: &Rulesets) -> Result<Self, StewardError> {
        let alternatives: Vec<String> = rules
            .placeholder_locals
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .map(|p| regex::escape(&p))
            .collect();
        // "test", "test2" and "test_2" are placeholders; "testing-center" is a mailbox.
        let placeholder = if alternatives.is_empty() {
            None
        } else {
            let pattern = format!(r"^(?:{})(?:[._+-]?\d+)?$", alternatives.join("|"));
            Some(Regex::new(&pattern).map_err(|e| StewardError::Config(format!("placeholder pattern: {e}")))?)
        };
        Ok(Self {
            placeholder,
            allowlist: rules
                .heuristic_allowlist
                .iter()
                .map(|s| s.trim().trim_start_matches('.').to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }

    pub fn check(&self, candidate: &Candidate) -> Result<(), Rejection> {
        if !is_valid_email(&candidate.address) {
            return Err(Rejection::InvalidSyntax);
        }
        let local = candidate.local_part().to_lowercase();
        if self.placeholder.as_ref().is_some_and(|re| re.is_match(&local)) {
            return Err(Rejection::Placeholder);
        }
        if candidate.tier.is_heuristic() && !self.allowlist.is_empty() {
            let allowed = candidate
                .domain()
                .map(|d| self.allowlist.iter().any(|s| d.has_suffix(s)))
                .unwrap_or(false);
            if !allowed {
                return Err(Rejection::NotAllowlisted);
            }
        }
        Ok(())
    }

    /// Order-preserving filter.
    pub fn filter(&self, candidates: Vec<Candidate>) -> (Vec<Candidate>, GateStats) {
        let mut stats = GateStats::default();
        let kept = candidates
            .into_iter()
            .filter(|c| match self.check(c) {
                Ok(()) => true,
                Err(reason) => {
                    debug!(address = c.address.as_str(), ?reason, "Candidate rejected");
                    match reason {
                        Rejection::InvalidSyntax => stats.invalid_syntax += 1,
                        Rejection::Placeholder => stats.placeholder += 1,
                        Rejection::NotAllowlisted => stats.not_allowlisted += 1,
                    }
                    false
                }
            })
            .collect();
        (kept, stats)
    }
}
