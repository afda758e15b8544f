//! Role-mailbox guesses on a derived domain.

use std::collections::HashSet;

use steward_common::{slugify, Candidate, Domain, RoleFamily, Rulesets, Tier};

pub struct RoleHeuristics {
    families: Vec<RoleFamily>,
    subdivision_roles: Vec<String>,
}

impl RoleHeuristics {
    pub fn new(rules: &Rulesets) -> Self {
        Self {
            families: rules.role_families.clone(),
            subdivision_roles: rules.subdivision_roles.clone(),
        }
    }

    /// Deterministic: family order, then the subdivision-qualified forms.
    /// Tier follows the level (feature level = 2, parents = 3).
    pub fn generate(&self, domain: &Domain, subdivision: Option<&str>, level: usize) -> Vec<Candidate> {
        let tier = Tier::heuristic_for_level(level);
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut push = |local: &str, note: String| {
            if let Some(c) = Candidate::new(&format!("{local}@{domain}"), tier, level, note) {
                if seen.insert(c.address.clone()) {
                    out.push(c);
                }
            }
        };

        for family in &self.families {
            for role in &family.roles {
                push(
                    role,
                    format!("{} role mailbox on {domain} (level {level})", family.family),
                );
            }
        }

        let slug = subdivision.map(slugify).unwrap_or_default();
        if !slug.is_empty() {
            let label = subdivision.unwrap_or_default();
            push(&slug, format!("subdivision {label:?} on {domain} (level {level})"));
            for prefix in &self.subdivision_roles {
                push(
                    &format!("{prefix}-{slug}"),
                    format!("{prefix} mailbox for {label:?} on {domain} (level {level})"),
                );
            }
        }

        out
    }
}
