//! Rule tables for domain derivation, role mailboxes and the quality gate.
//!
//! Kept as data so new institutions, roles or suffixes are table edits. The
//! built-in tables can be replaced wholesale by a JSON file (`STEWARD_RULES_PATH`).

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::StewardError;

/// Name pattern → domain template. `{name}` in the template is replaced by
/// the compact slug of the pattern's `name` capture group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRule {
    pub pattern: String,
    pub template: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleFamily {
    pub family: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rulesets {
    /// Applied in order; first match wins.
    pub domain_rules: Vec<DomainRule>,
    pub role_families: Vec<RoleFamily>,
    /// Prefixes combined with the subdivision slug (`custodian-school-of-law@`).
    /// The bare subdivision slug is always emitted as well.
    pub subdivision_roles: Vec<String>,
    /// Domain suffixes allowed for heuristic-only candidates.
    pub heuristic_allowlist: Vec<String>,
    /// Local parts that mark a placeholder or test address.
    pub placeholder_locals: Vec<String>,
}

fn rule(pattern: &str, template: &str) -> DomainRule {
    DomainRule {
        pattern: pattern.to_string(),
        template: template.to_string(),
    }
}

fn family(name: &str, roles: &[&str]) -> RoleFamily {
    RoleFamily {
        family: name.to_string(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for Rulesets {
    fn default() -> Self {
        Self {
            domain_rules: vec![
                rule(r"(?i)\bUniversity of California,?\s+Los Angeles\b|\bUCLA\b", "ucla.edu"),
                rule(r"(?i)\bUniversity of California,?\s+Berkeley\b|\bUC Berkeley\b", "berkeley.edu"),
                rule(r"(?i)\bUniversity of California,?\s+San Diego\b|\bUCSD\b", "ucsd.edu"),
                rule(r"(?i)\bUniversity of Minnesota\b", "umn.edu"),
                rule(r"(?i)\bMassachusetts Institute of Technology\b", "mit.edu"),
                rule(r"(?i)^(?P<name>[A-Za-z'.-]+) (?:University|College)$", "{name}.edu"),
                rule(r"(?i)^City of (?P<name>[A-Za-z .'-]+?)\s*$", "{name}.gov"),
                rule(r"(?i)^(?P<name>[A-Za-z .'-]+?) County$", "{name}county.gov"),
            ],
            role_families: vec![
                family("general", &["info", "support", "contact", "help"]),
                family("facilities", &["facilities", "maintenance", "custodian", "grounds"]),
                family("safety", &["security", "police", "publicsafety"]),
                family("accessibility", &["ada", "accessibility"]),
            ],
            subdivision_roles: strings(&["custodian", "facilities"]),
            heuristic_allowlist: strings(&["edu", "gov", "org"]),
            placeholder_locals: strings(&[
                "test",
                "testing",
                "example",
                "sample",
                "noreply",
                "no-reply",
                "donotreply",
                "do-not-reply",
                "nobody",
                "null",
                "username",
                "yourname",
                "your-name",
                "someone",
                "placeholder",
                "changeme",
            ]),
        }
    }
}

impl Rulesets {
    /// Load a complete replacement table set from JSON.
    pub fn from_json_file(path: &Path) -> Result<Self, StewardError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StewardError::Config(format!("reading {}: {e}", path.display())))?;
        let rules: Rulesets = serde_json::from_str(&raw)
            .map_err(|e| StewardError::Config(format!("parsing {}: {e}", path.display())))?;
        rules.validate()?;
        Ok(rules)
    }

    /// Every domain pattern must compile.
    pub fn validate(&self) -> Result<(), StewardError> {
        for r in &self.domain_rules {
            Regex::new(&r.pattern).map_err(|e| {
                StewardError::Config(format!("invalid domain rule pattern {:?}: {e}", r.pattern))
            })?;
        }
        Ok(())
    }

    /// All role mailbox names in table order.
    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.role_families
            .iter()
            .flat_map(|f| f.roles.iter().map(String::as_str))
    }
}
