//! Name/URL → internet domain.
//!
//! A URL wins when present: its host is the domain. Otherwise the ordered
//! rule table is tried against the name. No match is `DomainUnknown`, which
//! callers treat as "this level contributes no heuristic candidates".

use std::collections::HashMap;
use std::sync::Mutex;

use regex::Regex;

use steward_common::{compact_slug, Domain, DomainRule, HierarchyLevel, StewardError};

/// Memo entries kept before the table is cleared.
const MEMO_LIMIT: usize = 4096;

struct CompiledRule {
    re: Regex,
    template: String,
}

type MemoKey = (usize, String, Option<String>);

pub struct DomainDeriver {
    rules: Vec<CompiledRule>,
    memo: Mutex<HashMap<MemoKey, Option<Domain>>>,
}

impl DomainDeriver {
    pub fn new(rules: &[DomainRule]) -> Result<Self, StewardError> {
        let rules = rules
            .iter()
            .map(|r| {
                Regex::new(&r.pattern)
                    .map(|re| CompiledRule {
                        re,
                        template: r.template.clone(),
                    })
                    .map_err(|e| {
                        StewardError::Config(format!("invalid domain rule pattern {:?}: {e}", r.pattern))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            rules,
            memo: Mutex::new(HashMap::new()),
        })
    }

    pub fn derive(&self, name: Option<&str>, url: Option<&str>) -> Result<Domain, StewardError> {
        if let Some(domain) = url.and_then(domain_from_url) {
            return Ok(domain);
        }
        if let Some(domain) = name.and_then(|n| self.apply_rules(n)) {
            return Ok(domain);
        }
        Err(StewardError::DomainUnknown(
            name.or(url).unwrap_or_default().to_string(),
        ))
    }

    /// `derive` memoized per `(level, name, website)`.
    pub fn derive_for_level(&self, level: &HierarchyLevel) -> Result<Domain, StewardError> {
        let key = (level.index, level.name.clone(), level.website.clone());
        if let Ok(memo) = self.memo.lock() {
            if let Some(hit) = memo.get(&key) {
                return hit
                    .clone()
                    .ok_or_else(|| StewardError::DomainUnknown(level.name.clone()));
            }
        }

        let derived = self.derive(Some(&level.name), level.website.as_deref());

        if let Ok(mut memo) = self.memo.lock() {
            if memo.len() >= MEMO_LIMIT {
                memo.clear();
            }
            memo.insert(key, derived.as_ref().ok().cloned());
        }
        derived
    }

    fn apply_rules(&self, name: &str) -> Option<Domain> {
        let name = name.trim();
        for rule in &self.rules {
            let Some(caps) = rule.re.captures(name) else {
                continue;
            };
            let rendered = if rule.template.contains("{name}") {
                let Some(m) = caps.name("name") else {
                    continue;
                };
                let slug = compact_slug(m.as_str());
                if slug.is_empty() {
                    continue;
                }
                rule.template.replace("{name}", &slug)
            } else {
                rule.template.clone()
            };
            if let Some(domain) = Domain::parse(&rendered) {
                return Some(domain);
            }
        }
        None
    }
}

/// Host of an http(s) URL as a [`Domain`]. Scheme-less input is read as http.
pub fn domain_from_url(raw: &str) -> Option<Domain> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = if raw.contains("://") {
        url::Url::parse(raw).ok()?
    } else {
        url::Url::parse(&format!("http://{raw}")).ok()?
    };
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    Domain::parse(parsed.host_str()?)
}
