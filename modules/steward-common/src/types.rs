use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::email::normalize_email;

// --- Tag vocabularies ---

/// Tag keys that classify a feature. The first one present is its type tag.
pub const FEATURE_TYPE_KEYS: &[&str] = &["amenity", "building", "office", "leisure", "tourism"];

/// Tag keys that carry a direct contact address. Values may be `;`-separated.
pub const EMAIL_TAG_KEYS: &[&str] = &["email", "contact:email", "operator:email"];

/// Tag keys that carry the feature's own website.
pub const WEBSITE_TAG_KEYS: &[&str] = &["website", "contact:website", "url"];

/// Tag keys that name an organizational subdivision (e.g. "School of Law").
pub const SUBDIVISION_TAG_KEYS: &[&str] = &["department", "faculty", "subdivision"];

/// `amenity` values that mark a campus-like parent feature.
pub const CAMPUS_AMENITIES: &[&str] = &["university", "college", "school", "hospital"];

// --- Geometry ---

/// Great-circle distance between two points in kilometres.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// WGS84 latitude/longitude in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Cache bucket for this coordinate: both axes rounded to `precision`
    /// decimal places. Points inside the same grid cell produce the same key.
    pub fn bucket(&self, precision: u32) -> String {
        let scale = 10f64.powi(precision as i32);
        let lat = (self.lat * scale).round() as i64;
        let lng = (self.lng * scale).round() as i64;
        format!("{precision}:{lat}:{lng}")
    }

    pub fn distance_m(&self, other: &Coordinate) -> f64 {
        haversine_km(self.lat, self.lng, other.lat, other.lng) * 1000.0
    }
}

// --- Map features ---

/// A map record exactly as the spatial collaborator returned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFeature {
    pub id: String,
    pub centroid: Option<Coordinate>,
    pub tags: BTreeMap<String, String>,
}

/// A resolved map feature. Attributes stay a loose tag map since open map
/// data has no fixed schema; every accessor treats its key as optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub tags: BTreeMap<String, String>,
    pub centroid: Option<Coordinate>,
    /// Metres from the query coordinate.
    pub distance_m: f64,
    /// Share of the feature name's tokens present in the report text, 0.0-1.0.
    pub text_overlap: f64,
    pub score: f64,
}

impl Feature {
    /// Tag value, trimmed. Empty values count as absent.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn first_tag(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.tag(k))
    }

    pub fn name(&self) -> Option<&str> {
        self.first_tag(&["name", "official_name"])
    }

    pub fn operator(&self) -> Option<&str> {
        self.tag("operator")
    }

    pub fn website(&self) -> Option<&str> {
        self.first_tag(WEBSITE_TAG_KEYS)
    }

    pub fn operator_website(&self) -> Option<&str> {
        self.tag("operator:website")
    }

    pub fn subdivision(&self) -> Option<&str> {
        self.first_tag(SUBDIVISION_TAG_KEYS)
    }

    /// Name used for display and hierarchy: the feature name, else its operator.
    pub fn display_name(&self) -> Option<&str> {
        self.name().or_else(|| self.operator())
    }

    /// `key=value` for the first classifying tag present.
    pub fn feature_type(&self) -> Option<String> {
        FEATURE_TYPE_KEYS
            .iter()
            .find_map(|k| self.tag(k).map(|v| format!("{k}={v}")))
    }

    pub fn is_campus(&self) -> bool {
        self.tag("amenity")
            .map(|a| CAMPUS_AMENITIES.contains(&a))
            .unwrap_or(false)
            || self.tag("landuse") == Some("education")
    }
}

// --- Hierarchy ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelKind {
    Feature,
    Campus,
    Operator,
    Place,
}

impl fmt::Display for LevelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LevelKind::Feature => "feature",
            LevelKind::Campus => "campus",
            LevelKind::Operator => "operator",
            LevelKind::Place => "place",
        };
        f.write_str(s)
    }
}

/// One rung of the ownership chain. Index 0 is the most specific.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyLevel {
    pub index: usize,
    pub kind: LevelKind,
    pub name: String,
    pub website: Option<String>,
    /// Inherited from the level below when this level has none of its own.
    pub subdivision: Option<String>,
}

// --- Domains ---

/// Bare lower-case internet domain: no scheme, port, path or query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domain(String);

impl Domain {
    /// Validate and normalize a host string. A leading `www.` is dropped so
    /// role mailboxes land on the organization's domain.
    pub fn parse(host: &str) -> Option<Self> {
        let host = host.trim().trim_end_matches('.').to_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        if host.len() > 253 || !is_valid_host(host) {
            return None;
        }
        Some(Self(host.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the domain equals `suffix` or ends with `.suffix`.
    pub fn has_suffix(&self, suffix: &str) -> bool {
        let suffix = suffix.trim_start_matches('.').to_lowercase();
        self.0 == suffix || self.0.ends_with(&format!(".{suffix}"))
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dotted host with at least two labels and an alphabetic TLD.
pub(crate) fn is_valid_host(host: &str) -> bool {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    let label_ok = |l: &str| {
        !l.is_empty()
            && l.len() <= 63
            && !l.starts_with('-')
            && !l.ends_with('-')
            && l.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    };
    let tld = labels[labels.len() - 1];
    labels.iter().all(|l| label_ok(l)) && tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_lowercase())
}

// --- Candidates ---

/// Confidence rank of a candidate. Lower is more confident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Directly tagged on the map feature.
    OsmTag = 0,
    /// Found on a linked website.
    WebsiteScrape = 1,
    /// Role mailbox guessed on the feature's own domain.
    HeuristicFeature = 2,
    /// Role mailbox guessed on a parent's domain.
    HeuristicParent = 3,
}

impl Tier {
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// Heuristic candidates carry no direct evidence and face the domain allowlist.
    pub fn is_heuristic(self) -> bool {
        matches!(self, Tier::HeuristicFeature | Tier::HeuristicParent)
    }

    pub fn heuristic_for_level(level: usize) -> Self {
        if level == 0 {
            Tier::HeuristicFeature
        } else {
            Tier::HeuristicParent
        }
    }
}

/// One inferred address. `address` is lower-cased and syntactically valid
/// when built through [`Candidate::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub address: String,
    pub tier: Tier,
    pub level: usize,
    pub provenance: Vec<String>,
}

impl Candidate {
    /// Returns `None` when the address fails the email grammar.
    pub fn new(address: &str, tier: Tier, level: usize, note: impl Into<String>) -> Option<Self> {
        let address = normalize_email(address)?;
        Some(Self {
            address,
            tier,
            level,
            provenance: vec![note.into()],
        })
    }

    pub fn local_part(&self) -> &str {
        self.address.rsplit_once('@').map(|(l, _)| l).unwrap_or("")
    }

    pub fn domain(&self) -> Option<Domain> {
        self.address.rsplit_once('@').and_then(|(_, d)| Domain::parse(d))
    }
}

/// Ranked, deduplicated, truncated candidate list handed to delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedResult {
    pub candidates: Vec<Candidate>,
}

impl RankedResult {
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn addresses(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.address.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter()
    }
}
