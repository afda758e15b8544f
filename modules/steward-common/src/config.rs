use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::StewardError;
use crate::rules::Rulesets;

pub const DEFAULT_OVERPASS_URL: &str = "https://overpass-api.de/api";
pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";
pub const DEFAULT_USER_AGENT: &str = "steward/0.1 (point-of-contact inference)";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Master switch. A disabled pipeline answers without touching collaborators.
    pub enabled: bool,

    // Budgets
    pub call_timeout: Duration,
    /// Upper bound for any single collaborator call inside the call deadline.
    pub op_timeout: Duration,
    pub max_results: usize,
    pub scrape_concurrency: usize,
    pub max_levels: usize,

    // Resolution
    pub search_radius_m: f64,
    pub name_weight: f64,
    pub distance_weight: f64,

    // Cache
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    /// Decimal places kept when bucketing coordinates for cache keys.
    pub bucket_precision: u32,
    pub database_url: Option<String>,

    // Politeness
    pub map_interval: Duration,
    pub web_interval: Duration,
    pub user_agent: String,

    // Collaborators
    pub overpass_url: String,
    pub nominatim_url: String,

    pub rules: Rulesets,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            call_timeout: Duration::from_secs(20),
            op_timeout: Duration::from_secs(8),
            max_results: 5,
            scrape_concurrency: 4,
            max_levels: 6,
            search_radius_m: 200.0,
            name_weight: 1.0,
            distance_weight: 5.0,
            cache_ttl: Duration::from_secs(24 * 3600),
            cache_max_entries: 10_000,
            bucket_precision: 5,
            database_url: None,
            map_interval: Duration::from_millis(1000),
            web_interval: Duration::from_millis(250),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            overpass_url: DEFAULT_OVERPASS_URL.to_string(),
            nominatim_url: DEFAULT_NOMINATIM_URL.to_string(),
            rules: Rulesets::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables. Every setting has a
    /// default; values that are present but unparseable are errors.
    pub fn from_env() -> Result<Self, StewardError> {
        let d = Self::default();

        let rules = match env::var("STEWARD_RULES_PATH") {
            Ok(path) if !path.is_empty() => Rulesets::from_json_file(&PathBuf::from(path))?,
            _ => d.rules,
        };

        let config = Self {
            enabled: env_parse("STEWARD_ENABLED", d.enabled)?,
            call_timeout: Duration::from_secs(env_parse(
                "STEWARD_CALL_TIMEOUT_SECS",
                d.call_timeout.as_secs(),
            )?),
            op_timeout: Duration::from_secs(env_parse(
                "STEWARD_OP_TIMEOUT_SECS",
                d.op_timeout.as_secs(),
            )?),
            max_results: env_parse("STEWARD_MAX_RESULTS", d.max_results)?,
            scrape_concurrency: env_parse("STEWARD_SCRAPE_CONCURRENCY", d.scrape_concurrency)?,
            max_levels: env_parse("STEWARD_MAX_LEVELS", d.max_levels)?,
            search_radius_m: env_parse("STEWARD_SEARCH_RADIUS_M", d.search_radius_m)?,
            name_weight: env_parse("STEWARD_NAME_WEIGHT", d.name_weight)?,
            distance_weight: env_parse("STEWARD_DISTANCE_WEIGHT", d.distance_weight)?,
            cache_ttl: Duration::from_secs(env_parse(
                "STEWARD_CACHE_TTL_SECS",
                d.cache_ttl.as_secs(),
            )?),
            cache_max_entries: env_parse("STEWARD_CACHE_MAX_ENTRIES", d.cache_max_entries)?,
            bucket_precision: env_parse("STEWARD_BUCKET_PRECISION", d.bucket_precision)?,
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            map_interval: Duration::from_millis(env_parse(
                "STEWARD_MAP_INTERVAL_MS",
                d.map_interval.as_millis() as u64,
            )?),
            web_interval: Duration::from_millis(env_parse(
                "STEWARD_WEB_INTERVAL_MS",
                d.web_interval.as_millis() as u64,
            )?),
            user_agent: env::var("STEWARD_USER_AGENT").unwrap_or(d.user_agent),
            overpass_url: env::var("OVERPASS_URL").unwrap_or(d.overpass_url),
            nominatim_url: env::var("NOMINATIM_URL").unwrap_or(d.nominatim_url),
            rules,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StewardError> {
        if self.max_results == 0 {
            return Err(StewardError::Config("STEWARD_MAX_RESULTS must be at least 1".into()));
        }
        if self.scrape_concurrency == 0 {
            return Err(StewardError::Config(
                "STEWARD_SCRAPE_CONCURRENCY must be at least 1".into(),
            ));
        }
        if self.bucket_precision > 9 {
            return Err(StewardError::Config(
                "STEWARD_BUCKET_PRECISION must be between 0 and 9".into(),
            ));
        }
        if !(self.search_radius_m > 0.0) {
            return Err(StewardError::Config("STEWARD_SEARCH_RADIUS_M must be positive".into()));
        }
        self.rules.validate()
    }

    /// Log the effective configuration with credentials masked.
    pub fn log_redacted(&self) {
        info!(
            enabled = self.enabled,
            call_timeout_secs = self.call_timeout.as_secs(),
            op_timeout_secs = self.op_timeout.as_secs(),
            max_results = self.max_results,
            scrape_concurrency = self.scrape_concurrency,
            search_radius_m = self.search_radius_m,
            cache_ttl_secs = self.cache_ttl.as_secs(),
            bucket_precision = self.bucket_precision,
            database = %self.database_url.as_deref().map(redact_url).unwrap_or_default(),
            overpass_url = self.overpass_url.as_str(),
            nominatim_url = self.nominatim_url.as_str(),
            domain_rules = self.rules.domain_rules.len(),
            "Effective configuration"
        );
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, StewardError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| StewardError::Config(format!("{key}={raw:?}: {e}"))),
        _ => Ok(default),
    }
}

/// Replace the password component of a connection URL with `***`.
fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => "<unparseable>".to_string(),
    }
}
