pub mod types;
pub mod email;
pub mod text;
pub mod rules;
pub mod config;
pub mod error;

pub use types::*;
pub use email::{is_valid_email, normalize_email};
pub use text::{compact_slug, slugify};
pub use rules::{DomainRule, RoleFamily, Rulesets};
pub use config::Config;
pub use error::StewardError;
