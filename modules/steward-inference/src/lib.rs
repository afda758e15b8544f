pub mod cache;
pub mod deadline;
pub mod domain;
pub mod fetcher;
pub mod hierarchy;
pub mod notify;
pub mod pipeline;
pub mod quality;
pub mod ranking;
pub mod rate_gate;
pub mod resolver;
pub mod roles;
pub mod scraper;
pub mod store;
pub mod tags;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use pipeline::{InferenceOutcome, InferenceStatus, Steward, StewardDeps};
