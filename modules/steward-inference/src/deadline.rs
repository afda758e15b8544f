use std::future::Future;
use std::time::Duration;

use tokio::time::{error::Elapsed, Instant};

/// Absolute cut-off for one inference call. Every collaborator call runs
/// under it, so an expired call stops in-flight work instead of waiting out
/// each sub-call's own timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    pub fn at(&self) -> Instant {
        self.at
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Run `fut` until the earlier of this deadline and `now + op_timeout`.
    pub async fn bound<F: Future>(&self, op_timeout: Duration, fut: F) -> Result<F::Output, Elapsed> {
        let limit = self.at.min(Instant::now() + op_timeout);
        tokio::time::timeout_at(limit, fut).await
    }
}
