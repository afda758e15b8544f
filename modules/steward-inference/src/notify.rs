//! Delivery handoff for a ranked result.
//!
//! The core never sends mail itself. A [`Notifier`] receives each ranked
//! recipient in order; [`dispatch`] keeps going past individual failures and
//! reports how many went through.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use steward_common::{Candidate, Coordinate, RankedResult};

/// What the recipient is being told about.
#[derive(Debug, Clone, Serialize)]
pub struct ReportContext {
    pub coordinate: Coordinate,
    pub report_text: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: &Candidate, report: &ReportContext) -> Result<()>;
    fn name(&self) -> &str;
}

/// Dry-run notifier: logs each recipient and succeeds.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, recipient: &Candidate, report: &ReportContext) -> Result<()> {
        info!(
            to = recipient.address.as_str(),
            tier = recipient.tier.rank(),
            lat = report.coordinate.lat,
            lng = report.coordinate.lng,
            "Would notify recipient"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
    pub first_error: Option<String>,
}

impl DispatchReport {
    pub fn total(&self) -> usize {
        self.sent + self.failed
    }

    /// `Err` when any recipient failed, summarising the first failure.
    pub fn into_result(self) -> Result<DispatchReport> {
        match &self.first_error {
            Some(first) => anyhow::bail!(
                "{}/{} notifications failed: {first}",
                self.failed,
                self.total()
            ),
            None => Ok(self),
        }
    }
}

pub async fn dispatch(notifier: &dyn Notifier, result: &RankedResult, report: &ReportContext) -> DispatchReport {
    let mut out = DispatchReport::default();
    for recipient in result.iter() {
        match notifier.notify(recipient, report).await {
            Ok(()) => out.sent += 1,
            Err(e) => {
                warn!(
                    notifier = notifier.name(),
                    to = recipient.address.as_str(),
                    error = %e,
                    "Notification failed"
                );
                out.failed += 1;
                out.first_error.get_or_insert_with(|| format!("{}: {e:#}", recipient.address));
            }
        }
    }
    out
}
