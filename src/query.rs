//! Read-only lookups over the live site records.
//!
//! Every call takes a fresh snapshot of each record, so a result never mixes
//! fields from two different checks.

use crate::models::{MonitorState, SiteRecord};

impl MonitorState {
    pub async fn find_by_name(&self, url: &str) -> Option<SiteRecord> {
        let slot = self.sites.iter().find(|s| s.url() == url)?;
        Some(slot.snapshot().await)
    }

    /// Fastest available site. Down and unchecked sites never win.
    pub async fn min_latency(&self) -> Option<SiteRecord> {
        self.snapshot()
            .await
            .into_iter()
            .filter(|r| r.measured_latency().is_some())
            .min_by_key(|r| r.latency)
    }

    /// Slowest available site.
    pub async fn max_latency(&self) -> Option<SiteRecord> {
        self.snapshot()
            .await
            .into_iter()
            .filter(|r| r.measured_latency().is_some())
            .max_by_key(|r| r.latency)
    }
}
