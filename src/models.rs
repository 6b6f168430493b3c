use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::stats::RequestCounter;

/// Latency recorded for a site whose last check failed.
pub const UNREACHABLE_LATENCY: Duration = Duration::MAX;

#[derive(Debug, Clone, PartialEq)]
pub struct SiteRecord {
    pub url: String,
    pub available: bool,
    pub latency: Duration,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl SiteRecord {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            available: false,
            latency: UNREACHABLE_LATENCY,
            last_checked_at: None,
        }
    }

    /// Real measured latency, `None` while the site is down or unchecked.
    pub fn measured_latency(&self) -> Option<Duration> {
        if self.available && self.latency != UNREACHABLE_LATENCY {
            Some(self.latency)
        } else {
            None
        }
    }
}

pub fn format_latency(latency: Duration) -> String {
    if latency == UNREACHABLE_LATENCY {
        "unreachable".into()
    } else {
        format!("{:?}", latency)
    }
}

/// Result of one check, applied to a record in a single write.
#[derive(Debug, Clone, Copy)]
pub struct CheckOutcome {
    pub available: bool,
    pub latency: Duration,
    pub checked_at: DateTime<Utc>,
}

impl CheckOutcome {
    pub fn up(latency: Duration) -> Self {
        Self { available: true, latency, checked_at: Utc::now() }
    }

    pub fn down() -> Self {
        Self { available: false, latency: UNREACHABLE_LATENCY, checked_at: Utc::now() }
    }
}

/// A monitored site. The url is fixed; the mutable fields sit behind their own lock
/// so availability and latency always change together.
pub struct SiteSlot {
    url: String,
    record: RwLock<SiteRecord>,
}

impl SiteSlot {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            record: RwLock::new(SiteRecord::new(url.clone())),
            url,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn snapshot(&self) -> SiteRecord {
        self.record.read().await.clone()
    }

    pub async fn apply(&self, outcome: CheckOutcome) {
        let mut record = self.record.write().await;
        record.available = outcome.available;
        record.latency = outcome.latency;
        record.last_checked_at = Some(outcome.checked_at);
    }
}

/// Everything the scheduler and the API share. Built once in `main` and handed out by `Arc`.
pub struct MonitorState {
    pub sites: Vec<Arc<SiteSlot>>,
    pub requests: RequestCounter,
}

impl MonitorState {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sites: urls.into_iter().map(|u| Arc::new(SiteSlot::new(u))).collect(),
            requests: RequestCounter::new(),
        }
    }

    pub async fn snapshot(&self) -> Vec<SiteRecord> {
        let mut records = Vec::with_capacity(self.sites.len());
        for site in &self.sites {
            records.push(site.snapshot().await);
        }
        records
    }
}
