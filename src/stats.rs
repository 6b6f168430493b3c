use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// Per-route hit counts for the query API.
#[derive(Default)]
pub struct RequestCounter {
    hits: Mutex<BTreeMap<String, u64>>,
}

impl RequestCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn increment(&self, route: &str) {
        let mut hits = self.hits.lock().await;
        *hits.entry(route.to_string()).or_insert(0) += 1;
    }

    /// Owned copy of the counts; later increments do not show up in it.
    pub async fn snapshot(&self) -> BTreeMap<String, u64> {
        self.hits.lock().await.clone()
    }
}
