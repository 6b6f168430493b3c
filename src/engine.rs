use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::error::CheckError;
use crate::models::{format_latency, CheckOutcome, MonitorState, SiteSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub checked: usize,
    pub available: usize,
    pub elapsed: Duration,
}

pub struct Monitor {
    pub config: MonitorConfig,
    pub state: Arc<MonitorState>,
    http_client: reqwest::Client,
    concurrency_limiter: Arc<Semaphore>,
    completed_cycles: AtomicU64,
}

impl Monitor {
    pub fn new(config: MonitorConfig, state: Arc<MonitorState>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;
        let max_concurrent = config.max_concurrency.max(1);

        Ok(Self {
            config,
            state,
            http_client,
            concurrency_limiter: Arc::new(Semaphore::new(max_concurrent)),
            completed_cycles: AtomicU64::new(0),
        })
    }

    /// Checks every site once per interval, forever. The first pass starts immediately.
    pub async fn run(self: Arc<Self>) {
        info!(
            sites = self.state.sites.len(),
            interval_secs = self.config.check_interval().as_secs(),
            max_concurrency = self.config.max_concurrency,
            "Site monitor started"
        );

        let mut timer = tokio::time::interval(self.config.check_interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            timer.tick().await;
            let summary = self.check_all().await;
            let cycle = self.completed_cycles.fetch_add(1, Ordering::Relaxed) + 1;
            info!(
                cycle,
                checked = summary.checked,
                available = summary.available,
                "Check cycle completed in {:.2}s",
                summary.elapsed.as_secs_f64()
            );
        }
    }

    /// Number of check cycles `run` has finished.
    pub fn completed_cycles(&self) -> u64 {
        self.completed_cycles.load(Ordering::Relaxed)
    }

    /// One tick: every site is checked once, at most `max_concurrency` at a time.
    /// Returns when all checks launched by this tick have finished.
    pub async fn check_all(self: &Arc<Self>) -> TickSummary {
        let start = Instant::now();
        let mut tasks = FuturesUnordered::new();

        for slot in &self.state.sites {
            let Ok(permit) = Arc::clone(&self.concurrency_limiter).acquire_owned().await else {
                error!("Concurrency limiter closed; aborting check cycle");
                break;
            };
            let monitor = Arc::clone(self);
            let slot = Arc::clone(slot);
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                monitor.check_site(&slot).await
            }));
        }

        let mut checked = 0;
        let mut available = 0;
        while let Some(joined) = tasks.next().await {
            match joined {
                Ok(outcome) => {
                    checked += 1;
                    if outcome.available {
                        available += 1;
                    }
                }
                Err(e) => error!("Check task failed: {}", e),
            }
        }

        TickSummary { checked, available, elapsed: start.elapsed() }
    }

    /// Probes one site and stores the outcome on its record in a single write.
    pub async fn check_site(&self, slot: &SiteSlot) -> CheckOutcome {
        let outcome = match self.probe(slot.url()).await {
            Ok(latency) => {
                debug!(site = slot.url(), latency = %format_latency(latency), "Site up");
                CheckOutcome::up(latency)
            }
            Err(e) => {
                warn!(site = slot.url(), error = %e, "Site check failed");
                CheckOutcome::down()
            }
        };
        slot.apply(outcome).await;
        outcome
    }

    /// Single GET without retries. The body is never read; dropping the response releases it.
    async fn probe(&self, url: &str) -> Result<Duration, CheckError> {
        let start = Instant::now();
        let request = self.http_client.get(url).send();

        let response = match self.config.check_timeout() {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| CheckError::Timeout(limit))??,
            None => request.await?,
        };
        let latency = start.elapsed();
        drop(response);

        Ok(latency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UNREACHABLE_LATENCY;
    use axum::extract::State;
    use axum::Router;
    use chrono::Utc;
    use std::net::SocketAddr;
    use std::sync::atomic::AtomicUsize;
    use tokio::net::TcpListener;
    use tokio::sync::watch;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn monitor_for(urls: Vec<String>, max_concurrency: usize, check_timeout_ms: u64) -> Arc<Monitor> {
        let config = MonitorConfig {
            max_concurrency,
            check_timeout_ms,
            ..MonitorConfig::default()
        };
        let state = Arc::new(MonitorState::new(urls));
        Arc::new(Monitor::new(config, state).unwrap())
    }

    async fn mock_with(template: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(template).mount(&server).await;
        server
    }

    async fn refused_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn successful_check_marks_site_available() {
        let server = mock_with(ResponseTemplate::new(200).set_body_string("ignored")).await;
        let monitor = monitor_for(vec![server.uri()], 2, 5_000);
        let before = Utc::now();

        let outcome = monitor.check_site(&monitor.state.sites[0]).await;

        let record = monitor.state.sites[0].snapshot().await;
        assert!(outcome.available);
        assert!(record.available);
        assert_ne!(record.latency, UNREACHABLE_LATENCY);
        assert!(record.latency < Duration::from_secs(5));
        assert!(record.last_checked_at.unwrap() >= before);
    }

    #[tokio::test]
    async fn server_error_status_still_counts_as_available() {
        let server = mock_with(ResponseTemplate::new(503)).await;
        let monitor = monitor_for(vec![server.uri()], 1, 5_000);

        monitor.check_site(&monitor.state.sites[0]).await;

        assert!(monitor.state.sites[0].snapshot().await.available);
    }

    #[tokio::test]
    async fn refused_connection_records_sentinel() {
        let monitor = monitor_for(vec![refused_url().await], 1, 5_000);
        let before = Utc::now();

        monitor.check_site(&monitor.state.sites[0]).await;

        let record = monitor.state.sites[0].snapshot().await;
        assert!(!record.available);
        assert_eq!(record.latency, UNREACHABLE_LATENCY);
        assert!(record.last_checked_at.unwrap() >= before);
    }

    #[tokio::test]
    async fn malformed_url_is_a_failed_check() {
        let monitor = monitor_for(vec!["not a url".to_string()], 1, 5_000);

        monitor.check_site(&monitor.state.sites[0]).await;

        let record = monitor.state.sites[0].snapshot().await;
        assert!(!record.available);
        assert_eq!(record.latency, UNREACHABLE_LATENCY);
    }

    #[tokio::test]
    async fn stalled_site_fails_after_check_timeout() {
        let server = mock_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30))).await;
        let monitor = monitor_for(vec![server.uri()], 1, 200);
        let start = Instant::now();

        monitor.check_site(&monitor.state.sites[0]).await;

        assert!(start.elapsed() < Duration::from_secs(10));
        let record = monitor.state.sites[0].snapshot().await;
        assert!(!record.available);
        assert_eq!(record.latency, UNREACHABLE_LATENCY);
    }

    #[tokio::test]
    async fn tick_checks_every_site_and_stamps_them() {
        let up = mock_with(ResponseTemplate::new(200)).await;
        let stalled = mock_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30))).await;
        let urls = vec![up.uri(), refused_url().await, stalled.uri()];
        let monitor = monitor_for(urls, 3, 300);
        let tick_start = Utc::now();

        let summary = monitor.check_all().await;

        assert_eq!(summary.checked, 3);
        assert_eq!(summary.available, 1);
        let records = monitor.state.snapshot().await;
        assert!(records.iter().all(|r| r.last_checked_at.unwrap() >= tick_start));
        assert!(records[0].available);
        assert!(!records[1].available);
        assert_eq!(records[1].latency, UNREACHABLE_LATENCY);
        assert!(!records[2].available);
    }

    #[derive(Clone)]
    struct Gate {
        open: watch::Receiver<bool>,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    async fn gated(State(gate): State<Gate>) -> &'static str {
        let now = gate.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        gate.peak.fetch_max(now, Ordering::SeqCst);
        let mut open = gate.open.clone();
        let _ = open.wait_for(|open| *open).await;
        gate.in_flight.fetch_sub(1, Ordering::SeqCst);
        "ok"
    }

    async fn start_gated_server(gate: Gate) -> SocketAddr {
        let app = Router::new().fallback(gated).with_state(gate);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_flight_checks_never_exceed_concurrency_cap() {
        const CAP: usize = 2;
        const SITES: usize = 6;

        let (open_tx, open_rx) = watch::channel(false);
        let gate = Gate {
            open: open_rx,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        };
        let addr = start_gated_server(gate.clone()).await;
        let urls = (0..SITES).map(|i| format!("http://{}/site/{}", addr, i)).collect();
        let monitor = monitor_for(urls, CAP, 0);

        let tick = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            async move { monitor.check_all().await }
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            while gate.in_flight.load(Ordering::SeqCst) < CAP {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("checks never reached the cap");

        // Give any extra (wrongly admitted) request time to arrive.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(gate.in_flight.load(Ordering::SeqCst), CAP);

        open_tx.send(true).unwrap();
        let summary = tick.await.unwrap();

        assert_eq!(summary.checked, SITES);
        assert_eq!(summary.available, SITES);
        assert_eq!(gate.peak.load(Ordering::SeqCst), CAP);
    }

    async fn settle_until(monitor: &Monitor, cycles: u64) {
        for _ in 0..1_000 {
            if monitor.completed_cycles() >= cycles {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected {} cycles, saw {}", cycles, monitor.completed_cycles());
    }

    #[tokio::test(start_paused = true)]
    async fn run_checks_at_start_then_once_per_interval() {
        // Unparseable url: the check fails without touching the network.
        let monitor = monitor_for(vec!["not a url".to_string()], 1, 0);
        let interval = monitor.config.check_interval();
        tokio::spawn(Arc::clone(&monitor).run());

        settle_until(&monitor, 1).await;
        assert!(monitor.state.sites[0].snapshot().await.last_checked_at.is_some());

        tokio::time::advance(interval - Duration::from_secs(1)).await;
        for _ in 0..100 {
            tokio::task::yield_now().await;
        }
        assert_eq!(monitor.completed_cycles(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        settle_until(&monitor, 2).await;
        assert_eq!(monitor.completed_cycles(), 2);
    }
}
