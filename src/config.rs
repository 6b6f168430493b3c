use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Sites probed by the monitor. Fixed at build time.
pub const DEFAULT_SITES: &[&str] = &[
    "https://google.com",
    "https://youtube.com",
    "https://facebook.com",
    "https://wikipedia.org",
    "https://qq.com",
    "https://taobao.com",
    "https://yahoo.com",
    "https://tmall.com",
    "https://amazon.com",
    "https://google.co.in",
    "https://twitter.com",
    "https://sohu.com",
    "https://jd.com",
    "https://live.com",
    "https://instagram.com",
    "https://sina.com.cn",
    "https://weibo.com",
    "https://google.co.jp",
    "https://reddit.com",
    "https://vk.com",
    "https://login.tmall.com",
    "https://blogspot.com",
    "https://yandex.ru",
    "https://netflix.com",
];

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// 0 disables the per-check timeout.
    #[serde(default = "default_check_timeout_ms")]
    pub check_timeout_ms: u64,
}

fn default_check_interval() -> u64 { 60 }
fn default_api_port() -> u16 { 8080 }
fn default_check_timeout_ms() -> u64 { 30_000 }

fn default_max_concurrency() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            api_port: default_api_port(),
            max_concurrency: default_max_concurrency(),
            check_timeout_ms: default_check_timeout_ms(),
        }
    }
}

impl MonitorConfig {
    /// Reads a JSON config file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let mut config: MonitorConfig = serde_json::from_str(content)?;
        config.max_concurrency = config.max_concurrency.max(1);
        Ok(config)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval.max(1))
    }

    pub fn check_timeout(&self) -> Option<Duration> {
        (self.check_timeout_ms > 0).then(|| Duration::from_millis(self.check_timeout_ms))
    }
}
