use std::time::Duration;

pub struct Config {
    pub config_path: String,
    pub workers: u32,
    pub probe_interval: Duration,
    pub status_interval: Duration,
    pub request_timeout: Duration,
    pub log_format: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let config_path =
            std::env::var("RK_CONFIG_PATH").unwrap_or_else(|_| "./ratekeeper.json".into());
        let workers: u32 = std::env::var("RK_WORKERS")
            .unwrap_or_else(|_| "2".into())
            .parse()
            .unwrap_or(2);
        let probe_ms: u64 = std::env::var("RK_PROBE_INTERVAL_MS")
            .unwrap_or_else(|_| "15000".into())
            .parse()
            .unwrap_or(15_000);
        let status_secs: u64 = std::env::var("RK_STATUS_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".into())
            .parse()
            .unwrap_or(60);
        let timeout_ms: u64 = std::env::var("RK_REQUEST_TIMEOUT_MS")
            .unwrap_or_else(|_| "10000".into())
            .parse()
            .unwrap_or(10_000);
        let log_format = std::env::var("RK_LOG_FORMAT").unwrap_or_else(|_| "text".into());
        Self {
            config_path,
            workers: workers.max(1),
            probe_interval: Duration::from_millis(probe_ms.max(1)),
            status_interval: Duration::from_secs(status_secs.max(1)),
            request_timeout: Duration::from_millis(timeout_ms),
            log_format,
        }
    }
}
