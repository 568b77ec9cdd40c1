use std::time::Duration;

use crate::jobs::QueueConfig;

/// Runtime configuration for the worker process and operator tooling.
///
/// Every key is read as `NOTIFYQ_<KEY>` first and falls back to the bare `<KEY>`.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub worker_index: u32,
    pub worker_count: u32,
    pub wait_max_ms: u64,
    /// 0 disables per-job heartbeats.
    pub heartbeat_ms: u64,
    pub lease_seconds: u64,
    pub reap_interval_ms: u64,
    pub gauge_interval_ms: u64,
    pub migrate_on_startup: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env_or_fallback("NOTIFYQ_DATABASE_URL", "DATABASE_URL")
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let worker_index = env_parse("NOTIFYQ_WORKER_INDEX", "WORKER_INDEX").unwrap_or(0);

        let worker_count = env_parse::<u32>("NOTIFYQ_WORKER_COUNT", "WORKER_COUNT")
            .unwrap_or(1)
            .clamp(1, 64);

        let wait_max_ms = env_parse("NOTIFYQ_WAIT_MAX_MS", "WAIT_MAX_MS").unwrap_or(5_000);

        let heartbeat_ms = env_parse("NOTIFYQ_HEARTBEAT_MS", "HEARTBEAT_MS").unwrap_or(10_000);

        let lease_seconds = env_parse("NOTIFYQ_LEASE_SECONDS", "LEASE_SECONDS").unwrap_or(60);

        let reap_interval_ms =
            env_parse("NOTIFYQ_REAP_INTERVAL_MS", "REAP_INTERVAL_MS").unwrap_or(30_000);

        let gauge_interval_ms =
            env_parse("NOTIFYQ_GAUGE_INTERVAL_MS", "GAUGE_INTERVAL_MS").unwrap_or(60_000);

        let migrate_on_startup = env_or_fallback("NOTIFYQ_MIGRATE_ON_STARTUP", "MIGRATE_ON_STARTUP")
            .map(|v| parse_bool(&v))
            .unwrap_or(false);

        let cfg = Self {
            database_url,
            worker_index,
            worker_count,
            wait_max_ms,
            heartbeat_ms,
            lease_seconds,
            reap_interval_ms,
            gauge_interval_ms,
            migrate_on_startup,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// A heartbeat slower than the lease would let the reaper steal live claims.
    pub fn validate(&self) -> anyhow::Result<()> {
        let lease_ms = self.lease_seconds.saturating_mul(1_000);
        if self.heartbeat_ms > 0 && self.heartbeat_ms >= lease_ms {
            anyhow::bail!(
                "HEARTBEAT_MS ({}) must be shorter than LEASE_SECONDS ({}s)",
                self.heartbeat_ms,
                self.lease_seconds
            );
        }
        if self.reap_interval_ms == 0 {
            anyhow::bail!("REAP_INTERVAL_MS must be positive");
        }
        Ok(())
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            wait_max_duration: Duration::from_millis(self.wait_max_ms),
        }
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_ms > 0).then(|| Duration::from_millis(self.heartbeat_ms))
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_seconds)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    pub fn gauge_interval(&self) -> Duration {
        Duration::from_millis(self.gauge_interval_ms)
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_parse<T: std::str::FromStr>(primary: &str, fallback: &str) -> Option<T> {
    env_or_fallback(primary, fallback).and_then(|s| s.trim().parse().ok())
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
