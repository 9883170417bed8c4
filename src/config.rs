use crate::samples::MIN_HISTORY_LENGTH;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub connections: ConnectionsConfig,
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    pub publishing: PublishingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionsConfig {
    /// Backend URIs opened at startup (e.g. "mock:///demo").
    pub uris: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub poll_interval_ms: u64,
    /// Samples retained per entity ring.
    #[serde(default = "default_history_length")]
    pub history_length: usize,
    /// How often to log app stats (ticks, events, ws clients) at INFO level.
    pub stats_log_interval_secs: u64,
}

fn default_history_length() -> usize {
    120
}

/// Independent enable flags per metric category. Disabling a category stops
/// new sampling for it without discarding history already collected for the
/// others.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enable_cpu: bool,
    #[serde(default = "default_true")]
    pub enable_mem: bool,
    #[serde(default = "default_true")]
    pub enable_disk: bool,
    #[serde(default = "default_true")]
    pub enable_net: bool,
}

fn default_true() -> bool {
    true
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enable_cpu: true,
            enable_mem: true,
            enable_disk: true,
            enable_net: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishingConfig {
    /// Max number of event envelopes kept in the broadcast channel for
    /// /ws/events (slow clients may lag).
    pub broadcast_capacity: usize,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.connections.uris.is_empty(),
            "connections.uris must name at least one backend URI"
        );
        anyhow::ensure!(
            self.monitoring.poll_interval_ms > 0,
            "monitoring.poll_interval_ms must be > 0, got {}",
            self.monitoring.poll_interval_ms
        );
        anyhow::ensure!(
            self.monitoring.history_length >= MIN_HISTORY_LENGTH,
            "monitoring.history_length must be >= {}, got {}",
            MIN_HISTORY_LENGTH,
            self.monitoring.history_length
        );
        anyhow::ensure!(
            self.monitoring.stats_log_interval_secs > 0,
            "monitoring.stats_log_interval_secs must be > 0, got {}",
            self.monitoring.stats_log_interval_secs
        );
        anyhow::ensure!(
            self.publishing.broadcast_capacity > 0,
            "publishing.broadcast_capacity must be > 0, got {}",
            self.publishing.broadcast_capacity
        );
        Ok(())
    }
}
