use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use unrest_sparql::{RetryPolicy, SparqlClientConfig};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// SPARQL endpoint and retry schedule
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Response cache
    #[serde(default)]
    pub cache: CacheConfig,
    /// Live change feed driving cache invalidation
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        // Upstream validations
        if self.upstream.endpoint.trim().is_empty() {
            return Err("upstream.endpoint must not be empty".into());
        }
        if self.upstream.backoff_ms.is_empty() {
            return Err("upstream.backoff_ms must contain at least one delay".into());
        }
        if !(0.0..1.0).contains(&self.upstream.jitter) {
            return Err("upstream.jitter must be in [0, 1)".into());
        }
        if self.upstream.attempt_timeout_ms == 0 {
            return Err("upstream.attempt_timeout_ms must be > 0".into());
        }
        // Cache validations
        if self.cache.ttl_secs == 0 {
            return Err("cache.ttl_secs must be > 0".into());
        }
        if self.cache.namespace.trim().is_empty() {
            return Err("cache.namespace must not be empty".into());
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err("cache.sweep_interval_secs must be > 0".into());
        }
        // Stream validations
        if self.stream.flush_interval_secs == 0 {
            return Err("stream.flush_interval_secs must be > 0".into());
        }
        if self.stream.backoff_base_ms == 0 {
            return Err("stream.backoff_base_ms must be > 0".into());
        }
        if self.stream.backoff_base_ms > self.stream.backoff_max_ms {
            return Err("stream.backoff_base_ms must be <= stream.backoff_max_ms".into());
        }
        if self.stream.idle_timeout_secs == 0 {
            return Err("stream.idle_timeout_secs must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Descriptive client identifier; the public endpoint throttles generic agents.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Delay before each retry; attempts = len + 1
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_endpoint() -> String {
    unrest_sparql::client::DEFAULT_ENDPOINT.into()
}
fn default_user_agent() -> String {
    SparqlClientConfig::default().user_agent
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_attempt_timeout_ms() -> u64 {
    20_000
}
fn default_backoff_ms() -> Vec<u64> {
    vec![500, 1_500, 3_500]
}
fn default_jitter() -> f64 {
    0.2
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            user_agent: default_user_agent(),
            connect_timeout_ms: default_connect_timeout_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            backoff_ms: default_backoff_ms(),
            jitter: default_jitter(),
        }
    }
}

impl UpstreamConfig {
    pub fn client_config(&self) -> SparqlClientConfig {
        SparqlClientConfig {
            endpoint: self.endpoint.clone(),
            user_agent: self.user_agent.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            retry: RetryPolicy {
                backoff: self
                    .backoff_ms
                    .iter()
                    .copied()
                    .map(Duration::from_millis)
                    .collect(),
                jitter: self.jitter,
                attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// SQLite file; parent directory is created on startup
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_namespace")]
    pub namespace: String,
    /// How often expired entries are swept from the store
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("data/cache.sqlite")
}
fn default_cache_ttl() -> u64 {
    600
}
fn default_cache_namespace() -> String {
    "events".into()
}
fn default_sweep_interval() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            ttl_secs: default_cache_ttl(),
            namespace: default_cache_namespace(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_stream_enabled")]
    pub enabled: bool,
    #[serde(default = "default_stream_url")]
    pub url: String,
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
    /// Reconnect when no event arrives for this long
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_stream_enabled() -> bool {
    true
}
fn default_stream_url() -> String {
    "https://stream.wikimedia.org/v2/stream/recentchange".into()
}
fn default_flush_interval() -> u64 {
    60
}
fn default_backoff_base() -> u64 {
    1_000
}
fn default_backoff_max() -> u64 {
    30_000
}
fn default_idle_timeout() -> u64 {
    90
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: default_stream_enabled(),
            url: default_stream_url(),
            flush_interval_secs: default_flush_interval(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "unrest.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., UNREST__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("UNREST")
                .prefix_separator("__")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("upstream.backoff_ms"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
