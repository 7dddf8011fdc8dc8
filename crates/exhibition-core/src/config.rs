use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::schema::MetricSchema;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_CLIENT_QUEUE: usize = 16; // per-session outbound frames before a client counts as stalled
pub const DEFAULT_GRACE_SECS: u64 = 5;
pub const DEFAULT_CONFIG_FILE: &str = "exhibition.toml";
pub const WS_ENDPOINT: &str = "/ws/exhibition";

/// Environment variables understood by earlier deployments, mapped onto
/// their nested config keys.
const LEGACY_ENV: [(&str, &str); 4] = [
    ("EXHIBITION_PORT", "gateway.port"),
    ("SCHED_SECONDS", "broadcast.interval_secs"),
    ("EXHIBITION_CONTENT_PATH", "gateway.path_prefix"),
    ("EXHIBITION_DB_PATH", "database.path"),
];

/// Top-level config (exhibition.toml + EXHIBITION_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExhibitionConfig {
    pub gateway: GatewayConfig,
    pub database: DatabaseConfig,
    pub broadcast: BroadcastConfig,
    pub metrics: MetricSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub port: u16,
    pub bind: String,
    /// Mounted in front of both the dashboard and the WS endpoint, e.g. `/screen`.
    pub path_prefix: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            path_prefix: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    /// Upper bound for a single query. Unset means queries may stall a cycle.
    pub query_timeout_secs: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "exhibition.db".to_string(),
            query_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub interval_secs: u64,
    pub client_queue: usize,
    pub shutdown_grace_secs: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
            client_queue: DEFAULT_CLIENT_QUEUE,
            shutdown_grace_secs: DEFAULT_GRACE_SECS,
        }
    }
}

impl DatabaseConfig {
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_secs.map(Duration::from_secs)
    }
}

impl BroadcastConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl GatewayConfig {
    /// Normalised prefix: empty, or a leading slash and no trailing slash.
    pub fn prefix(&self) -> String {
        let trimmed = self.path_prefix.trim().trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        }
    }

    /// Route of the dashboard page.
    pub fn index_path(&self) -> String {
        format!("{}/", self.prefix())
    }

    /// Route of the real-time endpoint.
    pub fn ws_path(&self) -> String {
        format!("{}{}", self.prefix(), WS_ENDPOINT)
    }
}

impl ExhibitionConfig {
    /// Load config from a TOML file with environment overrides.
    ///
    /// Precedence, lowest first:
    ///   1. built-in defaults
    ///   2. the TOML file (explicit path, else `./exhibition.toml`; a missing file is skipped)
    ///   3. legacy variables (`EXHIBITION_PORT`, `SCHED_SECONDS`, ...)
    ///   4. `EXHIBITION_<SECTION>__<KEY>`, e.g. `EXHIBITION_BROADCAST__INTERVAL_SECS=10`
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or(DEFAULT_CONFIG_FILE);

        let config: ExhibitionConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(legacy_env())
            .merge(Env::prefixed("EXHIBITION_").split("__"))
            .extract()
            .map_err(|e| crate::error::ExhibitionError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::ExhibitionError;

        if self.broadcast.interval_secs == 0 {
            return Err(ExhibitionError::Config(
                "broadcast.interval_secs must be greater than zero".into(),
            ));
        }
        if self.broadcast.client_queue == 0 {
            return Err(ExhibitionError::Config(
                "broadcast.client_queue must be greater than zero".into(),
            ));
        }
        if self.database.query_timeout_secs == Some(0) {
            return Err(ExhibitionError::Config(
                "database.query_timeout_secs must be greater than zero when set".into(),
            ));
        }
        self.metrics.validate()
    }
}

fn legacy_env() -> Env {
    let names: Vec<&str> = LEGACY_ENV.iter().map(|(name, _)| *name).collect();
    Env::raw().only(&names).map(|key| {
        LEGACY_ENV
            .iter()
            .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
            .map(|(_, path)| (*path).into())
            .unwrap_or_else(|| key.as_str().to_string().into())
    })
}
