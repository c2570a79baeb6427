//! Server configuration.

use serde::Deserialize;

/// Which [`TaskStore`](crate::store::TaskStore) backs the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Postgres,
    Memory,
}

/// Server configuration loaded from environment variables.
///
/// Environment variables are prefixed with `SHOTDIFF_`:
/// - `SHOTDIFF_HOST`: Bind address (default: "0.0.0.0")
/// - `SHOTDIFF_PORT`: Port (default: 8082)
/// - `SHOTDIFF_STORE`: `postgres` or `memory` (default: postgres)
/// - `SHOTDIFF_INIT_SCHEMA`: Create tables at startup (default: false)
/// - `SHOTDIFF_SERVER_NAME`: Name reported by health checks
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub store: StoreKind,

    #[serde(default)]
    pub init_schema: bool,

    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Upper bound on `count` for a single lease request
    #[serde(default = "default_max_lease_count")]
    pub max_lease_count: u32,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_server_name() -> String {
    "shotdiff-queue".to_string()
}

fn default_max_lease_count() -> u32 {
    100
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("SHOTDIFF_").from_env::<AppConfig>()
    }

    /// Address suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            store: StoreKind::default(),
            init_schema: false,
            server_name: default_server_name(),
            max_lease_count: default_max_lease_count(),
        }
    }
}
