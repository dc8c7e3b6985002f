//! Gateway configuration.
//!
//! All environment parsing happens here at the edge; the storage and
//! resolver crates take plain config structs.

use std::path::PathBuf;

use beacon_storage::StoreConfig;

// ============================================================================
// GATEWAY CONFIGURATION
// ============================================================================

/// Top-level configuration for the gateway process.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to bind the HTTP listener on.
    pub bind_host: String,

    /// Port to bind the HTTP listener on.
    pub bind_port: u16,

    /// Directory for the LMDB record store.
    pub store_path: PathBuf,

    /// LMDB map size in megabytes.
    pub store_map_size_mb: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            bind_port: 3000,
            store_path: PathBuf::from("./beacon-data"),
            store_map_size_mb: 512,
        }
    }
}

impl GatewayConfig {
    /// Create GatewayConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `BEACON_BIND`: Bind host (default: 0.0.0.0)
    /// - `PORT` / `BEACON_PORT`: Bind port (default: 3000)
    /// - `BEACON_STORE_PATH`: LMDB directory (default: ./beacon-data)
    /// - `BEACON_STORE_MAP_SIZE_MB`: LMDB map size (default: 512)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind_host = std::env::var("BEACON_BIND").unwrap_or(defaults.bind_host);

        let bind_port = std::env::var("PORT")
            .ok()
            .or_else(|| std::env::var("BEACON_PORT").ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.bind_port);

        let store_path = std::env::var("BEACON_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.store_path);

        let store_map_size_mb = std::env::var("BEACON_STORE_MAP_SIZE_MB")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.store_map_size_mb);

        Self {
            bind_host,
            bind_port,
            store_path,
            store_map_size_mb,
        }
    }

    /// The storage config this gateway opens its store with.
    pub fn store_config(&self) -> StoreConfig {
        let mut config = StoreConfig::new(self.store_path.clone());
        config.map_size_mb = self.store_map_size_mb;
        config
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }
}
