//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development (a PostgreSQL instance on localhost
//! is still required).

use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// PostgreSQL connection string.  The same database backs the message
    /// store and the cross-process fan-out relay.
    /// Env: `DATABASE_URL`
    /// Default: `postgres://localhost/voyago`
    pub database_url: String,

    /// Allowed CORS origins, comma-separated.  Empty means any origin.
    /// Env: `CORS_ORIGINS`
    /// Default: empty
    pub cors_origins: Vec<String>,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Voyago Node"`
    pub instance_name: String,

    /// NOTIFY channel name shared by all processes of one deployment.
    /// Env: `FANOUT_CHANNEL`
    /// Default: `voyago_events`
    pub fanout_channel: String,

    /// Filesystem path where message attachments are stored.
    /// Env: `UPLOADS_DIR`
    /// Default: `./uploads`
    pub uploads_dir: PathBuf,

    /// Maximum multipart upload size in bytes (25 MiB).
    /// Env: `MAX_UPLOAD_SIZE`
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            database_url: "postgres://localhost/voyago".to_string(),
            cors_origins: Vec::new(),
            instance_name: "Voyago Node".to_string(),
            fanout_channel: "voyago_events".to_string(),
            uploads_dir: PathBuf::from("./uploads"),
            max_upload_size: 25 * 1024 * 1024, // 25 MiB
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        if let Ok(origins) = std::env::var("CORS_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Ok(channel) = std::env::var("FANOUT_CHANNEL") {
            if !channel.is_empty() {
                config.fanout_channel = channel;
            }
        }

        if let Ok(path) = std::env::var("UPLOADS_DIR") {
            config.uploads_dir = PathBuf::from(path);
        }

        if let Ok(val) = std::env::var("MAX_UPLOAD_SIZE") {
            if let Ok(n) = val.parse::<usize>() {
                config.max_upload_size = n;
            } else {
                tracing::warn!(value = %val, "Invalid MAX_UPLOAD_SIZE, using default");
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.fanout_channel, "voyago_events");
        assert!(config.cors_origins.is_empty());
    }
}
