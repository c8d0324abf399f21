//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};

/// Media-server client settings and loop timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Client name registered with the media server.
    /// Default: patchwork
    #[serde(default = "ServerConfig::default_client_name")]
    pub client_name: String,

    /// Sleep between background loop ticks, in milliseconds.
    /// Default: 100
    #[serde(default = "ServerConfig::default_refresh_ms")]
    pub refresh_ms: u64,

    /// Interval of the fingerprint-gated MIDI device poll, in milliseconds.
    /// Default: 2000
    #[serde(default = "ServerConfig::default_device_poll_ms")]
    pub device_poll_ms: u64,
}

impl ServerConfig {
    fn default_client_name() -> String {
        "patchwork".to_string()
    }

    fn default_refresh_ms() -> u64 {
        100
    }

    fn default_device_poll_ms() -> u64 {
        2000
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            client_name: Self::default_client_name(),
            refresh_ms: Self::default_refresh_ms(),
            device_poll_ms: Self::default_device_poll_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// All infrastructure configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfraConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}
