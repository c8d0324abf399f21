//! Configuration loading for the patchwork autoconnect service.
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): media-server client name, loop
//!   timing, log level. Fixed for the lifetime of the process.
//!
//! - **Bootstrap** (`BootstrapConfig`): the initial MIDI routing policy.
//!   After startup the running service owns it and the UI edits it.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, key by key):
//! 1. `/etc/patchwork/config.toml` (system)
//! 2. `~/.config/patchwork/config.toml` (user)
//! 3. `./patchwork.toml` (local override, or an explicit path)
//! 4. Environment variables (`PATCHWORK_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [server]
//! client_name = "patchwork"
//! refresh_ms = 100
//! device_poll_ms = 2000
//!
//! [telemetry]
//! log_level = "info"
//!
//! [bootstrap.routing]
//! enabled_midi_out_ports = ["DIN-5 MIDI-OUT"]
//! disabled_midi_in_ports = []
//! enabled_midi_fb_ports = ["Launchpad Mini"]
//! midi_thru = false
//! midi_network = true
//! ```

pub mod bootstrap;
pub mod infra;
pub mod loader;

pub use bootstrap::{BootstrapConfig, RoutingConfig};
pub use infra::{InfraConfig, ServerConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete patchwork configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchConfig {
    /// Infrastructure - cannot change at runtime.
    #[serde(flatten)]
    pub infra: InfraConfig,

    /// Bootstrap - seeds runtime state.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl PatchConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace the local
    /// `./patchwork.toml` override.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars were applied.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = PatchConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::apply_file(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.infra.server.refresh_ms.max(1))
    }

    pub fn device_poll_interval(&self) -> Duration {
        Duration::from_millis(self.infra.server.device_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PatchConfig::default();
        assert_eq!(config.infra.server.client_name, "patchwork");
        assert_eq!(config.refresh_interval(), Duration::from_millis(100));
        assert_eq!(config.device_poll_interval(), Duration::from_secs(2));
        assert!(config.bootstrap.routing.enabled_midi_out_ports.is_empty());
    }

    #[test]
    fn test_zero_refresh_is_clamped() {
        let mut config = PatchConfig::default();
        config.infra.server.refresh_ms = 0;
        assert_eq!(config.refresh_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patchwork.toml");
        std::fs::write(
            &path,
            r#"
[server]
refresh_ms = 50

[bootstrap.routing]
midi_network = true
"#,
        )
        .unwrap();

        let (config, sources) = PatchConfig::load_with_sources_from(Some(&path)).unwrap();
        assert_eq!(config.infra.server.refresh_ms, 50);
        assert!(config.bootstrap.routing.midi_network);
        assert!(sources.files.contains(&path));
    }
}
