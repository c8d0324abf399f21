//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, PatchConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with an explicit override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns existing paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/patchwork/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("patchwork/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("patchwork.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file and overlay the keys it sets onto `config`.
pub fn apply_file(config: &mut PatchConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    apply_toml(config, &contents, path)
}

/// Overlay keys present in `contents`; absent keys keep their current value.
fn apply_toml(config: &mut PatchConfig, contents: &str, path: &Path) -> Result<(), ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    if let Some(server) = table.get("server").and_then(|v| v.as_table()) {
        if let Some(v) = server.get("client_name").and_then(|v| v.as_str()) {
            config.infra.server.client_name = v.to_string();
        }
        if let Some(v) = server.get("refresh_ms").and_then(|v| v.as_integer()) {
            config.infra.server.refresh_ms = non_negative(v, "server.refresh_ms", path)?;
        }
        if let Some(v) = server.get("device_poll_ms").and_then(|v| v.as_integer()) {
            config.infra.server.device_poll_ms = non_negative(v, "server.device_poll_ms", path)?;
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.infra.telemetry.log_level = v.to_string();
        }
    }

    let routing_table = table
        .get("bootstrap")
        .and_then(|v| v.get("routing"))
        .and_then(|v| v.as_table());
    if let Some(routing) = routing_table {
        let target = &mut config.bootstrap.routing;
        if let Some(list) = string_list(routing, "enabled_midi_out_ports") {
            target.enabled_midi_out_ports = list;
        }
        if let Some(list) = string_list(routing, "disabled_midi_in_ports") {
            target.disabled_midi_in_ports = list;
        }
        if let Some(list) = string_list(routing, "enabled_midi_fb_ports") {
            target.enabled_midi_fb_ports = list;
        }
        for (key, flag) in [
            ("midi_thru", &mut target.midi_thru),
            ("midi_network", &mut target.midi_network),
            ("midi_rtpmidi", &mut target.midi_rtpmidi),
            ("midi_touchosc", &mut target.midi_touchosc),
            ("midi_aubionotes", &mut target.midi_aubionotes),
        ] {
            if let Some(v) = routing.get(key).and_then(|v| v.as_bool()) {
                *flag = v;
            }
        }
    }

    Ok(())
}

fn non_negative(value: i64, key: &str, path: &Path) -> Result<u64, ConfigError> {
    u64::try_from(value).map_err(|_| ConfigError::Parse {
        path: path.to_path_buf(),
        message: format!("{} must not be negative (got {})", key, value),
    })
}

fn string_list(table: &toml::Table, key: &str) -> Option<Vec<String>> {
    table.get(key).and_then(|v| v.as_array()).map(|items| {
        items
            .iter()
            .filter_map(|v| v.as_str())
            .map(String::from)
            .collect()
    })
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut PatchConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("PATCHWORK_CLIENT_NAME") {
        config.infra.server.client_name = v;
        sources.env_overrides.push("PATCHWORK_CLIENT_NAME".to_string());
    }
    if let Ok(v) = env::var("PATCHWORK_REFRESH_MS") {
        if let Ok(ms) = v.parse() {
            config.infra.server.refresh_ms = ms;
            sources.env_overrides.push("PATCHWORK_REFRESH_MS".to_string());
        }
    }
    if let Ok(v) = env::var("PATCHWORK_DEVICE_POLL_MS") {
        if let Ok(ms) = v.parse() {
            config.infra.server.device_poll_ms = ms;
            sources.env_overrides.push("PATCHWORK_DEVICE_POLL_MS".to_string());
        }
    }

    if let Ok(v) = env::var("PATCHWORK_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("PATCHWORK_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Ok(v) = env::var("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(contents: &str) -> Result<PatchConfig, ConfigError> {
        let mut config = PatchConfig::default();
        apply_toml(&mut config, contents, Path::new("test.toml"))?;
        Ok(config)
    }

    #[test]
    fn test_discover_config_files() {
        // Just verify it doesn't panic
        let _files = discover_config_files();
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = parse(
            r#"
[telemetry]
log_level = "debug"
"#,
        )
        .unwrap();
        assert_eq!(config.infra.telemetry.log_level, "debug");
        assert_eq!(config.infra.server.refresh_ms, 100);
    }

    #[test]
    fn test_parse_full_toml() {
        let config = parse(
            r#"
[server]
client_name = "studio"
refresh_ms = 20
device_poll_ms = 500

[bootstrap.routing]
enabled_midi_out_ports = ["DIN-5 MIDI-OUT", "USB_MIDI-OUT"]
disabled_midi_in_ports = ["Keystep Pro"]
enabled_midi_fb_ports = ["Launchpad Mini"]
midi_thru = true
midi_rtpmidi = true
midi_aubionotes = true
"#,
        )
        .unwrap();

        assert_eq!(config.infra.server.client_name, "studio");
        assert_eq!(config.infra.server.refresh_ms, 20);
        assert_eq!(config.infra.server.device_poll_ms, 500);

        let routing = &config.bootstrap.routing;
        assert_eq!(routing.enabled_midi_out_ports.len(), 2);
        assert!(routing.is_input_disabled("Keystep Pro"));
        assert!(routing.is_feedback_enabled("Launchpad Mini"));
        assert!(routing.midi_thru);
        assert!(routing.midi_rtpmidi);
        assert!(routing.midi_aubionotes);
        assert!(!routing.midi_network);
    }

    #[test]
    fn test_later_file_overlays_only_its_keys() {
        let mut config = PatchConfig::default();
        apply_toml(
            &mut config,
            "[server]\nclient_name = \"system-wide\"\nrefresh_ms = 10\n",
            Path::new("system.toml"),
        )
        .unwrap();
        apply_toml(&mut config, "[server]\nrefresh_ms = 30\n", Path::new("local.toml")).unwrap();

        assert_eq!(config.infra.server.client_name, "system-wide");
        assert_eq!(config.infra.server.refresh_ms, 30);
    }

    #[test]
    fn test_negative_interval_is_rejected() {
        let err = parse("[server]\nrefresh_ms = -5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let err = parse("[server\nrefresh_ms = 1").unwrap_err();
        assert!(err.to_string().contains("test.toml"));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let mut config = PatchConfig::default();
        let err = apply_file(&mut config, Path::new("/nonexistent/patchwork.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }
}
