use coopsync_client::ClientConfig;
use coopsync_server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config/coopsync.toml";

/// Everything the binary reads from its TOML file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// Timeouts and reconciliation tuning used by `join` and `probe`.
    pub client: ClientConfig,
}

impl AppConfig {
    /// Load configuration from an explicit path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("Failed to parse {}: {err}. Using defaults", path.display());
                    AppConfig::default()
                }
            },
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound
                    || path != Path::new(DEFAULT_CONFIG_PATH)
                {
                    warn!("Failed to read {}: {err}. Using defaults", path.display());
                } else {
                    warn!("Config not found at {}. Using defaults", path.display());
                }
                AppConfig::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn scratch_file(name: &str, contents: &str) -> std::path::PathBuf {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("coopsync_config_{name}_{timestamp}"));
        fs::create_dir_all(&dir).expect("scratch dir create");
        let path = dir.join(name);
        fs::write(&path, contents).expect("write config");
        path
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let path = scratch_file(
            "partial.toml",
            r#"
[server]
name = "Friday night"
max_players = 4

[client.net]
request_timeout_ms = 2500

[client.reconcile]
snap_distance_sq = 40.0
"#,
        );
        let config = AppConfig::load_from_path(&path);
        assert_eq!(config.server.name, "Friday night");
        assert_eq!(config.server.max_players, 4);
        assert_eq!(config.server.listen, ServerConfig::default().listen);
        assert_eq!(config.client.net.request_timeout(), Duration::from_millis(2500));
        assert_eq!(
            config.client.net.public_key_timeout(),
            ClientConfig::default().net.public_key_timeout()
        );
        assert_eq!(config.client.reconcile.snap_distance_sq, 40.0);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn broken_or_missing_files_fall_back_to_defaults() {
        let path = scratch_file("broken.toml", "[server\nname = ");
        assert_eq!(AppConfig::load_from_path(&path), AppConfig::default());
        let _ = fs::remove_dir_all(path.parent().unwrap());

        let missing = std::env::temp_dir().join("coopsync_config_missing/none.toml");
        assert_eq!(AppConfig::load_from_path(&missing), AppConfig::default());
    }

    #[test]
    fn round_trips_through_toml() {
        let mut config = AppConfig::default();
        config.server.password = "hunter2".into();
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(toml::from_str::<AppConfig>(&text).unwrap(), config);
    }
}
