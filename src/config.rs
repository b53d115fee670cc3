// src/config.rs
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default location of the primary IPsec configuration file.
pub const DEFAULT_IPSEC_CONF: &str = "/etc/ipsec.conf";
/// Default directory holding IPsec configuration fragments.
pub const DEFAULT_IPSEC_CONF_DIR: &str = "/etc/ipsec.d";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub last_used_connection: Option<String>,
    /// Route privileged commands through a pkexec helper process instead of
    /// invoking `sudo ipsec` directly.
    pub use_helper: bool,
    pub poll_interval_secs: u64,
    pub probe_debounce_secs: u64,
    pub ipsec_conf_path: PathBuf,
    pub ipsec_conf_dir: PathBuf,
    /// Directory for per-connection event logs; `~/.vpnlogs` when unset.
    pub logbook_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            last_used_connection: None,
            use_helper: false,
            poll_interval_secs: 5,
            probe_debounce_secs: 2,
            ipsec_conf_path: PathBuf::from(DEFAULT_IPSEC_CONF),
            ipsec_conf_dir: PathBuf::from(DEFAULT_IPSEC_CONF_DIR),
            logbook_dir: None,
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find config directory"))?
            .join("ipsec-gui");

        let config_file = config_dir.join("config.json");

        if config_file.exists() {
            let content = std::fs::read_to_string(config_file)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find config directory"))?
            .join("ipsec-gui");

        std::fs::create_dir_all(&config_dir)?;

        let config_file = config_dir.join("config.json");
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_file, content)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_points_at_system_paths() {
        let config = AppConfig::default();
        assert_eq!(config.ipsec_conf_path, PathBuf::from("/etc/ipsec.conf"));
        assert_eq!(config.ipsec_conf_dir, PathBuf::from("/etc/ipsec.d"));
        assert!(!config.use_helper);
        assert!(config.poll_interval_secs >= config.probe_debounce_secs);
    }

    #[test]
    fn round_trips_through_json() {
        let mut config = AppConfig::default();
        config.last_used_connection = Some("office".to_string());
        config.use_helper = true;

        let json = serde_json::to_string(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.last_used_connection.as_deref(), Some("office"));
        assert!(parsed.use_helper);
    }
}
