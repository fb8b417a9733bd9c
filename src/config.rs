//! Configuration management for CatLock
//!
//! Stores settings in JSON format at ~/.catlock/config.json

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::trigger::TriggerSpec;

/// Environment variable that forces a config reset (development)
pub const RESET_ENV: &str = "CATLOCK_DEV";

/// Command-line flag that forces a config reset
pub const RESET_FLAG: &str = "--reset-config";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Hotkey to toggle lock (e.g., "ctrl+b", "ctrl+shift+l")
    pub hotkey: String,

    /// Overlay opacity (0.0 to 1.0)
    pub opacity: f32,

    /// Whether to show a notification when locking
    pub notifications_enabled: bool,

    /// Overlay color in hex (e.g., "#1B5E20")
    pub overlay_color: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hotkey: "ctrl+b".to_string(),
            opacity: 0.3,
            notifications_enabled: true,
            overlay_color: "#1B5E20".to_string(),
        }
    }
}

impl Config {
    /// Get the config file path (~/.catlock/config.json)
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Load configuration, writing defaults when missing, unreadable or reset
    pub fn load(path: &Path, reset: bool) -> Result<Self> {
        if reset {
            info!("Resetting config to defaults: {}", path.display());
            return Self::write_defaults(path);
        }

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No config at {}, creating defaults", path.display());
                return Self::write_defaults(path);
            }
            Err(source) => {
                return Err(Error::ConfigIo {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        match serde_json::from_str::<Config>(&contents) {
            Ok(config) => Ok(config.sanitized()),
            Err(e) => {
                warn!("Config {} is invalid ({}), restoring defaults", path.display(), e);
                Self::write_defaults(path)
            }
        }
    }

    fn write_defaults(path: &Path) -> Result<Self> {
        let config = Self::default();
        config.save(path)?;
        Ok(config)
    }

    /// Save configuration to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        let io_err = |source| Error::ConfigIo {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents).map_err(io_err)?;
        Ok(())
    }

    /// Clamp opacity and replace an unusable hotkey with the default
    pub fn sanitized(mut self) -> Self {
        if !self.opacity.is_finite() {
            self.opacity = Self::default().opacity;
        }
        self.opacity = self.opacity.clamp(0.0, 1.0);

        if let Err(e) = TriggerSpec::parse(&self.hotkey) {
            warn!("{}, using default hotkey", e);
            self.hotkey = Self::default().hotkey;
        }
        self
    }

    /// The parsed lock/unlock hotkey
    pub fn trigger(&self) -> TriggerSpec {
        TriggerSpec::parse(&self.hotkey).unwrap_or_else(|_| {
            TriggerSpec::parse(&Self::default().hotkey).unwrap_or_else(|_| TriggerSpec::emergency())
        })
    }

    /// Parse overlay color from hex string to RGB
    pub fn parse_overlay_color(&self) -> (u8, u8, u8) {
        let hex = self.overlay_color.trim_start_matches('#');
        if hex.len() == 6 && hex.is_ascii() {
            if let (Ok(r), Ok(g), Ok(b)) = (
                u8::from_str_radix(&hex[0..2], 16),
                u8::from_str_radix(&hex[2..4], 16),
                u8::from_str_radix(&hex[4..6], 16),
            ) {
                return (r, g, b);
            }
        }
        // Default to dark green if parsing fails
        (27, 94, 32)
    }
}

/// Whether the user asked for a config reset on this run
pub fn reset_requested() -> bool {
    std::env::args().any(|arg| arg == RESET_FLAG) || std::env::var_os(RESET_ENV).is_some()
}

/// ~/.catlock, falling back to the working directory
pub fn data_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".catlock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = Config::load(&path, false).unwrap();

        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn test_round_trip_uses_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config {
            hotkey: "ctrl+shift+l".to_string(),
            opacity: 0.5,
            notifications_enabled: false,
            ..Config::default()
        };

        config.save(&path).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"notificationsEnabled\": false"));

        assert_eq!(Config::load(&path, false).unwrap(), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"hotkey": "ctrl+l"}"#).unwrap();

        let config = Config::load(&path, false).unwrap();

        assert_eq!(config.hotkey, "ctrl+l");
        assert_eq!(config.opacity, 0.3);
        assert!(config.notifications_enabled);
    }

    #[test]
    fn test_invalid_json_restores_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();

        let config = Config::load(&path, false).unwrap();

        assert_eq!(config, Config::default());
        let reread: Config = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reread, Config::default());
    }

    #[test]
    fn test_reset_overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"hotkey": "alt+q", "opacity": 0.9}"#).unwrap();

        let config = Config::load(&path, true).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_sanitize_clamps_opacity_and_hotkey() {
        let config = Config {
            hotkey: "ctrl++".to_string(),
            opacity: 4.0,
            ..Config::default()
        }
        .sanitized();

        assert_eq!(config.opacity, 1.0);
        assert_eq!(config.hotkey, "ctrl+b");
    }

    #[test]
    fn test_parse_overlay_color() {
        let mut config = Config::default();
        assert_eq!(config.parse_overlay_color(), (0x1B, 0x5E, 0x20));

        config.overlay_color = "#zzzzzz".to_string();
        assert_eq!(config.parse_overlay_color(), (27, 94, 32));
    }
}
