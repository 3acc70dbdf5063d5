//! Bridge configuration.
//!
//! Config file lives at `~/.config/steam-bridge/bridge.toml`. Environment
//! variables (`SteamAppId`, `STEAM_BRIDGE_LIBRARY`) override file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, MarshalError};

/// Default callback pump cadence, roughly one frame at 60 Hz.
pub const DEFAULT_PUMP_INTERVAL_MS: u64 = 16;

/// Initialization options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Application id, decimal text. Written to `SteamAppId` before native init.
    pub app_id: Option<String>,
    /// Explicit library file, or a directory holding the platform file.
    pub library_path: Option<PathBuf>,
    /// Milliseconds between callback pumps.
    pub pump_interval_ms: u64,
    /// Export reporting the library version as `u32`.
    pub version_symbol: Option<String>,
    /// Refuse libraries reporting a lower version. Needs `version_symbol`.
    pub minimum_version: Option<u32>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            library_path: None,
            pump_interval_ms: DEFAULT_PUMP_INTERVAL_MS,
            version_symbol: None,
            minimum_version: None,
        }
    }
}

impl BridgeConfig {
    pub fn with_app_id(app_id: impl Into<String>) -> Self {
        Self {
            app_id: Some(app_id.into()),
            ..Self::default()
        }
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("steam-bridge")
            .join("bridge.toml")
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path` if it exists, otherwise defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Defaults with process environment applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Overlay environment values read through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(app_id) = var("SteamAppId").filter(|v| !v.trim().is_empty()) {
            self.app_id = Some(app_id.trim().to_string());
        }
        if let Some(path) = var("STEAM_BRIDGE_LIBRARY").filter(|v| !v.is_empty()) {
            self.library_path = Some(PathBuf::from(path));
        }
    }

    /// The app id as the native `AppId_t`.
    pub fn app_id(&self) -> Result<Option<u32>, MarshalError> {
        self.app_id
            .as_deref()
            .map(|text| {
                let text = text.trim();
                if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(MarshalError::InvalidIdentifier(text.to_string()));
                }
                text.parse::<u32>()
                    .map_err(|_| MarshalError::InvalidIdentifier(text.to_string()))
            })
            .transpose()
    }

    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn parses_partial_file_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "app_id = \"480\"").unwrap();
        writeln!(file, "library_path = \"/opt/steamworks/redistributable_bin\"").unwrap();

        let config = BridgeConfig::load(file.path()).unwrap();
        assert_eq!(config.app_id.as_deref(), Some("480"));
        assert_eq!(
            config.library_path,
            Some(PathBuf::from("/opt/steamworks/redistributable_bin"))
        );
        assert_eq!(config.pump_interval_ms, DEFAULT_PUMP_INTERVAL_MS);
        assert_eq!(config.minimum_version, None);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "pump_interval_ms = \"fast\"").unwrap();
        assert!(matches!(
            BridgeConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        assert!(matches!(
            BridgeConfig::load(&path),
            Err(ConfigError::Read { .. })
        ));
        assert_eq!(
            BridgeConfig::load_or_default(&path).unwrap(),
            BridgeConfig::default()
        );
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("SteamAppId", " 1234 "),
            ("STEAM_BRIDGE_LIBRARY", "/tmp/libsteam_api.so"),
        ]
        .into();
        let mut config = BridgeConfig::with_app_id("480");
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.app_id.as_deref(), Some("1234"));
        assert_eq!(
            config.library_path,
            Some(PathBuf::from("/tmp/libsteam_api.so"))
        );

        let mut untouched = BridgeConfig::with_app_id("480");
        untouched.apply_env(|_| None);
        assert_eq!(untouched.app_id.as_deref(), Some("480"));
    }

    #[test]
    fn app_id_must_be_decimal_u32() {
        assert_eq!(BridgeConfig::with_app_id("480").app_id(), Ok(Some(480)));
        assert_eq!(BridgeConfig::default().app_id(), Ok(None));
        for bad in ["", "-1", "abc", "4294967296", "4 80"] {
            assert!(
                matches!(
                    BridgeConfig::with_app_id(bad).app_id(),
                    Err(MarshalError::InvalidIdentifier(_))
                ),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn default_path_is_under_config_dir() {
        let path = BridgeConfig::default_path();
        assert!(path.ends_with("steam-bridge/bridge.toml"));
    }
}
