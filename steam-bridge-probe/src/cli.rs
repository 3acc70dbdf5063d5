use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use steam_bridge::BridgeConfig;

/// Initialize the Steamworks bridge, report interface availability and print every
/// dispatched callback as a JSON line.
#[derive(Parser, Debug, Clone)]
#[command(name = "steam-bridge-probe", version, about)]
pub struct ProbeArgs {
    /// Application id (overrides the config file and `SteamAppId`).
    #[arg(long)]
    pub app_id: Option<String>,

    /// SDK library file, or the directory containing it.
    #[arg(long)]
    pub library: Option<PathBuf>,

    /// Config file. Default: <config dir>/steam-bridge/bridge.toml
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Seconds to pump callbacks before shutting down; 0 waits for Ctrl-C.
    #[arg(long, default_value_t = 10)]
    pub seconds: u64,

    /// Pump interval in milliseconds (overrides the config file).
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Open this overlay dialog once initialized (e.g. "friends").
    #[arg(long)]
    pub overlay: Option<String>,

    /// Log the bridge at debug level.
    #[arg(long)]
    pub debug: bool,

    /// Emit logs as JSON.
    #[arg(long, env = "STEAM_BRIDGE_LOG_JSON")]
    pub log_json: bool,
}

impl ProbeArgs {
    /// Config file, then environment, then flags.
    pub fn bridge_config(&self) -> Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::load(path)?,
            None => BridgeConfig::load_or_default(&BridgeConfig::default_path())?,
        };
        config.apply_env(|key| std::env::var(key).ok());
        self.apply_flags(&mut config);
        Ok(config)
    }

    fn apply_flags(&self, config: &mut BridgeConfig) {
        if let Some(app_id) = &self.app_id {
            config.app_id = Some(app_id.clone());
        }
        if let Some(library) = &self.library {
            config.library_path = Some(library.clone());
        }
        if let Some(ms) = self.interval_ms {
            config.pump_interval_ms = ms;
        }
    }

    pub fn log_directive(&self) -> &'static str {
        if self.debug {
            "steam_bridge=debug"
        } else {
            "steam_bridge=info"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "app_id = \"480\"\npump_interval_ms = 33").unwrap();
        let path = file.path().to_str().unwrap();

        let args = ProbeArgs::parse_from([
            "steam-bridge-probe",
            "--config",
            path,
            "--app-id",
            "1234",
            "--interval-ms",
            "5",
        ]);
        let mut config = BridgeConfig::load(args.config.as_ref().unwrap()).unwrap();
        assert_eq!(config.pump_interval_ms, 33);
        args.apply_flags(&mut config);
        assert_eq!(config.app_id.as_deref(), Some("1234"));
        assert_eq!(config.pump_interval_ms, 5);
        assert_eq!(config.library_path, None);
    }

    #[test]
    fn defaults() {
        let args = ProbeArgs::parse_from(["steam-bridge-probe"]);
        assert_eq!(args.seconds, 10);
        assert!(!args.debug);
        assert_eq!(args.log_directive(), "steam_bridge=info");
        let args = ProbeArgs::parse_from(["steam-bridge-probe", "--debug", "--seconds", "0"]);
        assert_eq!(args.seconds, 0);
        assert_eq!(args.log_directive(), "steam_bridge=debug");
    }
}
