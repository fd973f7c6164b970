use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "teleop.toml";
const ENV_PREFIX: &str = "TELEOP";

/// Serial connection parameters
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SerialSettings {
    /// Device path, or `test` for the simulated robot
    pub port: String,
    pub baudrate: u32,
    /// Read timeout for one telemetry frame
    pub timeout_ms: u64,
    /// Pause between two telemetry reads
    pub poll_delay_ms: u64,
}

impl SerialSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "test".into(),
            baudrate: 9600,
            timeout_ms: 5000,
            poll_delay_ms: 1000,
        }
    }
}

/// Teleop configuration parameters
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TeleopParameters {
    pub serial: SerialSettings,
    /// Folder holding the preset grid and the macro programs
    pub data_dir: PathBuf,
    /// One of off, error, warn, info, debug, trace
    pub log_level: String,
}

impl Default for TeleopParameters {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            data_dir: PathBuf::from("data"),
            log_level: "info".into(),
        }
    }
}

impl TeleopParameters {
    /// Loads `path` if it exists, then applies `TELEOP_*` environment overrides,
    /// e.g. `TELEOP_SERIAL__PORT=/dev/ttyUSB0`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).prefix_separator("_").separator("__"))
            .build()
            .with_context(|| format!("Cannot read configuration file {}", path.display()))?;
        config.try_deserialize().context("Cannot parse configuration")
    }

    pub fn update<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let config = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), config).context("Cannot write configuration file")
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let params = TeleopParameters::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(params.serial.port, "test");
        assert_eq!(params.serial.baudrate, 9600);
        assert_eq!(params.serial.timeout(), Duration::from_secs(5));
        assert_eq!(params.serial.poll_delay(), Duration::from_secs(1));
        assert_eq!(params.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("teleop.toml");
        std::fs::write(&path, "log_level = \"debug\"\n[serial]\nport = \"/dev/ttyUSB0\"\n").unwrap();
        let params = TeleopParameters::load(&path).unwrap();
        assert_eq!(params.serial.port, "/dev/ttyUSB0");
        assert_eq!(params.serial.baudrate, 9600);
        assert_eq!(params.log_level(), log::LevelFilter::Debug);
    }

    #[test]
    fn test_update_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("teleop.toml");
        let mut params = TeleopParameters::default();
        params.serial.port = "COM3".into();
        params.serial.baudrate = 115_200;
        params.update(&path).unwrap();
        assert_eq!(TeleopParameters::load(&path).unwrap(), params);
    }

    #[test]
    fn test_bad_log_level_falls_back_to_info() {
        let params = TeleopParameters {
            log_level: "chatty".into(),
            ..Default::default()
        };
        assert_eq!(params.log_level(), log::LevelFilter::Info);
    }
}
