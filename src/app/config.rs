use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::app::error::AppError;
use crate::app::models::{BackendHandle, FleetType};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BackendSettings {
    #[serde(default)]
    pub fleet_type: FleetType,
    /// Last resolved console executable; empty when unknown.
    #[serde(default)]
    pub console_path: String,
    /// Last resolved manager executable; empty when unknown.
    #[serde(default)]
    pub manager_path: String,
}

impl BackendSettings {
    pub fn configured_path(&self, fleet: FleetType) -> Option<&str> {
        let value = match fleet {
            FleetType::Console => self.console_path.as_str(),
            FleetType::Manager => self.manager_path.as_str(),
        };
        Some(value).filter(|value| !value.trim().is_empty())
    }
}

/// Settle delays of the staged reboot. Relative order matters, values are tunable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LifecycleSettings {
    pub drain_delay_ms: u64,
    pub global_settle_ms: u64,
    pub launch_delay_ms: u64,
    pub final_settle_ms: u64,
    pub boot_poll_interval_ms: u64,
    pub boot_timeout_secs: u64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            drain_delay_ms: 1_000,
            global_settle_ms: 5_000,
            launch_delay_ms: 3_000,
            final_settle_ms: 10_000,
            boot_poll_interval_ms: 2_000,
            boot_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommandSettings {
    pub timeout_secs: u64,
    pub query_timeout_secs: u64,
    pub snapshot_timeout_secs: u64,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            query_timeout_secs: 15,
            snapshot_timeout_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverTimeouts {
    pub query: Duration,
    pub control: Duration,
    pub snapshot: Duration,
}

impl Default for DriverTimeouts {
    fn default() -> Self {
        CommandSettings::default().timeouts()
    }
}

impl CommandSettings {
    pub fn timeouts(&self) -> DriverTimeouts {
        DriverTimeouts {
            query: Duration::from_secs(self.query_timeout_secs),
            control: Duration::from_secs(self.timeout_secs),
            snapshot: Duration::from_secs(self.snapshot_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MassSettings {
    pub max_parallel: usize,
    pub install_timeout_secs: u64,
    pub replace_existing: bool,
    pub allow_downgrade: bool,
    pub grant_permissions: bool,
    pub allow_test_packages: bool,
    pub extra_args: String,
}

impl Default for MassSettings {
    fn default() -> Self {
        Self {
            max_parallel: 8,
            install_timeout_secs: 300,
            replace_existing: true,
            allow_downgrade: false,
            grant_permissions: true,
            allow_test_packages: false,
            extra_args: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AdbSettings {
    #[serde(default)]
    pub command_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetConfig {
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub lifecycle: LifecycleSettings,
    #[serde(default)]
    pub command: CommandSettings,
    #[serde(default)]
    pub mass: MassSettings,
    #[serde(default)]
    pub adb: AdbSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub backup_dir: String,
    #[serde(default)]
    pub version: String,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            backend: BackendSettings::default(),
            lifecycle: LifecycleSettings::default(),
            command: CommandSettings::default(),
            mass: MassSettings::default(),
            adb: AdbSettings::default(),
            logging: LoggingSettings::default(),
            backup_dir: String::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("EMUFLEET_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    home_dir().join(".emufleet_config.json")
}

pub fn backup_config_path() -> PathBuf {
    let path = config_path();
    match path.file_stem() {
        Some(stem) => path.with_file_name(format!("{}.backup.json", stem.to_string_lossy())),
        None => home_dir().join(".emufleet_config.backup.json"),
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

pub fn load_config(trace_id: &str) -> Result<FleetConfig, AppError> {
    load_config_from_path(&config_path(), trace_id)
}

pub fn save_config(config: &FleetConfig, trace_id: &str) -> Result<(), AppError> {
    save_config_to_path(config, &config_path(), &backup_config_path(), trace_id)
}

pub fn load_config_from_path(path: &Path, trace_id: &str) -> Result<FleetConfig, AppError> {
    if !path.exists() {
        return Ok(FleetConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), trace_id))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|err| AppError::system(format!("Failed to parse config: {err}"), trace_id))?;
    let mut config = match serde_json::from_value::<FleetConfig>(value.clone()) {
        Ok(config) => config,
        Err(err) => {
            warn!(
                trace_id = %trace_id,
                path = %path.display(),
                error = %err,
                "config does not match the expected layout; keeping readable sections"
            );
            recover_sections(&value, trace_id)
        }
    };
    config = apply_legacy_overrides(config, &value);
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &FleetConfig,
    path: &Path,
    backup_path: &Path,
    trace_id: &str,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), trace_id))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), trace_id))?;
    Ok(())
}

/// Records a freshly resolved handle. Returns true when the stored value changed
/// and the caller should persist the config.
pub fn remember_handle(config: &mut FleetConfig, handle: &BackendHandle) -> bool {
    let resolved = handle.program();
    let slot = match handle.fleet {
        FleetType::Console => &mut config.backend.console_path,
        FleetType::Manager => &mut config.backend.manager_path,
    };
    if *slot == resolved {
        return false;
    }
    *slot = resolved;
    true
}

/// Reads each section on its own so one bad field only resets its section.
fn recover_sections(value: &serde_json::Value, trace_id: &str) -> FleetConfig {
    let mut config = FleetConfig::default();
    read_section(value, "backend", &mut config.backend, trace_id);
    read_section(value, "lifecycle", &mut config.lifecycle, trace_id);
    read_section(value, "command", &mut config.command, trace_id);
    read_section(value, "mass", &mut config.mass, trace_id);
    read_section(value, "adb", &mut config.adb, trace_id);
    read_section(value, "logging", &mut config.logging, trace_id);
    read_section(value, "backup_dir", &mut config.backup_dir, trace_id);
    read_section(value, "version", &mut config.version, trace_id);
    config
}

fn read_section<T: DeserializeOwned>(
    value: &serde_json::Value,
    key: &str,
    slot: &mut T,
    trace_id: &str,
) {
    let Some(raw) = value.get(key) else {
        return;
    };
    match serde_json::from_value(raw.clone()) {
        Ok(section) => *slot = section,
        Err(err) => {
            warn!(trace_id = %trace_id, section = key, error = %err, "config section reset to defaults");
        }
    }
}

/// Older configs stored everything flat at the top level.
fn apply_legacy_overrides(mut config: FleetConfig, value: &serde_json::Value) -> FleetConfig {
    let text = |key: &str| {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    if let Some(fleet) = text("emulator_type").and_then(|v| FleetType::parse(&v)) {
        config.backend.fleet_type = fleet;
    }
    if let Some(path) = text("ldconsole_path") {
        config.backend.console_path = path;
    }
    if let Some(path) = text("mumu_path") {
        config.backend.manager_path = path;
    }
    if let Some(path) = text("adb_path") {
        config.adb.command_path = path;
    }
    if let Some(dir) = text("backup_path") {
        config.backup_dir = dir;
    }
    config
}

fn validate_config(mut config: FleetConfig) -> FleetConfig {
    let defaults = FleetConfig::default();
    if config.command.timeout_secs == 0 {
        config.command.timeout_secs = defaults.command.timeout_secs;
    }
    if config.command.query_timeout_secs == 0 {
        config.command.query_timeout_secs = defaults.command.query_timeout_secs;
    }
    if config.command.snapshot_timeout_secs == 0 {
        config.command.snapshot_timeout_secs = defaults.command.snapshot_timeout_secs;
    }
    if config.mass.max_parallel == 0 {
        config.mass.max_parallel = defaults.mass.max_parallel;
    }
    if config.mass.install_timeout_secs == 0 {
        config.mass.install_timeout_secs = defaults.mass.install_timeout_secs;
    }
    if config.lifecycle.boot_poll_interval_ms == 0 {
        config.lifecycle.boot_poll_interval_ms = defaults.lifecycle.boot_poll_interval_ms;
    }
    if config.lifecycle.boot_timeout_secs == 0 {
        config.lifecycle.boot_timeout_secs = defaults.lifecycle.boot_timeout_secs;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn merges_legacy_values() {
        let value = serde_json::json!({
            "emulator_type": "mumu",
            "ldconsole_path": "C:\\LDPlayer\\LDPlayer9",
            "mumu_path": "C:\\Program Files\\Netease\\MuMuPlayer-12.0",
            "adb_path": "/opt/platform-tools/adb"
        });
        let mut config: FleetConfig = serde_json::from_value(value.clone()).unwrap_or_default();
        config = apply_legacy_overrides(config, &value);
        assert_eq!(config.backend.fleet_type, FleetType::Manager);
        assert_eq!(config.backend.console_path, "C:\\LDPlayer\\LDPlayer9");
        assert_eq!(
            config.backend.configured_path(FleetType::Manager),
            Some("C:\\Program Files\\Netease\\MuMuPlayer-12.0")
        );
        assert_eq!(config.adb.command_path, "/opt/platform-tools/adb");
    }

    #[test]
    fn bad_section_keeps_the_others() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("config.json");
        let raw = serde_json::json!({
            "backend": {
                "fleet_type": "ldplayer",
                "console_path": "/opt/ld/ldconsole",
                "manager_path": "/opt/mumu/MuMuManager"
            },
            "mass": { "max_parallel": "lots" },
            "adb": { "command_path": "/opt/platform-tools/adb" }
        });
        fs::write(&path, raw.to_string()).expect("write");

        let loaded = load_config_from_path(&path, "t").expect("load");
        assert_eq!(loaded.backend.fleet_type, FleetType::Console);
        assert_eq!(loaded.backend.console_path, "/opt/ld/ldconsole");
        assert_eq!(
            loaded.backend.configured_path(FleetType::Manager),
            Some("/opt/mumu/MuMuManager")
        );
        assert_eq!(loaded.adb.command_path, "/opt/platform-tools/adb");
        assert_eq!(loaded.mass, MassSettings::default());
    }

    #[test]
    fn fleet_type_accepts_tool_names() {
        let backend: BackendSettings =
            serde_json::from_value(serde_json::json!({ "fleet_type": "mumu" })).expect("alias");
        assert_eq!(backend.fleet_type, FleetType::Manager);
    }

    #[test]
    fn clamps_invalid_values() {
        let mut config = FleetConfig::default();
        config.command.timeout_secs = 0;
        config.mass.max_parallel = 0;
        config.lifecycle.boot_poll_interval_ms = 0;
        let validated = validate_config(config);
        assert_eq!(validated.command.timeout_secs, 30);
        assert_eq!(validated.mass.max_parallel, 8);
        assert_eq!(validated.lifecycle.boot_poll_interval_ms, 2_000);
    }

    #[test]
    fn save_then_load_keeps_backup() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("config.json");
        let backup = tmp.path().join("config.backup.json");

        let mut config = FleetConfig::default();
        config.backend.console_path = "/opt/ld/ldconsole".to_string();
        save_config_to_path(&config, &path, &backup, "t").expect("save");
        assert!(!backup.exists());

        config.lifecycle.drain_delay_ms = 250;
        save_config_to_path(&config, &path, &backup, "t").expect("save again");
        assert!(backup.exists());

        let loaded = load_config_from_path(&path, "t").expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_file_yields_defaults_and_blank_path_is_unset() {
        let tmp = TempDir::new().expect("tmp");
        let loaded = load_config_from_path(&tmp.path().join("none.json"), "t").expect("load");
        assert_eq!(loaded, FleetConfig::default());
        assert_eq!(loaded.backend.configured_path(FleetType::Console), None);
    }

    #[test]
    fn remember_handle_reports_changes() {
        let mut config = FleetConfig::default();
        let handle = BackendHandle::new(FleetType::Console, "/opt/ld/ldconsole");
        assert!(remember_handle(&mut config, &handle));
        assert!(!remember_handle(&mut config, &handle));
        assert_eq!(config.backend.console_path, "/opt/ld/ldconsole");
    }
}
