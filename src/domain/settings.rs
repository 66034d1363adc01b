use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Placeholder UUIDs. Replace with the ones published by the device maker.
pub const DEFAULT_SERVICE_UUID: &str = "358407F4-BF93-408A-B128-57515EBAF150";
pub const DEFAULT_COMMAND_CHAR_UUID: &str = "7042D954-39BF-4E4F-A24B-0F43C0FA6B94";
pub const DEFAULT_SENSOR_CHAR_UUID: &str = "7CFF1AFE-A558-4B8F-81AC-ACF28A21FA89";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: true,
            console_logging_enabled: true,
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: false,
            show_thread_ids: false,
            show_target: true,
            ansi_colors: true,
            rotation: default_rotation(),
        }
    }
}

/// Which BLE stack backs the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BleBackend {
    /// The operating system stack (WinRT on Windows).
    #[default]
    Native,
    /// In-memory devices, for running without a radio.
    Mock,
}

/// UUIDs and discovery policy for the sample device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    #[serde(default = "default_service_uuid")]
    pub service_uuid: String,
    #[serde(default = "default_command_uuid")]
    pub command_char_uuid: String,
    #[serde(default = "default_sensor_uuid")]
    pub sensor_char_uuid: String,
    /// Treat a missing sensor characteristic as incomplete discovery.
    #[serde(default = "default_false")]
    pub require_sensor: bool,
    #[serde(default = "default_discovery_retries")]
    pub discovery_retries: u32,
    #[serde(default = "default_discovery_retry_delay_ms")]
    pub discovery_retry_delay_ms: u64,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            service_uuid: default_service_uuid(),
            command_char_uuid: default_command_uuid(),
            sensor_char_uuid: default_sensor_uuid(),
            require_sensor: false,
            discovery_retries: default_discovery_retries(),
            discovery_retry_delay_ms: default_discovery_retry_delay_ms(),
        }
    }
}

impl DeviceProfile {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.discovery_retry_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,

    #[serde(default)]
    pub backend: BleBackend,

    /// Only surface devices whose name contains this text. Empty shows all.
    #[serde(default)]
    pub device_name_filter: String,

    #[serde(default)]
    pub device_profile: DeviceProfile,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            backend: BleBackend::default(),
            device_name_filter: String::new(),
            device_profile: DeviceProfile::default(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "ble_device_sample".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_service_uuid() -> String {
    DEFAULT_SERVICE_UUID.to_string()
}
fn default_command_uuid() -> String {
    DEFAULT_COMMAND_CHAR_UUID.to_string()
}
fn default_sensor_uuid() -> String {
    DEFAULT_SENSOR_CHAR_UUID.to_string()
}
fn default_discovery_retries() -> u32 {
    5
}
fn default_discovery_retry_delay_ms() -> u64 {
    500
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults if it is missing
    /// or unreadable.
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BleDeviceSample");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"device_name_filter":"Widget"}"#).unwrap();
        assert_eq!(settings.device_name_filter, "Widget");
        assert_eq!(settings.backend, BleBackend::Native);
        assert_eq!(settings.device_profile, DeviceProfile::default());
        assert_eq!(settings.device_profile.discovery_retries, 5);
        assert_eq!(settings.log_settings.rotation, "daily");
    }

    #[test]
    fn test_backend_is_lowercase_in_json() {
        let settings: Settings = serde_json::from_str(r#"{"backend":"mock"}"#).unwrap();
        assert_eq!(settings.backend, BleBackend::Mock);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut service = SettingsService::with_path(path.clone());
        service.get_mut().device_name_filter = "Gadget".to_string();
        service.get_mut().device_profile.require_sensor = true;
        service.save().unwrap();

        let reloaded = SettingsService::with_path(path);
        assert_eq!(reloaded.get().device_name_filter, "Gadget");
        assert!(reloaded.get().device_profile.require_sensor);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        let service = SettingsService::with_path(path);
        assert!(service.get().device_name_filter.is_empty());
        assert_eq!(service.get().device_profile.service_uuid, DEFAULT_SERVICE_UUID);
    }
}
