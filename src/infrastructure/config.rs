use crate::domain::config::{AppConfig, DeviceProfile, GlobalConfig};
use crate::domain::connection::{FlowControlConfig, ParityConfig};
use crate::domain::error::{SerialMonError, SerialMonResult};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "serialmon";
const PROJECT_DIR: &str = ".serialmon";
const CONFIG_FILE: &str = "config.toml";

/// Configuration manager
pub struct ConfigManager {
    global_config_path: PathBuf,
    project_config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create new configuration manager
    pub fn new() -> SerialMonResult<Self> {
        let global_config_path = Self::default_global_config_path()?;
        let project_config_path = std::env::current_dir()
            .ok()
            .and_then(|dir| Self::find_project_config_path(&dir));

        Ok(Self {
            global_config_path,
            project_config_path,
        })
    }

    /// Manager rooted at explicit paths
    pub fn with_paths(global_config_path: PathBuf, project_config_path: Option<PathBuf>) -> Self {
        Self {
            global_config_path,
            project_config_path,
        }
    }

    /// Load configuration: defaults, then global settings, then project devices
    pub fn load_config(&self) -> SerialMonResult<AppConfig> {
        let mut config = AppConfig::default();

        if self.global_config_path.exists() {
            let global_config = self.load_config_from_path(&self.global_config_path)?;
            config.global = global_config.global;
            config.devices = global_config.devices;
        }

        if let Some(project_path) = &self.project_config_path {
            if project_path.exists() {
                let project_config = self.load_config_from_path(project_path)?;
                for device in project_config.devices {
                    config.devices.retain(|existing| existing.name != device.name);
                    config.devices.push(device);
                }
            }
        }

        Ok(config)
    }

    fn default_global_config_path() -> SerialMonResult<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| SerialMonError::Config {
            message: "Could not determine configuration directory".to_string(),
        })?;

        Ok(config_dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Find project configuration path by walking up directory tree
    pub fn find_project_config_path(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(PROJECT_DIR).join(CONFIG_FILE))
            .find(|path| path.exists())
    }

    /// Load configuration from specific path
    pub fn load_config_from_path(&self, path: &Path) -> SerialMonResult<AppConfig> {
        let content = fs::read_to_string(path).map_err(|e| SerialMonError::Config {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        toml::from_str(&content).map_err(|e| SerialMonError::Config {
            message: format!("Failed to parse config file {}: {}", path.display(), e),
        })
    }

    /// Save configuration to specific path
    pub fn save_config_to_path(&self, path: &Path, config: &AppConfig) -> SerialMonResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| SerialMonError::Config {
                message: format!("Failed to create config directory {}: {}", parent.display(), e),
            })?;
        }

        let content = toml::to_string_pretty(config).map_err(|e| SerialMonError::Config {
            message: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| SerialMonError::Config {
            message: format!("Failed to write config file {}: {}", path.display(), e),
        })
    }

    /// Create `.serialmon/config.toml` under `path` with an example device
    pub fn init_project_config(&self, path: &Path) -> SerialMonResult<PathBuf> {
        let config_file = path.join(PROJECT_DIR).join(CONFIG_FILE);

        if config_file.exists() {
            return Err(SerialMonError::Config {
                message: "Project configuration already exists".to_string(),
            });
        }

        let default_config = AppConfig {
            global: GlobalConfig::default(),
            devices: vec![DeviceProfile {
                name: "example".to_string(),
                description: "Example serial device".to_string(),
                path: "/dev/ttyUSB0".to_string(),
                location_id: None,
                baud_rate: 9600,
                data_bits: 8,
                stop_bits: 1,
                parity: ParityConfig::None,
                flow_control: FlowControlConfig::None,
            }],
        };

        self.save_config_to_path(&config_file, &default_config)?;
        Ok(config_file)
    }

    pub fn project_config_path(&self) -> Option<&PathBuf> {
        self.project_config_path.as_ref()
    }

    pub fn global_config_path(&self) -> &PathBuf {
        &self.global_config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_when_nothing_exists() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_paths(temp_dir.path().join("missing.toml"), None);
        let config = manager.load_config().unwrap();

        assert_eq!(config.global.log_level, "info");
        assert_eq!(config.global.max_retry, 10);
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_init_project_config() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_paths(temp_dir.path().join("global.toml"), None);

        let config_file = manager.init_project_config(temp_dir.path()).unwrap();
        assert!(config_file.exists());

        let config = manager.load_config_from_path(&config_file).unwrap();
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices[0].name, "example");

        assert!(manager.init_project_config(temp_dir.path()).is_err());
    }

    #[test]
    fn test_project_devices_override_global_ones() {
        let temp_dir = TempDir::new().unwrap();
        let global_path = temp_dir.path().join("global.toml");
        let project_path = temp_dir.path().join("project.toml");

        fs::write(
            &global_path,
            r#"
            [global]
            reconnect_delay_ms = 500

            [[devices]]
            name = "gps"
            path = "/dev/ttyUSB0"
            "#,
        )
        .unwrap();
        fs::write(
            &project_path,
            r#"
            [[devices]]
            name = "gps"
            path = "/dev/ttyACM3"
            baud_rate = 4800
            "#,
        )
        .unwrap();

        let manager = ConfigManager::with_paths(global_path, Some(project_path));
        let config = manager.load_config().unwrap();

        assert_eq!(config.global.reconnect_delay_ms, 500);
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices[0].path, "/dev/ttyACM3");
        assert_eq!(config.devices[0].baud_rate, 4800);
    }

    #[test]
    fn test_find_project_config_walks_up() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_paths(temp_dir.path().join("global.toml"), None);
        manager.init_project_config(temp_dir.path()).unwrap();

        let nested = temp_dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let found = ConfigManager::find_project_config_path(&nested).unwrap();
        assert_eq!(found, temp_dir.path().join(".serialmon").join("config.toml"));
    }

    #[test]
    fn test_invalid_file_is_a_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.toml");
        fs::write(&path, "[global\nmax_retry = ").unwrap();

        let manager = ConfigManager::with_paths(path.clone(), None);
        assert!(matches!(manager.load_config_from_path(&path), Err(SerialMonError::Config { .. })));
    }
}
