//! CLI configuration management

use anyhow::{Context, Result, anyhow};
use protocol::ids::parse_vid_pid;
use protocol::{DataBits, LineSettings, Parity, StopBits, UsbId};
use serde::{Deserialize, Serialize};
use serial::DriverKind;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    pub general: GeneralSettings,
    pub serial: SerialSettings,
    /// Extra VID:PID entries for the probe table
    #[serde(default)]
    pub products: Vec<ProductEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    pub log_level: String,
}

/// Defaults for `monitor` and `send`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    #[serde(default)]
    pub dtr: bool,
    #[serde(default)]
    pub rts: bool,
    /// Reader timeout per transfer; 0 blocks until data arrives
    #[serde(default)]
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Reader buffer; the read endpoint's packet size when unset
    #[serde(default)]
    pub buffer_size: Option<usize>,
    pub channel_capacity: usize,
}

/// Device routed to a specific driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductEntry {
    /// "vid:pid" in hex, e.g. "1209:2301"
    pub id: String,
    pub driver: DriverKind,
}

impl ProductEntry {
    pub fn usb_id(&self) -> Result<UsbId> {
        parse_vid_pid(&self.id).ok_or_else(|| anyhow!("Invalid product id '{}'", self.id))
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            general: GeneralSettings {
                log_level: "info".to_string(),
            },
            serial: SerialSettings {
                baud_rate: 115200,
                data_bits: DataBits::Eight,
                stop_bits: StopBits::One,
                parity: Parity::None,
                dtr: false,
                rts: false,
                read_timeout_ms: 0,
                write_timeout_ms: 1000,
                buffer_size: None,
                channel_capacity: common::channel::DEFAULT_CHANNEL_CAPACITY,
            },
            products: Vec::new(),
        }
    }
}

impl SerialSettings {
    pub fn line_settings(&self) -> Result<LineSettings> {
        LineSettings::new(self.baud_rate, self.data_bits, self.stop_bits, self.parity)
            .map_err(|e| anyhow!("Invalid line settings: {}", e))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl CliConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-serial/config.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: CliConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        tracing::debug!("Config: {} custom products", config.products.len());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                // logging is not set up yet
                eprintln!("Config: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-serial").join("config.toml")
        } else {
            PathBuf::from(".config/usb-serial/config.toml")
        }
    }

    /// Custom products as probe table entries
    pub fn product_ids(&self) -> Result<Vec<(UsbId, DriverKind)>> {
        self.products
            .iter()
            .map(|entry| Ok((entry.usb_id()?, entry.driver)))
            .collect()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.general.log_level,
                valid_levels.join(", ")
            ));
        }

        self.serial.line_settings()?;
        if self.serial.channel_capacity == 0 {
            return Err(anyhow!("channel_capacity must be at least 1"));
        }
        if self.serial.buffer_size == Some(0) {
            return Err(anyhow!("buffer_size must be at least 1"));
        }

        self.product_ids()?;
        Ok(())
    }
}

/// Load a configuration file, expanding `~` in the path
pub fn load_config(path: &str) -> Result<CliConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    CliConfig::load(Some(path_buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CliConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.serial.read_timeout(), Duration::ZERO);
        assert!(config.products.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let mut config = CliConfig::default();
        config.products.push(ProductEntry {
            id: "1209:2301".to_string(),
            driver: DriverKind::CdcAcm,
        });
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("driver = \"cdc-acm\""));
        assert!(toml_str.contains("stop_bits = \"1\""));

        let parsed: CliConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.products, config.products);
        assert_eq!(parsed.serial.parity, Parity::None);
    }

    #[test]
    fn test_parse_handwritten_file() {
        let content = r#"
            [general]
            log_level = "debug"

            [serial]
            baud_rate = 9600
            data_bits = 7
            stop_bits = "2"
            parity = "even"
            dtr = true
            write_timeout_ms = 250
            channel_capacity = 8

            [[products]]
            id = "0x1a86:0x55d4"
            driver = "ch34x"
        "#;
        let config: CliConfig = toml::from_str(content).unwrap();
        config.validate().unwrap();

        let settings = config.serial.line_settings().unwrap();
        assert_eq!(settings.data_bits, DataBits::Seven);
        assert_eq!(settings.stop_bits, StopBits::Two);
        assert!(config.serial.dtr);
        assert!(!config.serial.rts);
        assert_eq!(
            config.product_ids().unwrap(),
            vec![(UsbId::new(0x1a86, 0x55d4), DriverKind::Ch34x)]
        );
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = CliConfig::default();
        config.general.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.general.log_level = "trace".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_serial_settings() {
        let mut config = CliConfig::default();
        config.serial.baud_rate = 0;
        assert!(config.validate().is_err());

        let mut config = CliConfig::default();
        config.serial.channel_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = CliConfig::default();
        config.serial.buffer_size = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = CliConfig::default();
        config.general.log_level = "warn".to_string();
        config.serial.buffer_size = Some(512);
        config.products.push(ProductEntry {
            id: "0403:6015".to_string(),
            driver: DriverKind::Ftdi,
        });
        config.save(&path).unwrap();

        let loaded = CliConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.general.log_level, "warn");
        assert_eq!(loaded.serial.buffer_size, Some(512));
        assert_eq!(loaded.products, config.products);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        fs::write(&path, "[general]\nlog_level = \"info\"\n").unwrap();
        assert!(CliConfig::load(Some(path.clone())).is_err());

        let mut config = CliConfig::default();
        config.general.log_level = "loud".to_string();
        fs::write(&path, toml::to_string(&config).unwrap()).unwrap();
        let err = CliConfig::load(Some(path)).unwrap_err();
        assert!(err.to_string().contains("Invalid log level"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CliConfig::load(Some(dir.path().join("absent.toml"))).is_err());
        assert!(load_config(&dir.path().join("absent.toml").to_string_lossy()).is_err());
    }

    #[test]
    fn test_validate_product_id() {
        let mut config = CliConfig::default();
        config.products.push(ProductEntry {
            id: "not-an-id".to_string(),
            driver: DriverKind::Ftdi,
        });
        assert!(config.validate().is_err());
    }
}
