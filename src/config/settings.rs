use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::{DriverConfig, ProbeConfig};
use crate::serial::interface::DEFAULT_BAUD_RATE;
use crate::serial::protocol::DEFAULT_MAX_BUFFER;
use crate::serial::{Pattern, QueueConfig, Separators};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// On-disk layout: runtime settings live under a `settings` key
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub settings: RuntimeSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    /// 0 off, 1 error, 2 warn, 3 info, 4 debug, 5 trace
    pub log_level: u8,
    pub arduino_port: Option<String>,
    pub arduino_baud_rate: u32,
    pub arduino_command_split_char: char,
    pub arduino_command_value_char: char,
    /// Zero or negative waits forever
    pub queue_timeout_ms: i64,
    pub queue_strict_eq_check: bool,
    pub log_expired_waiters: bool,
    pub max_command_buffer: usize,
    pub read_timeout_ms: u64,
    pub prune_interval_ms: u64,
    pub probe_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub probe_command: String,
    pub probe_reply: String,
    pub max_missed_probes: u32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            log_level: 3,
            arduino_port: None,
            arduino_baud_rate: DEFAULT_BAUD_RATE,
            arduino_command_split_char: ';',
            arduino_command_value_char: '|',
            queue_timeout_ms: 10_000,
            queue_strict_eq_check: false,
            log_expired_waiters: false,
            max_command_buffer: DEFAULT_MAX_BUFFER,
            read_timeout_ms: 25,
            prune_interval_ms: 1_000,
            probe_interval_ms: 5_000,
            probe_timeout_ms: 2_000,
            probe_command: "ping".to_string(),
            probe_reply: "pong".to_string(),
            max_missed_probes: 2,
        }
    }
}

impl RuntimeSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let settings = Self::from_json(&text)?;
        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let file: SettingsFile = serde_json::from_str(text)?;
        file.settings.validate()?;
        Ok(file.settings)
    }

    pub fn validate(&self) -> Result<()> {
        let split = ascii_separator("arduinoCommandSplitChar", self.arduino_command_split_char)?;
        let value = ascii_separator("arduinoCommandValueChar", self.arduino_command_value_char)?;
        if split == value {
            return Err(ConfigError::Invalid {
                field: "arduinoCommandValueChar",
                reason: "must differ from arduinoCommandSplitChar".to_string(),
            });
        }
        if self.arduino_baud_rate == 0 {
            return Err(ConfigError::Invalid { field: "arduinoBaudRate", reason: "must be positive".to_string() });
        }
        if self.max_command_buffer == 0 {
            return Err(ConfigError::Invalid { field: "maxCommandBuffer", reason: "must be positive".to_string() });
        }
        for (field, value) in [
            ("probeIntervalMs", self.probe_interval_ms),
            ("pruneIntervalMs", self.prune_interval_ms),
            ("probeTimeoutMs", self.probe_timeout_ms),
            ("readTimeoutMs", self.read_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid { field, reason: "must be positive".to_string() });
            }
        }
        Ok(())
    }

    pub fn separators(&self) -> Separators {
        // validate() guarantees both are ASCII
        Separators {
            segment: self.arduino_command_split_char as u8,
            value: self.arduino_command_value_char as u8,
        }
    }

    pub fn log_level_filter(&self) -> log::LevelFilter {
        match self.log_level {
            0 => log::LevelFilter::Off,
            1 => log::LevelFilter::Error,
            2 => log::LevelFilter::Warn,
            3 => log::LevelFilter::Info,
            4 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    /// Driver configuration for the device named `name`
    pub fn driver_config(&self, name: &str) -> DriverConfig {
        DriverConfig {
            name: name.to_string(),
            separators: self.separators(),
            queue: QueueConfig {
                name: name.to_string(),
                default_timeout: QueueConfig::timeout_from_ms(self.queue_timeout_ms),
                strict_eq_check: self.queue_strict_eq_check,
                log_expired: self.log_expired_waiters,
            },
            read_timeout_ms: self.read_timeout_ms,
            prune_interval: Duration::from_millis(self.prune_interval_ms),
            max_buffer: self.max_command_buffer,
            event_capacity: 256,
            probe: ProbeConfig {
                interval: Duration::from_millis(self.probe_interval_ms),
                timeout: Duration::from_millis(self.probe_timeout_ms),
                command: self.probe_command.clone(),
                reply: Pattern::from(self.probe_reply.as_str()),
                max_missed: self.max_missed_probes,
            },
        }
    }
}

fn ascii_separator(field: &'static str, c: char) -> Result<u8> {
    if c.is_ascii() {
        Ok(c as u8)
    } else {
        Err(ConfigError::Invalid { field, reason: format!("'{}' is not an ASCII character", c) })
    }
}
