pub mod settings;

pub use settings::{ConfigError, RuntimeSettings, SettingsFile};
