// isoenv Infrastructure - Configuration
// TOML file layered under ISOENV__* environment overrides

pub mod error;
pub mod loader;
pub mod settings;

pub use error::ConfigError;
pub use loader::{load, load_from_path, load_from_str, LoadedConfig, CONFIG_ENV_VAR, CONFIG_FILE_NAME};
pub use settings::{DispatcherSection, ProvisionerSection, Settings, SourceSection};
