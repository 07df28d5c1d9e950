// Configuration loader
// Lookup: --config, $ISOENV_CONFIG, ./isoenv.toml, <user config dir>/isoenv/isoenv.toml
use config::{Config, Environment, File, FileFormat};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use isoenv_core::domain::{EnvironmentSpec, Registry};

use crate::error::ConfigError;
use crate::settings::Settings;

pub const CONFIG_FILE_NAME: &str = "isoenv.toml";

/// Names an explicit config file (lower priority than the CLI flag)
pub const CONFIG_ENV_VAR: &str = "ISOENV_CONFIG";

const ENV_PREFIX: &str = "ISOENV";
const ENV_SEPARATOR: &str = "__";

/// Settings plus the directory relative paths are resolved against
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub settings: Settings,
    path: Option<PathBuf>,
    base_dir: PathBuf,
}

/// Find and load the configuration file, applying ISOENV__* overrides
pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let from_env = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
    let user_config = ProjectDirs::from("", "", "isoenv")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME));

    let path = locate(explicit, from_env, Path::new(CONFIG_FILE_NAME), user_config)?;
    load_from_path(&path)
}

/// Load one specific file, applying ISOENV__* overrides
pub fn load_from_path(path: &Path) -> Result<LoadedConfig, ConfigError> {
    info!(path = %path.display(), "Loading configuration");
    let settings = build(
        File::from(path).format(FileFormat::Toml).required(true),
        env_overrides(),
    )?;

    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    LoadedConfig::new(settings, Some(path.to_path_buf()), base_dir)
}

/// Load from TOML text; relative paths resolve against `base_dir`
///
/// Environment overrides are not applied.
pub fn load_from_str(toml: &str, base_dir: impl Into<PathBuf>) -> Result<LoadedConfig, ConfigError> {
    let settings = Config::builder()
        .add_source(File::from_str(toml, FileFormat::Toml))
        .build()?
        .try_deserialize::<Settings>()?;
    LoadedConfig::new(settings, None, base_dir.into())
}

fn env_overrides() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("dispatcher.env_passthrough")
}

fn build<S>(file: S, env: Environment) -> Result<Settings, ConfigError>
where
    S: config::Source + Send + Sync + 'static,
{
    Ok(Config::builder()
        .add_source(file)
        .add_source(env)
        .build()?
        .try_deserialize::<Settings>()?)
}

/// First candidate that applies
///
/// Explicit and env-provided paths must exist; the default locations are
/// only used when present.
fn locate(
    explicit: Option<&Path>,
    from_env: Option<PathBuf>,
    local: &Path,
    user_config: Option<PathBuf>,
) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return existing(path.to_path_buf());
    }
    if let Some(path) = from_env {
        return existing(path);
    }

    let mut searched = vec![local.to_path_buf()];
    if local.is_file() {
        return Ok(local.to_path_buf());
    }
    if let Some(path) = user_config {
        if path.is_file() {
            return Ok(path);
        }
        searched.push(path);
    }

    Err(ConfigError::NotFound { searched })
}

fn existing(path: PathBuf) -> Result<PathBuf, ConfigError> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(ConfigError::Missing(path))
    }
}

impl LoadedConfig {
    fn new(
        settings: Settings,
        path: Option<PathBuf>,
        base_dir: PathBuf,
    ) -> Result<Self, ConfigError> {
        let loaded = Self {
            settings,
            path,
            base_dir,
        };
        loaded.validate()?;
        Ok(loaded)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let dispatcher = &self.settings.dispatcher;
        if dispatcher.output_cap_bytes == 0 {
            return Err(ConfigError::Invalid(
                "dispatcher.output_cap_bytes must be greater than zero".to_string(),
            ));
        }
        if self.settings.provisioner.timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "provisioner.timeout_seconds must be greater than zero".to_string(),
            ));
        }
        for (key, command) in [
            ("create_command", &self.settings.provisioner.create_command),
            ("install_command", &self.settings.provisioner.install_command),
        ] {
            if command.as_ref().is_some_and(|argv| argv.is_empty()) {
                return Err(ConfigError::Invalid(format!("provisioner.{key} is empty")));
            }
        }
        if self.settings.sources.is_empty() {
            return Err(ConfigError::Invalid("no [sources.*] configured".to_string()));
        }
        Ok(())
    }

    /// The file this was loaded from (None for in-memory configs)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `~` expanded; absolute paths pass through, relative ones hang off the config dir
    pub fn resolve(&self, path: &Path) -> PathBuf {
        let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned());
        if expanded.is_absolute() {
            expanded
        } else {
            self.base_dir.join(expanded)
        }
    }

    pub fn project_root(&self) -> PathBuf {
        self.resolve(&self.settings.dispatcher.project_root)
    }

    pub fn temp_dir(&self) -> PathBuf {
        match &self.settings.dispatcher.temp_dir {
            Some(dir) => self.resolve(dir),
            None => std::env::temp_dir().join("isoenv_dispatcher"),
        }
    }

    pub fn transcript_dir(&self) -> Option<PathBuf> {
        self.settings
            .dispatcher
            .transcript_dir
            .as_deref()
            .map(|p| self.resolve(p))
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.settings.dispatcher.log_dir.as_deref().map(|p| self.resolve(p))
    }

    pub fn dotenv_path(&self) -> Option<PathBuf> {
        self.settings
            .dispatcher
            .dotenv_path
            .as_deref()
            .map(|p| self.resolve(p))
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.settings.dispatcher.kill_grace_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.settings.dispatcher.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.settings.dispatcher.retry_max_delay_ms)
    }

    pub fn provision_step_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.provisioner.timeout_seconds)
    }

    /// One EnvironmentSpec per `[sources.<id>]`, paths resolved
    pub fn environment_specs(&self) -> Vec<EnvironmentSpec> {
        self.settings
            .sources
            .iter()
            .map(|(source_id, section)| {
                let mut spec = EnvironmentSpec::new(source_id, self.resolve(&section.env_root))
                    .with_dependencies(section.dependencies.iter().cloned())
                    .with_secrets(section.required_secrets.iter().cloned())
                    .with_timeout_seconds(section.timeout_seconds)
                    .with_max_retries(section.max_retries)
                    .with_wrapper(section.wrapper);
                if let Some(interpreter) = &section.interpreter_path {
                    spec = spec.with_interpreter(self.resolve(interpreter));
                }
                spec
            })
            .collect()
    }

    /// Validated, immutable registry
    pub fn registry(&self) -> Result<Registry, ConfigError> {
        let registry = Registry::new(self.environment_specs())?;
        debug!(sources = registry.len(), "Source registry built");
        Ok(registry)
    }

    /// Load `dispatcher.dotenv_path` into the process environment
    ///
    /// Variables already set win. Returns the file loaded, if any; a
    /// configured but absent file is skipped.
    pub fn load_dotenv(&self) -> Result<Option<PathBuf>, ConfigError> {
        let Some(path) = self.dotenv_path() else {
            return Ok(None);
        };
        if !path.is_file() {
            debug!(path = %path.display(), "Dotenv file not present, skipping");
            return Ok(None);
        }

        dotenvy::from_path(&path).map_err(|e| ConfigError::Dotenv {
            path: path.clone(),
            message: e.to_string(),
        })?;
        info!(path = %path.display(), "Loaded dotenv file");
        Ok(Some(path))
    }
}
