// Venv provisioner implementation
// Creates the isolated runtime, installs pinned dependencies in order, and
// records what was installed in a manifest inside the environment root.
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use isoenv_core::application::constants::DEFAULT_PROVISION_STEP_TIMEOUT;
use isoenv_core::domain::EnvironmentSpec;
use isoenv_core::port::{
    EnvironmentProbe, ProcessInvocation, ProcessOutcome, ProcessRunner, ProvisionOutcome,
    Provisioner, ProvisioningError,
};

/// Manifest file written after every dependency installed successfully
pub const MANIFEST_FILE: &str = ".isoenv-provisioned";

/// Characters of stderr kept in provisioning diagnostics
const DIAGNOSTIC_TAIL_CHARS: usize = 2000;

/// argv templates for the two provisioning steps
///
/// Placeholders: `{env_root}`, `{interpreter}`, `{package}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionCommands {
    pub create: Vec<String>,
    pub install: Vec<String>,
}

impl Default for ProvisionCommands {
    fn default() -> Self {
        Self {
            create: ["python3", "-m", "venv", "{env_root}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            install: ["{interpreter}", "-m", "pip", "install", "{package}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Expand placeholders in an argv template
fn render(template: &[String], spec: &EnvironmentSpec, package: Option<&str>) -> Vec<String> {
    let env_root = spec.env_root.display().to_string();
    let interpreter = spec.interpreter_path.display().to_string();
    template
        .iter()
        .map(|arg| {
            let arg = arg
                .replace("{env_root}", &env_root)
                .replace("{interpreter}", &interpreter);
            match package {
                Some(pkg) => arg.replace("{package}", pkg),
                None => arg,
            }
        })
        .collect()
}

fn manifest_contents(spec: &EnvironmentSpec) -> String {
    spec.dependencies
        .iter()
        .map(|d| format!("{}\n", d.trim()))
        .collect()
}

fn manifest_matches(spec: &EnvironmentSpec) -> bool {
    std::fs::read_to_string(spec.env_root.join(MANIFEST_FILE))
        .map(|recorded| recorded == manifest_contents(spec))
        .unwrap_or(false)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn tail(text: &str) -> &str {
    let trimmed = text.trim_end();
    match trimmed.char_indices().rev().nth(DIAGNOSTIC_TAIL_CHARS) {
        Some((idx, _)) => &trimmed[idx..],
        None => trimmed,
    }
}

/// One failed provisioning step, before it is tagged as create/install
struct StepFailure {
    message: String,
    timed_out: bool,
}

/// Venv provisioner
///
/// Runs creation/install commands through a ProcessRunner with the parent's
/// full environment (pip needs proxies, certificates, caches).
pub struct VenvProvisioner {
    runner: Arc<dyn ProcessRunner>,
    commands: ProvisionCommands,
    step_timeout: Duration,
}

impl VenvProvisioner {
    pub fn new(runner: Arc<dyn ProcessRunner>, commands: ProvisionCommands) -> Self {
        Self {
            runner,
            commands,
            step_timeout: DEFAULT_PROVISION_STEP_TIMEOUT,
        }
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    async fn run_step(&self, argv: Vec<String>, spec: &EnvironmentSpec) -> Result<(), StepFailure> {
        let Some((program, args)) = argv.split_first() else {
            return Err(StepFailure {
                message: "empty command template".to_string(),
                timed_out: false,
            });
        };

        let working_dir = spec
            .env_root
            .parent()
            .filter(|p| p.is_dir())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| ".".into());

        let invocation = ProcessInvocation {
            program: program.into(),
            args: args.to_vec(),
            env: Default::default(),
            inherit_parent_env: true,
            working_dir,
            timeout: self.step_timeout,
        };

        debug!(source_id = %spec.source_id, command = ?argv, "Running provisioning step");

        let output = self.runner.run(invocation).await.map_err(|e| StepFailure {
            message: e.to_string(),
            timed_out: false,
        })?;

        match output.outcome {
            ProcessOutcome::Exited(0) => Ok(()),
            ProcessOutcome::TimedOut => Err(StepFailure {
                message: format!("`{}` timed out", argv.join(" ")),
                timed_out: true,
            }),
            other => Err(StepFailure {
                message: format!(
                    "`{}` failed ({:?}): {}",
                    argv.join(" "),
                    other,
                    tail(&output.stderr.text)
                ),
                timed_out: false,
            }),
        }
    }

    fn step_error(
        &self,
        spec: &EnvironmentSpec,
        failure: StepFailure,
        package: Option<&str>,
    ) -> ProvisioningError {
        if failure.timed_out {
            return ProvisioningError::StepTimeout {
                source_id: spec.source_id.clone(),
                step: match package {
                    Some(pkg) => format!("install {pkg}"),
                    None => "create".to_string(),
                },
                seconds: self.step_timeout.as_secs(),
            };
        }
        match package {
            Some(pkg) => ProvisioningError::InstallFailed {
                source_id: spec.source_id.clone(),
                package: pkg.to_string(),
                message: failure.message,
            },
            None => ProvisioningError::CreateFailed {
                source_id: spec.source_id.clone(),
                message: failure.message,
            },
        }
    }

    fn io_error(spec: &EnvironmentSpec, context: &str, e: std::io::Error) -> ProvisioningError {
        ProvisioningError::Io {
            source_id: spec.source_id.clone(),
            message: format!("{context}: {e}"),
        }
    }

    /// Remove a root this call created, so the next attempt starts clean
    fn discard_partial(spec: &EnvironmentSpec) {
        match std::fs::remove_dir_all(&spec.env_root) {
            Ok(()) => info!(
                source_id = %spec.source_id,
                env_root = %spec.env_root.display(),
                "Removed partially provisioned environment"
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                source_id = %spec.source_id,
                env_root = %spec.env_root.display(),
                error = %e,
                "Failed to remove partially provisioned environment"
            ),
        }
    }

    async fn provision(
        &self,
        spec: &EnvironmentSpec,
        force: bool,
    ) -> Result<ProvisionOutcome, ProvisioningError> {
        let root_existed = spec.env_root.exists();

        if force && root_existed {
            info!(source_id = %spec.source_id, "Forced repair: removing existing environment");
            std::fs::remove_dir_all(&spec.env_root)
                .map_err(|e| Self::io_error(spec, "failed to remove environment", e))?;
        }

        // Anything we create in this call is ours to discard on failure
        let owns_root = force || !root_existed;
        let needs_create =
            force || !spec.env_root.is_dir() || !is_executable(&spec.interpreter_path);

        let outcome = if needs_create {
            info!(
                source_id = %spec.source_id,
                env_root = %spec.env_root.display(),
                "Creating isolated environment"
            );

            if let Some(parent) = spec.env_root.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Self::io_error(spec, "failed to create parent directory", e))?;
            }

            let create = render(&self.commands.create, spec, None);
            if let Err(failure) = self.run_step(create, spec).await {
                if owns_root {
                    Self::discard_partial(spec);
                }
                return Err(self.step_error(spec, failure, None));
            }

            if !is_executable(&spec.interpreter_path) {
                if owns_root {
                    Self::discard_partial(spec);
                }
                return Err(ProvisioningError::CreateFailed {
                    source_id: spec.source_id.clone(),
                    message: format!(
                        "interpreter not found at {} after creation",
                        spec.interpreter_path.display()
                    ),
                });
            }

            if force {
                ProvisionOutcome::Recreated
            } else {
                ProvisionOutcome::Created
            }
        } else {
            info!(
                source_id = %spec.source_id,
                "Environment incomplete, installing dependencies"
            );
            ProvisionOutcome::Completed
        };

        // A stale manifest must not survive a half-finished reinstall
        match std::fs::remove_file(spec.env_root.join(MANIFEST_FILE)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Self::io_error(spec, "failed to reset manifest", e)),
        }

        for package in &spec.dependencies {
            info!(source_id = %spec.source_id, package = %package, "Installing dependency");
            let install = render(&self.commands.install, spec, Some(package));
            if let Err(failure) = self.run_step(install, spec).await {
                if owns_root {
                    Self::discard_partial(spec);
                }
                return Err(self.step_error(spec, failure, Some(package)));
            }
        }

        std::fs::write(spec.env_root.join(MANIFEST_FILE), manifest_contents(spec))
            .map_err(|e| Self::io_error(spec, "failed to write manifest", e))?;

        info!(
            source_id = %spec.source_id,
            outcome = %outcome,
            dependencies = spec.dependencies.len(),
            "Environment provisioned"
        );

        Ok(outcome)
    }
}

#[async_trait]
impl Provisioner for VenvProvisioner {
    async fn ensure_ready(
        &self,
        spec: &EnvironmentSpec,
        force: bool,
    ) -> Result<ProvisionOutcome, ProvisioningError> {
        if !force && is_executable(&spec.interpreter_path) && manifest_matches(spec) {
            debug!(source_id = %spec.source_id, "Environment already provisioned");
            return Ok(ProvisionOutcome::AlreadyProvisioned);
        }

        self.provision(spec, force).await
    }

    fn probe(&self, spec: &EnvironmentSpec) -> EnvironmentProbe {
        let root_exists = spec.env_root.is_dir();
        let interpreter_exists = is_executable(&spec.interpreter_path);
        let dependencies_recorded = manifest_matches(spec);

        let detail = if !root_exists {
            format!("environment root {} missing", spec.env_root.display())
        } else if !interpreter_exists {
            format!(
                "interpreter {} missing or not executable",
                spec.interpreter_path.display()
            )
        } else if !dependencies_recorded {
            "dependency manifest missing or outdated".to_string()
        } else {
            format!("ready ({} dependencies)", spec.dependencies.len())
        };

        EnvironmentProbe {
            root_exists,
            interpreter_exists,
            dependencies_recorded,
            detail,
        }
    }
}
