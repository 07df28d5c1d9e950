//! Shared fixtures: real processes, `/bin/sh` standing in for the venv
//! interpreter, shell commands standing in for `python -m venv` / pip.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use isoenv_core::application::{Dispatcher, RetryPolicy};
use isoenv_core::domain::{EnvironmentSpec, Registry, WrapperMode};
use isoenv_infra_system::{build_dispatcher, ProvisionCommands, SystemSettings};
use tempfile::TempDir;

pub struct Fixture {
    pub dir: TempDir,
    pub project: PathBuf,
    pub temp_dir: PathBuf,
    pub provision_log: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let project = dir.path().join("project");
        std::fs::create_dir_all(project.join("scripts")).expect("project dir");
        Self {
            temp_dir: dir.path().join("dispatcher_tmp"),
            provision_log: dir.path().join("provision.log"),
            project,
            dir,
        }
    }

    /// Write an executable-by-interpreter shell script under project/scripts
    pub fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.project.join("scripts").join(name);
        std::fs::write(&path, body).expect("write script");
        path
    }

    pub fn env_root(&self, source_id: &str) -> PathBuf {
        self.dir.path().join("envs").join(source_id)
    }

    /// Shell-backed source: copy wrapper, one fake dependency
    pub fn spec(&self, source_id: &str) -> EnvironmentSpec {
        EnvironmentSpec::new(source_id, self.env_root(source_id))
            .with_dependencies(["requests"])
            .with_timeout_seconds(30)
            .with_max_retries(0)
            .with_wrapper(WrapperMode::Copy)
    }

    /// `{interpreter}` becomes a tiny sh trampoline; every step is logged
    pub fn commands(&self) -> ProvisionCommands {
        self.commands_with_create_delay("0")
    }

    pub fn commands_with_create_delay(&self, delay: &str) -> ProvisionCommands {
        let log = self.provision_log.display();
        ProvisionCommands {
            create: vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                format!(
                    "sleep {delay} && mkdir -p {{env_root}}/bin && \
                     printf '#!/bin/sh\\nexec /bin/sh \"$@\"\\n' > {{interpreter}} && \
                     chmod +x {{interpreter}} && echo 'create {{env_root}}' >> {log}"
                ),
            ],
            install: vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                format!("echo 'install {{package}}' >> {log}"),
            ],
        }
    }

    pub fn settings(&self) -> SystemSettings {
        SystemSettings {
            project_root: self.project.clone(),
            temp_dir: self.temp_dir.clone(),
            kill_grace: Duration::from_millis(200),
            retry_policy: RetryPolicy::immediate(),
            provision_commands: self.commands(),
            provision_step_timeout: Duration::from_secs(30),
            ..SystemSettings::default()
        }
    }

    pub fn dispatcher(&self, specs: Vec<EnvironmentSpec>) -> Dispatcher {
        self.dispatcher_with(specs, self.settings())
    }

    pub fn dispatcher_with(&self, specs: Vec<EnvironmentSpec>, settings: SystemSettings) -> Dispatcher {
        let registry = Registry::new(specs).expect("valid registry");
        build_dispatcher(Arc::new(registry), settings)
    }

    pub fn provision_lines(&self) -> Vec<String> {
        std::fs::read_to_string(&self.provision_log)
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    /// Number of environment creations for `source_id`
    pub fn create_count(&self, source_id: &str) -> usize {
        let needle = format!("create {}", self.env_root(source_id).display());
        self.provision_lines()
            .iter()
            .filter(|line| **line == needle)
            .count()
    }

    /// Files currently left in the dispatcher temp dir
    pub fn staged_files(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.temp_dir) {
            Ok(entries) => entries.filter_map(|e| e.ok().map(|e| e.path())).collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Locate an executable on PATH (used to gate python-dependent tests)
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_file(candidate))
}

fn is_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}
