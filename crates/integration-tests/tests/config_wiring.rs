//! Configuration -> registry -> dispatcher wiring

mod common;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use isoenv_core::application::RetryPolicy;
use isoenv_core::domain::WrapperMode;
use isoenv_infra_config::load_from_path;
use isoenv_infra_system::{build_dispatcher, ProvisionCommands, SystemSettings};

fn shipped_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join(isoenv_infra_config::CONFIG_FILE_NAME)
}

/// Test 1: The shipped isoenv.toml builds a valid five-source registry
#[test]
fn test_shipped_config_is_valid() {
    let loaded = load_from_path(&shipped_config()).unwrap();
    let registry = loaded.registry().unwrap();

    let ids: Vec<&str> = registry.source_ids().collect();
    assert_eq!(ids, vec!["benzinga", "fmp", "messari", "polygon", "twelve_data"]);

    let roots: BTreeSet<PathBuf> = registry.iter().map(|s| s.env_root.clone()).collect();
    assert_eq!(roots.len(), 5);

    let polygon = registry.get("polygon").unwrap();
    assert_eq!(polygon.dependencies[0], "urllib3==2.5.0");
    assert!(polygon.required_secrets.contains("POLYGON_API_KEY"));
    assert_eq!(polygon.timeout_seconds, 300);
    assert_eq!(polygon.wrapper, WrapperMode::Python);
}

/// Test 2: A config file drives a real dispatch end to end
#[cfg(unix)]
#[tokio::test]
async fn test_config_file_to_dispatch() {
    let fx = common::Fixture::new();
    let commands = fx.commands();
    let toml = format!(
        r#"
[dispatcher]
project_root = "project"
temp_dir = "dispatcher_tmp"
retry_base_delay_ms = 0
retry_max_delay_ms = 0

[provisioner]
create_command = {create}
install_command = {install}

[sources.benzinga]
env_root = "envs/benzinga"
dependencies = ["requests"]
wrapper = "copy"
max_retries = 0
"#,
        create = serde_json::to_string(&commands.create).unwrap(),
        install = serde_json::to_string(&commands.install).unwrap(),
    );
    let path = fx.dir.path().join("isoenv.toml");
    std::fs::write(&path, toml).unwrap();

    let loaded = load_from_path(&path).unwrap();
    let settings = SystemSettings {
        project_root: loaded.project_root(),
        temp_dir: loaded.temp_dir(),
        retry_policy: RetryPolicy::new(loaded.retry_base_delay(), loaded.retry_max_delay()),
        provision_commands: ProvisionCommands {
            create: loaded.settings.provisioner.create_command.clone().unwrap(),
            install: loaded.settings.provisioner.install_command.clone().unwrap(),
        },
        provision_step_timeout: loaded.provision_step_timeout(),
        ..SystemSettings::default()
    };
    let dispatcher = build_dispatcher(Arc::new(loaded.registry().unwrap()), settings);

    let script = fx.script("hello.sh", "echo \"from $ISOENV_SOURCE\"\n");
    let result = dispatcher.dispatch("benzinga", &script, vec![]).await;

    assert!(result.success, "unexpected failure: {:?}", result.error);
    assert_eq!(result.stdout, "from benzinga\n");
    assert_eq!(fx.create_count("benzinga"), 1);
    assert!(fx.staged_files().is_empty());
}
