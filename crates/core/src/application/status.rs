// Status Reporter
// Cheap per-source health from on-disk checks; never installs or spawns
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::domain::{EnvironmentStatus, Registry};
use crate::port::{Provisioner, TimeProvider};

pub struct StatusReporter {
    provisioner: Arc<dyn Provisioner>,
    time_provider: Arc<dyn TimeProvider>,
}

impl StatusReporter {
    pub fn new(provisioner: Arc<dyn Provisioner>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            provisioner,
            time_provider,
        }
    }

    /// Health of every registered source, keyed by source_id
    ///
    /// Pure read: safe to call while dispatches run against the same registry.
    pub fn status(&self, registry: &Registry) -> BTreeMap<String, EnvironmentStatus> {
        registry
            .iter()
            .map(|spec| {
                let probe = self.provisioner.probe(spec);
                let status = EnvironmentStatus {
                    source_id: spec.source_id.clone(),
                    provisioned: probe.is_provisioned(),
                    interpreter_exists: probe.interpreter_exists,
                    root_exists: probe.root_exists,
                    env_root: spec.env_root.clone(),
                    interpreter_path: spec.interpreter_path.clone(),
                    last_checked_at: self.time_provider.now(),
                    detail: probe.detail,
                };

                debug!(
                    source_id = %status.source_id,
                    provisioned = status.provisioned,
                    "Environment status checked"
                );

                (spec.source_id.clone(), status)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EnvironmentSpec;
    use crate::port::provisioner::MockProvisioner;
    use crate::port::time_provider::SystemTimeProvider;
    use crate::port::EnvironmentProbe;

    #[test]
    fn test_status_reports_every_source_without_provisioning() {
        let mut provisioner = MockProvisioner::new();
        provisioner.expect_ensure_ready().times(0);
        provisioner.expect_probe().returning(|spec| {
            let ready = spec.source_id == "benzinga";
            EnvironmentProbe {
                root_exists: ready,
                interpreter_exists: ready,
                dependencies_recorded: ready,
                detail: if ready { "ready" } else { "environment root missing" }.to_string(),
            }
        });

        let registry = Registry::new(vec![
            EnvironmentSpec::new("benzinga", "/envs/benzinga"),
            EnvironmentSpec::new("polygon", "/envs/polygon"),
        ])
        .unwrap();

        let reporter = StatusReporter::new(Arc::new(provisioner), Arc::new(SystemTimeProvider));
        let status = reporter.status(&registry);

        assert_eq!(status.len(), 2);
        assert!(status["benzinga"].provisioned);
        assert!(status["benzinga"].interpreter_exists);
        assert!(!status["polygon"].provisioned);
        assert!(!status["polygon"].root_exists);
        assert_eq!(status["polygon"].detail, "environment root missing");
    }

    #[test]
    fn test_interpreter_without_manifest_is_not_provisioned() {
        let mut provisioner = MockProvisioner::new();
        provisioner.expect_probe().returning(|_| EnvironmentProbe {
            root_exists: true,
            interpreter_exists: true,
            dependencies_recorded: false,
            detail: "dependency manifest missing".to_string(),
        });

        let registry = Registry::new(vec![EnvironmentSpec::new("fmp", "/envs/fmp")]).unwrap();
        let reporter = StatusReporter::new(Arc::new(provisioner), Arc::new(SystemTimeProvider));
        let status = reporter.status(&registry);

        assert!(status["fmp"].interpreter_exists);
        assert!(!status["fmp"].provisioned);
    }
}
