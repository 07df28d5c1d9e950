// Per-source provisioning locks
//
// Held only across the provisioning check-and-install sequence, never while a
// task runs. Two sources never contend; two callers of one source serialize.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

use crate::domain::Registry;

#[derive(Default)]
pub struct ProvisioningLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ProvisioningLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// One lock per registered source, created up front
    pub fn for_registry(registry: &Registry) -> Self {
        let locks = registry
            .source_ids()
            .map(|id| (id.to_string(), Arc::new(AsyncMutex::new(()))))
            .collect();
        Self {
            locks: Mutex::new(locks),
        }
    }

    /// Lock for `source_id`, created lazily for specs outside the registry
    pub fn for_source(&self, source_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(source_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EnvironmentSpec;

    #[test]
    fn test_same_source_shares_lock() {
        let registry = Registry::new(vec![EnvironmentSpec::new("polygon", "/e/p")]).unwrap();
        let locks = ProvisioningLocks::for_registry(&registry);

        let a = locks.for_source("polygon");
        let b = locks.for_source("polygon");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_different_sources_do_not_contend() {
        let locks = ProvisioningLocks::new();
        let benzinga = locks.for_source("benzinga");
        let polygon = locks.for_source("polygon");

        let _held = benzinga.lock().await;
        assert!(polygon.try_lock().is_ok());
        assert!(benzinga.try_lock().is_err());
    }
}
