// Environment Variable Source Port
//
// Secrets and passthrough variables are read at dispatch time through this
// port so tests can inject a fake parent environment.

/// Read access to the parent process environment
#[cfg_attr(test, mockall::automock)]
pub trait EnvSource: Send + Sync {
    /// Value of `name`, or None when unset or not valid unicode
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment (production)
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::BTreeMap;

    /// Fixed environment backed by a map
    #[derive(Debug, Clone, Default)]
    pub struct StaticEnv {
        vars: BTreeMap<String, String>,
    }

    impl StaticEnv {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
            self.vars.insert(name.into(), value.into());
            self
        }
    }

    impl EnvSource for StaticEnv {
        fn var(&self, name: &str) -> Option<String> {
            self.vars.get(name).cloned()
        }
    }
}
