// Dispatcher constants (No magic values)
use std::time::Duration;

/// Default cap on captured stdout/stderr, per stream (4 MiB)
pub const DEFAULT_OUTPUT_CAP_BYTES: usize = 4 * 1024 * 1024;

/// Grace period between SIGTERM and SIGKILL on timeout (2s)
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// First retry delay (1s)
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on any retry delay (10s)
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

/// Per-command provisioning deadline (15 minutes; pip can be slow)
pub const DEFAULT_PROVISION_STEP_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Parent variables forwarded to every child besides secrets
pub const DEFAULT_ENV_PASSTHROUGH: &[&str] = &["PATH", "HOME", "LANG", "TMPDIR", "SYSTEMROOT"];

/// Child variable naming the source it runs for
pub const SOURCE_ENV_VAR: &str = "ISOENV_SOURCE";

#[cfg(windows)]
pub const PATH_LIST_SEPARATOR: char = ';';

#[cfg(not(windows))]
pub const PATH_LIST_SEPARATOR: char = ':';
