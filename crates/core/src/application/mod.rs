// Application Layer - Use Cases

pub mod constants;
pub mod dispatcher;
pub mod executor;
pub mod locks;
pub mod retry;
pub mod status;

// Re-exports
pub use dispatcher::{Dispatcher, DispatcherDeps};
pub use executor::{ExecutorSettings, IsolatedTaskExecutor};
pub use locks::ProvisioningLocks;
pub use retry::{RetryController, RetryDecision, RetryPolicy};
pub use status::StatusReporter;
