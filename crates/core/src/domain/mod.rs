// Domain Layer - Pure data and invariants

pub mod environment;
pub mod error;
pub mod execution;
pub mod registry;
pub mod status;

// Re-exports
pub use environment::{EnvironmentSpec, SourceId, WrapperMode};
pub use error::DomainError;
pub use execution::{
    DispatchFailure, ErrorKind, ExecutionRequest, ExecutionResult, RETURN_CODE_SENTINEL,
};
pub use registry::Registry;
pub use status::EnvironmentStatus;
