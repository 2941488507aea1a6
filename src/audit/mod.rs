//! Operations logging: records every composed call the Execution Router
//! dispatches, for later audit.

pub mod logger;

pub use logger::{OperationKind, OperationRecord, OperationsLogger, OperationsLoggerConfig};
