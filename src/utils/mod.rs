pub mod errors;
pub mod tracing;

pub use errors::{CoreError, CoreResult};
pub use tracing::{init_tracing, vmcp_span};
