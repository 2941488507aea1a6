pub mod sse;
pub mod stdio;
pub mod streamable;
pub mod traits;

pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use streamable::StreamableHttpTransport;
pub use traits::{Transport, TransportFactory};
