//! Mints the JSON-RPC request ids the transports attach to outbound
//! upstream calls. [`JsonRpcRequest::new`](crate::core::protocol::JsonRpcRequest::new)
//! deliberately leaves `id` unset; this is the single place that fills it
//! back in, so every transport produces ids from the same sequence instead
//! of racing its own counter.

use crate::core::protocol::RequestId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct Counter(AtomicU64);

impl Counter {
    fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst) as i64
    }
}

/// An `Arc`-backed id source, clonable so each transport instance can hold
/// its own handle onto the same underlying counter.
#[derive(Clone)]
pub struct SharedRequestIdGenerator {
    counter: Arc<Counter>,
}

impl SharedRequestIdGenerator {
    pub fn new() -> Self {
        Self { counter: Arc::new(Counter(AtomicU64::new(1))) }
    }

    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.counter.next())
    }
}

impl Default for SharedRequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sequential() {
        let generator = SharedRequestIdGenerator::new();
        assert_eq!(generator.next_id(), RequestId::Number(1));
        assert_eq!(generator.next_id(), RequestId::Number(2));
        assert_eq!(generator.next_id(), RequestId::Number(3));
    }

    #[test]
    fn clones_share_the_same_counter() {
        let a = SharedRequestIdGenerator::new();
        let b = a.clone();

        assert_eq!(a.next_id(), RequestId::Number(1));
        assert_eq!(b.next_id(), RequestId::Number(2));
        assert_eq!(a.next_id(), RequestId::Number(3));
    }
}
