//! Toast id allocation, owned per reconciler instance.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Allocates toast identifiers. Ids must be unique within one reconciler.
pub trait ToastIdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Counter starting at 1. Deterministic, which makes it the choice for tests.
#[derive(Debug, Default)]
pub struct SequenceIds {
    next: AtomicU64,
}

impl SequenceIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ToastIdGenerator for SequenceIds {
    fn next_id(&self) -> String {
        (self.next.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }
}

/// Random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIds;

impl ToastIdGenerator for UuidIds {
    fn next_id(&self) -> String {
        Uuid::new_v4().as_simple().to_string()
    }
}
