use std::sync::atomic::{AtomicU64, Ordering};

static ID: AtomicU64 = AtomicU64::new(0);

/// Retrieve a new, process-unique ID.
pub fn new_id() -> u64 {
    ID.fetch_add(1, Ordering::Relaxed)
}
