//! Handle allocation for objects that cross the provider/mirror boundary.
//!
//! Each object category gets its own allocator. Values are monotonically
//! increasing and never reused for the lifetime of the process, even after
//! the referent is disposed, so a stale handle can never alias a live object.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct HandleAllocator {
    next: AtomicU64,
}

impl HandleAllocator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceControlHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceHandle(pub u64);

/// Opaque capability token standing in for a non-trusted resource command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyToken(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_monotonic_and_unique() {
        let alloc = HandleAllocator::new();
        let mut seen = Vec::new();
        for _ in 0..64 {
            let h = alloc.next();
            assert!(seen.iter().all(|&prev| prev < h));
            seen.push(h);
        }
    }

    #[test]
    fn disposal_does_not_recycle() {
        // Allocation has no "free" operation by construction; simulate a
        // create/dispose churn and check the counter keeps climbing.
        let alloc = HandleAllocator::new();
        let first = alloc.next();
        let mut live = vec![alloc.next(), alloc.next()];
        live.clear();
        let later = alloc.next();
        assert!(later > first);
        assert_eq!(later, first + 3);
    }
}
