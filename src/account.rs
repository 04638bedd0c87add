use std::sync::Arc;

use tokio::sync::Semaphore;

/// Priority grouping under which data writes are billed to the physical I/O
/// scheduler.
///
/// An account may cap how many of its writes are outstanding at once; writes
/// beyond the cap queue until a slot frees up. Fairness between accounts is
/// the scheduler's business, not ours.
#[derive(Clone)]
pub struct IoAccount {
    priority: i32,
    slots: Option<Arc<Semaphore>>,
}

impl IoAccount {
    pub(crate) fn new(priority: i32, max_outstanding: Option<usize>) -> Self {
        Self {
            priority,
            slots: max_outstanding.map(|n| {
                assert!(n > 0, "outstanding limit must be non-zero");
                Arc::new(Semaphore::new(n))
            }),
        }
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn is_limited(&self) -> bool {
        self.slots.is_some()
    }

    pub(crate) fn slots(&self) -> Option<Arc<Semaphore>> {
        self.slots.clone()
    }
}

impl std::fmt::Debug for IoAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoAccount")
            .field("priority", &self.priority)
            .field("limited", &self.is_limited())
            .finish()
    }
}
