use std::sync::atomic::{AtomicU64, Ordering};

/// Counters tracking serializer activity. Shared between the serializer, its
/// storage tasks, and anyone watching from outside.
#[derive(Debug, Default)]
pub struct SerializerMetrics {
    /// Data writes issued to the device.
    pub blocks_dispatched: AtomicU64,
    /// Data writes whose physical I/O has landed.
    pub blocks_written: AtomicU64,
    /// Data writes that failed at the device.
    pub write_failures: AtomicU64,
    /// Index batches committed.
    pub batches_committed: AtomicU64,
    /// Individual index operations applied across all batches.
    pub index_ops_applied: AtomicU64,
}

impl SerializerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks_dispatched(&self) -> u64 {
        self.blocks_dispatched.load(Ordering::SeqCst)
    }

    pub fn blocks_written(&self) -> u64 {
        self.blocks_written.load(Ordering::SeqCst)
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::SeqCst)
    }

    pub fn batches_committed(&self) -> u64 {
        self.batches_committed.load(Ordering::SeqCst)
    }

    pub fn index_ops_applied(&self) -> u64 {
        self.index_ops_applied.load(Ordering::SeqCst)
    }

    /// Log a snapshot of all counters.
    pub fn log_metrics(&self) {
        tracing::info!(
            blocks_dispatched = self.blocks_dispatched(),
            blocks_written = self.blocks_written(),
            write_failures = self.write_failures(),
            batches_committed = self.batches_committed(),
            index_ops_applied = self.index_ops_applied(),
            "serializer metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = SerializerMetrics::new();
        assert_eq!(metrics.blocks_dispatched(), 0);
        assert_eq!(metrics.blocks_written(), 0);
        assert_eq!(metrics.write_failures(), 0);
        assert_eq!(metrics.batches_committed(), 0);
        assert_eq!(metrics.index_ops_applied(), 0);
    }

    #[test]
    fn test_counters_accumulate() {
        let metrics = SerializerMetrics::new();
        metrics.blocks_dispatched.fetch_add(3, Ordering::SeqCst);
        metrics.blocks_written.fetch_add(2, Ordering::SeqCst);
        assert_eq!(metrics.blocks_dispatched(), 3);
        assert_eq!(metrics.blocks_written(), 2);
    }
}
