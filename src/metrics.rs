use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and retrieval activity.
#[derive(Default)]
pub struct PipelineMetrics {
    files_ingested: AtomicU64,
    elements_inserted: AtomicU64,
    duplicates_skipped: AtomicU64,
    conflicts: AtomicU64,
    orphan_references: AtomicU64,
    questions_answered: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one ingested file and what happened to its elements.
    pub fn record_file(&self, inserted: u64, duplicates: u64, conflicts: u64) {
        self.files_ingested.fetch_add(1, Ordering::Relaxed);
        self.elements_inserted.fetch_add(inserted, Ordering::Relaxed);
        self.duplicates_skipped
            .fetch_add(duplicates, Ordering::Relaxed);
        self.conflicts.fetch_add(conflicts, Ordering::Relaxed);
    }

    /// Record a processed record whose original could not be found.
    pub fn record_orphan_reference(&self) {
        self.orphan_references.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a question whose answer stream was handed to the caller.
    pub fn record_question(&self) {
        self.questions_answered.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            files_ingested: self.files_ingested.load(Ordering::Relaxed),
            elements_inserted: self.elements_inserted.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            orphan_references: self.orphan_references.load(Ordering::Relaxed),
            questions_answered: self.questions_answered.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Files ingested since startup.
    pub files_ingested: u64,
    /// Element pairs newly written.
    pub elements_inserted: u64,
    /// Inserts that found identical content already stored.
    pub duplicates_skipped: u64,
    /// Inserts rejected because the id held different content.
    pub conflicts: u64,
    /// Processed records whose reference did not resolve.
    pub orphan_references: u64,
    /// Questions answered.
    pub questions_answered: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_files_and_element_outcomes() {
        let metrics = PipelineMetrics::new();
        metrics.record_file(4, 1, 0);
        metrics.record_file(2, 0, 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.files_ingested, 2);
        assert_eq!(snapshot.elements_inserted, 6);
        assert_eq!(snapshot.duplicates_skipped, 1);
        assert_eq!(snapshot.conflicts, 1);
    }

    #[test]
    fn retrieval_counters_start_at_zero() {
        let metrics = PipelineMetrics::new();
        assert_eq!(metrics.snapshot().orphan_references, 0);
        metrics.record_orphan_reference();
        metrics.record_question();
        assert_eq!(metrics.snapshot().orphan_references, 1);
        assert_eq!(metrics.snapshot().questions_answered, 1);
    }
}
