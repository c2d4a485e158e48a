//! Progress reporting for chunked uploads.

use qsnap_core::LoadPhase;

/// Trait for observing `load` progress.
///
/// Implement this trait to drive a progress display. The client calls it
/// after every acknowledged chunk; it cannot influence the upload.
pub trait LoadObserver: Send {
    /// A chunk was acknowledged.
    ///
    /// # Arguments
    /// * `phase` - Phase the chunk was sent in
    /// * `sent` - Bytes acknowledged so far, this chunk included
    /// * `total` - Blob length
    fn on_chunk(&mut self, phase: LoadPhase, sent: usize, total: usize);

    /// The remote side materialized the snapshot.
    fn on_finished(&mut self, _name: &str) {}
}

/// Observer that ignores all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl LoadObserver for NoopObserver {
    fn on_chunk(&mut self, _phase: LoadPhase, _sent: usize, _total: usize) {}
}

/// Observer that logs every `step` percent of progress through `tracing`.
#[derive(Debug, Clone)]
pub struct LogObserver {
    step: usize,
    next_mark: usize,
}

impl LogObserver {
    /// Create an observer logging every `step` percent (clamped to 1..=100).
    #[must_use]
    pub fn new(step: usize) -> Self {
        let step = step.clamp(1, 100);
        Self { step, next_mark: step }
    }
}

impl Default for LogObserver {
    fn default() -> Self {
        Self::new(10)
    }
}

impl LoadObserver for LogObserver {
    fn on_chunk(&mut self, _phase: LoadPhase, sent: usize, total: usize) {
        let percent = if total == 0 { 100 } else { sent * 100 / total };
        if percent >= self.next_mark {
            tracing::info!(sent, total, "Uploaded {percent}%");
            self.next_mark = (percent / self.step + 1) * self.step;
        }
    }

    fn on_finished(&mut self, name: &str) {
        tracing::debug!(name, "Upload finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_observer_advances_marks() {
        let mut observer = LogObserver::new(25);
        observer.on_chunk(LoadPhase::Start, 10, 100);
        assert_eq!(observer.next_mark, 25);
        observer.on_chunk(LoadPhase::Continuing, 60, 100);
        assert_eq!(observer.next_mark, 75);
        observer.on_chunk(LoadPhase::Continuing, 100, 100);
        assert_eq!(observer.next_mark, 125);
    }

    #[test]
    fn test_log_observer_empty_blob() {
        let mut observer = LogObserver::default();
        observer.on_chunk(LoadPhase::Start, 0, 0);
        assert_eq!(observer.next_mark, 110);
    }
}
