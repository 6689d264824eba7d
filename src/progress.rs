//! Progress-callback trait for per-stage and per-unit pipeline events.
//!
//! Inject an [`Arc<dyn NotesProgressCallback>`] via
//! [`crate::config::NotesConfigBuilder::progress_callback`] to receive events
//! as the pipeline walks through its stages.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a terminal progress bar, a log, or a job
//! record without the library knowing how the host application communicates.
//! Cached units get their own event so a resumed run can show how much work
//! was skipped.
//!
//! # Example
//!
//! ```rust
//! use deck2notes::{NotesConfig, NotesProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl NotesProgressCallback for CountingCallback {
//!     fn on_unit_complete(&self, unit_num: usize, total_units: usize) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("Unit {unit_num}/{total_units} done ({done} so far)");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = NotesConfig::builder()
//!     .progress_callback(counter as Arc<dyn NotesProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::PipelineStage;
use std::sync::Arc;

/// Called by the notes pipeline as it moves through stages and units.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Unit numbers are 1-indexed.
pub trait NotesProgressCallback: Send + Sync {
    /// A stage is about to start. `total_units` is the unit count known at
    /// that point (0 before parsing).
    fn on_stage_start(&self, stage: PipelineStage, total_units: usize) {
        let _ = (stage, total_units);
    }

    /// A model request is about to be sent for a unit.
    fn on_unit_start(&self, unit_num: usize, total_units: usize) {
        let _ = (unit_num, total_units);
    }

    /// A unit was analysed and merged into the cache.
    fn on_unit_complete(&self, unit_num: usize, total_units: usize) {
        let _ = (unit_num, total_units);
    }

    /// A unit's analysis was restored from the cache; no request was sent.
    fn on_unit_cached(&self, unit_num: usize, total_units: usize) {
        let _ = (unit_num, total_units);
    }

    /// A unit received the failure sentinel.
    fn on_unit_error(&self, unit_num: usize, total_units: usize, error: &str) {
        let _ = (unit_num, total_units, error);
    }

    /// A stage finished (computed or loaded from cache).
    fn on_stage_complete(&self, stage: PipelineStage) {
        let _ = stage;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl NotesProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::NotesConfig`].
pub type ProgressCallback = Arc<dyn NotesProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        cached: AtomicUsize,
        errors: AtomicUsize,
        stages: Mutex<Vec<PipelineStage>>,
    }

    impl NotesProgressCallback for TrackingCallback {
        fn on_unit_start(&self, _unit_num: usize, _total_units: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_unit_complete(&self, _unit_num: usize, _total_units: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_unit_cached(&self, _unit_num: usize, _total_units: usize) {
            self.cached.fetch_add(1, Ordering::SeqCst);
        }

        fn on_unit_error(&self, _unit_num: usize, _total_units: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stage_complete(&self, stage: PipelineStage) {
            self.stages.lock().unwrap().push(stage);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_start(PipelineStage::Rasterized, 0);
        cb.on_unit_start(1, 5);
        cb.on_unit_complete(1, 5);
        cb.on_unit_cached(2, 5);
        cb.on_unit_error(3, 5, "timeout");
        cb.on_stage_complete(PipelineStage::UnitsAnalyzed);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_unit_cached(1, 3);
        tracker.on_unit_start(2, 3);
        tracker.on_unit_complete(2, 3);
        tracker.on_unit_start(3, 3);
        tracker.on_unit_error(3, 3, "503");
        tracker.on_stage_complete(PipelineStage::UnitsAnalyzed);

        assert_eq!(tracker.cached.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(
            *tracker.stages.lock().unwrap(),
            vec![PipelineStage::UnitsAnalyzed]
        );
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_unit_start(1, 10);
        cb.on_unit_complete(1, 10);
    }
}
