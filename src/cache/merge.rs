//! Progressive merge-on-write of per-unit analyses.
//!
//! After every unit (or batch) the pipeline calls [`persist_merge`], which
//! reloads the stored [`PartialResultSet`], overwrites or appends the new
//! records by index, re-sorts, and writes the whole set back. A run killed
//! after unit 7 of 40 therefore restarts at unit 8, and replaying the same
//! records any number of times leaves the set unchanged.

use super::{CacheStore, StageKey};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Analysis text of one unit, keyed by its stable index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitAnalysis {
    pub index: usize,
    pub analysis: String,
}

impl UnitAnalysis {
    pub fn new(index: usize, analysis: impl Into<String>) -> Self {
        Self {
            index,
            analysis: analysis.into(),
        }
    }
}

/// Ordered, index-unique collection of unit analyses.
///
/// Invariant: records are sorted ascending by `index` with no duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartialResultSet {
    records: Vec<UnitAnalysis>,
}

impl PartialResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored set for `(file, stage, model)`, or an empty set on a miss.
    ///
    /// A stored list that violates the ordering invariant (hand-edited,
    /// written by an older build) is normalised on load.
    pub fn load(store: &CacheStore, file: &Path, stage: &StageKey, model: &str) -> Self {
        let records: Vec<UnitAnalysis> = store.load_as(file, stage, model).unwrap_or_default();
        let mut set = Self::new();
        set.merge(records);
        set
    }

    /// Overwrite by index or insert, keeping the set sorted.
    pub fn upsert(&mut self, record: UnitAnalysis) {
        match self.records.binary_search_by_key(&record.index, |r| r.index) {
            Ok(pos) => self.records[pos] = record,
            Err(pos) => self.records.insert(pos, record),
        }
    }

    /// [`upsert`](Self::upsert) every record; later records win on equal index.
    pub fn merge(&mut self, records: impl IntoIterator<Item = UnitAnalysis>) {
        for record in records {
            self.upsert(record);
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.records
            .binary_search_by_key(&index, |r| r.index)
            .ok()
            .map(|pos| self.records[pos].analysis.as_str())
    }

    pub fn contains(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[UnitAnalysis] {
        &self.records
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.records.iter().map(|r| r.index)
    }
}

/// Load, merge `new`, and save. Returns the merged set and whether the save
/// succeeded.
///
/// The load happens on every call rather than once per run so that entries
/// written by an earlier, interrupted run are never dropped.
pub fn persist_merge(
    store: &CacheStore,
    file: &Path,
    stage: &StageKey,
    model: &str,
    new: impl IntoIterator<Item = UnitAnalysis>,
) -> (PartialResultSet, bool) {
    let mut set = PartialResultSet::load(store, file, stage, model);
    set.merge(new);
    let saved = store.save_as(file, stage, model, &set);
    debug!(stage = %stage, records = set.len(), saved, "partial results merged");
    (set, saved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_and_source() -> (tempfile::TempDir, CacheStore, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("deck.pptx");
        std::fs::write(&source, b"PK").unwrap();
        let store = CacheStore::open(dir.path().join("cache")).unwrap();
        (dir, store, source)
    }

    #[test]
    fn upsert_keeps_sorted_and_unique() {
        let mut set = PartialResultSet::new();
        set.upsert(UnitAnalysis::new(3, "c"));
        set.upsert(UnitAnalysis::new(0, "a"));
        set.upsert(UnitAnalysis::new(1, "b"));
        set.upsert(UnitAnalysis::new(3, "c2"));

        assert_eq!(set.indices().collect::<Vec<_>>(), vec![0, 1, 3]);
        assert_eq!(set.get(3), Some("c2"));
        assert!(!set.contains(2));
    }

    #[test]
    fn merge_is_idempotent() {
        let (_dir, store, source) = store_and_source();
        let stage = StageKey::TEXT_ANALYZE;
        let batch = vec![UnitAnalysis::new(2, "two"), UnitAnalysis::new(0, "zero")];

        let (first, _) = persist_merge(&store, &source, &stage, "m", batch.clone());
        let (second, _) = persist_merge(&store, &source, &stage, "m", batch);
        assert_eq!(first, second);
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn merge_accumulates_across_calls() {
        let (_dir, store, source) = store_and_source();
        let stage = StageKey::VISUAL_ANALYZE;

        for i in [4usize, 1, 3] {
            let (_, saved) = persist_merge(&store, &source, &stage, "m", [UnitAnalysis::new(i, format!("u{i}"))]);
            assert!(saved);
        }

        let set = PartialResultSet::load(&store, &source, &stage, "m");
        assert_eq!(set.indices().collect::<Vec<_>>(), vec![1, 3, 4]);
        assert_eq!(set.get(4), Some("u4"));
    }

    #[test]
    fn interrupted_run_resumes_with_remaining_units() {
        let (_dir, store, source) = store_and_source();
        let stage = StageKey::TEXT_ANALYZE;

        // First run dies after two of five units.
        for i in 0..2 {
            persist_merge(&store, &source, &stage, "m", [UnitAnalysis::new(i, "first run")]);
        }

        // Second run computes only what is missing.
        let cached = PartialResultSet::load(&store, &source, &stage, "m");
        let pending: Vec<usize> = (0..5).filter(|i| !cached.contains(*i)).collect();
        assert_eq!(pending, vec![2, 3, 4]);
        for i in pending {
            persist_merge(&store, &source, &stage, "m", [UnitAnalysis::new(i, "second run")]);
        }

        let done = PartialResultSet::load(&store, &source, &stage, "m");
        assert_eq!(done.len(), 5);
        assert_eq!(done.get(0), Some("first run"));
        assert_eq!(done.get(4), Some("second run"));
    }

    #[test]
    fn unsorted_stored_list_is_normalised() {
        let (_dir, store, source) = store_and_source();
        let stage = StageKey::TEXT_ANALYZE;
        store.save(
            &source,
            &stage,
            "m",
            serde_json::json!([
                {"index": 2, "analysis": "b"},
                {"index": 0, "analysis": "a"},
                {"index": 2, "analysis": "b2"}
            ]),
        );

        let set = PartialResultSet::load(&store, &source, &stage, "m");
        assert_eq!(set.indices().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(set.get(2), Some("b2"));
    }
}
