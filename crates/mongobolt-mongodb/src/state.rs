//! Field-level change tracking for documents
//!
//! A tracker records which fields were reassigned since the last save, plus
//! each field's value at the moment of its first reassignment. That is all
//! the save path needs to build a minimal `$set` payload; there is never a
//! whole-document snapshot.
//!
//! In-place mutation of a nested container (appending to a list held inside
//! a field) does not pass through `track_change` and is not detected. The
//! supported pattern is to reassign the outer field.

use std::collections::{BTreeMap, HashMap};

/// Copy-on-write change set for one document.
///
/// Generic over the value type: the engine works with `bson::Bson`, the
/// binding instantiates it with owned Python references. The changed-field
/// set is exactly the key set of `original` — a field is changed iff its
/// pre-change value was snapshotted.
#[derive(Debug, Clone, Default)]
pub struct StateTracker<V> {
    original: BTreeMap<String, V>,
}

impl<V> StateTracker<V> {
    pub fn new() -> Self {
        StateTracker {
            original: BTreeMap::new(),
        }
    }

    /// Record a field reassignment. Only the first write per field stores a
    /// snapshot; later writes to the same field are no-ops because the
    /// rollback target is the value before the first change.
    pub fn track_change(&mut self, name: &str, old_value: V) {
        self.original.entry(name.to_string()).or_insert(old_value);
    }

    pub fn is_modified(&self) -> bool {
        !self.original.is_empty()
    }

    /// Names of the changed fields, in stable (sorted) order
    pub fn changed_fields(&self) -> impl Iterator<Item = &str> {
        self.original.keys().map(|k| k.as_str())
    }

    /// The snapshotted pre-change value of a field, if it changed
    pub fn original_value(&self, name: &str) -> Option<&V> {
        self.original.get(name)
    }

    /// Clear the tracker. Called immediately after a successful save.
    pub fn reset(&mut self) {
        self.original.clear();
    }
}

impl<V: Clone> StateTracker<V> {
    /// Current values of every changed field, looked up in `data`. This is
    /// the `$set` payload of a minimal update. Fields removed from `data`
    /// since their change are skipped.
    pub fn get_changes(&self, data: &HashMap<String, V>) -> BTreeMap<String, V> {
        self.original
            .keys()
            .filter_map(|name| data.get(name).map(|value| (name.clone(), value.clone())))
            .collect()
    }

    /// Restore every changed field in `data` to its snapshotted value and
    /// clear the tracker.
    pub fn rollback(&mut self, data: &mut HashMap<String, V>) {
        for (name, value) in std::mem::take(&mut self.original) {
            data.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::Bson;

    fn data(entries: &[(&str, i64)]) -> HashMap<String, Bson> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), Bson::Int64(*v)))
            .collect()
    }

    #[test]
    fn test_fresh_tracker_is_unmodified() {
        let tracker: StateTracker<Bson> = StateTracker::new();
        assert!(!tracker.is_modified());
        assert!(tracker.get_changes(&data(&[("age", 30)])).is_empty());
    }

    #[test]
    fn test_track_change_marks_modified() {
        let mut tracker = StateTracker::new();
        tracker.track_change("age", Bson::Int64(30));
        assert!(tracker.is_modified());
        assert_eq!(tracker.changed_fields().collect::<Vec<_>>(), vec!["age"]);
    }

    #[test]
    fn test_first_write_snapshot_wins() {
        let mut tracker = StateTracker::new();
        tracker.track_change("age", Bson::Int64(30));
        tracker.track_change("age", Bson::Int64(31));
        assert_eq!(tracker.original_value("age"), Some(&Bson::Int64(30)));
    }

    #[test]
    fn test_get_changes_returns_current_values() {
        let mut tracker = StateTracker::new();
        tracker.track_change("age", Bson::Int64(30));
        // Data already holds the new value; the tracker only knows the name
        let changes = tracker.get_changes(&data(&[("age", 31), ("name", 0)]));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.get("age"), Some(&Bson::Int64(31)));
    }

    #[test]
    fn test_rollback_restores_and_clears() {
        let mut tracker = StateTracker::new();
        let mut doc = data(&[("age", 31), ("name", 7)]);
        tracker.track_change("age", Bson::Int64(30));

        tracker.rollback(&mut doc);
        assert_eq!(doc.get("age"), Some(&Bson::Int64(30)));
        assert_eq!(doc.get("name"), Some(&Bson::Int64(7)));
        assert!(!tracker.is_modified());
    }

    #[test]
    fn test_reset_then_get_changes_is_empty() {
        let mut tracker = StateTracker::new();
        tracker.track_change("age", Bson::Int64(30));
        tracker.reset();

        // Mutations that bypassed track_change stay invisible
        let mutated = data(&[("age", 99), ("extra", 1)]);
        assert!(!tracker.is_modified());
        assert!(tracker.get_changes(&mutated).is_empty());
    }

    #[test]
    fn test_changed_fields_in_stable_order() {
        let mut tracker = StateTracker::new();
        tracker.track_change("zeta", Bson::Int64(1));
        tracker.track_change("alpha", Bson::Int64(2));
        let fields: Vec<&str> = tracker.changed_fields().collect();
        assert_eq!(fields, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_get_changes_skips_removed_fields() {
        let mut tracker = StateTracker::new();
        tracker.track_change("gone", Bson::Int64(1));
        let changes = tracker.get_changes(&data(&[("other", 2)]));
        assert!(changes.is_empty());
    }
}
