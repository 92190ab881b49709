//! Per-slot bookkeeping of what changed upstream since a consumer last ran.
//!
//! A `ChangeManager` remembers the index and columns of an upstream table as
//! they were at its last refresh, and on every [`ChangeManager::update`]
//! computes which rows were created, updated or deleted since. Each of the
//! three kinds has its own buffering flag: buffered kinds accumulate across
//! refreshes until the consumer pops them with the FIFO `next_*` calls,
//! unbuffered kinds are replaced wholesale on every refresh.

use crate::indices::{self, IndexSpan, RowIndex};
use crate::module::ModuleState;
use crate::run_number::RunNumber;
use crate::table::Table;

/// Column-set difference between two refreshes of an upstream table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ColumnChanges {
    /// Columns that appeared.
    pub created: Vec<String>,
    /// Columns present in both states.
    pub kept: Vec<String>,
    /// Columns that disappeared.
    pub deleted: Vec<String>,
}

fn column_changes(new: &[String], old: &[String]) -> ColumnChanges {
    ColumnChanges {
        created: new.iter().filter(|c| !old.contains(c)).cloned().collect(),
        kept: new.iter().filter(|c| old.contains(c)).cloned().collect(),
        deleted: old.iter().filter(|c| !new.contains(c)).cloned().collect(),
    }
}

/// Tracks created/updated/deleted rows of one upstream table for one
/// consumer.
pub struct ChangeManager {
    buffer_created: bool,
    buffer_updated: bool,
    buffer_deleted: bool,
    manage_columns: bool,
    last_update: Option<RunNumber>,
    index: Vec<RowIndex>,
    columns: Vec<String>,
    created: Vec<RowIndex>,
    updated: Vec<RowIndex>,
    deleted: Vec<RowIndex>,
    column_changes: Option<ColumnChanges>,
}

impl Default for ChangeManager {
    fn default() -> Self {
        // progressive pipelines mostly append; track creations by default
        Self::new(true, false, false)
    }
}

impl ChangeManager {
    /// Creates a manager with the given buffering flags for created,
    /// updated and deleted rows.
    pub fn new(buffer_created: bool, buffer_updated: bool, buffer_deleted: bool) -> Self {
        Self {
            buffer_created,
            buffer_updated,
            buffer_deleted,
            manage_columns: true,
            last_update: None,
            index: Vec::new(),
            columns: Vec::new(),
            created: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
            column_changes: None,
        }
    }

    /// Returns the manager to its pristine state: the next [`update`] will
    /// re-emit every live row as created.
    ///
    /// [`update`]: ChangeManager::update
    pub fn reset(&mut self) {
        self.last_update = None;
        self.index.clear();
        self.columns.clear();
        self.created.clear();
        self.updated.clear();
        self.deleted.clear();
        self.column_changes = None;
    }

    /// Run number of the last refresh; `None` before the first.
    pub fn last_update(&self) -> Option<RunNumber> {
        self.last_update
    }

    /// `Ready` when any kind with buffering on has pending items, else
    /// `Blocked`.
    pub fn next_state(&self) -> ModuleState {
        if self.buffer_created && self.has_created() {
            return ModuleState::Ready;
        }
        if self.buffer_updated && self.has_updated() {
            return ModuleState::Ready;
        }
        if self.buffer_deleted && self.has_deleted() {
            return ModuleState::Ready;
        }
        ModuleState::Blocked
    }

    /// Refreshes the diff state against the upstream table as of
    /// `run_number`.
    ///
    /// Calling with a run number at or before the last refresh is a no-op,
    /// so re-running the same `(run, table)` pair changes nothing. An
    /// upstream index with duplicates is a storage contract violation: it is
    /// logged and the state is left untouched.
    pub fn update(&mut self, run_number: RunNumber, table: &dyn Table) {
        if self.last_update.map_or(false, |last| run_number <= last) {
            return;
        }
        let index = table.index();
        if indices::has_duplicates(&index) {
            log::error!("cannot update changes, upstream index has duplicates");
            return;
        }

        match self.last_update {
            None => {
                self.index = index;
                self.columns = table.columns();
                self.created = self.index.clone();
                self.updated.clear();
                self.deleted.clear();
                if self.manage_columns {
                    self.column_changes = Some(ColumnChanges {
                        created: self.columns.clone(),
                        ..ColumnChanges::default()
                    });
                }
            }
            Some(last) => {
                let old = &self.index;
                let is_prefix = old.len() <= index.len() && old[..] == index[..old.len()];
                let (created, updated, deleted) = if is_prefix {
                    // common append-only case
                    (
                        index[old.len()..].to_vec(),
                        stamped_after(table, old, last),
                        Vec::new(),
                    )
                } else {
                    let kept = indices::intersection(old, &index);
                    (
                        indices::difference(&index, old),
                        stamped_after(table, &kept, last),
                        indices::difference(old, &index),
                    )
                };

                if self.buffer_created {
                    // updates to rows still buffered as created are redundant
                    let updated = indices::difference(&updated, &self.created);
                    self.created = indices::union(
                        &indices::difference(&self.created, &deleted),
                        &created,
                    );
                    self.merge_updated(&updated, &deleted);
                } else {
                    self.created = created;
                    self.merge_updated(&updated, &deleted);
                }

                if self.buffer_deleted {
                    self.deleted = indices::union(&self.deleted, &deleted);
                } else {
                    self.deleted = deleted;
                }

                self.index = index;
                let columns = table.columns();
                if self.manage_columns {
                    self.column_changes = Some(column_changes(&columns, &self.columns));
                }
                self.columns = columns;
            }
        }
        self.last_update = Some(run_number);
        log::debug!(
            "refreshed changes at {:?}: created:{}/updated:{}/deleted:{}",
            run_number,
            self.created.len(),
            self.updated.len(),
            self.deleted.len()
        );
    }

    fn merge_updated(&mut self, updated: &[RowIndex], deleted: &[RowIndex]) {
        if self.buffer_updated {
            self.updated =
                indices::union(&indices::difference(&self.updated, deleted), updated);
        } else {
            self.updated = updated.to_vec();
        }
    }

    /// Column diff observed at the last refresh, when column tracking is on.
    pub fn column_changes(&self) -> Option<&ColumnChanges> {
        self.column_changes.as_ref()
    }

    /// Toggles column tracking.
    pub fn manage_columns(&mut self, on: bool) {
        self.manage_columns = on;
        if !on {
            self.column_changes = None;
        }
    }

    /// Toggles accumulation of created rows; turning it off discards the
    /// pending buffer.
    pub fn buffer_created(&mut self, on: bool) {
        self.buffer_created = on;
        if !on {
            self.created.clear();
        }
    }

    /// Toggles accumulation of updated rows; turning it off discards the
    /// pending buffer.
    pub fn buffer_updated(&mut self, on: bool) {
        self.buffer_updated = on;
        if !on {
            self.updated.clear();
        }
    }

    /// Toggles accumulation of deleted rows; turning it off discards the
    /// pending buffer.
    pub fn buffer_deleted(&mut self, on: bool) {
        self.buffer_deleted = on;
        if !on {
            self.deleted.clear();
        }
    }

    /// Pops at most `n` pending created rows from the front; `None` pops
    /// them all. Without created-buffering there is nothing to consume and
    /// the span is empty; the last refresh's creations are still visible
    /// through [`has_created`](ChangeManager::has_created).
    pub fn next_created(&mut self, n: Option<usize>) -> IndexSpan {
        if !self.buffer_created {
            return IndexSpan::empty();
        }
        pop_front(&mut self.created, n)
    }

    /// Pops at most `n` pending updated rows from the front; `None` pops
    /// them all. Empty without updated-buffering.
    pub fn next_updated(&mut self, n: Option<usize>) -> IndexSpan {
        if !self.buffer_updated {
            return IndexSpan::empty();
        }
        pop_front(&mut self.updated, n)
    }

    /// Pops at most `n` pending deleted rows from the front; `None` pops
    /// them all. Empty without deleted-buffering.
    pub fn next_deleted(&mut self, n: Option<usize>) -> IndexSpan {
        if !self.buffer_deleted {
            return IndexSpan::empty();
        }
        pop_front(&mut self.deleted, n)
    }

    /// Whether created rows are pending.
    pub fn has_created(&self) -> bool {
        !self.created.is_empty()
    }

    /// Whether updated rows are pending.
    pub fn has_updated(&self) -> bool {
        !self.updated.is_empty()
    }

    /// Whether deleted rows are pending.
    pub fn has_deleted(&self) -> bool {
        !self.deleted.is_empty()
    }

    /// Number of pending created rows.
    pub fn created_length(&self) -> usize {
        self.created.len()
    }

    /// Number of pending updated rows.
    pub fn updated_length(&self) -> usize {
        self.updated.len()
    }

    /// Number of pending deleted rows.
    pub fn deleted_length(&self) -> usize {
        self.deleted.len()
    }

    /// Empties the created buffer.
    pub fn flush_created(&mut self) {
        self.created.clear();
    }

    /// Empties the updated buffer.
    pub fn flush_updated(&mut self) {
        self.updated.clear();
    }

    /// Empties the deleted buffer.
    pub fn flush_deleted(&mut self) {
        self.deleted.clear();
    }

    /// Empties all three buffers.
    pub fn flush_buffers(&mut self) {
        self.flush_created();
        self.flush_updated();
        self.flush_deleted();
    }

    /// Summary for scheduler snapshots.
    pub(crate) fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "last_update": self.last_update.map(RunNumber::as_u64),
            "created": self.created.len(),
            "updated": self.updated.len(),
            "deleted": self.deleted.len(),
        })
    }
}

fn stamped_after(table: &dyn Table, rows: &[RowIndex], last: RunNumber) -> Vec<RowIndex> {
    rows.iter()
        .copied()
        .filter(|&i| table.stamp(i).map_or(false, |s| s > last))
        .collect()
}

fn pop_front(buffer: &mut Vec<RowIndex>, n: Option<usize>) -> IndexSpan {
    let n = n.unwrap_or(buffer.len()).min(buffer.len());
    let rest = buffer.split_off(n);
    let head = std::mem::replace(buffer, rest);
    IndexSpan::from_indices(head)
}
