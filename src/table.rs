//! The table contract the runtime consumes, and a minimal in-memory
//! implementation.
//!
//! The core never owns analytic storage: modules publish their results
//! through opaque [`TableHandle`]s, and the runtime only reads the index,
//! the columns, individual cells and the reserved `_update` stamp. The
//! storage promises to write `_update` atomically with each row write, which
//! is what lets a [`crate::ChangeManager`] tell updated rows apart with
//! nothing but run-number comparisons.
//!
//! [`MemTable`] exists because the parameter (`_params`) and trace
//! (`_trace`) surfaces need a concrete table, as do tests; heavyweight
//! columnar storage is a storage-layer concern, not ours.

use crate::indices::RowIndex;
use crate::run_number::RunNumber;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Name of the reserved per-row stamp column: the run number at which a row
/// was last written.
pub const UPDATE_COLUMN: &str = "_update";

/// A scalar cell value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent / not-a-value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Double-precision float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
}

impl Value {
    /// The dtype of this value; `None` for `Null`.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ValueKind::Bool),
            Value::Int(_) => Some(ValueKind::Int),
            Value::Float(_) => Some(ValueKind::Float),
            Value::Str(_) => Some(ValueKind::Str),
        }
    }

    /// Whether this is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(f) => Some(f),
            Value::Int(i) => Some(i as f64),
            _ => None,
        }
    }

    /// Integer view.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }

    /// Boolean view.
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// String view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

/// The dtype of a parameter or column, as declared in descriptors.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Booleans.
    Bool,
    /// Signed integers.
    Int,
    /// Double-precision floats.
    Float,
    /// Strings.
    Str,
}

/// Read-only view of a growing table, as the runtime consumes it.
///
/// Implementations live behind [`TableHandle`]s and use interior mutability;
/// the owning module mutates through its own concrete type, everyone else
/// reads through this trait. A returned index is a snapshot: it reflects one
/// consistent state of the table at the time of the call.
pub trait Table: Send + Sync {
    /// Number of live rows.
    fn len(&self) -> usize;

    /// Whether the table has no live rows.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The current row index, in ascending order.
    fn index(&self) -> Vec<RowIndex>;

    /// The column names, including [`UPDATE_COLUMN`].
    fn columns(&self) -> Vec<String>;

    /// The value at `(row, column)`; `None` when the row or column is
    /// absent.
    fn at(&self, row: RowIndex, column: &str) -> Option<Value>;

    /// The run number at which `row` was last written; `None` when the row
    /// is absent. This is the typed accessor for [`UPDATE_COLUMN`].
    fn stamp(&self, row: RowIndex) -> Option<RunNumber>;
}

/// Shared handle to a table.
pub type TableHandle = Arc<dyn Table>;

/// A small in-memory table with a monotonic row index.
///
/// Appends allocate fresh indices; removals leave holes. Every write stamps
/// the affected row with the supplied run number, honouring the `_update`
/// contract.
pub struct MemTable {
    inner: RwLock<MemTableInner>,
}

struct MemTableInner {
    columns: Vec<String>,
    rows: BTreeMap<RowIndex, MemRow>,
    next_index: RowIndex,
}

struct MemRow {
    values: Vec<Value>,
    stamp: RunNumber,
}

impl MemTable {
    /// Creates an empty table with the given data columns. The `_update`
    /// column is implicit and must not be listed.
    pub fn new(columns: Vec<String>) -> Self {
        assert!(
            columns.iter().all(|c| c != UPDATE_COLUMN),
            "the {} column is implicit",
            UPDATE_COLUMN
        );
        Self {
            inner: RwLock::new(MemTableInner {
                columns,
                rows: BTreeMap::new(),
                next_index: 0,
            }),
        }
    }

    /// Appends a row, stamping it with `run`, and returns its index. The
    /// value vector must match the declared columns.
    pub fn append_row(&self, values: Vec<Value>, run: RunNumber) -> RowIndex {
        let mut inner = self.inner.write();
        assert_eq!(values.len(), inner.columns.len(), "column arity mismatch");
        let row = inner.next_index;
        inner.next_index += 1;
        inner.rows.insert(row, MemRow { values, stamp: run });
        row
    }

    /// Overwrites one cell and re-stamps the row. Returns false when the row
    /// or column does not exist.
    pub fn write(&self, row: RowIndex, column: &str, value: Value, run: RunNumber) -> bool {
        let mut inner = self.inner.write();
        let Some(pos) = inner.columns.iter().position(|c| c == column) else {
            return false;
        };
        match inner.rows.get_mut(&row) {
            Some(r) => {
                r.values[pos] = value;
                r.stamp = run;
                true
            }
            None => false,
        }
    }

    /// Removes a row, leaving a hole in the index. Returns whether the row
    /// existed.
    pub fn remove_row(&self, row: RowIndex) -> bool {
        self.inner.write().rows.remove(&row).is_some()
    }

    /// The stamp of the most recently stamped row, if any.
    pub fn last_stamp(&self) -> Option<RunNumber> {
        self.inner.read().rows.values().map(|r| r.stamp).max()
    }

    /// The index of the last row, if any.
    pub fn last_row(&self) -> Option<RowIndex> {
        self.inner.read().rows.keys().next_back().copied()
    }
}

impl Table for MemTable {
    fn len(&self) -> usize {
        self.inner.read().rows.len()
    }

    fn index(&self) -> Vec<RowIndex> {
        self.inner.read().rows.keys().copied().collect()
    }

    fn columns(&self) -> Vec<String> {
        let inner = self.inner.read();
        let mut cols = inner.columns.clone();
        cols.push(UPDATE_COLUMN.to_owned());
        cols
    }

    fn at(&self, row: RowIndex, column: &str) -> Option<Value> {
        let inner = self.inner.read();
        let r = inner.rows.get(&row)?;
        if column == UPDATE_COLUMN {
            return Some(Value::Int(r.stamp.as_u64() as i64));
        }
        let pos = inner.columns.iter().position(|c| c == column)?;
        Some(r.values[pos].clone())
    }

    fn stamp(&self, row: RowIndex) -> Option<RunNumber> {
        self.inner.read().rows.get(&row).map(|r| r.stamp)
    }
}
