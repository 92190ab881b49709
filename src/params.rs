//! Module parameter tables.
//!
//! Every module carries a small one-row-wins table of named parameters:
//! each change appends a row stamped with the run number at which it
//! happened, and the latest row is the current value set. This keeps the
//! parameter history inspectable through the ordinary table contract — the
//! module's `_params` data surface is exactly this table — while giving the
//! runtime typed accessors instead of dynamic attribute lookup.

use crate::run_number::RunNumber;
use crate::table::{MemTable, Table, TableHandle, Value, ValueKind};
use std::sync::Arc;

/// Declaration of one module parameter: name, dtype and default value.
#[derive(Clone, Debug)]
pub struct ParamDescriptor {
    /// Parameter name.
    pub name: String,
    /// Declared dtype.
    pub kind: ValueKind,
    /// Value used until the first override.
    pub default: Value,
}

impl ParamDescriptor {
    /// Builds a descriptor.
    pub fn new(name: impl Into<String>, kind: ValueKind, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            kind,
            default: default.into(),
        }
    }
}

/// The live parameter set of a module.
pub struct Params {
    descriptors: Vec<ParamDescriptor>,
    table: Arc<MemTable>,
}

impl Params {
    pub(crate) fn new(
        descriptors: Vec<ParamDescriptor>,
        overrides: Vec<(String, Value)>,
    ) -> Self {
        let table = Arc::new(MemTable::new(
            descriptors.iter().map(|d| d.name.clone()).collect(),
        ));
        let mut initial: Vec<Value> = descriptors.iter().map(|d| d.default.clone()).collect();
        for (name, value) in overrides {
            match descriptors.iter().position(|d| d.name == name) {
                Some(pos) => initial[pos] = value,
                None => log::warn!("ignoring undeclared parameter `{}`", name),
            }
        }
        table.append_row(initial, RunNumber::start());
        Self { descriptors, table }
    }

    /// The declared descriptors, base parameters included.
    pub fn descriptors(&self) -> &[ParamDescriptor] {
        &self.descriptors
    }

    /// Current value of a parameter, if declared.
    pub fn get(&self, name: &str) -> Option<Value> {
        let row = self.table.last_row()?;
        self.table.at(row, name)
    }

    /// Current value as a float; integers widen.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name)?.as_f64()
    }

    /// Current value as an integer.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name)?.as_i64()
    }

    /// Current value as a boolean.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name)?.as_bool()
    }

    /// Current value as a string.
    pub fn get_str(&self, name: &str) -> Option<String> {
        match self.get(name)? {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Run number of the latest parameter row.
    pub fn last_update(&self) -> Option<RunNumber> {
        self.table.last_stamp()
    }

    /// Absorbs overrides from an upstream one-row parameter table: the
    /// incoming last row wins if it carries a newer stamp than our latest
    /// row; fields it does not provide (or provides as null) keep their
    /// current values. Returns whether anything was absorbed.
    pub(crate) fn absorb(&self, incoming: &dyn Table, run: RunNumber) -> bool {
        let Some(in_row) = incoming.index().last().copied() else {
            return false;
        };
        let in_stamp = incoming.stamp(in_row);
        if in_stamp <= self.last_update() {
            return false;
        }
        let merged = self.merged_row(|name| match incoming.at(in_row, name) {
            Some(v) if !v.is_null() => Some(v),
            _ => None,
        });
        self.table.append_row(merged, run);
        true
    }

    /// Merges explicit `(name, value)` overrides into a fresh row stamped
    /// with `run`. Undeclared names are dropped with a warning.
    pub(crate) fn merge(&self, values: &[(String, Value)], run: RunNumber) {
        for (name, _) in values {
            if !self.descriptors.iter().any(|d| &d.name == name) {
                log::warn!("ignoring undeclared parameter `{}`", name);
            }
        }
        let merged = self.merged_row(|name| {
            values
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
        });
        self.table.append_row(merged, run);
    }

    fn merged_row(&self, mut pick: impl FnMut(&str) -> Option<Value>) -> Vec<Value> {
        self.descriptors
            .iter()
            .map(|d| {
                pick(&d.name)
                    .or_else(|| self.get(&d.name))
                    .unwrap_or_else(|| d.default.clone())
            })
            .collect()
    }

    /// The parameter history as a read-only table handle (the module's
    /// `_params` data surface).
    pub(crate) fn table_handle(&self) -> TableHandle {
        self.table.clone() as TableHandle
    }

    /// Current values as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for d in &self.descriptors {
            let value = self.get(&d.name).unwrap_or(Value::Null);
            map.insert(
                d.name.clone(),
                serde_json::to_value(&value).unwrap_or(serde_json::Value::Null),
            );
        }
        serde_json::Value::Object(map)
    }
}

impl std::fmt::Debug for Params {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut dbg = fmt.debug_map();
        for d in &self.descriptors {
            dbg.entry(&d.name, &self.get(&d.name));
        }
        dbg.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptors() -> Vec<ParamDescriptor> {
        vec![
            ParamDescriptor::new("quantum", ValueKind::Float, 1.0),
            ParamDescriptor::new("limit", ValueKind::Int, 100i64),
        ]
    }

    #[test]
    fn defaults_and_overrides() {
        let p = Params::new(
            descriptors(),
            vec![("limit".to_owned(), Value::Int(7))],
        );
        assert_eq!(p.get_f64("quantum"), Some(1.0));
        assert_eq!(p.get_i64("limit"), Some(7));
        assert_eq!(p.get("nope"), None);
        assert_eq!(p.last_update(), Some(RunNumber::start()));
    }

    #[test]
    fn absorb_newer_row_wins_and_falls_back() {
        let p = Params::new(descriptors(), Vec::new());

        let incoming = MemTable::new(vec!["limit".to_owned()]);
        incoming.append_row(vec![Value::Int(42)], RunNumber::from(7));

        assert!(p.absorb(&incoming, RunNumber::from(7)));
        assert_eq!(p.get_i64("limit"), Some(42));
        // field not provided upstream keeps its previous value
        assert_eq!(p.get_f64("quantum"), Some(1.0));
        assert_eq!(p.last_update(), Some(RunNumber::from(7)));

        // a second absorb of the same row is a no-op
        assert!(!p.absorb(&incoming, RunNumber::from(8)));
    }

    #[test]
    fn merge_stamps_and_skips_undeclared() {
        let p = Params::new(descriptors(), Vec::new());
        p.merge(
            &[
                ("quantum".to_owned(), Value::Float(0.25)),
                ("ghost".to_owned(), Value::Int(1)),
            ],
            RunNumber::from(3),
        );
        assert_eq!(p.get_f64("quantum"), Some(0.25));
        assert_eq!(p.get("ghost"), None);
        assert_eq!(p.last_update(), Some(RunNumber::from(3)));
    }
}
