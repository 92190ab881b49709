//! Typed edges between module outputs and module inputs.
//!
//! A [`Slot`] connects one named output of a producer module to one named
//! input of a consumer module. The consumer owns the slot (and the
//! [`ChangeManager`] inside it); the producer is referenced by id only.
//! [`SlotDescriptor`]s are what modules declare; slots are what `connect`
//! materialises after checking the declared types.

use crate::change_manager::ChangeManager;
use crate::graph::Dataflow;
use crate::module::{ModuleId, ModuleState};
use crate::run_number::RunNumber;
use crate::table::TableHandle;
use serde::Serialize;

/// Declared content type of a slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotType {
    /// Accepts any producer output.
    Any,
    /// A table handle.
    Table,
}

impl SlotType {
    /// Whether an input expecting `self` accepts an output providing
    /// `provided`.
    pub fn accepts(self, provided: SlotType) -> bool {
        self == SlotType::Any || self == provided
    }
}

/// Which change kinds a consumer wants accumulated across ticks on an
/// input slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Buffering {
    /// Accumulate created rows.
    pub created: bool,
    /// Accumulate updated rows.
    pub updated: bool,
    /// Accumulate deleted rows.
    pub deleted: bool,
}

impl Default for Buffering {
    fn default() -> Self {
        Buffering {
            created: true,
            updated: false,
            deleted: false,
        }
    }
}

/// Declaration of one input or output slot on a module.
#[derive(Clone, Debug)]
pub struct SlotDescriptor {
    /// Slot name, unique per side of the module.
    pub name: String,
    /// Declared content type.
    pub slot_type: SlotType,
    /// Required slots must be connected (inputs) or consumed (outputs) for
    /// the module to validate.
    pub required: bool,
    /// Buffering flags used for the change manager of an input slot.
    pub buffering: Buffering,
}

impl SlotDescriptor {
    /// A required table slot.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot_type: SlotType::Table,
            required: true,
            buffering: Buffering::default(),
        }
    }

    /// An optional table slot.
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name)
        }
    }

    /// Overrides the declared type.
    pub fn with_type(mut self, slot_type: SlotType) -> Self {
        self.slot_type = slot_type;
        self
    }

    /// Requests accumulation of updated rows on this input.
    pub fn buffer_updated(mut self, on: bool) -> Self {
        self.buffering.updated = on;
        self
    }

    /// Requests accumulation of deleted rows on this input.
    pub fn buffer_deleted(mut self, on: bool) -> Self {
        self.buffering.deleted = on;
        self
    }

    /// Toggles accumulation of created rows on this input.
    pub fn buffer_created(mut self, on: bool) -> Self {
        self.buffering.created = on;
        self
    }
}

/// A connected edge, owned by its consumer.
pub struct Slot {
    producer: ModuleId,
    output_name: String,
    input_name: String,
    changes: ChangeManager,
}

impl Slot {
    pub(crate) fn new(
        producer: ModuleId,
        output_name: String,
        input_name: String,
        buffering: Buffering,
    ) -> Self {
        Self {
            producer,
            output_name,
            input_name,
            changes: ChangeManager::new(buffering.created, buffering.updated, buffering.deleted),
        }
    }

    /// Id of the producing module.
    pub fn producer(&self) -> &ModuleId {
        &self.producer
    }

    /// Name of the producer output this slot reads.
    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    /// Name of the consumer input this slot feeds.
    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    /// The change manager tracking this edge.
    pub fn changes(&self) -> &ChangeManager {
        &self.changes
    }

    /// Mutable access to the change manager.
    pub fn changes_mut(&mut self) -> &mut ChangeManager {
        &mut self.changes
    }

    /// The producer's current output table, when the producer is present in
    /// the graph and publishes data under the connected name.
    pub fn data(&self, graph: &Dataflow) -> Option<TableHandle> {
        graph.module(&self.producer)?.get_data(&self.output_name)
    }

    /// Refreshes the change manager against the producer's current output.
    /// A producer without data leaves the state untouched.
    pub fn refresh(&mut self, run_number: RunNumber, graph: &Dataflow) {
        if let Some(table) = self.data(graph) {
            self.changes.update(run_number, &*table);
        }
    }

    /// `Ready` when the slot has buffered work pending, else `Blocked`.
    pub fn next_state(&self) -> ModuleState {
        self.changes.next_state()
    }

    pub(crate) fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "producer": self.producer.to_string(),
            "output": self.output_name,
            "input": self.input_name,
            "changes": self.changes.to_json(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_compatibility() {
        assert!(SlotType::Any.accepts(SlotType::Table));
        assert!(SlotType::Any.accepts(SlotType::Any));
        assert!(SlotType::Table.accepts(SlotType::Table));
        assert!(!SlotType::Table.accepts(SlotType::Any));
    }

    #[test]
    fn descriptor_builders() {
        let d = SlotDescriptor::required("inp").buffer_updated(true);
        assert!(d.required);
        assert!(d.buffering.created && d.buffering.updated && !d.buffering.deleted);
        let d = SlotDescriptor::optional("out").with_type(SlotType::Any);
        assert!(!d.required);
        assert_eq!(d.slot_type, SlotType::Any);
    }
}
