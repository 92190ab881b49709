#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

//! Trickle is a runtime for *progressive analytics*: long-running analytic
//! pipelines expressed as a dataflow graph of modules that each process
//! small slices of a growing tabular dataset within strict per-run time
//! budgets, producing continuously refined approximate results.
//!
//! The three load-bearing pieces are the [`Scheduler`] (a cooperative,
//! time-sliced executor with a scheduler-wide run-number clock), the
//! [`Slot`]/[`ChangeManager`] fabric (per-consumer tracking of which rows of
//! an upstream table were created, updated or deleted since that consumer
//! last ran), and the [`Module`] execution contract (the
//! `created → ready/blocked/running → zombie → terminated` state machine and
//! the [`Operator::run_step`] protocol, with a [`TimePredictor`] converting
//! wall-clock budgets into step sizes).
//!
//! Pipelines wire [`Operator`] implementations into a [`Dataflow`] through
//! a [`ModuleBuilder`], connect producer outputs to consumer inputs, and
//! hand control to the scheduler:
//!
//! ```ignore
//! let scheduler = Scheduler::new();
//! let (source, sink) = {
//!     let mut graph = scheduler.dataflow();
//!     let source = graph.add_module(ModuleBuilder::new(MySource::new()))?;
//!     let sink = graph.add_module(ModuleBuilder::new(MySink::new()))?;
//!     graph.connect(&source, "table", &sink, "inp")?;
//!     (source, sink)
//! };
//! scheduler.start(None, None)?;
//! ```

mod change_manager;
mod error;
mod graph;
pub mod indices;
mod module;
pub mod operators;
mod params;
mod predictor;
mod run_number;
mod scheduler;
mod slot;
mod table;
mod tracer;

pub use crate::change_manager::{ChangeManager, ColumnChanges};
pub use crate::error::{Error, GraphError, StepError, WiringError};
pub use crate::graph::Dataflow;
pub use crate::indices::{IndexSpan, RowIndex};
pub use crate::module::{
    Module, ModuleBuilder, ModuleId, ModuleState, Operator, RunHook, SlotRef, StepContext,
    StepResult, StepState, PARAMS_SLOT, QUANTUM, TRACE_SLOT,
};
pub use crate::params::{ParamDescriptor, Params};
pub use crate::predictor::{
    ConstantPredictor, LinearTimePredictor, TimePredictor, DEFAULT_FIT_WINDOW,
};
pub use crate::run_number::RunNumber;
pub use crate::scheduler::{
    EventHandler, IdleProc, OneshotProc, Scheduler, SchedulerEvent, TickProc,
};
pub use crate::slot::{Buffering, Slot, SlotDescriptor, SlotType};
pub use crate::table::{MemTable, Table, TableHandle, Value, ValueKind, UPDATE_COLUMN};
pub use crate::tracer::{StepMetrics, TraceRecord, Tracer, DEFAULT_TRACE_CAPACITY};
