//! Error taxonomy of the runtime.
//!
//! Wiring mistakes surface synchronously and push the affected module to
//! `Invalid`; graph mistakes are raised to the caller; step failures never
//! unwind through the scheduler — the module goes `Zombie`, the tracer
//! records the failure and the scheduler reports it to observers.

use crate::module::ModuleId;
use crate::slot::SlotType;
use thiserror::Error;

/// A mistake in the static shape of the dataflow: slot declarations,
/// connections, or the validation of a freshly wired module.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WiringError {
    /// Two slot descriptors on one module share a name.
    #[error("duplicate slot name `{0}`")]
    DuplicateSlot(String),
    /// A connection endpoint does not exist in the graph.
    #[error("unknown module `{0}`")]
    UnknownModule(ModuleId),
    /// The producer declares no output with this name.
    #[error("module `{module}` has no output slot `{name}`")]
    UnknownOutput {
        /// Producer module.
        module: ModuleId,
        /// Requested output name.
        name: String,
    },
    /// The consumer declares no input with this name.
    #[error("module `{module}` has no input slot `{name}`")]
    UnknownInput {
        /// Consumer module.
        module: ModuleId,
        /// Requested input name.
        name: String,
    },
    /// The consumer input already has a producer; an input accepts at most
    /// one slot.
    #[error("input `{name}` of `{module}` is already connected")]
    AlreadyConnected {
        /// Consumer module.
        module: ModuleId,
        /// Input name.
        name: String,
    },
    /// The consumer input type does not accept the producer output type.
    #[error(
        "type mismatch: input `{input}` of `{consumer}` expects {expected:?}, \
         output `{output}` of `{producer}` provides {provided:?}"
    )]
    TypeMismatch {
        /// Producer module.
        producer: ModuleId,
        /// Producer output name.
        output: String,
        /// Consumer module.
        consumer: ModuleId,
        /// Consumer input name.
        input: String,
        /// Type the input expects.
        expected: SlotType,
        /// Type the output provides.
        provided: SlotType,
    },
    /// A required input slot was left unconnected at validation.
    #[error("missing required input slot `{name}` on `{module}`")]
    MissingInput {
        /// The module failing validation.
        module: ModuleId,
        /// The unconnected input.
        name: String,
    },
    /// A required output has no downstream consumer at validation.
    #[error("required output `{name}` of `{module}` has no consumer")]
    UnconsumedOutput {
        /// The module failing validation.
        module: ModuleId,
        /// The unconsumed output.
        name: String,
    },
}

/// A mistake in graph management, raised synchronously to the caller.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A module with this id is already registered.
    #[error("module `{0}` already exists in the scheduler")]
    DuplicateModule(ModuleId),
    /// No module with this id is registered.
    #[error("unknown module `{0}`")]
    UnknownModule(ModuleId),
    /// Structural edits are not allowed while the scheduler runs; use
    /// [`crate::Scheduler::add_oneshot_tick_proc`] to edit at the next tick
    /// boundary.
    #[error("the scheduler is running; use add_oneshot_tick_proc for graph edits")]
    MutationWhileRunning,
}

/// A failure inside an operator's `run_step`. The module transitions to
/// `Zombie`; the scheduler keeps going.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StepError {
    /// The named input slot is not declared or not connected.
    #[error("input slot `{0}` is not connected")]
    MissingInput(String),
    /// The upstream of the named input currently publishes no data.
    #[error("no data available on input `{0}`")]
    NoData(String),
    /// The module's current parameters are unusable.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    /// Operator-specific failure.
    #[error("{0}")]
    Failed(String),
}

impl StepError {
    /// Builds an operator-specific failure from any displayable payload.
    pub fn failed(msg: impl std::fmt::Display) -> Self {
        StepError::Failed(msg.to_string())
    }
}

/// Umbrella error for the public API.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// See [`WiringError`].
    #[error(transparent)]
    Wiring(#[from] WiringError),
    /// See [`GraphError`].
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// See [`StepError`].
    #[error(transparent)]
    Step(#[from] StepError),
    /// `start` was called on a scheduler whose worker is already alive.
    #[error("scheduler already started")]
    AlreadyStarted,
}
