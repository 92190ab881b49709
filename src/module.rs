//! The module execution contract: state machine, parameters, slots and the
//! per-run outer loop.
//!
//! An [`Operator`] is the black box a pipeline author writes: it declares
//! slots and parameters and implements [`Operator::run_step`]. A [`Module`]
//! is the framework node wrapped around one operator: it owns the input
//! slots, the parameter table, the tracer and the predictor, drives the
//! step loop inside the wall-clock quantum, and carries the lifecycle
//! state the scheduler acts on.

use crate::error::{StepError, WiringError};
use crate::graph::{Dataflow, FxIndexMap};
use crate::params::{ParamDescriptor, Params};
use crate::predictor::{LinearTimePredictor, TimePredictor, DEFAULT_FIT_WINDOW};
use crate::run_number::RunNumber;
use crate::slot::{Slot, SlotDescriptor};
use crate::table::{TableHandle, Value, ValueKind};
use crate::tracer::{StepMetrics, TraceRecord, Tracer};
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Name of the distinguished parameter-override input present on every
/// module.
pub const PARAMS_SLOT: &str = "_params";

/// Name of the distinguished trace output present on every module.
pub const TRACE_SLOT: &str = "_trace";

/// Name of the base wall-clock budget parameter, in seconds.
pub const QUANTUM: &str = "quantum";

const DEFAULT_QUANTUM: f64 = 1.0;
const FALLBACK_QUANTUM: f64 = 0.1;

/// Unique identifier of a module within a scheduler.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(Arc<str>);

impl ModuleId {
    /// Builds an id from a string.
    pub fn new(id: impl AsRef<str>) -> Self {
        ModuleId(Arc::from(id.as_ref()))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.write_str(&self.0)
    }
}

impl std::fmt::Debug for ModuleId {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "ModuleId({})", self.0)
    }
}

/// Lifecycle state of a module.
///
/// The declaration order is the progression order; the derived `Ord` only
/// backs assertions, not semantics.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModuleState {
    /// Constructed, not yet validated.
    Created,
    /// Has work pending and will run on the next tick.
    Ready,
    /// Currently inside `run`.
    Running,
    /// Waiting for upstream input.
    Blocked,
    /// Finished producing; terminated on the next tick.
    Zombie,
    /// Done; never runs again.
    Terminated,
    /// Failed validation; never runs.
    Invalid,
}

impl ModuleState {
    /// Lower-case state name, as used in snapshots and logs.
    pub fn name(self) -> &'static str {
        match self {
            ModuleState::Created => "created",
            ModuleState::Ready => "ready",
            ModuleState::Running => "running",
            ModuleState::Blocked => "blocked",
            ModuleState::Zombie => "zombie",
            ModuleState::Terminated => "terminated",
            ModuleState::Invalid => "invalid",
        }
    }

    /// Whether the module will never run again.
    pub fn is_over(self) -> bool {
        matches!(self, ModuleState::Terminated | ModuleState::Invalid)
    }
}

/// What an operator reports about the step it just ran.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepState {
    /// More work is immediately available.
    Ready,
    /// Nothing to do until upstream advances.
    Blocked,
    /// The operator will never produce again; the module goes zombie.
    Exhausted,
}

/// Return value of [`Operator::run_step`].
#[derive(Copy, Clone, Debug)]
pub struct StepResult {
    /// State the module should take after this step.
    pub next_state: StepState,
    /// Steps effectively executed (may be fewer than requested).
    pub steps_run: u64,
    /// Items read.
    pub reads: u64,
    /// Items written.
    pub updates: u64,
    /// Items created.
    pub creates: u64,
}

impl StepResult {
    /// A result with zeroed counters.
    pub fn new(next_state: StepState, steps_run: u64) -> Self {
        Self {
            next_state,
            steps_run,
            reads: 0,
            updates: 0,
            creates: 0,
        }
    }

    /// Sets the read counter.
    pub fn with_reads(mut self, reads: u64) -> Self {
        self.reads = reads;
        self
    }

    /// Sets the update counter.
    pub fn with_updates(mut self, updates: u64) -> Self {
        self.updates = updates;
        self
    }

    /// Sets the create counter.
    pub fn with_creates(mut self, creates: u64) -> Self {
        self.creates = creates;
        self
    }

    /// Every created item is also an update of the output table, so
    /// `updates >= creates` must hold; reports violating it are normalised.
    fn normalize(mut self, id: &ModuleId) -> Self {
        if self.creates > 0 && self.updates == 0 {
            self.updates = self.creates;
        } else if self.creates > self.updates {
            log::warn!(
                "{}: more creates ({}) than updates ({}), assuming updates = creates",
                id,
                self.creates,
                self.updates
            );
            self.updates = self.creates;
        }
        self
    }
}

/// The contract a pipeline author implements.
///
/// Operators are black boxes to the runtime: they declare their slots and
/// parameters, and perform bounded work in [`run_step`](Operator::run_step).
/// A step may neither block without honouring `remaining` nor overshoot
/// `step_size` by more than a small factor; long work is chunked by the
/// operator itself.
pub trait Operator: Send {
    /// Short type name, used for generated ids and snapshots.
    fn name(&self) -> &'static str;

    /// Input slots this operator declares (`_params` is implicit).
    fn input_descriptors(&self) -> Vec<SlotDescriptor> {
        Vec::new()
    }

    /// Output slots this operator declares (`_trace` is implicit).
    fn output_descriptors(&self) -> Vec<SlotDescriptor> {
        Vec::new()
    }

    /// Parameters this operator declares, on top of the base set.
    fn parameters(&self) -> Vec<ParamDescriptor> {
        Vec::new()
    }

    /// Step size used until the predictor has enough trace to fit.
    fn default_step_size(&self) -> u64 {
        1
    }

    /// Performs up to `step_size` items of work before `remaining` elapses.
    fn run_step(
        &mut self,
        ctx: &mut StepContext<'_>,
        run_number: RunNumber,
        step_size: u64,
        remaining: Duration,
    ) -> Result<StepResult, StepError>;

    /// Overrides step-size prediction; `None` defers to the module's
    /// predictor.
    fn predict_step_size(&self, duration: Duration) -> Option<u64> {
        let _ = duration;
        None
    }

    /// Overrides the readiness rule; `None` defers to the default.
    fn is_ready(&self, module: &Module, graph: &Dataflow) -> Option<bool> {
        let _ = (module, graph);
        None
    }

    /// Publishes a named output table. The distinguished `_params` and
    /// `_trace` outputs are served by the framework.
    fn get_data(&self, name: &str) -> Option<TableHandle> {
        let _ = name;
        None
    }

    /// Called once per tick, before readiness evaluation.
    fn cleanup_run(&mut self, run_number: RunNumber) {
        let _ = run_number;
    }
}

/// Callback invoked at the start or end of a module run.
pub type RunHook = Box<dyn FnMut(&ModuleId, RunNumber) + Send>;

/// Configures a module before it is added to a dataflow.
pub struct ModuleBuilder {
    operator: Box<dyn Operator>,
    id: Option<String>,
    group: Option<String>,
    predictor: Option<Box<dyn TimePredictor>>,
    overrides: Vec<(String, Value)>,
}

impl ModuleBuilder {
    /// Starts building a module around an operator.
    pub fn new(operator: impl Operator + 'static) -> Self {
        Self {
            operator: Box::new(operator),
            id: None,
            group: None,
            predictor: None,
            overrides: Vec::new(),
        }
    }

    /// Uses an explicit id instead of a generated one.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Tags the module with a group (modules created together share one).
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Uses a specific time predictor instead of the linear default.
    pub fn predictor(mut self, predictor: impl TimePredictor + 'static) -> Self {
        self.predictor = Some(Box::new(predictor));
        self
    }

    /// Overrides a declared parameter's initial value.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.overrides.push((name.into(), value.into()));
        self
    }

    pub(crate) fn id_hint(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub(crate) fn prefix(&self) -> &'static str {
        self.operator.name()
    }

    pub(crate) fn into_module(self, id: ModuleId) -> Result<Module, WiringError> {
        let mut input_descriptors = FxIndexMap::default();
        for d in self
            .operator
            .input_descriptors()
            .into_iter()
            .chain([SlotDescriptor::optional(PARAMS_SLOT)])
        {
            let name = d.name.clone();
            if input_descriptors.insert(name.clone(), d).is_some() {
                return Err(WiringError::DuplicateSlot(name));
            }
        }
        let mut output_descriptors = FxIndexMap::default();
        for d in self
            .operator
            .output_descriptors()
            .into_iter()
            .chain([SlotDescriptor::optional(TRACE_SLOT)])
        {
            let name = d.name.clone();
            if output_descriptors.insert(name.clone(), d).is_some() {
                return Err(WiringError::DuplicateSlot(name));
            }
        }

        let mut descriptors = vec![ParamDescriptor::new(
            QUANTUM,
            ValueKind::Float,
            DEFAULT_QUANTUM,
        )];
        for d in self.operator.parameters() {
            match descriptors.iter_mut().find(|have| have.name == d.name) {
                Some(have) => *have = d,
                None => descriptors.push(d),
            }
        }
        let params = Params::new(descriptors, self.overrides);

        let input_slots = input_descriptors
            .keys()
            .map(|name| (name.clone(), None))
            .collect();
        let downstream = output_descriptors
            .keys()
            .map(|name| (name.clone(), SmallVec::new()))
            .collect();

        let default_step_size = self.operator.default_step_size().max(1);
        Ok(Module {
            id,
            group: self.group,
            state: ModuleState::Created,
            last_update: None,
            start_time: None,
            params,
            input_descriptors,
            output_descriptors,
            input_slots,
            downstream,
            tracer: Tracer::new(),
            predictor: self
                .predictor
                .unwrap_or_else(|| Box::new(LinearTimePredictor::new())),
            default_step_size,
            operator: self.operator,
            start_run_hook: None,
            end_run_hook: None,
            had_error: false,
        })
    }
}

pub(crate) type Downstream = SmallVec<[(ModuleId, String); 1]>;

/// A node of the dataflow graph: one operator plus the framework state
/// wrapped around it.
pub struct Module {
    id: ModuleId,
    group: Option<String>,
    state: ModuleState,
    last_update: Option<RunNumber>,
    start_time: Option<Instant>,
    params: Params,
    input_descriptors: FxIndexMap<String, SlotDescriptor>,
    output_descriptors: FxIndexMap<String, SlotDescriptor>,
    input_slots: FxIndexMap<String, Option<Slot>>,
    downstream: FxIndexMap<String, Downstream>,
    tracer: Tracer,
    predictor: Box<dyn TimePredictor>,
    default_step_size: u64,
    operator: Box<dyn Operator>,
    start_run_hook: Option<RunHook>,
    end_run_hook: Option<RunHook>,
    had_error: bool,
}

impl Module {
    /// The module's id.
    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    /// The module's group tag, if any.
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ModuleState {
        self.state
    }

    /// Run number of the module's most recent completed run.
    pub fn last_update(&self) -> Option<RunNumber> {
        self.last_update
    }

    /// The live parameter set.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The run history.
    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// The most recent `max_runs` trace records.
    pub fn trace_stats(&self, max_runs: Option<usize>) -> Vec<TraceRecord> {
        self.tracer.trace_stats(max_runs)
    }

    /// Whether a step of this module has ever failed.
    pub fn had_error(&self) -> bool {
        self.had_error
    }

    /// The connected slot on a named input, if any.
    pub fn input_slot(&self, name: &str) -> Option<&Slot> {
        self.input_slots.get(name)?.as_ref()
    }

    /// Mutable access to a connected input slot (to drain or reset its
    /// change manager from outside a step).
    pub fn input_slot_mut(&mut self, name: &str) -> Option<&mut Slot> {
        self.input_slots.get_mut(name)?.as_mut()
    }

    /// Installs (or clears) a callback fired when a run starts.
    pub fn set_start_run(&mut self, hook: Option<RunHook>) {
        self.start_run_hook = hook;
    }

    /// Installs (or clears) a callback fired when a run ends.
    pub fn set_end_run(&mut self, hook: Option<RunHook>) {
        self.end_run_hook = hook;
    }

    /// Publishes a named output: the framework serves `_trace` and
    /// `_params`, everything else comes from the operator.
    pub fn get_data(&self, name: &str) -> Option<TableHandle> {
        match name {
            TRACE_SLOT => Some(self.tracer.table()),
            PARAMS_SLOT => Some(self.params.table_handle()),
            _ => self.operator.get_data(name),
        }
    }

    pub(crate) fn connected_inputs(&self) -> impl Iterator<Item = &Slot> {
        self.input_slots.values().filter_map(|s| s.as_ref())
    }

    pub(crate) fn input_descriptor(&self, name: &str) -> Option<&SlotDescriptor> {
        self.input_descriptors.get(name)
    }

    pub(crate) fn output_descriptor(&self, name: &str) -> Option<&SlotDescriptor> {
        self.output_descriptors.get(name)
    }

    pub(crate) fn attach_input(&mut self, slot: Slot) {
        let name = slot.input_name().to_owned();
        self.input_slots.insert(name, Some(slot));
    }

    pub(crate) fn attach_downstream(&mut self, output: &str, consumer: ModuleId, input: String) {
        if let Some(fanout) = self.downstream.get_mut(output) {
            fanout.push((consumer, input));
        }
    }

    pub(crate) fn detach_producer(&mut self, producer: &ModuleId) {
        for slot in self.input_slots.values_mut() {
            if slot.as_ref().map_or(false, |s| s.producer() == producer) {
                *slot = None;
            }
        }
    }

    pub(crate) fn detach_consumer(&mut self, consumer: &ModuleId) {
        for fanout in self.downstream.values_mut() {
            fanout.retain(|(id, _)| id != consumer);
        }
    }

    pub(crate) fn make_zombie(&mut self) {
        log::info!("module {} starved, going zombie", self.id);
        self.state = ModuleState::Zombie;
    }

    /// Checks the wiring after connection and moves the module out of
    /// `Created`: to `Blocked` on success, `Invalid` on failure.
    pub(crate) fn validate(&mut self) -> Result<(), WiringError> {
        for d in self.input_descriptors.values() {
            if d.required && self.input_slot(&d.name).is_none() {
                log::error!("missing required input slot {} in {}", d.name, self.id);
                self.state = ModuleState::Invalid;
                return Err(WiringError::MissingInput {
                    module: self.id.clone(),
                    name: d.name.clone(),
                });
            }
        }
        for d in self.output_descriptors.values() {
            if d.required && self.downstream.get(&d.name).map_or(true, |f| f.is_empty()) {
                log::error!("required output slot {} of {} has no consumer", d.name, self.id);
                self.state = ModuleState::Invalid;
                return Err(WiringError::UnconsumedOutput {
                    module: self.id.clone(),
                    name: d.name.clone(),
                });
            }
        }
        self.state = ModuleState::Blocked;
        Ok(())
    }

    /// Terminates a zombie and gives the operator its per-tick hook.
    pub(crate) fn cleanup_run(&mut self, run_number: RunNumber) {
        if self.state == ModuleState::Zombie {
            log::info!("module {} terminated", self.id);
            self.state = ModuleState::Terminated;
        }
        self.operator.cleanup_run(run_number);
    }

    fn predict_step_size(&mut self, duration: Duration) -> u64 {
        if let Some(n) = self.operator.predict_step_size(duration) {
            return n;
        }
        let stats = self.tracer.trace_stats(Some(DEFAULT_FIT_WINDOW));
        self.predictor.fit(&stats);
        self.predictor.predict(duration, self.default_step_size)
    }

    fn absorb_params(&mut self, run_number: RunNumber, graph: &Dataflow) {
        let Some(slot) = self.input_slot(PARAMS_SLOT) else {
            return;
        };
        let Some(data) = slot.data(graph) else {
            return;
        };
        if self.params.absorb(&*data, run_number) {
            log::info!("absorbed parameter update in {}", self.id);
        }
    }

    /// Runs the module for one quantum: repeatedly calls the operator's
    /// `run_step` until the budget elapses or the operator yields a
    /// non-ready state. Returns the step error, if one occurred, after the
    /// run is fully accounted for.
    pub(crate) fn run(&mut self, run_number: RunNumber, graph: &Dataflow) -> Result<(), StepError> {
        assert!(
            self.state != ModuleState::Running,
            "module {} is already running",
            self.id
        );
        let mut next_state = self.state;

        let mut quantum_secs = self.params.get_f64(QUANTUM).unwrap_or(DEFAULT_QUANTUM);
        if quantum_secs <= 0.0 {
            log::error!(
                "quantum is 0 in {}, setting it to a reasonable value",
                self.id
            );
            quantum_secs = FALLBACK_QUANTUM;
        }
        let quantum = Duration::from_secs_f64(quantum_secs);

        let mut now = Instant::now();
        let end_time = now + quantum;
        self.state = ModuleState::Running;
        self.start_time = Some(now);

        self.absorb_params(run_number, graph);

        // Target roughly four steps per quantum: short enough to keep the
        // predictor honest, long enough to keep framing overhead low.
        let max_step_time = quantum / 4;

        if let Some(hook) = self.start_run_hook.as_mut() {
            hook(&self.id, run_number);
        }
        self.tracer.start_run(now, run_number);

        let mut failure: Option<StepError> = None;
        while now < end_time {
            let remaining = end_time - now;
            let step_size = self.predict_step_size(remaining.min(max_step_time));
            log::debug!(
                "step_size={} remaining={:?} in module {}",
                step_size,
                remaining,
                self.id
            );
            if step_size == 0 {
                break;
            }

            self.tracer.before_run_step(now, run_number);
            let step = {
                let Module {
                    id,
                    params,
                    input_slots,
                    operator,
                    ..
                } = self;
                let mut ctx = StepContext {
                    module_id: id,
                    params,
                    slots: input_slots,
                    graph,
                };
                operator.run_step(&mut ctx, run_number, step_size, remaining)
            };
            now = Instant::now();

            match step {
                Ok(result) => {
                    let result = result.normalize(&self.id);
                    self.tracer.after_run_step(
                        now,
                        run_number,
                        StepMetrics {
                            steps_run: result.steps_run,
                            reads: result.reads,
                            updates: result.updates,
                            creates: result.creates,
                        },
                    );
                    match result.next_state {
                        StepState::Ready => next_state = ModuleState::Ready,
                        StepState::Blocked => {
                            next_state = ModuleState::Blocked;
                            self.tracer.run_stopped(now, run_number);
                            break;
                        }
                        StepState::Exhausted => {
                            next_state = ModuleState::Zombie;
                            self.tracer.run_stopped(now, run_number);
                            break;
                        }
                    }
                }
                Err(error) => {
                    log::warn!("step failed in {}: {}", self.id, error);
                    self.tracer.exception(now, run_number, error.to_string());
                    next_state = ModuleState::Zombie;
                    self.had_error = true;
                    failure = Some(error);
                    break;
                }
            }
        }

        self.state = next_state;
        if self.state == ModuleState::Zombie {
            self.tracer.terminated(now, run_number);
        }
        self.tracer.end_run(now, run_number);
        self.last_update = Some(run_number);
        self.start_time = None;
        if let Some(hook) = self.end_run_hook.as_mut() {
            hook(&self.id, run_number);
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Read-only snapshot of the module.
    pub fn to_json(&self, short: bool) -> serde_json::Value {
        let mut json = serde_json::json!({
            "id": self.id.to_string(),
            "classname": self.operator.name(),
            "group": self.group,
            "state": self.state.name(),
            "last_update": self.last_update.map(RunNumber::as_u64),
        });
        if !short {
            let inputs: serde_json::Map<String, serde_json::Value> = self
                .input_slots
                .iter()
                .map(|(name, slot)| {
                    let value = slot
                        .as_ref()
                        .map_or(serde_json::Value::Null, |s| s.to_json());
                    (name.clone(), value)
                })
                .collect();
            let outputs: serde_json::Map<String, serde_json::Value> = self
                .downstream
                .iter()
                .map(|(name, fanout)| {
                    let consumers: Vec<String> = fanout
                        .iter()
                        .map(|(id, input)| format!("{}.{}", id, input))
                        .collect();
                    (name.clone(), serde_json::json!(consumers))
                })
                .collect();
            json["default_step_size"] = serde_json::json!(self.default_step_size);
            json["parameters"] = self.params.to_json();
            json["input_slots"] = serde_json::Value::Object(inputs);
            json["output_slots"] = serde_json::Value::Object(outputs);
        }
        json
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Module")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("last_update", &self.last_update)
            .finish()
    }
}

/// Slot and parameter access handed to an operator during a step.
pub struct StepContext<'a> {
    module_id: &'a ModuleId,
    params: &'a Params,
    slots: &'a mut FxIndexMap<String, Option<Slot>>,
    graph: &'a Dataflow,
}

impl StepContext<'_> {
    /// Id of the running module.
    pub fn module_id(&self) -> &ModuleId {
        self.module_id
    }

    /// The module's current parameters.
    pub fn params(&self) -> &Params {
        self.params
    }

    /// Whether the named input is connected.
    pub fn has_input(&self, name: &str) -> bool {
        matches!(self.slots.get(name), Some(Some(_)))
    }

    /// Borrows a connected input slot for the duration of the step.
    pub fn input(&mut self, name: &str) -> Result<SlotRef<'_>, StepError> {
        match self.slots.get_mut(name) {
            Some(Some(slot)) => Ok(SlotRef {
                slot,
                graph: self.graph,
            }),
            _ => Err(StepError::MissingInput(name.to_owned())),
        }
    }
}

/// A connected input slot, resolved against the graph for one step.
pub struct SlotRef<'a> {
    slot: &'a mut Slot,
    graph: &'a Dataflow,
}

impl SlotRef<'_> {
    /// Refreshes the change manager against the producer's current output.
    pub fn refresh(&mut self, run_number: RunNumber) {
        self.slot.refresh(run_number, self.graph);
    }

    /// The producer's current output table.
    pub fn data(&self) -> Option<TableHandle> {
        self.slot.data(self.graph)
    }

    /// The producing module, when still present in the graph.
    pub fn producer_module(&self) -> Option<&Module> {
        self.graph.module(self.slot.producer())
    }

    /// The change manager tracking this edge.
    pub fn changes(&self) -> &crate::change_manager::ChangeManager {
        self.slot.changes()
    }

    /// Mutable access to the change manager.
    pub fn changes_mut(&mut self) -> &mut crate::change_manager::ChangeManager {
        self.slot.changes_mut()
    }

    /// `Ready` when buffered work is pending on this slot.
    pub fn next_state(&self) -> ModuleState {
        self.slot.next_state()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Readiness {
    Ready,
    NotReady,
    /// Every connected upstream is over; the module should go zombie.
    Starved,
}

/// The readiness rule. Pure: the starvation transition it reports is
/// applied by the scheduler.
pub(crate) fn readiness(module: &Module, graph: &Dataflow) -> Readiness {
    if module.state.is_over() {
        log::debug!("{} not ready: {}", module.id, module.state.name());
        return Readiness::NotReady;
    }
    if let Some(forced) = module.operator.is_ready(module, graph) {
        return if forced {
            Readiness::Ready
        } else {
            Readiness::NotReady
        };
    }
    match module.state {
        ModuleState::Ready => Readiness::Ready,
        ModuleState::Blocked => {
            let mut in_count = 0usize;
            let mut term_count = 0usize;
            let mut ready_count = 0usize;
            for slot in module.connected_inputs() {
                in_count += 1;
                match graph.module(slot.producer()) {
                    None => term_count += 1,
                    Some(producer) if producer.state().is_over() => term_count += 1,
                    Some(producer) => {
                        if module.last_update.is_none()
                            || producer.last_update() > module.last_update
                        {
                            ready_count += 1;
                        }
                    }
                }
            }
            if in_count != 0 && term_count == in_count {
                Readiness::Starved
            } else if in_count == 0 || ready_count != 0 {
                // sources are always ready; otherwise one live input suffices
                Readiness::Ready
            } else {
                Readiness::NotReady
            }
        }
        state => {
            log::error!("{} not ready: unexpected state {}", module.id, state.name());
            Readiness::NotReady
        }
    }
}
