//! The scheduler: tick loop, readiness, termination and the worker thread.
//!
//! A [`Scheduler`] is a cheap clonable handle over shared state; the module
//! graph lives behind its lock. Each tick mints a fresh run number, applies
//! deferred graph edits, terminates zombies, evaluates readiness and then
//! runs every ready module once, in topological order. The lock is released
//! between module runs, so external callers (UI, REPL) mutate parameters and
//! add modules at module granularity; a running module is never interrupted.

use crate::error::{Error, GraphError, StepError, WiringError};
use crate::graph::Dataflow;
use crate::module::{readiness, ModuleId, ModuleState, Readiness};
use crate::run_number::{AtomicRunNumber, RunNumber};
use crate::table::Value;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Callback invoked at the start of every tick.
pub type TickProc = Box<dyn FnMut(&Scheduler, RunNumber) + Send>;

/// Callback invoked when a tick finds nothing ready (it may sleep, or
/// inject work).
pub type IdleProc = Box<dyn FnMut(&Scheduler, RunNumber) + Send>;

/// Deferred graph edit, executed under the scheduler lock at the next tick
/// boundary.
pub type OneshotProc = Box<dyn FnOnce(&mut Dataflow) + Send>;

/// Handler receiving [`SchedulerEvent`]s.
pub type EventHandler = Box<dyn Fn(&SchedulerEvent) + Send + Sync>;

/// Notable things observed by the scheduler, delivered to the installed
/// event handler. No failure is swallowed: everything reported here is also
/// logged, and step failures are additionally drainable through
/// [`Scheduler::take_step_errors`].
#[derive(Debug)]
pub enum SchedulerEvent {
    /// A module's `run_step` failed; the module is now a zombie.
    StepFailed {
        /// The failing module.
        module: ModuleId,
        /// The error it reported.
        error: StepError,
    },
    /// A freshly added module failed validation and is now invalid.
    ValidationFailed {
        /// The invalid module.
        module: ModuleId,
        /// Why validation failed.
        error: WiringError,
    },
    /// A zombie was terminated during cleanup.
    ModuleTerminated {
        /// The terminated module.
        module: ModuleId,
    },
    /// Every module is terminated or invalid; the scheduler stops.
    Quiescent {
        /// The tick at which quiescence was detected.
        run_number: RunNumber,
    },
}

struct SharedState {
    dataflow: Mutex<Dataflow>,
    run_number: AtomicRunNumber,
    stopped: AtomicBool,
    running: AtomicBool,
    oneshot: Mutex<Vec<OneshotProc>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    event_handler: RwLock<Option<EventHandler>>,
    step_errors: Mutex<Vec<(ModuleId, StepError)>>,
}

/// Drives a dataflow of modules, one time-sliced tick at a time.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<SharedState>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Creates a scheduler with an empty dataflow.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SharedState {
                dataflow: Mutex::new(Dataflow::new()),
                run_number: AtomicRunNumber::none(),
                stopped: AtomicBool::new(false),
                running: AtomicBool::new(false),
                oneshot: Mutex::new(Vec::new()),
                worker: Mutex::new(None),
                event_handler: RwLock::new(None),
                step_errors: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Acquires the scheduler lock and returns the guarded dataflow. While
    /// the worker is mid-tick this blocks until the current module run
    /// finishes.
    pub fn dataflow(&self) -> MutexGuard<'_, Dataflow> {
        self.shared.dataflow.lock()
    }

    /// Registers a module (allowed while running: it joins the graph at the
    /// next tick boundary).
    pub fn add_module(&self, builder: crate::module::ModuleBuilder) -> Result<ModuleId, Error> {
        self.dataflow().add_module(builder)
    }

    /// Connects a producer output to a consumer input.
    pub fn connect(
        &self,
        producer: &ModuleId,
        output: &str,
        consumer: &ModuleId,
        input: &str,
    ) -> Result<(), WiringError> {
        self.dataflow().connect(producer, output, consumer, input)
    }

    /// Unregisters a module. Illegal while the scheduler runs — use
    /// [`add_oneshot_tick_proc`](Scheduler::add_oneshot_tick_proc) for
    /// mid-run edits.
    pub fn remove_module(&self, id: &ModuleId) -> Result<(), GraphError> {
        if self.is_running() {
            return Err(GraphError::MutationWhileRunning);
        }
        self.dataflow().remove_module(id)
    }

    /// Whether a module with this id is registered.
    pub fn exists(&self, id: &ModuleId) -> bool {
        self.dataflow().exists(id)
    }

    /// The latest minted run number.
    pub fn run_number(&self) -> Option<RunNumber> {
        self.shared.run_number.load()
    }

    /// Whether the tick loop is currently executing (worker or caller
    /// thread).
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Whether every registered module is terminated or invalid.
    pub fn is_terminated(&self) -> bool {
        self.dataflow().modules().all(|m| m.state().is_over())
    }

    /// Installs the event handler (replacing any previous one).
    pub fn set_event_handler(&self, handler: EventHandler) {
        *self.shared.event_handler.write() = Some(handler);
    }

    /// Drains the step errors collected since the last drain.
    pub fn take_step_errors(&self) -> Vec<(ModuleId, StepError)> {
        let mut errors = self.shared.step_errors.lock();
        std::mem::take(&mut *errors)
    }

    /// Queues a graph edit to run atomically at the next tick boundary,
    /// under the scheduler lock.
    pub fn add_oneshot_tick_proc(&self, proc_: impl FnOnce(&mut Dataflow) + Send + 'static) {
        self.shared.oneshot.lock().push(Box::new(proc_));
    }

    /// Merges parameter overrides into a module's parameter table, stamped
    /// with the current run number. Takes the scheduler lock, so it waits
    /// for any in-flight module run.
    pub fn set_module_params(
        &self,
        id: &ModuleId,
        values: Vec<(String, Value)>,
    ) -> Result<(), GraphError> {
        let stamp = self
            .run_number()
            .map_or(RunNumber::start(), RunNumber::next);
        let graph = self.dataflow();
        let module = graph
            .module(id)
            .ok_or_else(|| GraphError::UnknownModule(id.clone()))?;
        module.params().merge(&values, stamp);
        Ok(())
    }

    /// Spawns the worker thread running the tick loop.
    pub fn start(&self, tick_proc: Option<TickProc>, idle_proc: Option<IdleProc>) -> Result<(), Error> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }
        self.shared.stopped.store(false, Ordering::SeqCst);
        let scheduler = self.clone();
        let handle = std::thread::Builder::new()
            .name("trickle-scheduler".to_owned())
            .spawn(move || scheduler.run_loop(tick_proc, idle_proc))
            .expect("failed to spawn the scheduler thread");
        *self.shared.worker.lock() = Some(handle);
        Ok(())
    }

    /// Runs the tick loop on the caller's thread until quiescence or
    /// [`stop`](Scheduler::stop). This is the deterministic variant used by
    /// tests.
    pub fn run(&self, tick_proc: Option<TickProc>, idle_proc: Option<IdleProc>) -> Result<(), Error> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }
        self.shared.stopped.store(false, Ordering::SeqCst);
        self.run_loop(tick_proc, idle_proc);
        Ok(())
    }

    /// Asks the tick loop to stop; observed between module runs.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
    }

    /// Waits for the worker thread to exit.
    pub fn join(&self) {
        let handle = self.shared.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Read-only snapshot of the scheduler and its modules.
    pub fn to_json(&self, short: bool) -> serde_json::Value {
        let graph = self.dataflow();
        serde_json::json!({
            "run_number": self.run_number().map(RunNumber::as_u64),
            "is_running": self.is_running(),
            "is_terminated": graph.modules().all(|m| m.state().is_over()),
            "modules": graph.to_json(short),
        })
    }

    fn emit(&self, events: Vec<SchedulerEvent>) {
        if events.is_empty() {
            return;
        }
        let handler = self.shared.event_handler.read();
        if let Some(handler) = handler.as_ref() {
            for event in &events {
                handler(event);
            }
        }
    }

    fn run_loop(&self, mut tick_proc: Option<TickProc>, mut idle_proc: Option<IdleProc>) {
        let shared = &*self.shared;
        log::debug!("scheduler loop started");
        while !shared.stopped.load(Ordering::SeqCst) {
            let run_number = shared.run_number.increment();
            if let Some(proc_) = tick_proc.as_mut() {
                proc_(self, run_number);
            }

            let mut events = Vec::new();
            let ready = {
                let mut graph = shared.dataflow.lock();

                let procs: Vec<OneshotProc> = shared.oneshot.lock().drain(..).collect();
                for proc_ in procs {
                    proc_(&mut graph);
                }

                for (module, error) in graph.validate_new() {
                    log::error!("module {} is invalid: {}", module, error);
                    events.push(SchedulerEvent::ValidationFailed { module, error });
                }

                let order = graph.run_order();
                for id in &order {
                    if let Some(module) = graph.module_mut(id) {
                        let was_zombie = module.state() == ModuleState::Zombie;
                        module.cleanup_run(run_number);
                        if was_zombie {
                            events.push(SchedulerEvent::ModuleTerminated { module: id.clone() });
                        }
                    }
                }

                let mut ready = Vec::new();
                let mut starved = Vec::new();
                for id in &order {
                    if let Some(module) = graph.module(id) {
                        match readiness(module, &graph) {
                            Readiness::Ready => ready.push(id.clone()),
                            Readiness::Starved => starved.push(id.clone()),
                            Readiness::NotReady => {}
                        }
                    }
                }
                for id in &starved {
                    if let Some(module) = graph.module_mut(id) {
                        module.make_zombie();
                    }
                }
                ready
            };
            self.emit(events);

            if ready.is_empty() {
                let all_over = {
                    let graph = shared.dataflow.lock();
                    let all_over = graph.modules().all(|m| m.state().is_over());
                    all_over
                };
                if all_over {
                    log::info!("all modules are done at {:?}, stopping", run_number);
                    self.emit(vec![SchedulerEvent::Quiescent { run_number }]);
                    break;
                }
                match idle_proc.as_mut() {
                    Some(proc_) => {
                        proc_(self, run_number);
                        continue;
                    }
                    None => {
                        log::info!("nothing ready at {:?} and no idle proc, stopping", run_number);
                        break;
                    }
                }
            }

            for id in ready {
                if shared.stopped.load(Ordering::SeqCst) {
                    break;
                }
                let result = {
                    let mut graph = shared.dataflow.lock();
                    let Some(mut module) = graph.take_module(&id) else {
                        continue;
                    };
                    if matches!(
                        module.state(),
                        ModuleState::Terminated | ModuleState::Invalid | ModuleState::Zombie
                    ) {
                        graph.put_module(module);
                        continue;
                    }
                    let result = module.run(run_number, &graph);
                    graph.put_module(module);
                    result
                };
                if let Err(error) = result {
                    shared.step_errors.lock().push((id.clone(), error.clone()));
                    self.emit(vec![SchedulerEvent::StepFailed { module: id, error }]);
                }
            }
        }
        shared.running.store(false, Ordering::SeqCst);
        log::debug!("scheduler loop ended");
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Scheduler")
            .field("run_number", &self.shared.run_number)
            .field("running", &self.is_running())
            .finish()
    }
}
