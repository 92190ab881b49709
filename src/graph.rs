//! The dataflow graph: module registration, wiring, and run order.
//!
//! All dynamic registration goes through [`Dataflow`], which the scheduler
//! guards with its lock; there is no global registry. Modules are stored in
//! insertion order, which doubles as the tie-breaking order whenever the
//! topological sort meets a cycle.

use crate::error::{Error, GraphError, WiringError};
use crate::module::{Module, ModuleBuilder, ModuleId};
use crate::slot::Slot;
use rustc_hash::{FxHashMap, FxHasher};
use std::hash::BuildHasherDefault;

pub(crate) type FxIndexMap<K, V> = indexmap::IndexMap<K, V, BuildHasherDefault<FxHasher>>;

/// The module graph owned by a scheduler.
///
/// A module entry is temporarily checked out while its `run` executes;
/// accessors simply skip checked-out entries, so a module never observes
/// itself through the graph.
pub struct Dataflow {
    modules: FxIndexMap<ModuleId, Option<Module>>,
    run_order: Vec<ModuleId>,
    order_dirty: bool,
    id_counters: FxHashMap<String, u64>,
}

impl Dataflow {
    pub(crate) fn new() -> Self {
        Self {
            modules: FxIndexMap::default(),
            run_order: Vec::new(),
            order_dirty: false,
            id_counters: FxHashMap::default(),
        }
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Whether a module with this id is registered.
    pub fn exists(&self, id: &ModuleId) -> bool {
        self.modules.contains_key(id)
    }

    /// Mints a fresh id of the form `{prefix}_{n}`.
    pub fn generate_id(&mut self, prefix: &str) -> ModuleId {
        loop {
            let counter = self.id_counters.entry(prefix.to_owned()).or_insert(0);
            *counter += 1;
            let id = ModuleId::new(format!("{}_{}", prefix, counter));
            if !self.exists(&id) {
                return id;
            }
        }
    }

    /// Registers a module and returns its id.
    pub fn add_module(&mut self, builder: ModuleBuilder) -> Result<ModuleId, Error> {
        let id = match builder.id_hint() {
            Some(hint) => {
                let id = ModuleId::new(hint);
                if self.exists(&id) {
                    return Err(GraphError::DuplicateModule(id).into());
                }
                id
            }
            None => self.generate_id(builder.prefix()),
        };
        let module = builder.into_module(id.clone())?;
        self.modules.insert(id.clone(), Some(module));
        self.order_dirty = true;
        log::debug!("added module {}", id);
        Ok(id)
    }

    /// Unregisters a module. Slots touching it on either side are
    /// disconnected.
    pub fn remove_module(&mut self, id: &ModuleId) -> Result<(), GraphError> {
        match self.modules.shift_remove(id) {
            Some(Some(_)) => {}
            _ => return Err(GraphError::UnknownModule(id.clone())),
        }
        for module in self.modules.values_mut().flatten() {
            module.detach_producer(id);
            module.detach_consumer(id);
        }
        self.order_dirty = true;
        log::debug!("removed module {}", id);
        Ok(())
    }

    /// Connects a producer output to a consumer input, checking descriptors
    /// and type compatibility.
    pub fn connect(
        &mut self,
        producer: &ModuleId,
        output: &str,
        consumer: &ModuleId,
        input: &str,
    ) -> Result<(), WiringError> {
        let provided = {
            let p = self
                .module(producer)
                .ok_or_else(|| WiringError::UnknownModule(producer.clone()))?;
            p.output_descriptor(output)
                .ok_or_else(|| WiringError::UnknownOutput {
                    module: producer.clone(),
                    name: output.to_owned(),
                })?
                .slot_type
        };
        let (expected, buffering) = {
            let c = self
                .module(consumer)
                .ok_or_else(|| WiringError::UnknownModule(consumer.clone()))?;
            let descriptor =
                c.input_descriptor(input)
                    .ok_or_else(|| WiringError::UnknownInput {
                        module: consumer.clone(),
                        name: input.to_owned(),
                    })?;
            if c.input_slot(input).is_some() {
                return Err(WiringError::AlreadyConnected {
                    module: consumer.clone(),
                    name: input.to_owned(),
                });
            }
            (descriptor.slot_type, descriptor.buffering)
        };
        if !expected.accepts(provided) {
            return Err(WiringError::TypeMismatch {
                producer: producer.clone(),
                output: output.to_owned(),
                consumer: consumer.clone(),
                input: input.to_owned(),
                expected,
                provided,
            });
        }

        let slot = Slot::new(
            producer.clone(),
            output.to_owned(),
            input.to_owned(),
            buffering,
        );
        self.module_mut(consumer)
            .expect("consumer checked above")
            .attach_input(slot);
        self.module_mut(producer)
            .expect("producer checked above")
            .attach_downstream(output, consumer.clone(), input.to_owned());
        self.order_dirty = true;
        log::debug!("connected {}.{} -> {}.{}", producer, output, consumer, input);
        Ok(())
    }

    /// The module with this id, unless absent or currently running.
    pub fn module(&self, id: &ModuleId) -> Option<&Module> {
        self.modules.get(id)?.as_ref()
    }

    /// Mutable access to the module with this id.
    pub fn module_mut(&mut self, id: &ModuleId) -> Option<&mut Module> {
        self.modules.get_mut(id)?.as_mut()
    }

    /// Iterates the registered modules in insertion order.
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values().filter_map(|m| m.as_ref())
    }

    /// The registered module ids, in insertion order.
    pub fn module_ids(&self) -> Vec<ModuleId> {
        self.modules.keys().cloned().collect()
    }

    pub(crate) fn take_module(&mut self, id: &ModuleId) -> Option<Module> {
        self.modules.get_mut(id)?.take()
    }

    pub(crate) fn put_module(&mut self, module: Module) {
        match self.modules.get_mut(module.id()) {
            Some(entry) => *entry = Some(module),
            None => log::warn!("module {} vanished while running", module.id()),
        }
    }

    /// Validates every module still in `Created`, returning the wiring
    /// failures (those modules are now `Invalid`).
    pub(crate) fn validate_new(&mut self) -> Vec<(ModuleId, WiringError)> {
        let mut failures = Vec::new();
        for module in self.modules.values_mut().flatten() {
            if module.state() == crate::module::ModuleState::Created {
                if let Err(error) = module.validate() {
                    failures.push((module.id().clone(), error));
                }
            }
        }
        failures
    }

    /// The current run order: producers before consumers, insertion order
    /// inside strongly-connected components. Recomputed lazily after graph
    /// changes.
    pub(crate) fn run_order(&mut self) -> Vec<ModuleId> {
        if self.order_dirty {
            self.run_order = self.compute_order();
            self.order_dirty = false;
            log::debug!("run order: {:?}", self.run_order);
        }
        self.run_order.clone()
    }

    fn compute_order(&self) -> Vec<ModuleId> {
        let ids: Vec<ModuleId> = self.modules.keys().cloned().collect();
        let position: FxHashMap<&ModuleId, usize> =
            ids.iter().enumerate().map(|(i, id)| (id, i)).collect();

        // producer -> consumers adjacency, self-loops ignored
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
        let mut indegree: Vec<usize> = vec![0; ids.len()];
        for module in self.modules() {
            let Some(&consumer) = position.get(module.id()) else {
                continue;
            };
            for slot in module.connected_inputs() {
                let Some(&producer) = position.get(slot.producer()) else {
                    continue;
                };
                if producer == consumer {
                    continue;
                }
                successors[producer].push(consumer);
                indegree[consumer] += 1;
            }
        }

        let mut emitted = vec![false; ids.len()];
        let mut order = Vec::with_capacity(ids.len());
        while order.len() < ids.len() {
            // earliest-inserted node with no unmet dependency; inside a
            // cycle nothing qualifies, so fall back to insertion order
            let next = (0..ids.len())
                .find(|&i| !emitted[i] && indegree[i] == 0)
                .or_else(|| (0..ids.len()).find(|&i| !emitted[i]))
                .expect("some module must remain");
            emitted[next] = true;
            for &succ in &successors[next] {
                indegree[succ] = indegree[succ].saturating_sub(1);
            }
            order.push(ids[next].clone());
        }
        order
    }

    /// Read-only snapshot of the graph.
    pub fn to_json(&self, short: bool) -> serde_json::Value {
        let modules: serde_json::Map<String, serde_json::Value> = self
            .modules
            .iter()
            .map(|(id, module)| {
                let value = module
                    .as_ref()
                    .map_or(serde_json::json!({"state": "running"}), |m| {
                        m.to_json(short)
                    });
                (id.to_string(), value)
            })
            .collect();
        serde_json::Value::Object(modules)
    }
}
