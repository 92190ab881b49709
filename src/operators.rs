//! Generic utility operators shipped with the runtime.
//!
//! Analytic modules (loaders, statistics, joins, visualisations) live
//! outside this crate; what belongs here are the few operator shapes the
//! runtime itself finds useful in any pipeline: a constant table source, a
//! side-effecting sink, and a gate that holds readiness until its upstream
//! has produced enough.

use crate::error::StepError;
use crate::graph::Dataflow;
use crate::module::{Module, Operator, StepContext, StepResult, StepState};
use crate::params::ParamDescriptor;
use crate::run_number::RunNumber;
use crate::slot::SlotDescriptor;
use crate::table::{MemTable, Table, TableHandle, Value, ValueKind};
use std::sync::Arc;
use std::time::Duration;

/// Publishes a fixed table once, then exhausts.
pub struct Constant {
    table: Arc<MemTable>,
}

impl Constant {
    /// Wraps the table this source will publish under its `table` output.
    pub fn new(table: MemTable) -> Self {
        Self {
            table: Arc::new(table),
        }
    }
}

impl Operator for Constant {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn output_descriptors(&self) -> Vec<SlotDescriptor> {
        vec![SlotDescriptor::optional("table")]
    }

    fn predict_step_size(&self, _duration: Duration) -> Option<u64> {
        Some(1)
    }

    fn run_step(
        &mut self,
        _ctx: &mut StepContext<'_>,
        _run_number: RunNumber,
        _step_size: u64,
        _remaining: Duration,
    ) -> Result<StepResult, StepError> {
        // the data is already published; one run is all it takes
        Ok(StepResult::new(StepState::Exhausted, 0))
    }

    fn get_data(&self, name: &str) -> Option<TableHandle> {
        (name == "table").then(|| self.table.clone() as TableHandle)
    }
}

/// Callback an [`Every`] invokes on its input's data.
pub type EveryProc = Box<dyn FnMut(&dyn Table) + Send>;

/// Calls a closure on the full input table once per run. Never exhausts on
/// its own; it terminates by starvation when its upstream is done.
pub struct Every {
    name: &'static str,
    proc_: EveryProc,
    constant_time: bool,
}

impl Every {
    /// An `Every` running the given closure.
    pub fn new(proc_: EveryProc) -> Self {
        Self {
            name: "every",
            proc_,
            constant_time: true,
        }
    }

    /// An `Every` that prints a short summary of its input to stdout.
    pub fn print() -> Self {
        Self {
            name: "print",
            proc_: Box::new(|table: &dyn Table| {
                println!("{} rows, index {:?}", table.len(), crate::indices::ranges(&table.index()));
            }),
            constant_time: true,
        }
    }

    /// Defers step sizing to the module's predictor instead of the
    /// constant-time default.
    pub fn predicted(mut self) -> Self {
        self.constant_time = false;
        self
    }
}

impl Operator for Every {
    fn name(&self) -> &'static str {
        self.name
    }

    fn input_descriptors(&self) -> Vec<SlotDescriptor> {
        vec![SlotDescriptor::required("inp")]
    }

    fn predict_step_size(&self, _duration: Duration) -> Option<u64> {
        self.constant_time.then_some(1)
    }

    fn run_step(
        &mut self,
        ctx: &mut StepContext<'_>,
        _run_number: RunNumber,
        _step_size: u64,
        _remaining: Duration,
    ) -> Result<StepResult, StepError> {
        let input = ctx.input("inp")?;
        let mut reads = 0;
        if let Some(data) = input.data() {
            reads = data.len() as u64;
            (self.proc_)(&*data);
        }
        Ok(StepResult::new(StepState::Blocked, 1).with_reads(reads))
    }
}

/// Forwards its input, but only reports ready once the upstream's trace
/// shows either a minimum total run duration (`delay`, seconds) or a
/// minimum number of reads (`reads`). Exactly one of the two must be set.
pub struct Wait {
    out: Option<TableHandle>,
}

impl Wait {
    /// A gate with no condition set yet; configure `delay` or `reads`
    /// through the module parameters.
    pub fn new() -> Self {
        Self { out: None }
    }
}

impl Default for Wait {
    fn default() -> Self {
        Self::new()
    }
}

impl Operator for Wait {
    fn name(&self) -> &'static str {
        "wait"
    }

    fn input_descriptors(&self) -> Vec<SlotDescriptor> {
        vec![SlotDescriptor::required("inp")]
    }

    fn output_descriptors(&self) -> Vec<SlotDescriptor> {
        vec![SlotDescriptor::optional("out")]
    }

    fn parameters(&self) -> Vec<ParamDescriptor> {
        vec![
            ParamDescriptor::new("delay", ValueKind::Float, Value::Null),
            ParamDescriptor::new("reads", ValueKind::Int, 0i64),
        ]
    }

    fn predict_step_size(&self, _duration: Duration) -> Option<u64> {
        Some(1)
    }

    fn is_ready(&self, module: &Module, graph: &Dataflow) -> Option<bool> {
        let delay = module.params().get_f64("delay");
        let reads = module.params().get_i64("reads").unwrap_or(0);
        if delay.is_none() && reads == 0 {
            return Some(false);
        }
        if delay.is_some() && reads != 0 {
            // misconfigured; let run_step surface the error
            return Some(true);
        }
        let slot = module.input_slot("inp")?;
        let producer = graph.module(slot.producer())?;
        let stats = producer.trace_stats(None);
        if let Some(delay) = delay {
            let elapsed: f64 = stats
                .iter()
                .filter_map(|r| r.duration())
                .map(|d| d.as_secs_f64())
                .sum();
            Some(elapsed >= delay)
        } else {
            let total_reads: u64 = stats.iter().map(|r| r.reads).sum();
            Some(total_reads as i64 >= reads)
        }
    }

    fn run_step(
        &mut self,
        ctx: &mut StepContext<'_>,
        _run_number: RunNumber,
        _step_size: u64,
        _remaining: Duration,
    ) -> Result<StepResult, StepError> {
        let delay = ctx.params().get_f64("delay");
        let reads = ctx.params().get_i64("reads").unwrap_or(0);
        if delay.is_some() && reads != 0 {
            return Err(StepError::InvalidParams(
                "needs either a delay or a number of reads, not both".to_owned(),
            ));
        }
        self.out = ctx.input("inp")?.data();
        Ok(StepResult::new(StepState::Blocked, 1))
    }

    fn get_data(&self, name: &str) -> Option<TableHandle> {
        match name {
            "out" => self.out.clone(),
            _ => None,
        }
    }
}
