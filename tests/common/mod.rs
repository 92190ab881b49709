//! Operators shared by the end-to-end scenarios.
#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Opt into log output with `RUST_LOG=debug cargo test`.
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}
use std::sync::Arc;
use std::time::Duration;
use trickle::{
    Buffering, MemTable, Operator, ParamDescriptor, RowIndex, RunNumber, SlotDescriptor,
    StepContext, StepError, StepResult, StepState, TableHandle, Value, ValueKind,
};

/// Appends one scripted batch of rows to its output per run, then exhausts.
pub struct BatchSource {
    table: Arc<MemTable>,
    batches: VecDeque<usize>,
}

impl BatchSource {
    pub fn new(batches: Vec<usize>) -> Self {
        Self {
            table: Arc::new(MemTable::new(vec!["x".to_owned()])),
            batches: batches.into(),
        }
    }
}

impl Operator for BatchSource {
    fn name(&self) -> &'static str {
        "batch_source"
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
        run_number: RunNumber,
        _step_size: u64,
        _remaining: Duration,
    ) -> Result<StepResult, StepError> {
        match self.batches.pop_front() {
            None => Ok(StepResult::new(StepState::Exhausted, 0)),
            Some(n) => {
                for _ in 0..n {
                    self.table
                        .append_row(vec![Value::Int(run_number.as_u64() as i64)], run_number);
                }
                Ok(StepResult::new(StepState::Blocked, 1).with_creates(n as u64))
            }
        }
    }

    fn get_data(&self, name: &str) -> Option<TableHandle> {
        (name == "table").then(|| self.table.clone() as TableHandle)
    }
}

/// Drains created rows from its input, recording every index it sees.
pub struct DrainSink {
    seen: Arc<Mutex<Vec<RowIndex>>>,
    per_step: u64,
}

impl DrainSink {
    pub fn new(per_step: u64) -> (Self, Arc<Mutex<Vec<RowIndex>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                seen: seen.clone(),
                per_step,
            },
            seen,
        )
    }
}

impl Operator for DrainSink {
    fn name(&self) -> &'static str {
        "drain_sink"
    }

    fn input_descriptors(&self) -> Vec<SlotDescriptor> {
        vec![SlotDescriptor::required("inp")]
    }

    fn predict_step_size(&self, _duration: Duration) -> Option<u64> {
        Some(self.per_step)
    }

    fn run_step(
        &mut self,
        ctx: &mut StepContext<'_>,
        run_number: RunNumber,
        step_size: u64,
        _remaining: Duration,
    ) -> Result<StepResult, StepError> {
        let mut input = ctx.input("inp")?;
        input.refresh(run_number);
        let span = input.changes_mut().next_created(Some(step_size as usize));
        self.seen.lock().extend(span.iter());
        let next = match input.next_state() {
            trickle::ModuleState::Ready => StepState::Ready,
            _ => StepState::Blocked,
        };
        Ok(StepResult::new(next, 1).with_reads(span.len() as u64))
    }
}

/// Consumes created rows and re-publishes them on its own output table.
pub struct Relay {
    table: Arc<MemTable>,
}

impl Relay {
    pub fn new() -> Self {
        Self {
            table: Arc::new(MemTable::new(vec!["x".to_owned()])),
        }
    }
}

impl Operator for Relay {
    fn name(&self) -> &'static str {
        "relay"
    }

    fn input_descriptors(&self) -> Vec<SlotDescriptor> {
        vec![SlotDescriptor::required("inp")]
    }

    fn output_descriptors(&self) -> Vec<SlotDescriptor> {
        vec![SlotDescriptor::optional("table")]
    }

    fn predict_step_size(&self, _duration: Duration) -> Option<u64> {
        Some(4)
    }

    fn run_step(
        &mut self,
        ctx: &mut StepContext<'_>,
        run_number: RunNumber,
        step_size: u64,
        _remaining: Duration,
    ) -> Result<StepResult, StepError> {
        let mut input = ctx.input("inp")?;
        input.refresh(run_number);
        let span = input.changes_mut().next_created(Some(step_size as usize));
        for index in span.iter() {
            self.table
                .append_row(vec![Value::Int(index as i64)], run_number);
        }
        let next = match input.next_state() {
            trickle::ModuleState::Ready => StepState::Ready,
            _ => StepState::Blocked,
        };
        Ok(StepResult::new(next, 1)
            .with_reads(span.len() as u64)
            .with_creates(span.len() as u64))
    }

    fn get_data(&self, name: &str) -> Option<TableHandle> {
        (name == "table").then(|| self.table.clone() as TableHandle)
    }
}

/// One scripted mutation of an upstream table.
#[derive(Clone, Copy, Debug)]
pub enum Action {
    Append(usize),
    Write(RowIndex),
    Remove(RowIndex),
}

/// Applies one scripted batch of table mutations per run, then exhausts.
pub struct MutatingSource {
    table: Arc<MemTable>,
    script: VecDeque<Vec<Action>>,
}

impl MutatingSource {
    pub fn new(script: Vec<Vec<Action>>) -> Self {
        Self {
            table: Arc::new(MemTable::new(vec!["x".to_owned()])),
            script: script.into(),
        }
    }
}

impl Operator for MutatingSource {
    fn name(&self) -> &'static str {
        "mutating_source"
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
        run_number: RunNumber,
        _step_size: u64,
        _remaining: Duration,
    ) -> Result<StepResult, StepError> {
        match self.script.pop_front() {
            None => Ok(StepResult::new(StepState::Exhausted, 0)),
            Some(actions) => {
                let mut creates = 0;
                let mut updates = 0;
                for action in actions {
                    match action {
                        Action::Append(n) => {
                            for _ in 0..n {
                                self.table.append_row(vec![Value::Null], run_number);
                            }
                            creates += n as u64;
                        }
                        Action::Write(row) => {
                            self.table
                                .write(row, "x", Value::Int(run_number.as_u64() as i64), run_number);
                            updates += 1;
                        }
                        Action::Remove(row) => {
                            self.table.remove_row(row);
                        }
                    }
                }
                Ok(StepResult::new(StepState::Blocked, 1)
                    .with_creates(creates)
                    .with_updates(updates + creates))
            }
        }
    }

    fn get_data(&self, name: &str) -> Option<TableHandle> {
        (name == "table").then(|| self.table.clone() as TableHandle)
    }
}

/// What an [`Observer`] saw at one of its runs.
#[derive(Clone, Debug, Default)]
pub struct Observation {
    pub run: u64,
    pub drained_updated: Vec<RowIndex>,
    pub drained_deleted: Vec<RowIndex>,
    pub created_pending: usize,
    pub deleted_pending: usize,
}

/// Refreshes its input every run and records what the change manager holds,
/// draining updated and deleted but leaving created buffered.
pub struct Observer {
    buffering: Buffering,
    log: Arc<Mutex<Vec<Observation>>>,
}

impl Observer {
    pub fn new(buffering: Buffering) -> (Self, Arc<Mutex<Vec<Observation>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                buffering,
                log: log.clone(),
            },
            log,
        )
    }
}

impl Operator for Observer {
    fn name(&self) -> &'static str {
        "observer"
    }

    fn input_descriptors(&self) -> Vec<SlotDescriptor> {
        vec![SlotDescriptor::required("inp")
            .buffer_created(self.buffering.created)
            .buffer_updated(self.buffering.updated)
            .buffer_deleted(self.buffering.deleted)]
    }

    fn predict_step_size(&self, _duration: Duration) -> Option<u64> {
        Some(1)
    }

    fn run_step(
        &mut self,
        ctx: &mut StepContext<'_>,
        run_number: RunNumber,
        _step_size: u64,
        _remaining: Duration,
    ) -> Result<StepResult, StepError> {
        let mut input = ctx.input("inp")?;
        input.refresh(run_number);
        let changes = input.changes_mut();
        let deleted_pending = changes.deleted_length();
        self.log.lock().push(Observation {
            run: run_number.as_u64(),
            drained_updated: changes.next_updated(None).to_vec(),
            drained_deleted: changes.next_deleted(None).to_vec(),
            created_pending: changes.created_length(),
            deleted_pending,
        });
        Ok(StepResult::new(StepState::Blocked, 1))
    }
}

/// Sleeps a fixed duration per step and always reports more work.
pub struct Sleeper {
    per_step: Duration,
    calls: Arc<Mutex<Vec<u64>>>,
}

impl Sleeper {
    /// Returns the operator and the per-run `run_step` call counts.
    pub fn new(per_step: Duration) -> (Self, Arc<Mutex<Vec<u64>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                per_step,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl Operator for Sleeper {
    fn name(&self) -> &'static str {
        "sleeper"
    }

    fn run_step(
        &mut self,
        _ctx: &mut StepContext<'_>,
        run_number: RunNumber,
        step_size: u64,
        _remaining: Duration,
    ) -> Result<StepResult, StepError> {
        std::thread::sleep(self.per_step);
        let mut calls = self.calls.lock();
        let run = run_number.as_u64() as usize;
        if calls.len() < run {
            calls.resize(run, 0);
        }
        calls[run - 1] += 1;
        Ok(StepResult::new(StepState::Ready, step_size))
    }
}

/// Records its parameter values at every run.
pub struct ParamProbe {
    observed: Arc<Mutex<Vec<(u64, f64, i64)>>>,
}

impl ParamProbe {
    pub fn new() -> (Self, Arc<Mutex<Vec<(u64, f64, i64)>>>) {
        let observed = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                observed: observed.clone(),
            },
            observed,
        )
    }
}

impl Operator for ParamProbe {
    fn name(&self) -> &'static str {
        "param_probe"
    }

    fn parameters(&self) -> Vec<ParamDescriptor> {
        vec![
            ParamDescriptor::new("gain", ValueKind::Float, 1.0),
            ParamDescriptor::new("limit", ValueKind::Int, 10i64),
        ]
    }

    fn predict_step_size(&self, _duration: Duration) -> Option<u64> {
        Some(1)
    }

    fn run_step(
        &mut self,
        ctx: &mut StepContext<'_>,
        run_number: RunNumber,
        _step_size: u64,
        _remaining: Duration,
    ) -> Result<StepResult, StepError> {
        self.observed.lock().push((
            run_number.as_u64(),
            ctx.params().get_f64("gain").unwrap_or(f64::NAN),
            ctx.params().get_i64("limit").unwrap_or(-1),
        ));
        Ok(StepResult::new(StepState::Blocked, 1))
    }
}
