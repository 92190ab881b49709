//! Per-module run history.
//!
//! The tracer is an append-only ring of one record per `run` invocation,
//! fed by hooks the module's outer loop calls around every step. The time
//! predictor fits on [`Tracer::trace_stats`], and the history doubles as the
//! module's `_trace` output table so diagnostics can be consumed downstream
//! like any other data.

use crate::indices::RowIndex;
use crate::run_number::RunNumber;
use crate::table::{Table, TableHandle, Value, UPDATE_COLUMN};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// Number of run records a tracer retains.
pub const DEFAULT_TRACE_CAPACITY: usize = 256;

/// One completed (or in-flight) `run` invocation of a module.
#[derive(Clone, Debug)]
pub struct TraceRecord {
    /// The run number of the invocation.
    pub run_number: RunNumber,
    /// When the run started.
    pub start_time: Instant,
    /// When the run ended; `None` while in flight.
    pub end_time: Option<Instant>,
    /// Total steps executed across all `run_step` calls of the run.
    pub steps_run: u64,
    /// Total items read.
    pub reads: u64,
    /// Total items written.
    pub updates: u64,
    /// Total items created.
    pub creates: u64,
    /// Whether the module went zombie during this run.
    pub terminated: bool,
    /// Failure message, when a step failed.
    pub exception: Option<String>,
}

impl TraceRecord {
    /// Wall-clock duration of the run; `None` while in flight.
    pub fn duration(&self) -> Option<std::time::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// Per-step metric deltas reported after each `run_step`.
#[derive(Copy, Clone, Debug, Default)]
pub struct StepMetrics {
    /// Steps executed.
    pub steps_run: u64,
    /// Items read.
    pub reads: u64,
    /// Items written.
    pub updates: u64,
    /// Items created.
    pub creates: u64,
}

struct TraceInner {
    records: VecDeque<TraceRecord>,
    capacity: usize,
    /// Table row index of `records[0]`; eviction advances it so row
    /// indices stay stable as the ring turns over.
    first_seq: RowIndex,
}

/// Append-only history of a module's runs.
pub struct Tracer {
    inner: Arc<RwLock<TraceInner>>,
}

impl Tracer {
    /// Tracer with the default ring capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TRACE_CAPACITY)
    }

    /// Tracer retaining at most `capacity` run records.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(TraceInner {
                records: VecDeque::new(),
                capacity: capacity.max(1),
                first_seq: 0,
            })),
        }
    }

    /// Opens the record for a new run.
    pub fn start_run(&self, now: Instant, run_number: RunNumber) {
        let mut inner = self.inner.write();
        if inner.records.len() == inner.capacity {
            inner.records.pop_front();
            inner.first_seq += 1;
        }
        inner.records.push_back(TraceRecord {
            run_number,
            start_time: now,
            end_time: None,
            steps_run: 0,
            reads: 0,
            updates: 0,
            creates: 0,
            terminated: false,
            exception: None,
        });
    }

    /// Called immediately before a `run_step`.
    pub fn before_run_step(&self, _now: Instant, run_number: RunNumber) {
        log::debug!("run_step begins at {:?}", run_number);
    }

    /// Accumulates one step's metrics into the current record.
    pub fn after_run_step(&self, now: Instant, _run_number: RunNumber, metrics: StepMetrics) {
        let mut inner = self.inner.write();
        if let Some(record) = inner.records.back_mut() {
            record.steps_run += metrics.steps_run;
            record.reads += metrics.reads;
            record.updates += metrics.updates;
            record.creates += metrics.creates;
            record.end_time = Some(now);
        }
    }

    /// The run's step loop ended before the quantum was exhausted.
    pub fn run_stopped(&self, now: Instant, run_number: RunNumber) {
        log::debug!("run stopped early at {:?}", run_number);
        if let Some(record) = self.inner.write().records.back_mut() {
            record.end_time = Some(now);
        }
    }

    /// Records a step failure on the current record.
    pub fn exception(&self, now: Instant, _run_number: RunNumber, message: String) {
        if let Some(record) = self.inner.write().records.back_mut() {
            record.exception = Some(message);
            record.end_time = Some(now);
        }
    }

    /// Marks the current record as the run in which the module went zombie.
    pub fn terminated(&self, now: Instant, _run_number: RunNumber) {
        if let Some(record) = self.inner.write().records.back_mut() {
            record.terminated = true;
            record.end_time = Some(now);
        }
    }

    /// Closes the record for the run.
    pub fn end_run(&self, now: Instant, _run_number: RunNumber) {
        if let Some(record) = self.inner.write().records.back_mut() {
            record.end_time = Some(now);
        }
    }

    /// The most recent `max_runs` records (all of them when `None`), oldest
    /// first.
    pub fn trace_stats(&self, max_runs: Option<usize>) -> Vec<TraceRecord> {
        let inner = self.inner.read();
        let n = max_runs.unwrap_or(inner.records.len()).min(inner.records.len());
        inner.records.iter().skip(inner.records.len() - n).cloned().collect()
    }

    /// The history as a read-only table (the module's `_trace` surface):
    /// one row per run, stamped with that run's number.
    pub fn table(&self) -> TableHandle {
        Arc::new(TraceTable {
            inner: self.inner.clone(),
        })
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}

const TRACE_COLUMNS: &[&str] = &[
    "run_number",
    "steps_run",
    "reads",
    "updates",
    "creates",
    "duration",
    "terminated",
];

struct TraceTable {
    inner: Arc<RwLock<TraceInner>>,
}

impl TraceTable {
    fn record_at(&self, row: RowIndex) -> Option<TraceRecord> {
        let inner = self.inner.read();
        let offset = row.checked_sub(inner.first_seq)? as usize;
        inner.records.get(offset).cloned()
    }
}

impl Table for TraceTable {
    fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    fn index(&self) -> Vec<RowIndex> {
        let inner = self.inner.read();
        (inner.first_seq..inner.first_seq + inner.records.len() as u64).collect()
    }

    fn columns(&self) -> Vec<String> {
        let mut cols: Vec<String> = TRACE_COLUMNS.iter().map(|c| (*c).to_owned()).collect();
        cols.push(UPDATE_COLUMN.to_owned());
        cols
    }

    fn at(&self, row: RowIndex, column: &str) -> Option<Value> {
        let record = self.record_at(row)?;
        let value = match column {
            "run_number" | UPDATE_COLUMN => Value::Int(record.run_number.as_u64() as i64),
            "steps_run" => Value::Int(record.steps_run as i64),
            "reads" => Value::Int(record.reads as i64),
            "updates" => Value::Int(record.updates as i64),
            "creates" => Value::Int(record.creates as i64),
            "duration" => record
                .duration()
                .map_or(Value::Null, |d| Value::Float(d.as_secs_f64())),
            "terminated" => Value::Bool(record.terminated),
            _ => return None,
        };
        Some(value)
    }

    fn stamp(&self, row: RowIndex) -> Option<RunNumber> {
        self.record_at(row).map(|r| r.run_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn step(tracer: &Tracer, now: Instant, run: RunNumber, steps: u64, reads: u64) {
        tracer.before_run_step(now, run);
        tracer.after_run_step(
            now + Duration::from_millis(1),
            run,
            StepMetrics {
                steps_run: steps,
                reads,
                ..StepMetrics::default()
            },
        );
    }

    #[test]
    fn records_accumulate_per_run() {
        let tracer = Tracer::new();
        let now = Instant::now();
        let r1 = RunNumber::start();
        tracer.start_run(now, r1);
        step(&tracer, now, r1, 3, 10);
        step(&tracer, now, r1, 2, 5);
        tracer.end_run(now + Duration::from_millis(4), r1);

        let stats = tracer.trace_stats(None);
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].steps_run, 5);
        assert_eq!(stats[0].reads, 15);
        assert!(stats[0].duration().unwrap() >= Duration::from_millis(4));
    }

    #[test]
    fn ring_evicts_and_keeps_stable_rows() {
        let tracer = Tracer::with_capacity(2);
        let now = Instant::now();
        for g in 1..=3u64 {
            let run = RunNumber::from(g);
            tracer.start_run(now, run);
            tracer.end_run(now, run);
        }
        let stats = tracer.trace_stats(None);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].run_number, RunNumber::from(2));

        let table = tracer.table();
        assert_eq!(table.index(), vec![1, 2]);
        assert_eq!(table.at(2, "run_number"), Some(Value::Int(3)));
        assert_eq!(table.stamp(1), Some(RunNumber::from(2)));
        assert_eq!(table.at(0, "run_number"), None); // evicted
    }

    #[test]
    fn exception_and_termination_marks() {
        let tracer = Tracer::new();
        let now = Instant::now();
        let run = RunNumber::start();
        tracer.start_run(now, run);
        tracer.exception(now, run, "boom".to_owned());
        tracer.terminated(now, run);
        let stats = tracer.trace_stats(Some(1));
        assert_eq!(stats[0].exception.as_deref(), Some("boom"));
        assert!(stats[0].terminated);
    }
}
