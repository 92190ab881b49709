//! Quantum enforcement and parameter injection.

mod common;

use common::{ParamProbe, Sleeper};
use std::time::Duration;
use trickle::operators::Constant;
use trickle::{MemTable, ModuleBuilder, RunNumber, Scheduler, TickProc, Value};

#[test]
fn quantum_bounds_the_step_loop() {
    let scheduler = Scheduler::new();
    let (sleeper, calls) = Sleeper::new(Duration::from_millis(30));
    let module = {
        let mut graph = scheduler.dataflow();
        graph
            .add_module(ModuleBuilder::new(sleeper).param("quantum", 0.1))
            .unwrap()
    };

    // one tick is enough: stop before the second tick runs any module
    let stopper: TickProc = Box::new(|s: &Scheduler, run| {
        if run.as_u64() >= 2 {
            s.stop();
        }
    });
    scheduler.run(Some(stopper), None).unwrap();

    let calls = calls.lock();
    assert_eq!(calls.len(), 1, "exactly one run");
    // a 0.1s quantum at 0.03s per step targets quantum/4 step windows and
    // may overshoot by at most one step
    assert!(
        (2..=4).contains(&calls[0]),
        "expected 2..=4 run_step calls, got {}",
        calls[0]
    );

    let graph = scheduler.dataflow();
    let stats = graph.module(&module).unwrap().trace_stats(None);
    assert_eq!(stats.len(), 1);
    let elapsed = stats[0].duration().unwrap();
    assert!(
        elapsed <= Duration::from_millis(200),
        "run overshot its quantum: {:?}",
        elapsed
    );
}

#[test]
fn params_slot_overrides_with_fallback_to_current() {
    let scheduler = Scheduler::new();
    let (probe_op, observed) = ParamProbe::new();

    // a one-row table carrying only `gain`, stamped ahead of the probe's
    // initial parameter row
    let overrides = MemTable::new(vec!["gain".to_owned()]);
    overrides.append_row(vec![Value::Float(2.5)], RunNumber::from(7));

    {
        let mut graph = scheduler.dataflow();
        let constant = graph
            .add_module(ModuleBuilder::new(Constant::new(overrides)))
            .unwrap();
        let probe = graph.add_module(ModuleBuilder::new(probe_op)).unwrap();
        graph
            .connect(&constant, "table", &probe, "_params")
            .unwrap();
    }
    scheduler.run(None, None).unwrap();

    let observed = observed.lock();
    assert!(!observed.is_empty());
    for &(_, gain, limit) in observed.iter() {
        // overridden field wins, untouched field keeps its default
        assert_eq!(gain, 2.5);
        assert_eq!(limit, 10);
    }
}

#[test]
fn set_module_params_takes_effect_on_the_next_run() {
    let scheduler = Scheduler::new();
    let (probe_op, observed) = ParamProbe::new();
    let probe = {
        let mut graph = scheduler.dataflow();
        graph.add_module(ModuleBuilder::new(probe_op)).unwrap()
    };

    let tick_proc: TickProc = {
        let probe = probe.clone();
        Box::new(move |scheduler: &Scheduler, run| {
            if run.as_u64() == 3 {
                scheduler
                    .set_module_params(&probe, vec![("gain".to_owned(), Value::Float(9.0))])
                    .unwrap();
            }
            if run.as_u64() >= 5 {
                scheduler.stop();
            }
        })
    };
    scheduler.run(Some(tick_proc), None).unwrap();

    let observed = observed.lock();
    assert!(observed.len() >= 4);
    for &(run, gain, limit) in observed.iter() {
        let expected = if run >= 3 { 9.0 } else { 1.0 };
        assert_eq!(gain, expected, "gain at run {}", run);
        assert_eq!(limit, 10);
    }
}
