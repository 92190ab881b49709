//! Step-size prediction from observed run timings.
//!
//! The per-run outer loop gives each step a wall-clock budget; a predictor
//! converts that budget into a number of items to process, using the
//! module's recent trace. Prediction is deterministic and side-effect free,
//! so it can be queried many times per run.

use crate::tracer::TraceRecord;
use std::collections::VecDeque;
use std::time::Duration;

/// Number of trace samples a [`LinearTimePredictor`] fits by default.
pub const DEFAULT_FIT_WINDOW: usize = 16;

/// Converts a time budget into a step size.
pub trait TimePredictor: Send {
    /// Refits the model from the most recent trace records.
    fn fit(&mut self, trace: &[TraceRecord]);

    /// Step size for a run-step allowed to last `duration`. Implementations
    /// fall back to `default_step_size` while they lack data, and never
    /// return 0.
    fn predict(&self, duration: Duration, default_step_size: u64) -> u64;
}

/// Least-squares fit of `steps ≈ α · duration` through the origin, over a
/// bounded window of recent samples.
///
/// Samples with non-positive duration carry no rate information and are
/// skipped; with fewer than two usable samples, or a degenerate slope, the
/// prediction falls back to the default step size.
pub struct LinearTimePredictor {
    window: usize,
    samples: VecDeque<(f64, f64)>, // (duration secs, steps)
}

impl LinearTimePredictor {
    /// Predictor with the default fit window.
    pub fn new() -> Self {
        Self::with_window(DEFAULT_FIT_WINDOW)
    }

    /// Predictor fitting at most `window` recent samples.
    pub fn with_window(window: usize) -> Self {
        Self {
            window: window.max(2),
            samples: VecDeque::new(),
        }
    }
}

impl Default for LinearTimePredictor {
    fn default() -> Self {
        Self::new()
    }
}

impl TimePredictor for LinearTimePredictor {
    fn fit(&mut self, trace: &[TraceRecord]) {
        self.samples.clear();
        for record in trace.iter().rev().take(self.window) {
            let Some(duration) = record.duration() else {
                continue;
            };
            let secs = duration.as_secs_f64();
            if secs <= 0.0 || record.steps_run == 0 {
                continue;
            }
            self.samples.push_front((secs, record.steps_run as f64));
        }
    }

    fn predict(&self, duration: Duration, default_step_size: u64) -> u64 {
        let fallback = default_step_size.max(1);
        if self.samples.len() < 2 {
            return fallback;
        }
        let mut num = 0.0;
        let mut den = 0.0;
        for &(d, s) in &self.samples {
            num += s * d;
            den += d * d;
        }
        let alpha = num / den;
        if !alpha.is_finite() || alpha <= 0.0 {
            return fallback;
        }
        ((alpha * duration.as_secs_f64()) as u64).max(1)
    }
}

/// Predictor that always answers the same step size, for operators whose
/// steps have constant cost.
pub struct ConstantPredictor(pub u64);

impl TimePredictor for ConstantPredictor {
    fn fit(&mut self, _trace: &[TraceRecord]) {}

    fn predict(&self, _duration: Duration, _default_step_size: u64) -> u64 {
        self.0.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_number::RunNumber;
    use std::time::Instant;

    fn record(run: u64, duration_ms: u64, steps: u64) -> TraceRecord {
        let start = Instant::now();
        TraceRecord {
            run_number: RunNumber::from(run),
            start_time: start,
            end_time: Some(start + Duration::from_millis(duration_ms)),
            steps_run: steps,
            reads: 0,
            updates: 0,
            creates: 0,
            terminated: false,
            exception: None,
        }
    }

    #[test]
    fn too_few_samples_fall_back() {
        let mut p = LinearTimePredictor::new();
        p.fit(&[record(1, 100, 50)]);
        assert_eq!(p.predict(Duration::from_millis(100), 8), 8);
        // default of 0 still yields at least one step
        assert_eq!(p.predict(Duration::from_millis(100), 0), 1);
    }

    #[test]
    fn fits_a_linear_rate() {
        let mut p = LinearTimePredictor::new();
        // 500 steps per second
        p.fit(&[record(1, 100, 50), record(2, 200, 100)]);
        let predicted = p.predict(Duration::from_millis(400), 1);
        assert!((180..=220).contains(&predicted), "predicted {}", predicted);
        // never zero, even for tiny budgets
        assert_eq!(p.predict(Duration::from_micros(1), 1), 1);
    }

    #[test]
    fn zero_duration_samples_are_ignored() {
        let mut p = LinearTimePredictor::new();
        p.fit(&[record(1, 0, 50), record(2, 0, 80), record(3, 100, 50)]);
        // only one usable sample remains
        assert_eq!(p.predict(Duration::from_millis(100), 4), 4);
    }

    #[test]
    fn window_keeps_most_recent() {
        let mut p = LinearTimePredictor::with_window(2);
        // old slow rate followed by a new fast rate; only the fast samples fit
        p.fit(&[
            record(1, 1000, 1),
            record(2, 100, 100),
            record(3, 100, 100),
        ]);
        let predicted = p.predict(Duration::from_millis(100), 1);
        assert!((90..=110).contains(&predicted), "predicted {}", predicted);
    }

    #[test]
    fn constant_predictor() {
        let p = ConstantPredictor(3);
        assert_eq!(p.predict(Duration::from_secs(1), 10), 3);
        assert_eq!(ConstantPredictor(0).predict(Duration::from_secs(1), 10), 1);
    }
}
