//! Time discretization shared by the forward SDE, its reverse and the solvers.
//!
//! A [TimeSchedule] is an evenly spaced, strictly increasing sequence of times
//! `t_0 < t_1 < ... < t_{n-1}`. It is described by the number of steps plus any
//! consistent subset of step size, start time and end time:
//!
//! | given            | dt                 | first time | last time          |
//! |------------------|--------------------|------------|--------------------|
//! | n                | 1/n                | dt         | 1                  |
//! | n, dt            | dt                 | dt         | dt·n               |
//! | n, t0            | (1 - t0)/(n - 1)   | t0         | 1                  |
//! | n, dt, t0        | dt                 | t0         | t0 + dt·(n - 1)    |
//! | n, t1            | t1/n               | dt         | t1                 |
//! | n, t0, t1        | (t1 - t0)/(n - 1)  | t0         | t1                 |
//!
//! Every time is strictly positive; a start time of zero is rejected.
//! Supplying dt together with an explicit end time is accepted only when the
//! end time agrees with the one implied by the other inputs.

use crate::error::SgmError;

/// Number of steps used when none is configured
pub const DEFAULT_NUM_STEPS: usize = 1000;

/// Relative tolerance used when checking an overdetermined schedule
const CONSISTENCY_RTOL: f64 = 1e-9;

/// An evenly spaced, strictly increasing sequence of times.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSchedule {
    times: Vec<f64>,
    dt: f64,
}

/// How the individual times are generated.
///
/// Every variant computes each time directly from its index so the length and
/// the endpoints never accumulate rounding error.
#[derive(Debug, Clone, Copy)]
enum Spacing {
    /// `t1 * k / n` for `k = 1..=n`
    Fractions { t1: f64 },
    /// `dt * k` for `k = 1..=n`
    Multiples { dt: f64 },
    /// `t0 + dt * i` for `i = 0..n`
    FromStart { t0: f64, dt: f64 },
    /// Linear interpolation between two pinned endpoints
    Between { t0: f64, t1: f64 },
}

impl Spacing {
    fn generate(self, n: usize) -> Vec<f64> {
        match self {
            Spacing::Fractions { t1 } => (1..=n).map(|k| t1 * k as f64 / n as f64).collect(),
            Spacing::Multiples { dt } => (1..=n).map(|k| dt * k as f64).collect(),
            Spacing::FromStart { t0, dt } => (0..n).map(|i| t0 + dt * i as f64).collect(),
            Spacing::Between { t0, t1 } => (0..n)
                .map(|i| {
                    if i == n - 1 {
                        t1
                    } else {
                        t0 + (t1 - t0) * i as f64 / (n - 1) as f64
                    }
                })
                .collect(),
        }
    }
}

impl TimeSchedule {
    /// Schedule of `num_steps` points ending at 1 with step `1/num_steps`.
    pub fn new(num_steps: usize) -> Result<Self, SgmError> {
        Self::builder().num_steps(num_steps).build()
    }

    /// Returns a new [TimeScheduleBuilder]
    pub fn builder() -> TimeScheduleBuilder {
        TimeScheduleBuilder::default()
    }

    /// All times in increasing order
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Step size between consecutive times
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// First (smallest) time
    pub fn t0(&self) -> f64 {
        self.times[0]
    }

    /// Last (largest) time
    pub fn t1(&self) -> f64 {
        self.times[self.times.len() - 1]
    }

    /// Number of discretization steps
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Always false, a schedule holds at least one time
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Times in increasing order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = f64> + ExactSizeIterator + '_ {
        self.times.iter().copied()
    }

    /// Times in decreasing order, the order used when integrating a reverse SDE
    pub fn rev(&self) -> impl Iterator<Item = f64> + '_ {
        self.times.iter().rev().copied()
    }

    /// Index of the schedule point nearest to `t`, clamped to the schedule.
    pub fn timestep(&self, t: f64) -> usize {
        let n = self.times.len();
        if n == 1 {
            return 0;
        }
        let fraction = (t - self.t0()) / (self.t1() - self.t0());
        let index = (fraction * (n - 1) as f64).round();
        if index <= 0.0 {
            0
        } else {
            (index as usize).min(n - 1)
        }
    }
}

/// Builder for [TimeSchedule]; every field is optional, see the module docs.
#[derive(Debug, Clone, Default)]
pub struct TimeScheduleBuilder {
    num_steps: Option<usize>,
    dt: Option<f64>,
    t0: Option<f64>,
    t1: Option<f64>,
}

impl TimeScheduleBuilder {
    /// Sets the number of time points. Defaults to [DEFAULT_NUM_STEPS].
    pub fn num_steps(mut self, num_steps: usize) -> Self {
        self.num_steps = Some(num_steps);
        self
    }

    /// Sets the step size.
    pub fn dt(mut self, dt: f64) -> Self {
        self.dt = Some(dt);
        self
    }

    /// Sets the first time point.
    pub fn t0(mut self, t0: f64) -> Self {
        self.t0 = Some(t0);
        self
    }

    /// Sets the last time point.
    pub fn t1(mut self, t1: f64) -> Self {
        self.t1 = Some(t1);
        self
    }

    /// Same as [TimeScheduleBuilder::dt] but leaves the field untouched for `None`.
    pub fn maybe_dt(mut self, dt: Option<f64>) -> Self {
        if dt.is_some() {
            self.dt = dt;
        }
        self
    }

    /// Same as [TimeScheduleBuilder::t0] but leaves the field untouched for `None`.
    pub fn maybe_t0(mut self, t0: Option<f64>) -> Self {
        if t0.is_some() {
            self.t0 = t0;
        }
        self
    }

    /// Resolves the schedule, rejecting inconsistent or degenerate inputs.
    pub fn build(self) -> Result<TimeSchedule, SgmError> {
        let n = self.num_steps.unwrap_or(DEFAULT_NUM_STEPS);
        if n == 0 {
            return Err(SgmError::configuration(
                "a time schedule needs at least one step",
            ));
        }
        if let Some(dt) = self.dt {
            if !dt.is_finite() || dt <= 0.0 {
                return Err(SgmError::configuration(format!(
                    "step size must be positive and finite, got {}",
                    dt
                )));
            }
        }
        if let Some(t0) = self.t0 {
            // The marginal of every forward SDE collapses at t = 0
            if !t0.is_finite() || t0 <= 0.0 {
                return Err(SgmError::configuration(format!(
                    "start time must be positive and finite, got {}",
                    t0
                )));
            }
        }
        if let Some(t1) = self.t1 {
            if !t1.is_finite() || t1 <= 0.0 {
                return Err(SgmError::configuration(format!(
                    "end time must be positive and finite, got {}",
                    t1
                )));
            }
        }

        let (dt, spacing) = match (self.dt, self.t0, self.t1) {
            (None, None, None) => (1.0 / n as f64, Spacing::Fractions { t1: 1.0 }),
            (None, None, Some(t1)) => (t1 / n as f64, Spacing::Fractions { t1 }),
            (Some(dt), None, None) => (dt, Spacing::Multiples { dt }),
            (Some(dt), Some(t0), None) => (dt, Spacing::FromStart { t0, dt }),
            (None, Some(t0), t1) => {
                let t1 = t1.unwrap_or(1.0);
                if n < 2 {
                    return Err(SgmError::configuration(format!(
                        "at least two steps are needed to span [{}, {}]",
                        t0, t1
                    )));
                }
                if t1 <= t0 {
                    return Err(SgmError::configuration(format!(
                        "end time {} must be after start time {}",
                        t1, t0
                    )));
                }
                ((t1 - t0) / (n - 1) as f64, Spacing::Between { t0, t1 })
            }
            (Some(dt), t0, Some(t1)) => {
                let implied = match t0 {
                    Some(t0) => t0 + dt * (n - 1) as f64,
                    None => dt * n as f64,
                };
                if (implied - t1).abs() > CONSISTENCY_RTOL * t1.abs().max(1.0) {
                    return Err(SgmError::configuration(format!(
                        "overdetermined schedule: {} steps of size {} starting at {} end at {}, not at the requested {}",
                        n,
                        dt,
                        t0.unwrap_or(dt),
                        implied,
                        t1
                    )));
                }
                match t0 {
                    Some(t0) => (dt, Spacing::FromStart { t0, dt }),
                    None => (dt, Spacing::Multiples { dt }),
                }
            }
        };

        let times = spacing.generate(n);
        Ok(TimeSchedule { times, dt })
    }
}

/// Converts continuous-time rates (e.g. `beta(t_i)`) into per-step values `dt * rate`.
pub fn continuous_to_discrete(values: &[f64], dt: f64) -> Vec<f64> {
    values.iter().map(|v| v * dt).collect()
}
