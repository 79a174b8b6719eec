use crate::error::SgmError;
use crate::time::TimeSchedule;

use super::{report_stability, ForwardSde, Sde, V};

pub const DEFAULT_BETA_MIN: f64 = 0.001;
pub const DEFAULT_BETA_MAX: f64 = 3.0;

/// Variance-preserving SDE, a time-rescaled Ornstein-Uhlenbeck process.
///
/// ```text
/// dx = -1/2 beta(t) x dt + sqrt(beta(t)) dw,   beta(t) = beta_min + t (beta_max - beta_min)
/// ```
///
/// The linear beta schedule integrates in closed form, giving
/// `log mean_scale(t) = -1/2 beta_min t - 1/4 (beta_max - beta_min) t^2` and
/// `std(t)^2 = 1 - mean_scale(t)^2`.
#[derive(Debug, Clone, PartialEq)]
pub struct VariancePreserving {
    beta_min: f64,
    beta_max: f64,
    schedule: TimeSchedule,
}

impl VariancePreserving {
    /// Creates the SDE on the default schedule of `num_steps` points ending at 1.
    pub fn new(beta_min: f64, beta_max: f64, num_steps: usize) -> Result<Self, SgmError> {
        Self::with_schedule(beta_min, beta_max, TimeSchedule::new(num_steps)?)
    }

    /// Creates the SDE on an explicit schedule.
    pub fn with_schedule(
        beta_min: f64,
        beta_max: f64,
        schedule: TimeSchedule,
    ) -> Result<Self, SgmError> {
        if !beta_min.is_finite() || !beta_max.is_finite() {
            return Err(SgmError::configuration(format!(
                "beta_min and beta_max must be finite, got {} and {}",
                beta_min, beta_max
            )));
        }
        if beta_min < 0.0 || beta_max <= 0.0 {
            return Err(SgmError::configuration(format!(
                "beta_min must be non-negative and beta_max positive, got {} and {}",
                beta_min, beta_max
            )));
        }
        if beta_max < beta_min {
            return Err(SgmError::configuration(format!(
                "beta_max ({}) must not be smaller than beta_min ({})",
                beta_max, beta_min
            )));
        }
        let sde = Self {
            beta_min,
            beta_max,
            schedule,
        };
        tracing::debug!(
            beta_min,
            beta_max,
            num_steps = sde.schedule.len(),
            "built variance-preserving SDE"
        );
        report_stability(&sde);
        Ok(sde)
    }

    pub fn beta_min(&self) -> f64 {
        self.beta_min
    }

    pub fn beta_max(&self) -> f64 {
        self.beta_max
    }

    /// Noise rate at time `t`
    #[inline(always)]
    pub fn beta(&self, t: f64) -> f64 {
        self.beta_min + t * (self.beta_max - self.beta_min)
    }

    /// Per-step noise rate `dt * beta(t)`
    pub fn discrete_beta(&self, t: f64) -> f64 {
        self.schedule.dt() * self.beta(t)
    }

    #[inline(always)]
    pub fn log_mean_coeff(&self, t: f64) -> f64 {
        -0.5 * t * self.beta_min - 0.25 * t * t * (self.beta_max - self.beta_min)
    }

    pub fn mean_coeff(&self, t: f64) -> f64 {
        self.log_mean_coeff(t).exp()
    }

    pub fn variance(&self, t: f64) -> f64 {
        // exp_m1 keeps precision for small t where the variance is tiny
        -(2.0 * self.log_mean_coeff(t)).exp_m1()
    }
}

impl Sde for VariancePreserving {
    fn schedule(&self) -> &TimeSchedule {
        &self.schedule
    }

    fn coefficients(&self, x: &V, t: f64) -> (V, f64) {
        let beta_t = self.beta(t);
        (x * (-0.5 * beta_t), beta_t.sqrt())
    }

    fn prior_std(&self) -> f64 {
        1.0
    }
}

impl ForwardSde for VariancePreserving {
    fn marginal(&self, t: f64) -> (f64, f64) {
        (self.mean_coeff(t), self.variance(t).sqrt())
    }

    fn langevin_alpha(&self, t: f64) -> f64 {
        1.0 - self.discrete_beta(t)
    }
}
