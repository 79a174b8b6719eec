use crate::error::SgmError;
use crate::time::TimeSchedule;

use super::{report_stability, ForwardSde, Sde, V};

pub const DEFAULT_SIGMA_MIN: f64 = 0.01;
pub const DEFAULT_SIGMA_MAX: f64 = 378.0;

/// Variance-exploding SDE: driftless Brownian motion with a geometric noise level.
///
/// ```text
/// dx = sigma(t) sqrt(2 ln(sigma_max / sigma_min)) dw,   sigma(t) = sigma_min (sigma_max / sigma_min)^t
/// ```
///
/// The marginal keeps the data unscaled and has standard deviation `sigma(t)`;
/// the data is taken to already carry `sigma_min` noise at `t = 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct VarianceExploding {
    sigma_min: f64,
    sigma_max: f64,
    schedule: TimeSchedule,
}

impl VarianceExploding {
    /// Creates the SDE on the default schedule of `num_steps` points ending at 1.
    pub fn new(sigma_min: f64, sigma_max: f64, num_steps: usize) -> Result<Self, SgmError> {
        Self::with_schedule(sigma_min, sigma_max, TimeSchedule::new(num_steps)?)
    }

    /// Creates the SDE on an explicit schedule.
    pub fn with_schedule(
        sigma_min: f64,
        sigma_max: f64,
        schedule: TimeSchedule,
    ) -> Result<Self, SgmError> {
        if !sigma_min.is_finite() || !sigma_max.is_finite() {
            return Err(SgmError::configuration(format!(
                "sigma_min and sigma_max must be finite, got {} and {}",
                sigma_min, sigma_max
            )));
        }
        if sigma_min <= 0.0 || sigma_max <= sigma_min {
            return Err(SgmError::configuration(format!(
                "expected 0 < sigma_min < sigma_max, got {} and {}",
                sigma_min, sigma_max
            )));
        }
        let sde = Self {
            sigma_min,
            sigma_max,
            schedule,
        };
        tracing::debug!(
            sigma_min,
            sigma_max,
            num_steps = sde.schedule.len(),
            "built variance-exploding SDE"
        );
        report_stability(&sde);
        Ok(sde)
    }

    pub fn sigma_min(&self) -> f64 {
        self.sigma_min
    }

    pub fn sigma_max(&self) -> f64 {
        self.sigma_max
    }

    /// Noise level at time `t`
    #[inline(always)]
    pub fn sigma(&self, t: f64) -> f64 {
        self.sigma_min * (self.sigma_max / self.sigma_min).powf(t)
    }

    fn log_ratio(&self) -> f64 {
        (self.sigma_max / self.sigma_min).ln()
    }
}

impl Sde for VarianceExploding {
    fn schedule(&self) -> &TimeSchedule {
        &self.schedule
    }

    fn coefficients(&self, x: &V, t: f64) -> (V, f64) {
        let diffusion = self.sigma(t) * (2.0 * self.log_ratio()).sqrt();
        (V::zeros(x.len()), diffusion)
    }

    fn prior_std(&self) -> f64 {
        self.sigma_max
    }
}

impl ForwardSde for VarianceExploding {
    fn marginal(&self, t: f64) -> (f64, f64) {
        (1.0, self.sigma(t))
    }
}
