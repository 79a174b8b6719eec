//! Forward and reverse stochastic differential equations.
//!
//! A forward SDE `dx = f(x, t) dt + g(t) dw` gradually turns data into noise as
//! `t` grows from 0 to 1. The families implemented here have an analytically
//! integrable marginal `p_t(x | x_0) = N(mean_scale(t) x_0, std(t)^2 I)`, which is
//! what makes denoising score matching cheap. Given a score function the
//! process can be reversed, see [ReverseSde].

mod reverse;
mod ve;
mod vp;

use std::fmt;
use std::str::FromStr;

use nalgebra::DVector;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::SgmError;
use crate::score::Score;
use crate::time::TimeSchedule;

pub use reverse::ReverseSde;
pub use ve::{VarianceExploding, DEFAULT_SIGMA_MAX, DEFAULT_SIGMA_MIN};
pub use vp::{VariancePreserving, DEFAULT_BETA_MAX, DEFAULT_BETA_MIN};

/// State vector type
pub type V = DVector<f64>;

/// Smallest marginal standard deviation accepted at the start of a schedule.
///
/// Below this the score `-(x - mean)/std^2` overflows for ordinary data scales.
pub const MIN_MARGINAL_STD: f64 = 1e-6;

/// Common interface of forward and reverse SDEs.
///
/// The diffusion coefficient is isotropic, so it is returned as a scalar.
pub trait Sde: Send + Sync {
    /// The time schedule the SDE is discretized on
    fn schedule(&self) -> &TimeSchedule;

    /// Drift vector and diffusion coefficient at state `x` and time `t`.
    fn coefficients(&self, x: &V, t: f64) -> (V, f64);

    /// One discrete update `x_{i+1} = x_i + f + G z` over the schedule step,
    /// returned as `(f, G)`.
    fn discretize(&self, x: &V, t: f64) -> (V, f64) {
        self.discretize_step(x, t, self.schedule().dt())
    }

    /// Like [Sde::discretize] with an explicit step size.
    ///
    /// Defaults to Euler-Maruyama: `f = drift * dt`, `G = diffusion * sqrt(dt)`.
    fn discretize_step(&self, x: &V, t: f64, dt: f64) -> (V, f64) {
        let (drift, diffusion) = self.coefficients(x, t);
        (drift * dt, diffusion * dt.sqrt())
    }

    /// Standard deviation of the reference distribution at the end of the schedule
    fn prior_std(&self) -> f64;

    /// State dimension the SDE is restricted to, if any.
    ///
    /// Forward SDEs act on any dimension; a reverse SDE inherits the restriction of
    /// its score.
    fn dim(&self) -> Option<usize> {
        None
    }

    /// Sample from the reference distribution `N(0, prior_std^2 I)`.
    fn prior_sample<R: Rng + ?Sized>(&self, rng: &mut R, dim: usize) -> V
    where
        Self: Sized,
    {
        let std = self.prior_std();
        DVector::from_fn(dim, |_, _| {
            let z: f64 = rng.sample(StandardNormal);
            z * std
        })
    }
}

impl<S: Sde> Sde for &S {
    fn schedule(&self) -> &TimeSchedule {
        (**self).schedule()
    }

    fn coefficients(&self, x: &V, t: f64) -> (V, f64) {
        (**self).coefficients(x, t)
    }

    fn discretize_step(&self, x: &V, t: f64, dt: f64) -> (V, f64) {
        (**self).discretize_step(x, t, dt)
    }

    fn prior_std(&self) -> f64 {
        (**self).prior_std()
    }

    fn dim(&self) -> Option<usize> {
        (**self).dim()
    }
}

/// A noising SDE with a closed-form Gaussian marginal.
pub trait ForwardSde: Sde {
    /// `(mean_scale, std)` of `p_t(x | x_0) = N(mean_scale * x_0, std^2 I)`.
    fn marginal(&self, t: f64) -> (f64, f64);

    /// Mean vector and standard deviation of the marginal started at `x0`.
    fn marginal_prob(&self, x0: &V, t: f64) -> (V, f64) {
        let (mean_scale, std) = self.marginal(t);
        (x0 * mean_scale, std)
    }

    /// Draws from the marginal at `t` given the standard normal `noise`.
    fn perturb(&self, x0: &V, t: f64, noise: &V) -> V {
        let (mean_scale, std) = self.marginal(t);
        x0 * mean_scale + noise * std
    }

    /// `(x - mean) / std^2`, the negated score of the transition density.
    fn forward_potential(&self, x0: &V, x: &V, t: f64) -> V {
        let (mean, std) = self.marginal_prob(x0, t);
        (x - mean) / (std * std)
    }

    /// Log density of the transition `x_0 -> x` over time `t`.
    fn forward_log_density(&self, x0: &V, x: &V, t: f64) -> f64 {
        let (mean, std) = self.marginal_prob(x0, t);
        let variance = std * std;
        let dim = x.len() as f64;
        -0.5 * (x - mean).norm_squared() / variance
            - 0.5 * dim * (2.0 * std::f64::consts::PI * variance).ln()
    }

    /// Density of the transition `x_0 -> x` over time `t`.
    fn forward_density(&self, x0: &V, x: &V, t: f64) -> f64 {
        self.forward_log_density(x0, x, t).exp()
    }

    /// Builds the reverse-time SDE driven by `score`.
    fn reverse<'a, F: Score>(&'a self, score: &'a F) -> ReverseSde<'a, Self, F>
    where
        Self: Sized,
    {
        ReverseSde::new(self, score)
    }

    /// Checks that the marginal does not collapse at the start of the schedule and
    /// that the coefficients stay finite at both ends.
    fn check_stability(&self) -> Result<(), SgmError> {
        self.check_schedule(self.schedule())
    }

    /// [ForwardSde::check_stability] against another schedule, e.g. one a solver
    /// integrates on.
    fn check_schedule(&self, schedule: &TimeSchedule) -> Result<(), SgmError> {
        let unit = DVector::from_element(1, 1.0);
        for t in [schedule.t0(), schedule.t1()] {
            let (mean_scale, std) = self.marginal(t);
            if !mean_scale.is_finite() || !std.is_finite() {
                return Err(SgmError::NumericalInstability {
                    reason: format!("marginal is not finite at t = {}", t),
                });
            }
            let (drift, diffusion) = self.coefficients(&unit, t);
            if !diffusion.is_finite() || drift.iter().any(|d| !d.is_finite()) {
                return Err(SgmError::NumericalInstability {
                    reason: format!("coefficients diverge at t = {}", t),
                });
            }
        }
        let (_, std) = self.marginal(schedule.t0());
        if std < MIN_MARGINAL_STD {
            return Err(SgmError::NumericalInstability {
                reason: format!(
                    "marginal std {:e} at t = {} is below {:e}",
                    std,
                    schedule.t0(),
                    MIN_MARGINAL_STD
                ),
            });
        }
        Ok(())
    }

    /// Step scale of the Langevin corrector at time `t`.
    ///
    /// Defaults to 1; variance-preserving SDEs shrink it by the per-step noise rate.
    fn langevin_alpha(&self, _t: f64) -> f64 {
        1.0
    }
}

/// Logs a warning when `sde` fails its stability check.
pub(crate) fn report_stability<S: ForwardSde>(sde: &S) {
    if let Err(e) = sde.check_stability() {
        tracing::warn!("{}", e);
    }
}

/// The SDE families known to the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdeFamily {
    /// Time-rescaled Ornstein-Uhlenbeck process with linear beta schedule
    VariancePreserving,
    /// Brownian motion with geometric noise schedule
    VarianceExploding,
}

impl FromStr for SdeFamily {
    type Err = SgmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ou" | "vp" | "vpsde" => Ok(SdeFamily::VariancePreserving),
            "ve" | "vesde" => Ok(SdeFamily::VarianceExploding),
            _ => Err(SgmError::UnknownSde(s.to_string())),
        }
    }
}

impl fmt::Display for SdeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdeFamily::VariancePreserving => write!(f, "vpsde"),
            SdeFamily::VarianceExploding => write!(f, "vesde"),
        }
    }
}

/// Any forward SDE the crate can build from configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum SdeVariant {
    VariancePreserving(VariancePreserving),
    VarianceExploding(VarianceExploding),
}

impl SdeVariant {
    pub fn family(&self) -> SdeFamily {
        match self {
            SdeVariant::VariancePreserving(_) => SdeFamily::VariancePreserving,
            SdeVariant::VarianceExploding(_) => SdeFamily::VarianceExploding,
        }
    }
}

impl From<VariancePreserving> for SdeVariant {
    fn from(sde: VariancePreserving) -> Self {
        SdeVariant::VariancePreserving(sde)
    }
}

impl From<VarianceExploding> for SdeVariant {
    fn from(sde: VarianceExploding) -> Self {
        SdeVariant::VarianceExploding(sde)
    }
}

impl Sde for SdeVariant {
    fn schedule(&self) -> &TimeSchedule {
        match self {
            SdeVariant::VariancePreserving(sde) => sde.schedule(),
            SdeVariant::VarianceExploding(sde) => sde.schedule(),
        }
    }

    fn coefficients(&self, x: &V, t: f64) -> (V, f64) {
        match self {
            SdeVariant::VariancePreserving(sde) => sde.coefficients(x, t),
            SdeVariant::VarianceExploding(sde) => sde.coefficients(x, t),
        }
    }

    fn discretize_step(&self, x: &V, t: f64, dt: f64) -> (V, f64) {
        match self {
            SdeVariant::VariancePreserving(sde) => sde.discretize_step(x, t, dt),
            SdeVariant::VarianceExploding(sde) => sde.discretize_step(x, t, dt),
        }
    }

    fn prior_std(&self) -> f64 {
        match self {
            SdeVariant::VariancePreserving(sde) => sde.prior_std(),
            SdeVariant::VarianceExploding(sde) => sde.prior_std(),
        }
    }
}

impl ForwardSde for SdeVariant {
    fn marginal(&self, t: f64) -> (f64, f64) {
        match self {
            SdeVariant::VariancePreserving(sde) => sde.marginal(t),
            SdeVariant::VarianceExploding(sde) => sde.marginal(t),
        }
    }

    fn langevin_alpha(&self, t: f64) -> f64 {
        match self {
            SdeVariant::VariancePreserving(sde) => sde.langevin_alpha(t),
            SdeVariant::VarianceExploding(sde) => sde.langevin_alpha(t),
        }
    }
}
