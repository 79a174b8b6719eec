use nalgebra::DVector;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::SgmError;
use crate::score::Score;
use crate::sde::{ForwardSde, V};
use crate::time::TimeSchedule;

use super::{Corrector, Solver};

/// Annealed Langevin corrector driven by a score.
///
/// At a fixed time `t` each update moves `x` along the score and adds matching noise:
///
/// ```text
/// eps    = 2 * alpha(t) * (snr * |z| / |score(x, t)|)^2
/// x_mean = x + eps * score(x, t)
/// x      = x_mean + sqrt(2 eps) z
/// ```
///
/// The step size adapts to the ratio of noise and score norms so the signal-to-noise
/// ratio of the update stays at `snr`. Used as a [Corrector], it runs
/// `num_inner_steps` updates after every predictor step.
#[derive(Debug)]
pub struct AnnealedLangevin<'a, S, F> {
    sde: &'a S,
    score: &'a F,
    schedule: TimeSchedule,
    snr: f64,
    num_inner_steps: usize,
}

impl<'a, S: ForwardSde, F: Score> AnnealedLangevin<'a, S, F> {
    pub fn new(sde: &'a S, score: &'a F, snr: f64, num_inner_steps: usize) -> Result<Self, SgmError> {
        Self::with_schedule(sde, score, sde.schedule().clone(), snr, num_inner_steps)
    }

    pub fn with_schedule(
        sde: &'a S,
        score: &'a F,
        schedule: TimeSchedule,
        snr: f64,
        num_inner_steps: usize,
    ) -> Result<Self, SgmError> {
        if !snr.is_finite() || snr <= 0.0 {
            return Err(SgmError::configuration(format!(
                "signal-to-noise ratio must be positive and finite, got {}",
                snr
            )));
        }
        if num_inner_steps == 0 {
            return Err(SgmError::configuration(
                "the corrector needs at least one inner step",
            ));
        }
        tracing::debug!(snr, num_inner_steps, "built annealed Langevin corrector");
        Ok(Self {
            sde,
            score,
            schedule,
            snr,
            num_inner_steps,
        })
    }

    pub fn snr(&self) -> f64 {
        self.snr
    }

    pub fn num_inner_steps(&self) -> usize {
        self.num_inner_steps
    }

    /// Langevin step size for the given score and noise draws.
    fn step_size(&self, grad: &V, noise: &V, t: f64) -> f64 {
        let grad_norm = grad.norm();
        if grad_norm == 0.0 {
            // A flat score carries no direction to follow.
            return 0.0;
        }
        let ratio = self.snr * noise.norm() / grad_norm;
        2.0 * self.sde.langevin_alpha(t) * ratio * ratio
    }
}

impl<S: ForwardSde, F: Score> Solver for AnnealedLangevin<'_, S, F> {
    type Sde = S;

    fn sde(&self) -> &S {
        self.sde
    }

    fn schedule(&self) -> &TimeSchedule {
        &self.schedule
    }

    fn update<R: Rng + ?Sized>(&self, rng: &mut R, x: &V, t: f64) -> (V, V) {
        let grad = self.score.score(x, t);
        let z: V = DVector::from_fn(x.len(), |_, _| rng.sample(StandardNormal));
        let eps = self.step_size(&grad, &z, t);
        let x_mean = x + grad * eps;
        let x = &x_mean + z * (2.0 * eps).sqrt();
        (x, x_mean)
    }
}

impl<S: ForwardSde, F: Score> Corrector for AnnealedLangevin<'_, S, F> {
    fn num_steps(&self) -> usize {
        self.num_inner_steps
    }

    fn dim(&self) -> Option<usize> {
        self.score.dim()
    }

    fn correct<R: Rng + ?Sized>(&self, rng: &mut R, x: V, x_mean: V, t: f64) -> (V, V) {
        (0..self.num_inner_steps).fold((x, x_mean), |(x, _), _| self.update(&mut *rng, &x, t))
    }
}
