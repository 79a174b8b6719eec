//! Denoising score matching.

use nalgebra::DVector;
use ndarray::Array2;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::error::SgmError;
use crate::score::Score;
use crate::sde::{ForwardSde, V};

/// Denoising score-matching objective over the forward marginal.
///
/// Each data row `x0` is noised at a uniformly drawn time `t` of the SDE schedule,
/// `x = mean_scale(t) x0 + std(t) z`, and the score is regressed onto the score of
/// the transition density. Without likelihood weighting the residual is
/// `z + std(t) * score(x, t)`; with it the residual is `z / std(t) + score(x, t)`
/// and its square is weighted by `diffusion(t)^2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreMatchingLoss {
    pub likelihood_weighting: bool,
    pub reduce_mean: bool,
}

impl Default for ScoreMatchingLoss {
    fn default() -> Self {
        Self {
            likelihood_weighting: false,
            reduce_mean: true,
        }
    }
}

impl ScoreMatchingLoss {
    pub fn new(likelihood_weighting: bool, reduce_mean: bool) -> Self {
        Self {
            likelihood_weighting,
            reduce_mean,
        }
    }

    /// Loss of a single data point at time `t` with standard normal `noise`.
    pub fn pointwise<S: ForwardSde, F: Score>(
        &self,
        sde: &S,
        score: &F,
        x0: &V,
        t: f64,
        noise: &V,
    ) -> Result<f64, SgmError> {
        if let Some(expected) = score.dim() {
            if expected != x0.len() {
                return Err(SgmError::DimensionMismatch {
                    expected,
                    actual: x0.len(),
                });
            }
        }
        let (_, std) = sde.marginal(t);
        let x = sde.perturb(x0, t, noise);
        let s = score.score(&x, t);
        if s.len() != x0.len() {
            return Err(SgmError::DimensionMismatch {
                expected: x0.len(),
                actual: s.len(),
            });
        }

        let squared = if self.likelihood_weighting {
            let (_, diffusion) = sde.coefficients(&x, t);
            let residual = noise / std + s;
            residual.map(|r| r * r) * (diffusion * diffusion)
        } else {
            let residual = noise + s * std;
            residual.map(|r| r * r)
        };

        let total = squared.sum();
        Ok(if self.reduce_mean {
            total / x0.len() as f64
        } else {
            total
        })
    }

    /// Monte Carlo estimate of the loss over a batch, one data point per row.
    pub fn evaluate<S, F, R>(
        &self,
        sde: &S,
        score: &F,
        data: &Array2<f64>,
        rng: &mut R,
    ) -> Result<f64, SgmError>
    where
        S: ForwardSde,
        F: Score,
        R: Rng + ?Sized,
    {
        if data.nrows() == 0 {
            return Err(SgmError::configuration("loss needs at least one data point"));
        }
        let dim = data.ncols();
        if let Some(expected) = score.dim() {
            if expected != dim {
                return Err(SgmError::DimensionMismatch {
                    expected,
                    actual: dim,
                });
            }
        }
        let schedule = sde.schedule();
        let (t0, t1) = (schedule.t0(), schedule.t1());

        let mut total = 0.0;
        for row in data.rows() {
            let x0 = DVector::from_iterator(dim, row.iter().copied());
            let t = rng.random_range(t0..=t1);
            let noise: V = DVector::from_fn(dim, |_, _| rng.sample(StandardNormal));
            total += self.pointwise(sde, score, &x0, t, &noise)?;
        }
        let loss = total / data.nrows() as f64;
        tracing::trace!(loss, rows = data.nrows(), "evaluated score-matching loss");
        Ok(loss)
    }
}
