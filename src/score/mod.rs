//! Score functions `∇_x log p_t(x)` consumed by the reverse SDE and the loss.
//!
//! Anything implementing [Score] can drive sampling. Plain closures
//! `Fn(&V, f64) -> V` qualify directly; trained networks usually predict the
//! added noise instead and are adapted with [ScaledScore].

use ndarray::Array2;

use crate::error::SgmError;
use crate::sde::{ForwardSde, V};

/// A time-dependent score: given state `x` and time `t`, a vector shaped like `x`.
pub trait Score: Send + Sync {
    fn score(&self, x: &V, t: f64) -> V;

    /// Dimension of the states this score accepts, when it is fixed.
    ///
    /// Callers compare it against their data before evaluating, since evaluating a
    /// score on a state of the wrong length may panic.
    fn dim(&self) -> Option<usize> {
        None
    }
}

impl<T> Score for T
where
    T: Fn(&V, f64) -> V + Send + Sync,
{
    #[inline(always)]
    fn score(&self, x: &V, t: f64) -> V {
        self(x, t)
    }
}

/// An externally parameterized model predicting the noise added to `x` at time `t`.
pub trait NoiseModel: Send + Sync {
    fn predict(&self, x: &V, t: f64) -> V;
}

impl<T> NoiseModel for T
where
    T: Fn(&V, f64) -> V + Send + Sync,
{
    #[inline(always)]
    fn predict(&self, x: &V, t: f64) -> V {
        self(x, t)
    }
}

/// Turns a [NoiseModel] into a [Score].
///
/// With score scaling the prediction is divided by the marginal std, so the
/// model only has to predict unit-variance noise: `score = -model(x, t) / std(t)`.
/// Without it the model output is used as a negated score directly.
#[derive(Debug, Clone)]
pub struct ScaledScore<'a, S, M> {
    sde: &'a S,
    model: M,
    score_scaling: bool,
}

impl<'a, S: ForwardSde, M: NoiseModel> ScaledScore<'a, S, M> {
    pub fn new(sde: &'a S, model: M, score_scaling: bool) -> Self {
        Self {
            sde,
            model,
            score_scaling,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

impl<S: ForwardSde, M: NoiseModel> Score for ScaledScore<'_, S, M> {
    fn score(&self, x: &V, t: f64) -> V {
        let prediction = self.model.predict(x, t);
        if self.score_scaling {
            let (_, std) = self.sde.marginal(t);
            prediction / -std
        } else {
            -prediction
        }
    }
}

/// Exact score of the forward-noised empirical distribution of a finite data set.
///
/// Noising each data point `x_i` with the forward marginal gives the mixture
/// `p_t(x) = 1/N Σ N(x; mean_scale(t) x_i, std(t)^2 I)` whose score is
/// `Σ w_i (mean_scale(t) x_i - x) / std(t)^2` with softmax weights over the
/// component log densities.
#[derive(Debug, Clone)]
pub struct EmpiricalScore<'a, S> {
    sde: &'a S,
    data: Vec<V>,
}

impl<'a, S: ForwardSde> EmpiricalScore<'a, S> {
    pub fn new(sde: &'a S, data: Vec<V>) -> Result<Self, SgmError> {
        let dim = match data.first() {
            Some(first) => first.len(),
            None => {
                return Err(SgmError::configuration(
                    "the empirical score needs at least one data point",
                ))
            }
        };
        if let Some(bad) = data.iter().find(|x| x.len() != dim) {
            return Err(SgmError::DimensionMismatch {
                expected: dim,
                actual: bad.len(),
            });
        }
        Ok(Self { sde, data })
    }

    /// Builds the score from an array holding one data point per row.
    pub fn from_rows(sde: &'a S, data: &Array2<f64>) -> Result<Self, SgmError> {
        let rows = data
            .rows()
            .into_iter()
            .map(|row| V::from_iterator(row.len(), row.iter().copied()))
            .collect();
        Self::new(sde, rows)
    }

    pub fn data(&self) -> &[V] {
        &self.data
    }
}

impl<S: ForwardSde> Score for EmpiricalScore<'_, S> {
    fn dim(&self) -> Option<usize> {
        self.data.first().map(|x| x.len())
    }

    fn score(&self, x: &V, t: f64) -> V {
        let (mean_scale, std) = self.sde.marginal(t);
        let variance = std * std;
        let offsets: Vec<V> = self
            .data
            .iter()
            .map(|xi| xi * mean_scale - x)
            .collect();
        let potentials: Vec<f64> = offsets
            .iter()
            .map(|d| -0.5 * d.norm_squared() / variance)
            .collect();
        let max = potentials
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<f64> = potentials.iter().map(|p| (p - max).exp()).collect();
        let total: f64 = weights.iter().sum();

        let mut score = V::zeros(x.len());
        for (w, d) in weights.iter().zip(offsets.iter()) {
            score.axpy(w / (total * variance), d, 1.0);
        }
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sde::{VarianceExploding, VariancePreserving};
    use approx::assert_relative_eq;
    use nalgebra::DVector;
    use ndarray::array;

    #[test]
    fn closures_are_scores() {
        let score = |x: &V, t: f64| x * t;
        let x = DVector::from_vec(vec![1.0, 2.0]);
        assert_eq!(Score::score(&score, &x, 0.5), DVector::from_vec(vec![0.5, 1.0]));
        assert_eq!(Score::dim(&score), None);
    }

    #[test]
    fn single_point_score_is_the_transition_score() {
        let sde = VariancePreserving::new(0.1, 20.0, 1000).unwrap();
        let x0 = DVector::from_vec(vec![1.0, -2.0]);
        let empirical = EmpiricalScore::new(&sde, vec![x0.clone()]).unwrap();
        let x = DVector::from_vec(vec![0.3, 0.1]);
        for &t in &[0.01, 0.2, 0.9] {
            let expected = -sde.forward_potential(&x0, &x, t);
            assert_relative_eq!(empirical.score(&x, t), expected, max_relative = 1e-10);
        }
    }

    #[test]
    fn symmetric_data_gives_zero_score_at_origin() {
        let sde = VarianceExploding::new(0.01, 10.0, 100).unwrap();
        let data = array![[1.0, 0.0], [-1.0, 0.0], [0.0, 1.0], [0.0, -1.0]];
        let empirical = EmpiricalScore::from_rows(&sde, &data).unwrap();
        assert_eq!(empirical.dim(), Some(2));
        let origin = DVector::zeros(2);
        let score = empirical.score(&origin, 0.3);
        assert!(score.norm() < 1e-12);
    }

    #[test]
    fn far_points_do_not_underflow() {
        // At small t the softmax weights span hundreds of orders of magnitude
        let sde = VariancePreserving::new(0.1, 20.0, 1000).unwrap();
        let data = vec![DVector::from_vec(vec![1.0]), DVector::from_vec(vec![-1.0])];
        let empirical = EmpiricalScore::new(&sde, data).unwrap();
        let score = empirical.score(&DVector::from_vec(vec![40.0]), 0.001);
        assert!(score[0].is_finite());
        assert!(score[0] < 0.0);
    }

    #[test]
    fn empty_or_ragged_data_is_rejected() {
        let sde = VariancePreserving::new(0.1, 20.0, 100).unwrap();
        assert!(matches!(
            EmpiricalScore::new(&sde, vec![]),
            Err(SgmError::Configuration { .. })
        ));
        let ragged = vec![DVector::zeros(2), DVector::zeros(3)];
        assert!(matches!(
            EmpiricalScore::new(&sde, ragged),
            Err(SgmError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn scaled_score_divides_by_marginal_std() {
        let sde = VariancePreserving::new(0.1, 20.0, 1000).unwrap();
        let model = |x: &V, _t: f64| x.clone();
        let x = DVector::from_vec(vec![2.0, -4.0]);
        let t = 0.5;
        let (_, std) = sde.marginal(t);

        let scaled = ScaledScore::new(&sde, model, true);
        assert_relative_eq!(scaled.score(&x, t), -&x / std, max_relative = 1e-12);

        let unscaled = ScaledScore::new(&sde, model, false);
        assert_eq!(unscaled.score(&x, t), -&x);
    }
}
