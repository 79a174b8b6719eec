use crate::score::Score;
use crate::time::TimeSchedule;

use super::{ForwardSde, Sde, V};

/// Reverse-time SDE of a forward SDE, driven by a score function.
///
/// The reverse process borrows both the forward SDE and the score. It shares the
/// forward schedule and never mutates either; build a new one whenever the score
/// changes (e.g. after a training checkpoint).
///
/// Continuous and discrete forms are kept separate:
///
/// - [Sde::coefficients] uses the time-reversal formula
///   `drift' = drift - diffusion^2 * score`,
/// - [Sde::discretize_step] returns `rev_f = -f + G^2 * score` built from the forward
///   Euler-Maruyama step `(f, G)`, so that with a zero score the reverse step
///   undoes the forward drift step exactly.
#[derive(Debug)]
pub struct ReverseSde<'a, S, F> {
    forward: &'a S,
    score: &'a F,
}

impl<S, F> Clone for ReverseSde<'_, S, F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, F> Copy for ReverseSde<'_, S, F> {}

impl<'a, S: ForwardSde, F: Score> ReverseSde<'a, S, F> {
    pub fn new(forward: &'a S, score: &'a F) -> Self {
        Self { forward, score }
    }

    /// The forward SDE this process reverses
    pub fn forward(&self) -> &'a S {
        self.forward
    }

    /// The score driving the reverse drift
    pub fn score(&self) -> &'a F {
        self.score
    }
}

impl<S: ForwardSde, F: Score> Sde for ReverseSde<'_, S, F> {
    fn schedule(&self) -> &TimeSchedule {
        self.forward.schedule()
    }

    fn coefficients(&self, x: &V, t: f64) -> (V, f64) {
        let (drift, diffusion) = self.forward.coefficients(x, t);
        let score = self.score.score(x, t);
        debug_assert_eq!(score.len(), x.len(), "score must match the state shape");
        (drift - score * (diffusion * diffusion), diffusion)
    }

    fn discretize_step(&self, x: &V, t: f64, dt: f64) -> (V, f64) {
        let (f, g) = self.forward.discretize_step(x, t, dt);
        let score = self.score.score(x, t);
        debug_assert_eq!(score.len(), x.len(), "score must match the state shape");
        (score * (g * g) - f, g)
    }

    fn prior_std(&self) -> f64 {
        self.forward.prior_std()
    }

    fn dim(&self) -> Option<usize> {
        self.score.dim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sde::{VarianceExploding, VariancePreserving};
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    fn zero_score(x: &V, _t: f64) -> V {
        V::zeros(x.len())
    }

    #[test]
    fn zero_score_reverses_the_forward_drift_step() {
        let sde = VariancePreserving::new(0.1, 20.0, 1000).unwrap();
        let reverse = sde.reverse(&zero_score);
        let x = DVector::from_vec(vec![0.7, -1.3, 2.0]);
        for t in sde.schedule().iter().step_by(97) {
            let (f, g) = sde.discretize(&x, t);
            let (rev_f, rev_g) = reverse.discretize(&x, t);
            assert_eq!(rev_f, -f);
            assert_eq!(rev_g, g);
        }
    }

    #[test]
    fn reverse_drift_subtracts_scaled_score() {
        let sde = VariancePreserving::new(0.1, 20.0, 1000).unwrap();
        let score = |x: &V, t: f64| x * (-1.0 - t);
        let reverse = sde.reverse(&score);
        let x = DVector::from_vec(vec![0.4, -0.9]);
        let t = 0.35;

        let (drift, diffusion) = sde.coefficients(&x, t);
        let (rev_drift, rev_diffusion) = reverse.coefficients(&x, t);
        let expected = &drift - score(&x, t) * diffusion.powi(2);
        assert_relative_eq!(rev_drift, expected, max_relative = 1e-12);
        assert_eq!(rev_diffusion, diffusion);

        let (f, g) = sde.discretize(&x, t);
        let (rev_f, rev_g) = reverse.discretize(&x, t);
        let expected = score(&x, t) * g.powi(2) - &f;
        assert_relative_eq!(rev_f, expected, max_relative = 1e-12);
        assert_eq!(rev_g, g);
    }

    #[test]
    fn continuous_and_discrete_forms_differ() {
        // With a nonzero score the discrete step is not dt times the reverse drift:
        // the sign of the forward drift flips but the score term does not.
        let sde = VariancePreserving::new(0.1, 20.0, 1000).unwrap();
        let score = |x: &V, _t: f64| -x;
        let reverse = sde.reverse(&score);
        let x = DVector::from_vec(vec![1.0]);
        let t = 0.5;
        let dt = sde.schedule().dt();
        let (rev_drift, _) = reverse.coefficients(&x, t);
        let (rev_f, _) = reverse.discretize(&x, t);
        assert!((rev_f[0] - rev_drift[0] * dt).abs() > 1e-6);
    }

    #[test]
    fn shares_forward_schedule() {
        let sde = VarianceExploding::new(0.01, 378.0, 250).unwrap();
        let reverse = sde.reverse(&zero_score);
        assert!(std::ptr::eq(reverse.schedule(), sde.schedule()));
        assert!(std::ptr::eq(reverse.forward(), &sde));
    }
}
