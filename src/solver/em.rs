use nalgebra::DVector;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::SgmError;
use crate::sde::{Sde, V};
use crate::time::TimeSchedule;

use super::Solver;

/// Euler-Maruyama integrator over the discretization of an SDE.
///
/// Each update draws `z ~ N(0, I)` and computes
///
/// ```text
/// x_mean = x + f(x, t)
/// x      = x_mean + G(x, t) z
/// ```
///
/// where `(f, G)` comes from [Sde::discretize_step] with the solver's own step
/// size. Built on a [ReverseSde](crate::sde::ReverseSde)
/// this is the ancestral reverse-diffusion sampler.
#[derive(Debug, Clone)]
pub struct EulerMaruyama<S> {
    sde: S,
    schedule: TimeSchedule,
}

impl<S: Sde> EulerMaruyama<S> {
    /// Integrates on the schedule of the SDE itself.
    pub fn new(sde: S) -> Self {
        let schedule = sde.schedule().clone();
        Self::with_schedule(sde, schedule)
    }

    /// Integrates on an explicit schedule.
    pub fn with_schedule(sde: S, schedule: TimeSchedule) -> Self {
        tracing::debug!(
            num_steps = schedule.len(),
            t0 = schedule.t0(),
            t1 = schedule.t1(),
            "built Euler-Maruyama solver"
        );
        Self { sde, schedule }
    }

    /// Integrates on `num_steps` points starting at `epsilon` (or one step in),
    /// spaced by `dt` when given.
    pub fn with_steps(
        sde: S,
        num_steps: usize,
        dt: Option<f64>,
        epsilon: Option<f64>,
    ) -> Result<Self, SgmError> {
        let schedule = TimeSchedule::builder()
            .num_steps(num_steps)
            .maybe_dt(dt)
            .maybe_t0(epsilon)
            .build()?;
        Ok(Self::with_schedule(sde, schedule))
    }
}

impl<S: Sde> Solver for EulerMaruyama<S> {
    type Sde = S;

    fn sde(&self) -> &S {
        &self.sde
    }

    fn schedule(&self) -> &TimeSchedule {
        &self.schedule
    }

    fn update<R: Rng + ?Sized>(&self, rng: &mut R, x: &V, t: f64) -> (V, V) {
        let (f, g) = self.sde.discretize_step(x, t, self.schedule.dt());
        let x_mean = x + f;
        let z: V = DVector::from_fn(x.len(), |_, _| rng.sample(StandardNormal));
        let x = &x_mean + z * g;
        (x, x_mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sde::{ForwardSde, VariancePreserving};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn update_follows_the_discretization() {
        let sde = VariancePreserving::new(0.1, 20.0, 100).unwrap();
        let zero = |x: &V, _t: f64| V::zeros(x.len());
        let solver = EulerMaruyama::new(sde.reverse(&zero));
        let x = DVector::from_vec(vec![1.0, -1.0]);
        let t = 0.5;

        let mut rng = StdRng::seed_from_u64(7);
        let (next, mean) = solver.update(&mut rng, &x, t);
        let (f, g) = solver.sde().discretize(&x, t);
        assert_eq!(mean, &x + &f);

        let mut rng = StdRng::seed_from_u64(7);
        let z: V = DVector::from_fn(2, |_, _| rng.sample(StandardNormal));
        assert_eq!(next, &mean + z * g);
    }

    #[test]
    fn solver_schedule_can_differ_from_sde() {
        let sde = VariancePreserving::new(0.1, 20.0, 1000).unwrap();
        let solver = EulerMaruyama::with_steps(&sde, 50, None, Some(1e-3)).unwrap();
        assert_eq!(solver.schedule().len(), 50);
        assert_eq!(solver.schedule().t0(), 1e-3);
        assert_eq!(solver.schedule().t1(), 1.0);
        assert_eq!(solver.sde().schedule().len(), 1000);

        // Steps use the solver spacing, not the one of the SDE.
        let x = DVector::from_vec(vec![0.5]);
        let (_, mean) = solver.update(&mut StdRng::seed_from_u64(0), &x, 0.5);
        let (f, _) = sde.discretize_step(&x, 0.5, solver.schedule().dt());
        assert_eq!(mean, &x + f);

        let conflicting = EulerMaruyama::with_steps(&sde, 0, None, None);
        assert!(matches!(conflicting, Err(SgmError::Configuration { .. })));
    }
}
