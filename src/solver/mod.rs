//! Numerical integration of SDEs and batch sampling of the reverse process.
//!
//! A [Solver] advances a single state by one step. The [Sampler] draws a batch of
//! initial states from the prior, walks the solver schedule backwards in time
//! and collects the results. Samples are independent and simulated in parallel.
//! An optional [Corrector] refines the state after every predictor step.

mod em;
mod langevin;
mod progress;

use std::marker::PhantomData;

use nalgebra::DVector;
use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::error::SgmError;
use crate::sde::{Sde, V};
use crate::time::TimeSchedule;

pub use em::EulerMaruyama;
pub use langevin::AnnealedLangevin;
use progress::ProgressTracker;

/// One-step integrator over a schedule.
pub trait Solver: Send + Sync {
    type Sde: Sde;

    /// The SDE being integrated
    fn sde(&self) -> &Self::Sde;

    /// Times the solver visits
    fn schedule(&self) -> &TimeSchedule;

    /// Advances `x` at time `t` by one step, returning the new state and its
    /// noise-free mean.
    fn update<R: Rng + ?Sized>(&self, rng: &mut R, x: &V, t: f64) -> (V, V);
}

/// Refinement applied at a fixed time after each predictor step.
pub trait Corrector: Send + Sync {
    /// Score evaluations per call to [Corrector::correct]
    fn num_steps(&self) -> usize;

    /// State dimension the corrector is restricted to, if any
    fn dim(&self) -> Option<usize> {
        None
    }

    /// Refines the predictor output `(x, x_mean)` at time `t`.
    fn correct<R: Rng + ?Sized>(&self, rng: &mut R, x: V, x_mean: V, t: f64) -> (V, V);
}

/// Predictor-only sampling.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCorrector;

impl Corrector for NoCorrector {
    fn num_steps(&self) -> usize {
        0
    }

    fn correct<R: Rng + ?Sized>(&self, _rng: &mut R, x: V, x_mean: V, _t: f64) -> (V, V) {
        (x, x_mean)
    }
}

/// Marker for a builder field that has not been set yet
pub struct Missing;
/// Marker for a builder field that has been set
pub struct Provided;

/// Result of a sampling run.
#[derive(Debug, Clone)]
pub struct Samples {
    /// Final states, one row per sample
    pub samples: Array2<f64>,
    /// States after every step, indexed `[step, sample, dim]`, when requested
    pub trajectory: Option<Array3<f64>>,
    /// Number of score (function) evaluations per sample
    pub nfe: usize,
}

/// Draws samples by integrating a solver from the prior at `t1` down to `t0`.
pub struct Sampler<Sv, C = NoCorrector> {
    solver: Sv,
    corrector: Option<C>,
    dim: usize,
    nsamples: usize,
    denoise: bool,
    stack_samples: bool,
}

impl<Sv: Solver> Sampler<Sv, NoCorrector> {
    /// Returns a new [SamplerBuilder].
    ///
    /// # Example
    /// ```ignore
    /// let reverse = sde.reverse(&score);
    /// let sampler = Sampler::builder()
    ///     .solver(EulerMaruyama::new(reverse))
    ///     .dim(2)
    ///     .nsamples(1000)
    ///     .denoise(true)
    ///     .build()?;
    /// let samples = sampler.sample(&mut rng)?;
    /// ```
    pub fn builder() -> SamplerBuilder<Sv, NoCorrector, Missing, Missing, Missing> {
        SamplerBuilder::new()
    }
}

impl<Sv: Solver, C: Corrector> Sampler<Sv, C> {
    pub fn solver(&self) -> &Sv {
        &self.solver
    }

    pub fn corrector(&self) -> Option<&C> {
        self.corrector.as_ref()
    }

    /// Score evaluations per sample for a full run.
    pub fn nfe(&self) -> usize {
        let inner = self.corrector.as_ref().map_or(0, |c| c.num_steps());
        self.solver.schedule().len() * (1 + inner)
    }

    /// A single predictor step followed by the corrector, if any; sampling may be
    /// interrupted and resumed between steps.
    pub fn step<R: Rng + ?Sized>(&self, rng: &mut R, x: &V, t: f64) -> (V, V) {
        let (x, x_mean) = self.solver.update(rng, x, t);
        match &self.corrector {
            Some(corrector) => corrector.correct(rng, x, x_mean, t),
            None => (x, x_mean),
        }
    }

    /// Fails when the score behind the solver or the corrector is restricted to
    /// another dimension.
    fn check_dim(&self, actual: usize) -> Result<(), SgmError> {
        let restricted = [
            self.solver.sde().dim(),
            self.corrector.as_ref().and_then(|c| c.dim()),
        ];
        for expected in restricted.into_iter().flatten() {
            if expected != actual {
                return Err(SgmError::DimensionMismatch { expected, actual });
            }
        }
        Ok(())
    }

    /// Initial states drawn from the prior, one row per sample.
    pub fn initial_states<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Array2<f64>, SgmError> {
        let states: Vec<V> = (0..self.nsamples)
            .map(|_| self.solver.sde().prior_sample(rng, self.dim))
            .collect();
        to_array(&states, self.dim)
    }

    /// Samples starting from fresh prior draws.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Samples, SgmError> {
        let initial = self.initial_states(rng)?;
        self.sample_from(rng, &initial)
    }

    /// Samples starting from the given states, one row per sample.
    ///
    /// Every sample gets its own generator seeded from `rng`, so a run is
    /// reproducible regardless of how rayon schedules the work.
    pub fn sample_from<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        initial: &Array2<f64>,
    ) -> Result<Samples, SgmError> {
        if initial.ncols() != self.dim {
            return Err(SgmError::DimensionMismatch {
                expected: self.dim,
                actual: initial.ncols(),
            });
        }
        self.check_dim(self.dim)?;
        let nsamples = initial.nrows();
        let schedule = self.solver.schedule();
        let seeds: Vec<u64> = (0..nsamples).map(|_| rng.random()).collect();
        let progress = ProgressTracker::new(nsamples);

        let paths: Vec<(V, Vec<V>)> = seeds
            .par_iter()
            .enumerate()
            .map(|(i, &seed)| {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut x = DVector::from_iterator(self.dim, initial.row(i).iter().copied());
                let mut x_mean = x.clone();
                let mut trajectory = Vec::new();
                for t in schedule.rev() {
                    let (next, mean) = self.step(&mut rng, &x, t);
                    x = next;
                    x_mean = mean;
                    if self.stack_samples {
                        trajectory.push(if self.denoise {
                            x_mean.clone()
                        } else {
                            x.clone()
                        });
                    }
                }
                progress.inc();
                (if self.denoise { x_mean } else { x }, trajectory)
            })
            .collect();
        progress.finish();

        let finals: Vec<V> = paths.iter().map(|(x, _)| x.clone()).collect();
        let samples = to_array(&finals, self.dim)?;
        let trajectory = if self.stack_samples {
            let steps = schedule.len();
            let mut values = Vec::with_capacity(steps * nsamples * self.dim);
            for step in 0..steps {
                for (_, path) in &paths {
                    values.extend(path[step].iter().copied());
                }
            }
            Some(Array3::from_shape_vec((steps, nsamples, self.dim), values)?)
        } else {
            None
        };

        Ok(Samples {
            samples,
            trajectory,
            nfe: self.nfe(),
        })
    }
}

fn to_array(states: &[V], dim: usize) -> Result<Array2<f64>, SgmError> {
    let values: Vec<f64> = states.iter().flat_map(|x| x.iter().copied()).collect();
    Ok(Array2::from_shape_vec((states.len(), dim), values)?)
}

/// Builder for [Sampler] with compile-time checking of the required fields.
///
/// # Required Fields
/// - `solver`: the integrator, usually an [EulerMaruyama] over a reverse SDE
/// - `dim`: dimension of a single sample
/// - `nsamples`: number of samples drawn by [Sampler::sample]
///
/// # Optional Fields
/// - `corrector`: refinement after every predictor step, e.g. an [AnnealedLangevin]
/// - `denoise`: return the noise-free mean of the last step (default `true`)
/// - `stack_samples`: keep the state after every step (default `false`)
pub struct SamplerBuilder<Sv, C, SolverState, DimState, NSamplesState> {
    solver: Option<Sv>,
    corrector: Option<C>,
    dim: Option<usize>,
    nsamples: Option<usize>,
    denoise: bool,
    stack_samples: bool,
    _phantom: PhantomData<(SolverState, DimState, NSamplesState)>,
}

impl<Sv> SamplerBuilder<Sv, NoCorrector, Missing, Missing, Missing> {
    pub fn new() -> Self {
        Self {
            solver: None,
            corrector: None,
            dim: None,
            nsamples: None,
            denoise: true,
            stack_samples: false,
            _phantom: PhantomData,
        }
    }
}

impl<Sv> Default for SamplerBuilder<Sv, NoCorrector, Missing, Missing, Missing> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Sv, C, SolverState, DimState, NSamplesState>
    SamplerBuilder<Sv, C, SolverState, DimState, NSamplesState>
{
    /// Whether the last step returns its noise-free mean (optional).
    pub fn denoise(mut self, denoise: bool) -> Self {
        self.denoise = denoise;
        self
    }

    /// Whether every intermediate state is kept (optional).
    pub fn stack_samples(mut self, stack_samples: bool) -> Self {
        self.stack_samples = stack_samples;
        self
    }

    /// Sets the corrector run after every predictor step (optional).
    pub fn corrector<C2: Corrector>(
        self,
        corrector: C2,
    ) -> SamplerBuilder<Sv, C2, SolverState, DimState, NSamplesState> {
        self.maybe_corrector(Some(corrector))
    }

    /// Sets the corrector when one is given (optional).
    pub fn maybe_corrector<C2: Corrector>(
        self,
        corrector: Option<C2>,
    ) -> SamplerBuilder<Sv, C2, SolverState, DimState, NSamplesState> {
        SamplerBuilder {
            solver: self.solver,
            corrector,
            dim: self.dim,
            nsamples: self.nsamples,
            denoise: self.denoise,
            stack_samples: self.stack_samples,
            _phantom: PhantomData,
        }
    }
}

impl<Sv, C, DimState, NSamplesState> SamplerBuilder<Sv, C, Missing, DimState, NSamplesState> {
    /// Sets the solver (required).
    pub fn solver(self, solver: Sv) -> SamplerBuilder<Sv, C, Provided, DimState, NSamplesState> {
        SamplerBuilder {
            solver: Some(solver),
            corrector: self.corrector,
            dim: self.dim,
            nsamples: self.nsamples,
            denoise: self.denoise,
            stack_samples: self.stack_samples,
            _phantom: PhantomData,
        }
    }
}

impl<Sv, C, SolverState, NSamplesState> SamplerBuilder<Sv, C, SolverState, Missing, NSamplesState> {
    /// Sets the dimension of a sample (required).
    pub fn dim(self, dim: usize) -> SamplerBuilder<Sv, C, SolverState, Provided, NSamplesState> {
        SamplerBuilder {
            solver: self.solver,
            corrector: self.corrector,
            dim: Some(dim),
            nsamples: self.nsamples,
            denoise: self.denoise,
            stack_samples: self.stack_samples,
            _phantom: PhantomData,
        }
    }
}

impl<Sv, C, SolverState, DimState> SamplerBuilder<Sv, C, SolverState, DimState, Missing> {
    /// Sets the number of samples (required).
    pub fn nsamples(
        self,
        nsamples: usize,
    ) -> SamplerBuilder<Sv, C, SolverState, DimState, Provided> {
        SamplerBuilder {
            solver: self.solver,
            corrector: self.corrector,
            dim: self.dim,
            nsamples: Some(nsamples),
            denoise: self.denoise,
            stack_samples: self.stack_samples,
            _phantom: PhantomData,
        }
    }
}

impl<Sv: Solver, C: Corrector> SamplerBuilder<Sv, C, Provided, Provided, Provided> {
    /// Builds the [Sampler]; only available once all required fields are set.
    ///
    /// Fails with [SgmError::DimensionMismatch] when the score behind the solver or
    /// the corrector is restricted to a dimension other than `dim`.
    pub fn build(self) -> Result<Sampler<Sv, C>, SgmError> {
        let (Some(solver), Some(dim), Some(nsamples)) = (self.solver, self.dim, self.nsamples)
        else {
            unreachable!("type state guarantees the required fields are set")
        };
        let sampler = Sampler {
            solver,
            corrector: self.corrector,
            dim,
            nsamples,
            denoise: self.denoise,
            stack_samples: self.stack_samples,
        };
        sampler.check_dim(dim)?;
        Ok(sampler)
    }
}
