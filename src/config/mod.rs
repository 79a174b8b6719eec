//! JSON configuration and the factories that turn it into SDEs and solvers.
//!
//! Every field has a default, so `{}` is a valid configuration describing a
//! variance-preserving SDE on 1000 steps sampled with Euler-Maruyama.
//!
//! ```json
//! {
//!   "sde": { "name": "vpsde", "beta_min": 0.1, "beta_max": 20.0, "num_steps": 1000 },
//!   "solver": { "name": "em", "num_steps": 500, "epsilon": 0.001, "inner_solver": "annealed", "snr": 0.16 },
//!   "training": { "score_scaling": true, "likelihood_weighting": false },
//!   "strict_stability": true
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SgmError;
use crate::loss::ScoreMatchingLoss;
use crate::score::Score;
use crate::sde::{
    ForwardSde, ReverseSde, SdeFamily, SdeVariant, VarianceExploding, VariancePreserving,
    DEFAULT_BETA_MAX, DEFAULT_BETA_MIN, DEFAULT_SIGMA_MAX, DEFAULT_SIGMA_MIN,
};
use crate::solver::{AnnealedLangevin, EulerMaruyama, Solver};
use crate::time::DEFAULT_NUM_STEPS;

/// Signal-to-noise ratio of the annealed Langevin corrector
pub const DEFAULT_SNR: f64 = 0.16;

/// Predictor over the reverse SDE and the optional corrector run after each of its steps.
pub type SolverPair<'a, S, F> = (
    EulerMaruyama<ReverseSde<'a, S, F>>,
    Option<AnnealedLangevin<'a, S, F>>,
);

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub sde: SdeConfig,
    pub solver: SolverConfig,
    pub training: TrainingConfig,
    /// Treat a failed stability check of the SDE as an error instead of a warning
    pub strict_stability: bool,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self, SgmError> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SgmError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, SgmError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Builds the configured SDE.
    pub fn sde(&self) -> Result<SdeVariant, SgmError> {
        get_sde(&self.sde, self.strict_stability)
    }

    /// Builds the configured predictor and corrector over `sde` and `score`.
    pub fn solver<'a, S: ForwardSde, F: Score>(
        &self,
        sde: &'a S,
        score: &'a F,
    ) -> Result<SolverPair<'a, S, F>, SgmError> {
        get_solver(&self.solver, sde, score, self.strict_stability)
    }
}

/// Forward SDE parameters. The beta fields are read by variance-preserving SDEs,
/// the sigma fields by variance-exploding ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SdeConfig {
    pub name: String,
    pub beta_min: f64,
    pub beta_max: f64,
    pub sigma_min: f64,
    pub sigma_max: f64,
    pub num_steps: usize,
}

impl Default for SdeConfig {
    fn default() -> Self {
        Self {
            name: SdeFamily::VariancePreserving.to_string(),
            beta_min: DEFAULT_BETA_MIN,
            beta_max: DEFAULT_BETA_MAX,
            sigma_min: DEFAULT_SIGMA_MIN,
            sigma_max: DEFAULT_SIGMA_MAX,
            num_steps: DEFAULT_NUM_STEPS,
        }
    }
}

/// Sampler parameters. `dt` and `epsilon` (the first time) are derived from
/// `num_steps` when absent. `epsilon` must be positive.
///
/// `inner_solver` names an optional corrector; `snr` and `num_inner_steps` are
/// only read when it is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverConfig {
    pub name: String,
    pub num_steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epsilon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inner_solver: Option<String>,
    pub snr: f64,
    pub num_inner_steps: usize,
    pub denoise: bool,
    pub stack_samples: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            name: "eulermaruyama".to_string(),
            num_steps: DEFAULT_NUM_STEPS,
            dt: None,
            epsilon: None,
            inner_solver: None,
            snr: DEFAULT_SNR,
            num_inner_steps: 1,
            denoise: true,
            stack_samples: false,
        }
    }
}

/// Training objective parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    /// Divide noise predictions by the marginal std, see [ScaledScore](crate::score::ScaledScore)
    pub score_scaling: bool,
    pub likelihood_weighting: bool,
    pub reduce_mean: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            score_scaling: true,
            likelihood_weighting: false,
            reduce_mean: true,
        }
    }
}

impl TrainingConfig {
    pub fn loss(&self) -> ScoreMatchingLoss {
        ScoreMatchingLoss::new(self.likelihood_weighting, self.reduce_mean)
    }
}

/// Builds the SDE named in `config`.
///
/// Instability is only logged unless `strict` is set, in which case it is returned
/// as [SgmError::NumericalInstability].
pub fn get_sde(config: &SdeConfig, strict: bool) -> Result<SdeVariant, SgmError> {
    let family: SdeFamily = config.name.parse()?;
    let sde: SdeVariant = match family {
        SdeFamily::VariancePreserving => {
            VariancePreserving::new(config.beta_min, config.beta_max, config.num_steps)?.into()
        }
        SdeFamily::VarianceExploding => {
            VarianceExploding::new(config.sigma_min, config.sigma_max, config.num_steps)?.into()
        }
    };
    if strict {
        sde.check_stability()?;
    }
    Ok(sde)
}

/// Builds the solver named in `config` over the reverse of `sde` driven by `score`,
/// together with the corrector named by `inner_solver`, if any.
///
/// The forward SDE is checked on the solver's schedule, which may start earlier
/// than its own. Instability is only logged unless `strict` is set.
pub fn get_solver<'a, S: ForwardSde, F: Score>(
    config: &SolverConfig,
    sde: &'a S,
    score: &'a F,
    strict: bool,
) -> Result<SolverPair<'a, S, F>, SgmError> {
    let outer = match config.name.to_lowercase().as_str() {
        "eulermaruyama" | "em" => EulerMaruyama::with_steps(
            sde.reverse(score),
            config.num_steps,
            config.dt,
            config.epsilon,
        )?,
        _ => return Err(SgmError::UnknownSolver(config.name.clone())),
    };
    let inner = match config.inner_solver.as_deref() {
        None => None,
        Some(name) if name.eq_ignore_ascii_case("annealed") => {
            let schedule = outer.schedule().clone();
            Some(AnnealedLangevin::with_schedule(
                sde,
                score,
                schedule,
                config.snr,
                config.num_inner_steps,
            )?)
        }
        Some(name) => return Err(SgmError::UnknownSolver(name.to_string())),
    };

    if let Err(e) = sde.check_schedule(outer.schedule()) {
        if strict {
            return Err(e);
        }
        tracing::warn!("{}", e);
    }
    Ok((outer, inner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sde::{Sde, V};
    use crate::solver::Corrector;

    fn zero(x: &V, _t: f64) -> V {
        V::zeros(x.len())
    }

    #[test]
    fn empty_json_gives_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
        let sde = config.sde().unwrap();
        assert_eq!(sde.family(), SdeFamily::VariancePreserving);
        assert_eq!(sde.schedule().len(), 1000);
    }

    #[test]
    fn reads_nested_sections() {
        let json = r#"{
            "sde": { "name": "VESDE", "sigma_min": 0.05, "sigma_max": 50.0, "num_steps": 200 },
            "solver": { "name": "em", "num_steps": 100, "epsilon": 0.001, "stack_samples": true },
            "training": { "likelihood_weighting": true, "reduce_mean": false }
        }"#;
        let config = Config::from_json(json).unwrap();
        assert_eq!(config.solver.epsilon, Some(1e-3));
        assert!(config.solver.stack_samples);
        assert!(config.training.score_scaling);
        assert_eq!(
            config.training.loss(),
            ScoreMatchingLoss::new(true, false)
        );

        let sde = config.sde().unwrap();
        assert_eq!(sde.family(), SdeFamily::VarianceExploding);
        assert_eq!(sde.prior_std(), 50.0);

        let (solver, corrector) = config.solver(&sde, &zero).unwrap();
        assert_eq!(solver.schedule().len(), 100);
        assert_eq!(solver.schedule().t0(), 1e-3);
        assert!(corrector.is_none());
    }

    #[test]
    fn annealed_inner_solver_builds_a_corrector() {
        let config = Config::from_json(
            r#"{ "solver": { "num_steps": 40, "inner_solver": "Annealed", "snr": 0.1, "num_inner_steps": 3 } }"#,
        )
        .unwrap();
        let sde = config.sde().unwrap();
        let (solver, corrector) = config.solver(&sde, &zero).unwrap();
        let corrector = corrector.unwrap();
        assert_eq!(corrector.snr(), 0.1);
        assert_eq!(Corrector::num_steps(&corrector), 3);
        assert_eq!(corrector.schedule(), solver.schedule());

        let defaults = SolverConfig {
            inner_solver: Some("annealed".to_string()),
            ..Default::default()
        };
        let (_, corrector) = get_solver(&defaults, &sde, &zero, false).unwrap();
        let corrector = corrector.unwrap();
        assert_eq!(corrector.snr(), DEFAULT_SNR);
        assert_eq!(corrector.num_inner_steps(), 1);
    }

    #[test]
    fn unknown_names_are_not_defaulted() {
        let sde_config = SdeConfig {
            name: "subvpsde".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            get_sde(&sde_config, false),
            Err(SgmError::UnknownSde(_))
        ));

        let sde = get_sde(&SdeConfig::default(), false).unwrap();
        let solver_config = SolverConfig {
            name: "heun".to_string(),
            ..Default::default()
        };
        match get_solver(&solver_config, &sde, &zero, false) {
            Err(SgmError::UnknownSolver(name)) => assert_eq!(name, "heun"),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }

        let inner_config = SolverConfig {
            inner_solver: Some("langevin".to_string()),
            ..Default::default()
        };
        match get_solver(&inner_config, &sde, &zero, false) {
            Err(SgmError::UnknownSolver(name)) => assert_eq!(name, "langevin"),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn solver_starting_at_zero_is_rejected() {
        let sde = get_sde(&SdeConfig::default(), false).unwrap();
        for strict in [false, true] {
            let config = SolverConfig {
                epsilon: Some(0.0),
                ..Default::default()
            };
            assert!(matches!(
                get_solver(&config, &sde, &zero, strict),
                Err(SgmError::Configuration { .. })
            ));
        }
    }

    #[test]
    fn solver_schedule_is_checked_for_stability() {
        // Stable on its own grid, but the solver starts where the marginal collapses.
        let sde = get_sde(&SdeConfig::default(), true).unwrap();
        let config = SolverConfig {
            epsilon: Some(1e-13),
            ..Default::default()
        };
        assert!(get_solver(&config, &sde, &zero, false).is_ok());
        assert!(matches!(
            get_solver(&config, &sde, &zero, true),
            Err(SgmError::NumericalInstability { .. })
        ));
    }

    #[test]
    fn strict_stability_is_fatal() {
        // Zero beta_min on a fine grid makes the marginal std at the first step tiny.
        let config = SdeConfig {
            beta_min: 0.0,
            beta_max: 1e-6,
            num_steps: 1000,
            ..Default::default()
        };
        assert!(get_sde(&config, false).is_ok());
        assert!(matches!(
            get_sde(&config, true),
            Err(SgmError::NumericalInstability { .. })
        ));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            Config::from_json(r#"{ "sde": { "nme": "vp" } }"#),
            Err(SgmError::Parse(_))
        ));
        assert!(matches!(
            Config::from_file("/nonexistent/sgm.json"),
            Err(SgmError::Io(_))
        ));
    }

    #[test]
    fn serializes_back_to_json() {
        let config = Config {
            strict_stability: true,
            ..Default::default()
        };
        let json = config.to_json().unwrap();
        assert_eq!(Config::from_json(&json).unwrap(), config);
    }
}
