use ndarray::array;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sgm::*;

const CONFIG: &str = r#"{
    "sde": { "name": "vpsde", "beta_min": 0.1, "beta_max": 20.0, "num_steps": 1000 },
    "solver": { "name": "EulerMaruyama", "num_steps": 100, "epsilon": 0.001, "stack_samples": true,
                "inner_solver": "annealed", "snr": 0.16, "num_inner_steps": 1 },
    "training": { "score_scaling": true, "likelihood_weighting": true },
    "strict_stability": true
}"#;

#[test]
fn config_file_drives_the_whole_pipeline() -> anyhow::Result<()> {
    let path = std::env::temp_dir().join(format!("sgm-config-{}.json", std::process::id()));
    std::fs::write(&path, CONFIG)?;
    let config = Config::from_file(&path)?;
    std::fs::remove_file(&path)?;

    let sde = config.sde()?;
    assert_eq!(sde.family(), SdeFamily::VariancePreserving);
    let data = array![[1.0, 0.0], [-1.0, 0.0]];
    let score = EmpiricalScore::from_rows(&sde, &data)?;

    let (solver, corrector) = config.solver(&sde, &score)?;
    assert!(corrector.is_some());
    let sampler = Sampler::builder()
        .solver(solver)
        .maybe_corrector(corrector)
        .dim(2)
        .nsamples(8)
        .denoise(config.solver.denoise)
        .stack_samples(config.solver.stack_samples)
        .build()?;
    let out = sampler.sample(&mut StdRng::seed_from_u64(3))?;
    assert_eq!(out.nfe, 200);
    assert_eq!(out.trajectory.map(|t| t.dim()), Some((100, 8, 2)));

    let loss = config.training.loss().evaluate(&sde, &score, &data, &mut StdRng::seed_from_u64(4))?;
    assert!(loss.is_finite());
    Ok(())
}

#[test]
fn noise_model_is_scaled_per_training_config() {
    let config = Config::from_json(CONFIG).unwrap();
    let sde = config.sde().unwrap();
    let model = |x: &V, _t: f64| x * 0.5;
    let score = ScaledScore::new(&sde, model, config.training.score_scaling);
    let x = dvector![1.0, -1.0];
    let (_, std) = sde.marginal(0.3);
    let s = score.score(&x, 0.3);
    approx::assert_relative_eq!(s, &x * (-0.5 / std), max_relative = 1e-12);
}

#[test]
fn degenerate_solver_schedules_are_configuration_errors() {
    let sde = get_sde(&SdeConfig::default(), false).unwrap();
    let zero = |x: &V, _t: f64| V::zeros(x.len());

    for json in [
        r#"{ "num_steps": 0 }"#,
        r#"{ "num_steps": 10, "epsilon": 1.5 }"#,
        r#"{ "num_steps": 10, "dt": -0.1 }"#,
        r#"{ "num_steps": 10, "epsilon": 0.0 }"#,
        r#"{ "num_steps": 10, "inner_solver": "annealed", "snr": 0.0 }"#,
        r#"{ "num_steps": 10, "inner_solver": "annealed", "num_inner_steps": 0 }"#,
    ] {
        let solver: SolverConfig = serde_json::from_str(json).unwrap();
        assert!(
            matches!(
                get_solver(&solver, &sde, &zero, true),
                Err(SgmError::Configuration { .. })
            ),
            "{} should be rejected",
            json
        );
    }
}
