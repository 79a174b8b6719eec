//! Samples the noised empirical distribution of eight points on the unit circle
//! by running the reverse SDE with the exact empirical score.

use anyhow::Result;
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sgm::prelude::*;
use sgm::V;

fn sample_circle(n: usize) -> Array2<f64> {
    Array2::from_shape_fn((n, 2), |(i, j)| {
        let angle = 2.0 * std::f64::consts::PI * i as f64 / n as f64;
        if j == 0 {
            angle.cos()
        } else {
            angle.sin()
        }
    })
}

fn radii(samples: &Array2<f64>) -> (f64, f64) {
    let r: Vec<f64> = samples
        .axis_iter(Axis(0))
        .map(|row| row.dot(&row).sqrt())
        .collect();
    let mean = r.iter().sum::<f64>() / r.len() as f64;
    let var = r.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / r.len() as f64;
    (mean, var.sqrt())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let config = Config::from_json(
        r#"{ "sde": { "name": "OU" }, "solver": { "num_steps": 1000, "inner_solver": "annealed" } }"#,
    )?;
    let sde = config.sde()?;
    let data = sample_circle(8);
    let score = EmpiricalScore::from_rows(&sde, &data)?;
    let mut rng = StdRng::seed_from_u64(2023);

    let (solver, corrector) = config.solver(&sde, &score)?;
    let sampler = Sampler::builder()
        .solver(solver)
        .maybe_corrector(corrector)
        .dim(2)
        .nsamples(5000)
        .denoise(config.solver.denoise)
        .build()?;
    let samples = sampler.sample(&mut rng)?;
    let (mean, std) = radii(&samples.samples);
    println!(
        "empirical score: radius {:.3} +/- {:.3} after {} score evaluations",
        mean, std, samples.nfe
    );

    // A bounded perturbation of the score still pushes samples towards the data.
    let perturbed = |x: &V, t: f64| score.score(x, t).add_scalar(1.0);
    let (solver, _) = get_solver(&config.solver, &sde, &perturbed, config.strict_stability)?;
    let sampler = Sampler::builder()
        .solver(solver)
        .dim(2)
        .nsamples(5000)
        .build()?;
    let samples = sampler.sample(&mut rng)?;
    let (mean, std) = radii(&samples.samples);
    println!("perturbed score: radius {:.3} +/- {:.3}", mean, std);

    let loss = config.training.loss();
    let value = loss.evaluate(&sde, &score, &data, &mut rng)?;
    println!("score-matching loss of the empirical score: {:.4}", value);

    Ok(())
}
