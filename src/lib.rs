pub mod config;
pub mod error;
pub mod loss;
pub mod score;
pub mod sde;
pub mod solver;
pub mod time;

pub use crate::config::{
    get_sde, get_solver, Config, SdeConfig, SolverConfig, SolverPair, TrainingConfig,
};
pub use crate::loss::ScoreMatchingLoss;
pub use crate::score::{EmpiricalScore, NoiseModel, ScaledScore, Score};
pub use crate::sde::{
    ForwardSde, ReverseSde, Sde, SdeFamily, SdeVariant, VarianceExploding, VariancePreserving, V,
};
pub use crate::solver::{
    AnnealedLangevin, Corrector, EulerMaruyama, Missing, NoCorrector, Provided, Sampler,
    SamplerBuilder, Samples, Solver,
};
pub use crate::time::{continuous_to_discrete, TimeSchedule, TimeScheduleBuilder};
pub use error::SgmError;
pub use nalgebra::dvector;

pub mod prelude {
    pub mod sde {
        pub use crate::sde::{
            ForwardSde, ReverseSde, Sde, SdeFamily, SdeVariant, VarianceExploding,
            VariancePreserving, MIN_MARGINAL_STD, V,
        };
    }
    pub mod sampling {
        pub use crate::solver::{AnnealedLangevin, Corrector, EulerMaruyama, Sampler, Samples, Solver};
        pub use crate::time::TimeSchedule;
    }
    pub mod training {
        pub use crate::config::TrainingConfig;
        pub use crate::loss::ScoreMatchingLoss;
    }

    pub use crate::config::{get_sde, get_solver, Config};
    pub use crate::error::SgmError;
    pub use crate::score::{EmpiricalScore, NoiseModel, ScaledScore, Score};
    pub use crate::sde::{ForwardSde, Sde};
    pub use crate::solver::{Corrector, Sampler, Solver};
}
