mod aggregate;
mod cashflow;
mod engine;
mod error;
mod types;

pub use aggregate::{RunSettings, aggregate, run_plan, run_simulations};
pub use cashflow::{CashFlowSchedule, age_table, horizon_years};
pub use engine::{SimulationPlan, derive_seed, path_rng, simulate_path};
pub use error::{ConfigError, SimulationError};
pub use types::{
    AgeCell, AggregateResult, Bucket, BucketReturn, Buckets, Household, Individual, JointAccount,
    PathOutcome, PathResult, WITHDRAWAL_ORDER,
};
