use rayon::prelude::*;
use tracing::info;

use super::engine::{SimulationPlan, path_rng, simulate_path};
use super::error::{ConfigError, SimulationError};
use super::types::{AggregateResult, Buckets, Household, PathResult};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RunSettings {
    pub simulations: u32,
    pub seed: u64,
    /// How many paths keep their full balance trajectory in the result.
    pub trajectories: usize,
}

impl RunSettings {
    /// Upper bound on paths per run; every path is held until aggregation.
    pub const MAX_SIMULATIONS: u32 = 100_000;

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.simulations > Self::MAX_SIMULATIONS {
            return Err(ConfigError::InvalidSetting {
                field: "simulations",
                message: format!(
                    "must be at most {}, got {}",
                    Self::MAX_SIMULATIONS,
                    self.simulations
                ),
            });
        }
        Ok(())
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            simulations: 1_000,
            seed: 42,
            trajectories: 0,
        }
    }
}

pub fn run_simulations(
    household: &Household,
    settings: &RunSettings,
) -> Result<AggregateResult, SimulationError> {
    let plan = SimulationPlan::new(household)?;
    run_plan(&plan, settings)
}

/// Runs every path on the rayon pool, each with its own generator, and
/// reduces only once all of them have finished.
pub fn run_plan(
    plan: &SimulationPlan,
    settings: &RunSettings,
) -> Result<AggregateResult, SimulationError> {
    settings.validate()?;
    info!(
        target: "nestegg.engine",
        simulations = settings.simulations,
        seed = settings.seed,
        horizon = plan.horizon(),
        "running simulations"
    );

    let paths = (0..settings.simulations)
        .into_par_iter()
        .map(|index| simulate_path(plan, &mut path_rng(settings.seed, u64::from(index))))
        .collect::<Result<Vec<_>, _>>()?;

    let result = aggregate(plan, &paths, settings.trajectories);
    info!(
        target: "nestegg.engine",
        paths = result.paths,
        success_rate_percent = ?result.success_rate_percent,
        average_funds_last_age = ?result.average_funds_last_age,
        "simulations complete"
    );
    Ok(result)
}

pub fn aggregate(
    plan: &SimulationPlan,
    paths: &[PathResult],
    trajectories: usize,
) -> AggregateResult {
    let ending: Vec<f64> = paths.iter().map(PathResult::ending_balance).collect();
    let funds_last: Vec<f64> = paths.iter().map(|p| f64::from(p.funds_last_age)).collect();
    let successes = ending.iter().filter(|balance| **balance > 0.0).count();

    AggregateResult {
        paths: paths.len() as u32,
        success_rate_percent: (!paths.is_empty())
            .then(|| successes as f64 / paths.len() as f64 * 100.0),
        average_ending_balance: mean(&ending),
        ending_balance_std_dev: std_dev(&ending),
        average_funds_last_age: mean(&funds_last),
        average_portfolio_per_year: average_per_year(paths),
        ages_per_year: plan.ages().to_vec(),
        trajectories: paths
            .iter()
            .take(trajectories)
            .map(|p| p.snapshots.iter().map(Buckets::total).collect())
            .collect(),
    }
}

/// Mean total balance per year over the paths still running that year.
fn average_per_year(paths: &[PathResult]) -> Vec<Option<f64>> {
    let longest = paths.iter().map(|p| p.snapshots.len()).max().unwrap_or(0);
    (0..longest)
        .map(|year| {
            let (sum, count) = paths
                .iter()
                .filter_map(|p| p.snapshots.get(year))
                .fold((0.0, 0_usize), |(sum, count), b| (sum + b.total(), count + 1));
            (count > 0).then(|| sum / count as f64)
        })
        .collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> Option<f64> {
    let mean = mean(values)?;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::tests::{spend_down_household, uniform_returns};
    use crate::core::types::{AgeCell, PathOutcome};
    use proptest::prelude::{any, prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn synthetic_path(totals: &[f64], funds_last_age: u32) -> PathResult {
        PathResult {
            snapshots: totals
                .iter()
                .map(|t| Buckets {
                    cash: *t,
                    ..Buckets::default()
                })
                .collect(),
            funds_last_age,
            age_table: Vec::new().into(),
            outcome: PathOutcome::Funded,
        }
    }

    fn settings(simulations: u32, seed: u64) -> RunSettings {
        RunSettings {
            simulations,
            seed,
            trajectories: 0,
        }
    }

    #[test]
    fn spend_down_scenario_reports_age_62_and_zero_success() {
        for simulations in [1, 25, 200] {
            let result = run_simulations(&spend_down_household(), &settings(simulations, 42))
                .expect("run");
            assert_eq!(result.paths, simulations);
            assert_eq!(result.average_funds_last_age, Some(62.0));
            assert_eq!(result.success_rate_percent, Some(0.0));
            assert_eq!(result.average_ending_balance, Some(0.0));
            assert_eq!(
                result.average_portfolio_per_year,
                vec![Some(50_000.0), Some(0.0), Some(0.0)]
            );
        }
    }

    #[test]
    fn per_year_average_only_counts_paths_reaching_that_year() {
        let plan = SimulationPlan::new(&spend_down_household()).expect("plan");
        let paths = vec![
            synthetic_path(&[100.0, 80.0, 60.0], 62),
            synthetic_path(&[100.0, 80.0, 60.0], 62),
            synthetic_path(&[10.0], 60),
            synthetic_path(&[10.0], 60),
        ];

        let result = aggregate(&plan, &paths, 0);

        assert_eq!(result.average_portfolio_per_year.len(), 3);
        assert_eq!(result.average_portfolio_per_year[0], Some(55.0));
        assert_eq!(result.average_portfolio_per_year[1], Some(80.0));
        assert_eq!(result.average_portfolio_per_year[2], Some(60.0));
        assert_eq!(result.success_rate_percent, Some(100.0));
        assert_eq!(result.average_funds_last_age, Some(61.0));
    }

    #[test]
    fn ending_balance_mean_and_population_std_dev() {
        let plan = SimulationPlan::new(&spend_down_household()).expect("plan");
        let paths = vec![synthetic_path(&[50.0, 0.0], 61), synthetic_path(&[5.0, 10.0], 62)];

        let result = aggregate(&plan, &paths, 1);

        assert_eq!(result.success_rate_percent, Some(50.0));
        assert_approx(result.average_ending_balance.expect("mean"), 5.0);
        assert_approx(result.ending_balance_std_dev.expect("std"), 5.0);
        assert_approx(result.ending_balance_plus_1sd().expect("+1sd"), 10.0);
        assert_approx(result.ending_balance_minus_1sd().expect("-1sd"), 0.0);
        assert_eq!(result.trajectories, vec![vec![50.0, 0.0]]);
    }

    #[test]
    fn zero_simulations_report_missing_statistics_instead_of_dividing_by_zero() {
        let result = run_simulations(&spend_down_household(), &settings(0, 1)).expect("run");

        assert_eq!(result.paths, 0);
        assert_eq!(result.success_rate_percent, None);
        assert_eq!(result.average_ending_balance, None);
        assert_eq!(result.ending_balance_std_dev, None);
        assert_eq!(result.ending_balance_plus_1sd(), None);
        assert_eq!(result.average_funds_last_age, None);
        assert!(result.average_portfolio_per_year.is_empty());
        assert_eq!(result.ages_per_year.len(), 7);
    }

    #[test]
    fn reported_age_table_covers_full_horizon_even_when_paths_deplete() {
        let result = run_simulations(&spend_down_household(), &settings(10, 3)).expect("run");
        let expected: Vec<Vec<AgeCell>> = (60..=66).map(|age| vec![AgeCell::Alive(age)]).collect();
        assert_eq!(result.ages_per_year, expected);
    }

    #[test]
    fn configuration_errors_surface_before_any_path_runs() {
        let mut household = spend_down_household();
        household.individuals.clear();
        let err = run_simulations(&household, &settings(10, 1)).expect_err("no individuals");
        assert!(matches!(err, SimulationError::Configuration(_)));
    }

    #[test]
    fn oversized_runs_are_rejected_before_any_path_runs() {
        let err = run_simulations(
            &spend_down_household(),
            &settings(RunSettings::MAX_SIMULATIONS + 1, 1),
        )
        .expect_err("too many paths");
        assert!(matches!(
            err,
            SimulationError::Configuration(ConfigError::InvalidSetting {
                field: "simulations",
                ..
            })
        ));
    }

    #[test]
    fn parallel_runs_are_reproducible_for_a_seed() {
        let mut household = spend_down_household();
        household.individuals[0].planning_horizon = 95;
        household.individuals[0].portfolio.taxable = 900_000.0;
        household.returns = uniform_returns(0.05, 0.18);

        let run = RunSettings {
            simulations: 300,
            seed: 11,
            trajectories: 5,
        };
        let a = run_simulations(&household, &run).expect("run");
        let b = run_simulations(&household, &run).expect("run");

        assert_eq!(a.success_rate_percent, b.success_rate_percent);
        assert_eq!(a.average_ending_balance, b.average_ending_balance);
        assert_eq!(a.average_portfolio_per_year, b.average_portfolio_per_year);
        assert_eq!(a.trajectories, b.trajectories);
        assert_eq!(a.trajectories.len(), 5);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(16))]

        #[test]
        fn prop_larger_starting_balance_does_not_reduce_success_rate(
            seed in any::<u64>(),
            current_age in 55u32..70,
            horizon_extra in 5u32..30,
            simulations in 20u32..80,
            taxable in 0u32..800_000,
            extra in 1u32..500_000,
            expenses in 10_000u32..80_000,
            mean_bp in -200i32..1000,
            vol_bp in 500u32..2500
        ) {
            let mut low = spend_down_household();
            let ind = &mut low.individuals[0];
            ind.current_age = current_age;
            ind.retirement_age = current_age;
            ind.planning_horizon = current_age + horizon_extra;
            ind.portfolio.cash = 0.0;
            ind.portfolio.taxable = taxable as f64;
            low.pre_retirement_expenses = expenses as f64;
            low.post_retirement_expenses = expenses as f64;
            low.inflation = 0.025;
            low.returns = uniform_returns(mean_bp as f64 / 10_000.0, vol_bp as f64 / 10_000.0);

            let mut high = low.clone();
            high.individuals[0].portfolio.taxable += extra as f64;

            let run = settings(simulations, seed);
            let low_result = run_simulations(&low, &run).expect("run");
            let high_result = run_simulations(&high, &run).expect("run");

            let low_rate = low_result.success_rate_percent.expect("paths ran");
            let high_rate = high_result.success_rate_percent.expect("paths ran");
            prop_assert!(high_rate + 1e-9 >= low_rate);
            prop_assert!(
                high_result.average_funds_last_age.expect("paths ran") + 1e-9
                    >= low_result.average_funds_last_age.expect("paths ran")
            );
        }
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(16))]

        #[test]
        fn prop_per_year_series_matches_longest_path(
            seed in any::<u64>(),
            simulations in 1u32..60,
            taxable in 0u32..400_000,
            vol_bp in 0u32..4000
        ) {
            let mut household = spend_down_household();
            household.individuals[0].planning_horizon = 85;
            household.individuals[0].portfolio.taxable = taxable as f64;
            household.returns = uniform_returns(0.03, vol_bp as f64 / 10_000.0);
            let plan = SimulationPlan::new(&household).expect("plan");

            let paths: Vec<PathResult> = (0..u64::from(simulations))
                .map(|i| simulate_path(&plan, &mut path_rng(seed, i)).expect("path"))
                .collect();
            let result = aggregate(&plan, &paths, 0);

            let longest = paths.iter().map(|p| p.snapshots.len()).max().unwrap_or(0);
            prop_assert_eq!(result.average_portfolio_per_year.len(), longest);
            for (year, average) in result.average_portfolio_per_year.iter().enumerate() {
                let reaching: Vec<f64> = paths
                    .iter()
                    .filter_map(|p| p.snapshots.get(year).map(Buckets::total))
                    .collect();
                let expected = reaching.iter().sum::<f64>() / reaching.len() as f64;
                let average = average.expect("at least one path reaches every listed year");
                prop_assert!((average - expected).abs() <= 1e-6 * expected.abs().max(1.0));
            }
        }
    }
}
