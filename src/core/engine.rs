use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Normal};
use tracing::debug;

use super::cashflow::{CashFlowSchedule, age_table, horizon_years, inflation_factors};
use super::error::{ConfigError, SimulationError};
use super::types::{
    AgeCell, Bucket, BucketReturn, Buckets, Household, Individual, PathOutcome, PathResult,
};

/// Everything a path needs that does not depend on randomness, validated
/// and computed once per run.
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    horizon: u32,
    start: Buckets,
    schedule: CashFlowSchedule,
    returns: Vec<(Bucket, Normal<f64>)>,
    retirement_ages: Vec<u32>,
    ages: Arc<[Vec<AgeCell>]>,
    expense_factors: Vec<f64>,
    pre_retirement_expenses: f64,
    post_retirement_expenses: f64,
}

/// Who is alive in a given year, as far as spending is concerned.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Survivors {
    youngest: u32,
    oldest: u32,
    all_pre_retirement: bool,
}

impl SimulationPlan {
    pub fn new(household: &Household) -> Result<Self, ConfigError> {
        validate_household(household)?;

        let horizon = horizon_years(household)?;
        let schedule = CashFlowSchedule::project(household, horizon);
        let start = household.starting_portfolio();

        let mut returns = Vec::with_capacity(Bucket::ALL.len());
        for bucket in Bucket::ALL {
            let assumption = match household.returns.get(&bucket) {
                Some(assumption) => *assumption,
                None if bucket_receives_money(bucket, &start, &schedule) => {
                    return Err(ConfigError::MissingReturns(bucket));
                }
                None => BucketReturn::FLAT,
            };
            returns.push((bucket, return_distribution(bucket, assumption)?));
        }

        debug!(
            target: "nestegg.engine",
            horizon,
            individuals = household.individuals.len(),
            joint = household.joint.is_some(),
            starting_total = start.total(),
            "simulation plan prepared"
        );

        Ok(Self {
            horizon,
            start,
            schedule,
            returns,
            retirement_ages: household
                .individuals
                .iter()
                .map(|ind| ind.retirement_age)
                .collect(),
            ages: age_table(household, horizon).into(),
            expense_factors: inflation_factors(household.inflation, horizon),
            pre_retirement_expenses: household.pre_retirement_expenses,
            post_retirement_expenses: household.post_retirement_expenses,
        })
    }

    pub fn horizon(&self) -> u32 {
        self.horizon
    }

    pub fn starting_portfolio(&self) -> Buckets {
        self.start
    }

    pub fn schedule(&self) -> &CashFlowSchedule {
        &self.schedule
    }

    /// Deterministic age table over the full horizon.
    pub fn ages(&self) -> &[Vec<AgeCell>] {
        &self.ages
    }

    fn survivors(&self, year: u32) -> Option<Survivors> {
        let row = &self.ages[year as usize];
        let mut survivors: Option<Survivors> = None;
        for (cell, retirement_age) in row.iter().zip(&self.retirement_ages) {
            let Some(age) = cell.alive() else {
                continue;
            };
            let pre_retirement = age < *retirement_age;
            survivors = Some(match survivors {
                None => Survivors {
                    youngest: age,
                    oldest: age,
                    all_pre_retirement: pre_retirement,
                },
                Some(s) => Survivors {
                    youngest: s.youngest.min(age),
                    oldest: s.oldest.max(age),
                    all_pre_retirement: s.all_pre_retirement && pre_retirement,
                },
            });
        }
        survivors
    }

    fn expense_target(&self, year: u32, survivors: Survivors) -> f64 {
        let base = if survivors.all_pre_retirement {
            self.pre_retirement_expenses
        } else {
            self.post_retirement_expenses
        };
        base * self.expense_factors[year as usize]
    }

    fn apply_returns<R: Rng + ?Sized>(&self, balances: &mut Buckets, rng: &mut R) {
        for (bucket, distribution) in &self.returns {
            let drawn: f64 = distribution.sample(rng);
            // A bucket can lose at most everything it holds.
            *balances.get_mut(*bucket) *= 1.0 + drawn.max(-1.0);
        }
    }

    fn apply_cash_flows(&self, year: u32, balances: &mut Buckets) {
        *balances += self.schedule.savings[year as usize];
        balances.cash += self.schedule.income[year as usize];
    }
}

fn validate_household(household: &Household) -> Result<(), ConfigError> {
    if household.individuals.is_empty() {
        return Err(ConfigError::NoIndividuals);
    }

    for ind in &household.individuals {
        for (field, age) in [
            ("current_age", ind.current_age),
            ("planning_horizon", ind.planning_horizon),
        ] {
            if age > Individual::MAX_AGE {
                return Err(ConfigError::InvalidIndividual {
                    entity: ind.name.clone(),
                    message: format!("{field} ({age}) must be <= {}", Individual::MAX_AGE),
                });
            }
        }
        if ind.planning_horizon < ind.current_age {
            return Err(ConfigError::InvalidIndividual {
                entity: ind.name.clone(),
                message: format!(
                    "planning_horizon ({}) must be >= current_age ({})",
                    ind.planning_horizon, ind.current_age
                ),
            });
        }
        for (field, income) in [
            ("pre_retirement_income", ind.pre_retirement_income),
            ("post_retirement_income", ind.post_retirement_income),
        ] {
            if !income.is_finite() || income < 0.0 {
                return Err(ConfigError::InvalidIndividual {
                    entity: ind.name.clone(),
                    message: format!("{field} must be a finite amount >= 0, got {income}"),
                });
            }
        }
        ind.portfolio.validate_non_negative(&ind.name, "portfolio")?;
        ind.annual_savings
            .validate_non_negative(&ind.name, "annual_savings")?;
    }

    if let Some(joint) = &household.joint {
        joint.portfolio.validate_non_negative("Joint", "portfolio")?;
        joint
            .annual_savings
            .validate_non_negative("Joint", "annual_savings")?;
    }

    for (field, value) in [
        ("pre_retirement_expenses", household.pre_retirement_expenses),
        ("post_retirement_expenses", household.post_retirement_expenses),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::InvalidSetting {
                field,
                message: format!("must be a finite amount >= 0, got {value}"),
            });
        }
    }

    if !household.inflation.is_finite() || household.inflation <= -1.0 {
        return Err(ConfigError::InvalidSetting {
            field: "inflation",
            message: format!("must be finite and > -1, got {}", household.inflation),
        });
    }

    Ok(())
}

fn bucket_receives_money(bucket: Bucket, start: &Buckets, schedule: &CashFlowSchedule) -> bool {
    start.get(bucket) > 0.0
        || schedule.savings.iter().any(|s| s.get(bucket) > 0.0)
        || (bucket == Bucket::Cash && schedule.income.iter().any(|i| *i > 0.0))
}

fn return_distribution(
    bucket: Bucket,
    assumption: BucketReturn,
) -> Result<Normal<f64>, ConfigError> {
    if !assumption.mean.is_finite() {
        return Err(ConfigError::InvalidReturns {
            bucket,
            message: format!("mean must be finite, got {}", assumption.mean),
        });
    }
    if !assumption.volatility.is_finite() || assumption.volatility < 0.0 {
        return Err(ConfigError::InvalidReturns {
            bucket,
            message: format!(
                "volatility must be finite and >= 0, got {}",
                assumption.volatility
            ),
        });
    }
    Normal::new(assumption.mean, assumption.volatility).map_err(|e| ConfigError::InvalidReturns {
        bucket,
        message: e.to_string(),
    })
}

/// Evolves one random realization of the combined portfolio.
///
/// Each year: returns, then savings and income, then the expense target is
/// drawn through the withdrawal order. The path stops in the first year the
/// target cannot be met, or before the first year in which nobody is alive.
pub fn simulate_path<R: Rng + ?Sized>(
    plan: &SimulationPlan,
    rng: &mut R,
) -> Result<PathResult, SimulationError> {
    let capacity = plan.horizon as usize;
    let mut balances = plan.start;
    let mut snapshots = Vec::with_capacity(capacity);
    let mut funds_last_age: Option<u32> = None;
    let mut outcome = PathOutcome::Funded;

    for year in 0..plan.horizon {
        let Some(survivors) = plan.survivors(year) else {
            if funds_last_age.is_none() {
                return Err(SimulationError::AllDeceased { year });
            }
            outcome = PathOutcome::AllDeceased { year };
            break;
        };

        plan.apply_returns(&mut balances, rng);
        plan.apply_cash_flows(year, &mut balances);

        let shortfall = balances.withdraw(plan.expense_target(year, survivors));
        snapshots.push(balances);

        if shortfall > 0.0 {
            funds_last_age = Some(survivors.youngest);
            outcome = PathOutcome::Depleted { year };
            break;
        }
        let oldest = survivors.oldest;
        funds_last_age = Some(funds_last_age.map_or(oldest, |age| age.max(oldest)));
    }

    let funds_last_age = funds_last_age.ok_or(SimulationError::AllDeceased { year: 0 })?;
    Ok(PathResult {
        snapshots,
        funds_last_age,
        age_table: Arc::clone(&plan.ages),
        outcome,
    })
}

/// Seed for path `path_index` of a run seeded with `base_seed`.
pub fn derive_seed(base_seed: u64, path_index: u64) -> u64 {
    splitmix64(base_seed ^ splitmix64(path_index))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Private generator for one path.
pub fn path_rng(base_seed: u64, path_index: u64) -> ChaCha20Rng {
    ChaCha20Rng::seed_from_u64(derive_seed(base_seed, path_index))
}
