use super::error::ConfigError;
use super::types::{AgeCell, Buckets, Household};

/// Number of simulated years: enough for the individual with the longest
/// remaining horizon to reach it.
pub fn horizon_years(household: &Household) -> Result<u32, ConfigError> {
    let mut longest = None;
    for ind in &household.individuals {
        let years = ind
            .planning_horizon
            .saturating_sub(ind.current_age)
            .checked_add(1)
            .ok_or_else(|| ConfigError::InvalidIndividual {
                entity: ind.name.clone(),
                message: format!("planning_horizon {} is out of range", ind.planning_horizon),
            })?;
        longest = longest.max(Some(years));
    }
    longest.ok_or(ConfigError::NoIndividuals)
}

/// `(1 + inflation)^year` for each year of the horizon.
pub fn inflation_factors(inflation: f64, horizon: u32) -> Vec<f64> {
    (0..horizon)
        .map(|year| (1.0 + inflation).powi(year as i32))
        .collect()
}

/// One row per year, one cell per individual.
pub fn age_table(household: &Household, horizon: u32) -> Vec<Vec<AgeCell>> {
    (0..horizon)
        .map(|year| {
            household
                .individuals
                .iter()
                .map(|ind| ind.age_in_year(year))
                .collect()
        })
        .collect()
}

/// Inflation-adjusted income and contributions for every year of the run.
/// Deterministic, so it is computed once and shared by every path.
#[derive(Debug, Clone, PartialEq)]
pub struct CashFlowSchedule {
    pub income: Vec<f64>,
    pub savings: Vec<Buckets>,
}

impl CashFlowSchedule {
    pub fn project(household: &Household, horizon: u32) -> Self {
        let factors = inflation_factors(household.inflation, horizon);
        let mut income = vec![0.0; horizon as usize];
        let mut savings = vec![Buckets::default(); horizon as usize];

        for individual in &household.individuals {
            for (year, factor) in factors.iter().enumerate() {
                let AgeCell::Alive(age) = individual.age_in_year(year as u32) else {
                    continue;
                };
                let base = if age < individual.retirement_age {
                    individual.pre_retirement_income
                } else {
                    individual.post_retirement_income
                };
                income[year] += base * factor;
                savings[year] += individual.annual_savings.scaled(*factor);
            }
        }

        if let Some(joint) = &household.joint {
            for (year, factor) in factors.iter().enumerate() {
                savings[year] += joint.annual_savings.scaled(*factor);
            }
        }

        Self { income, savings }
    }

    pub fn years(&self) -> usize {
        self.income.len()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::core::types::{Individual, JointAccount};

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn person(current_age: u32, retirement_age: u32, planning_horizon: u32) -> Individual {
        Individual {
            name: format!("p{current_age}"),
            current_age,
            retirement_age,
            planning_horizon,
            portfolio: Buckets::default(),
            pre_retirement_income: 0.0,
            post_retirement_income: 0.0,
            annual_savings: Buckets::default(),
        }
    }

    fn household(individuals: Vec<Individual>, inflation: f64) -> Household {
        Household {
            individuals,
            joint: None,
            pre_retirement_expenses: 0.0,
            post_retirement_expenses: 0.0,
            inflation,
            returns: BTreeMap::new(),
        }
    }

    #[test]
    fn horizon_uses_longest_remaining_span() {
        let h = household(vec![person(60, 65, 90), person(55, 60, 95)], 0.0);
        assert_eq!(horizon_years(&h), Ok(41));
    }

    #[test]
    fn horizon_span_overflow_is_a_configuration_error() {
        let h = household(vec![person(0, 65, u32::MAX)], 0.0);
        assert!(matches!(
            horizon_years(&h),
            Err(ConfigError::InvalidIndividual { .. })
        ));
    }

    #[test]
    fn projection_tolerates_ages_at_the_top_of_the_range() {
        let mut old = person(u32::MAX - 1, 65, u32::MAX);
        old.post_retirement_income = 7.0;
        let h = household(vec![old, person(60, 65, 63)], 0.0);
        let schedule = CashFlowSchedule::project(&h, 4);

        assert_approx(schedule.income[0], 7.0);
        assert_approx(schedule.income[1], 7.0);
        assert_approx(schedule.income[2], 0.0);
        assert_approx(schedule.income[3], 0.0);
    }

    #[test]
    fn horizon_requires_individuals() {
        let h = household(Vec::new(), 0.0);
        assert_eq!(horizon_years(&h), Err(ConfigError::NoIndividuals));
    }

    #[test]
    fn income_switches_at_retirement_and_inflates() {
        let mut p = person(63, 65, 70);
        p.pre_retirement_income = 100.0;
        p.post_retirement_income = 40.0;
        let h = household(vec![p], 0.10);
        let schedule = CashFlowSchedule::project(&h, 4);

        assert_approx(schedule.income[0], 100.0);
        assert_approx(schedule.income[1], 110.0);
        assert_approx(schedule.income[2], 40.0 * 1.21);
        assert_approx(schedule.income[3], 40.0 * 1.331);
    }

    #[test]
    fn flows_stop_after_planning_horizon_but_joint_savings_continue() {
        let mut older = person(89, 65, 90);
        older.post_retirement_income = 10.0;
        older.annual_savings.taxable = 5.0;
        let younger = person(80, 65, 90);
        let mut h = household(vec![older, younger], 0.0);
        h.joint = Some(JointAccount {
            portfolio: Buckets::default(),
            annual_savings: Buckets {
                tax_free: 2.0,
                ..Buckets::default()
            },
        });

        let horizon = horizon_years(&h).expect("horizon");
        let schedule = CashFlowSchedule::project(&h, horizon);

        assert_eq!(schedule.years(), 11);
        assert_approx(schedule.income[0], 10.0);
        assert_approx(schedule.income[1], 10.0);
        assert_approx(schedule.income[2], 0.0);
        assert_approx(schedule.savings[1].taxable, 5.0);
        assert_approx(schedule.savings[2].taxable, 0.0);
        for year in 0..schedule.years() {
            assert_approx(schedule.savings[year].tax_free, 2.0);
        }
    }

    #[test]
    fn age_table_marks_deceased_per_individual() {
        let h = household(vec![person(89, 65, 90), person(70, 65, 95)], 0.0);
        let table = age_table(&h, 3);
        assert_eq!(table[0], vec![AgeCell::Alive(89), AgeCell::Alive(70)]);
        assert_eq!(table[1], vec![AgeCell::Alive(90), AgeCell::Alive(71)]);
        assert_eq!(table[2], vec![AgeCell::Deceased, AgeCell::Alive(72)]);
    }
}
