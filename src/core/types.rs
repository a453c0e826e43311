use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::AddAssign;
use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};

use super::error::ConfigError;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Cash,
    Taxable,
    TaxDeferred,
    TaxFree,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [
        Bucket::Cash,
        Bucket::Taxable,
        Bucket::TaxDeferred,
        Bucket::TaxFree,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Bucket::Cash => "cash",
            Bucket::Taxable => "taxable",
            Bucket::TaxDeferred => "tax_deferred",
            Bucket::TaxFree => "tax_free",
        }
    }

    pub fn from_name(name: &str) -> Option<Bucket> {
        Bucket::ALL.into_iter().find(|b| b.name() == name)
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Priority in which expenses are drawn from the combined portfolio.
pub const WITHDRAWAL_ORDER: [Bucket; 4] = [
    Bucket::Cash,
    Bucket::Taxable,
    Bucket::TaxDeferred,
    Bucket::TaxFree,
];

/// Balances (or flows) for the four account categories.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
pub struct Buckets {
    pub cash: f64,
    pub taxable: f64,
    pub tax_deferred: f64,
    pub tax_free: f64,
}

impl Buckets {
    pub fn get(&self, bucket: Bucket) -> f64 {
        match bucket {
            Bucket::Cash => self.cash,
            Bucket::Taxable => self.taxable,
            Bucket::TaxDeferred => self.tax_deferred,
            Bucket::TaxFree => self.tax_free,
        }
    }

    pub fn get_mut(&mut self, bucket: Bucket) -> &mut f64 {
        match bucket {
            Bucket::Cash => &mut self.cash,
            Bucket::Taxable => &mut self.taxable,
            Bucket::TaxDeferred => &mut self.tax_deferred,
            Bucket::TaxFree => &mut self.tax_free,
        }
    }

    pub fn total(&self) -> f64 {
        self.cash + self.taxable + self.tax_deferred + self.tax_free
    }

    pub fn scaled(self, factor: f64) -> Buckets {
        Buckets {
            cash: self.cash * factor,
            taxable: self.taxable * factor,
            tax_deferred: self.tax_deferred * factor,
            tax_free: self.tax_free * factor,
        }
    }

    /// Builds a record from a name-keyed map. The map must carry exactly the
    /// four bucket names.
    pub fn from_named(
        entity: &str,
        field: &'static str,
        values: &HashMap<String, f64>,
    ) -> Result<Buckets, ConfigError> {
        let mut buckets = Buckets::default();
        for (name, value) in values {
            let Some(bucket) = Bucket::from_name(name) else {
                return Err(ConfigError::UnknownBucket {
                    entity: entity.to_string(),
                    field,
                    bucket: name.clone(),
                });
            };
            *buckets.get_mut(bucket) = *value;
        }

        if let Some(missing) = Bucket::ALL
            .into_iter()
            .find(|b| !values.contains_key(b.name()))
        {
            return Err(ConfigError::MissingBucket {
                entity: entity.to_string(),
                field,
                bucket: missing,
            });
        }

        Ok(buckets)
    }

    /// Draws `amount` following [`WITHDRAWAL_ORDER`], each bucket giving up
    /// `min(balance, remaining)`. Returns the unmet remainder.
    pub fn withdraw(&mut self, amount: f64) -> f64 {
        let mut remaining = amount;
        for bucket in WITHDRAWAL_ORDER {
            if remaining <= 0.0 {
                break;
            }
            let balance = self.get_mut(bucket);
            let taken = balance.min(remaining);
            *balance -= taken;
            remaining -= taken;
        }
        remaining.max(0.0)
    }

    pub(crate) fn validate_non_negative(
        &self,
        entity: &str,
        field: &'static str,
    ) -> Result<(), ConfigError> {
        for bucket in Bucket::ALL {
            let value = self.get(bucket);
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidAmount {
                    entity: entity.to_string(),
                    field,
                    bucket,
                    value,
                });
            }
        }
        Ok(())
    }
}

impl AddAssign for Buckets {
    fn add_assign(&mut self, rhs: Buckets) {
        self.cash += rhs.cash;
        self.taxable += rhs.taxable;
        self.tax_deferred += rhs.tax_deferred;
        self.tax_free += rhs.tax_free;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BucketReturn {
    pub mean: f64,
    pub volatility: f64,
}

impl BucketReturn {
    pub const FLAT: BucketReturn = BucketReturn {
        mean: 0.0,
        volatility: 0.0,
    };
}

#[derive(Debug, Clone)]
pub struct Individual {
    pub name: String,
    pub current_age: u32,
    pub retirement_age: u32,
    /// Last age modelled as alive.
    pub planning_horizon: u32,
    pub portfolio: Buckets,
    pub pre_retirement_income: f64,
    pub post_retirement_income: f64,
    pub annual_savings: Buckets,
}

impl Individual {
    /// Oldest `current_age` or `planning_horizon` a household may declare.
    pub const MAX_AGE: u32 = 150;

    pub fn age_in_year(&self, year: u32) -> AgeCell {
        match self.current_age.checked_add(year) {
            Some(age) if age <= self.planning_horizon => AgeCell::Alive(age),
            _ => AgeCell::Deceased,
        }
    }
}

/// Shared account with no age or mortality of its own.
#[derive(Debug, Clone, Default)]
pub struct JointAccount {
    pub portfolio: Buckets,
    pub annual_savings: Buckets,
}

#[derive(Debug, Clone)]
pub struct Household {
    pub individuals: Vec<Individual>,
    pub joint: Option<JointAccount>,
    pub pre_retirement_expenses: f64,
    pub post_retirement_expenses: f64,
    pub inflation: f64,
    pub returns: BTreeMap<Bucket, BucketReturn>,
}

impl Household {
    pub fn starting_portfolio(&self) -> Buckets {
        let mut combined = Buckets::default();
        for individual in &self.individuals {
            combined += individual.portfolio;
        }
        if let Some(joint) = &self.joint {
            combined += joint.portfolio;
        }
        combined
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AgeCell {
    Alive(u32),
    Deceased,
}

impl AgeCell {
    pub const DECEASED_MARKER: &'static str = "XX";

    pub fn alive(self) -> Option<u32> {
        match self {
            AgeCell::Alive(age) => Some(age),
            AgeCell::Deceased => None,
        }
    }
}

impl Serialize for AgeCell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AgeCell::Alive(age) => serializer.serialize_u32(*age),
            AgeCell::Deceased => serializer.serialize_str(Self::DECEASED_MARKER),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PathOutcome {
    /// Solvent through the final modelled year.
    Funded,
    /// Expenses could not be met in `year`.
    Depleted { year: u32 },
    /// Nobody was alive in `year`; the path stopped before it.
    AllDeceased { year: u32 },
}

#[derive(Debug, Clone)]
pub struct PathResult {
    /// Post-withdrawal balances, one per simulated year.
    pub snapshots: Vec<Buckets>,
    pub funds_last_age: u32,
    /// Full-horizon age table shared by every path of a run.
    pub age_table: Arc<[Vec<AgeCell>]>,
    pub outcome: PathOutcome,
}

impl PathResult {
    pub fn ending_balance(&self) -> f64 {
        self.snapshots.last().map_or(0.0, Buckets::total)
    }

    /// Age rows for the years this path actually simulated.
    pub fn ages(&self) -> &[Vec<AgeCell>] {
        let reached = self.snapshots.len().min(self.age_table.len());
        &self.age_table[..reached]
    }
}

#[derive(Debug, Clone)]
pub struct AggregateResult {
    pub paths: u32,
    pub success_rate_percent: Option<f64>,
    pub average_ending_balance: Option<f64>,
    pub ending_balance_std_dev: Option<f64>,
    pub average_funds_last_age: Option<f64>,
    pub average_portfolio_per_year: Vec<Option<f64>>,
    pub ages_per_year: Vec<Vec<AgeCell>>,
    /// Per-year total balance of the first retained paths.
    pub trajectories: Vec<Vec<f64>>,
}

impl AggregateResult {
    pub fn ending_balance_plus_1sd(&self) -> Option<f64> {
        Some(self.average_ending_balance? + self.ending_balance_std_dev?)
    }

    pub fn ending_balance_minus_1sd(&self) -> Option<f64> {
        Some(self.average_ending_balance? - self.ending_balance_std_dev?)
    }
}
