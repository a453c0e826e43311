use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::core::{
    Bucket, BucketReturn, Buckets, ConfigError, Household, Individual, JointAccount, RunSettings,
};

/// Name that marks a record in `individuals` as the shared account.
pub const JOINT_NAME: &str = "Joint";

const DEFAULT_EXPENSES: f64 = 60_000.0;
const DEFAULT_INFLATION: f64 = 0.025;
const DEFAULT_SIMULATIONS: u32 = 1_000;
const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid household JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Deserialize)]
pub struct HouseholdFile {
    pub individuals: Vec<IndividualRecord>,
    #[serde(default = "default_expenses")]
    pub pre_retirement_expenses: f64,
    #[serde(default = "default_expenses")]
    pub post_retirement_expenses: f64,
    #[serde(default = "default_inflation")]
    pub inflation: f64,
    #[serde(default = "default_simulations")]
    pub num_simulations: u32,
    pub seed: Option<u64>,
    pub returns: Option<HashMap<String, BucketReturn>>,
}

#[derive(Debug, Deserialize)]
pub struct IndividualRecord {
    pub name: Option<String>,
    pub current_age: Option<u32>,
    pub retirement_age: Option<u32>,
    pub planning_horizon: Option<u32>,
    pub portfolio: Option<HashMap<String, f64>>,
    #[serde(default)]
    pub pre_retirement_income: f64,
    #[serde(default)]
    pub post_retirement_income: f64,
    pub annual_savings: Option<HashMap<String, f64>>,
}

fn default_expenses() -> f64 {
    DEFAULT_EXPENSES
}

fn default_inflation() -> f64 {
    DEFAULT_INFLATION
}

fn default_simulations() -> u32 {
    DEFAULT_SIMULATIONS
}

#[derive(Debug, Clone)]
pub struct LoadedHousehold {
    pub household: Household,
    pub settings: RunSettings,
}

impl IndividualRecord {
    fn is_joint(&self) -> bool {
        self.name.as_deref() == Some(JOINT_NAME)
    }

    fn buckets(
        entity: &str,
        field: &'static str,
        values: Option<&HashMap<String, f64>>,
    ) -> Result<Buckets, ConfigError> {
        let values = values.ok_or_else(|| ConfigError::MissingField {
            entity: entity.to_string(),
            field,
        })?;
        Buckets::from_named(entity, field, values)
    }

    fn into_joint(self) -> Result<JointAccount, ConfigError> {
        Ok(JointAccount {
            portfolio: Self::buckets(JOINT_NAME, "portfolio", self.portfolio.as_ref())?,
            annual_savings: Self::buckets(
                JOINT_NAME,
                "annual_savings",
                self.annual_savings.as_ref(),
            )?,
        })
    }

    fn into_individual(self, position: usize) -> Result<Individual, ConfigError> {
        let name = self
            .name
            .clone()
            .unwrap_or_else(|| format!("individual {}", position + 1));
        let required = |value: Option<u32>, field: &'static str| {
            value.ok_or_else(|| ConfigError::MissingField {
                entity: name.clone(),
                field,
            })
        };

        Ok(Individual {
            current_age: required(self.current_age, "current_age")?,
            retirement_age: required(self.retirement_age, "retirement_age")?,
            planning_horizon: required(self.planning_horizon, "planning_horizon")?,
            portfolio: Self::buckets(&name, "portfolio", self.portfolio.as_ref())?,
            pre_retirement_income: self.pre_retirement_income,
            post_retirement_income: self.post_retirement_income,
            annual_savings: Self::buckets(&name, "annual_savings", self.annual_savings.as_ref())?,
            name,
        })
    }
}

impl HouseholdFile {
    pub fn into_household(self) -> Result<LoadedHousehold, ConfigError> {
        let mut individuals = Vec::new();
        let mut joint = None;

        for (position, record) in self.individuals.into_iter().enumerate() {
            if record.is_joint() {
                if joint.is_some() {
                    return Err(ConfigError::InvalidSetting {
                        field: "individuals",
                        message: format!("contains more than one `{JOINT_NAME}` record"),
                    });
                }
                joint = Some(record.into_joint()?);
            } else {
                individuals.push(record.into_individual(position)?);
            }
        }

        if individuals.is_empty() {
            return Err(ConfigError::NoIndividuals);
        }

        let raw_returns = self.returns.ok_or_else(|| ConfigError::MissingField {
            entity: "household".to_string(),
            field: "returns",
        })?;
        let mut returns = BTreeMap::new();
        for (name, assumption) in raw_returns {
            let Some(bucket) = Bucket::from_name(&name) else {
                return Err(ConfigError::UnknownBucket {
                    entity: "household".to_string(),
                    field: "returns",
                    bucket: name,
                });
            };
            returns.insert(bucket, assumption);
        }

        Ok(LoadedHousehold {
            household: Household {
                individuals,
                joint,
                pre_retirement_expenses: self.pre_retirement_expenses,
                post_retirement_expenses: self.post_retirement_expenses,
                inflation: self.inflation,
                returns,
            },
            settings: RunSettings {
                simulations: self.num_simulations,
                seed: self.seed.unwrap_or(DEFAULT_SEED),
                trajectories: 0,
            },
        })
    }
}

pub fn parse_household(json: &str) -> Result<LoadedHousehold, LoadError> {
    let file = serde_json::from_str::<HouseholdFile>(json)?;
    Ok(file.into_household()?)
}

pub fn load_household(path: &Path) -> Result<LoadedHousehold, LoadError> {
    let json = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_household(&json)
}
