use thiserror::Error;

use super::types::Bucket;

/// Invalid or incomplete household description, detected before any path runs.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("household has no individuals")]
    NoIndividuals,
    #[error("{entity}: unknown bucket `{bucket}` in {field}")]
    UnknownBucket {
        entity: String,
        field: &'static str,
        bucket: String,
    },
    #[error("{entity}: {field} is missing bucket `{bucket}`")]
    MissingBucket {
        entity: String,
        field: &'static str,
        bucket: Bucket,
    },
    #[error("{entity}: {field}.{bucket} must be a finite amount >= 0, got {value}")]
    InvalidAmount {
        entity: String,
        field: &'static str,
        bucket: Bucket,
        value: f64,
    },
    #[error("{entity}: missing required field `{field}`")]
    MissingField { entity: String, field: &'static str },
    #[error("{entity}: {message}")]
    InvalidIndividual { entity: String, message: String },
    #[error("no return assumption for bucket `{0}`, which holds or receives money")]
    MissingReturns(Bucket),
    #[error("returns.{bucket}: {message}")]
    InvalidReturns { bucket: Bucket, message: String },
    #[error("{field} {message}")]
    InvalidSetting {
        field: &'static str,
        message: String,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum SimulationError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("every individual is deceased in year {year} before any funded year was recorded")]
    AllDeceased { year: u32 },
}
