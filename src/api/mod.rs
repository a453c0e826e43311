mod household;
mod report;

use axum::{
    Router,
    extract::{
        Json, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::core::{RunSettings, SimulationError, run_simulations};

pub use household::{
    HouseholdFile, IndividualRecord, JOINT_NAME, LoadError, LoadedHousehold, load_household,
    parse_household,
};
pub use report::{
    ChartData, ChartPoint, SCENARIO_LABEL, ScenarioReport, SimulationReport, build_report,
    chart_data, format_currency, round2,
};

#[derive(Parser, Debug)]
#[command(
    name = "nestegg",
    about = "Monte Carlo retirement solvency projections for a household"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Simulate a household description file and print the results.
    Run(RunArgs),
    /// Serve the simulation API over HTTP.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Household description (JSON).
    pub household: PathBuf,
    #[arg(long, help = "Number of paths; overrides num_simulations from the file")]
    pub simulations: Option<u32>,
    #[arg(long, help = "Base seed for the per-path generators")]
    pub seed: Option<u64>,
    #[arg(
        long,
        default_value_t = 0,
        help = "Number of path trajectories to include as chart data"
    )]
    pub trajectories: usize,
    #[arg(long, help = "Print the JSON report instead of the text summary")]
    pub json: bool,
}

/// Settings that may be layered over the ones in a household file.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RunOverrides {
    pub simulations: Option<u32>,
    pub seed: Option<u64>,
    pub trajectories: Option<usize>,
}

impl RunOverrides {
    pub fn apply(self, mut settings: RunSettings) -> RunSettings {
        if let Some(v) = self.simulations {
            settings.simulations = v;
        }
        if let Some(v) = self.seed {
            settings.seed = v;
        }
        if let Some(v) = self.trajectories {
            settings.trajectories = v;
        }
        settings
    }
}

impl From<&RunArgs> for RunOverrides {
    fn from(args: &RunArgs) -> Self {
        Self {
            simulations: args.simulations,
            seed: args.seed,
            trajectories: Some(args.trajectories),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Load(_) | ApiError::Simulation(_) => StatusCode::BAD_REQUEST,
            ApiError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SimulateResponse {
    #[serde(flatten)]
    pub scenarios: SimulationReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartData>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn simulate_loaded(
    loaded: &LoadedHousehold,
    overrides: RunOverrides,
) -> Result<SimulateResponse, ApiError> {
    let settings = overrides.apply(loaded.settings);
    let result = run_simulations(&loaded.household, &settings)?;
    if result.paths == 0 {
        warn!(target: "nestegg.api", "no paths requested; statistics are undefined");
    }

    Ok(SimulateResponse {
        scenarios: build_report(&result),
        chart: (settings.trajectories > 0).then(|| chart_data(&loaded.household, &result)),
    })
}

fn simulate_household_file(
    file: HouseholdFile,
    overrides: RunOverrides,
) -> Result<SimulateResponse, ApiError> {
    let loaded = file.into_household().map_err(LoadError::from)?;
    simulate_loaded(&loaded, overrides)
}

/// Runs the `run` subcommand and returns what should be printed.
pub fn run_household_file(args: &RunArgs) -> Result<String, ApiError> {
    let loaded = load_household(&args.household)?;
    let response = simulate_loaded(&loaded, RunOverrides::from(args))?;

    if args.json {
        return Ok(format!("{}\n", serde_json::to_string_pretty(&response)?));
    }

    let mut out = String::new();
    for (label, report) in &response.scenarios {
        out.push_str(&format!("=== {label} ===\n"));
        out.push_str(&report.summary_text());
        out.push('\n');
        out.push_str(&report.yearly_table());
    }
    Ok(out)
}

/// Installs the stderr log subscriber; `RUST_LOG` overrides `default_level`.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

pub fn router() -> Router {
    Router::new()
        .route("/api/simulate", post(simulate_post_handler))
        .route("/health", get(health_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(target: "nestegg.api", %addr, "simulation API listening");

    axum::serve(listener, router()).await
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, serde_json::json!({ "status": "ok" }))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_post_handler(
    overrides: Result<Query<RunOverrides>, QueryRejection>,
    file: Result<Json<HouseholdFile>, JsonRejection>,
) -> Response {
    let Query(overrides) = match overrides {
        Ok(query) => query,
        Err(rejection) => return rejected_request(&rejection.body_text()),
    };
    let Json(file) = match file {
        Ok(body) => body,
        Err(rejection) => return rejected_request(&rejection.body_text()),
    };

    let outcome =
        tokio::task::spawn_blocking(move || simulate_household_file(file, overrides)).await;

    match outcome {
        Ok(Ok(response)) => json_response(StatusCode::OK, response),
        Ok(Err(err)) => {
            warn!(target: "nestegg.api", error = %err, "simulation request rejected");
            error_response(err.status(), &err.to_string())
        }
        Err(join_err) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("simulation task failed: {join_err}"),
        ),
    }
}

fn rejected_request(msg: &str) -> Response {
    warn!(target: "nestegg.api", error = msg, "malformed simulation request");
    error_response(StatusCode::BAD_REQUEST, msg)
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}
