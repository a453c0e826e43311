use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::{AgeCell, AggregateResult, Household};

/// Label under which the whole household's results are reported.
pub const SCENARIO_LABEL: &str = "Combined";

pub type SimulationReport = BTreeMap<String, ScenarioReport>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioReport {
    pub success_rate_percent: Option<f64>,
    pub average_ending_balance: Option<f64>,
    pub ending_balance_plus_1sd: Option<f64>,
    pub ending_balance_minus_1sd: Option<f64>,
    pub average_funds_last_age: Option<f64>,
    pub average_portfolio_per_year: Vec<Option<f64>>,
    pub ages_per_year: Vec<Vec<AgeCell>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartPoint {
    pub age: u32,
    pub balance: f64,
}

/// Per-path balance lines against the first individual's age.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartData {
    pub min_age: u32,
    pub max_age: u32,
    pub trajectories: Vec<Vec<ChartPoint>>,
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl ScenarioReport {
    pub fn from_result(result: &AggregateResult) -> Self {
        Self {
            success_rate_percent: result.success_rate_percent.map(round2),
            average_ending_balance: result.average_ending_balance.map(round2),
            ending_balance_plus_1sd: result.ending_balance_plus_1sd().map(round2),
            ending_balance_minus_1sd: result.ending_balance_minus_1sd().map(round2),
            average_funds_last_age: result.average_funds_last_age.map(round2),
            average_portfolio_per_year: result
                .average_portfolio_per_year
                .iter()
                .map(|v| v.map(round2))
                .collect(),
            ages_per_year: result.ages_per_year.clone(),
        }
    }

    pub fn summary_text(&self) -> String {
        format!(
            "Success Rate: {}\n\
             Average Ending Balance: {}\n\
             Ending Balance + 1 SD: {}\n\
             Ending Balance - 1 SD: {}\n\
             Average Age Funds Last To: {}\n",
            or_na(self.success_rate_percent, |v| format!("{v:.2}%")),
            or_na(self.average_ending_balance, format_currency),
            or_na(self.ending_balance_plus_1sd, format_currency),
            or_na(self.ending_balance_minus_1sd, format_currency),
            or_na(self.average_funds_last_age, |v| format!("{v:.2}")),
        )
    }

    /// Year-by-year table of ages and average portfolio value.
    pub fn yearly_table(&self) -> String {
        let mut out = format!("{:>4} | {:<16} | {:>18}\n", "Year", "Ages", "Avg portfolio");
        out.push_str(&"-".repeat(44));
        out.push('\n');
        for (year, ages) in self.ages_per_year.iter().enumerate() {
            let ages = ages
                .iter()
                .map(|cell| match cell {
                    AgeCell::Alive(age) => age.to_string(),
                    AgeCell::Deceased => AgeCell::DECEASED_MARKER.to_string(),
                })
                .collect::<Vec<_>>()
                .join("/");
            let average = match self.average_portfolio_per_year.get(year) {
                Some(Some(v)) => format_currency(*v),
                _ => "-".to_string(),
            };
            out.push_str(&format!("{year:>4} | {ages:<16} | {average:>18}\n"));
        }
        out
    }
}

fn or_na(value: Option<f64>, render: impl Fn(f64) -> String) -> String {
    value.map_or_else(|| "n/a".to_string(), render)
}

pub fn build_report(result: &AggregateResult) -> SimulationReport {
    BTreeMap::from([(
        SCENARIO_LABEL.to_string(),
        ScenarioReport::from_result(result),
    )])
}

/// `$1,234,567.89`; negative amounts keep the sign after the `$`.
pub fn format_currency(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if value < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("${sign}{grouped}.{cents}")
}

/// Points the spaghetti chart draws for each retained path. Years in which
/// the first individual is deceased are dropped, and a line that starts after
/// the youngest household age is extended back to it at its first balance.
pub fn chart_data(household: &Household, result: &AggregateResult) -> ChartData {
    let min_age = household
        .individuals
        .iter()
        .map(|ind| ind.current_age)
        .min()
        .unwrap_or(0);
    let max_age = household
        .individuals
        .iter()
        .map(|ind| ind.planning_horizon)
        .max()
        .unwrap_or(0);

    let trajectories = result
        .trajectories
        .iter()
        .map(|balances| {
            let mut points: Vec<ChartPoint> = balances
                .iter()
                .zip(&result.ages_per_year)
                .filter_map(|(balance, ages)| {
                    let age = ages.first().and_then(|cell| cell.alive())?;
                    Some(ChartPoint {
                        age,
                        balance: round2(*balance),
                    })
                })
                .collect();
            if let Some(first) = points.first().copied()
                && first.age > min_age
            {
                points.insert(
                    0,
                    ChartPoint {
                        age: min_age,
                        balance: first.balance,
                    },
                );
            }
            points
        })
        .collect();

    ChartData {
        min_age,
        max_age,
        trajectories,
    }
}
