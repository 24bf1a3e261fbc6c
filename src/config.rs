use crate::error::{EngineError, Result};
use crate::utils::parse_date;
use chrono::NaiveDate;
use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub general: General,
    pub data_api: DataAPI,
    pub analysis: AnalysisSettings,
}

#[derive(Debug, Deserialize)]
pub struct General {
    pub data_source: String,
    pub data_file: String,
    pub output_dir: String,
}

#[derive(Debug, Deserialize)]
pub struct DataAPI {
    pub source: String,
    pub api_key: String,
    pub tickers: Vec<String>,
    pub benchmark: String,
    pub start_date: String,
    pub end_date: String,
    pub timeframe: String,
}

impl DataAPI {
    /// Portfolio tickers followed by the benchmark, without duplicates.
    pub fn all_tickers(&self) -> Vec<String> {
        let mut tickers = self.tickers.clone();
        if !tickers.contains(&self.benchmark) {
            tickers.push(self.benchmark.clone());
        }
        tickers
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DateWindow {
    pub start: String,
    pub end: String,
}

impl DateWindow {
    pub fn bounds(&self) -> Result<(NaiveDate, NaiveDate)> {
        Ok((parse_date(&self.start)?, parse_date(&self.end)?))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisSettings {
    /// Annual risk-free rate
    pub risk_free_rate: f64,
    pub periods_per_year: f64,
    pub significance_level: f64,
    pub frontier_grid_size: usize,
    /// Fraction of the asset mean range added on both ends of the frontier grid
    pub frontier_padding: f64,
    pub simulation_count: usize,
    pub simulation_horizon: usize,
    pub seed: u64,
    pub fit_max_iterations: u64,
    pub in_sample_window: DateWindow,
    pub out_of_sample_window: DateWindow,
}

impl AnalysisSettings {
    /// Risk-free rate per return period.
    pub fn period_risk_free_rate(&self) -> f64 {
        annual_to_period_rate(self.risk_free_rate, self.periods_per_year)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.significance_level > 0.0 && self.significance_level < 1.0) {
            return Err(EngineError::InvalidParameter(format!(
                "significance_level must lie in (0, 1), got {}",
                self.significance_level
            )));
        }
        if self.frontier_grid_size < 2 {
            return Err(EngineError::InvalidParameter(
                "frontier_grid_size must be at least 2".into(),
            ));
        }
        if self.frontier_padding < 0.0 {
            return Err(EngineError::InvalidParameter(
                "frontier_padding must be non-negative".into(),
            ));
        }
        if self.simulation_count == 0 || self.simulation_horizon == 0 {
            return Err(EngineError::InvalidParameter(
                "simulation_count and simulation_horizon must be positive".into(),
            ));
        }
        if self.periods_per_year <= 0.0 {
            return Err(EngineError::InvalidParameter(
                "periods_per_year must be positive".into(),
            ));
        }
        for (name, window) in [
            ("in_sample_window", &self.in_sample_window),
            ("out_of_sample_window", &self.out_of_sample_window),
        ] {
            let (start, end) = window.bounds()?;
            if start > end {
                return Err(EngineError::InvalidParameter(format!(
                    "{} starts after it ends",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Builder pre-loaded with the `[general]` and `[analysis]` defaults.
fn with_defaults() -> Result<ConfigBuilder<DefaultState>> {
    Ok(Config::builder()
        .set_default("general.output_dir", "output")?
        .set_default("analysis.risk_free_rate", 0.0)?
        .set_default("analysis.periods_per_year", 12.0)?
        .set_default("analysis.significance_level", 0.05)?
        .set_default("analysis.frontier_grid_size", 300)?
        .set_default("analysis.frontier_padding", 0.05)?
        .set_default("analysis.simulation_count", 10_000)?
        .set_default("analysis.simulation_horizon", 252)?
        .set_default("analysis.seed", 42)?
        .set_default("analysis.fit_max_iterations", 2_000)?
        .set_default("analysis.in_sample_window.start", "2012-01-01")?
        .set_default("analysis.in_sample_window.end", "2019-12-31")?
        .set_default("analysis.out_of_sample_window.start", "2020-01-01")?
        .set_default("analysis.out_of_sample_window.end", "2023-12-31")?)
}

impl Settings {
    pub fn new() -> Result<Self> {
        dotenv::dotenv().ok();
        let s = with_defaults()?
            .add_source(File::with_name("config"))
            // Retrieve the api key from .env
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;
        let settings: Settings = s.try_deserialize()?;
        settings.analysis.validate()?;
        Ok(settings)
    }
}

pub fn annual_to_period_rate(r_annual: f64, periods_per_year: f64) -> f64 {
    (1.0 + r_annual).powf(1.0 / periods_per_year) - 1.0
}
