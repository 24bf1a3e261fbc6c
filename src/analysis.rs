//! End-to-end run: weights are estimated once on the in-sample window and applied,
//! unchanged, to the out-of-sample window.

use serde::Serialize;
use tracing::{debug, info};

use crate::conditioning::condition_covariance;
use crate::config::AnalysisSettings;
use crate::data::PriceSeries;
use crate::distribution::{fit_or_normal, FittedDistribution};
use crate::error::{EngineError, Result};
use crate::optimization::{
    capital_allocation_line, efficient_frontier, tangency_portfolio, CapitalAllocationPoint,
    Frontier, TangencyPortfolio,
};
use crate::portfolio::{asset_returns, compute_portfolio_returns, estimate_moments, MIN_RETURN_PERIODS};
use crate::regression::FactorRegression;
use crate::risk::{risk_summary, RiskSummary};
use crate::simulation::{simulate, SimulationConfig, SimulationSummary};
use ndarray::Array1;

pub const IN_SAMPLE: &str = "in-sample";
pub const OUT_OF_SAMPLE: &str = "out-of-sample";

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Risk-free rate per return period
    pub risk_free_rate: f64,
    pub significance_level: f64,
    pub frontier_grid_size: usize,
    pub frontier_padding: f64,
    pub simulation: SimulationConfig,
    pub fit_max_iterations: u64,
}

impl From<&AnalysisSettings> for AnalysisConfig {
    fn from(settings: &AnalysisSettings) -> Self {
        Self {
            risk_free_rate: settings.period_risk_free_rate(),
            significance_level: settings.significance_level,
            frontier_grid_size: settings.frontier_grid_size,
            frontier_padding: settings.frontier_padding,
            simulation: SimulationConfig {
                simulations: settings.simulation_count,
                horizon: settings.simulation_horizon,
                seed: settings.seed,
                confidence: 0.95,
            },
            fit_max_iterations: settings.fit_max_iterations,
        }
    }
}

/// Fitted model, simulation and historical risk of one return series.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesEvaluation {
    pub distribution: FittedDistribution,
    pub simulation: SimulationSummary,
    pub risk: RiskSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowEvaluation {
    pub label: String,
    pub start: Option<String>,
    pub end: Option<String>,
    pub portfolio_returns: Vec<f64>,
    pub benchmark_returns: Vec<f64>,
    pub portfolio: SeriesEvaluation,
    pub benchmark: SeriesEvaluation,
    pub factor: FactorRegression,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub assets: Vec<String>,
    pub benchmark: String,
    pub mean_returns: Vec<f64>,
    pub covariance: Vec<Vec<f64>>,
    pub covariance_corrected: bool,
    pub frontier: Frontier,
    pub tangency: TangencyPortfolio,
    pub capital_allocation_line: Vec<CapitalAllocationPoint>,
    pub in_sample: WindowEvaluation,
    pub out_of_sample: WindowEvaluation,
}

fn evaluate_series(
    returns: &[f64],
    config: &AnalysisConfig,
    seed_offset: u64,
) -> Result<SeriesEvaluation> {
    let distribution = fit_or_normal(returns, config.fit_max_iterations)?;
    let simulation_config = SimulationConfig {
        seed: config.simulation.seed.wrapping_add(seed_offset),
        ..config.simulation.clone()
    };
    let simulation = simulate(&distribution, &simulation_config)?;
    let risk = risk_summary(returns, config.significance_level)?;
    debug!(
        family = ?distribution.family,
        fitted_mean = distribution.mean(),
        simulated_mean = simulation.mean_return,
        observed_mean = risk.mean_return,
        "series evaluated"
    );
    Ok(SeriesEvaluation {
        distribution,
        simulation,
        risk,
    })
}

fn evaluate_window(
    label: &str,
    assets: &PriceSeries,
    benchmark: &PriceSeries,
    weights: &Array1<f64>,
    config: &AnalysisConfig,
    seed_offset: u64,
) -> Result<WindowEvaluation> {
    let portfolio_returns = compute_portfolio_returns(&asset_returns(assets), weights)?;
    let benchmark_returns = asset_returns(benchmark).row(0).to_vec();

    let factor = FactorRegression::fit(&portfolio_returns, &benchmark_returns, config.risk_free_rate)?;
    let portfolio = evaluate_series(&portfolio_returns, config, seed_offset)?;
    let benchmark_eval = evaluate_series(&benchmark_returns, config, seed_offset + 1)?;
    info!(
        window = label,
        alpha = factor.alpha,
        beta = factor.beta,
        var = portfolio.risk.var,
        cvar = portfolio.risk.cvar,
        benchmark_var = benchmark_eval.risk.var,
        "window evaluated"
    );

    Ok(WindowEvaluation {
        label: label.to_string(),
        start: assets.dates().first().map(|d| d.to_string()),
        end: assets.dates().last().map(|d| d.to_string()),
        portfolio_returns,
        benchmark_returns,
        portfolio,
        benchmark: benchmark_eval,
        factor,
    })
}

/// Runs the full pipeline. Both price tables must contain the benchmark column.
pub fn run_analysis(
    in_sample: &PriceSeries,
    out_of_sample: &PriceSeries,
    benchmark: &str,
    config: &AnalysisConfig,
) -> Result<AnalysisReport> {
    for (label, window) in [(IN_SAMPLE, in_sample), (OUT_OF_SAMPLE, out_of_sample)] {
        if window.is_empty() {
            return Err(EngineError::InsufficientData {
                asset: window.assets().join(","),
                observations: 0,
                required: MIN_RETURN_PERIODS + 1,
            }
            .in_window(label));
        }
    }

    let (in_assets, in_bench) = in_sample
        .split_off(benchmark)
        .map_err(|e| e.in_window(IN_SAMPLE))?;
    let (out_assets, out_bench) = out_of_sample
        .split_off(benchmark)
        .map_err(|e| e.in_window(OUT_OF_SAMPLE))?;
    if in_assets.assets() != out_assets.assets() {
        return Err(EngineError::InvalidParameter(format!(
            "asset sets differ between windows: {:?} vs {:?}",
            in_assets.assets(),
            out_assets.assets()
        )));
    }

    let moments = estimate_moments(&in_assets).map_err(|e| e.in_window(IN_SAMPLE))?;
    let conditioned = condition_covariance(&moments.covariance).map_err(|e| e.in_window(IN_SAMPLE))?;
    let frontier = efficient_frontier(
        &moments.mean_returns,
        &conditioned.matrix,
        config.frontier_grid_size,
        config.frontier_padding,
    )
    .map_err(|e| e.in_window(IN_SAMPLE))?;
    let tangency = tangency_portfolio(
        &moments.assets,
        &moments.mean_returns,
        &conditioned.matrix,
        config.risk_free_rate,
    )
    .map_err(|e| e.in_window(IN_SAMPLE))?;
    info!(
        assets = moments.assets.len(),
        frontier_points = frontier.points.len(),
        expected_return = tangency.expected_return,
        std = tangency.portfolio_std,
        sharpe = tangency.sharpe_ratio,
        "tangency portfolio"
    );

    let weights = Array1::from(tangency.weights.clone());
    let in_eval = evaluate_window(IN_SAMPLE, &in_assets, &in_bench, &weights, config, 0)
        .map_err(|e| e.in_window(IN_SAMPLE))?;
    let out_eval = evaluate_window(OUT_OF_SAMPLE, &out_assets, &out_bench, &weights, config, 2)
        .map_err(|e| e.in_window(OUT_OF_SAMPLE))?;

    Ok(AnalysisReport {
        assets: moments.assets.clone(),
        benchmark: benchmark.to_string(),
        mean_returns: moments.mean_returns.to_vec(),
        covariance: conditioned.matrix.outer_iter().map(|row| row.to_vec()).collect(),
        covariance_corrected: conditioned.corrected,
        capital_allocation_line: capital_allocation_line(&tangency, 50, 2.0),
        frontier,
        tangency,
        in_sample: in_eval,
        out_of_sample: out_eval,
    })
}
