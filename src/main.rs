use std::error;

use meanvar::analysis::{run_analysis, AnalysisConfig};
use meanvar::config::Settings;
use meanvar::data::{self, PriceSeries};
use meanvar::utils::{write_json, write_to_csv};
use meanvar::{init_tracing, visualization};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn error::Error>> {
    init_tracing();

    let settings = Settings::new()?;
    let historical_data = data::fetch_data(&settings).await?;
    let prices = PriceSeries::from_records(&historical_data)?;
    let output_dir = &settings.general.output_dir;
    write_to_csv(
        &prices,
        &format!("{}/prices_{}.csv", output_dir, settings.data_api.source),
    )?;

    let (in_start, in_end) = settings.analysis.in_sample_window.bounds()?;
    let (out_start, out_end) = settings.analysis.out_of_sample_window.bounds()?;
    let in_sample = prices.window(in_start, in_end);
    let out_of_sample = prices.window(out_start, out_end);
    info!(
        assets = prices.assets().len(),
        in_sample = in_sample.len(),
        out_of_sample = out_of_sample.len(),
        "aligned price windows"
    );

    let config = AnalysisConfig::from(&settings.analysis);
    let report = run_analysis(
        &in_sample,
        &out_of_sample,
        &settings.data_api.benchmark,
        &config,
    )?;

    info!(
        weights = ?report.assets.iter().zip(&report.tangency.weights).collect::<Vec<_>>(),
        expected_return = report.tangency.expected_return,
        std = report.tangency.portfolio_std,
        sharpe = report.tangency.sharpe_ratio,
        "tangency portfolio"
    );
    for window in [&report.in_sample, &report.out_of_sample] {
        let sim = &window.portfolio.simulation;
        info!(
            window = %window.label,
            var = window.portfolio.risk.var,
            cvar = window.portfolio.risk.cvar,
            benchmark_var = window.benchmark.risk.var,
            benchmark_cvar = window.benchmark.risk.cvar,
            mc_mean = sim.mean_return,
            mc_lower = sim.mean_interval.lower,
            mc_upper = sim.mean_interval.upper,
            median_max_drawdown = sim.median_max_drawdown,
            "risk summary"
        );
    }

    write_json(&report, &format!("{}/report.json", output_dir))?;

    visualization::plot_efficient_frontier(&report, &format!("{}/efficient_frontier.png", output_dir))?;
    visualization::plot_portfolio(
        &report.assets,
        &report.tangency.weights,
        &format!("{}/portfolio.png", output_dir),
    )?;
    for window in [&report.in_sample, &report.out_of_sample] {
        visualization::plot_return_distribution(
            &format!("Portfolio Returns ({})", window.label),
            &window.portfolio_returns,
            window.portfolio.risk.var,
            window.portfolio.risk.cvar,
            config.significance_level,
            &format!("{}/portfolio_distribution_{}.png", output_dir, window.label),
        )?;
        visualization::plot_drawdown_distribution(
            &format!("Simulated Max Drawdown ({})", window.label),
            &window.portfolio.simulation.max_drawdowns,
            &format!("{}/max_drawdown_{}.png", output_dir, window.label),
        )?;
    }
    Ok(())
}
