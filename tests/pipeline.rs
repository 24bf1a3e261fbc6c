//! End-to-end runs of the analysis pipeline on synthetic monthly prices.

use approx::assert_relative_eq;
use chrono::NaiveDate;
use meanvar::analysis::{run_analysis, AnalysisConfig};
use meanvar::portfolio::{log_returns, net_returns};
use meanvar::simulation::SimulationConfig;
use meanvar::{EngineError, PriceSeries};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

const PERIODS: usize = 120;

fn month(i: usize) -> NaiveDate {
    NaiveDate::from_ymd_opt(2010 + (i / 12) as i32, (i % 12) as u32 + 1, 1).unwrap()
}

/// Benchmark plus assets loaded on it with idiosyncratic noise.
fn synthetic_prices(duplicate_asset: bool) -> PriceSeries {
    let mut rng = StdRng::seed_from_u64(2024);
    let market = Normal::new(0.006, 0.04).unwrap();
    let noise = Normal::new(0.0, 0.03).unwrap();
    let betas = [0.8, 1.1, 1.4];
    let drifts = [0.002, 0.001, -0.001];

    let mut assets: Vec<String> = vec!["AAA".into(), "BBB".into(), "CCC".into()];
    if duplicate_asset {
        assets.push("DUP".into());
    }
    assets.push("MKT".into());

    let mut level = vec![100.0; assets.len()];
    if duplicate_asset {
        level[3] = 200.0;
    }
    let mut flat = Vec::with_capacity(PERIODS * assets.len());
    for t in 0..PERIODS {
        if t > 0 {
            let m: f64 = market.sample(&mut rng);
            for k in 0..3 {
                level[k] *= (drifts[k] + betas[k] * m + noise.sample(&mut rng)).exp();
            }
            if duplicate_asset {
                level[3] = level[0] * 2.0;
            }
            let last = level.len() - 1;
            level[last] *= m.exp();
        }
        flat.extend(level.iter().copied());
    }
    let prices = Array2::from_shape_vec((PERIODS, assets.len()), flat).unwrap();
    PriceSeries::new((0..PERIODS).map(month).collect(), assets, prices).unwrap()
}

fn config() -> AnalysisConfig {
    AnalysisConfig {
        risk_free_rate: 0.002,
        significance_level: 0.05,
        frontier_grid_size: 50,
        frontier_padding: 0.05,
        simulation: SimulationConfig {
            simulations: 500,
            horizon: 24,
            seed: 17,
            confidence: 0.95,
        },
        fit_max_iterations: 2_000,
    }
}

fn split(prices: &PriceSeries) -> (PriceSeries, PriceSeries) {
    (
        prices.window(month(0), month(71)),
        prices.window(month(72), month(PERIODS - 1)),
    )
}

#[test]
fn weights_from_in_sample_are_reused_out_of_sample() {
    let prices = synthetic_prices(false);
    let (in_sample, out_of_sample) = split(&prices);
    let report = run_analysis(&in_sample, &out_of_sample, "MKT", &config()).unwrap();

    assert_eq!(report.assets, vec!["AAA", "BBB", "CCC"]);
    assert!(!report.covariance_corrected);
    assert_relative_eq!(report.tangency.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-10);
    assert_eq!(report.frontier.points.len(), 50);
    assert_eq!(report.in_sample.portfolio_returns.len(), 71);
    assert_eq!(report.out_of_sample.portfolio_returns.len(), 47);

    // Out-of-sample returns are the in-sample weights applied to held-out returns
    let (held_out, _) = out_of_sample.split_off("MKT").unwrap();
    let returns = net_returns(&log_returns(&held_out));
    let weights = ndarray::Array1::from(report.tangency.weights.clone());
    let expected = weights.dot(&returns);
    for (a, b) in report.out_of_sample.portfolio_returns.iter().zip(expected.iter()) {
        assert_relative_eq!(*a, *b, epsilon = 1e-12);
    }

    for window in [&report.in_sample, &report.out_of_sample] {
        for series in [&window.portfolio, &window.benchmark] {
            assert!(series.risk.cvar >= series.risk.var);
            assert!(series.simulation.mean_interval.lower <= series.simulation.mean_interval.upper);
            assert_eq!(series.simulation.max_drawdowns.len(), 500);
        }
        assert!(window.factor.beta.is_finite());
    }

    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"tangency\""));
}

#[test]
fn colinear_assets_trigger_covariance_repair() {
    let prices = synthetic_prices(true);
    let (in_sample, out_of_sample) = split(&prices);
    let report = run_analysis(&in_sample, &out_of_sample, "MKT", &config()).unwrap();
    assert!(report.covariance_corrected);
    assert_relative_eq!(report.tangency.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-8);
}

#[test]
fn short_out_of_sample_window_reports_its_window() {
    let prices = synthetic_prices(false);
    let in_sample = prices.window(month(0), month(71));
    let out_of_sample = prices.window(month(72), month(73));
    let err = run_analysis(&in_sample, &out_of_sample, "MKT", &config()).unwrap_err();
    match err {
        EngineError::InWindow { window, .. } => assert_eq!(window, "out-of-sample"),
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn missing_benchmark_is_an_error() {
    let prices = synthetic_prices(false);
    let (in_sample, out_of_sample) = split(&prices);
    assert!(run_analysis(&in_sample, &out_of_sample, "NOPE", &config()).is_err());
}

#[test]
fn empty_window_is_rejected_before_estimation() {
    let prices = synthetic_prices(false);
    let in_sample = prices.window(month(0), month(71));
    let empty = prices.window(month(PERIODS + 12), month(PERIODS + 24));
    assert!(empty.is_empty());
    match run_analysis(&in_sample, &empty, "MKT", &config()).unwrap_err() {
        EngineError::InWindow { window, source } => {
            assert_eq!(window, "out-of-sample");
            assert!(matches!(*source, EngineError::InsufficientData { observations: 0, .. }));
        }
        other => panic!("unexpected error {other}"),
    }
}
