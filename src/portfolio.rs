use crate::data::PriceSeries;
use crate::error::{EngineError, Result};
use ndarray::{Array1, Array2, Axis};
use tracing::debug;

/// Minimum number of return periods needed for a sample covariance.
pub const MIN_RETURN_PERIODS: usize = 2;

/// Sample moments of net returns for one window.
#[derive(Debug, Clone)]
pub struct MomentEstimate {
    pub assets: Vec<String>,
    pub mean_returns: Array1<f64>,
    pub covariance: Array2<f64>,
    pub log_returns: Array2<f64>,    // shape: (n_assets, n_periods)
    pub returns_matrix: Array2<f64>, // shape: (n_assets, n_periods), net returns
}

/// Per-period log returns `ln(P_t / P_{t-1})`, shape (n_assets, n_periods).
pub fn log_returns(prices: &PriceSeries) -> Array2<f64> {
    let p = prices.prices();
    let n_dates = p.nrows();
    if n_dates < 2 {
        return Array2::zeros((p.ncols(), 0));
    }
    let ratio = &p.slice(ndarray::s![1.., ..]) / &p.slice(ndarray::s![..n_dates - 1, ..]);
    ratio.mapv(f64::ln).reversed_axes()
}

/// Net returns `e^{r_t} - 1` from log returns.
pub fn net_returns(log_returns: &Array2<f64>) -> Array2<f64> {
    log_returns.mapv(f64::exp_m1)
}

pub fn estimate_moments(prices: &PriceSeries) -> Result<MomentEstimate> {
    let assets = prices.assets().to_vec();
    if assets.is_empty() {
        return Err(EngineError::DataSource("No assets found in data.".into()));
    }
    let periods = prices.len().saturating_sub(1);
    if periods < MIN_RETURN_PERIODS {
        return Err(EngineError::InsufficientData {
            asset: assets.join(","),
            observations: prices.len(),
            required: MIN_RETURN_PERIODS + 1,
        });
    }

    let log_returns = log_returns(prices);
    let returns_matrix = net_returns(&log_returns);
    let mean_returns = returns_matrix
        .mean_axis(Axis(1))
        .ok_or_else(|| EngineError::InvalidParameter("Failed to compute mean returns".into()))?;
    let covariance = compute_sample_covariance(&returns_matrix)?;
    debug!(assets = assets.len(), periods, "estimated return moments");

    Ok(MomentEstimate {
        assets,
        mean_returns,
        covariance,
        log_returns,
        returns_matrix,
    })
}

/// Compute sample covariance from (n_assets x n_samples) returns
pub fn compute_sample_covariance(returns: &Array2<f64>) -> Result<Array2<f64>> {
    let n_obs = returns.ncols();
    if n_obs < 2 {
        return Err(EngineError::InsufficientData {
            asset: "covariance".into(),
            observations: n_obs,
            required: 2,
        });
    }

    let means = returns
        .mean_axis(Axis(1))
        .ok_or_else(|| EngineError::InvalidParameter("Could not compute means of returns matrix".into()))?;
    let centered = returns - &means.insert_axis(Axis(1));

    //  Cov = (1 / (n_obs - 1)) * (centered * centered^T)
    let factor = 1.0 / (n_obs as f64 - 1.0);
    Ok(factor * centered.dot(&centered.t()))
}

/// Per-period portfolio returns from each asset's returns_matrix and weights
pub fn compute_portfolio_returns(returns_matrix: &Array2<f64>, weights: &Array1<f64>) -> Result<Vec<f64>> {
    if returns_matrix.nrows() != weights.len() {
        return Err(EngineError::InvalidParameter(format!(
            "Weights length {} doesn't match {} assets",
            weights.len(),
            returns_matrix.nrows()
        )));
    }
    Ok(weights.dot(returns_matrix).to_vec())
}

/// Net returns of every column of `prices`, shape (n_assets, n_periods).
pub fn asset_returns(prices: &PriceSeries) -> Array2<f64> {
    net_returns(&log_returns(prices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::parse_date;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn series(prices: Array2<f64>) -> PriceSeries {
        let dates = (0..prices.nrows())
            .map(|i| parse_date("2020-01-01").unwrap() + chrono::Duration::days(31 * i as i64))
            .collect();
        let assets = (0..prices.ncols()).map(|i| format!("A{}", i)).collect();
        PriceSeries::new(dates, assets, prices).unwrap()
    }

    #[test]
    fn net_returns_match_price_ratios() {
        let s = series(array![[100.0, 50.0], [110.0, 45.0], [99.0, 54.0]]);
        let m = estimate_moments(&s).unwrap();
        assert_relative_eq!(m.returns_matrix[[0, 0]], 0.10, epsilon = 1e-12);
        assert_relative_eq!(m.returns_matrix[[0, 1]], -0.10, epsilon = 1e-12);
        assert_relative_eq!(m.returns_matrix[[1, 0]], -0.10, epsilon = 1e-12);
        assert_relative_eq!(m.returns_matrix[[1, 1]], 0.20, epsilon = 1e-12);
        assert_relative_eq!(m.log_returns[[0, 0]], 1.1f64.ln(), epsilon = 1e-12);
        assert_relative_eq!(m.mean_returns[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(m.mean_returns[1], 0.05, epsilon = 1e-12);
    }

    #[test]
    fn covariance_is_unbiased_and_symmetric() {
        let r = array![[0.1, -0.1, 0.0], [0.2, 0.0, -0.2]];
        let cov = compute_sample_covariance(&r).unwrap();
        assert_relative_eq!(cov[[0, 0]], 0.01, epsilon = 1e-12);
        assert_relative_eq!(cov[[1, 1]], 0.04, epsilon = 1e-12);
        assert_relative_eq!(cov[[0, 1]], 0.01, epsilon = 1e-12);
        assert_eq!(cov[[0, 1]], cov[[1, 0]]);
    }

    #[test]
    fn too_few_observations_fail() {
        let s = series(array![[100.0], [101.0]]);
        let err = estimate_moments(&s).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData { .. }));
    }

    #[test]
    fn portfolio_returns_weight_each_period() {
        let r = array![[0.1, -0.1], [0.2, 0.0]];
        let w = array![0.5, 0.5];
        let p = compute_portfolio_returns(&r, &w).unwrap();
        assert_relative_eq!(p[0], 0.15, epsilon = 1e-12);
        assert_relative_eq!(p[1], -0.05, epsilon = 1e-12);
        assert!(compute_portfolio_returns(&r, &array![1.0]).is_err());
    }

    #[test]
    fn single_column_returns_match_moment_matrix() {
        let s = series(array![[100.0, 50.0], [110.0, 45.0], [99.0, 54.0]]);
        let (rest, single) = s.split_off("A1").unwrap();
        let m = estimate_moments(&s).unwrap();
        assert_eq!(asset_returns(&single).row(0), m.returns_matrix.row(1));
        assert_eq!(asset_returns(&rest).row(0), m.returns_matrix.row(0));
    }
}
