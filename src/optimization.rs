use crate::error::{EngineError, Result};
use ndarray::{Array1, Array2};
use ndarray_linalg::InverseInto;
use serde::Serialize;
use tracing::{debug, warn};

/// Below this the mean constraint is colinear with the budget constraint.
const DEGENERACY_TOLERANCE: f64 = 1e-12;

#[derive(Clone, Debug, Serialize)]
pub struct FrontierPoint {
    pub target_mean: f64,
    pub variance: f64,
    pub portfolio_std: f64,
    pub weights: Vec<f64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Frontier {
    pub points: Vec<FrontierPoint>,
    /// Grid targets that no fully invested portfolio attains
    pub skipped_targets: Vec<f64>,
    pub global_minimum_variance: FrontierPoint,
}

#[derive(Clone, Debug, Serialize)]
pub struct TangencyPortfolio {
    pub weights: Vec<f64>,
    pub expected_return: f64,
    pub portfolio_std: f64,
    pub sharpe_ratio: f64,
    pub risk_free_rate: f64,
    /// False when `1ᵀΣ⁻¹(μ - r_f) < 0`: the weights then sit on the lower branch
    /// of the frontier and minimise the Sharpe ratio instead.
    pub efficient: bool,
}

/// A point on the line through the risk-free asset and the tangency portfolio.
#[derive(Clone, Debug, Serialize)]
pub struct CapitalAllocationPoint {
    pub risk_free_weight: f64,
    pub risky_weights: Vec<f64>,
    pub expected_return: f64,
    pub portfolio_std: f64,
}

/// Two-fund solution of `min wᵀΣw  s.t. 1ᵀw = 1, μᵀw = m`.
///
/// With only equality constraints the KKT system has the closed form
/// `w = Σ⁻¹(λ·1 + γ·μ)`, parameterised by the scalars
/// `a = 1ᵀΣ⁻¹1`, `b = 1ᵀΣ⁻¹μ`, `c = μᵀΣ⁻¹μ`, `d = ac - b²`.
pub struct MinVarianceSolver {
    cov: Array2<f64>,
    inv_ones: Array1<f64>,
    inv_mean: Array1<f64>,
    a: f64,
    b: f64,
    c: f64,
    d: f64,
}

impl MinVarianceSolver {
    /// `cov` must be strictly positive definite (see `conditioning`).
    pub fn new(mean: &Array1<f64>, cov: &Array2<f64>) -> Result<Self> {
        let n = mean.len();
        if n == 0 || cov.dim() != (n, n) {
            return Err(EngineError::InvalidParameter(format!(
                "mean has {} assets but covariance is {:?}",
                n,
                cov.dim()
            )));
        }
        let cov_inv: Array2<f64> = cov.clone().inv_into()?;
        let ones = Array1::<f64>::ones(n);
        let inv_ones = cov_inv.dot(&ones);
        let inv_mean = cov_inv.dot(mean);
        let a = ones.dot(&inv_ones);
        let b = ones.dot(&inv_mean);
        let c = mean.dot(&inv_mean);
        let d = a * c - b * b;
        Ok(Self {
            cov: cov.clone(),
            inv_ones,
            inv_mean,
            a,
            b,
            c,
            d,
        })
    }

    fn point(&self, target_mean: f64, weights: Array1<f64>) -> FrontierPoint {
        let variance = weights.dot(&self.cov.dot(&weights)).max(0.0);
        FrontierPoint {
            target_mean,
            variance,
            portfolio_std: variance.sqrt(),
            weights: weights.to_vec(),
        }
    }

    pub fn global_minimum_variance(&self) -> FrontierPoint {
        let weights = &self.inv_ones / self.a;
        self.point(self.b / self.a, weights)
    }

    /// Minimum-variance fully invested portfolio with mean `target`.
    pub fn solve(&self, target: f64) -> Result<FrontierPoint> {
        // Relative scale so the test does not depend on the units of the returns
        let scale = (self.a * self.c).abs().max(f64::MIN_POSITIVE);
        if self.d.abs() <= DEGENERACY_TOLERANCE * scale {
            // Every asset has the same mean, so only that mean is attainable
            let attainable = self.b / self.a;
            let tol = 1e-9 * attainable.abs().max(1e-12);
            if (target - attainable).abs() <= tol {
                return Ok(self.global_minimum_variance());
            }
            return Err(EngineError::OptimizationInfeasible {
                target,
                reason: format!("all assets share mean {}", attainable),
            });
        }
        let lambda = (self.c - self.b * target) / self.d;
        let gamma = (self.a * target - self.b) / self.d;
        let weights = &self.inv_ones * lambda + &self.inv_mean * gamma;
        Ok(self.point(target, weights))
    }
}

/// Evenly spaced target means over `[min(μ) - ε, max(μ) + ε]`, `ε = padding · range`.
pub fn target_grid(mean: &Array1<f64>, grid_size: usize, padding: f64) -> Vec<f64> {
    let lo = mean.fold(f64::INFINITY, |m, &v| m.min(v));
    let hi = mean.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
    let range = hi - lo;
    let eps = if range > 0.0 {
        padding * range
    } else {
        padding * lo.abs()
    };
    if grid_size == 1 {
        return vec![(lo + hi) / 2.0];
    }
    let step = (hi - lo + 2.0 * eps) / (grid_size as f64 - 1.0);
    (0..grid_size).map(|i| lo - eps + i as f64 * step).collect()
}

/// Efficient frontier over a grid of target means. Unattainable targets are skipped.
pub fn efficient_frontier(
    mean: &Array1<f64>,
    cov: &Array2<f64>,
    grid_size: usize,
    padding: f64,
) -> Result<Frontier> {
    let solver = MinVarianceSolver::new(mean, cov)?;
    let mut points = Vec::with_capacity(grid_size);
    let mut skipped_targets = Vec::new();
    for target in target_grid(mean, grid_size, padding) {
        match solver.solve(target) {
            Ok(point) => points.push(point),
            Err(EngineError::OptimizationInfeasible { target, reason }) => {
                debug!(target, %reason, "skipping frontier grid point");
                skipped_targets.push(target);
            }
            Err(e) => return Err(e),
        }
    }
    if !skipped_targets.is_empty() {
        warn!(
            skipped = skipped_targets.len(),
            solved = points.len(),
            "frontier grid points without a feasible portfolio"
        );
    }
    Ok(Frontier {
        points,
        skipped_targets,
        global_minimum_variance: solver.global_minimum_variance(),
    })
}

/// Maximum-Sharpe portfolio `Σ⁻¹(μ - r_f·1) / 1ᵀΣ⁻¹(μ - r_f·1)`.
pub fn tangency_portfolio(
    assets: &[String],
    mean: &Array1<f64>,
    cov: &Array2<f64>,
    risk_free_rate: f64,
) -> Result<TangencyPortfolio> {
    let n = mean.len();
    if n == 0 || cov.dim() != (n, n) {
        return Err(EngineError::InvalidParameter(format!(
            "mean has {} assets but covariance is {:?}",
            n,
            cov.dim()
        )));
    }
    let cov_inv: Array2<f64> = cov.clone().inv_into()?;
    let excess = mean - risk_free_rate;
    let raw = cov_inv.dot(&excess);
    let total = raw.sum();
    let scale = raw.iter().map(|v| v.abs()).sum::<f64>().max(f64::MIN_POSITIVE);
    if !total.is_finite() || total.abs() <= DEGENERACY_TOLERANCE * scale {
        return Err(EngineError::DegenerateMarket {
            risk_free_rate,
            assets: assets.to_vec(),
        });
    }
    let efficient = total > 0.0;
    let weights = raw / total;
    let expected_return = mean.dot(&weights);
    let portfolio_std = weights.dot(&cov.dot(&weights)).sqrt();
    let sharpe_ratio = (expected_return - risk_free_rate) / portfolio_std;
    if !efficient {
        warn!(
            risk_free_rate,
            sharpe_ratio,
            "risk-free rate lies above the global minimum variance mean, tangency portfolio is on the inefficient branch"
        );
    }
    debug!(expected_return, portfolio_std, sharpe_ratio, "tangency portfolio");
    Ok(TangencyPortfolio {
        weights: weights.to_vec(),
        expected_return,
        portfolio_std,
        sharpe_ratio,
        risk_free_rate,
        efficient,
    })
}

/// Leverage-scaled mixes of the risk-free asset and the tangency portfolio,
/// from all cash (leverage 0) to `max_leverage`.
pub fn capital_allocation_line(
    tangency: &TangencyPortfolio,
    n_points: usize,
    max_leverage: f64,
) -> Vec<CapitalAllocationPoint> {
    let step = if n_points > 1 {
        max_leverage / (n_points as f64 - 1.0)
    } else {
        0.0
    };
    let rf = tangency.risk_free_rate;
    (0..n_points)
        .map(|i| {
            let leverage = i as f64 * step;
            CapitalAllocationPoint {
                risk_free_weight: 1.0 - leverage,
                risky_weights: tangency.weights.iter().map(|w| leverage * w).collect(),
                expected_return: rf + leverage * (tangency.expected_return - rf),
                portfolio_std: leverage * tangency.portfolio_std,
            }
        })
        .collect()
}
