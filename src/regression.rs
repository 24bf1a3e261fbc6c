use crate::error::{EngineError, Result};
use serde::Serialize;

/// OLS fit of `portfolio - r_f = alpha + beta·(market - r_f) + ε`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FactorRegression {
    pub alpha: f64,
    pub beta: f64,
    pub r_squared: f64,
    pub observations: usize,
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

impl FactorRegression {
    pub fn fit(portfolio: &[f64], market: &[f64], risk_free_rate: f64) -> Result<Self> {
        if portfolio.len() != market.len() {
            return Err(EngineError::InvalidParameter(format!(
                "portfolio has {} returns, market has {}",
                portfolio.len(),
                market.len()
            )));
        }
        let n = portfolio.len();
        if n < 2 {
            return Err(EngineError::InsufficientData {
                asset: "market regression".into(),
                observations: n,
                required: 2,
            });
        }

        let y: Vec<f64> = portfolio.iter().map(|r| r - risk_free_rate).collect();
        let x: Vec<f64> = market.iter().map(|r| r - risk_free_rate).collect();
        let (mx, my) = (mean(&x), mean(&y));
        let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
        for (xi, yi) in x.iter().zip(&y) {
            let (dx, dy) = (xi - mx, yi - my);
            sxx += dx * dx;
            sxy += dx * dy;
            syy += dy * dy;
        }
        if sxx <= 0.0 {
            return Err(EngineError::InvalidParameter(
                "market excess return has zero variance".into(),
            ));
        }

        let beta = sxy / sxx;
        let alpha = my - beta * mx;
        let r_squared = if syy > 0.0 { sxy * sxy / (sxx * syy) } else { 1.0 };
        Ok(Self {
            alpha,
            beta,
            r_squared,
            observations: n,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn recovers_exact_linear_relation() {
        let market = [0.01, -0.02, 0.03, 0.00, 0.015];
        let rf = 0.001;
        let portfolio: Vec<f64> = market
            .iter()
            .map(|m| rf + 0.002 + 1.5 * (m - rf))
            .collect();
        let fit = FactorRegression::fit(&portfolio, &market, rf).unwrap();
        assert_relative_eq!(fit.beta, 1.5, epsilon = 1e-12);
        assert_relative_eq!(fit.alpha, 0.002, epsilon = 1e-12);
        assert_relative_eq!(fit.r_squared, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn noisy_fit_matches_closed_form() {
        let market = [0.02, -0.01, 0.03, -0.02];
        let portfolio = [0.03, 0.00, 0.02, -0.01];
        let fit = FactorRegression::fit(&portfolio, &market, 0.0).unwrap();
        // mean x = 0.005, mean y = 0.01; sxy = 0.0012, sxx = 0.0017
        assert_relative_eq!(fit.beta, 0.0012 / 0.0017, epsilon = 1e-12);
        assert_relative_eq!(fit.alpha, 0.01 - fit.beta * 0.005, epsilon = 1e-12);
        assert!(fit.r_squared > 0.0 && fit.r_squared < 1.0);
    }

    #[test]
    fn flat_market_is_rejected() {
        let err = FactorRegression::fit(&[0.01, 0.02], &[0.01, 0.01], 0.0).unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter(_)));
        assert!(FactorRegression::fit(&[0.01], &[0.01, 0.02], 0.0).is_err());
    }
}
