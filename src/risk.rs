use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::simulation::ConfidenceInterval;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RiskSummary {
    pub significance_level: f64,
    /// Loss magnitude at the α-quantile (positive = loss)
    pub var: f64,
    pub cvar: f64,
    pub max_drawdown: f64,
    pub mean_return: f64,
    pub mean_interval: ConfidenceInterval,
    pub observations: usize,
}

fn sorted_finite(returns: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// Inverse empirical CDF: the smallest observation `x` with `F(x) >= p`.
pub fn quantile(sample: &[f64], p: f64) -> Result<f64> {
    if !(0.0..=1.0).contains(&p) {
        return Err(EngineError::InvalidParameter(format!(
            "quantile level must lie in [0, 1], got {}",
            p
        )));
    }
    let sorted = sorted_finite(sample);
    if sorted.is_empty() {
        return Err(EngineError::InsufficientData {
            asset: "quantile".into(),
            observations: 0,
            required: 1,
        });
    }
    let idx = ((p * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len()) - 1;
    Ok(sorted[idx])
}

fn check_alpha(alpha: f64) -> Result<()> {
    if alpha > 0.0 && alpha < 1.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidParameter(format!(
            "significance level must lie in (0, 1), got {}",
            alpha
        )))
    }
}

/// Historical VaR: the negated α-quantile of the return sample.
pub fn value_at_risk(returns: &[f64], alpha: f64) -> Result<f64> {
    check_alpha(alpha)?;
    Ok(-quantile(returns, alpha)?)
}

/// Historical CVaR: mean loss over the returns at or below `-VaR`.
pub fn conditional_value_at_risk(returns: &[f64], alpha: f64) -> Result<f64> {
    check_alpha(alpha)?;
    if !returns.iter().any(|r| r.is_finite()) {
        return Err(EngineError::EmptyTail { alpha });
    }
    let var = value_at_risk(returns, alpha)?;
    let tail: Vec<f64> = returns
        .iter()
        .copied()
        .filter(|r| r.is_finite() && *r <= -var)
        .collect();
    if tail.is_empty() {
        return Err(EngineError::EmptyTail { alpha });
    }
    Ok(-tail.iter().sum::<f64>() / tail.len() as f64)
}

/// Cumulative return path `cumprod(1 + r) - 1`.
pub fn compound(returns: &[f64]) -> Vec<f64> {
    returns
        .iter()
        .scan(1.0, |wealth, r| {
            *wealth *= 1.0 + r;
            Some(*wealth - 1.0)
        })
        .collect()
}

/// Largest peak-to-trough decline of a cumulative return path,
/// `max_t (max_{s<=t} x_s - x_t)`.
pub fn max_drawdown(cumulative: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for &x in cumulative {
        peak = peak.max(x);
        worst = worst.max(peak - x);
    }
    worst
}

/// VaR, CVaR, drawdown and a normal-theory mean interval of an observed series.
pub fn risk_summary(returns: &[f64], alpha: f64) -> Result<RiskSummary> {
    let sorted = sorted_finite(returns);
    let n = sorted.len();
    if n < 2 {
        return Err(EngineError::InsufficientData {
            asset: "risk summary".into(),
            observations: n,
            required: 2,
        });
    }
    let finite: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite()).collect();
    let var = value_at_risk(&sorted, alpha)?;
    let cvar = conditional_value_at_risk(&sorted, alpha)?;

    let mean_return = sorted.iter().sum::<f64>() / n as f64;
    let variance = sorted
        .iter()
        .map(|r| (r - mean_return).powi(2))
        .sum::<f64>()
        / (n as f64 - 1.0);
    let mean_interval =
        ConfidenceInterval::normal(mean_return, (variance / n as f64).sqrt(), 1.0 - alpha)?;

    Ok(RiskSummary {
        significance_level: alpha,
        var,
        cvar,
        max_drawdown: max_drawdown(&compound(&finite)),
        mean_return,
        mean_interval,
        observations: n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SAMPLE: [f64; 5] = [0.05, -0.10, 0.03, -0.20, 0.08];

    #[test]
    fn coarse_quantile_lands_on_worst_observation() {
        let var = value_at_risk(&SAMPLE, 0.05).unwrap();
        assert_relative_eq!(var, 0.20, epsilon = 1e-15);
        let cvar = conditional_value_at_risk(&SAMPLE, 0.05).unwrap();
        assert_relative_eq!(cvar, 0.20, epsilon = 1e-15);
    }

    #[test]
    fn cvar_averages_the_tail() {
        // 40% quantile is the second worst return
        let var = value_at_risk(&SAMPLE, 0.4).unwrap();
        assert_relative_eq!(var, 0.10, epsilon = 1e-15);
        let cvar = conditional_value_at_risk(&SAMPLE, 0.4).unwrap();
        assert_relative_eq!(cvar, 0.15, epsilon = 1e-15);
        assert!(cvar >= var);
    }

    #[test]
    fn cvar_never_below_var() {
        let returns: Vec<f64> = (0..200)
            .map(|i| ((i * 37 % 101) as f64 - 50.0) / 1000.0)
            .collect();
        for alpha in [0.01, 0.05, 0.1, 0.25, 0.5] {
            let var = value_at_risk(&returns, alpha).unwrap();
            let cvar = conditional_value_at_risk(&returns, alpha).unwrap();
            assert!(cvar >= var, "alpha {}: cvar {} < var {}", alpha, cvar, var);
        }
    }

    #[test]
    fn empty_sample_has_no_tail() {
        assert!(value_at_risk(&[], 0.05).is_err());
        assert!(matches!(
            conditional_value_at_risk(&[f64::NAN], 0.05),
            Err(EngineError::EmptyTail { .. })
        ));
        assert!(value_at_risk(&SAMPLE, 0.0).is_err());
    }

    #[test]
    fn zero_returns_compound_to_zero() {
        let cumulative = compound(&[0.0; 12]);
        assert!(cumulative.iter().all(|&c| c == 0.0));
        assert_eq!(max_drawdown(&cumulative), 0.0);
    }

    #[test]
    fn drawdown_is_peak_to_trough() {
        let cumulative = compound(&[0.10, -0.50, 0.20, 0.10]);
        // 1.1, 0.55, 0.66, 0.726 -> peak 0.10, trough -0.45
        assert_relative_eq!(max_drawdown(&cumulative), 0.55, epsilon = 1e-12);
        assert_eq!(max_drawdown(&[]), 0.0);
    }

    #[test]
    fn summary_collects_all_measures() {
        let s = risk_summary(&SAMPLE, 0.05).unwrap();
        assert_eq!(s.observations, 5);
        assert_relative_eq!(s.var, 0.20, epsilon = 1e-15);
        assert!(s.cvar >= s.var);
        assert_relative_eq!(s.mean_return, -0.028, epsilon = 1e-12);
        assert!(s.mean_interval.contains(s.mean_return));
        assert!(s.max_drawdown > 0.0);
    }
}
