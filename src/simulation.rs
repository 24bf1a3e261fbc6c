//! Monte Carlo evaluation of a fitted return model.
//!
//! Draws `simulations × horizon` i.i.d. returns, compounds each path and reports a
//! confidence interval for the mean return plus the max-drawdown distribution.
//! Paths run in parallel via Rayon; path `i` seeds its own generator from
//! `(seed, i)`, so results do not depend on the thread count.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, StudentT};
use rayon::prelude::*;
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal as StatrsNormal};
use tracing::debug;

use crate::distribution::{DistributionFamily, FittedDistribution};
use crate::error::{EngineError, Result};
use crate::risk::{compound, max_drawdown, quantile};

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub simulations: usize,
    pub horizon: usize,
    pub seed: u64,
    /// Two-sided confidence level of the mean interval
    pub confidence: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            simulations: 10_000,
            horizon: 252,
            seed: 42,
            confidence: 0.95,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    pub level: f64,
}

impl ConfidenceInterval {
    /// `center ± z·se` with `z` the two-sided normal quantile for `level`.
    pub fn normal(center: f64, standard_error: f64, level: f64) -> Result<Self> {
        let z = StatrsNormal::new(0.0, 1.0)
            .map_err(|e| EngineError::InvalidParameter(e.to_string()))?
            .inverse_cdf(0.5 + level / 2.0);
        Ok(Self {
            lower: center - z * standard_error,
            upper: center + z * standard_error,
            level,
        })
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub simulations: usize,
    pub horizon: usize,
    pub mean_return: f64,
    pub standard_error: f64,
    pub mean_interval: ConfidenceInterval,
    /// Max drawdown of every simulated cumulative path, sorted ascending
    pub max_drawdowns: Vec<f64>,
    pub median_max_drawdown: f64,
    pub max_drawdown_95: f64,
    /// Cumulative return at the horizon, one per path
    pub terminal_returns: Vec<f64>,
}

/// Per-period return generator built from a fitted model.
#[derive(Debug, Clone)]
pub enum ReturnSampler {
    StudentT {
        location: f64,
        scale: f64,
        standard: StudentT<f64>,
    },
    Normal(Normal<f64>),
    Constant(f64),
}

impl ReturnSampler {
    pub fn from_fit(fit: &FittedDistribution) -> Result<Self> {
        let p = fit.params;
        if p.scale == 0.0 {
            return Ok(Self::Constant(p.location));
        }
        match fit.family {
            DistributionFamily::StudentT => Ok(Self::StudentT {
                location: p.location,
                scale: p.scale,
                standard: StudentT::new(p.degrees_of_freedom)
                    .map_err(|e| EngineError::InvalidParameter(e.to_string()))?,
            }),
            DistributionFamily::Normal => Normal::new(p.location, p.scale)
                .map(Self::Normal)
                .map_err(|e| EngineError::InvalidParameter(e.to_string())),
        }
    }
}

impl Distribution<f64> for ReturnSampler {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            Self::StudentT {
                location,
                scale,
                standard,
            } => location + scale * standard.sample(rng),
            Self::Normal(normal) => normal.sample(rng),
            Self::Constant(value) => *value,
        }
    }
}

struct PathOutcome {
    sum: f64,
    sum_sq: f64,
    terminal: f64,
    max_drawdown: f64,
}

fn path_seed(seed: u64, path: usize) -> u64 {
    // SplitMix64 finalizer decorrelates neighbouring path indices
    let mut z = seed ^ (path as u64).wrapping_mul(0x9e3779b97f4a7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

fn simulate_path(sampler: &ReturnSampler, horizon: usize, seed: u64) -> PathOutcome {
    let mut rng = StdRng::seed_from_u64(seed);
    let returns: Vec<f64> = sampler.sample_iter(&mut rng).take(horizon).collect();
    let cumulative = compound(&returns);
    PathOutcome {
        sum: returns.iter().sum(),
        sum_sq: returns.iter().map(|r| r * r).sum(),
        terminal: cumulative.last().copied().unwrap_or(0.0),
        max_drawdown: max_drawdown(&cumulative),
    }
}

pub fn simulate(fit: &FittedDistribution, config: &SimulationConfig) -> Result<SimulationSummary> {
    if config.simulations == 0 || config.horizon == 0 {
        return Err(EngineError::InvalidParameter(
            "simulation count and horizon must be positive".into(),
        ));
    }
    if !(config.confidence > 0.0 && config.confidence < 1.0) {
        return Err(EngineError::InvalidParameter(format!(
            "confidence must lie in (0, 1), got {}",
            config.confidence
        )));
    }
    let sampler = ReturnSampler::from_fit(fit)?;

    let outcomes: Vec<PathOutcome> = (0..config.simulations)
        .into_par_iter()
        .map(|i| simulate_path(&sampler, config.horizon, path_seed(config.seed, i)))
        .collect();

    let draws = (config.simulations * config.horizon) as f64;
    let sum: f64 = outcomes.iter().map(|o| o.sum).sum();
    let sum_sq: f64 = outcomes.iter().map(|o| o.sum_sq).sum();
    let mean_return = sum / draws;
    let variance = if draws > 1.0 {
        ((sum_sq - draws * mean_return * mean_return) / (draws - 1.0)).max(0.0)
    } else {
        0.0
    };
    let standard_error = (variance / draws).sqrt();
    let mean_interval = ConfidenceInterval::normal(mean_return, standard_error, config.confidence)?;

    let mut max_drawdowns: Vec<f64> = outcomes.iter().map(|o| o.max_drawdown).collect();
    max_drawdowns.sort_by(|a, b| a.total_cmp(b));
    let terminal_returns: Vec<f64> = outcomes.iter().map(|o| o.terminal).collect();
    let median_max_drawdown = quantile(&max_drawdowns, 0.5)?;
    let max_drawdown_95 = quantile(&max_drawdowns, 0.95)?;

    debug!(
        simulations = config.simulations,
        horizon = config.horizon,
        mean_return,
        standard_error,
        median_max_drawdown,
        "monte carlo simulation"
    );
    Ok(SimulationSummary {
        simulations: config.simulations,
        horizon: config.horizon,
        mean_return,
        standard_error,
        mean_interval,
        max_drawdowns,
        median_max_drawdown,
        max_drawdown_95,
        terminal_returns,
    })
}
