//! Maximum-likelihood fit of a location-scale Student-t to a return sample.
//!
//! $$
//! \ell(\mu,\sigma,\nu)=\sum_i \ln\Gamma\left(\tfrac{\nu+1}{2}\right)-\ln\Gamma\left(\tfrac{\nu}{2}\right)
//! -\tfrac12\ln(\nu\pi)-\ln\sigma-\tfrac{\nu+1}{2}\ln\left(1+\tfrac{z_i^2}{\nu}\right)
//! $$
//!
//! The sample is standardized first and the optimizer works on `(μ, ln σ, ln ν)`,
//! with `ln ν` clamped to a finite band.

use argmin::core::{CostFunction, Executor, State, TerminationReason};
use argmin::solver::neldermead::NelderMead;
use serde::Serialize;
use statrs::function::gamma::ln_gamma;
use std::f64::consts::PI;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};

pub const MIN_FIT_OBSERVATIONS: usize = 3;
const LN_DF_BOUNDS: (f64, f64) = (-2.0, 12.0);

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DistributionParams {
    pub location: f64,
    pub scale: f64,
    pub degrees_of_freedom: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DistributionFamily {
    StudentT,
    /// Fallback when the Student-t fit fails; `degrees_of_freedom` is infinite
    Normal,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FittedDistribution {
    pub family: DistributionFamily,
    pub params: DistributionParams,
    pub log_likelihood: f64,
    pub iterations: u64,
}

impl FittedDistribution {
    /// Mean of the fitted model (undefined for a t with ν ≤ 1).
    pub fn mean(&self) -> f64 {
        match self.family {
            DistributionFamily::Normal => self.params.location,
            DistributionFamily::StudentT if self.params.degrees_of_freedom > 1.0 => {
                self.params.location
            }
            DistributionFamily::StudentT => f64::NAN,
        }
    }
}

/// Log-likelihood of `sample` under a location-scale t.
pub fn student_t_log_likelihood(sample: &[f64], params: &DistributionParams) -> f64 {
    let DistributionParams {
        location,
        scale,
        degrees_of_freedom: nu,
    } = *params;
    if !(scale > 0.0 && nu > 0.0) {
        return f64::NEG_INFINITY;
    }
    let n = sample.len() as f64;
    let constant = ln_gamma((nu + 1.0) / 2.0) - ln_gamma(nu / 2.0) - 0.5 * (nu * PI).ln() - scale.ln();
    let kernel: f64 = sample
        .iter()
        .map(|x| {
            let z = (x - location) / scale;
            (1.0 + z * z / nu).ln()
        })
        .sum();
    n * constant - 0.5 * (nu + 1.0) * kernel
}

fn normal_log_likelihood(sample: &[f64], location: f64, scale: f64) -> f64 {
    let n = sample.len() as f64;
    let ss: f64 = sample.iter().map(|x| (x - location).powi(2)).sum();
    -0.5 * n * (2.0 * PI * scale * scale).ln() - ss / (2.0 * scale * scale)
}

fn sample_moments(sample: &[f64]) -> (f64, f64, f64) {
    let n = sample.len() as f64;
    let mean = sample.iter().sum::<f64>() / n;
    let m2 = sample.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let m4 = sample.iter().map(|x| (x - mean).powi(4)).sum::<f64>() / n;
    let sd = (m2 * n / (n - 1.0)).sqrt();
    let excess_kurtosis = if m2 > 0.0 { m4 / (m2 * m2) - 3.0 } else { 0.0 };
    (mean, sd, excess_kurtosis)
}

struct NegLogLikelihood {
    standardized: Vec<f64>,
}

impl NegLogLikelihood {
    fn params(theta: &[f64]) -> DistributionParams {
        DistributionParams {
            location: theta[0],
            scale: theta[1].exp(),
            degrees_of_freedom: theta[2].clamp(LN_DF_BOUNDS.0, LN_DF_BOUNDS.1).exp(),
        }
    }
}

impl CostFunction for NegLogLikelihood {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        let ll = student_t_log_likelihood(&self.standardized, &Self::params(theta));
        Ok(if ll.is_finite() { -ll } else { f64::INFINITY })
    }
}

/// Fits `(location, scale, ν)` by Nelder-Mead on the negative log-likelihood.
pub fn fit_student_t(sample: &[f64], max_iterations: u64) -> Result<FittedDistribution> {
    if sample.len() < MIN_FIT_OBSERVATIONS {
        return Err(EngineError::InsufficientData {
            asset: "distribution fit".into(),
            observations: sample.len(),
            required: MIN_FIT_OBSERVATIONS,
        });
    }
    if sample.iter().any(|x| !x.is_finite()) {
        return Err(EngineError::InvalidParameter(
            "return sample contains non-finite values".into(),
        ));
    }
    let (mean, sd, excess_kurtosis) = sample_moments(sample);
    if !(sd > 0.0) {
        return Err(EngineError::FitConvergence(
            "sample has zero dispersion".into(),
        ));
    }

    // Method-of-moments start: kurtosis 6/(ν-4) for ν > 4
    let nu0 = if excess_kurtosis > 0.0 {
        (4.0 + 6.0 / excess_kurtosis).clamp(2.5, 200.0)
    } else {
        30.0
    };
    let scale0 = ((nu0 - 2.0) / nu0).sqrt();
    let x0 = vec![0.0, scale0.ln(), nu0.ln()];
    let simplex = vec![
        x0.clone(),
        vec![x0[0] + 0.25, x0[1], x0[2]],
        vec![x0[0], x0[1] + 0.25, x0[2]],
        vec![x0[0], x0[1], x0[2] + 0.5],
    ];

    let cost = NegLogLikelihood {
        standardized: sample.iter().map(|x| (x - mean) / sd).collect(),
    };
    let solver = NelderMead::new(simplex)
        .with_sd_tolerance(1e-8)
        .map_err(|e| EngineError::FitConvergence(e.to_string()))?;
    let res = Executor::new(cost, solver)
        .configure(|state| state.max_iters(max_iterations))
        .run()
        .map_err(|e| EngineError::FitConvergence(e.to_string()))?;

    let state = res.state();
    let iterations = state.get_iter();
    if !matches!(
        state.get_termination_reason(),
        Some(TerminationReason::SolverConverged)
    ) {
        return Err(EngineError::FitConvergence(format!(
            "no convergence after {} iterations ({:?})",
            iterations,
            state.get_termination_reason()
        )));
    }
    let theta = state
        .get_best_param()
        .ok_or_else(|| EngineError::FitConvergence("optimizer returned no parameters".into()))?;

    let z = NegLogLikelihood::params(theta);
    let params = DistributionParams {
        location: mean + sd * z.location,
        scale: sd * z.scale,
        degrees_of_freedom: z.degrees_of_freedom,
    };
    if !(params.degrees_of_freedom > 0.0 && params.scale > 0.0 && params.location.is_finite()) {
        return Err(EngineError::FitConvergence(format!(
            "invalid parameters {:?}",
            params
        )));
    }
    let log_likelihood = student_t_log_likelihood(sample, &params);
    debug!(?params, log_likelihood, iterations, "student-t fit");
    Ok(FittedDistribution {
        family: DistributionFamily::StudentT,
        params,
        log_likelihood,
        iterations,
    })
}

/// Student-t fit, falling back to a moment-matched normal when the fit fails.
pub fn fit_or_normal(sample: &[f64], max_iterations: u64) -> Result<FittedDistribution> {
    match fit_student_t(sample, max_iterations) {
        Ok(fit) => Ok(fit),
        Err(EngineError::FitConvergence(reason)) => {
            let (mean, sd, _) = sample_moments(sample);
            warn!(%reason, mean, sd, "student-t fit failed, using normal approximation");
            Ok(FittedDistribution {
                family: DistributionFamily::Normal,
                params: DistributionParams {
                    location: mean,
                    scale: sd,
                    degrees_of_freedom: f64::INFINITY,
                },
                log_likelihood: if sd > 0.0 {
                    normal_log_likelihood(sample, mean, sd)
                } else {
                    f64::NAN
                },
                iterations: 0,
            })
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, StudentT};
    use statrs::distribution::{Continuous, StudentsT};

    #[test]
    fn log_likelihood_matches_statrs_density() {
        let sample = [0.01, -0.03, 0.02, 0.05, -0.01];
        let params = DistributionParams {
            location: 0.005,
            scale: 0.02,
            degrees_of_freedom: 4.0,
        };
        let reference = StudentsT::new(0.005, 0.02, 4.0).unwrap();
        let expected: f64 = sample.iter().map(|x| reference.ln_pdf(*x)).sum();
        assert_relative_eq!(
            student_t_log_likelihood(&sample, &params),
            expected,
            epsilon = 1e-9
        );
    }

    #[test]
    fn recovers_known_parameters() {
        let mut rng = StdRng::seed_from_u64(11);
        let t = StudentT::new(4.0).unwrap();
        let sample: Vec<f64> = (0..5_000).map(|_| 0.01 + 0.04 * t.sample(&mut rng)).collect();

        let fit = fit_student_t(&sample, 5_000).unwrap();
        assert_eq!(fit.family, DistributionFamily::StudentT);
        assert!((fit.params.location - 0.01).abs() < 0.003, "{:?}", fit.params);
        assert!((fit.params.scale - 0.04).abs() < 0.004, "{:?}", fit.params);
        assert!(
            fit.params.degrees_of_freedom > 3.0 && fit.params.degrees_of_freedom < 6.0,
            "{:?}",
            fit.params
        );
        // The optimum beats the starting point's moment-matched normal
        let (m, sd, _) = sample_moments(&sample);
        assert!(fit.log_likelihood > normal_log_likelihood(&sample, m, sd));
    }

    #[test]
    fn exhausted_budget_is_a_convergence_error() {
        let sample = [0.01, -0.02, 0.03, 0.015, -0.04, 0.002, 0.011];
        let err = fit_student_t(&sample, 1).unwrap_err();
        assert!(matches!(err, EngineError::FitConvergence(_)));
    }

    #[test]
    fn falls_back_to_normal() {
        let sample = [0.01, -0.02, 0.03, 0.015, -0.04, 0.002, 0.011];
        let fit = fit_or_normal(&sample, 1).unwrap();
        assert_eq!(fit.family, DistributionFamily::Normal);
        assert!(fit.params.degrees_of_freedom.is_infinite());
        let (m, sd, _) = sample_moments(&sample);
        assert_relative_eq!(fit.params.location, m, epsilon = 1e-15);
        assert_relative_eq!(fit.params.scale, sd, epsilon = 1e-15);
        assert_relative_eq!(fit.mean(), m, epsilon = 1e-15);
    }

    #[test]
    fn too_small_sample_is_not_masked() {
        assert!(matches!(
            fit_or_normal(&[0.01, 0.02], 100),
            Err(EngineError::InsufficientData { .. })
        ));
    }
}
