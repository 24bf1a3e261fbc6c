//! Error types for the mean-variance engine and its I/O collaborators

use thiserror::Error;

/// Errors that can occur while estimating, optimizing or evaluating a portfolio
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Insufficient data for {asset}: {observations} aligned observations, need at least {required}")]
    InsufficientData {
        asset: String,
        observations: usize,
        required: usize,
    },

    #[error("Invalid price for {asset} on {date}: {price}")]
    InvalidPrice {
        asset: String,
        date: String,
        price: f64,
    },

    #[error("Covariance matrix could not be made positive definite: {0}")]
    SingularCovariance(String),

    #[error("No minimum-variance portfolio attains target mean {target}: {reason}")]
    OptimizationInfeasible { target: f64, reason: String },

    #[error("Degenerate market for assets {assets:?} at risk-free rate {risk_free_rate}: tangency weights do not normalise")]
    DegenerateMarket {
        risk_free_rate: f64,
        assets: Vec<String>,
    },

    #[error("Distribution fit failed to converge: {0}")]
    FitConvergence(String),

    #[error("Empty loss tail at significance level {alpha}")]
    EmptyTail { alpha: f64 },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("{window} window: {source}")]
    InWindow {
        window: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("Linear algebra failure: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Date parse error: {0}")]
    Date(#[from] chrono::ParseError),

    #[error("Data source error: {0}")]
    DataSource(String),

    #[error("Plot error: {0}")]
    Plot(String),
}

impl EngineError {
    /// Attach the analysis window label to an error.
    pub fn in_window(self, window: &str) -> Self {
        EngineError::InWindow {
            window: window.to_string(),
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_context_is_rendered() {
        let err = EngineError::EmptyTail { alpha: 0.05 }.in_window("out-of-sample");
        let msg = err.to_string();
        assert!(msg.starts_with("out-of-sample window"));
        assert!(msg.contains("0.05"));
    }
}
