//! Mean-variance portfolio engine: return moments, covariance repair, efficient
//! frontier, tangency portfolio, market regression, Student-t fitting, Monte Carlo
//! evaluation and historical VaR/CVaR.

pub mod analysis;
pub mod conditioning;
pub mod config;
pub mod data;
pub mod distribution;
pub mod error;
pub mod optimization;
pub mod portfolio;
pub mod regression;
pub mod risk;
pub mod simulation;
pub mod utils;
pub mod visualization;

pub use analysis::{run_analysis, AnalysisConfig, AnalysisReport};
pub use data::PriceSeries;
pub use error::{EngineError, Result};

/// Installs the fmt subscriber, honouring `RUST_LOG` and defaulting to `info`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
