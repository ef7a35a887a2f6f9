//! Windcast: per-farm wind generation forecasting, input drift monitoring
//! and own-vs-official forecast divergence signals for GB settlement periods.

pub mod config;
pub mod domain;
pub mod drift;
pub mod error;
pub mod forecast;
pub mod ml;
pub mod repo;
pub mod simulation;
pub mod telemetry;

pub use error::PipelineError;
