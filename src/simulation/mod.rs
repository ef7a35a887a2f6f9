//! # Simulation Module
//!
//! Synthetic data for wind farms, used to exercise the pipeline without a
//! warehouse and to seed a demo data directory (`windcast simulate`).
//!
//! ## Usage
//!
//! ```rust
//! use windcast::simulation::{SyntheticFarm, SyntheticFarmConfig};
//!
//! let farm = SyntheticFarm::new(SyntheticFarmConfig {
//!     capacity_mw: 600.0,
//!     seed: 7,
//!     ..Default::default()
//! });
//! let observations = farm.generate(24 * 90);
//! assert_eq!(observations.len(), 2160);
//! ```

pub mod wind;

pub use wind::{
    gaussian_sample, power_curve, stratified_gaussian, SyntheticFarm, SyntheticFarmConfig,
};
