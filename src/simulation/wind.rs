//! # Wind Farm Simulator
//!
//! Seeded synthetic hourly series for a wind farm: an AR(1) wind speed
//! process with a diurnal swing, a drifting wind direction, gusts, and
//! generation through a cubic power curve with metering noise.

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::domain::Observation;

/// Power curve: share of capacity produced at a hub-height wind speed
pub fn power_curve(wind_speed: f64) -> f64 {
    const CUT_IN: f64 = 3.0;
    const RATED: f64 = 12.0;
    const CUT_OUT: f64 = 25.0;

    if !(CUT_IN..CUT_OUT).contains(&wind_speed) {
        0.0
    } else if wind_speed >= RATED {
        1.0
    } else {
        ((wind_speed - CUT_IN) / (RATED - CUT_IN)).powi(3)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticFarmConfig {
    pub start: DateTime<Utc>,
    /// Long-run mean wind speed (m/s)
    pub mean_wind_speed: f64,
    /// Stationary standard deviation of wind speed (m/s)
    pub wind_speed_std: f64,
    /// Hour-to-hour AR(1) coefficient
    pub persistence: f64,
    pub capacity_mw: f64,
    /// Metering noise standard deviation (MW)
    pub noise_mw: f64,
    pub seed: u64,
}

impl Default for SyntheticFarmConfig {
    fn default() -> Self {
        Self {
            start: DateTime::from_timestamp(1_672_531_200, 0).unwrap_or_default(),
            mean_wind_speed: 8.0,
            wind_speed_std: 3.0,
            persistence: 0.95,
            capacity_mw: 400.0,
            noise_mw: 4.0,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticFarm {
    config: SyntheticFarmConfig,
}

impl SyntheticFarm {
    pub fn new(config: SyntheticFarmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SyntheticFarmConfig {
        &self.config
    }

    /// `hours` consecutive hourly observations with metered generation
    pub fn generate(&self, hours: usize) -> Vec<Observation> {
        let cfg = &self.config;
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let innovation = cfg.wind_speed_std * (1.0 - cfg.persistence.powi(2)).max(0.0).sqrt();

        let mut anomaly = 0.0;
        let mut direction: f64 = 225.0;
        let mut out = Vec::with_capacity(hours);

        for h in 0..hours {
            let timestamp = cfg.start + TimeDelta::hours(h as i64);
            let z: f64 = StandardNormal.sample(&mut rng);
            anomaly = cfg.persistence * anomaly + innovation * z;

            let diurnal = 0.8 * (2.0 * std::f64::consts::PI * f64::from(timestamp.hour()) / 24.0).sin();
            let wind_speed = (cfg.mean_wind_speed + anomaly + diurnal).max(0.0);

            let turn: f64 = StandardNormal.sample(&mut rng);
            direction = (direction + 8.0 * turn).rem_euclid(360.0);

            let gust_noise: f64 = StandardNormal.sample(&mut rng);
            let wind_gusts = wind_speed * (1.3 + 0.05 * gust_noise).max(1.0);

            let meter_noise: f64 = StandardNormal.sample(&mut rng);
            let generation = (power_curve(wind_speed) * cfg.capacity_mw + cfg.noise_mw * meter_noise)
                .clamp(0.0, cfg.capacity_mw);

            out.push(
                Observation::weather(timestamp, wind_speed, direction, wind_gusts)
                    .with_generation(generation),
            );
        }
        out
    }
}

/// `n` seeded draws from Normal(mean, std)
pub fn gaussian_sample(mean: f64, std: f64, n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let z: f64 = StandardNormal.sample(&mut rng);
            mean + std * z
        })
        .collect()
}

/// `n` evenly spaced quantiles of Normal(mean, std), estimated from a large
/// seeded draw. Sample statistics track the distribution closely even for
/// small `n`.
pub fn stratified_gaussian(mean: f64, std: f64, n: usize, seed: u64) -> Vec<f64> {
    let pool = (n * 200).max(10_000);
    let mut z = gaussian_sample(0.0, 1.0, pool, seed);
    z.sort_by(f64::total_cmp);
    (0..n)
        .map(|i| {
            let idx = ((i as f64 + 0.5) / n as f64 * pool as f64) as usize;
            mean + std * z[idx.min(pool - 1)]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_curve_shape() {
        assert_eq!(power_curve(2.0), 0.0);
        assert_eq!(power_curve(3.0), 0.0);
        assert!((power_curve(7.5) - 0.125).abs() < 1e-12);
        assert_eq!(power_curve(15.0), 1.0);
        assert_eq!(power_curve(26.0), 0.0);
    }

    #[test]
    fn test_generate_is_hourly_and_bounded() {
        let farm = SyntheticFarm::new(SyntheticFarmConfig::default());
        let obs = farm.generate(500);
        assert_eq!(obs.len(), 500);
        for pair in obs.windows(2) {
            assert_eq!(pair[1].timestamp - pair[0].timestamp, TimeDelta::hours(1));
        }
        for o in &obs {
            let g = o.generation_mw.unwrap();
            assert!((0.0..=400.0).contains(&g));
            assert!(o.wind_speed >= 0.0);
            assert!((0.0..360.0).contains(&o.wind_direction));
            assert!(o.wind_gusts >= o.wind_speed);
        }
    }

    #[test]
    fn test_generate_is_seeded() {
        let a = SyntheticFarm::new(SyntheticFarmConfig::default()).generate(50);
        let b = SyntheticFarm::new(SyntheticFarmConfig::default()).generate(50);
        assert_eq!(a, b);
    }

    #[test]
    fn test_gaussian_sample_moments() {
        let xs = gaussian_sample(8.0, 2.0, 5000, 3);
        let mean = xs.iter().sum::<f64>() / xs.len() as f64;
        assert!((mean - 8.0).abs() < 0.1);
    }
}
