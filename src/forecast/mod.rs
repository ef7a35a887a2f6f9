pub mod engine;
pub mod features;
pub mod metrics;
pub mod official;
pub mod weather;

pub use engine::{ExcludedFarm, FarmAnchor, SignalConfig, SignalEngine, SignalRun};
pub use features::{FeatureBuilder, FeatureRow, FeatureTable, HourlySeries};
pub use metrics::{ForecastMetrics, ForecastMetricsError, TimeSeriesCrossValidation};
pub use official::{BmrsWindForecastClient, OfficialForecastFeed, OfficialForecastPoint};
pub use weather::{NoLiveWeather, OpenMeteoClient, ResolvedWeather, WeatherFeed, WeatherSource};
