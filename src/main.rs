//! Windcast CLI binary.

use anyhow::{Context, Result};
use chrono::{DurationRound, TimeDelta, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use windcast::config::{Config, ObservationBackend};
use windcast::domain::WindFarm;
use windcast::drift::DriftMonitor;
use windcast::forecast::{
    BmrsWindForecastClient, FeatureBuilder, NoLiveWeather, OpenMeteoClient, SignalEngine, WeatherFeed,
};
use windcast::ml::{plan, HorizonTrainer, TrainingOrchestrator, TrainingWindow};
use windcast::repo::{
    FileModelStore, FileObservationStore, JsonLinesSink, LogAlertChannel, ModelStore, ObservationStore,
    ResultSink,
};
use windcast::simulation::{SyntheticFarm, SyntheticFarmConfig};
use windcast::telemetry::{init_tracing, shutdown_signal};

#[derive(Parser)]
#[command(name = "windcast")]
#[command(about = "Wind generation forecasting, drift monitoring and trading signals", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train one model per (farm, horizon)
    Train {
        /// Farms to train (defaults to every farm in the store)
        #[arg(short, long, value_delimiter = ',')]
        farm: Vec<String>,

        /// Horizons in hours (defaults to the configured list)
        #[arg(short = 'H', long, value_delimiter = ',')]
        horizons: Vec<u32>,
    },

    /// Check weather input drift against the training baseline
    Drift {
        /// Farms to check (defaults to every farm in the store)
        #[arg(short, long, value_delimiter = ',')]
        farm: Vec<String>,
    },

    /// Compare own forecast with the official one and emit signals
    Signal,

    /// Write a synthetic data set for the file observation store
    Simulate {
        /// Output directory
        #[arg(short, long)]
        out: PathBuf,

        /// Hours of history per farm
        #[arg(long, default_value = "9000")]
        hours: usize,

        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Train { farm, horizons } => train(&cfg, farm, horizons).await,
        Commands::Drift { farm } => drift(&cfg, farm).await,
        Commands::Signal => signal(&cfg).await,
        Commands::Simulate { out, hours, seed } => simulate(out, hours, seed).await,
    }
}

async fn observation_store(cfg: &Config) -> Result<Arc<dyn ObservationStore>> {
    match cfg.store.backend {
        ObservationBackend::File => Ok(Arc::new(FileObservationStore::new(&cfg.store.data_dir))),
        #[cfg(feature = "db")]
        ObservationBackend::Postgres => Ok(Arc::new(
            windcast::repo::pg::PgObservationStore::connect(&cfg.db.url, cfg.db.max_connections).await?,
        )),
        #[cfg(not(feature = "db"))]
        ObservationBackend::Postgres => {
            anyhow::bail!("the postgres backend requires building with `--features db`")
        }
    }
}

async fn farm_names(store: &dyn ObservationStore, requested: Vec<String>) -> Result<Vec<String>> {
    if !requested.is_empty() {
        return Ok(requested);
    }
    let farms = store.farms().await.context("Failed to list farms")?;
    Ok(farms.into_iter().map(|f| f.name).collect())
}

async fn train(cfg: &Config, farms: Vec<String>, horizons: Vec<u32>) -> Result<()> {
    let store = observation_store(cfg).await?;
    let farms = farm_names(store.as_ref(), farms).await?;
    let horizons = if horizons.is_empty() {
        cfg.training.horizons.clone()
    } else {
        horizons
    };
    let models: Arc<dyn ModelStore> = Arc::new(FileModelStore::new(&cfg.store.model_dir));
    let sink = JsonLinesSink::new(&cfg.store.output_dir);

    let orchestrator = TrainingOrchestrator::new(
        store,
        models,
        FeatureBuilder::new(cfg.features.min_aligned_records),
        HorizonTrainer::new(cfg.training.trainer()),
        cfg.training.orchestrator(),
    );
    let window = TrainingWindow::trailing(Utc::now(), cfg.training.lookback_days);

    let report = tokio::select! {
        report = orchestrator.run(plan(&farms, &horizons), window) => report,
        _ = shutdown_signal() => {
            warn!("training interrupted before completion");
            return Ok(());
        }
    };
    sink.write_training_report(&report)?;
    println!("{report}");
    Ok(())
}

async fn drift(cfg: &Config, farms: Vec<String>) -> Result<()> {
    let store = observation_store(cfg).await?;
    let farms = farm_names(store.as_ref(), farms).await?;
    let monitor = DriftMonitor::new(
        store,
        Arc::new(JsonLinesSink::new(&cfg.store.output_dir)),
        Arc::new(LogAlertChannel),
        cfg.drift.clone(),
    );
    let window = TrainingWindow::trailing(Utc::now(), cfg.training.lookback_days);
    let run = monitor.run(&farms, window).await?;
    println!("{run}");
    Ok(())
}

async fn signal(cfg: &Config) -> Result<()> {
    let store = observation_store(cfg).await?;
    let models = FileModelStore::new(&cfg.store.model_dir).load_all()?;

    let weather: Arc<dyn WeatherFeed> = match &cfg.feeds.weather_base_url {
        Some(url) => Arc::new(
            OpenMeteoClient::new(url.clone(), cfg.feeds.http_timeout())?
                .with_model(cfg.feeds.weather_model.clone()),
        ),
        None => {
            info!("no live weather endpoint configured, using historical weather");
            Arc::new(NoLiveWeather)
        }
    };
    let official = Arc::new(BmrsWindForecastClient::new(
        cfg.feeds.official_base_url.clone(),
        cfg.feeds.http_timeout(),
    )?);

    let engine = SignalEngine::new(
        store,
        weather,
        official,
        Arc::new(JsonLinesSink::new(&cfg.store.output_dir)),
        cfg.signal.clone(),
    );
    let run = engine.run(&models, Utc::now()).await?;
    println!("{run}");
    Ok(())
}

async fn simulate(out: PathBuf, hours: usize, seed: u64) -> Result<()> {
    let farms = [
        ("Hornsea", 53.88, 1.79, 1200.0, &["T_HOWAO-1", "T_HOWAO-2", "T_HOWAO-3"][..]),
        ("Walney", 54.04, -3.52, 660.0, &["T_WLNYO-3", "T_WLNYO-4"][..]),
        ("Dogger Bank", 54.75, 2.05, 1200.0, &["T_DBAWO-1"][..]),
        ("Moray East", 58.19, -2.72, 950.0, &["T_MOWEO-1", "T_MOWEO-2", "T_MOWEO-3"][..]),
    ];
    let now = Utc::now().duration_trunc(TimeDelta::hours(1))?;
    let start = now - TimeDelta::hours(i64::try_from(hours)?);

    let data: Vec<(WindFarm, Vec<_>)> = farms
        .iter()
        .zip(seed..)
        .map(|(&(name, lat, lon, capacity, units), farm_seed)| {
            let observations = SyntheticFarm::new(SyntheticFarmConfig {
                start,
                capacity_mw: capacity,
                seed: farm_seed,
                ..Default::default()
            })
            .generate(hours);
            (
                WindFarm::new(name)
                    .with_location(lat, lon)
                    .with_capacity(capacity)
                    .with_units(units.iter().map(|u| u.to_string()).collect()),
                observations,
            )
        })
        .collect();

    FileObservationStore::new(&out).write(&data).await?;
    info!(dir = %out.display(), farms = data.len(), hours, "synthetic data written");
    println!("Wrote {} farms x {} hours to {}", data.len(), hours, out.display());
    Ok(())
}
