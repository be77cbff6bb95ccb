//! # Reelgrid Server
//!
//! One binary, one role per process. Every role reads its
//! configuration from the environment (with `config.ini` defaults),
//! exposes the health-check listener, and shuts down cleanly on
//! SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use reelgrid_config::{
    AggregatorSettings, CleanerSettings, CommonSettings, FilterSettings, GuardSettings,
    JoinerSettings, ResultsSettings, RouterSettings, SentimentSettings, Settings,
};
use reelgrid_core::health::run_health_listener;
use reelgrid_core::stage::{run_stage, PacketHandler, QueueBinding};
use reelgrid_core::{
    AmqpBus, AvgRateRevenueBudgetCalculator, DataCleaner, DockerCliSupervisor, HealthGuard,
    LexiconModel, MessageBus, MostLeastRatedMovies, MoviesFilter, MoviesJoiner, ResultsHandler,
    Router, SentimentAnalyzer, TopActorsParticipation, TopInvestorCountries,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_TOP_INVESTOR_COUNTRIES: usize = 5;
const DEFAULT_TOP_ACTORS: usize = 10;

/// Command line arguments for the reelgrid worker binary.
#[derive(Parser, Debug)]
#[command(name = "reelgrid-server")]
#[command(about = "Distributed movie-analytics pipeline workers")]
struct Cli {
    /// Configuration defaults file, without extension.
    #[arg(long, env = "CONFIG_PATH", default_value = "config")]
    config: String,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// TCP ingress: accept clients and clean their CSV uploads.
    Cleaner,
    /// Movie filter shard.
    Filter,
    /// Shard router.
    Router,
    /// Movies/ratings or movies/credits joiner shard.
    Joiner,
    /// Overview sentiment analyzer shard.
    Sentiment,
    /// Top investor countries calculator.
    TopInvestors,
    /// Most/least rated movies calculator.
    MostLeastRated,
    /// Top actor participations calculator.
    TopActors,
    /// Average revenue/budget rate calculator.
    AvgRate,
    /// Results sink serving the client result sockets.
    Results,
    /// Health guard shard.
    Guard,
}

fn init_tracing(logging_level: &str) {
    let filter =
        EnvFilter::try_new(logging_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!(error = %e, "cannot install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received"),
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "cannot wait for ctrl-c");
                }
                info!("interrupt received");
            }
        }
        shutdown.cancel();
    });
}

async fn connect_bus(common: &CommonSettings) -> anyhow::Result<Arc<dyn MessageBus>> {
    let bus = AmqpBus::connect(&common.rabbitmq_uri)
        .await
        .with_context(|| format!("connecting to the broker at {}", common.rabbitmq_uri))?;
    Ok(Arc::new(bus))
}

async fn run_handler_stage<H: PacketHandler>(
    bus: Arc<dyn MessageBus>,
    inputs: Vec<QueueBinding>,
    mut handler: H,
    common: &CommonSettings,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    run_stage(
        &bus,
        &inputs,
        &mut handler,
        common.failure_probability,
        &shutdown,
    )
    .await?;
    bus.stop().await?;
    Ok(())
}

async fn run_role(
    role: Role,
    settings: &Settings,
    common: &CommonSettings,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    match role {
        Role::Cleaner => {
            let role_settings = CleanerSettings::from_settings(settings)?;
            let bus = connect_bus(common).await?;
            DataCleaner::new(Arc::clone(&bus), role_settings)
                .run(shutdown)
                .await?;
            bus.stop().await?;
        }
        Role::Filter => {
            let role_settings = FilterSettings::from_settings(settings)?;
            let bus = connect_bus(common).await?;
            let filter = MoviesFilter::new(Arc::clone(&bus), &role_settings)?;
            let inputs = MoviesFilter::inputs(&role_settings);
            run_handler_stage(bus, inputs, filter, common, shutdown).await?;
        }
        Role::Router => {
            let role_settings = RouterSettings::from_settings(settings)?;
            let bus = connect_bus(common).await?;
            let router = Router::new(Arc::clone(&bus), &role_settings)?;
            let inputs = Router::inputs(&role_settings);
            run_handler_stage(bus, inputs, router, common, shutdown).await?;
        }
        Role::Joiner => {
            let role_settings = JoinerSettings::from_settings(settings)?;
            let bus = connect_bus(common).await?;
            let joiner = MoviesJoiner::new(Arc::clone(&bus), &role_settings)?;
            let inputs = joiner.inputs();
            run_handler_stage(bus, inputs, joiner, common, shutdown).await?;
        }
        Role::Sentiment => {
            let role_settings = SentimentSettings::from_settings(settings)?;
            let bus = connect_bus(common).await?;
            let analyzer = SentimentAnalyzer::new(
                Arc::clone(&bus),
                Arc::new(LexiconModel),
                &role_settings,
            )?;
            let inputs = SentimentAnalyzer::inputs(&role_settings);
            run_handler_stage(bus, inputs, analyzer, common, shutdown).await?;
        }
        Role::TopInvestors => {
            let role_settings =
                AggregatorSettings::from_settings(settings, DEFAULT_TOP_INVESTOR_COUNTRIES)?;
            let bus = connect_bus(common).await?;
            let calculator = TopInvestorCountries::new(Arc::clone(&bus), &role_settings)?;
            let inputs = TopInvestorCountries::inputs(&role_settings);
            run_handler_stage(bus, inputs, calculator, common, shutdown).await?;
        }
        Role::MostLeastRated => {
            let role_settings = AggregatorSettings::from_settings(settings, 0)?;
            let bus = connect_bus(common).await?;
            let calculator = MostLeastRatedMovies::new(Arc::clone(&bus), &role_settings)?;
            let inputs = MostLeastRatedMovies::inputs(&role_settings);
            run_handler_stage(bus, inputs, calculator, common, shutdown).await?;
        }
        Role::TopActors => {
            let role_settings = AggregatorSettings::from_settings(settings, DEFAULT_TOP_ACTORS)?;
            let bus = connect_bus(common).await?;
            let calculator = TopActorsParticipation::new(Arc::clone(&bus), &role_settings)?;
            let inputs = TopActorsParticipation::inputs(&role_settings);
            run_handler_stage(bus, inputs, calculator, common, shutdown).await?;
        }
        Role::AvgRate => {
            let role_settings = AggregatorSettings::from_settings(settings, 0)?;
            let bus = connect_bus(common).await?;
            let calculator = AvgRateRevenueBudgetCalculator::new(Arc::clone(&bus), &role_settings)?;
            let inputs = AvgRateRevenueBudgetCalculator::inputs(&role_settings);
            run_handler_stage(bus, inputs, calculator, common, shutdown).await?;
        }
        Role::Results => {
            let role_settings = ResultsSettings::from_settings(settings)?;
            let bus = connect_bus(common).await?;
            ResultsHandler::new(Arc::clone(&bus), role_settings)
                .run(shutdown)
                .await?;
            bus.stop().await?;
        }
        Role::Guard => {
            let role_settings = GuardSettings::from_settings(settings)?;
            HealthGuard::new(role_settings, DockerCliSupervisor)
                .run(shutdown)
                .await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load_from(&cli.config).context("loading configuration")?;
    let common = CommonSettings::from_settings(&settings).context("loading common settings")?;
    init_tracing(&common.logging_level);

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let health_shutdown = shutdown.clone();
    let health_port = common.health_check_port;
    tokio::spawn(async move {
        if let Err(e) = run_health_listener(health_port, health_shutdown).await {
            error!(error = %e, "health listener failed");
        }
    });

    info!(role = ?cli.role, "starting");
    run_role(cli.role, &settings, &common, shutdown).await?;
    info!("shutdown complete");
    Ok(())
}
