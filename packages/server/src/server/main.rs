// Main entry point for the orchestration server.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flock_core::domains;
use flock_core::kernel::accounts::MemoryAccountStore;
use flock_core::kernel::auth::AuthCoordinator;
use flock_core::kernel::clock::Rand;
use flock_core::kernel::jobs::dispatcher::ExecutorDeps;
use flock_core::kernel::jobs::worker::WorkerPoolConfig;
use flock_core::kernel::jobs::{JobIntake, MemoryQueueBackend, QueueBackend, QueueRegistry};
use flock_core::kernel::social::BskyClientFactory;
use flock_core::kernel::{EventBus, FanoutHub};
use flock_core::server::{build_app, AppState};
use flock_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{level},flock_core={level}", level = config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting flock orchestration server");
    let config = Arc::new(config);

    // The bundled in-process backend; a shared external deployment would be
    // constructed from config.redis_url instead.
    let backend: Arc<dyn QueueBackend> = Arc::new(MemoryQueueBackend::new());
    let accounts = Arc::new(MemoryAccountStore::new());
    let factory = Arc::new(BskyClientFactory::new(config.bsky_service.clone()));
    let auth = Arc::new(AuthCoordinator::new(accounts.clone(), factory));

    let deps = Arc::new(ExecutorDeps {
        auth,
        rand: Arc::new(Rand::new()),
        http: reqwest::Client::new(),
    });

    let bus = EventBus::new();
    let dispatcher = Arc::new(domains::build_dispatcher());
    let registry = Arc::new(QueueRegistry::new(
        backend.clone(),
        dispatcher,
        deps,
        bus.clone(),
        WorkerPoolConfig {
            concurrency: config.concurrency_default,
            ..Default::default()
        },
    ));

    let fanout = FanoutHub::new();
    FanoutHub::spawn(&bus, fanout.clone());

    let intake = Arc::new(JobIntake::new(
        backend.clone(),
        registry.clone(),
        accounts,
        bus,
    ));

    let app = build_app(AppState {
        intake,
        registry: registry.clone(),
        backend,
        fanout,
        config: config.clone(),
    });

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received, draining worker pools");
        })
        .await
        .context("server error")?;

    registry.shutdown().await;
    Ok(())
}
