//! Meetpoint - proximity session manager

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meetpoint::{
    api::{self, AppState, RequestStats},
    cache::create_cache,
    config::Config,
    db::{
        self,
        repositories::{
            SqlxAuthSessionRepository, SqlxChatRepository, SqlxCheckinRepository,
            SqlxJobRepository, SqlxMessageRepository, SqlxUserRepository, SqlxVenueRepository,
        },
    },
    scheduler::ExpiryScheduler,
    services::{ChatService, CheckinService, LogNotifier, UserService},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meetpoint=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting meetpoint...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!("Configuration loaded");

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    // Run migrations
    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Initialize cache
    let cache = create_cache(&config.cache).await?;
    tracing::info!("Cache initialized");

    // Create repositories
    let user_repo = SqlxUserRepository::boxed(pool.clone());
    let auth_repo = SqlxAuthSessionRepository::boxed(pool.clone());
    let venue_repo = SqlxVenueRepository::boxed(pool.clone());
    let checkin_repo = SqlxCheckinRepository::boxed(pool.clone());
    let chat_repo = SqlxChatRepository::boxed(pool.clone());
    let message_repo = SqlxMessageRepository::boxed(pool.clone());
    let job_repo = SqlxJobRepository::boxed(pool.clone());

    let cache_ttl = std::time::Duration::from_secs(config.cache.ttl_seconds);
    let notifier: Arc<dyn meetpoint::services::Notifier> = Arc::new(LogNotifier);

    // Initialize services
    let user_service = Arc::new(UserService::new(
        user_repo.clone(),
        auth_repo.clone(),
        &config.session,
    ));
    let checkin_service = Arc::new(CheckinService::new(
        user_repo.clone(),
        venue_repo.clone(),
        checkin_repo.clone(),
        cache.clone(),
        &config.session,
        cache_ttl,
    ));
    let chat_service = Arc::new(ChatService::new(
        user_repo.clone(),
        venue_repo.clone(),
        checkin_repo.clone(),
        chat_repo.clone(),
        message_repo.clone(),
        job_repo.clone(),
        cache.clone(),
        notifier,
        &config.chat,
        &config.session,
        cache_ttl,
    ));

    // Start the expiry scheduler
    let scheduler = Arc::new(ExpiryScheduler::new(
        job_repo.clone(),
        chat_repo.clone(),
        checkin_repo.clone(),
        auth_repo.clone(),
        cache.clone(),
        config.scheduler.clone(),
    ));
    let scheduler_handle = scheduler.start();
    tracing::info!("Expiry scheduler started");

    // Build application state
    let state = AppState {
        pool: pool.clone(),
        user_service,
        checkin_service,
        chat_service,
        venue_repo,
        job_repo,
        request_stats: Arc::new(RequestStats::new()),
    };

    // Build router
    let app = api::build_router(state, &config.server.cors_origin);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the scheduler and wait for the current tick to finish
    scheduler.shutdown();
    let _ = scheduler_handle.await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
