mod auth;
mod config;
mod db;
mod docs;
mod handlers;
mod models;
mod presence;
mod routes;
mod services;
mod session;
mod websocket;

use std::panic;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::{Config, ConfigError};
use db::{MemorySnapshotStore, PgSnapshotStore, SnapshotStore};
use presence::{MemoryPresenceStore, PresenceStore};
use services::auth_service::AuthValidator;
use session::SessionRegistry;
use websocket::Fanout;

/// Everything the routes and connection tasks share
pub struct AppState {
    pub config: Config,
    pub registry: Arc<SessionRegistry>,
    pub store: Arc<dyn SnapshotStore>,
    pub presence: Arc<dyn PresenceStore>,
    pub auth: AuthValidator,
    pub fanout: Fanout,
    /// Open WebSocket connections
    pub connections: AtomicU32,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn SnapshotStore>) -> Result<Arc<Self>, ConfigError> {
        let secret = config
            .jwt_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("JWT_SECRET"))?;
        Ok(Arc::new(Self {
            registry: SessionRegistry::new(store.clone(), config.persistence_debounce()),
            presence: Arc::new(MemoryPresenceStore::new(config.presence_ttl())),
            auth: AuthValidator::new(secret),
            fanout: Fanout::new(config.broadcast_capacity),
            connections: AtomicU32::new(0),
            store,
            config,
        }))
    }
}

#[tokio::main]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Load configuration before tracing so LOG_LEVEL can shape the default filter
    let config = Config::load();
    let log_level = config.as_ref().map(|c| c.log_level.clone()).unwrap_or_else(|_| "info".to_string());

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Our own crate at debug, everything else at the configured level
            format!("colabri_collab=debug,tower_http=debug,{}", log_level).into()
        }))
        .init();

    info!("Starting server...");

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("{} configured for the {} environment", config.service_name, config.environment);

    // Snapshot store: PostgreSQL, or process memory when developing without a database
    let store: Arc<dyn SnapshotStore> = match &config.db_url {
        Some(db_url) => match PgSnapshotStore::connect(db_url).await {
            Ok(store) => {
                info!("Database initialized successfully");
                Arc::new(store)
            }
            Err(e) => {
                error!("Failed to initialize database: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            warn!("No database URL configured - documents are kept in memory only");
            Arc::new(MemorySnapshotStore::new())
        }
    };

    let app_state = match AppState::new(config, store) {
        Ok(app_state) => app_state,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let app_routes = routes::create_app(app_state.clone());

    let address = app_state.config.server_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", address));

    info!("🚀 Server running on http://{}", address);
    info!("📡 WebSocket available at ws://{}/ws", address);
    info!("📚 Swagger UI available at http://{}/swagger", address);

    if let Err(e) = axum::serve(listener, app_routes)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    // Nothing merged may be lost on the way out
    let written = app_state.registry.flush_all().await;
    info!("Flushed {} document(s) on shutdown", written);
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
