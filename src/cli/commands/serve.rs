use anyhow::Context;
use clap::Args;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::JwtAuthenticator;
use crate::config::{config, AppConfig};
use crate::database::{MemoryStore, PgStore, Store};
use crate::router::{build_app, cors_layer};
use crate::schema::Registry;
use crate::state::AppState;
use crate::upload::UploadLimits;

#[derive(Args)]
pub struct ServeArgs {
    #[arg(long, help = "Address to bind (overrides HIVE_BIND)")]
    pub bind: Option<String>,

    #[arg(long, short, help = "Port to listen on (overrides HIVE_PORT)")]
    pub port: Option<u16>,
}

/// Registry first, then storage and the route table; requests are accepted
/// only once everything is built.
pub async fn handle(args: ServeArgs) -> anyhow::Result<()> {
    let config = config();
    tracing::info!("Starting hive gateway in {:?} mode", config.environment);

    let registry = Registry::from_config(&config.schema).context("failed to load resource schema")?;
    tracing::info!("Schema registry loaded with {} resources", registry.len());

    let store = open_store(config, &registry).await?;
    let authenticator =
        JwtAuthenticator::new(config.security.jwt_secret.clone()).context("invalid HIVE_JWT_SECRET")?;

    let state = AppState::new(registry, store, Arc::new(authenticator))
        .with_upload_limits(UploadLimits::from(&config.api))
        .with_actor_idle_timeout(config.api.actor_idle_timeout());
    let mut app = build_app(state).context("failed to build route table")?;
    if config.security.enable_cors {
        app = app.layer(cors_layer(&config.security));
    }
    if config.api.enable_request_logging {
        app = app.layer(TraceLayer::new_for_http());
    }

    let bind_addr = format!(
        "{}:{}",
        args.bind.as_deref().unwrap_or(&config.server.bind),
        args.port.unwrap_or(config.server.port)
    );
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Hive gateway listening on http://{}", bind_addr);
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

async fn open_store(config: &AppConfig, registry: &Registry) -> anyhow::Result<Arc<dyn Store>> {
    if config.database.url.is_none() {
        if crate::is_production!() {
            anyhow::bail!("DATABASE_URL must be set in production");
        }
        tracing::warn!("DATABASE_URL is not set; records are kept in memory");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = PgStore::connect(&config.database)
        .await
        .context("failed to connect to Postgres")?;
    store.migrate(registry).await.context("failed to migrate records table")?;
    Ok(Arc::new(store))
}
