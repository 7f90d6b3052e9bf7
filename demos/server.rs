//! Demo server: loads declarations from CONFIG_PATH, uses PostgreSQL when DATABASE_URL is set
//! (in-memory store otherwise), mounts common routes and every routed resource.

use axum::Router;
use entity_rest::{
    apply_migrations, common_routes, load_from_dir, resolve, MemoryStore, PgSessionProvider, ResourceRegistry,
    SessionProvider, Settings,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("entity_rest=info".parse()?))
        .init();

    let settings = Settings::from_env()?;
    let config = load_from_dir(&settings.config_path).await?;
    let model = resolve(&config)?;

    let sessions: Arc<dyn SessionProvider> = match &settings.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(settings.max_connections)
                .connect(url)
                .await?;
            apply_migrations(&pool, &model).await?;
            Arc::new(PgSessionProvider::new(pool))
        }
        None => {
            tracing::info!("DATABASE_URL not set, using the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let registry = ResourceRegistry::build(&model, &config.resources, sessions, settings.unresolved_ids)?;
    let app = Router::new()
        .merge(common_routes())
        .merge(registry.router())
        .layer(RequestBodyLimitLayer::new(settings.body_limit_bytes));

    let listener = TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
