mod auth;
mod backup;
mod config;
mod db;
mod error;
mod routes;

use std::sync::Arc;

use config::AppConfig;
use db::Db;
use routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("boba_server=info".parse().expect("valid directive")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting boba-server with config: {:?}", config);

    let db = Db::open(&config.database_path).await?;
    let state = AppState::new(config.clone(), db);
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("boba-server listening on {}", config.bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
