use std::sync::Arc;

use tracing::{error, info};

use courier_api::middleware::JwtIdentity;
use courier_db::Database;
use courier_gateway::presence;
use courier_server::config::Config;
use courier_server::{Services, app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "courier=debug,courier_api=debug,courier_gateway=debug,tower_http=debug".into()
            }),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("FATAL: {:#}", e);
            error!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    let db = Arc::new(Database::open(&config.db_path)?);
    let services = Services::new(db, Arc::new(JwtIdentity::new(&config.jwt_secret)), config.presence_ttl);

    // Demote users whose sockets went quiet
    tokio::spawn(presence::run_expiry_loop(
        services.presence.clone(),
        Arc::new(services.dispatcher.clone()),
        config.presence_sweep,
    ));

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!("Courier server listening on {}", config.addr);
    axum::serve(listener, app(&services)).await?;

    Ok(())
}
