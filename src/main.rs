use std::net::SocketAddr;

use tokio::net::TcpListener;
use tower::make::Shared;

use peerfund::auth::jwt::JwtService;
use peerfund::config::AppConfig;
use peerfund::routes::create_router;
use peerfund::state::AppState;
use peerfund::{db, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "api",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        server_host = %config.server_host,
        server_port = config.server_port,
        public_origin = %config.public_origin,
        "loaded configuration"
    );

    let store = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || db::open_store(&config)).await??
    };
    let jwt = JwtService::from_config(&config)?;
    let listen_addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    let state = AppState::new(store, config, jwt);
    let router = create_router(state);

    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("listening on {}", listen_addr);

    axum::serve(listener, Shared::new(router)).await?;
    Ok(())
}
