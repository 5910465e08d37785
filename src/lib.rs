pub mod audit;
pub mod auth;
pub mod campaigns;
pub mod channel;
pub mod config;
pub mod contacts;
pub mod db;
pub mod error;
pub mod invites;
pub mod models;
pub mod onboarding;
pub mod profiles;
pub mod progress;
pub mod recipient;
pub mod routes;
pub mod schema;
pub mod send;
pub mod state;
pub mod store;
pub mod template;

use tracing_subscriber::EnvFilter;

/// Compact `tracing` output filtered by `RUST_LOG`, `info` by default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
