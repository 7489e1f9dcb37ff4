//! TCP server entry point. Binds the wire protocol listener and drives one
//! `Engine` shared across all connections.

use std::sync::Arc;

use log::info;
use tokio::net::TcpListener;

use stratumdb::config::EngineConfig;
use stratumdb::engine::Engine;
use stratumdb::server;

fn init_log() {
    env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .init();
}

#[tokio::main]
async fn main() {
    init_log();

    let config = EngineConfig::from_env();
    let bind_addr = std::env::var("STRATUMDB_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:5433".to_string());

    let engine = if config.database_file().exists() {
        Engine::open(config)
    } else {
        Engine::bootstrap(config)
    };
    let engine = match engine {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            eprintln!("{}: {}", e.kind(), e);
            std::process::exit(1);
        }
    };

    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("failed to bind {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };
    info!("listening on {}", bind_addr);

    if let Err(e) = server::serve(engine, listener).await {
        eprintln!("{}: {}", e.kind(), e);
        std::process::exit(1);
    }
}
