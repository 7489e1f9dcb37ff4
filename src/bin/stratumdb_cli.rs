//! Embedded REPL entry point: drives a local `Engine` directly, no
//! network round trip.

use std::io::{stdin, stdout};
use std::sync::Arc;

use stratumdb::cli::Repl;
use stratumdb::config::EngineConfig;
use stratumdb::engine::Engine;

fn init_log() {
    env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .init();
}

fn main() {
    init_log();

    let config = EngineConfig::from_env();
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

    let code = Repl::new(engine, stdin().lock(), stdout()).run();
    std::process::exit(code);
}
