mod aggregation;
mod config;
mod demo;
mod listener;
mod row;
mod sink;
mod source;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::mpsc;

use clap::Parser;
use nebula_engine::QueryEngine;
use tracing_subscriber::EnvFilter;

use config::Cli;
use listener::{CompletionListener, Outcome};

/// Exit codes per spec §6: 0 normal stop, 1 bad configuration, 2 query
/// failure, 3 internal error (the channel closed with no outcome sent).
const EXIT_OK: u8 = 0;
const EXIT_CONFIG: u8 = 1;
const EXIT_QUERY_FAILURE: u8 = 2;
const EXIT_INTERNAL: u8 = 3;

fn install_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> ExitCode {
    install_tracing();

    let cli = Cli::parse();
    let resolved = match config::resolve(cli) {
        Ok(resolved) => resolved,
        Err(err) => {
            tracing::error!(%err, "configuration error");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let (tx, rx) = mpsc::channel();
    let engine = QueryEngine::with_listener(resolved.engine, Arc::new(CompletionListener::new(tx)));

    let plan = demo::build_plan(engine.buffer_manager().clone(), &resolved.query_path, resolved.window_size_ms);
    engine.start(plan);

    let outcome = rx.recv();
    engine.shutdown();

    match outcome {
        Ok(Outcome::Stopped) => ExitCode::from(EXIT_OK),
        Ok(Outcome::Failed(reason)) => {
            tracing::error!(%reason, "query failed");
            ExitCode::from(EXIT_QUERY_FAILURE)
        }
        Err(_) => ExitCode::from(EXIT_INTERNAL),
    }
}
