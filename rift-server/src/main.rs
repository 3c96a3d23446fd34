//! Binary entrypoint for `rift-server`.

mod app;
mod conn;
mod network;

use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = app::run() {
        eprintln!("failed to start rift-server: {err}");
        std::process::exit(1);
    }
}
