//! pgpkit command line interface

use pgpkit::cli::{self, Args, Parser};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "pgpkit=info".into()))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = cli::run(Args::parse()) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
