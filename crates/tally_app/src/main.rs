use clap::Parser;
use tally_app::app::{run, AppConfig};
use tally_app::cli::Cli;
use tracing_subscriber::EnvFilter;

fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().unwrap_or_default();
    if let Err(err) = run(config, cli.command) {
        eprintln!("tally: {err:#}");
        std::process::exit(1);
    }
}
