//! Keel CLI entry point.

use clap::Parser;

use keel::cli::{self, Cli};
use keel::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(err) => std::process::exit(cli::handle_error(&err, cli.json)),
    };

    let mut log_config = LogConfig::from_config(&config);
    if let Some(level) = cli.verbosity_level() {
        log_config = log_config.with_level(level);
    }
    let logger = match LoggerImpl::init(&log_config) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("warning: logging disabled: {err:#}");
            None
        }
    };

    let code = cli::run(cli, config).await;
    // The file writer flushes when its guard drops; `exit` skips destructors.
    drop(logger);
    std::process::exit(code);
}
