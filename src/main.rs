mod cli;
mod dns;
mod logging;

use clap::Parser;
use cli::Args;
use logging::enable_tracing;
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = enable_tracing(&args.log_level) {
        eprintln!("{:#}", e);
        return ExitCode::from(2);
    }

    match cli::run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(2)
        }
    }
}
