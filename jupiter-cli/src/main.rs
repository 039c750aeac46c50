use clap::Parser;
use jupiter::{
    cli::Args,
    config::{self, AppConfig},
    discovery,
    error::Result,
    logging::init_logging,
    summary,
};
use jupiter_engine::CancellationToken;
use mimalloc::MiMalloc;
use std::process;
use tracing::{error, info, warn};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    match run(args).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("Application error: {}", e);
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

/// Cancel the run on the first Ctrl-C.
async fn cancel_on_ctrl_c(token: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupted, finishing up. Partial downloads will resume next run.");
        token.cancel();
    }
}

async fn run(args: Args) -> Result<i32> {
    let config_path = config::resolve_path(args.config.as_deref());
    let config = AppConfig::load(&config_path)?;
    let _logging = init_logging(&config.logging, args.verbose, args.quiet)?;
    info!(path = %config_path.display(), "Using configuration");

    if args.discover {
        discovery::run_discovery(&config, &config_path, args.add).await?;
        return Ok(0);
    }

    let targets = config.targets();
    if targets.is_empty() {
        warn!(path = %config_path.display(), "No series or movies configured");
        return Ok(0);
    }

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let stats = jupiter_engine::run_until_cancelled(&targets, &config.engine, cancel).await?;
    println!("{}", summary::render(&stats));

    Ok(if stats.has_failures() { 1 } else { 0 })
}
