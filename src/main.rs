mod cli;
mod engine;
mod logging;
mod metrics;
mod model;
mod orchestrator;
mod plan;
mod text_summary;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    logging::init(args.verbose);

    cli::run(args).await?;
    // Exit explicitly: the stdin reader may still be parked on a blocking read.
    std::process::exit(0)
}
