//! PostScout CLI: enrich scraped competitor blog posts with summaries,
//! keywords, and funnel stages.

mod commands;
mod state;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
