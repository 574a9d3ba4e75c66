//! rmproposal CLI: research a company and draft an RM loan proposal.
//!
//! Combines web search results with internal documents or product
//! information sheets and asks an LLM for a cited proposal analysis.

mod commands;

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
