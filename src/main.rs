// Magpie - LLM-assisted qualitative coding
// Main entry point

use anyhow::Result;
use clap::Parser;

use magpie::cli::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    run(cli).await
}
