//! docqa CLI: question answering over a corpus of Word documents.
//!
//! Extracts `.docx` content, enriches it with a multimodal model, builds a
//! local vector index, and answers questions against it.

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
