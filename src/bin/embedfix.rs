use anyhow::{Context, Result};
use clap::Parser;
use embedfix::{run_rewriter, Cli};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    run_rewriter(&cli).with_context(|| format!("failed to rewrite page {}", cli.page_url))?;
    Ok(())
}
