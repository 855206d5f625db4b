use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "srt2vtt",
    version,
    about = "Convert per-language .srt subtitle folders into .vtt folders"
)]
struct ConvertCli {
    /// Root holding one subdirectory of .srt files per language
    #[arg(long, env = "SRT2VTT_INPUT", default_value = "srt")]
    input: PathBuf,

    /// Root the mirrored .vtt tree is written to
    #[arg(long, env = "SRT2VTT_OUTPUT", default_value = "vtt")]
    output: PathBuf,

    /// Language subdirectories to convert
    #[arg(
        long = "lang",
        env = "SRT2VTT_LANGS",
        value_delimiter = ',',
        default_values_t = ["en".to_string(), "jp".to_string()]
    )]
    languages: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = ConvertCli::parse();
    let report = srt2vtt::convert_tree(&cli.input, &cli.output, &cli.languages);
    println!("Converted {} .srt files to .vtt", report.converted);
    Ok(())
}
