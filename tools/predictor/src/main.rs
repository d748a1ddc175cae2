use std::{fs::File, io::BufReader, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use digits_model::predictor::{CnnPredictor, InputFrame, Predictor, PredictorContext};

/// Run a packaged digit classifier over a JSON file of flattened images.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Directory of the prediction adapter package.
    package: PathBuf,
    /// JSON rows of 784 normalized pixels, bare or as `{"data": [...]}`.
    input: PathBuf,
    /// Write predictions here instead of stdout.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let context = PredictorContext::from_package(&args.package)
        .with_context(|| format!("reading package {}", args.package.display()))?;
    let predictor = CnnPredictor::load_context(&context).context("loading model")?;

    let file = File::open(&args.input)
        .with_context(|| format!("opening {}", args.input.display()))?;
    let input: InputFrame =
        serde_json::from_reader(BufReader::new(file)).context("parsing input rows")?;
    let predictions = predictor.predict(&input).context("predicting")?;
    info!(rows = predictions.probabilities.len(), "predicted");

    let report = serde_json::to_string_pretty(&predictions.report())?;
    match args.output {
        Some(path) => std::fs::write(&path, report)
            .with_context(|| format!("writing {}", path.display()))?,
        None => println!("{}", report),
    }
    Ok(())
}
