use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceprint_core::{Embedding, FaceEncoder, Landmarks};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "faceprint", version, about = "Face embedding extraction and comparison")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/faceprint/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Recognition model, overriding the config
    #[arg(short, long, global = true)]
    model: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the embedding of a face image as JSON
    Embed {
        image: PathBuf,
        /// Five landmarks "x1,y1,...,x5,y5" to align the face first
        #[arg(long, value_parser = parse_landmarks)]
        landmarks: Option<Landmarks>,
        /// Write the JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compare two face images by cosine distance (exit 1 when they differ)
    Compare {
        a: PathBuf,
        b: PathBuf,
        #[arg(long, value_parser = parse_landmarks)]
        landmarks_a: Option<Landmarks>,
        #[arg(long, value_parser = parse_landmarks)]
        landmarks_b: Option<Landmarks>,
        /// Match threshold on cosine distance, overriding the config
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Show model inputs, outputs and preprocessing parameters
    Inspect,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = resolve_config(cli.config.as_deref(), cli.model.clone())?;

    let mut encoder = FaceEncoder::load(&cfg.model_path, &cfg.encoder_options())
        .with_context(|| format!("loading model {}", cfg.model_path.display()))?;

    match cli.command {
        Commands::Embed {
            image,
            landmarks,
            output,
        } => {
            let embedding = embed(&mut encoder, &image, landmarks.as_ref())?;
            let text = serde_json::to_string_pretty(&embedding)?;
            match output {
                Some(path) => std::fs::write(&path, text)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => println!("{text}"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Compare {
            a,
            b,
            landmarks_a,
            landmarks_b,
            threshold,
        } => {
            let emb_a = embed(&mut encoder, &a, landmarks_a.as_ref())?;
            let emb_b = embed(&mut encoder, &b, landmarks_b.as_ref())?;
            let threshold = threshold.unwrap_or(cfg.threshold);

            let result = FaceEncoder::verify(&emb_a, &emb_b, threshold)?;
            tracing::info!(
                distance = result.distance,
                threshold,
                same = result.same,
                "compared {} and {}",
                a.display(),
                b.display()
            );
            println!("{}", serde_json::to_string_pretty(&result)?);

            Ok(if result.same {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Commands::Inspect => {
            let report = json!({
                "model_path": encoder.model_path(),
                "inputs": encoder.input_names(),
                "outputs": encoder.output_names(),
                "blob": encoder.blob_params(),
                "keypoints": encoder.keypoints(),
                "threshold": cfg.threshold,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Config file and environment, then the `--model` flag on top.
fn resolve_config(config: Option<&Path>, model: Option<PathBuf>) -> Result<Config> {
    let mut cfg = Config::load(config)?;
    if let Some(model) = model {
        cfg.model_path = model;
    }
    Ok(cfg)
}

fn embed(encoder: &mut FaceEncoder, path: &Path, landmarks: Option<&Landmarks>) -> Result<Embedding> {
    let img = image::open(path).with_context(|| format!("opening image {}", path.display()))?;
    let embedding = match landmarks {
        Some(lm) => encoder.predict_aligned(&img, lm),
        None => encoder.predict(&img),
    }
    .with_context(|| format!("encoding {}", path.display()))?;
    Ok(embedding)
}

/// Parse "x1,y1,x2,y2,x3,y3,x4,y4,x5,y5".
fn parse_landmarks(s: &str) -> Result<Landmarks, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f32>().map_err(|e| format!("`{v}`: {e}")))
        .collect::<Result<Vec<_>, _>>()?;

    if values.len() != 10 {
        return Err(format!("expected 10 comma-separated numbers, got {}", values.len()));
    }

    Ok(std::array::from_fn(|i| (values[i * 2], values[i * 2 + 1])))
}
