//! Acta Prediction Tool
//!
//! Builds a sequence tagger from a configuration file and runs the prediction
//! step over a pre-tokenized JSON batch or over raw text.

use std::path::{Path, PathBuf};

use acta_core::batch::{ATTENTION_MASK, TOKEN_TYPE_IDS};
use acta_core::{Batch, SequenceTagger, TaggerConfig};
use anyhow::{Context, Result, bail};
use candle_core::{Device, Tensor, WithDType};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokenizers::{PaddingParams, Tokenizer};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// CLI arguments
#[derive(Parser)]
#[command(name = "acta-predict")]
#[command(about = "Tag argumentative components with a transformer sequence tagger")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Tagger configuration (JSON)
    #[arg(short, long, env = "ACTA_CONFIG")]
    config: PathBuf,

    /// Fine-tuned tagger weights written by `save_weights`
    #[arg(short, long, env = "ACTA_WEIGHTS")]
    weights: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Predict a pre-tokenized batch
    Batch {
        /// JSON file with `input_ids` and optional `attention_mask`,
        /// `token_type_ids` and `labels`
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Tokenize and predict raw text
    Text {
        /// Hugging Face `tokenizer.json`
        #[arg(short, long)]
        tokenizer: PathBuf,

        /// Texts to tag
        #[arg(required = true)]
        texts: Vec<String>,
    },
}

/// Pre-tokenized batch as stored on disk.
#[derive(Debug, Deserialize)]
struct BatchFile {
    input_ids: Vec<Vec<u32>>,
    #[serde(default)]
    attention_mask: Option<Vec<Vec<u32>>>,
    #[serde(default)]
    token_type_ids: Option<Vec<Vec<u32>>>,
    #[serde(default)]
    labels: Option<Vec<Vec<i64>>>,
}

/// One tagged text.
#[derive(Debug, Serialize)]
struct TaggedText<'a> {
    text: &'a str,
    tokens: Vec<&'a str>,
    labels: Vec<&'a str>,
}

fn matrix<T: WithDType>(rows: &[Vec<T>], name: &str, device: &Device) -> Result<Tensor> {
    let width = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|row| row.len() != width) {
        bail!("rows of {name} must all have the same length");
    }
    let flat: Vec<T> = rows.iter().flatten().copied().collect();
    Tensor::from_vec(flat, (rows.len(), width), device)
        .with_context(|| format!("failed to build {name} tensor"))
}

fn load_batch(path: &Path, device: &Device) -> Result<Batch> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file: BatchFile = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    let mut batch = Batch::new(matrix(&file.input_ids, "input_ids", device)?);
    if let Some(mask) = &file.attention_mask {
        batch = batch.with_input(ATTENTION_MASK, matrix(mask, ATTENTION_MASK, device)?);
    }
    if let Some(types) = &file.token_type_ids {
        batch = batch.with_input(TOKEN_TYPE_IDS, matrix(types, TOKEN_TYPE_IDS, device)?);
    }
    if let Some(labels) = &file.labels {
        batch = batch.with_labels(matrix(labels, "labels", device)?);
    }
    Ok(batch)
}

fn run_batch(tagger: &SequenceTagger, input: &Path, device: &Device) -> Result<()> {
    let batch = load_batch(input, device)?;
    if batch.labels().is_some() {
        let loss = tagger.loss(&batch)?.to_scalar::<f32>()?;
        info!(loss, "batch loss");
    }
    let output = tagger.predict_step(&batch, 0, None)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn run_text(
    tagger: &SequenceTagger,
    tokenizer_path: &Path,
    texts: &[String],
    device: &Device,
) -> Result<()> {
    let mut tokenizer = Tokenizer::from_file(tokenizer_path)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("failed to load tokenizer {}", tokenizer_path.display()))?;
    tokenizer.with_padding(Some(PaddingParams::default()));

    let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let encodings = tokenizer
        .encode_batch(inputs, true)
        .map_err(anyhow::Error::msg)
        .context("tokenization failed")?;

    let mut ids = Vec::with_capacity(encodings.len());
    let mut attention = Vec::with_capacity(encodings.len());
    let mut type_ids = Vec::with_capacity(encodings.len());
    for encoding in &encodings {
        ids.push(encoding.get_ids().to_vec());
        attention.push(encoding.get_attention_mask().to_vec());
        type_ids.push(encoding.get_type_ids().to_vec());
    }
    let batch = Batch::new(matrix(&ids, "input_ids", device)?)
        .with_input(ATTENTION_MASK, matrix(&attention, ATTENTION_MASK, device)?)
        .with_input(TOKEN_TYPE_IDS, matrix(&type_ids, TOKEN_TYPE_IDS, device)?);

    let output = tagger.predict_step(&batch, 0, None)?;
    let labels = output.prediction_labels(tagger.labels())?;
    for ((text, encoding), row) in texts.iter().zip(&encodings).zip(&labels) {
        let (tokens, labels): (Vec<&str>, Vec<&str>) = encoding
            .get_tokens()
            .iter()
            .zip(encoding.get_attention_mask())
            .zip(row)
            .filter(|((_, attended), _)| **attended == 1)
            .map(|((token, _), &label)| (token.as_str(), label))
            .unzip();
        let tagged = TaggedText {
            text,
            tokens,
            labels,
        };
        println!("{}", serde_json::to_string(&tagged)?);
    }
    Ok(())
}

fn main() -> Result<()> {
    // stdout carries the JSON output
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let device = Device::Cpu;

    let config = TaggerConfig::from_json_file(&cli.config)
        .with_context(|| format!("failed to read tagger config {}", cli.config.display()))?;
    let tagger = SequenceTagger::from_pretrained(&config, &device)
        .with_context(|| format!("failed to build tagger for {}", config.model_name_or_path))?;
    if let Some(weights) = &cli.weights {
        tagger
            .load_weights(weights)
            .with_context(|| format!("failed to load weights {}", weights.display()))?;
        info!(path = %weights.display(), "loaded fine-tuned weights");
    }

    match cli.command {
        Commands::Batch { input } => run_batch(&tagger, &input, &device),
        Commands::Text { tokenizer, texts } => run_text(&tagger, &tokenizer, &texts, &device),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_rejects_ragged_rows() {
        let dev = Device::Cpu;
        let ragged = vec![vec![1u32, 2, 3], vec![4]];
        assert!(matrix(&ragged, "input_ids", &dev).is_err());

        let square = vec![vec![1u32, 2], vec![3, 4]];
        let tensor = matrix(&square, "input_ids", &dev).unwrap();
        assert_eq!(tensor.dims(), &[2, 2]);
    }

    #[test]
    fn test_batch_file_optional_fields() {
        let file: BatchFile = serde_json::from_str(r#"{"input_ids": [[101, 7, 102]]}"#).unwrap();
        assert_eq!(file.input_ids, vec![vec![101, 7, 102]]);
        assert!(file.attention_mask.is_none());
        assert!(file.labels.is_none());
    }

    #[test]
    fn test_cli_parses_text_command() {
        let cli = Cli::try_parse_from([
            "acta-predict",
            "--config",
            "tagger.json",
            "text",
            "--tokenizer",
            "tokenizer.json",
            "We should ban smoking.",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("tagger.json"));
        assert!(matches!(cli.command, Commands::Text { texts, .. } if texts.len() == 1));
    }
}
