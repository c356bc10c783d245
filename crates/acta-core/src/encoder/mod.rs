//! # Encoder Adapters
//!
//! Pretrained transformer encoders that turn a batch of token ids into
//! per-token hidden states `[batch, seq_len, hidden_size]`.

pub mod bert;
pub mod distilbert;
pub mod hub;
pub mod weights;

use std::collections::BTreeMap;

use candle_core::Tensor;
use candle_nn::VarBuilder;
use serde::Deserialize;

use crate::batch::ModelInputs;
use crate::error::{ActaError, Result};

pub use bert::BertEncoder;
pub use distilbert::DistilBertEncoder;
pub use hub::{ModelFiles, resolve_model_files};
pub use weights::{LoadReport, load_checkpoint};

/// A sequence encoder producing one hidden vector per token.
///
/// Implementations must not keep state between calls.
pub trait Encoder: Send + Sync {
    /// Width of each hidden vector.
    fn hidden_size(&self) -> usize;

    /// Encode a batch into `[batch, seq_len, hidden_size]`.
    fn forward(&self, inputs: &ModelInputs<'_>) -> Result<Tensor>;
}

/// Supported encoder families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    Bert,
    DistilBert,
}

impl Architecture {
    pub fn from_model_type(model_type: &str) -> Result<Self> {
        match model_type {
            "bert" => Ok(Self::Bert),
            "distilbert" => Ok(Self::DistilBert),
            other => Err(ActaError::UnsupportedArchitecture(other.to_string())),
        }
    }

    /// Prefix the architecture's task checkpoints put in front of encoder
    /// weights, e.g. `bert.embeddings.word_embeddings.weight`.
    pub fn checkpoint_prefix(self) -> &'static str {
        match self {
            Self::Bert => "bert.",
            Self::DistilBert => "distilbert.",
        }
    }
}

/// The subset of a Hugging Face `config.json` the adapter needs.
#[derive(Debug, Clone, Deserialize)]
pub struct PretrainedConfig {
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(alias = "dim")]
    pub hidden_size: usize,
    #[serde(default)]
    pub id2label: Option<BTreeMap<String, String>>,
}

impl PretrainedConfig {
    pub fn architecture(&self) -> Result<Architecture> {
        let model_type = self.model_type.as_deref().ok_or_else(|| {
            ActaError::UnsupportedArchitecture("config.json has no model_type".into())
        })?;
        Architecture::from_model_type(model_type)
    }
}

/// Build the encoder described by `config_json`, creating its weights in `vb`.
pub fn build_encoder(config_json: &str, vb: VarBuilder) -> Result<(Box<dyn Encoder>, Architecture)> {
    let pretrained: PretrainedConfig = serde_json::from_str(config_json)?;
    let architecture = pretrained.architecture()?;
    let encoder: Box<dyn Encoder> = match architecture {
        Architecture::Bert => Box::new(BertEncoder::load(vb, config_json)?),
        Architecture::DistilBert => Box::new(DistilBertEncoder::load(vb, config_json)?),
    };
    tracing::debug!(?architecture, hidden_size = encoder.hidden_size(), "built encoder");
    Ok((encoder, architecture))
}
