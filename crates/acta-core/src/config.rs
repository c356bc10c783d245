//! # Tagger Configuration
//!
//! Construction parameters for [`SequenceTagger`](crate::tagger::SequenceTagger),
//! loadable from JSON.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use candle_nn::ParamsAdamW;
use serde::{Deserialize, Serialize};

use crate::crf::Reduction;
use crate::error::{ActaError, Result};
use crate::labels::LabelVocab;

/// Which components the tagger wires together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaggingMode {
    /// Encoder with a token-classification head and cross-entropy loss.
    Direct,
    /// Encoder → bidirectional GRU → projection → CRF.
    RecurrentCrf,
    /// Encoder → projection → CRF.
    ProjectionCrf,
}

impl TaggingMode {
    /// Resolve the two mode flags. They are mutually exclusive.
    pub fn from_flags(crf_loss: bool, only_crf: bool) -> Result<Self> {
        match (crf_loss, only_crf) {
            (false, false) => Ok(Self::Direct),
            (true, false) => Ok(Self::RecurrentCrf),
            (false, true) => Ok(Self::ProjectionCrf),
            (true, true) => Err(ActaError::InvalidConfig(
                "crf_loss and only_crf are mutually exclusive".into(),
            )),
        }
    }

    /// Whether this mode decodes with a CRF.
    pub fn is_structured(self) -> bool {
        !matches!(self, Self::Direct)
    }
}

/// Optimizer hyperparameters. Not used by the tagger itself; carried for the
/// external training driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub adam_epsilon: f64,
    pub warmup_steps: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 5e-5,
            weight_decay: 0.0,
            adam_epsilon: 1e-8,
            warmup_steps: 0,
        }
    }
}

impl From<&OptimizerConfig> for ParamsAdamW {
    fn from(config: &OptimizerConfig) -> Self {
        ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: config.weight_decay,
            eps: config.adam_epsilon,
            ..ParamsAdamW::default()
        }
    }
}

fn default_reduction() -> Reduction {
    Reduction::Sum
}

/// Configuration for a sequence tagger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggerConfig {
    /// Hub id or local directory of the pretrained encoder.
    pub model_name_or_path: String,
    pub label2id: BTreeMap<String, u32>,
    pub id2label: BTreeMap<u32, String>,
    /// Hub id or local directory to read `config.json` from instead.
    #[serde(default)]
    pub config_name_or_path: Option<String>,
    /// Where downloaded weights are cached.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Label id excluded from the CRF loss; `None` disables masking.
    #[serde(default)]
    pub masked_label_id: Option<u32>,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    /// Encoder → BiGRU → projection → CRF.
    #[serde(default)]
    pub crf_loss: bool,
    /// Encoder → projection → CRF.
    #[serde(default)]
    pub only_crf: bool,
    /// How the CRF negative log-likelihood is reduced over the batch.
    #[serde(default = "default_reduction")]
    pub crf_reduction: Reduction,
}

impl TaggerConfig {
    /// Create a direct-mode configuration for the given model and labels.
    pub fn new<I, S>(model_name_or_path: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id2label: BTreeMap<u32, String> = labels
            .into_iter()
            .enumerate()
            .map(|(id, label)| (id as u32, label.into()))
            .collect();
        let label2id = id2label
            .iter()
            .map(|(&id, label)| (label.clone(), id))
            .collect();

        Self {
            model_name_or_path: model_name_or_path.into(),
            label2id,
            id2label,
            config_name_or_path: None,
            cache_dir: None,
            masked_label_id: None,
            optimizer: OptimizerConfig::default(),
            crf_loss: false,
            only_crf: false,
            crf_reduction: Reduction::Sum,
        }
    }

    /// Read a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Select the tagging mode, updating both flags.
    pub fn with_mode(mut self, mode: TaggingMode) -> Self {
        self.crf_loss = mode == TaggingMode::RecurrentCrf;
        self.only_crf = mode == TaggingMode::ProjectionCrf;
        self
    }

    pub fn with_masked_label_id(mut self, id: Option<u32>) -> Self {
        self.masked_label_id = id;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_config_name_or_path(mut self, name: impl Into<String>) -> Self {
        self.config_name_or_path = Some(name.into());
        self
    }

    pub fn with_crf_reduction(mut self, reduction: Reduction) -> Self {
        self.crf_reduction = reduction;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Resolve the mode flags.
    pub fn mode(&self) -> Result<TaggingMode> {
        TaggingMode::from_flags(self.crf_loss, self.only_crf)
    }

    /// Build and validate the label vocabulary, including the masked label id.
    pub fn label_vocab(&self) -> Result<LabelVocab> {
        let vocab = LabelVocab::new(&self.label2id, &self.id2label)?;
        match self.masked_label_id {
            Some(id) if id as usize >= vocab.len() => Err(ActaError::InvalidConfig(format!(
                "masked_label_id {id} is outside the {} labels",
                vocab.len()
            ))),
            _ => Ok(vocab),
        }
    }
}
