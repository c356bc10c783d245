//! # Sequence Tagger
//!
//! Wires an encoder to one of three heads, chosen once at construction:
//!
//! | Mode | Pipeline | Forward | Loss |
//! |---|---|---|---|
//! | [`Direct`](TaggingMode::Direct) | encoder → classifier | logits | token cross-entropy |
//! | [`RecurrentCrf`](TaggingMode::RecurrentCrf) | encoder → BiGRU → projection → CRF | path + emissions | CRF NLL |
//! | [`ProjectionCrf`](TaggingMode::ProjectionCrf) | encoder → projection → CRF | path + emissions | CRF NLL |

pub mod head;
pub mod output;
pub mod recurrent;

use std::path::Path;

use candle_core::{DType, Device, Module, Tensor, Var};
use candle_nn::{Linear, VarBuilder, VarMap, linear};

use crate::batch::{Batch, ModelInputs, check_label_shape, labels_to_vec, mask_from_labels};
use crate::config::{OptimizerConfig, TaggerConfig, TaggingMode};
use crate::crf::{Crf, Reduction};
use crate::encoder::{Encoder, build_encoder, load_checkpoint, resolve_model_files};
use crate::error::{ActaError, Result};
use crate::labels::LabelVocab;

pub use head::{IGNORE_INDEX, TokenClassificationHead, TokenClassifierOutput, token_cross_entropy};
pub use output::{PredictionOutput, TaggerOutput};
pub use recurrent::BiGru;

/// Encoder, optional BiGRU, projection and CRF.
struct CrfPipeline {
    encoder: Box<dyn Encoder>,
    rnn: Option<BiGru>,
    projection: Linear,
    crf: Crf,
}

impl CrfPipeline {
    fn new(
        encoder: Box<dyn Encoder>,
        recurrent: bool,
        num_labels: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let hidden_size = encoder.hidden_size();
        let (rnn, features) = if recurrent {
            let rnn = BiGru::new(hidden_size, hidden_size, vb.pp("rnn"))?;
            let features = rnn.output_size();
            (Some(rnn), features)
        } else {
            (None, hidden_size)
        };
        let projection = linear(features, num_labels, vb.pp("linear"))?;
        let crf = Crf::new(num_labels, vb.pp("crf"))?;
        Ok(Self {
            encoder,
            rnn,
            projection,
            crf,
        })
    }

    fn emissions(&self, inputs: &ModelInputs<'_>) -> Result<Tensor> {
        let hidden = self.encoder.forward(inputs)?;
        let features = match &self.rnn {
            Some(rnn) => rnn.forward(&hidden)?,
            None => hidden,
        };
        Ok(self.projection.forward(&features)?)
    }
}

/// Pipeline resolved from the tagging mode.
enum Pipeline {
    Direct(TokenClassificationHead),
    Crf(CrfPipeline),
}

/// Transformer sequence tagger.
///
/// All parameters live in one [`VarMap`], so an external training loop can
/// hand [`all_vars`](Self::all_vars) to an optimizer and step on the loss
/// returned by [`loss`](Self::loss).
pub struct SequenceTagger {
    mode: TaggingMode,
    labels: LabelVocab,
    masked_label_id: Option<u32>,
    reduction: Reduction,
    optimizer: OptimizerConfig,
    pipeline: Pipeline,
    varmap: VarMap,
    device: Device,
}

impl SequenceTagger {
    /// Build a tagger from a pretrained encoder.
    ///
    /// Resolves `config.json` and `model.safetensors` locally or from the hub,
    /// creates the encoder and the mode's head, then copies the checkpoint
    /// over them. Heads the checkpoint does not cover keep their fresh
    /// initialization.
    pub fn from_pretrained(config: &TaggerConfig, device: &Device) -> Result<Self> {
        let files = resolve_model_files(
            &config.model_name_or_path,
            config.config_name_or_path.as_deref(),
            config.cache_dir.as_deref(),
        )?;
        let config_json = std::fs::read_to_string(&files.config)?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let (encoder, architecture) = build_encoder(&config_json, vb)?;
        let tagger = Self::with_encoder(config, encoder, varmap, device)?;

        load_checkpoint(
            &tagger.varmap,
            &files.weights,
            &[architecture.checkpoint_prefix()],
            device,
        )?;
        tracing::info!(
            model = %config.model_name_or_path,
            mode = ?tagger.mode,
            labels = tagger.labels.len(),
            "sequence tagger ready"
        );
        Ok(tagger)
    }

    /// Build a tagger around an existing encoder whose weights live in
    /// `varmap`. The heads are created in the same `varmap`.
    pub fn with_encoder(
        config: &TaggerConfig,
        encoder: Box<dyn Encoder>,
        varmap: VarMap,
        device: &Device,
    ) -> Result<Self> {
        let mode = config.mode()?;
        let labels = config.label_vocab()?;
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let num_labels = labels.len();
        let pipeline = match mode {
            TaggingMode::Direct => {
                Pipeline::Direct(TokenClassificationHead::new(encoder, num_labels, vb)?)
            }
            TaggingMode::RecurrentCrf => {
                Pipeline::Crf(CrfPipeline::new(encoder, true, num_labels, vb)?)
            }
            TaggingMode::ProjectionCrf => {
                Pipeline::Crf(CrfPipeline::new(encoder, false, num_labels, vb)?)
            }
        };
        tracing::debug!(?mode, num_labels, "assembled tagging pipeline");

        Ok(Self {
            mode,
            labels,
            masked_label_id: config.masked_label_id,
            reduction: config.crf_reduction,
            optimizer: config.optimizer.clone(),
            pipeline,
            varmap,
            device: device.clone(),
        })
    }

    pub fn mode(&self) -> TaggingMode {
        self.mode
    }

    pub fn labels(&self) -> &LabelVocab {
        &self.labels
    }

    pub fn masked_label_id(&self) -> Option<u32> {
        self.masked_label_id
    }

    /// Optimizer settings for the external training driver.
    pub fn optimizer(&self) -> &OptimizerConfig {
        &self.optimizer
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Every trainable variable, encoder included.
    pub fn all_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    /// The CRF layer, in the structured modes.
    pub fn crf(&self) -> Option<&Crf> {
        match &self.pipeline {
            Pipeline::Crf(pipeline) => Some(&pipeline.crf),
            Pipeline::Direct(_) => None,
        }
    }

    /// Label used for positions past the last unmasked one when decoding.
    fn pad_label(&self) -> u32 {
        self.masked_label_id.unwrap_or(0)
    }

    /// CRF mask derived from `labels`, when masking is enabled.
    pub fn label_mask(&self, labels: Option<&Tensor>) -> Result<Option<Tensor>> {
        match (labels, self.masked_label_id) {
            (Some(labels), Some(masked)) => Ok(Some(mask_from_labels(labels, masked)?)),
            _ => Ok(None),
        }
    }

    /// Per-token label scores: CRF emissions or classifier logits.
    pub fn emissions(&self, inputs: &ModelInputs<'_>) -> Result<Tensor> {
        match &self.pipeline {
            Pipeline::Direct(head) => Ok(head.forward(inputs, None)?.logits),
            Pipeline::Crf(pipeline) => pipeline.emissions(inputs),
        }
    }

    /// Run the pipeline.
    ///
    /// In the CRF modes the emissions are decoded, under the label-derived
    /// mask when `labels` are given and masking is enabled. In direct mode
    /// `labels` produce the cross-entropy loss.
    pub fn forward(&self, inputs: &ModelInputs<'_>, labels: Option<&Tensor>) -> Result<TaggerOutput> {
        let (batch, seq_len) = inputs.dims()?;
        tracing::debug!(batch, seq_len, with_labels = labels.is_some(), "forward");

        match &self.pipeline {
            Pipeline::Direct(head) => Ok(TaggerOutput::Classification(head.forward(inputs, labels)?)),
            Pipeline::Crf(pipeline) => {
                let emissions = pipeline.emissions(inputs)?;
                if let Some(labels) = labels {
                    check_label_shape(labels, batch, seq_len)?;
                }
                let mask = self.label_mask(labels)?;
                let path = pipeline
                    .crf
                    .decode_tensor(&emissions, mask.as_ref(), self.pad_label())?;
                Ok(TaggerOutput::Decoded { path, emissions })
            }
        }
    }

    /// Scalar training loss for a labelled batch.
    ///
    /// The batch is only read, so the same batch can be passed again.
    pub fn loss(&self, batch: &Batch) -> Result<Tensor> {
        let labels = batch
            .labels()
            .ok_or_else(|| ActaError::MissingInput("labels".into()))?;
        let inputs = batch.model_inputs()?;
        let (batch_size, seq_len) = inputs.dims()?;
        tracing::debug!(batch = batch_size, seq_len, mode = ?self.mode, "loss step");

        match &self.pipeline {
            Pipeline::Direct(head) => {
                let logits = head.forward(&inputs, None)?.logits;
                token_cross_entropy(&logits, labels)
            }
            Pipeline::Crf(pipeline) => {
                check_label_shape(labels, batch_size, seq_len)?;
                let emissions = pipeline.emissions(&inputs)?;
                let mask = self.label_mask(Some(labels))?;
                pipeline
                    .crf
                    .neg_log_likelihood(&emissions, labels, mask.as_ref(), self.reduction)
            }
        }
    }

    /// Predict a batch. Labels, if present, are echoed back but not used.
    pub fn predict_step(
        &self,
        batch: &Batch,
        batch_idx: usize,
        _dataloader_idx: Option<usize>,
    ) -> Result<PredictionOutput> {
        let inputs = batch.model_inputs()?;
        let output = self.forward(&inputs, None)?;
        let predictions = output.predictions()?;
        tracing::debug!(batch_idx, rows = predictions.len(), "predict step");

        Ok(PredictionOutput {
            input_ids: inputs.input_ids.to_dtype(DType::U32)?.to_vec2::<u32>()?,
            labels: batch.labels().map(labels_to_vec).transpose()?,
            predictions,
        })
    }

    /// Write every parameter to a safetensors file.
    pub fn save_weights(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.varmap.save(path)?;
        tracing::info!(path = %path.display(), "saved tagger weights");
        Ok(())
    }

    /// Restore parameters written by [`save_weights`](Self::save_weights).
    /// Every parameter must be present.
    pub fn load_weights(&self, path: impl AsRef<Path>) -> Result<()> {
        let report = load_checkpoint(&self.varmap, path, &[], &self.device)?;
        if !report.is_complete() {
            return Err(ActaError::ModelLoad(format!(
                "checkpoint lacks {} parameters: {}",
                report.initialized.len(),
                report.initialized.join(", ")
            )));
        }
        Ok(())
    }
}
