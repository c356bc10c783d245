use candle_core::{DType, Module, Tensor};
use candle_nn::{Linear, VarBuilder, linear};

use crate::batch::{ModelInputs, check_label_shape, labels_to_vec};
use crate::encoder::Encoder;
use crate::error::{ActaError, Result};

/// Label value skipped by the token-level cross-entropy.
pub const IGNORE_INDEX: i64 = -100;

/// Logits of a token-classification model, with the loss when labels were given.
#[derive(Debug, Clone)]
pub struct TokenClassifierOutput {
    /// `[batch, seq_len, num_labels]`
    pub logits: Tensor,
    pub loss: Option<Tensor>,
}

/// Encoder with a linear classifier on top of every hidden state.
pub struct TokenClassificationHead {
    encoder: Box<dyn Encoder>,
    classifier: Linear,
    num_labels: usize,
}

impl TokenClassificationHead {
    /// Create the classifier under `classifier` in `vb`.
    pub fn new(encoder: Box<dyn Encoder>, num_labels: usize, vb: VarBuilder) -> Result<Self> {
        let classifier = linear(encoder.hidden_size(), num_labels, vb.pp("classifier"))?;
        Ok(Self {
            encoder,
            classifier,
            num_labels,
        })
    }

    pub fn encoder(&self) -> &dyn Encoder {
        self.encoder.as_ref()
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn forward(
        &self,
        inputs: &ModelInputs<'_>,
        labels: Option<&Tensor>,
    ) -> Result<TokenClassifierOutput> {
        let hidden = self.encoder.forward(inputs)?;
        let logits = self.classifier.forward(&hidden)?;
        let loss = match labels {
            Some(labels) => Some(token_cross_entropy(&logits, labels)?),
            None => None,
        };
        Ok(TokenClassifierOutput { logits, loss })
    }
}

/// Mean cross-entropy over every position whose label is not
/// [`IGNORE_INDEX`]. Zero when every position is ignored.
pub fn token_cross_entropy(logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let (batch, seq_len, num_labels) = logits.dims3()?;
    check_label_shape(labels, batch, seq_len)?;

    let mut positions = Vec::new();
    let mut targets = Vec::new();
    for (index, label) in labels_to_vec(labels)?.into_iter().flatten().enumerate() {
        if label == IGNORE_INDEX {
            continue;
        }
        if label < 0 || label as usize >= num_labels {
            return Err(ActaError::InvalidLabel { label, num_labels });
        }
        positions.push(index as u32);
        targets.push(label as u32);
    }

    if positions.is_empty() {
        return Ok(Tensor::zeros((), logits.dtype(), logits.device())?);
    }

    let device = logits.device();
    let count = positions.len();
    let positions = Tensor::from_vec(positions, count, device)?;
    let targets = Tensor::from_vec(targets, count, device)?;
    let selected = logits
        .reshape((batch * seq_len, num_labels))?
        .index_select(&positions, 0)?;
    Ok(candle_nn::loss::cross_entropy(&selected.to_dtype(DType::F32)?, &targets)?)
}
