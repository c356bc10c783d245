//! # Batches
//!
//! A batch is a set of named input tensors plus optional gold labels. The
//! encoder only ever sees a [`ModelInputs`] view, which never carries labels,
//! so the caller's batch is read but never modified.

use std::collections::BTreeMap;

use candle_core::{DType, Tensor};

use crate::error::{ActaError, Result};

pub const INPUT_IDS: &str = "input_ids";
pub const ATTENTION_MASK: &str = "attention_mask";
pub const TOKEN_TYPE_IDS: &str = "token_type_ids";

/// A tokenized batch owned by the caller.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    inputs: BTreeMap<String, Tensor>,
    labels: Option<Tensor>,
}

impl Batch {
    /// Create a batch holding only `input_ids` of shape `[batch, seq_len]`.
    pub fn new(input_ids: Tensor) -> Self {
        Self::default().with_input(INPUT_IDS, input_ids)
    }

    pub fn from_inputs(inputs: BTreeMap<String, Tensor>) -> Self {
        Self {
            inputs,
            labels: None,
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.inputs.insert(name.into(), tensor);
        self
    }

    /// Attach gold labels of shape `[batch, seq_len]`.
    pub fn with_labels(mut self, labels: Tensor) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn input(&self, name: &str) -> Option<&Tensor> {
        self.inputs.get(name)
    }

    pub fn labels(&self) -> Option<&Tensor> {
        self.labels.as_ref()
    }

    /// Names of all inputs, labels excluded.
    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.keys().map(String::as_str)
    }

    /// The label-free view handed to the encoder.
    pub fn model_inputs(&self) -> Result<ModelInputs<'_>> {
        let input_ids = self
            .input(INPUT_IDS)
            .ok_or_else(|| ActaError::MissingInput(INPUT_IDS.into()))?;
        Ok(ModelInputs {
            input_ids,
            attention_mask: self.input(ATTENTION_MASK),
            token_type_ids: self.input(TOKEN_TYPE_IDS),
        })
    }
}

/// Borrowed encoder inputs.
#[derive(Debug, Clone, Copy)]
pub struct ModelInputs<'a> {
    pub input_ids: &'a Tensor,
    pub attention_mask: Option<&'a Tensor>,
    pub token_type_ids: Option<&'a Tensor>,
}

impl<'a> ModelInputs<'a> {
    pub fn new(input_ids: &'a Tensor) -> Self {
        Self {
            input_ids,
            attention_mask: None,
            token_type_ids: None,
        }
    }

    /// `(batch, seq_len)` of the token ids.
    pub fn dims(&self) -> Result<(usize, usize)> {
        Ok(self.input_ids.dims2()?)
    }

    /// Attention mask, or all ones when the batch has none.
    pub fn attention_mask_or_ones(&self) -> Result<Tensor> {
        match self.attention_mask {
            Some(mask) => Ok(mask.clone()),
            None => Ok(self.input_ids.ones_like()?),
        }
    }

    /// Token type ids, or all zeros when the batch has none.
    pub fn token_type_ids_or_zeros(&self) -> Result<Tensor> {
        match self.token_type_ids {
            Some(ids) => Ok(ids.clone()),
            None => Ok(self.input_ids.zeros_like()?),
        }
    }
}

/// Read a `[batch, seq_len]` label tensor of any integer dtype.
pub fn labels_to_vec(labels: &Tensor) -> Result<Vec<Vec<i64>>> {
    Ok(labels.to_dtype(DType::I64)?.to_vec2::<i64>()?)
}

/// Check that labels are `[batch, seq_len]` for the given dims.
pub fn check_label_shape(labels: &Tensor, batch: usize, seq_len: usize) -> Result<()> {
    if labels.dims() != [batch, seq_len] {
        return Err(ActaError::LabelShapeMismatch {
            expected: vec![batch, seq_len],
            found: labels.dims().to_vec(),
        });
    }
    Ok(())
}

/// Derive the CRF mask from labels: on wherever the label differs from
/// `masked_label_id`. Returned as a `u8` tensor of the labels' shape.
///
/// The mask assumes the masked label only marks trailing padding. If it also
/// occurs mid-sequence, those positions are dropped from supervision without
/// any error.
pub fn mask_from_labels(labels: &Tensor, masked_label_id: u32) -> Result<Tensor> {
    let rows = labels_to_vec(labels)?;
    let (batch, seq_len) = labels.dims2()?;
    let flat: Vec<u8> = rows
        .iter()
        .flatten()
        .map(|&label| u8::from(label != i64::from(masked_label_id)))
        .collect();
    Ok(Tensor::from_vec(flat, (batch, seq_len), labels.device())?)
}
