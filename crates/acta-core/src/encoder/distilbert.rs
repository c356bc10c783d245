use candle_core::{DType, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::distilbert::{Config, DistilBertModel};

use crate::batch::ModelInputs;
use crate::encoder::{Encoder, PretrainedConfig};
use crate::error::Result;

/// DistilBERT encoder returning the last hidden layer.
pub struct DistilBertEncoder {
    model: DistilBertModel,
    hidden_size: usize,
}

impl DistilBertEncoder {
    /// Create the encoder from a DistilBERT `config.json`, with weights from `vb`.
    pub fn load(vb: VarBuilder, config_json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(config_json)?;
        let PretrainedConfig { hidden_size, .. } = serde_json::from_str(config_json)?;
        let model = DistilBertModel::load(vb, &config)?;
        Ok(Self { model, hidden_size })
    }
}

impl Encoder for DistilBertEncoder {
    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn forward(&self, inputs: &ModelInputs<'_>) -> Result<Tensor> {
        // DistilBERT takes the inverse mask: nonzero marks key positions to hide.
        let keep = inputs.attention_mask_or_ones()?.to_dtype(DType::U8)?;
        let hidden = keep.eq(&keep.zeros_like()?)?.unsqueeze(1)?.unsqueeze(1)?;
        Ok(self.model.forward(inputs.input_ids, &hidden)?)
    }
}
