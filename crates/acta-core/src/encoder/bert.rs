use candle_core::Tensor;
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};

use crate::batch::ModelInputs;
use crate::encoder::{Encoder, PretrainedConfig};
use crate::error::Result;

/// BERT encoder returning the last hidden layer.
pub struct BertEncoder {
    model: BertModel,
    hidden_size: usize,
}

impl BertEncoder {
    /// Create the encoder from a BERT `config.json`, with weights from `vb`.
    pub fn load(vb: VarBuilder, config_json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(config_json)?;
        let PretrainedConfig { hidden_size, .. } = serde_json::from_str(config_json)?;
        let model = BertModel::load(vb, &config)?;
        Ok(Self { model, hidden_size })
    }
}

impl Encoder for BertEncoder {
    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn forward(&self, inputs: &ModelInputs<'_>) -> Result<Tensor> {
        let token_type_ids = inputs.token_type_ids_or_zeros()?;
        let attention_mask = inputs.attention_mask_or_ones()?;
        Ok(self
            .model
            .forward(inputs.input_ids, &token_type_ids, Some(&attention_mask))?)
    }
}
