use candle_core::{D, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::labels::LabelVocab;
use crate::tagger::head::TokenClassifierOutput;

/// Result of [`SequenceTagger::forward`](crate::tagger::SequenceTagger::forward).
#[derive(Debug, Clone)]
pub enum TaggerOutput {
    /// CRF modes: best path `[batch, seq_len]` (`u32`) and the emissions it
    /// was decoded from `[batch, seq_len, num_labels]`.
    Decoded { path: Tensor, emissions: Tensor },
    /// Direct mode: classifier logits and, with labels, the loss.
    Classification(TokenClassifierOutput),
}

impl TaggerOutput {
    /// Per-token label scores: emissions or logits.
    pub fn scores(&self) -> &Tensor {
        match self {
            Self::Decoded { emissions, .. } => emissions,
            Self::Classification(output) => &output.logits,
        }
    }

    /// One label id per token: the decoded path, or the argmax of the logits.
    pub fn predictions(&self) -> Result<Vec<Vec<u32>>> {
        let ids = match self {
            Self::Decoded { path, .. } => path.clone(),
            Self::Classification(output) => output.logits.argmax(D::Minus1)?,
        };
        Ok(ids.to_vec2::<u32>()?)
    }
}

/// What the prediction step hands back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutput {
    pub input_ids: Vec<Vec<u32>>,
    /// Gold labels, when the batch carried them.
    pub labels: Option<Vec<Vec<i64>>>,
    pub predictions: Vec<Vec<u32>>,
}

impl PredictionOutput {
    /// Predictions spelled out as label names.
    pub fn prediction_labels<'a>(&self, vocab: &'a LabelVocab) -> Result<Vec<Vec<&'a str>>> {
        self.predictions
            .iter()
            .map(|row| vocab.decode_labels(row))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_classification_predictions_take_argmax() {
        let dev = Device::Cpu;
        let logits = Tensor::new(&[[[0.1f32, 0.9, 0.0], [2.0, 1.0, 0.5]]], &dev).unwrap();
        let output = TaggerOutput::Classification(TokenClassifierOutput { logits, loss: None });
        assert_eq!(output.predictions().unwrap(), vec![vec![1, 0]]);
        assert_eq!(output.scores().dims(), &[1, 2, 3]);
    }

    #[test]
    fn test_prediction_output_json() {
        let output = PredictionOutput {
            input_ids: vec![vec![101, 7, 102]],
            labels: None,
            predictions: vec![vec![0, 1, 0]],
        };
        let json = serde_json::to_string(&output).unwrap();
        assert_eq!(
            json,
            r#"{"input_ids":[[101,7,102]],"labels":null,"predictions":[[0,1,0]]}"#
        );

        let vocab = LabelVocab::from_labels(["O", "Claim"]).unwrap();
        assert_eq!(
            output.prediction_labels(&vocab).unwrap(),
            vec![vec!["O", "Claim", "O"]]
        );
    }
}
