//! # Acta Core
//!
//! Token-level tagging of argumentative structure on top of a pretrained
//! transformer encoder. A [`SequenceTagger`] runs in one of three modes:
//! direct token classification, encoder → BiGRU → projection → CRF, or
//! encoder → projection → CRF.
//!
//! ## Quick Start
//!
//! ```rust
//! use candle_core::{Device, Tensor};
//! use acta_core::Crf;
//!
//! let dev = Device::Cpu;
//! let crf = Crf::from_tensors(
//!     Tensor::new(&[0.0f32, 0.0], &dev)?,
//!     Tensor::new(&[0.0f32, 0.0], &dev)?,
//!     Tensor::new(&[[0.5f32, -0.5], [-0.5, 0.5]], &dev)?,
//! )?;
//! let emissions = Tensor::new(&[[[1.0f32, 0.0], [0.0, 0.2], [0.0, 1.0]]], &dev)?;
//! let mask = Tensor::new(&[[1u8, 1, 0]], &dev)?;
//!
//! let paths = crf.decode(&emissions, Some(&mask), 0)?;
//! assert_eq!(paths, vec![vec![0, 0, 0]]);
//! # Ok::<(), acta_core::ActaError>(())
//! ```
pub mod batch;
pub mod config;
pub mod crf;
pub mod encoder;
pub mod error;
pub mod labels;
pub mod tagger;

// Re-export primary API
pub use batch::{Batch, ModelInputs};
pub use config::{OptimizerConfig, TaggerConfig, TaggingMode};
pub use crf::{Crf, Reduction, ViterbiDecoder};
pub use encoder::{Architecture, Encoder};
pub use error::{ActaError, Result};
pub use labels::LabelVocab;
pub use tagger::{PredictionOutput, SequenceTagger, TaggerOutput, TokenClassifierOutput};

#[cfg(test)]
pub(crate) mod testing {
    use candle_core::{Device, Module, Tensor};
    use candle_nn::{Embedding, VarBuilder, embedding};

    use crate::batch::{ATTENTION_MASK, Batch, ModelInputs};
    use crate::encoder::Encoder;
    use crate::error::Result;

    pub const VOCAB_SIZE: usize = 16;

    /// Embedding lookup standing in for a transformer.
    pub struct ToyEncoder {
        embeddings: Embedding,
        hidden_size: usize,
    }

    impl ToyEncoder {
        pub fn new(hidden_size: usize, vb: VarBuilder) -> Result<Self> {
            let embeddings = embedding(VOCAB_SIZE, hidden_size, vb.pp("embeddings"))?;
            Ok(Self {
                embeddings,
                hidden_size,
            })
        }
    }

    impl Encoder for ToyEncoder {
        fn hidden_size(&self) -> usize {
            self.hidden_size
        }

        fn forward(&self, inputs: &ModelInputs<'_>) -> Result<Tensor> {
            Ok(self.embeddings.forward(inputs.input_ids)?)
        }
    }

    /// Two padded sequences of length 5, labelled with pad label 2.
    pub fn toy_batch(dev: &Device) -> Batch {
        let ids = Tensor::new(&[[3u32, 7, 9, 0, 0], [5, 1, 0, 0, 0]], dev).unwrap();
        let mask = Tensor::new(&[[1u32, 1, 1, 0, 0], [1, 1, 0, 0, 0]], dev).unwrap();
        let labels = Tensor::new(&[[0i64, 1, 1, 2, 2], [1, 0, 2, 2, 2]], dev).unwrap();
        Batch::new(ids)
            .with_input(ATTENTION_MASK, mask)
            .with_labels(labels)
    }
}
