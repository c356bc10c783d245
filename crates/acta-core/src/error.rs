use thiserror::Error;

/// Errors that can occur while building or running a sequence tagger.
#[derive(Debug, Error)]
pub enum ActaError {
    /// The tagger configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Pretrained weights or their config could not be resolved or read.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// The encoder architecture named in `config.json` is not supported.
    #[error("unsupported encoder architecture: {0}")]
    UnsupportedArchitecture(String),

    /// The checkpoint's classification head disagrees with the label vocabulary.
    #[error("label count mismatch: vocabulary has {expected} labels, checkpoint has {found}")]
    LabelCountMismatch {
        /// Number of labels in the vocabulary.
        expected: usize,
        /// Output dimension found in the checkpoint.
        found: usize,
    },

    /// A batch lacks an input the active pipeline needs.
    #[error("batch is missing required input {0:?}")]
    MissingInput(String),

    /// The label tensor does not line up with the emissions or logits.
    #[error("label shape mismatch: expected {expected:?}, got {found:?}")]
    LabelShapeMismatch {
        /// Expected `[batch, seq_len]`.
        expected: Vec<usize>,
        /// Shape of the provided labels.
        found: Vec<usize>,
    },

    /// The CRF mask is malformed.
    #[error("invalid mask: {0}")]
    InvalidMask(String),

    /// A gold label id falls outside the label space.
    #[error("label id {label} is out of range for {num_labels} labels")]
    InvalidLabel {
        /// The offending label id.
        label: i64,
        /// Size of the label space.
        num_labels: usize,
    },

    /// Candle ML framework error.
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Filesystem error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for tagger operations.
pub type Result<T> = std::result::Result<T, ActaError>;
