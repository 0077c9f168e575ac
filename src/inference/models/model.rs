use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::inference::tokenizer::TokenizedInput;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ModelBase {
    /// The name of the model
    pub name: String,

    /// Checkpoint the weights were loaded from
    pub checkpoint: String,

    /// The hub repository or directory the tokenizer and architecture come from
    pub tokenizer_source: String,

    /// The revision of the tokenizer repository
    pub tokenizer_revision: String,

    /// The device the model runs on
    pub device: String,

    /// Longest token sequence fed to the model
    pub max_sequence_length: usize,
}

impl ModelBase {
    /// `max_sequence_length` is the limit the tokenizer actually applies, which can be lower
    /// than the configured one.
    pub fn from_config(
        config: &Config,
        device: &candle_core::Device,
        max_sequence_length: usize,
    ) -> Self {
        Self {
            name: "Candle DistilBERT QA".into(),
            checkpoint: config.checkpoint_path().display().to_string(),
            tokenizer_source: config.tokenizer_source.clone(),
            tokenizer_revision: config.tokenizer_revision.clone(),
            device: format!("{device:?}"),
            max_sequence_length,
        }
    }
}

/// Start and end scores, one per token position.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanLogits {
    pub start: Vec<f32>,
    pub end: Vec<f32>,
}

/// A loaded span-prediction model. Implementations are read-only once built so a single
/// instance can serve concurrent requests.
pub trait SpanScorer: Send + Sync {
    fn score(&self, input: &TokenizedInput) -> Result<SpanLogits>;
}
