use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use tokenizers::{Tokenizer, TruncationDirection, TruncationParams, TruncationStrategy};

use crate::inference::loader::LoadError;

/// Token sequences for one (question, context) pair, all of the same length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedInput {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub type_ids: Vec<u32>,
}

impl TokenizedInput {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    pub fn fields(&self) -> BTreeMap<&'static str, &[u32]> {
        BTreeMap::from([
            ("input_ids", self.input_ids.as_slice()),
            ("attention_mask", self.attention_mask.as_slice()),
            ("type_ids", self.type_ids.as_slice()),
        ])
    }
}

/// Anything able to hand out the pretrained tokenizer matching the checkpoint.
pub trait TokenizerProvider {
    fn tokenizer(&self) -> Result<Tokenizer, LoadError>;
}

/// Wraps a WordPiece tokenizer configured for question/context packing.
#[derive(Clone)]
pub struct PairTokenizer {
    tokenizer: Tokenizer,
    max_length: usize,
}

impl PairTokenizer {
    /// Only the context is ever truncated, a question longer than `max_length` is an error.
    pub fn new(mut tokenizer: Tokenizer, max_length: usize) -> Result<Self> {
        tokenizer
            .with_truncation(Some(TruncationParams {
                direction: TruncationDirection::Right,
                max_length,
                strategy: TruncationStrategy::OnlySecond,
                stride: 0,
            }))
            .map_err(|e| anyhow!("Cannot configure truncation: {e}"))?;
        tokenizer.with_padding(None);

        Ok(Self {
            tokenizer,
            max_length,
        })
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn encode_pair(&self, question: &str, context: &str) -> Result<TokenizedInput> {
        let encoding = self
            .tokenizer
            .encode((question, context), true)
            .map_err(|e| anyhow!("Cannot tokenize question/context pair: {e}"))?;

        Ok(TokenizedInput {
            input_ids: encoding.get_ids().to_vec(),
            attention_mask: encoding.get_attention_mask().to_vec(),
            type_ids: encoding.get_type_ids().to_vec(),
        })
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow!("Cannot tokenize text: {e}"))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Merges subword pieces and drops special tokens.
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| anyhow!("Cannot decode tokens: {e}"))
    }
}
