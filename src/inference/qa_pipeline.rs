use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::inference::models::model::{SpanLogits, SpanScorer};
use crate::inference::tokenizer::PairTokenizer;

/// Token positions of the predicted answer, both inclusive.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerSpan {
    pub start_index: usize,
    pub end_index: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DecodedAnswer {
    pub span: AnswerSpan,
    pub text: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Prediction {
    Answer(DecodedAnswer),
    /// The best end position lies before the best start position
    NoAnswer { start_index: usize, end_index: usize },
}

impl Prediction {
    pub fn indices(&self) -> (usize, usize) {
        match self {
            Prediction::Answer(answer) => (answer.span.start_index, answer.span.end_index),
            Prediction::NoAnswer {
                start_index,
                end_index,
            } => (*start_index, *end_index),
        }
    }

    /// The decoded answer, empty when there is none.
    pub fn text(&self) -> &str {
        match self {
            Prediction::Answer(answer) => &answer.text,
            Prediction::NoAnswer { .. } => "",
        }
    }
}

/// Position of the highest score, the first one on ties. NaN ranks above every number, so
/// the first NaN wins wherever it sits, as with a tensor argmax.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &score)| match best {
            Some((_, best_score)) if best_score.is_nan() => best,
            Some((_, best_score)) if !score.is_nan() && score <= best_score => best,
            _ => Some((i, score)),
        })
        .map(|(i, _)| i)
}

/// Start and end are picked independently, there is no joint constraint on the pair.
pub fn select_span(logits: &SpanLogits, token_count: usize) -> Result<(usize, usize)> {
    if logits.start.len() != token_count || logits.end.len() != token_count {
        bail!(
            "Model returned {} start and {} end scores for {} tokens",
            logits.start.len(),
            logits.end.len(),
            token_count
        );
    }
    match (argmax(&logits.start), argmax(&logits.end)) {
        (Some(start), Some(end)) => Ok((start, end)),
        _ => bail!("Cannot select a span from empty scores"),
    }
}

pub struct QaPipeline {
    model: Box<dyn SpanScorer>,
    tokenizer: PairTokenizer,
}

impl QaPipeline {
    pub fn new(model: Box<dyn SpanScorer>, tokenizer: PairTokenizer) -> Self {
        Self { model, tokenizer }
    }

    pub fn tokenizer(&self) -> &PairTokenizer {
        &self.tokenizer
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub fn predict(&self, question: &str, context: &str) -> Result<Prediction> {
        let input = self.tokenizer.encode_pair(question, context)?;
        debug!("encoded {} tokens", input.len());

        let logits = self.model.score(&input)?;
        let (start_index, end_index) = select_span(&logits, input.len())?;
        debug!("span [{start_index}, {end_index}]");

        if end_index < start_index {
            return Ok(Prediction::NoAnswer {
                start_index,
                end_index,
            });
        }

        let text = self
            .tokenizer
            .decode(&input.input_ids[start_index..=end_index])?;
        Ok(Prediction::Answer(DecodedAnswer {
            span: AnswerSpan {
                start_index,
                end_index,
            },
            text,
        }))
    }
}
