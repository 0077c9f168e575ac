use anyhow::{bail, Result};
use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use candle_transformers::models::distilbert::{Config as DistilBertConfig, DistilBertModel};
use serde::Deserialize;

use crate::config::HeadLayout;
use crate::inference::models::model::{SpanLogits, SpanScorer};
use crate::inference::tokenizer::TokenizedInput;

/// The few architecture values needed outside the encoder itself. `config.json` is parsed a
/// second time into this since the encoder config keeps its fields private.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct EncoderDims {
    pub dim: usize,
    pub max_position_embeddings: usize,
}

// Based on https://github.com/huggingface/candle/tree/main/candle-examples/examples/distilbert
pub struct DistilBertQa {
    encoder: DistilBertModel,
    head: SpanHead,
    device: Device,
    span: tracing::Span,
}

enum SpanHead {
    Fused(Linear),
    Split { start: Linear, end: Linear },
}

impl SpanHead {
    fn load(vb: VarBuilder, layout: HeadLayout, dim: usize) -> candle_core::Result<Self> {
        match layout {
            HeadLayout::Fused => Ok(SpanHead::Fused(linear(dim, 2, vb.pp("qa_outputs"))?)),
            HeadLayout::Split => Ok(SpanHead::Split {
                start: linear(dim, 1, vb.pp("start_outputs"))?,
                end: linear(dim, 1, vb.pp("end_outputs"))?,
            }),
        }
    }

    /// `hidden` is (1, seq_len, dim), both outputs are (seq_len)
    fn forward(&self, hidden: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
        match self {
            SpanHead::Fused(qa_outputs) => {
                let logits = qa_outputs.forward(hidden)?;
                Ok((logits.i((0, .., 0))?, logits.i((0, .., 1))?))
            }
            SpanHead::Split { start, end } => Ok((
                start.forward(hidden)?.i((0, .., 0))?,
                end.forward(hidden)?.i((0, .., 0))?,
            )),
        }
    }
}

impl DistilBertQa {
    pub fn load(
        vb: VarBuilder,
        config: &DistilBertConfig,
        dims: EncoderDims,
        layout: HeadLayout,
        encoder_prefix: &str,
    ) -> candle_core::Result<Self> {
        let device = vb.device().clone();
        let encoder_vb = if encoder_prefix.is_empty() {
            vb.clone()
        } else {
            vb.pp(encoder_prefix)
        };
        let encoder = DistilBertModel::load(encoder_vb, config)?;
        let head = SpanHead::load(vb, layout, dims.dim)?;

        Ok(Self {
            encoder,
            head,
            device,
            span: tracing::span!(tracing::Level::TRACE, "distilbert-qa"),
        })
    }
}

/// DistilBERT masks positions whose mask value is 1, the tokenizer marks real tokens with 1.
fn padding_mask(attention_mask: &[u32], device: &Device) -> candle_core::Result<Tensor> {
    let mask: Vec<u8> = attention_mask.iter().map(|&m| u8::from(m == 0)).collect();
    Tensor::new(mask.as_slice(), device)?.unsqueeze(0)
}

impl SpanScorer for DistilBertQa {
    fn score(&self, input: &TokenizedInput) -> Result<SpanLogits> {
        let _enter = self.span.enter();
        if input.is_empty() {
            bail!("Cannot score an empty token sequence");
        }

        let input_ids = Tensor::new(input.input_ids.as_slice(), &self.device)?.unsqueeze(0)?;
        let mask = padding_mask(&input.attention_mask, &self.device)?;

        let hidden = self.encoder.forward(&input_ids, &mask)?;
        let (start, end) = self.head.forward(&hidden)?;

        Ok(SpanLogits {
            start: start.to_dtype(DType::F32)?.to_vec1()?,
            end: end.to_dtype(DType::F32)?.to_vec1()?,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use super::*;

    const TINY_CONFIG: &str = r#"{
        "vocab_size": 16,
        "dim": 8,
        "n_layers": 1,
        "n_heads": 2,
        "hidden_dim": 16,
        "activation": "gelu",
        "max_position_embeddings": 32,
        "initializer_range": 0.02,
        "pad_token_id": 0,
        "model_type": "distilbert"
    }"#;

    /// Deterministic weights for a one-layer encoder with `hidden_dim` 16.
    pub(crate) fn tiny_weights(
        vocab_size: usize,
        dim: usize,
        layout: HeadLayout,
    ) -> HashMap<String, Tensor> {
        let dev = &Device::Cpu;
        let mut ws = HashMap::new();
        let mut put = |name: &str, shape: &[usize]| {
            let len: usize = shape.iter().product();
            let values: Vec<f32> = (0..len).map(|i| ((i % 7) as f32 - 3.0) * 0.01).collect();
            ws.insert(
                name.to_string(),
                Tensor::from_vec(values, shape, dev).unwrap(),
            );
        };
        put("distilbert.embeddings.word_embeddings.weight", &[vocab_size, dim]);
        put("distilbert.embeddings.position_embeddings.weight", &[32, dim]);
        put("distilbert.embeddings.LayerNorm.weight", &[dim]);
        put("distilbert.embeddings.LayerNorm.bias", &[dim]);
        let layer = "distilbert.transformer.layer.0";
        for proj in ["q_lin", "k_lin", "v_lin", "out_lin"] {
            put(&format!("{layer}.attention.{proj}.weight"), &[dim, dim]);
            put(&format!("{layer}.attention.{proj}.bias"), &[dim]);
        }
        put(&format!("{layer}.sa_layer_norm.weight"), &[dim]);
        put(&format!("{layer}.sa_layer_norm.bias"), &[dim]);
        put(&format!("{layer}.ffn.lin1.weight"), &[16, dim]);
        put(&format!("{layer}.ffn.lin1.bias"), &[16]);
        put(&format!("{layer}.ffn.lin2.weight"), &[dim, 16]);
        put(&format!("{layer}.ffn.lin2.bias"), &[dim]);
        put(&format!("{layer}.output_layer_norm.weight"), &[dim]);
        put(&format!("{layer}.output_layer_norm.bias"), &[dim]);
        match layout {
            HeadLayout::Fused => {
                put("qa_outputs.weight", &[2, dim]);
                put("qa_outputs.bias", &[2]);
            }
            HeadLayout::Split => {
                put("start_outputs.weight", &[1, dim]);
                put("start_outputs.bias", &[1]);
                put("end_outputs.weight", &[1, dim]);
                put("end_outputs.bias", &[1]);
            }
        }
        ws
    }

    fn tiny_model(layout: HeadLayout) -> candle_core::Result<DistilBertQa> {
        let config: DistilBertConfig = serde_json::from_str(TINY_CONFIG).unwrap();
        let dims: EncoderDims = serde_json::from_str(TINY_CONFIG).unwrap();
        let vb = VarBuilder::from_tensors(tiny_weights(16, 8, layout), DType::F32, &Device::Cpu);
        DistilBertQa::load(vb, &config, dims, layout, "distilbert")
    }

    fn input(ids: &[u32]) -> TokenizedInput {
        TokenizedInput {
            input_ids: ids.to_vec(),
            attention_mask: vec![1; ids.len()],
            type_ids: vec![0; ids.len()],
        }
    }

    #[test]
    fn fused_head_scores_every_position() {
        let model = tiny_model(HeadLayout::Fused).unwrap();
        let logits = model.score(&input(&[1, 5, 2, 7, 9, 2])).unwrap();

        assert_eq!(logits.start.len(), 6);
        assert_eq!(logits.end.len(), 6);
        assert!(logits.start.iter().chain(&logits.end).all(|v| v.is_finite()));
    }

    #[test]
    fn split_head_scores_every_position() {
        let model = tiny_model(HeadLayout::Split).unwrap();
        let logits = model.score(&input(&[1, 3, 2])).unwrap();

        assert_eq!(logits.start.len(), 3);
        assert_eq!(logits.end.len(), 3);
    }

    #[test]
    fn scoring_is_deterministic() {
        let model = tiny_model(HeadLayout::Fused).unwrap();
        let first = model.score(&input(&[1, 4, 2, 6, 2])).unwrap();
        let second = model.score(&input(&[1, 4, 2, 6, 2])).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn mismatched_head_layout_fails_to_load() {
        let config: DistilBertConfig = serde_json::from_str(TINY_CONFIG).unwrap();
        let dims: EncoderDims = serde_json::from_str(TINY_CONFIG).unwrap();
        let vb = VarBuilder::from_tensors(
            tiny_weights(16, 8, HeadLayout::Split),
            DType::F32,
            &Device::Cpu,
        );

        assert!(DistilBertQa::load(vb, &config, dims, HeadLayout::Fused, "distilbert").is_err());
    }

    #[test]
    fn empty_input_is_rejected() {
        let model = tiny_model(HeadLayout::Fused).unwrap();
        assert!(model.score(&input(&[])).is_err());
    }
}
