use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use candle_transformers::models::distilbert::Config as DistilBertConfig;
use tracing::info;

use crate::config::{Config, HeadLayout};
use crate::inference::device::select_device;
use crate::inference::models::distilbert::{DistilBertQa, EncoderDims};
use crate::inference::models::model::SpanScorer;
use crate::inference::pretrained::PretrainedSource;
use crate::inference::qa_pipeline::QaPipeline;
use crate::inference::tokenizer::{PairTokenizer, TokenizerProvider};

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("Checkpoint {} does not exist", .0.display())]
    CheckpointNotFound(PathBuf),

    #[error("Checkpoint {} does not match the model architecture", path.display())]
    IncompatibleCheckpoint {
        path: PathBuf,
        source: candle_core::Error,
    },

    #[error("Cannot read checkpoint {}", path.display())]
    Checkpoint {
        path: PathBuf,
        source: candle_core::Error,
    },

    #[error("Unsupported checkpoint format {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Cannot fetch {file} from the hub")]
    Hub {
        file: String,
        source: hf_hub::api::sync::ApiError,
    },

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Model architecture error: {0}")]
    Architecture(String),

    #[error("Device error: {0}")]
    Device(String),
}

/// Anything able to produce the span-prediction model on a given device.
pub trait ModelProvider {
    fn load(&self, device: &Device) -> Result<Box<dyn SpanScorer>, LoadError>;
}

/// Loads DistilBERT weights plus the scoring head from a checkpoint on disk.
pub struct CheckpointModelProvider {
    pub checkpoint: PathBuf,
    pub architecture: DistilBertConfig,
    pub dims: EncoderDims,
    pub head_layout: HeadLayout,
    pub encoder_prefix: String,
}

impl CheckpointModelProvider {
    fn var_builder(&self, device: &Device) -> Result<VarBuilder<'static>, LoadError> {
        let path = &self.checkpoint;
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let vb = match extension {
            "pth" | "pt" | "bin" => VarBuilder::from_pth(path, DType::F32, device),
            // SAFETY: the file is only read, and is not expected to change while mapped.
            "safetensors" => unsafe {
                VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device)
            },
            _ => return Err(LoadError::UnsupportedFormat(path.clone())),
        };
        vb.map_err(|source| LoadError::Checkpoint {
            path: path.clone(),
            source,
        })
    }
}

impl ModelProvider for CheckpointModelProvider {
    #[tracing::instrument(level = "info", skip(self), fields(checkpoint = %self.checkpoint.display()))]
    fn load(&self, device: &Device) -> Result<Box<dyn SpanScorer>, LoadError> {
        if !self.checkpoint.is_file() {
            return Err(LoadError::CheckpointNotFound(self.checkpoint.clone()));
        }

        let vb = self.var_builder(device)?;
        let model = DistilBertQa::load(
            vb,
            &self.architecture,
            self.dims,
            self.head_layout,
            &self.encoder_prefix,
        )
        .map_err(|source| LoadError::IncompatibleCheckpoint {
            path: self.checkpoint.clone(),
            source,
        })?;

        info!("Loaded checkpoint on {:?}", device);
        Ok(Box::new(model))
    }
}

/// Builds the model and its tokenizer. Called once per process, the result is read-only.
pub fn load_qa_model(
    models: &dyn ModelProvider,
    tokenizers: &dyn TokenizerProvider,
    device: &Device,
    max_sequence_length: usize,
) -> Result<QaPipeline, LoadError> {
    let model = models.load(device)?;
    let tokenizer = PairTokenizer::new(tokenizers.tokenizer()?, max_sequence_length)
        .map_err(|e| LoadError::Tokenizer(e.to_string()))?;

    Ok(QaPipeline::new(model, tokenizer))
}

/// Resolves every artifact named by the configuration and loads the pipeline.
/// The checkpoint is checked first so a missing file is reported before any hub access.
pub fn load_configured(config: &Config) -> Result<(QaPipeline, Device), LoadError> {
    let checkpoint = config.checkpoint_path();
    if !checkpoint.is_file() {
        return Err(LoadError::CheckpointNotFound(checkpoint));
    }

    let device = select_device(config.device).map_err(|e| LoadError::Device(e.to_string()))?;
    let source = PretrainedSource::resolve(&config.tokenizer_source, &config.tokenizer_revision)?;
    let (architecture, dims) = source.architecture()?;

    let max_sequence_length = effective_max_length(config.max_sequence_length, dims);
    let models = CheckpointModelProvider {
        checkpoint,
        architecture,
        dims,
        head_layout: config.head_layout,
        encoder_prefix: config.encoder_prefix.clone(),
    };

    let pipeline = load_qa_model(&models, &source, &device, max_sequence_length)?;
    Ok((pipeline, device))
}

/// Token limit actually applied, the encoder has no position embeddings past its maximum.
pub fn effective_max_length(configured: usize, dims: EncoderDims) -> usize {
    configured.min(dims.max_position_embeddings)
}

pub(crate) fn read_architecture(path: &Path) -> Result<(DistilBertConfig, EncoderDims), LoadError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| LoadError::Architecture(format!("{}: {e}", path.display())))?;
    let config = serde_json::from_str(&raw)
        .map_err(|e| LoadError::Architecture(format!("{}: {e}", path.display())))?;
    let dims = serde_json::from_str(&raw)
        .map_err(|e| LoadError::Architecture(format!("{}: {e}", path.display())))?;
    Ok((config, dims))
}
