use std::path::PathBuf;

use anyhow::Result;
use clap::ValueEnum;
use clap_serde_derive::ClapSerde;
use serde::{Deserialize, Serialize};

#[derive(ClapSerde, Serialize, Debug, Clone)]
pub struct Config {
    /// The address the listener binds to
    #[default("0.0.0.0".to_string())]
    #[arg(short, long, env)]
    pub address: String,

    /// The port the listener binds to
    #[default(25566)]
    #[arg(short, long, env)]
    pub port: u16,

    /// Directory holding the trained checkpoints
    #[default(PathBuf::from("models"))]
    #[arg(long, env)]
    pub models_dir: PathBuf,

    /// Checkpoint file name inside the models directory (.pth, .pt, .bin or .safetensors)
    #[default("custom_model_fquad_distilbert.pth".to_string())]
    #[arg(long, env)]
    pub checkpoint: String,

    /// Hub repository id or local directory providing tokenizer.json and config.json
    #[default("distilbert-base-uncased".to_string())]
    #[arg(long, env)]
    pub tokenizer_source: String,

    /// Revision of the hub repository
    #[default("main".to_string())]
    #[arg(long, env)]
    pub tokenizer_revision: String,

    /// Compute device used for inference
    #[default(DeviceChoice::Auto)]
    #[arg(long, env, value_enum)]
    pub device: DeviceChoice,

    /// Parameter layout of the start/end scoring head
    #[default(HeadLayout::Fused)]
    #[arg(long, env, value_enum)]
    pub head_layout: HeadLayout,

    /// Prefix of the encoder weights in the checkpoint
    #[default("distilbert".to_string())]
    #[arg(long, env)]
    pub encoder_prefix: String,

    /// Maximum number of tokens fed to the model, context is truncated first
    #[default(512)]
    #[arg(long, env)]
    pub max_sequence_length: usize,

    /// Seconds a single forward pass may take when serving
    #[default(30)]
    #[arg(long, env)]
    pub request_timeout: u64,

    /// OTLP collector endpoint, telemetry export is disabled when empty
    #[default(String::new())]
    #[arg(long, env)]
    pub otel_endpoint: String,

    /// Also log to the console when exporting telemetry
    #[default(true)]
    #[arg(long, env)]
    pub console_log: bool,
}

impl Config {
    pub fn from_toml(path: &str) -> Result<<Config as ClapSerde>::Opt> {
        let str = std::fs::read_to_string(path)?;
        let config = toml::from_str(&str)?;
        Ok(config)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.models_dir.join(&self.checkpoint)
    }

    pub fn otel_endpoint(&self) -> Option<String> {
        if self.otel_endpoint.is_empty() {
            None
        } else {
            Some(self.otel_endpoint.clone())
        }
    }
}

#[derive(ValueEnum, Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceChoice {
    /// CUDA, then Metal, then CPU, whichever is available first
    Auto,
    Cpu,
    Cuda,
    Metal,
}

#[derive(ValueEnum, Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HeadLayout {
    /// A single `qa_outputs` projection producing both scores
    Fused,
    /// Separate `start_outputs` and `end_outputs` projections
    Split,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_overrides_defaults() {
        let opt: <Config as ClapSerde>::Opt = toml::from_str(
            r#"
            port = 8080
            device = "cpu"
            head_layout = "split"
            models_dir = "/srv/models"
            "#,
        )
        .unwrap();
        let config = Config::from(opt);

        assert_eq!(config.port, 8080);
        assert_eq!(config.device, DeviceChoice::Cpu);
        assert_eq!(config.head_layout, HeadLayout::Split);
        assert_eq!(config.address, "0.0.0.0");
        assert_eq!(
            config.checkpoint_path(),
            PathBuf::from("/srv/models/custom_model_fquad_distilbert.pth")
        );
    }

    #[test]
    fn empty_endpoint_disables_export() {
        let config = Config::default();
        assert_eq!(config.otel_endpoint(), None);
        assert_eq!(config.max_sequence_length, 512);
    }
}
