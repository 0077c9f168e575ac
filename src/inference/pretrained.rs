use std::path::{Path, PathBuf};

use candle_transformers::models::distilbert::Config as DistilBertConfig;
use hf_hub::api::sync::{Api, ApiRepo};
use hf_hub::{Repo, RepoType};
use tokenizers::Tokenizer;

use crate::inference::loader::{read_architecture, LoadError};
use crate::inference::models::distilbert::EncoderDims;
use crate::inference::tokenizer::TokenizerProvider;

const TOKENIZER_FILENAME: &str = "tokenizer.json";
const ARCHITECTURE_FILENAME: &str = "config.json";

/// Where the pretrained tokenizer and encoder architecture are read from.
pub enum PretrainedSource {
    Hub(ApiRepo),
    Local(PathBuf),
}

impl PretrainedSource {
    /// An existing directory is used as is, anything else is treated as a hub repository id.
    #[tracing::instrument(level = "info")]
    pub fn resolve(source: &str, revision: &str) -> Result<Self, LoadError> {
        let path = Path::new(source);
        if path.is_dir() {
            return Ok(PretrainedSource::Local(path.to_path_buf()));
        }

        let api = Api::new().map_err(|source| LoadError::Hub {
            file: String::new(),
            source,
        })?;
        Ok(PretrainedSource::Hub(api.repo(Repo::with_revision(
            source.into(),
            RepoType::Model,
            revision.into(),
        ))))
    }

    fn file(&self, name: &str) -> Result<PathBuf, LoadError> {
        match self {
            PretrainedSource::Hub(repo) => repo.get(name).map_err(|source| LoadError::Hub {
                file: name.into(),
                source,
            }),
            PretrainedSource::Local(dir) => Ok(dir.join(name)),
        }
    }

    pub fn architecture(&self) -> Result<(DistilBertConfig, EncoderDims), LoadError> {
        read_architecture(&self.file(ARCHITECTURE_FILENAME)?)
    }
}

impl std::fmt::Debug for PretrainedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PretrainedSource::Hub(repo) => write!(f, "Hub({})", repo.url(TOKENIZER_FILENAME)),
            PretrainedSource::Local(dir) => write!(f, "Local({})", dir.display()),
        }
    }
}

impl TokenizerProvider for PretrainedSource {
    fn tokenizer(&self) -> Result<Tokenizer, LoadError> {
        let path = self.file(TOKENIZER_FILENAME)?;
        Tokenizer::from_file(&path)
            .map_err(|e| LoadError::Tokenizer(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::tokenizer::tests::FIXTURE;

    #[test]
    fn local_directory_is_read_offline() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TOKENIZER_FILENAME), FIXTURE).unwrap();
        std::fs::write(
            dir.path().join(ARCHITECTURE_FILENAME),
            r#"{"vocab_size": 16, "dim": 8, "n_layers": 1, "n_heads": 2, "hidden_dim": 16,
                "activation": "gelu", "max_position_embeddings": 32, "initializer_range": 0.02,
                "pad_token_id": 0, "model_type": "distilbert"}"#,
        )
        .unwrap();

        let source = PretrainedSource::resolve(dir.path().to_str().unwrap(), "main").unwrap();
        assert!(matches!(source, PretrainedSource::Local(_)));

        let tokenizer = source.tokenizer().unwrap();
        assert_eq!(tokenizer.token_to_id("[CLS]"), Some(101));
        assert_eq!(source.architecture().unwrap().1.dim, 8);
    }

    #[test]
    fn missing_local_tokenizer_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = PretrainedSource::Local(dir.path().to_path_buf());

        assert!(matches!(source.tokenizer(), Err(LoadError::Tokenizer(_))));
        assert!(matches!(source.architecture(), Err(LoadError::Architecture(_))));
    }
}
