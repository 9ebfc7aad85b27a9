//! Layered settings for the CLI
//!
//! Defaults < optional `voxclone.toml` < `VOXCLONE_*` environment
//! variables < command-line flags (applied by the caller).

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use voxclone_core::GenerationConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding the ONNX models and tokenizer.
    pub models_dir: PathBuf,
    /// Directory for persisted voice conditionals.
    pub cache_dir: PathBuf,
    /// Quantization variant name (fp32, q8, q4, q4f16).
    pub variant: String,
    /// Persist freshly encoded voices to the cache directory.
    pub persist_voices: bool,
    /// Default sampling parameters.
    pub generation: GenerationConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            cache_dir: PathBuf::from("voices"),
            variant: "q4".to_string(),
            persist_voices: true,
            generation: GenerationConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings, layering an optional file and the environment over
    /// the defaults.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        builder = match file {
            Some(path) => builder.add_source(File::from(path.to_path_buf())),
            None => builder.add_source(File::with_name("voxclone").required(false)),
        };
        builder = builder.add_source(Environment::with_prefix("VOXCLONE").separator("__"));
        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.variant, "q4");
        assert!(settings.persist_voices);
        assert_eq!(settings.generation.max_new_tokens, 1024);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.cache_dir, PathBuf::from("voices"));
    }
}
