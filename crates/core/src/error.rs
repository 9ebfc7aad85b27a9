//! Error types for the voxclone engine

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for the engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("input error: {0}")]
    Input(#[from] InputError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("audio error: {0}")]
    Audio(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Model loading and readiness errors
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    NotFound(String),

    #[error("failed to load model '{name}': {message}")]
    Load { name: String, message: String },

    #[error("model '{0}' already loaded")]
    AlreadyLoaded(String),

    #[error("unsupported quantization variant: {0}")]
    UnsupportedVariant(String),

    #[error("models not loaded")]
    NotReady,
}

/// Caller input errors (user-recoverable)
#[derive(Error, Debug)]
pub enum InputError {
    #[error("reference audio must be at least {min:.1}s, got {got:.2}s")]
    ReferenceTooShort { got: f32, min: f32 },

    #[error("no input tokens")]
    EmptyTokens,

    #[error("voice conditionals not prepared or invalid")]
    ConditionalsInvalid,
}

/// Inference-time errors surfaced from the tensor runtime
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("onnx runtime error in {model}: {message}")]
    Invocation { model: String, message: String },

    #[error("failed to build tensor: {0}")]
    Tensor(String),

    #[error("speech encoder returned {got} outputs, expected {expected}")]
    EncoderOutputs { got: usize, expected: usize },

    #[error("token embedding failed: {0}")]
    Embedding(String),

    #[error("language model failed: {0}")]
    LanguageModel(String),

    #[error("conditional decoder failed: {0}")]
    Decoder(String),
}

/// Voice-conditionals cache errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache read failed for '{key}': {message}")]
    Read { key: String, message: String },

    #[error("cache write failed for '{key}': {message}")]
    Write { key: String, message: String },

    #[error("cache blob has wrong magic or version")]
    Format,
}

impl Error {
    /// Create an audio error from any displayable source
    pub fn audio<S: Into<String>>(msg: S) -> Self {
        Error::Audio(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let err = Error::from(ModelError::Load {
            name: "language_model".to_string(),
            message: "bad protobuf".to_string(),
        });
        let text = err.to_string();
        assert!(text.contains("language_model"));
        assert!(text.contains("bad protobuf"));
    }

    #[test]
    fn test_input_error_reference_too_short() {
        let err = InputError::ReferenceTooShort { got: 3.2, min: 5.0 };
        assert!(err.to_string().contains("3.20"));
    }
}
