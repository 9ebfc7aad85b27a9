//! Voice-cloning TTS inference engine
//!
//! Orchestrates four ONNX models (speech encoder, token embedder,
//! autoregressive language model, conditional decoder) into a synthesis
//! pipeline with zero-copy KV-cache reuse, and fronts the speech encoder
//! with a two-tier (memory + disk) voice-conditionals cache.

pub mod cache;
pub mod conditionals;
pub mod encoder;
pub mod engine;
pub mod paths;
pub mod sampling;
pub mod text;

pub use cache::{CacheStats, ConditionalsCache};
pub use conditionals::{TensorData, VoiceConditionals};
pub use engine::TtsEngine;
pub use text::{normalize_text, TextTokenizer};

pub use voxclone_core::{Error, GenerationConfig, QuantVariant, Result, TokenSequence};
