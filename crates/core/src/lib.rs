//! Core types for the voxclone TTS engine
//!
//! This crate provides foundational types used across all other crates:
//! - Model constants (sample rates, speech tokens, KV-cache geometry)
//! - Error types
//! - Generation and quantization configuration

pub mod constants;
pub mod error;
pub mod types;

pub use constants::*;
pub use error::{CacheError, Error, InputError, ModelError, Result, RuntimeError};
pub use types::{GenerationConfig, QuantVariant, TokenSequence};
