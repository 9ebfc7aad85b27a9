//! Configuration records for model selection and generation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// Pre-quantized weight variant.
///
/// Selects the ONNX file set on disk and determines the element type of the
/// language model's KV cache: fp16 for [`QuantVariant::Q4F16`], fp32 for
/// everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantVariant {
    Fp32,
    Q8,
    Q4,
    Q4F16,
}

impl QuantVariant {
    /// File-name suffix inserted before `.onnx`.
    pub fn file_suffix(self) -> &'static str {
        match self {
            QuantVariant::Fp32 => "",
            QuantVariant::Q8 => "_quantized",
            QuantVariant::Q4 => "_q4",
            QuantVariant::Q4F16 => "_q4f16",
        }
    }

    /// Whether the language model expects an fp16 KV cache.
    pub fn kv_cache_fp16(self) -> bool {
        matches!(self, QuantVariant::Q4F16)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QuantVariant::Fp32 => "fp32",
            QuantVariant::Q8 => "q8",
            QuantVariant::Q4 => "q4",
            QuantVariant::Q4F16 => "q4f16",
        }
    }
}

impl fmt::Display for QuantVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuantVariant {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fp32" => Ok(QuantVariant::Fp32),
            "q8" => Ok(QuantVariant::Q8),
            "q4" => Ok(QuantVariant::Q4),
            "q4f16" => Ok(QuantVariant::Q4F16),
            other => Err(ModelError::UnsupportedVariant(other.to_string())),
        }
    }
}

/// Sampling parameters for one generation call.
///
/// Values are snapshotted when [`generate`] starts; changing the config
/// mid-call has no effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Maximum speech tokens to generate.
    pub max_new_tokens: usize,
    /// Penalty applied to every token already in the history (>1 reduces repetition).
    pub repetition_penalty: f32,
    /// Sampling temperature; must be positive.
    pub temperature: f32,
    /// Top-k filter; 0 disables it.
    pub top_k: usize,
    /// Nucleus sampling threshold in (0, 1]; 1.0 disables it.
    pub top_p: f32,
    /// Random seed; 0 keeps the engine's entropy-seeded RNG.
    pub seed: u64,
    /// Apply the repetition penalty to the start-of-speech token too.
    pub penalize_start_token: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 1024,
            repetition_penalty: 1.2,
            temperature: 0.8,
            top_k: 1000,
            top_p: 0.95,
            seed: 0,
            penalize_start_token: true,
        }
    }
}

/// Token IDs produced by the tokenizer front, with the source text kept for
/// logging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenSequence {
    pub ids: Vec<i64>,
    pub text: Option<String>,
}

impl TokenSequence {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_config_defaults() {
        let config = GenerationConfig::default();
        assert_eq!(config.max_new_tokens, 1024);
        assert_eq!(config.repetition_penalty, 1.2);
        assert_eq!(config.temperature, 0.8);
        assert_eq!(config.top_k, 1000);
        assert_eq!(config.top_p, 0.95);
        assert_eq!(config.seed, 0);
        assert!(config.penalize_start_token);
    }

    #[test]
    fn test_variant_suffixes() {
        assert_eq!(QuantVariant::Fp32.file_suffix(), "");
        assert_eq!(QuantVariant::Q8.file_suffix(), "_quantized");
        assert_eq!(QuantVariant::Q4.file_suffix(), "_q4");
        assert_eq!(QuantVariant::Q4F16.file_suffix(), "_q4f16");
    }

    #[test]
    fn test_only_q4f16_uses_fp16_kv_cache() {
        assert!(QuantVariant::Q4F16.kv_cache_fp16());
        assert!(!QuantVariant::Fp32.kv_cache_fp16());
        assert!(!QuantVariant::Q8.kv_cache_fp16());
        assert!(!QuantVariant::Q4.kv_cache_fp16());
    }

    #[test]
    fn test_variant_round_trips_through_str() {
        for v in [
            QuantVariant::Fp32,
            QuantVariant::Q8,
            QuantVariant::Q4,
            QuantVariant::Q4F16,
        ] {
            assert_eq!(v.as_str().parse::<QuantVariant>().unwrap(), v);
        }
        assert!("int8".parse::<QuantVariant>().is_err());
    }
}
