//! Constants tied to the trained Chatterbox-style model family.
//!
//! These values must match the exported ONNX graphs; changing any of them
//! without re-exporting the models produces garbage audio.

/// Output sample rate of the conditional decoder.
pub const SAMPLE_RATE: u32 = 24_000;

/// Sample rate the speech tokenizer was trained at.
pub const SPEECH_TOKENIZER_RATE: u32 = 16_000;

/// Token that opens every generated speech sequence.
pub const START_SPEECH_TOKEN: i64 = 6561;

/// Token the language model emits to terminate a speech sequence.
pub const STOP_SPEECH_TOKEN: i64 = 6562;

/// Speech token decoding to silence; appended as padding before vocoding.
pub const SILENCE_TOKEN: i64 = 4299;

/// Number of silence tokens appended to the decoder input.
pub const SILENCE_PAD_TOKENS: usize = 3;

/// Text sentinel appended twice to every tokenized input.
pub const TEXT_SENTINEL_TOKEN: i64 = 50256;

/// KV heads in the language model.
pub const NUM_KV_HEADS: i64 = 16;

/// Per-head dimension of the language model KV cache.
pub const HEAD_DIM: i64 = 64;

/// Minimum reference-audio duration accepted by the speech encoder.
pub const MIN_REFERENCE_SECS: f32 = 5.0;
