//! TTS engine orchestration
//!
//! Owns the four model sessions and runs the staged synthesis pipeline:
//! prefill embedding, autoregressive decode with KV-cache reuse, decoder
//! token assembly, and waveform decoding. One generation call runs at a
//! time per engine; parallelism lives inside the runtime's thread pools.

use std::path::Path;
use std::time::Instant;

use ort::session::SessionInputValue;
use ort::value::DynValue;
use rand::rngs::StdRng;
use rand::SeedableRng;

use voxclone_core::{
    Error, GenerationConfig, InputError, ModelError, QuantVariant, Result, RuntimeError,
    HEAD_DIM, NUM_KV_HEADS, SAMPLE_RATE, SILENCE_PAD_TOKENS, SILENCE_TOKEN, START_SPEECH_TOKEN,
    STOP_SPEECH_TOKEN,
};
use voxclone_runtime::{tensor, SessionManager, SessionManagerOptions};

use crate::conditionals::VoiceConditionals;
use crate::encoder;
use crate::paths::{self, COND_DECODER, EMBED_TOKENS, LANGUAGE_MODEL, MODEL_NAMES, SPEECH_ENCODER};
use crate::sampling;

/// Progress callback: `(current_step, max_steps)`.
pub type ProgressFn<'a> = &'a mut dyn FnMut(usize, usize);

/// Zero-shot voice-cloning TTS engine.
pub struct TtsEngine {
    variant: QuantVariant,
    sessions: SessionManager,
    session_options: SessionManagerOptions,
    conds: Option<VoiceConditionals>,
    models_loaded: bool,
    rng: StdRng,
}

impl TtsEngine {
    pub fn new(variant: QuantVariant) -> Self {
        Self::with_options(variant, SessionManagerOptions::default())
    }

    pub fn with_options(variant: QuantVariant, options: SessionManagerOptions) -> Self {
        Self {
            variant,
            sessions: SessionManager::new(options.clone()),
            session_options: options,
            conds: None,
            models_loaded: false,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn variant(&self) -> QuantVariant {
        self.variant
    }

    /// Output sample rate of generated audio.
    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    /// Load the four model sessions from `models_dir`.
    ///
    /// Accepts a directory containing `onnx/`, a HuggingFace cache root, or
    /// the ONNX directory itself. Any previously loaded sessions are torn
    /// down first.
    pub fn load_models(&mut self, models_dir: &Path) -> Result<()> {
        self.models_loaded = false;
        self.sessions = SessionManager::new(self.session_options.clone());

        let onnx_dir = paths::resolve_onnx_dir(models_dir)
            .ok_or_else(|| ModelError::NotFound(models_dir.display().to_string()))?;
        tracing::info!(
            dir = %onnx_dir.display(),
            variant = %self.variant,
            "loading onnx models"
        );

        for name in MODEL_NAMES {
            let path = onnx_dir.join(paths::model_filename(name, self.variant));
            self.sessions.load(name, &path)?;
        }

        self.models_loaded = true;
        tracing::info!("all onnx models loaded");
        Ok(())
    }

    /// Drop every session; `is_ready` returns false afterwards.
    pub fn unload_models(&mut self) {
        self.sessions.unload_all();
        self.models_loaded = false;
    }

    pub fn is_ready(&self) -> bool {
        self.models_loaded && MODEL_NAMES.iter().all(|n| self.sessions.is_loaded(n))
    }

    /// Run the speech encoder over a reference recording and install the
    /// resulting conditionals. The file is decoded, downmixed, resampled to
    /// 24 kHz, and peak-normalized before encoding.
    pub fn prepare_conditionals(&mut self, reference_path: &Path) -> Result<()> {
        if !self.is_ready() {
            return Err(ModelError::NotReady.into());
        }
        let samples = voxclone_audio::load_reference(reference_path, SAMPLE_RATE)?;
        self.prepare_conditionals_from_samples(&samples)
    }

    /// Run the speech encoder over pre-decoded 24 kHz mono samples.
    ///
    /// Leaves the current conditionals untouched when encoding fails (a too
    /// short reference included).
    pub fn prepare_conditionals_from_samples(&mut self, samples: &[f32]) -> Result<()> {
        if !self.is_ready() {
            return Err(ModelError::NotReady.into());
        }
        let handle = self.sessions.get_mut(SPEECH_ENCODER)?;
        let conds = encoder::encode_reference(handle, samples)?;
        self.conds = Some(conds);
        Ok(())
    }

    /// Install pre-computed conditionals (e.g. from the cache).
    pub fn set_conditionals(&mut self, conds: VoiceConditionals) {
        self.conds = Some(conds);
    }

    pub fn conditionals(&self) -> Option<&VoiceConditionals> {
        self.conds.as_ref()
    }

    pub fn has_conditionals(&self) -> bool {
        self.conds.as_ref().map_or(false, |c| c.is_valid())
    }

    /// Generate 24 kHz f32 audio for a token-ID sequence.
    ///
    /// The sequence must already carry the two trailing text sentinels; the
    /// engine prepends nothing to it. A failure at any stage discards any
    /// partial output and leaves the engine state unchanged.
    pub fn generate(
        &mut self,
        token_ids: &[i64],
        config: &GenerationConfig,
        mut progress: Option<ProgressFn<'_>>,
    ) -> Result<Vec<f32>> {
        if !self.is_ready() {
            return Err(ModelError::NotReady.into());
        }
        if !self.has_conditionals() {
            return Err(InputError::ConditionalsInvalid.into());
        }
        if token_ids.is_empty() {
            return Err(InputError::EmptyTokens.into());
        }

        if config.seed != 0 {
            self.rng = StdRng::seed_from_u64(config.seed);
        }

        let started = Instant::now();
        let generated = self.decode_speech_tokens(
            token_ids,
            config,
            progress.as_mut().map(|p| &mut **p as ProgressFn<'_>),
        )?;
        let audio = self.decode_audio(&generated)?;

        let elapsed = started.elapsed().as_secs_f32();
        let seconds = audio.len() as f32 / SAMPLE_RATE as f32;
        tracing::info!(
            tokens = generated.len(),
            audio_secs = format!("{seconds:.2}"),
            rtf = format!("{:.2}", elapsed / seconds.max(1e-6)),
            "generation finished"
        );
        Ok(audio)
    }

    /// Stages S1 and S2: prefill embedding plus the autoregressive loop.
    fn decode_speech_tokens(
        &mut self,
        token_ids: &[i64],
        config: &GenerationConfig,
        mut progress: Option<ProgressFn<'_>>,
    ) -> Result<Vec<i64>> {
        let conds = self.conds.as_ref().ok_or(InputError::ConditionalsInvalid)?;
        let cond_seq_len = conds.cond_emb.dim(1) as usize;
        let hidden = conds.cond_emb.dim(2);
        if hidden <= 0 {
            return Err(InputError::ConditionalsInvalid.into());
        }

        // S1: embed the whole text once, then splice it after cond_emb.
        let text_embeds = run_embed_tokens(&mut self.sessions, token_ids)?;
        let text_seq_len = token_ids.len();
        let mut prefill_embeds =
            Vec::with_capacity(conds.cond_emb.data.len() + text_embeds.len());
        prefill_embeds.extend_from_slice(&conds.cond_emb.data);
        prefill_embeds.extend_from_slice(&text_embeds);
        drop(text_embeds);

        // LM graph metadata, resolved once before the loop.
        let lm = self.sessions.get_mut(LANGUAGE_MODEL)?;
        let lm_input_names = lm.input_names().to_vec();
        let lm_output_names = lm.output_names().to_vec();
        let (kv_names, input_to_slot) = kv_slot_mapping(&lm_input_names);
        if lm_output_names.len() < kv_names.len() + 1 {
            return Err(RuntimeError::LanguageModel(format!(
                "expected {} outputs, graph declares {}",
                kv_names.len() + 1,
                lm_output_names.len()
            ))
            .into());
        }
        let kv_output_names = lm_output_names[1..=kv_names.len()].to_vec();
        let kv_fp16 = self.variant.kv_cache_fp16();
        tracing::debug!(
            kv_slots = kv_names.len(),
            kv_fp16,
            "starting generation: {} text tokens, max {} new",
            text_seq_len,
            config.max_new_tokens
        );

        let mut generated: Vec<i64> = vec![START_SPEECH_TOKEN];
        let mut kv_slots: Vec<Option<DynValue>> = (0..kv_names.len()).map(|_| None).collect();

        // Working buffers, reserved once to their maximum length.
        let max_total_len = cond_seq_len + text_seq_len + config.max_new_tokens;
        let mut attention_mask: Vec<i64> = Vec::with_capacity(max_total_len);
        let mut position: i64 = 0;
        let mut prefill = Some(prefill_embeds);

        for step in 0..config.max_new_tokens {
            if let Some(cb) = progress.as_deref_mut() {
                cb(step, config.max_new_tokens);
            }

            let (embeds, seq_len) = match prefill.take() {
                Some(embeds) => (embeds, cond_seq_len + text_seq_len),
                None => {
                    let last = generated[generated.len() - 1];
                    (run_embed_tokens(&mut self.sessions, &[last])?, 1)
                }
            };

            let total_len = position as usize + seq_len;
            attention_mask.resize(total_len, 1);
            let position_ids: Vec<i64> = (position..position + seq_len as i64).collect();

            // Bind the LM inputs in graph order; KV slots move in without
            // copying, the first step sends zero-length placeholders.
            let mut inputs: Vec<(String, SessionInputValue<'static>)> =
                Vec::with_capacity(lm_input_names.len());
            let mut embeds = Some(embeds);
            for (idx, name) in lm_input_names.iter().enumerate() {
                let value = if let Some(slot) = input_to_slot[idx] {
                    match kv_slots[slot].take() {
                        Some(prev) => tensor::reuse(prev),
                        None if kv_fp16 => {
                            tensor::f16_empty(vec![1, NUM_KV_HEADS, 0, HEAD_DIM])?
                        }
                        None => tensor::f32_empty(vec![1, NUM_KV_HEADS, 0, HEAD_DIM])?,
                    }
                } else {
                    match name.as_str() {
                        "inputs_embeds" => {
                            let data = embeds.take().ok_or_else(|| {
                                RuntimeError::LanguageModel(
                                    "graph declares inputs_embeds twice".to_string(),
                                )
                            })?;
                            tensor::f32_input(vec![1, seq_len as i64, hidden], data)?
                        }
                        "attention_mask" => {
                            tensor::i64_input(vec![1, total_len as i64], attention_mask.clone())?
                        }
                        "position_ids" => {
                            tensor::i64_input(vec![1, seq_len as i64], position_ids.clone())?
                        }
                        other => {
                            return Err(RuntimeError::LanguageModel(format!(
                                "unexpected language model input '{other}'"
                            ))
                            .into())
                        }
                    }
                };
                inputs.push((name.clone(), value));
            }

            let lm = self.sessions.get_mut(LANGUAGE_MODEL)?;
            let mut outputs = lm.session_mut().run(inputs).map_err(|e| {
                Error::from(RuntimeError::LanguageModel(e.to_string()))
            })?;

            // Only the last position's logits are materialized.
            let (vocab, mut logits) = tensor::extract_last_row_f32(&outputs[0])?;

            let history = if config.penalize_start_token {
                &generated[..]
            } else {
                &generated[1..]
            };
            sampling::apply_repetition_penalty(&mut logits, history, config.repetition_penalty);
            sampling::apply_temperature(&mut logits, config.temperature);
            if config.top_k > 0 && config.top_k < vocab {
                sampling::apply_top_k(&mut logits, config.top_k);
            }
            sampling::apply_top_p(&mut logits, config.top_p);
            sampling::softmax(&mut logits);
            let next = sampling::sample_index(&logits, &mut self.rng) as i64;

            generated.push(next);
            if next == STOP_SPEECH_TOKEN {
                tracing::debug!(step = step + 1, "stop token emitted");
                break;
            }

            position += seq_len as i64;

            // Present-KV outputs become next step's past-KV inputs by move.
            for (slot, name) in kv_output_names.iter().enumerate() {
                let value = outputs.remove(name.as_str()).ok_or_else(|| {
                    RuntimeError::LanguageModel(format!("missing present-KV output '{name}'"))
                })?;
                kv_slots[slot] = Some(value);
            }

            if (step + 1) % 100 == 0 {
                tracing::debug!("generated {} tokens", step + 1);
            }
        }

        tracing::debug!(total = generated.len(), "speech token decode complete");
        Ok(generated)
    }

    /// Stages S3 and S4: assemble the decoder input and vocode it.
    fn decode_audio(&mut self, generated: &[i64]) -> Result<Vec<f32>> {
        let conds = self.conds.as_ref().ok_or(InputError::ConditionalsInvalid)?;
        let decoder_tokens = assemble_decoder_tokens(generated, &conds.prompt_token.data);
        tracing::debug!(tokens = decoder_tokens.len(), "running conditional decoder");

        let decoder = self.sessions.get_mut(COND_DECODER)?;
        let input_names = decoder.input_names().to_vec();
        let mut inputs: Vec<(String, SessionInputValue<'static>)> =
            Vec::with_capacity(input_names.len());
        for name in &input_names {
            let value = match name.as_str() {
                "speech_tokens" => tensor::i64_input(
                    vec![1, decoder_tokens.len() as i64],
                    decoder_tokens.clone(),
                )?,
                "speaker_embeddings" => tensor::f32_input(
                    conds.speaker_embeddings.shape.clone(),
                    conds.speaker_embeddings.data.clone(),
                )?,
                "speaker_features" => tensor::f32_input(
                    conds.speaker_features.shape.clone(),
                    conds.speaker_features.data.clone(),
                )?,
                other => {
                    return Err(RuntimeError::Decoder(format!(
                        "unexpected decoder input '{other}'"
                    ))
                    .into())
                }
            };
            inputs.push((name.clone(), value));
        }

        let outputs = decoder
            .session_mut()
            .run(inputs)
            .map_err(|e| Error::from(RuntimeError::Decoder(e.to_string())))?;
        let (_, audio) = tensor::extract_f32(&outputs[0])?;
        Ok(audio)
    }
}

/// Embed a token sequence with the `embed_tokens` model, returning the raw
/// f32 embedding data.
fn run_embed_tokens(sessions: &mut SessionManager, token_ids: &[i64]) -> Result<Vec<f32>> {
    let handle = sessions.get_mut(EMBED_TOKENS)?;
    let input_name = handle
        .input_names()
        .first()
        .cloned()
        .ok_or_else(|| RuntimeError::Embedding("embed_tokens has no inputs".to_string()))?;
    let inputs = vec![(
        input_name,
        tensor::i64_input(vec![1, token_ids.len() as i64], token_ids.to_vec())?,
    )];
    let outputs = handle
        .session_mut()
        .run(inputs)
        .map_err(|e| Error::from(RuntimeError::Embedding(e.to_string())))?;
    let (_, data) = tensor::extract_f32(&outputs[0])?;
    if data.is_empty() {
        return Err(RuntimeError::Embedding("empty embedding output".to_string()).into());
    }
    Ok(data)
}

/// Map each LM input index to its KV slot, returning the KV input names in
/// slot order. Computed once per generation call.
fn kv_slot_mapping(input_names: &[String]) -> (Vec<String>, Vec<Option<usize>>) {
    let kv_names: Vec<String> = input_names
        .iter()
        .filter(|n| n.contains("past_key_values"))
        .cloned()
        .collect();
    let mapping = input_names
        .iter()
        .map(|n| kv_names.iter().position(|k| k == n))
        .collect();
    (kv_names, mapping)
}

/// Build the conditional-decoder token sequence: drop the leading start
/// token and the trailing stop token when present, append the silence
/// padding, and prepend the voice's prompt tokens.
fn assemble_decoder_tokens(generated: &[i64], prompt: &[i64]) -> Vec<i64> {
    let mut end = generated.len();
    if end > 0 && generated[end - 1] == STOP_SPEECH_TOKEN {
        end -= 1;
    }
    let speech = &generated[1.min(end)..end];

    let mut tokens = Vec::with_capacity(prompt.len() + speech.len() + SILENCE_PAD_TOKENS);
    tokens.extend_from_slice(prompt);
    tokens.extend_from_slice(speech);
    tokens.extend(std::iter::repeat(SILENCE_TOKEN).take(SILENCE_PAD_TOKENS));
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kv_slot_mapping_positions() {
        let names: Vec<String> = [
            "inputs_embeds",
            "attention_mask",
            "position_ids",
            "past_key_values.0.key",
            "past_key_values.0.value",
            "past_key_values.1.key",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let (kv_names, mapping) = kv_slot_mapping(&names);
        assert_eq!(kv_names.len(), 3);
        assert_eq!(mapping[0], None);
        assert_eq!(mapping[1], None);
        assert_eq!(mapping[2], None);
        assert_eq!(mapping[3], Some(0));
        assert_eq!(mapping[4], Some(1));
        assert_eq!(mapping[5], Some(2));
    }

    #[test]
    fn test_assemble_strips_start_and_stop() {
        let generated = vec![START_SPEECH_TOKEN, 100, 200, 300, STOP_SPEECH_TOKEN];
        let prompt = vec![7, 8];
        let tokens = assemble_decoder_tokens(&generated, &prompt);
        assert_eq!(
            tokens,
            vec![7, 8, 100, 200, 300, SILENCE_TOKEN, SILENCE_TOKEN, SILENCE_TOKEN]
        );
    }

    #[test]
    fn test_assemble_without_stop_token() {
        // Hitting max_new_tokens leaves no trailing stop token.
        let generated = vec![START_SPEECH_TOKEN, 100, 200];
        let tokens = assemble_decoder_tokens(&generated, &[]);
        assert_eq!(
            tokens,
            vec![100, 200, SILENCE_TOKEN, SILENCE_TOKEN, SILENCE_TOKEN]
        );
    }

    #[test]
    fn test_assemble_decoder_length_contract() {
        // Five sampled tokens plus stop: the decoder sees
        // |prompt| + 5 + 3 tokens.
        let generated = vec![START_SPEECH_TOKEN, 1, 2, 3, 4, 5, STOP_SPEECH_TOKEN];
        let prompt = vec![9; 4];
        let tokens = assemble_decoder_tokens(&generated, &prompt);
        assert_eq!(tokens.len(), prompt.len() + 5 + SILENCE_PAD_TOKENS);
    }

    #[test]
    fn test_assemble_start_only() {
        let tokens = assemble_decoder_tokens(&[START_SPEECH_TOKEN], &[1]);
        assert_eq!(tokens, vec![1, SILENCE_TOKEN, SILENCE_TOKEN, SILENCE_TOKEN]);
    }

    #[test]
    fn test_generate_requires_models() {
        let mut engine = TtsEngine::new(QuantVariant::Q4);
        let err = engine
            .generate(&[1, 2, 3], &GenerationConfig::default(), None)
            .unwrap_err();
        assert!(matches!(err, Error::Model(ModelError::NotReady)));
    }

    #[test]
    fn test_generate_requires_conditionals() {
        let mut engine = TtsEngine::new(QuantVariant::Q4);
        // Without models nothing else is reachable, so only the readiness
        // gate is observable here; conditionals gating is covered through
        // has_conditionals.
        assert!(!engine.has_conditionals());
        engine.set_conditionals(VoiceConditionals::default());
        assert!(!engine.has_conditionals());
    }
}
