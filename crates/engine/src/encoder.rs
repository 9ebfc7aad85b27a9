//! Speech encoder front
//!
//! Turns a 24 kHz mono reference waveform into a [`VoiceConditionals`]
//! record by running the `speech_encoder` model once. The output tensors
//! are copied into the record because their storage does not outlive the
//! runtime call.

use ndarray::Array2;

use voxclone_core::{Error, InputError, Result, RuntimeError, MIN_REFERENCE_SECS, SAMPLE_RATE};
use voxclone_runtime::{tensor, ModelHandle};

use crate::conditionals::{TensorData, VoiceConditionals};

/// Encoder output order: cond_emb, prompt_token, speaker_embeddings,
/// speaker_features.
const EXPECTED_OUTPUTS: usize = 4;

/// Run the speech encoder over a reference waveform.
///
/// The samples must already be 24 kHz mono in [-1, 1]; anything shorter
/// than the minimum reference duration is rejected.
pub fn encode_reference(
    handle: &mut ModelHandle,
    samples: &[f32],
) -> Result<VoiceConditionals> {
    let duration = reference_duration(samples)?;
    tracing::info!("running speech encoder on {duration:.2}s of audio");

    let input_name = handle
        .input_names()
        .first()
        .cloned()
        .ok_or_else(|| {
            Error::from(RuntimeError::Invocation {
                model: "speech_encoder".to_string(),
                message: "graph declares no inputs".to_string(),
            })
        })?;

    let waveform = Array2::from_shape_vec((1, samples.len()), samples.to_vec())
        .map_err(|e| Error::from(RuntimeError::Tensor(e.to_string())))?;
    let inputs = vec![(input_name, tensor::f32_matrix(waveform)?)];

    let outputs = handle.session_mut().run(inputs).map_err(|e| {
        Error::from(RuntimeError::Invocation {
            model: "speech_encoder".to_string(),
            message: e.to_string(),
        })
    })?;

    if outputs.len() < EXPECTED_OUTPUTS {
        return Err(RuntimeError::EncoderOutputs {
            got: outputs.len(),
            expected: EXPECTED_OUTPUTS,
        }
        .into());
    }

    let (cond_shape, cond_data) = tensor::extract_f32(&outputs[0])?;
    let (prompt_shape, prompt_data) = tensor::extract_i64(&outputs[1])?;
    let (spk_emb_shape, spk_emb_data) = tensor::extract_f32(&outputs[2])?;
    let (spk_feat_shape, spk_feat_data) = tensor::extract_f32(&outputs[3])?;

    let conds = VoiceConditionals {
        cond_emb: TensorData::new(cond_shape, cond_data),
        prompt_token: TensorData::new(prompt_shape, prompt_data),
        speaker_embeddings: TensorData::new(spk_emb_shape, spk_emb_data),
        speaker_features: TensorData::new(spk_feat_shape, spk_feat_data),
    };

    tracing::info!(
        cond_emb = ?conds.cond_emb.shape,
        prompt_token = ?conds.prompt_token.shape,
        speaker_embeddings = ?conds.speaker_embeddings.shape,
        speaker_features = ?conds.speaker_features.shape,
        "voice conditionals prepared"
    );

    Ok(conds)
}

/// Duration gate for reference audio at the engine's sample rate.
fn reference_duration(samples: &[f32]) -> Result<f32> {
    let duration = samples.len() as f32 / SAMPLE_RATE as f32;
    if duration < MIN_REFERENCE_SECS {
        return Err(InputError::ReferenceTooShort {
            got: duration,
            min: MIN_REFERENCE_SECS,
        }
        .into());
    }
    Ok(duration)
}
