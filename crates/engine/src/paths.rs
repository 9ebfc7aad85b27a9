//! Model file layout
//!
//! The four graphs live together in one ONNX directory, which callers may
//! point at directly, through a `models/onnx` layout, or through a
//! HuggingFace hub cache (`models--<org>--<repo>/snapshots/<hash>/onnx`).

use std::fs;
use std::path::{Path, PathBuf};

use voxclone_core::QuantVariant;

pub const SPEECH_ENCODER: &str = "speech_encoder";
pub const EMBED_TOKENS: &str = "embed_tokens";
pub const LANGUAGE_MODEL: &str = "language_model";
pub const COND_DECODER: &str = "conditional_decoder";

/// Logical model names, in load order.
pub const MODEL_NAMES: [&str; 4] = [SPEECH_ENCODER, EMBED_TOKENS, LANGUAGE_MODEL, COND_DECODER];

/// File name for a model at the given quantization variant.
pub fn model_filename(name: &str, variant: QuantVariant) -> String {
    format!("{name}{}.onnx", variant.file_suffix())
}

/// Locate the directory holding the `.onnx` files.
pub fn resolve_onnx_dir(models_dir: &Path) -> Option<PathBuf> {
    let direct = models_dir.join("onnx");
    if direct.is_dir() {
        return Some(direct);
    }

    if let Some(snapshot) = find_hub_snapshot(models_dir) {
        return Some(snapshot);
    }

    if models_dir.is_dir() {
        return Some(models_dir.to_path_buf());
    }
    None
}

/// Walk a HuggingFace cache root looking for `models--*/snapshots/*/onnx`.
fn find_hub_snapshot(root: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(root).ok()?;
    for entry in entries.flatten() {
        let repo = entry.path();
        let is_repo = repo.is_dir()
            && repo
                .file_name()
                .map_or(false, |n| n.to_string_lossy().starts_with("models--"));
        if !is_repo {
            continue;
        }
        let snapshots = repo.join("snapshots");
        let Ok(snaps) = fs::read_dir(&snapshots) else {
            continue;
        };
        for snap in snaps.flatten() {
            let onnx = snap.path().join("onnx");
            if onnx.is_dir() {
                return Some(onnx);
            }
        }
    }
    None
}

/// Candidate locations for `tokenizer.json` relative to the models dir.
pub fn tokenizer_path(models_dir: &Path) -> Option<PathBuf> {
    let direct = models_dir.join("tokenizer.json");
    if direct.is_file() {
        return Some(direct);
    }
    let onnx_dir = resolve_onnx_dir(models_dir)?;
    let beside_onnx = onnx_dir.parent()?.join("tokenizer.json");
    if beside_onnx.is_file() {
        return Some(beside_onnx);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_filenames_per_variant() {
        assert_eq!(
            model_filename(LANGUAGE_MODEL, QuantVariant::Fp32),
            "language_model.onnx"
        );
        assert_eq!(
            model_filename(LANGUAGE_MODEL, QuantVariant::Q8),
            "language_model_quantized.onnx"
        );
        assert_eq!(
            model_filename(SPEECH_ENCODER, QuantVariant::Q4),
            "speech_encoder_q4.onnx"
        );
        assert_eq!(
            model_filename(COND_DECODER, QuantVariant::Q4F16),
            "conditional_decoder_q4f16.onnx"
        );
    }

    #[test]
    fn test_resolve_prefers_onnx_subdir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("onnx")).unwrap();
        assert_eq!(
            resolve_onnx_dir(dir.path()).unwrap(),
            dir.path().join("onnx")
        );
    }

    #[test]
    fn test_resolve_hub_cache_layout() {
        let dir = tempfile::tempdir().unwrap();
        let onnx = dir
            .path()
            .join("models--acme--tts-onnx")
            .join("snapshots")
            .join("abc123")
            .join("onnx");
        fs::create_dir_all(&onnx).unwrap();
        assert_eq!(resolve_onnx_dir(dir.path()).unwrap(), onnx);
    }

    #[test]
    fn test_resolve_falls_back_to_dir_itself() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            resolve_onnx_dir(dir.path()).unwrap(),
            dir.path().to_path_buf()
        );
    }

    #[test]
    fn test_resolve_missing_dir_is_none() {
        assert!(resolve_onnx_dir(Path::new("/nonexistent/models")).is_none());
    }
}
