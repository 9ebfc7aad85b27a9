//! Text normalization and tokenization front
//!
//! Wraps a HuggingFace tokenizer file and applies the same text cleanup the
//! model was trained against. Every encoded sequence ends with two copies
//! of the text sentinel token; the generation engine relies on that.

use std::path::Path;

use tokenizers::Tokenizer;

use voxclone_core::{Error, Result, TokenSequence, TEXT_SENTINEL_TOKEN};

/// Punctuation the model was not trained on, mapped to safe equivalents.
const REPLACEMENTS: &[(&str, &str)] = &[
    ("\u{2026}", ", "), // ellipsis
    (":", ","),
    ("\u{2014}", "-"), // em dash
    ("\u{2013}", "-"), // en dash
    (" ,", ","),
    ("\u{201C}", "\""),
    ("\u{201D}", "\""),
    ("\u{2018}", "'"),
    ("\u{2019}", "'"),
];

/// Clean up raw input text before tokenization.
pub fn normalize_text(text: &str) -> String {
    if text.trim().is_empty() {
        return "You need to add some text for me to talk.".to_string();
    }

    let mut result = String::with_capacity(text.len() + 1);
    let mut chars = text.chars();
    if let Some(first) = chars.next() {
        result.extend(first.to_uppercase());
        result.push_str(chars.as_str());
    }

    for (from, to) in REPLACEMENTS {
        if result.contains(from) {
            result = result.replace(from, to);
        }
    }

    let mut result = result.trim_end().to_string();
    if let Some(last) = result.chars().last() {
        if !matches!(last, '.' | '!' | '?' | '-' | ',') {
            result.push('.');
        }
    }
    result
}

/// Tokenizer front over `tokenizer.json`.
pub struct TextTokenizer {
    inner: Tokenizer,
}

impl TextTokenizer {
    pub fn from_file(path: &Path) -> Result<Self> {
        let inner = Tokenizer::from_file(path)
            .map_err(|e| Error::Tokenizer(format!("failed to load {}: {e}", path.display())))?;
        Ok(Self { inner })
    }

    /// Normalize and encode text, appending the two terminal sentinels.
    pub fn encode(&self, text: &str) -> Result<TokenSequence> {
        let normalized = normalize_text(text);
        let encoding = self
            .inner
            .encode(normalized.as_str(), false)
            .map_err(|e| Error::Tokenizer(e.to_string()))?;

        let mut ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        append_sentinels(&mut ids);

        Ok(TokenSequence {
            ids,
            text: Some(normalized),
        })
    }
}

/// Append the two terminal sentinel tokens the language model expects.
fn append_sentinels(ids: &mut Vec<i64>) {
    ids.push(TEXT_SENTINEL_TOKEN);
    ids.push(TEXT_SENTINEL_TOKEN);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_empty_gets_placeholder() {
        assert_eq!(
            normalize_text("   "),
            "You need to add some text for me to talk."
        );
    }

    #[test]
    fn test_normalize_capitalizes_and_terminates() {
        assert_eq!(normalize_text("hello world"), "Hello world.");
    }

    #[test]
    fn test_normalize_keeps_existing_punctuation() {
        assert_eq!(normalize_text("Ready?"), "Ready?");
        assert_eq!(normalize_text("Stop!"), "Stop!");
    }

    #[test]
    fn test_normalize_replaces_smart_punctuation() {
        assert_eq!(normalize_text("wait\u{2026}what"), "Wait, what.");
        assert_eq!(normalize_text("a\u{2014}b"), "A-b.");
        assert_eq!(normalize_text("\u{201C}hi\u{201D}"), "\"hi\".");
    }

    #[test]
    fn test_normalize_colon_and_trailing_space() {
        assert_eq!(normalize_text("note: this  "), "Note, this.");
    }

    #[test]
    fn test_sentinels_appended_twice() {
        let mut ids = vec![10, 20, 30];
        append_sentinels(&mut ids);
        assert_eq!(
            ids,
            vec![10, 20, 30, TEXT_SENTINEL_TOKEN, TEXT_SENTINEL_TOKEN]
        );
    }
}
