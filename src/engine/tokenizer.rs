//! Tokenizer resolution and text normalization.
//!
//! Token IDs coming out of the decoder are mapped to text through whichever
//! vocabulary source the model ships with: an inline vocabulary in the model
//! metadata, a SentencePiece `tokenizer.model`, a HuggingFace
//! `tokenizer.json`, or a line-delimited `vocab.txt`. Inline metadata always
//! wins over on-disk artifacts.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, RunnerError};

use super::sp_model::SentencePieceModel;

/// Metadata keys that may carry an inline vocabulary.
const VOCAB_METADATA_KEYS: &[&str] = &["labels", "vocabulary", "vocab", "tokens", "id2label"];

/// Sentinel tokens stripped during normalization.
const SENTINEL_TOKENS: &[&str] = &["<unk>", "<s>", "</s>", "<pad>", "<blank>", "<blk>"];

/// Tokenizer artifact filenames probed next to the model, in priority order.
const TOKENIZER_FILES: &[&str] = &["tokenizer.model", "tokenizer.json", "vocab.txt"];

/// Minimum piece count for the pipe-delimited inline form, so ordinary prose
/// containing a few `|` characters is not misread as a vocabulary.
const MIN_PIPE_PIECES: usize = 10;

/// A resolved id-to-text decoder, built once per engine lifetime.
#[derive(Debug)]
pub enum TokenDecoder {
    /// Dense id-indexed vocabulary; out-of-range IDs are silently skipped.
    Vocab(Vec<String>),
    /// SentencePiece model decoding the full id sequence.
    SentencePiece(SentencePieceModel),
}

impl TokenDecoder {
    /// Resolve a tokenizer source for a model.
    ///
    /// Inline metadata vocabulary is preferred; otherwise a tokenizer
    /// artifact next to the model (or the explicit override) is used.
    pub fn resolve(
        metadata: &HashMap<String, String>,
        model_dir: &Path,
        explicit: Option<&Path>,
    ) -> Result<Self> {
        if let Some(labels) = labels_from_metadata(metadata) {
            log::info!("Using inline metadata vocabulary ({} tokens)", labels.len());
            return Ok(TokenDecoder::Vocab(labels));
        }

        let Some(tokenizer_path) = find_tokenizer_path(model_dir, explicit)? else {
            return Err(RunnerError::TokenizerMissing(
                "Could not decode token IDs because no vocabulary metadata or tokenizer file \
                 was found. Provide tokenizer.model, tokenizer.json, or vocab.txt next to the \
                 ONNX model, or re-download the model artifacts."
                    .to_string(),
            ));
        };
        Self::from_file(&tokenizer_path)
    }

    /// Build a decoder from one tokenizer artifact, dispatched by extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if name.ends_with(".model") {
            return Ok(TokenDecoder::SentencePiece(SentencePieceModel::load(path)?));
        }
        if name.ends_with(".json") {
            return Ok(TokenDecoder::Vocab(load_tokenizer_json(path)?));
        }
        if name.ends_with(".txt") {
            return Ok(TokenDecoder::Vocab(load_vocab_lines(path)?));
        }
        Err(RunnerError::Tokenizer(format!(
            "Unsupported tokenizer file extension: {}",
            path.display()
        )))
    }

    /// Map a token-id sequence to normalized text.
    pub fn decode(&self, token_ids: &[i64]) -> String {
        let raw = match self {
            TokenDecoder::Vocab(vocab) => {
                let mut text = String::new();
                for &id in token_ids {
                    if let Some(piece) = usize::try_from(id).ok().and_then(|i| vocab.get(i)) {
                        text.push_str(piece);
                    }
                }
                text
            }
            TokenDecoder::SentencePiece(model) => model.decode(token_ids),
        };
        normalize_text(&raw)
    }
}

/// Locate a tokenizer artifact next to the model, or validate the override.
fn find_tokenizer_path(model_dir: &Path, explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(RunnerError::Tokenizer(format!(
                "Tokenizer file not found: {}",
                path.display()
            )));
        }
        return Ok(Some(path.to_path_buf()));
    }
    for name in TOKENIZER_FILES {
        let candidate = model_dir.join(name);
        if candidate.is_file() {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

/// Probe the model metadata for an inline vocabulary.
pub fn labels_from_metadata(metadata: &HashMap<String, String>) -> Option<Vec<String>> {
    for key in VOCAB_METADATA_KEYS {
        if let Some(value) = metadata.get(*key) {
            if let Some(parsed) = parse_token_list(value) {
                log::debug!("Parsed inline vocabulary from metadata key '{key}'");
                return Some(parsed);
            }
        }
    }
    None
}

/// Parse one inline vocabulary value.
///
/// Structural probes, in fixed order: JSON list, JSON index-to-token map
/// (numeric keys, built into a dense array sized to the largest index),
/// newline-delimited text, pipe-delimited text with a minimum piece count.
/// Returns `None` when no probe accepts — callers never guess.
pub fn parse_token_list(value: &str) -> Option<Vec<String>> {
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(value) {
        match parsed {
            serde_json::Value::Array(items) => {
                return Some(items.iter().map(json_value_to_token).collect());
            }
            serde_json::Value::Object(map) => {
                let mut pairs: Vec<(usize, String)> = Vec::new();
                for (key, val) in &map {
                    if let Ok(idx) = key.parse::<usize>() {
                        pairs.push((idx, json_value_to_token(val)));
                    }
                }
                if !pairs.is_empty() {
                    let max_id = pairs.iter().map(|(idx, _)| *idx).max().unwrap_or(0);
                    let mut vocab = vec![String::new(); max_id + 1];
                    for (idx, token) in pairs {
                        vocab[idx] = token;
                    }
                    return Some(vocab);
                }
            }
            _ => {}
        }
    }

    if value.contains('\n') {
        let lines: Vec<String> = value
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if !lines.is_empty() {
            return Some(lines);
        }
    }

    if value.contains('|') {
        let parts: Vec<String> = value.split('|').map(str::to_string).collect();
        if parts.len() > MIN_PIPE_PIECES {
            return Some(parts);
        }
    }

    None
}

fn json_value_to_token(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse a `tokenizer.json` `{model: {vocab: {token: id}}}` structure into a
/// dense id-indexed vocabulary.
fn load_tokenizer_json(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .map_err(|e| RunnerError::Tokenizer(format!("Failed to read tokenizer.json: {e}")))?;
    let json: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| RunnerError::Tokenizer(format!("Failed to parse tokenizer.json: {e}")))?;

    let Some(vocab_map) = json
        .get("model")
        .and_then(|m| m.get("vocab"))
        .and_then(|v| v.as_object())
    else {
        return Err(RunnerError::Tokenizer(
            "tokenizer.json missing model.vocab object.".to_string(),
        ));
    };
    if vocab_map.is_empty() {
        return Err(RunnerError::Tokenizer(
            "tokenizer.json model.vocab is empty.".to_string(),
        ));
    }

    let mut max_id = 0usize;
    let mut pairs: Vec<(usize, String)> = Vec::with_capacity(vocab_map.len());
    for (token, id) in vocab_map {
        let Some(id) = id.as_u64().and_then(|v| usize::try_from(v).ok()) else {
            return Err(RunnerError::Tokenizer(format!(
                "tokenizer.json has a non-integer id for token '{token}'."
            )));
        };
        max_id = max_id.max(id);
        pairs.push((id, token.clone()));
    }

    let mut vocab = vec![String::new(); max_id + 1];
    for (id, token) in pairs {
        vocab[id] = token;
    }
    Ok(vocab)
}

/// Read a line-delimited `vocab.txt` into a dense vocabulary.
///
/// One token per line, indexed by line number. Only trailing CR/LF is
/// stripped so that whitespace-bearing pieces survive.
fn load_vocab_lines(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .map_err(|e| RunnerError::Tokenizer(format!("Failed to read vocab.txt: {e}")))?;
    Ok(content
        .lines()
        .map(|line| line.trim_end_matches(['\n', '\r']).to_string())
        .collect())
}

/// Normalize decoded text: word-boundary markers become spaces, sentinel
/// tokens are stripped, whitespace runs collapse, and the ends are trimmed.
pub fn normalize_text(text: &str) -> String {
    let mut normalized = text.replace('\u{2581}', " ");
    for token in SENTINEL_TOKENS {
        normalized = normalized.replace(token, "");
    }
    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_markers_sentinels_and_whitespace() {
        assert_eq!(
            normalize_text("<s> hel\u{2581}lo  world </s>"),
            "hel lo world"
        );
        assert_eq!(normalize_text("  \u{2581}one\u{2581}two  "), "one two");
        assert_eq!(normalize_text("<unk><pad><blank><blk>"), "");
    }

    #[test]
    fn parses_json_list_form() {
        let vocab = parse_token_list(r#"["a", "b", "c"]"#).unwrap();
        assert_eq!(vocab, vec!["a", "b", "c"]);
    }

    #[test]
    fn parses_index_map_form_sorted_and_dense() {
        let vocab = parse_token_list(r#"{"2": "c", "0": "a", "4": "e"}"#).unwrap();
        assert_eq!(vocab, vec!["a", "", "c", "", "e"]);
    }

    #[test]
    fn index_map_with_no_numeric_keys_is_rejected() {
        assert!(parse_token_list(r#"{"a": "x", "b": "y"}"#).is_none());
    }

    #[test]
    fn parses_newline_form() {
        let vocab = parse_token_list("a\nb\n\nc\n").unwrap();
        assert_eq!(vocab, vec!["a", "b", "c"]);
    }

    #[test]
    fn pipe_form_requires_minimum_pieces() {
        assert!(parse_token_list("just|a|few|pieces").is_none());
        let vocab = parse_token_list("a|b|c|d|e|f|g|h|i|j|k").unwrap();
        assert_eq!(vocab.len(), 11);
    }

    #[test]
    fn ordinary_text_is_not_a_vocabulary() {
        assert!(parse_token_list("hello world").is_none());
        assert!(parse_token_list("").is_none());
    }

    #[test]
    fn metadata_probes_keys_in_order() {
        let mut metadata = HashMap::new();
        metadata.insert("labels".to_string(), "not a vocab".to_string());
        metadata.insert("vocab".to_string(), r#"["x", "y"]"#.to_string());
        assert_eq!(labels_from_metadata(&metadata).unwrap(), vec!["x", "y"]);
    }

    #[test]
    fn inline_metadata_preferred_over_disk_tokenizer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vocab.txt"), "from\ndisk\n").unwrap();

        let mut metadata = HashMap::new();
        metadata.insert("labels".to_string(), r#"["in", "▁line"]"#.to_string());

        let decoder = TokenDecoder::resolve(&metadata, dir.path(), None).unwrap();
        assert_eq!(decoder.decode(&[0, 1]), "in line");
    }

    #[test]
    fn falls_back_to_vocab_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vocab.txt"), "he\nllo\n\u{2581}there\n").unwrap();

        let decoder = TokenDecoder::resolve(&HashMap::new(), dir.path(), None).unwrap();
        // Out-of-range ids are skipped.
        assert_eq!(decoder.decode(&[0, 1, 2, 40]), "hello there");
    }

    #[test]
    fn missing_everything_is_tokenizer_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = TokenDecoder::resolve(&HashMap::new(), dir.path(), None).unwrap_err();
        assert_eq!(err.kind(), "TOKENIZER_MISSING");
    }

    #[test]
    fn tokenizer_json_builds_dense_vocab() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenizer.json");
        std::fs::write(
            &path,
            r#"{"model": {"vocab": {"hel": 0, "▁world": 2}}}"#,
        )
        .unwrap();
        let decoder = TokenDecoder::from_file(&path).unwrap();
        assert_eq!(decoder.decode(&[0, 2]), "hel world");
    }

    #[test]
    fn tokenizer_json_without_vocab_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenizer.json");
        std::fs::write(&path, r#"{"model": {}}"#).unwrap();
        let err = TokenDecoder::from_file(&path).unwrap_err();
        assert_eq!(err.kind(), "TOKENIZER_ERROR");
    }
}
