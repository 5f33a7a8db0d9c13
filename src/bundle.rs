//! Model bundle resolution.
//!
//! Parakeet exports arrive under wildly inconsistent naming depending on
//! which tool produced them. This module normalizes a model directory into
//! the canonical artifact names the engine (and any external validator)
//! relies on, copying files where needed. Resolution is idempotent: a
//! directory that already carries canonical names is left untouched.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Result, RunnerError};

/// Canonical encoder filename inside a resolved bundle.
pub const ENCODER_FILE: &str = "encoder-model.onnx";
/// Canonical decoder/joint filename.
pub const DECODER_FILE: &str = "decoder_joint-model.onnx";
/// Canonical model config filename.
pub const CONFIG_FILE: &str = "config.json";
/// Canonical preprocessor/normalizer filename.
pub const NORMALIZER_FILE: &str = "nemo128.onnx";
/// Canonical vocabulary filename.
pub const VOCAB_FILE: &str = "vocab.txt";

const ENCODER_ALTERNATES: &[&str] = &["model.onnx", "encoder.onnx", "asr_model.onnx"];
const DECODER_ALTERNATES: &[&str] = &["decoder-model.onnx", "decoder_joint.onnx", "decoder.onnx"];
const CONFIG_ALTERNATES: &[&str] = &["config.yaml", "model_config.yaml"];
const NORMALIZER_ALTERNATES: &[&str] = &["preprocessor.onnx", "featurizer.onnx", "normalizer.onnx"];
const VOCAB_ALTERNATES: &[&str] = &["tokens.txt", "vocabulary.txt"];

/// A model directory resolved to canonical artifact paths.
///
/// All required artifacts exist as regular files once resolution succeeds.
/// The bundle is immutable after construction and persists on disk across
/// process runs.
#[derive(Debug)]
pub struct ModelBundle {
    /// Directory holding all artifacts.
    pub dir: PathBuf,
    /// Canonical encoder path (`encoder-model.onnx`).
    pub encoder: PathBuf,
    /// Canonical decoder path (`decoder_joint-model.onnx`).
    pub decoder: PathBuf,
    /// Canonical config path (`config.json`).
    pub config: PathBuf,
    /// Canonical preprocessor path (`nemo128.onnx`).
    pub normalizer: PathBuf,
    /// Canonical vocabulary path, if a vocabulary artifact was found.
    pub vocab: Option<PathBuf>,
    /// Artifacts materialized (copied) during this resolution.
    pub copied: Vec<PathBuf>,
}

/// Resolve the directory containing `model_path` into a canonical bundle.
///
/// `model_path` itself is the highest-priority encoder candidate, so the
/// caller may point at an arbitrarily named export. An explicit
/// `tokenizer_override` takes precedence over any discovered vocabulary
/// source: `.txt` replaces the vocabulary artifact, while `.model` and
/// `.json` are copied alongside the bundle under their canonical tokenizer
/// names.
pub fn resolve_bundle(model_path: &Path, tokenizer_override: Option<&Path>) -> Result<ModelBundle> {
    if !model_path.is_file() {
        return Err(RunnerError::ModelLoad(format!(
            "Model file not found: {}",
            model_path.display()
        )));
    }
    let dir = model_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut copied = Vec::new();

    let encoder = resolve_role(
        &dir,
        ENCODER_FILE,
        ENCODER_ALTERNATES,
        Some(model_path),
        &mut copied,
    )?
    .ok_or_else(|| missing_artifact("encoder", ENCODER_FILE, &dir))?;
    let decoder = resolve_role(&dir, DECODER_FILE, DECODER_ALTERNATES, None, &mut copied)?
        .ok_or_else(|| missing_artifact("decoder", DECODER_FILE, &dir))?;
    let config = resolve_role(&dir, CONFIG_FILE, CONFIG_ALTERNATES, None, &mut copied)?
        .ok_or_else(|| missing_artifact("config", CONFIG_FILE, &dir))?;
    let normalizer = resolve_role(&dir, NORMALIZER_FILE, NORMALIZER_ALTERNATES, None, &mut copied)?
        .ok_or_else(|| missing_artifact("preprocessor", NORMALIZER_FILE, &dir))?;

    // Quantized ONNX variants are carried alongside when present so the
    // transducer backend can prefer them.
    for canonical in [ENCODER_FILE, DECODER_FILE, NORMALIZER_FILE] {
        let int8 = int8_name(canonical);
        resolve_role(&dir, &int8, &[], None, &mut copied)?;
    }

    let mut vocab = resolve_role(&dir, VOCAB_FILE, VOCAB_ALTERNATES, None, &mut copied)?;

    if let Some(override_path) = tokenizer_override {
        vocab = apply_tokenizer_override(&dir, override_path, vocab, &mut copied)?;
    }

    if vocab.is_none() && !has_tokenizer_artifact(&dir) {
        return Err(RunnerError::TokenizerMissing(format!(
            "No vocabulary artifact found under {}. Provide tokenizer.model, tokenizer.json, \
             or vocab.txt next to the ONNX model, or re-download the model artifacts.",
            dir.display()
        )));
    }

    log::info!(
        "Resolved model bundle in {:?} ({} artifact(s) copied)",
        dir,
        copied.len()
    );

    Ok(ModelBundle {
        encoder,
        decoder,
        config,
        normalizer,
        vocab,
        copied,
        dir,
    })
}

impl ModelBundle {
    /// Path of the quantized sibling for a canonical ONNX artifact, if present.
    pub fn int8_variant(&self, canonical: &Path) -> Option<PathBuf> {
        let name = canonical.file_name()?.to_str()?;
        let candidate = self.dir.join(int8_name(name));
        candidate.is_file().then_some(candidate)
    }
}

fn int8_name(canonical: &str) -> String {
    match canonical.strip_suffix(".onnx") {
        Some(stem) => format!("{stem}.int8.onnx"),
        None => format!("{canonical}.int8"),
    }
}

fn missing_artifact(role: &str, canonical: &str, dir: &Path) -> RunnerError {
    RunnerError::ModelLoad(format!(
        "Missing {role} artifact: no file matching '{canonical}' (or a known alternate name) \
         was found under {}. Re-download the model artifacts.",
        dir.display()
    ))
}

/// Locate one artifact role and materialize it under its canonical name.
///
/// Search order: an explicit candidate file, the exact canonical name in the
/// bundle directory, the known alternate names, then a recursive by-filename
/// search over the directory tree. Recursive matches are tie-broken by
/// shallowest path depth, then lexicographic path order — never by
/// filesystem enumeration order.
fn resolve_role(
    dir: &Path,
    canonical: &str,
    alternates: &[&str],
    explicit: Option<&Path>,
    copied: &mut Vec<PathBuf>,
) -> Result<Option<PathBuf>> {
    let dest = dir.join(canonical);

    // Exact canonical name always wins, which keeps a second resolution of
    // the same directory copy-free.
    let mut source = None;
    if dest.is_file() {
        source = Some(dest.clone());
    }
    if source.is_none() {
        if let Some(path) = explicit {
            if path.is_file() {
                source = Some(path.to_path_buf());
            }
        }
    }
    if source.is_none() {
        for alt in alternates {
            let candidate = dir.join(alt);
            if candidate.is_file() {
                source = Some(candidate);
                break;
            }
        }
    }
    if source.is_none() {
        let mut names = Vec::with_capacity(1 + alternates.len());
        names.push(canonical);
        names.extend_from_slice(alternates);
        source = find_recursive(dir, &names);
    }

    let Some(source) = source else {
        return Ok(None);
    };

    if !same_file(&source, &dest) {
        fs::copy(&source, &dest).map_err(|e| {
            RunnerError::ModelLoad(format!(
                "Failed to copy {} to {}: {e}",
                source.display(),
                dest.display()
            ))
        })?;
        log::debug!("Copied {:?} -> {:?}", source, dest);
        copied.push(dest.clone());
    }

    Ok(Some(dest))
}

/// Recursive by-filename search, respecting name priority order.
fn find_recursive(dir: &Path, names: &[&str]) -> Option<PathBuf> {
    let mut matches: Vec<Vec<PathBuf>> = vec![Vec::new(); names.len()];
    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(file_name) = entry.file_name().to_str() else {
            continue;
        };
        if let Some(idx) = names.iter().position(|n| *n == file_name) {
            matches[idx].push(entry.into_path());
        }
    }
    for mut candidates in matches {
        if candidates.is_empty() {
            continue;
        }
        candidates.sort_by_key(|p| (p.components().count(), p.clone()));
        return candidates.into_iter().next();
    }
    None
}

fn apply_tokenizer_override(
    dir: &Path,
    override_path: &Path,
    vocab: Option<PathBuf>,
    copied: &mut Vec<PathBuf>,
) -> Result<Option<PathBuf>> {
    if !override_path.is_file() {
        return Err(RunnerError::Tokenizer(format!(
            "Tokenizer file not found: {}",
            override_path.display()
        )));
    }
    let ext = override_path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let dest_name = match ext.as_str() {
        "txt" => VOCAB_FILE,
        "model" => "tokenizer.model",
        "json" => "tokenizer.json",
        other => {
            return Err(RunnerError::Tokenizer(format!(
                "Unsupported tokenizer file extension: .{other}"
            )));
        }
    };
    let dest = dir.join(dest_name);
    if !same_file(override_path, &dest) {
        fs::copy(override_path, &dest).map_err(|e| {
            RunnerError::Tokenizer(format!(
                "Failed to copy tokenizer {} to {}: {e}",
                override_path.display(),
                dest.display()
            ))
        })?;
        copied.push(dest.clone());
    }
    if dest_name == VOCAB_FILE {
        Ok(Some(dest))
    } else {
        Ok(vocab)
    }
}

fn has_tokenizer_artifact(dir: &Path) -> bool {
    ["tokenizer.model", "tokenizer.json"]
        .iter()
        .any(|name| dir.join(name).is_file())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
