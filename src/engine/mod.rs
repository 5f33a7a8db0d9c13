//! Inference engine: bundle resolution, backend selection, transcription.
//!
//! Loading tries the transducer backend first (quantized variants, then full
//! precision). Only when the bundle is structurally not a transducer export
//! does the engine fall back to the single-session raw-audio pipeline with
//! CTC decoding. A bundle that matches a backend but fails at runtime is a
//! fatal error, never a reason to try the next backend.

pub mod ctc;
pub mod pipeline;
pub mod sp_model;
pub mod tdt;
pub mod tokenizer;

use std::path::{Path, PathBuf};

use crate::audio;
use crate::bundle::{self, ModelBundle};
use crate::error::{Result, RunnerError};

use pipeline::RawPipeline;
use tdt::TdtBackend;
use tokenizer::TokenDecoder;

/// How the engine locates its model artifacts.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Model file or bundle directory.
    pub model_path: PathBuf,
    /// Explicit tokenizer artifact, overriding anything found in the bundle.
    pub tokenizer: Option<PathBuf>,
}

enum DecodePath {
    Transducer(TdtBackend),
    Raw {
        pipeline: RawPipeline,
        decoder: TokenDecoder,
    },
}

/// A loaded speech-to-text engine bound to one model bundle.
pub struct InferenceEngine {
    path: Option<DecodePath>,
}

impl InferenceEngine {
    /// Resolve the bundle and load a decode backend.
    pub fn load(config: &EngineConfig) -> Result<Self> {
        let bundle = bundle::resolve_bundle(&config.model_path, config.tokenizer.as_deref())?;
        let path = select_backend(&bundle, config.tokenizer.as_deref())?;
        Ok(Self { path: Some(path) })
    }

    /// Transcribe one WAV file into normalized text.
    pub fn transcribe(&mut self, wav_path: &Path) -> Result<String> {
        let Some(path) = self.path.as_mut() else {
            return Err(RunnerError::Inference(
                "Engine is closed; load a new engine before transcribing.".to_string(),
            ));
        };

        let samples = audio::read_wav_mono_16k(wav_path)?;
        let text = match path {
            DecodePath::Transducer(backend) => backend.transcribe(&samples)?,
            DecodePath::Raw { pipeline, decoder } => {
                let token_ids = pipeline.run(&samples)?;
                decoder.decode(&token_ids)
            }
        };

        if text.is_empty() {
            return Err(RunnerError::Inference(
                "Inference produced an empty transcript. The audio may be silent or the model \
                 may not match the audio language."
                    .to_string(),
            ));
        }
        Ok(text)
    }

    /// Release the backend sessions. Safe to call more than once.
    pub fn close(&mut self) {
        if self.path.take().is_some() {
            log::debug!("Engine closed");
        }
    }
}

/// Verify that the model stack can start: resolve, load, release.
pub fn check(config: &EngineConfig) -> Result<()> {
    let mut engine = InferenceEngine::load(config)?;
    engine.close();
    Ok(())
}

fn select_backend(bundle: &ModelBundle, tokenizer_override: Option<&Path>) -> Result<DecodePath> {
    let has_int8 = bundle.int8_variant(&bundle.encoder).is_some()
        || bundle.int8_variant(&bundle.decoder).is_some();
    for try_quantized in [true, false] {
        if try_quantized && !has_int8 {
            continue;
        }
        match TdtBackend::load(bundle, try_quantized) {
            Ok(backend) => return Ok(DecodePath::Transducer(backend)),
            Err(reason) => {
                log::debug!(
                    "Transducer backend not applicable (quantized={try_quantized}): {reason}"
                );
            }
        }
    }

    log::info!("Falling back to single-session raw-audio pipeline");
    let pipeline = RawPipeline::load(&bundle.encoder)?;
    let decoder = TokenDecoder::resolve(pipeline.metadata(), &bundle.dir, tokenizer_override)?;
    Ok(DecodePath::Raw { pipeline, decoder })
}
