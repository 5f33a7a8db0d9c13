//! # parakeet-runner
//!
//! Local speech-to-text over ONNX model bundles, built on ONNX Runtime.
//! Supports the NeMo Parakeet transducer export out of the box and falls
//! back to a generic single-session raw-audio pipeline with CTC decoding
//! for other models.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::path::PathBuf;
//! use parakeet_runner::engine::{EngineConfig, InferenceEngine};
//!
//! let config = EngineConfig {
//!     model_path: PathBuf::from("models/parakeet-v0.3"),
//!     tokenizer: None,
//! };
//! let mut engine = InferenceEngine::load(&config)?;
//! let text = engine.transcribe(&PathBuf::from("audio.wav"))?;
//! println!("{text}");
//! engine.close();
//! # Ok::<(), parakeet_runner::RunnerError>(())
//! ```
//!
//! ## Audio Requirements
//!
//! Input audio files must be:
//! - WAV format
//! - 16 kHz sample rate
//! - 16-bit samples
//! - Mono (single channel)

pub mod audio;
pub mod bundle;
pub mod engine;
pub mod error;
pub mod worker;

pub use engine::{EngineConfig, InferenceEngine};
pub use error::{Result, RunnerError};
