use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Error surfaced directly to the caller.
///
/// Every variant renders with a machine-readable kind prefix followed by a
/// human-actionable message, so the worker protocol and the CLI can forward
/// the `Display` output verbatim.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// A runtime dependency (the ONNX Runtime library itself) is unavailable.
    #[error("DEPENDENCY_MISSING: {0}")]
    DependencyMissing(String),

    /// The model file could not be located or loaded.
    #[error("MODEL_LOAD_ERROR: {0}")]
    ModelLoad(String),

    /// The input audio does not meet the mono / 16-bit / 16 kHz contract.
    #[error("AUDIO_FORMAT_ERROR: {0}")]
    AudioFormat(String),

    /// The model's declared inputs do not match any supported raw-audio signature.
    #[error("MODEL_SIGNATURE_ERROR: {0}")]
    ModelSignature(String),

    /// None of the model's outputs is a usable token-id or logits tensor.
    #[error("MODEL_OUTPUT_ERROR: {0}")]
    ModelOutput(String),

    /// No vocabulary metadata and no tokenizer artifact was found.
    #[error("TOKENIZER_MISSING: {0}")]
    TokenizerMissing(String),

    /// A tokenizer artifact exists but could not be parsed or used.
    #[error("TOKENIZER_ERROR: {0}")]
    Tokenizer(String),

    /// Inference executed but produced no usable transcript.
    #[error("INFERENCE_ERROR: {0}")]
    Inference(String),

    /// A malformed or unsupported worker request.
    #[error("REQUEST_ERROR: {0}")]
    Request(String),
}

impl RunnerError {
    /// The machine-readable kind prefix for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            RunnerError::DependencyMissing(_) => "DEPENDENCY_MISSING",
            RunnerError::ModelLoad(_) => "MODEL_LOAD_ERROR",
            RunnerError::AudioFormat(_) => "AUDIO_FORMAT_ERROR",
            RunnerError::ModelSignature(_) => "MODEL_SIGNATURE_ERROR",
            RunnerError::ModelOutput(_) => "MODEL_OUTPUT_ERROR",
            RunnerError::TokenizerMissing(_) => "TOKENIZER_MISSING",
            RunnerError::Tokenizer(_) => "TOKENIZER_ERROR",
            RunnerError::Inference(_) => "INFERENCE_ERROR",
            RunnerError::Request(_) => "REQUEST_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_kind_prefix() {
        let err = RunnerError::AudioFormat("expected mono".to_string());
        assert_eq!(err.to_string(), "AUDIO_FORMAT_ERROR: expected mono");
        assert_eq!(err.kind(), "AUDIO_FORMAT_ERROR");
    }
}
