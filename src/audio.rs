//! WAV loading and validation.
//!
//! Parakeet exports expect raw 16 kHz mono audio, so mismatched files are
//! rejected outright rather than resampled or downmixed.

use std::path::Path;

use crate::error::{Result, RunnerError};

/// Required sample rate for all input audio.
pub const SAMPLE_RATE: u32 = 16_000;

/// Read a mono 16-bit PCM 16 kHz WAV file into normalized `f32` samples.
///
/// Samples are scaled by `1 / 32768` into `[-1.0, 1.0]`. Any deviation from
/// the expected format fails with a distinct `AUDIO_FORMAT_ERROR`.
pub fn read_wav_mono_16k(wav_path: &Path) -> Result<Vec<f32>> {
    let mut reader = hound::WavReader::open(wav_path).map_err(|e| {
        RunnerError::AudioFormat(format!(
            "Failed to parse WAV input. Provide a valid PCM WAV file. Details: {e}"
        ))
    })?;
    let spec = reader.spec();

    if spec.channels != 1 {
        return Err(RunnerError::AudioFormat(format!(
            "Expected mono WAV but received {} channels.",
            spec.channels
        )));
    }
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(RunnerError::AudioFormat(format!(
            "Expected 16-bit integer PCM WAV but received {}-bit {:?} samples.",
            spec.bits_per_sample, spec.sample_format
        )));
    }
    if spec.sample_rate != SAMPLE_RATE {
        return Err(RunnerError::AudioFormat(format!(
            "Expected {SAMPLE_RATE} Hz WAV but received {} Hz.",
            spec.sample_rate
        )));
    }

    let samples: std::result::Result<Vec<f32>, _> = reader
        .samples::<i16>()
        .map(|s| s.map(|v| v as f32 / 32768.0))
        .collect();
    let samples = samples.map_err(|e| {
        RunnerError::AudioFormat(format!("Failed to decode WAV samples. Details: {e}"))
    })?;

    if samples.is_empty() {
        return Err(RunnerError::AudioFormat(
            "WAV file contains no audio frames.".to_string(),
        ));
    }

    log::debug!(
        "Loaded {} samples ({:.2}s) from {:?}",
        samples.len(),
        samples.len() as f32 / SAMPLE_RATE as f32,
        wav_path
    );

    Ok(samples)
}
