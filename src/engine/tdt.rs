//! NeMo transducer backend — the preferred decode path.
//!
//! Drives the three-session Parakeet export (preprocessor, encoder,
//! decoder/joint) with greedy transducer decoding. TDT exports append
//! duration logits after the vocabulary logits; those are split off before
//! the argmax. Bundles that do not look like a transducer export are
//! reported as inapplicable so the engine can fall back to the raw-audio
//! pipeline.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Array, Array1, Array2, Array3, ArrayD, ArrayViewD, IxDyn};
use ort::inputs;
use ort::session::Session;
use ort::value::TensorRef;

use crate::bundle::ModelBundle;
use crate::error::{Result, RunnerError};

use super::tokenizer::normalize_text;

type DecoderState = (Array3<f32>, Array3<f32>);

/// Cap on symbols emitted per encoder frame during greedy decode.
const MAX_TOKENS_PER_STEP: usize = 10;

/// Loaded transducer sessions plus the pair-format vocabulary.
pub struct TdtBackend {
    preprocessor: Session,
    encoder: Session,
    decoder_joint: Session,
    vocab: Vec<String>,
    blank_idx: i32,
    vocab_size: usize,
}

impl TdtBackend {
    /// Load the transducer export from a resolved bundle.
    ///
    /// `try_quantized` prefers `.int8.onnx` encoder/decoder variants when
    /// present. An `Err` carries the reason the bundle is not applicable to
    /// this backend — it never represents a fatal runner error.
    pub fn load(bundle: &ModelBundle, try_quantized: bool) -> std::result::Result<Self, String> {
        let (vocab, blank_idx) = load_pair_vocab(bundle.vocab.as_deref())?;
        let vocab_size = vocab.len();

        let encoder_path = select_variant(bundle, &bundle.encoder, try_quantized);
        let decoder_path = select_variant(bundle, &bundle.decoder, try_quantized);

        log::info!(
            "Loading transducer export: encoder={:?}, decoder={:?}, quantized={}",
            encoder_path.file_name().unwrap_or_default(),
            decoder_path.file_name().unwrap_or_default(),
            try_quantized
        );

        let preprocessor = init_session(&bundle.normalizer)?;
        require_inputs(&preprocessor, &["waveforms", "waveforms_lens"], "preprocessor")?;

        let encoder = init_session(&encoder_path)?;
        require_inputs(&encoder, &["audio_signal", "length"], "encoder")?;

        let decoder_joint = init_session(&decoder_path)?;
        require_inputs(
            &decoder_joint,
            &[
                "encoder_outputs",
                "targets",
                "target_length",
                "input_states_1",
                "input_states_2",
            ],
            "decoder/joint",
        )?;

        log::info!(
            "Loaded transducer vocabulary with {} tokens, blank_idx={}",
            vocab_size,
            blank_idx
        );

        Ok(Self {
            preprocessor,
            encoder,
            decoder_joint,
            vocab,
            blank_idx,
            vocab_size,
        })
    }

    /// Transcribe one normalized waveform.
    ///
    /// Errors here are fatal runner errors — the sessions loaded, so a
    /// failure is a real execution problem, not backend inapplicability.
    pub fn transcribe(&mut self, samples: &[f32]) -> Result<String> {
        let samples_len = samples.len();
        let waveforms = Array2::from_shape_vec((1, samples_len), samples.to_vec())
            .map_err(shape_error)?
            .into_dyn();
        let waveforms_lens = Array1::from_vec(vec![samples_len as i64]).into_dyn();

        let (features, features_lens) =
            self.preprocess(&waveforms.view(), &waveforms_lens.view())?;
        let (encoder_out, encoder_out_lens) =
            self.encode(&features.view(), &features_lens.view())?;

        let mut pieces = String::new();
        for (encodings, &encodings_len) in encoder_out.outer_iter().zip(encoder_out_lens.iter()) {
            let tokens = self.decode_sequence(&encodings, encodings_len as usize)?;
            for &id in &tokens {
                if let Some(piece) = usize::try_from(id).ok().and_then(|i| self.vocab.get(i)) {
                    pieces.push_str(piece);
                }
            }
        }

        Ok(normalize_text(&pieces))
    }

    fn preprocess(
        &mut self,
        waveforms: &ArrayViewD<f32>,
        waveforms_lens: &ArrayViewD<i64>,
    ) -> Result<(ArrayD<f32>, ArrayD<i64>)> {
        log::trace!("Running preprocessor inference...");
        let feeds = inputs![
            "waveforms" => TensorRef::from_array_view(waveforms.view()).map_err(run_error)?,
            "waveforms_lens" => TensorRef::from_array_view(waveforms_lens.view()).map_err(run_error)?,
        ];
        let outputs = self.preprocessor.run(feeds).map_err(run_error)?;

        let features = outputs
            .get("features")
            .ok_or_else(|| missing_output("features"))?
            .try_extract_array()
            .map_err(run_error)?;
        let features_lens = outputs
            .get("features_lens")
            .ok_or_else(|| missing_output("features_lens"))?
            .try_extract_array()
            .map_err(run_error)?;

        Ok((features.to_owned(), features_lens.to_owned()))
    }

    fn encode(
        &mut self,
        features: &ArrayViewD<f32>,
        features_lens: &ArrayViewD<i64>,
    ) -> Result<(ArrayD<f32>, ArrayD<i64>)> {
        log::trace!("Running encoder inference...");
        let feeds = inputs![
            "audio_signal" => TensorRef::from_array_view(features.view()).map_err(run_error)?,
            "length" => TensorRef::from_array_view(features_lens.view()).map_err(run_error)?,
        ];
        let outputs = self.encoder.run(feeds).map_err(run_error)?;

        let encoder_out = outputs
            .get("outputs")
            .ok_or_else(|| missing_output("outputs"))?
            .try_extract_array::<f32>()
            .map_err(run_error)?;
        let encoded_lengths = outputs
            .get("encoded_lengths")
            .ok_or_else(|| missing_output("encoded_lengths"))?
            .try_extract_array::<i64>()
            .map_err(run_error)?;

        // [batch, dim, time] -> [batch, time, dim]
        let encoder_out = encoder_out.permuted_axes(IxDyn(&[0, 2, 1]));

        Ok((encoder_out.to_owned(), encoded_lengths.to_owned()))
    }

    fn create_decoder_state(&self) -> Result<DecoderState> {
        let state1_shape = decoder_state_shape(&self.decoder_joint, "input_states_1")?;
        let state2_shape = decoder_state_shape(&self.decoder_joint, "input_states_2")?;

        // Dynamic batch dimension pinned to 1.
        let state1 = Array::zeros((state1_shape.0, 1, state1_shape.1));
        let state2 = Array::zeros((state2_shape.0, 1, state2_shape.1));
        Ok((state1, state2))
    }

    fn decode_step(
        &mut self,
        prev_tokens: &[i32],
        prev_state: &DecoderState,
        encoder_step: &ArrayViewD<f32>,
    ) -> Result<(ArrayD<f32>, DecoderState)> {
        let target_token = prev_tokens.last().copied().unwrap_or(self.blank_idx);

        // encoder_step [dim] -> [1, dim, 1]
        let encoder_outputs = encoder_step
            .to_owned()
            .insert_axis(ndarray::Axis(0))
            .insert_axis(ndarray::Axis(2));
        let targets = Array2::from_shape_vec((1, 1), vec![target_token]).map_err(shape_error)?;
        let target_length = Array1::from_vec(vec![1i32]);

        let feeds = inputs![
            "encoder_outputs" => TensorRef::from_array_view(encoder_outputs.view()).map_err(run_error)?,
            "targets" => TensorRef::from_array_view(targets.view()).map_err(run_error)?,
            "target_length" => TensorRef::from_array_view(target_length.view()).map_err(run_error)?,
            "input_states_1" => TensorRef::from_array_view(prev_state.0.view()).map_err(run_error)?,
            "input_states_2" => TensorRef::from_array_view(prev_state.1.view()).map_err(run_error)?,
        ];
        let outputs = self.decoder_joint.run(feeds).map_err(run_error)?;

        let logits = outputs
            .get("outputs")
            .ok_or_else(|| missing_output("outputs"))?
            .try_extract_array::<f32>()
            .map_err(run_error)?;
        let state1 = outputs
            .get("output_states_1")
            .ok_or_else(|| missing_output("output_states_1"))?
            .try_extract_array::<f32>()
            .map_err(run_error)?;
        let state2 = outputs
            .get("output_states_2")
            .ok_or_else(|| missing_output("output_states_2"))?
            .try_extract_array::<f32>()
            .map_err(run_error)?;

        let logits = logits.remove_axis(ndarray::Axis(0));
        let state1 = state1
            .to_owned()
            .into_dimensionality::<ndarray::Ix3>()
            .map_err(shape_error)?;
        let state2 = state2
            .to_owned()
            .into_dimensionality::<ndarray::Ix3>()
            .map_err(shape_error)?;

        Ok((logits.to_owned(), (state1, state2)))
    }

    /// Greedy transducer decode over one encoded sequence.
    fn decode_sequence(
        &mut self,
        encodings: &ArrayViewD<f32>,
        encodings_len: usize,
    ) -> Result<Vec<i32>> {
        let mut prev_state = self.create_decoder_state()?;
        let mut tokens: Vec<i32> = Vec::new();

        let mut t = 0;
        let mut emitted_at_step = 0;

        while t < encodings_len {
            let encoder_step = encodings.index_axis(ndarray::Axis(0), t).to_owned();
            let encoder_step = encoder_step.into_dyn();
            let (logits, new_state) = self.decode_step(&tokens, &prev_state, &encoder_step.view())?;

            let all_logits = logits.as_slice().ok_or_else(|| {
                RunnerError::Inference("Decoder logits are not contiguous.".to_string())
            })?;

            // TDT exports append duration logits after the vocabulary logits.
            let vocab_logits = if all_logits.len() > self.vocab_size {
                &all_logits[..self.vocab_size]
            } else {
                all_logits
            };

            let token = vocab_logits
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(idx, _)| idx as i32)
                .unwrap_or(self.blank_idx);

            if token != self.blank_idx {
                prev_state = new_state;
                tokens.push(token);
                emitted_at_step += 1;
            }

            if token == self.blank_idx || emitted_at_step == MAX_TOKENS_PER_STEP {
                t += 1;
                emitted_at_step = 0;
            }
        }

        Ok(tokens)
    }
}

/// Pick the quantized sibling of a canonical artifact when requested and present.
fn select_variant(bundle: &ModelBundle, canonical: &Path, try_quantized: bool) -> PathBuf {
    if try_quantized {
        if let Some(int8) = bundle.int8_variant(canonical) {
            return int8;
        }
    }
    canonical.to_path_buf()
}

fn init_session(path: &Path) -> std::result::Result<Session, String> {
    crate::engine::pipeline::init_session(path).map_err(|e| e.to_string())
}

fn require_inputs(
    session: &Session,
    names: &[&str],
    label: &str,
) -> std::result::Result<(), String> {
    for name in names {
        if !session.inputs.iter().any(|i| i.name == *name) {
            return Err(format!(
                "{label} session has no '{name}' input; bundle is not a transducer export"
            ));
        }
    }
    Ok(())
}

/// Load a `piece id` pair-format vocabulary with a `<blk>` entry.
///
/// Line-delimited vocabularies without ids are rejected so the caller can
/// fall back to the raw-audio pipeline's tokenizer resolution.
fn load_pair_vocab(
    vocab_path: Option<&Path>,
) -> std::result::Result<(Vec<String>, i32), String> {
    let Some(vocab_path) = vocab_path else {
        return Err("bundle has no vocabulary artifact".to_string());
    };
    let content = fs::read_to_string(vocab_path)
        .map_err(|e| format!("failed to read {}: {e}", vocab_path.display()))?;

    let mut max_id = 0usize;
    let mut tokens_with_ids: Vec<(String, usize)> = Vec::new();
    let mut blank_idx: Option<usize> = None;

    for line in content.lines() {
        let parts: Vec<&str> = line.trim_end().split(' ').collect();
        if parts.len() >= 2 {
            if let Ok(id) = parts[1].parse::<usize>() {
                if parts[0] == "<blk>" {
                    blank_idx = Some(id);
                }
                max_id = max_id.max(id);
                tokens_with_ids.push((parts[0].to_string(), id));
            }
        }
    }

    if tokens_with_ids.is_empty() {
        return Err("vocabulary is not in 'piece id' pair format".to_string());
    }
    let Some(blank_idx) = blank_idx else {
        return Err("vocabulary has no <blk> entry".to_string());
    };

    let mut vocab = vec![String::new(); max_id + 1];
    for (token, id) in tokens_with_ids {
        vocab[id] = token;
    }

    Ok((vocab, blank_idx as i32))
}

fn run_error(e: impl std::fmt::Display) -> RunnerError {
    RunnerError::Inference(format!("Transducer execution failed. Details: {e}"))
}

fn shape_error(e: ndarray::ShapeError) -> RunnerError {
    RunnerError::Inference(format!("Unexpected tensor shape: {e}"))
}

fn missing_output(name: &str) -> RunnerError {
    RunnerError::Inference(format!("Transducer session produced no '{name}' output."))
}

fn decoder_state_shape(session: &Session, name: &str) -> Result<(usize, usize)> {
    let input = session
        .inputs
        .iter()
        .find(|i| i.name == name)
        .ok_or_else(|| {
            RunnerError::Inference(format!("Decoder session has no '{name}' input."))
        })?;
    let shape = input.input_type.tensor_shape().ok_or_else(|| {
        RunnerError::Inference(format!("Failed to read tensor shape for input '{name}'."))
    })?;
    if shape.len() != 3 {
        return Err(RunnerError::Inference(format!(
            "Decoder state input '{name}' has rank {}, expected 3.",
            shape.len()
        )));
    }
    let fix = |d: i64| if d > 0 { d as usize } else { 1 };
    Ok((fix(shape[0]), fix(shape[2])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_vocab_requires_pairs_and_blank() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.txt");

        std::fs::write(&path, "hel 0\nlo 1\n<blk> 2\n").unwrap();
        let (vocab, blank) = load_pair_vocab(Some(&path)).unwrap();
        assert_eq!(vocab, vec!["hel", "lo", "<blk>"]);
        assert_eq!(blank, 2);

        std::fs::write(&path, "hel\nlo\n").unwrap();
        assert!(load_pair_vocab(Some(&path)).is_err());

        std::fs::write(&path, "hel 0\nlo 1\n").unwrap();
        assert!(load_pair_vocab(Some(&path)).is_err());

        assert!(load_pair_vocab(None).is_err());
    }
}
