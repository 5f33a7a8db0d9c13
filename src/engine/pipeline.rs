//! Manual raw-audio inference pipeline.
//!
//! Fallback decode path for Parakeet CTC exports that take the waveform
//! directly: the model's declared inputs are introspected to find the audio
//! (and optional length) tensor, the waveform is shaped to match, and the
//! first usable output tensor is CTC-collapsed into a token-id sequence.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;

use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputValue};
use ort::tensor::TensorElementType;
use ort::value::{Tensor, ValueType};

use crate::error::{Result, RunnerError};

use super::ctc::{argmax_frames, ctc_collapse};

/// Name fragments that mark a float input as the audio tensor.
const AUDIO_HINTS: &[&str] = &["audio", "signal", "wave", "input"];
/// Name fragments that mark an integer input as the length tensor.
const LENGTH_HINTS: &[&str] = &["length", "len", "duration"];

/// Metadata keys that may carry the CTC blank id.
const BLANK_ID_KEYS: &[&str] = &["blank_id", "ctc_blank_id", "ctcBlankId"];

/// Supported tensor element types for pipeline inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemType {
    F32,
    I32,
    I64,
}

/// A model-declared input descriptor, read once at construction time.
#[derive(Debug, Clone)]
pub struct TensorSpec {
    pub name: String,
    pub elem: ElemType,
    pub rank: Option<usize>,
}

/// A loaded raw-audio session with its introspected signature and metadata.
pub struct RawPipeline {
    session: Session,
    audio_input: TensorSpec,
    length_input: Option<TensorSpec>,
    metadata: HashMap<String, String>,
    blank_id: i64,
}

impl RawPipeline {
    /// Load an ONNX model and introspect its raw-audio signature.
    pub fn load(model_path: &Path) -> Result<Self> {
        log::info!("Loading raw-audio model from {:?}...", model_path);
        let session = init_session(model_path)?;

        let specs = input_specs(&session);
        for spec in &specs {
            log::debug!(
                "Model input: name={}, elem={:?}, rank={:?}",
                spec.name,
                spec.elem,
                spec.rank
            );
        }

        let audio_input = pick_audio_input(&specs)?;
        match audio_input.rank {
            Some(1) | Some(2) | None => {}
            Some(rank) => {
                return Err(RunnerError::ModelSignature(format!(
                    "Unsupported audio input rank {rank} for '{}'. Expected rank 1 or 2 \
                     raw-audio input.",
                    audio_input.name
                )));
            }
        }
        let length_input = pick_length_input(&specs);

        let metadata = model_metadata(&session);
        let blank_id = parse_blank_id(&metadata);

        log::info!(
            "Selected audio input '{}' (rank {:?}), length input {:?}, blank id {}",
            audio_input.name,
            audio_input.rank,
            length_input.as_ref().map(|s| s.name.as_str()),
            blank_id
        );

        Ok(Self {
            session,
            audio_input,
            length_input,
            metadata,
            blank_id,
        })
    }

    /// Metadata key/value snapshot taken at load time.
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Run one inference pass and return the CTC-collapsed token ids.
    pub fn run(&mut self, samples: &[f32]) -> Result<Vec<i64>> {
        let feeds = self.build_feeds(samples)?;
        let n_outputs = self.session.outputs.len();

        let outputs = self.session.run(feeds).map_err(|e| {
            RunnerError::Inference(format!(
                "ONNX runtime execution failed. Ensure the model is a Parakeet CTC ONNX \
                 export expecting raw audio input. Details: {e}"
            ))
        })?;

        if n_outputs == 0 {
            return Err(RunnerError::ModelOutput(
                "ONNX session produced no output tensors.".to_string(),
            ));
        }

        for idx in 0..n_outputs {
            let value = &outputs[idx];

            if let Ok((_, data)) = value.try_extract_tensor::<i64>() {
                return Ok(ctc_collapse(data, self.blank_id));
            }
            if let Ok((_, data)) = value.try_extract_tensor::<i32>() {
                let flattened: Vec<i64> = data.iter().map(|&v| v as i64).collect();
                return Ok(ctc_collapse(&flattened, self.blank_id));
            }
            if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
                let dims: &[i64] = shape;
                let (frames, classes) = match dims {
                    // Leading singleton batch dimension is dropped; for a
                    // larger batch only the first item is decoded.
                    [_, frames, classes] => (*frames as usize, *classes as usize),
                    [frames, classes] => (*frames as usize, *classes as usize),
                    _ => continue,
                };
                if classes == 0 {
                    continue;
                }
                let token_ids = argmax_frames(&data[..frames * classes], frames, classes);
                return Ok(ctc_collapse(&token_ids, self.blank_id));
            }
        }

        Err(RunnerError::ModelOutput(
            "Could not find a supported logits/token-id output tensor.".to_string(),
        ))
    }

    /// Shape the waveform (and optional sample count) to the introspected
    /// signature.
    fn build_feeds(
        &self,
        samples: &[f32],
    ) -> Result<Vec<(Cow<'static, str>, SessionInputValue<'static>)>> {
        let n = samples.len();
        let audio_tensor = match self.audio_input.rank {
            Some(1) => Tensor::<f32>::from_array(([n], samples.to_vec())),
            // Unknown rank is treated as batch-of-one, like rank 2.
            Some(2) | None => Tensor::<f32>::from_array(([1, n], samples.to_vec())),
            Some(rank) => {
                return Err(RunnerError::ModelSignature(format!(
                    "Unsupported audio input rank {rank} for '{}'.",
                    self.audio_input.name
                )));
            }
        }
        .map_err(|e| RunnerError::Inference(format!("Failed to build audio tensor: {e}")))?;

        let mut feeds: Vec<(Cow<'static, str>, SessionInputValue<'static>)> = vec![(
            Cow::Owned(self.audio_input.name.clone()),
            audio_tensor.into(),
        )];

        if let Some(length_input) = &self.length_input {
            let value: SessionInputValue<'static> = match length_input.elem {
                ElemType::I64 => Tensor::<i64>::from_array(([1], vec![n as i64]))
                    .map_err(|e| {
                        RunnerError::Inference(format!("Failed to build length tensor: {e}"))
                    })?
                    .into(),
                _ => Tensor::<i32>::from_array(([1], vec![n as i32]))
                    .map_err(|e| {
                        RunnerError::Inference(format!("Failed to build length tensor: {e}"))
                    })?
                    .into(),
            };
            feeds.push((Cow::Owned(length_input.name.clone()), value));
        }

        Ok(feeds)
    }
}

/// Build an ORT session for a model file.
pub fn init_session(model_path: &Path) -> Result<Session> {
    let builder = Session::builder().map_err(|e| {
        RunnerError::DependencyMissing(format!(
            "ONNX Runtime is unavailable ({e}). Reinstall the runtime libraries."
        ))
    })?;
    builder
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(session_error)?
        .with_execution_providers(vec![CPUExecutionProvider::default().build()])
        .map_err(session_error)?
        .commit_from_file(model_path)
        .map_err(|e| {
            RunnerError::ModelLoad(format!(
                "Failed to load ONNX model. Ensure the file is a valid Parakeet ONNX export. \
                 Details: {e}"
            ))
        })
}

fn session_error(e: ort::Error) -> RunnerError {
    RunnerError::ModelLoad(format!("Failed to configure ONNX session: {e}"))
}

/// Read the declared input descriptors of a session.
fn input_specs(session: &Session) -> Vec<TensorSpec> {
    session
        .inputs
        .iter()
        .filter_map(|input| {
            let ValueType::Tensor { ty, shape, .. } = &input.input_type else {
                return None;
            };
            let elem = match ty {
                TensorElementType::Float32 => ElemType::F32,
                TensorElementType::Int32 => ElemType::I32,
                TensorElementType::Int64 => ElemType::I64,
                _ => return None,
            };
            Some(TensorSpec {
                name: input.name.clone(),
                elem,
                rank: Some(shape.len()),
            })
        })
        .collect()
}

/// Select the audio input: the first float tensor whose name carries a
/// recognized hint, else the first float tensor.
fn pick_audio_input(specs: &[TensorSpec]) -> Result<TensorSpec> {
    let float_inputs: Vec<&TensorSpec> =
        specs.iter().filter(|s| s.elem == ElemType::F32).collect();
    if float_inputs.is_empty() {
        return Err(RunnerError::ModelSignature(
            "ONNX model has no float tensor input for audio.".to_string(),
        ));
    }
    for input in &float_inputs {
        let lowered = input.name.to_lowercase();
        if AUDIO_HINTS.iter().any(|hint| lowered.contains(hint)) {
            return Ok((*input).clone());
        }
    }
    Ok(float_inputs[0].clone())
}

/// Select an optional length input among the integer-typed tensors.
fn pick_length_input(specs: &[TensorSpec]) -> Option<TensorSpec> {
    let int_inputs: Vec<&TensorSpec> = specs
        .iter()
        .filter(|s| matches!(s.elem, ElemType::I32 | ElemType::I64))
        .collect();
    for input in &int_inputs {
        let lowered = input.name.to_lowercase();
        if LENGTH_HINTS.iter().any(|hint| lowered.contains(hint)) {
            return Some((*input).clone());
        }
    }
    if int_inputs.len() == 1 {
        return Some(int_inputs[0].clone());
    }
    None
}

/// Snapshot the model's custom metadata key/value pairs.
fn model_metadata(session: &Session) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    match session.metadata() {
        Ok(meta) => {
            if let Ok(keys) = meta.custom_keys() {
                for key in keys {
                    if let Ok(Some(value)) = meta.custom(&key) {
                        metadata.insert(key, value);
                    }
                }
            }
        }
        Err(e) => log::debug!("Model metadata unavailable: {e}"),
    }
    metadata
}

/// CTC blank id from metadata, first parsable key wins, default 0.
fn parse_blank_id(metadata: &HashMap<String, String>) -> i64 {
    for key in BLANK_ID_KEYS {
        if let Some(value) = metadata.get(*key) {
            if let Ok(id) = value.trim().parse::<i64>() {
                return id;
            }
        }
    }
    0
}
