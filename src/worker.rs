//! Persistent JSON-lines worker protocol.
//!
//! One request per input line, one response per request, flushed before the
//! next line is read. The engine is constructed lazily on the first
//! `transcribe` request and reused afterwards; `ping` never touches the
//! model. End of input behaves like `shutdown` minus the final response.

use std::io::{self, BufRead, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::InferenceEngine;
use crate::error::{Result, RunnerError};

#[derive(Debug, Deserialize)]
struct WorkerRequest {
    #[serde(default)]
    id: String,
    op: String,
    #[serde(default)]
    audio: Option<String>,
}

#[derive(Debug, Serialize)]
struct WorkerResponse {
    id: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl WorkerResponse {
    fn message(id: &str, message: &str) -> Self {
        Self {
            id: id.to_string(),
            ok: true,
            message: Some(message.to_string()),
            text: None,
            error: None,
        }
    }

    fn text(id: &str, text: String) -> Self {
        Self {
            id: id.to_string(),
            ok: true,
            message: None,
            text: Some(text),
            error: None,
        }
    }

    fn error(id: &str, error: &RunnerError) -> Self {
        Self {
            id: id.to_string(),
            ok: false,
            message: None,
            text: None,
            error: Some(error.to_string()),
        }
    }
}

/// The engine surface the worker loop drives.
///
/// Split out so the loop can be exercised without ONNX Runtime.
pub trait Transcriber {
    fn transcribe(&mut self, wav_path: &Path) -> Result<String>;
    fn close(&mut self);
}

impl Transcriber for InferenceEngine {
    fn transcribe(&mut self, wav_path: &Path) -> Result<String> {
        InferenceEngine::transcribe(self, wav_path)
    }

    fn close(&mut self) {
        InferenceEngine::close(self);
    }
}

/// Run the worker loop until `shutdown` or end of input.
///
/// `make_engine` is called at most once per successful engine construction;
/// a failed construction is reported on that request and retried on the
/// next `transcribe`.
pub fn run_worker<R, W, T, F>(input: R, mut output: W, mut make_engine: F) -> io::Result<()>
where
    R: BufRead,
    W: Write,
    T: Transcriber,
    F: FnMut() -> Result<T>,
{
    let mut engine: Option<T> = None;

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let request: WorkerRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                let err = RunnerError::Request(format!("Malformed request line: {e}"));
                write_response(&mut output, &WorkerResponse::error("", &err))?;
                continue;
            }
        };

        log::debug!("Worker request id={} op={}", request.id, request.op);
        match request.op.as_str() {
            "ping" => {
                write_response(&mut output, &WorkerResponse::message(&request.id, "ready"))?;
            }
            "transcribe" => {
                let response = handle_transcribe(&request, &mut engine, &mut make_engine);
                write_response(&mut output, &response)?;
            }
            "shutdown" => {
                write_response(
                    &mut output,
                    &WorkerResponse::message(&request.id, "shutting down"),
                )?;
                break;
            }
            other => {
                let err = RunnerError::Request(format!("Unsupported op: {other}"));
                write_response(&mut output, &WorkerResponse::error(&request.id, &err))?;
            }
        }
    }

    if let Some(mut engine) = engine.take() {
        engine.close();
    }
    Ok(())
}

fn handle_transcribe<T, F>(
    request: &WorkerRequest,
    engine: &mut Option<T>,
    make_engine: &mut F,
) -> WorkerResponse
where
    T: Transcriber,
    F: FnMut() -> Result<T>,
{
    let Some(audio) = request.audio.as_deref() else {
        let err = RunnerError::Request("transcribe requires an 'audio' field.".to_string());
        return WorkerResponse::error(&request.id, &err);
    };

    if engine.is_none() {
        match make_engine() {
            Ok(built) => *engine = Some(built),
            Err(e) => return WorkerResponse::error(&request.id, &e),
        }
    }

    let Some(engine) = engine.as_mut() else {
        let err = RunnerError::Inference("Engine unavailable.".to_string());
        return WorkerResponse::error(&request.id, &err);
    };

    match engine.transcribe(Path::new(audio)) {
        Ok(text) => WorkerResponse::text(&request.id, text),
        Err(e) => WorkerResponse::error(&request.id, &e),
    }
}

fn write_response<W: Write>(output: &mut W, response: &WorkerResponse) -> io::Result<()> {
    let json = serde_json::to_string(response).map_err(io::Error::other)?;
    writeln!(output, "{json}")?;
    output.flush()
}
