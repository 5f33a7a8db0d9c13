use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use parakeet_runner::error::{Result, RunnerError};
use parakeet_runner::worker::{run_worker, Transcriber};

struct StubEngine {
    closes: Rc<RefCell<usize>>,
}

impl Transcriber for StubEngine {
    fn transcribe(&mut self, wav_path: &Path) -> Result<String> {
        let name = wav_path.to_string_lossy();
        if name.contains("bad") {
            Err(RunnerError::AudioFormat("Expected mono audio.".to_string()))
        } else {
            Ok(format!("transcript of {name}"))
        }
    }

    fn close(&mut self) {
        *self.closes.borrow_mut() += 1;
    }
}

struct Harness {
    builds: Rc<RefCell<usize>>,
    closes: Rc<RefCell<usize>>,
}

impl Harness {
    fn new() -> Self {
        Self {
            builds: Rc::new(RefCell::new(0)),
            closes: Rc::new(RefCell::new(0)),
        }
    }

    fn run(&self, input: &str) -> Vec<serde_json::Value> {
        let builds = Rc::clone(&self.builds);
        let closes = Rc::clone(&self.closes);
        let mut output = Vec::new();
        run_worker(input.as_bytes(), &mut output, move || {
            *builds.borrow_mut() += 1;
            Ok(StubEngine {
                closes: Rc::clone(&closes),
            })
        })
        .unwrap();

        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

#[test]
fn ping_does_not_build_engine() {
    let harness = Harness::new();
    let responses = harness.run("{\"id\":\"1\",\"op\":\"ping\"}\n");

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["id"], "1");
    assert_eq!(responses[0]["ok"], true);
    assert_eq!(responses[0]["message"], "ready");
    assert_eq!(*harness.builds.borrow(), 0);
}

#[test]
fn engine_is_built_once_and_closed_once() {
    let harness = Harness::new();
    let responses = harness.run(concat!(
        "{\"id\":\"1\",\"op\":\"transcribe\",\"audio\":\"a.wav\"}\n",
        "{\"id\":\"2\",\"op\":\"transcribe\",\"audio\":\"b.wav\"}\n",
        "{\"id\":\"3\",\"op\":\"shutdown\"}\n",
    ));

    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0]["text"], "transcript of a.wav");
    assert_eq!(responses[1]["text"], "transcript of b.wav");
    assert_eq!(responses[2]["ok"], true);
    assert_eq!(*harness.builds.borrow(), 1);
    assert_eq!(*harness.closes.borrow(), 1);
}

#[test]
fn transcription_error_keeps_worker_alive() {
    let harness = Harness::new();
    let responses = harness.run(concat!(
        "{\"id\":\"1\",\"op\":\"transcribe\",\"audio\":\"bad.wav\"}\n",
        "{\"id\":\"2\",\"op\":\"transcribe\",\"audio\":\"good.wav\"}\n",
    ));

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["ok"], false);
    assert!(responses[0]["error"]
        .as_str()
        .unwrap()
        .starts_with("AUDIO_FORMAT_ERROR:"));
    assert_eq!(responses[1]["ok"], true);
    assert_eq!(responses[1]["text"], "transcript of good.wav");
}

#[test]
fn transcribe_without_audio_is_a_request_error() {
    let harness = Harness::new();
    let responses = harness.run("{\"id\":\"1\",\"op\":\"transcribe\"}\n");

    assert_eq!(responses[0]["ok"], false);
    assert!(responses[0]["error"]
        .as_str()
        .unwrap()
        .starts_with("REQUEST_ERROR:"));
    assert_eq!(*harness.builds.borrow(), 0);
}

#[test]
fn malformed_line_gets_empty_id_error() {
    let harness = Harness::new();
    let responses = harness.run("not json\n{\"id\":\"2\",\"op\":\"ping\"}\n");

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["id"], "");
    assert_eq!(responses[0]["ok"], false);
    assert!(responses[0]["error"]
        .as_str()
        .unwrap()
        .starts_with("REQUEST_ERROR:"));
    assert_eq!(responses[1]["message"], "ready");
}

#[test]
fn unknown_op_is_rejected() {
    let harness = Harness::new();
    let responses = harness.run("{\"id\":\"9\",\"op\":\"reticulate\"}\n");

    assert_eq!(responses[0]["ok"], false);
    assert!(responses[0]["error"]
        .as_str()
        .unwrap()
        .contains("Unsupported op"));
}

#[test]
fn eof_closes_engine_without_response() {
    let harness = Harness::new();
    let responses = harness.run("{\"id\":\"1\",\"op\":\"transcribe\",\"audio\":\"a.wav\"}\n");

    assert_eq!(responses.len(), 1);
    assert_eq!(*harness.closes.borrow(), 1);
}

#[test]
fn failed_engine_construction_is_retried() {
    let attempts = Rc::new(RefCell::new(0));
    let closes = Rc::new(RefCell::new(0));
    let attempts_in = Rc::clone(&attempts);
    let closes_in = Rc::clone(&closes);

    let input = concat!(
        "{\"id\":\"1\",\"op\":\"transcribe\",\"audio\":\"a.wav\"}\n",
        "{\"id\":\"2\",\"op\":\"transcribe\",\"audio\":\"a.wav\"}\n",
    );
    let mut output = Vec::new();
    run_worker(input.as_bytes(), &mut output, move || {
        *attempts_in.borrow_mut() += 1;
        if *attempts_in.borrow() == 1 {
            Err(RunnerError::ModelLoad("Missing encoder.".to_string()))
        } else {
            Ok(StubEngine {
                closes: Rc::clone(&closes_in),
            })
        }
    })
    .unwrap();

    let responses: Vec<serde_json::Value> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(responses.len(), 2);
    assert!(responses[0]["error"]
        .as_str()
        .unwrap()
        .starts_with("MODEL_LOAD_ERROR:"));
    assert_eq!(responses[1]["ok"], true);
    assert_eq!(*attempts.borrow(), 2);
    assert_eq!(*closes.borrow(), 1);
}
