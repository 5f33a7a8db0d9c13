use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use parakeet_runner::engine::{self, EngineConfig, InferenceEngine};
use parakeet_runner::error::{Result, RunnerError};
use parakeet_runner::worker;

/// Local speech-to-text inference over ONNX model bundles.
#[derive(Debug, Parser)]
#[command(name = "parakeet-runner", version, about)]
struct Cli {
    /// Model file or bundle directory.
    #[arg(long)]
    model: PathBuf,

    /// WAV file to transcribe (mono, 16-bit, 16 kHz).
    #[arg(long)]
    audio: Option<PathBuf>,

    /// Tokenizer artifact overriding anything found in the bundle.
    #[arg(long)]
    tokenizer: Option<PathBuf>,

    /// Verify the model stack loads, print "ok", and exit.
    #[arg(long)]
    check: bool,

    /// Run as a persistent JSON-lines worker on stdin/stdout.
    #[arg(long, conflicts_with = "check")]
    serve: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = EngineConfig {
        model_path: cli.model,
        tokenizer: cli.tokenizer,
    };

    if cli.check {
        engine::check(&config)?;
        println!("ok");
        return Ok(());
    }

    if cli.serve {
        let stdin = io::stdin();
        let stdout = io::stdout();
        return worker::run_worker(stdin.lock(), stdout.lock(), || {
            InferenceEngine::load(&config)
        })
        .map_err(|e| RunnerError::Request(format!("Worker I/O failed: {e}")));
    }

    let Some(audio) = cli.audio else {
        return Err(RunnerError::Request(
            "--audio is required unless --check or --serve is given.".to_string(),
        ));
    };

    let mut engine = InferenceEngine::load(&config)?;
    let result = engine.transcribe(&audio);
    engine.close();
    let text = result?;

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{text}")
        .map_err(|e| RunnerError::Request(format!("Failed to write transcript: {e}")))?;
    Ok(())
}
