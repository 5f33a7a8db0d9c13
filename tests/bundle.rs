use std::fs;
use std::path::{Path, PathBuf};

use parakeet_runner::bundle::{self, resolve_bundle};
use parakeet_runner::error::RunnerError;

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// Lay down a minimal complete export using alternate names.
fn seed_alternate_bundle(dir: &Path) -> PathBuf {
    let model = dir.join("model.onnx");
    write(&model, "encoder-bytes");
    write(&dir.join("decoder_joint.onnx"), "decoder-bytes");
    write(&dir.join("config.yaml"), "cfg: 1");
    write(&dir.join("preprocessor.onnx"), "preprocessor-bytes");
    write(&dir.join("tokens.txt"), "a 0\n<blk> 1\n");
    model
}

#[test]
fn alternate_names_are_copied_to_canonical_names() {
    let tmp = tempfile::tempdir().unwrap();
    let model = seed_alternate_bundle(tmp.path());

    let bundle = resolve_bundle(&model, None).unwrap();

    assert_eq!(bundle.encoder, tmp.path().join(bundle::ENCODER_FILE));
    assert_eq!(bundle.decoder, tmp.path().join(bundle::DECODER_FILE));
    assert_eq!(bundle.config, tmp.path().join(bundle::CONFIG_FILE));
    assert_eq!(bundle.normalizer, tmp.path().join(bundle::NORMALIZER_FILE));
    assert_eq!(bundle.vocab, Some(tmp.path().join(bundle::VOCAB_FILE)));

    assert_eq!(
        fs::read(&bundle.encoder).unwrap(),
        fs::read(tmp.path().join("model.onnx")).unwrap()
    );
    assert_eq!(fs::read_to_string(&bundle.vocab.unwrap()).unwrap(), "a 0\n<blk> 1\n");
    assert_eq!(bundle.copied.len(), 5);
}

#[test]
fn second_resolution_copies_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let model = seed_alternate_bundle(tmp.path());

    let first = resolve_bundle(&model, None).unwrap();
    assert!(!first.copied.is_empty());

    let second = resolve_bundle(&model, None).unwrap();
    assert!(second.copied.is_empty(), "copied: {:?}", second.copied);

    // Pointing at the canonical encoder is also copy-free.
    let third = resolve_bundle(&first.encoder, None).unwrap();
    assert!(third.copied.is_empty(), "copied: {:?}", third.copied);
}

#[test]
fn recursive_search_prefers_shallow_then_lexicographic() {
    let tmp = tempfile::tempdir().unwrap();
    let model = seed_alternate_bundle(tmp.path());
    fs::remove_file(tmp.path().join("decoder_joint.onnx")).unwrap();

    write(
        &tmp.path().join("b/deep/decoder_joint-model.onnx"),
        "too-deep",
    );
    write(&tmp.path().join("z/decoder_joint-model.onnx"), "z-shallow");
    write(&tmp.path().join("a/decoder_joint-model.onnx"), "a-shallow");

    let bundle = resolve_bundle(&model, None).unwrap();
    assert_eq!(fs::read_to_string(&bundle.decoder).unwrap(), "a-shallow");
}

#[test]
fn missing_decoder_is_a_model_load_error() {
    let tmp = tempfile::tempdir().unwrap();
    let model = seed_alternate_bundle(tmp.path());
    fs::remove_file(tmp.path().join("decoder_joint.onnx")).unwrap();

    let err = resolve_bundle(&model, None).unwrap_err();
    assert!(matches!(err, RunnerError::ModelLoad(_)), "{err}");
    assert!(err.to_string().contains("decoder"));
}

#[test]
fn missing_model_file_is_a_model_load_error() {
    let tmp = tempfile::tempdir().unwrap();
    let err = resolve_bundle(&tmp.path().join("absent.onnx"), None).unwrap_err();
    assert!(matches!(err, RunnerError::ModelLoad(_)), "{err}");
}

#[test]
fn missing_vocab_without_tokenizer_artifact_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let model = seed_alternate_bundle(tmp.path());
    fs::remove_file(tmp.path().join("tokens.txt")).unwrap();

    let err = resolve_bundle(&model, None).unwrap_err();
    assert!(matches!(err, RunnerError::TokenizerMissing(_)), "{err}");
}

#[test]
fn tokenizer_json_satisfies_vocab_requirement() {
    let tmp = tempfile::tempdir().unwrap();
    let model = seed_alternate_bundle(tmp.path());
    fs::remove_file(tmp.path().join("tokens.txt")).unwrap();
    write(
        &tmp.path().join("tokenizer.json"),
        "{\"model\":{\"vocab\":{\"a\":0}}}",
    );

    let bundle = resolve_bundle(&model, None).unwrap();
    assert_eq!(bundle.vocab, None);
}

#[test]
fn txt_override_replaces_vocabulary() {
    let tmp = tempfile::tempdir().unwrap();
    let model = seed_alternate_bundle(tmp.path());

    let override_dir = tempfile::tempdir().unwrap();
    let override_path = override_dir.path().join("custom.txt");
    write(&override_path, "x 0\n<blk> 1\n");

    let bundle = resolve_bundle(&model, Some(&override_path)).unwrap();
    let vocab = bundle.vocab.unwrap();
    assert_eq!(vocab, tmp.path().join(bundle::VOCAB_FILE));
    assert_eq!(fs::read_to_string(&vocab).unwrap(), "x 0\n<blk> 1\n");
}

#[test]
fn model_override_lands_as_tokenizer_model() {
    let tmp = tempfile::tempdir().unwrap();
    let model = seed_alternate_bundle(tmp.path());

    let override_dir = tempfile::tempdir().unwrap();
    let override_path = override_dir.path().join("sp.model");
    write(&override_path, "sp-bytes");

    let bundle = resolve_bundle(&model, Some(&override_path)).unwrap();
    assert_eq!(
        fs::read_to_string(tmp.path().join("tokenizer.model")).unwrap(),
        "sp-bytes"
    );
    // The discovered vocabulary stays in place.
    assert_eq!(bundle.vocab, Some(tmp.path().join(bundle::VOCAB_FILE)));
}

#[test]
fn unsupported_override_extension_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let model = seed_alternate_bundle(tmp.path());

    let override_dir = tempfile::tempdir().unwrap();
    let override_path = override_dir.path().join("tokens.bin");
    write(&override_path, "bytes");

    let err = resolve_bundle(&model, Some(&override_path)).unwrap_err();
    assert!(matches!(err, RunnerError::Tokenizer(_)), "{err}");
}

#[test]
fn int8_siblings_are_discovered() {
    let tmp = tempfile::tempdir().unwrap();
    let model = seed_alternate_bundle(tmp.path());
    write(&tmp.path().join("encoder-model.int8.onnx"), "int8-bytes");

    let bundle = resolve_bundle(&model, None).unwrap();
    assert_eq!(
        bundle.int8_variant(&bundle.encoder),
        Some(tmp.path().join("encoder-model.int8.onnx"))
    );
    assert_eq!(bundle.int8_variant(&bundle.decoder), None);
}
