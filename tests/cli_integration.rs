//! CLI integration tests
//!
//! Tests the command-line interface end-to-end.

use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Get path to the pqseal binary
fn pqseal_bin() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // Remove test binary name
    path.pop(); // Remove deps/
    path.push("pqseal");
    path
}

fn run_pqseal(args: &[&str]) -> Output {
    Command::new(pqseal_bin())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run pqseal")
}

/// Get path to testdata directory
fn testdata_path(filename: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("testdata");
    path.push(filename);
    path
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn assert_success(result: &Output, what: &str) {
    assert!(
        result.status.success(),
        "{} failed: {}",
        what,
        String::from_utf8_lossy(&result.stderr)
    );
}

#[test]
fn test_encrypt_decrypt_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext_path = testdata_path("intake.json");
    let record_path = temp_dir.path().join("intake.record.json");
    let decrypted_path = temp_dir.path().join("intake.decrypted.json");

    let result = run_pqseal(&[
        "encrypt",
        "-i",
        plaintext_path.to_str().unwrap(),
        "-o",
        record_path.to_str().unwrap(),
    ]);
    assert_success(&result, "encrypt");

    let record = fs::read_to_string(&record_path).unwrap();
    assert!(record.contains("encrypted_blob"));
    assert!(!record.contains("thirst"));

    let result = run_pqseal(&[
        "decrypt",
        "-i",
        record_path.to_str().unwrap(),
        "-o",
        decrypted_path.to_str().unwrap(),
    ]);
    assert_success(&result, "decrypt");

    assert_eq!(read_json(&decrypted_path), read_json(&plaintext_path));
}

#[test]
fn test_sections_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let plaintext_path = testdata_path("patient.json");
    let record_path = temp_dir.path().join("patient.record.json");
    let decrypted_path = temp_dir.path().join("patient.decrypted.json");

    let result = run_pqseal(&[
        "e",
        "--sections",
        "-i",
        plaintext_path.to_str().unwrap(),
        "-o",
        record_path.to_str().unwrap(),
    ]);
    assert_success(&result, "encrypt");

    let record = read_json(&record_path);
    let section_keys = record["section_keys"].as_object().unwrap();
    assert!(section_keys.contains_key("encrypted_intake"));
    assert!(section_keys.contains_key("encrypted_lab_results"));

    let result = run_pqseal(&[
        "d",
        "-i",
        record_path.to_str().unwrap(),
        "-o",
        decrypted_path.to_str().unwrap(),
    ]);
    assert_success(&result, "decrypt");

    assert_eq!(read_json(&decrypted_path), read_json(&plaintext_path));
}

#[test]
fn test_decrypt_legacy_record() {
    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("legacy.decrypted.json");

    let result = run_pqseal(&[
        "decrypt",
        "-i",
        testdata_path("legacy-record.json").to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
    ]);
    assert_success(&result, "decrypt");

    assert_eq!(read_json(&output), json!({"age": 45, "symptoms": "thirst"}));
}

#[test]
fn test_decrypt_legacy_nested_record() {
    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("nested.decrypted.json");

    let result = run_pqseal(&[
        "decrypt",
        "-i",
        testdata_path("legacy-nested-record.json").to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
    ]);
    assert_success(&result, "decrypt");

    assert_eq!(
        read_json(&output),
        json!({
            "encrypted_intake": {"age": 45, "symptoms": "thirst"},
            "encrypted_lab_results": {"hba1c": 7.8},
        })
    );
}

#[test]
fn test_decode_blob() {
    let temp_dir = TempDir::new().unwrap();
    let blob_path = temp_dir.path().join("blob.txt");
    let output = temp_dir.path().join("decoded.json");

    // Unpadded base64 of {"a":1}, as some producers wrote it.
    fs::write(&blob_path, "eyJhIjoxfQ\n").unwrap();

    let result = run_pqseal(&[
        "decode",
        "-i",
        blob_path.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
    ]);
    assert_success(&result, "decode");

    assert_eq!(read_json(&output), json!({"a": 1}));
}

#[test]
fn test_decode_garbage_fails() {
    let temp_dir = TempDir::new().unwrap();
    let blob_path = temp_dir.path().join("blob.txt");
    let output = temp_dir.path().join("decoded.json");

    fs::write(&blob_path, "not-a-blob!").unwrap();

    let result = run_pqseal(&[
        "decode",
        "-i",
        blob_path.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
    ]);

    assert!(!result.status.success());
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(
        stderr.contains("all decoding strategies failed"),
        "Expected decode error, got: {}",
        stderr
    );
    assert!(!output.exists());
}

#[test]
fn test_tampered_record_fails() {
    let temp_dir = TempDir::new().unwrap();
    let record_path = temp_dir.path().join("record.json");
    let output = temp_dir.path().join("out.json");

    let result = run_pqseal(&[
        "encrypt",
        "-i",
        testdata_path("intake.json").to_str().unwrap(),
        "-o",
        record_path.to_str().unwrap(),
    ]);
    assert_success(&result, "encrypt");

    let mut record = read_json(&record_path);
    record["wrapped_key"] = json!("AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=");
    fs::write(&record_path, record.to_string()).unwrap();

    let result = run_pqseal(&[
        "decrypt",
        "-i",
        record_path.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
    ]);

    assert!(!result.status.success());
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(
        stderr.contains("tampered"),
        "Expected integrity error, got: {}",
        stderr
    );
    assert!(!output.exists());
}

#[test]
fn test_decrypt_nonexistent_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let nonexistent = temp_dir.path().join("nonexistent.json");
    let output = temp_dir.path().join("output.json");

    let result = run_pqseal(&[
        "decrypt",
        "-i",
        nonexistent.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
    ]);

    assert!(!result.status.success());
    assert!(!output.exists());
}

#[test]
fn test_encrypt_non_mapping_fails() {
    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("list.json");
    let output = temp_dir.path().join("record.json");
    fs::write(&input, "[1, 2, 3]").unwrap();

    let result = run_pqseal(&[
        "encrypt",
        "-i",
        input.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
    ]);

    assert!(!result.status.success());
    assert!(!output.exists());
}
