use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_chat-assist"))
}

fn run(args: &[&str]) -> Output {
    Command::new(binary())
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to run chat-assist")
}

fn write_config(root: &Path, body: &str) -> PathBuf {
    let path = root.join("chat-assist.toml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_models_lists_defaults() {
    let output = run(&["models"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().count(), 4);
    assert!(stdout.contains("deepseek-r1:1.5b"));
    assert!(stdout.contains("llama3.1:8b"));
    let default_line = stdout.lines().find(|l| l.contains("(default)")).unwrap();
    assert!(default_line.starts_with("DeepSeek-R1 8B"));
}

#[test]
fn test_models_from_config() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(
        tmp.path(),
        r#"
[model_runtime]
default_model = "Mistral"

[[models]]
name = "Mistral"
tag = "mistral:7b"

[[models]]
name = "Qwen"
tag = "qwen2.5:7b"
"#,
    );
    let output = run(&["--config", config.to_str().unwrap(), "models"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().count(), 2);
    assert!(stdout.lines().next().unwrap().contains("(default)"));
}

#[test]
fn test_invalid_chunking_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(
        tmp.path(),
        r#"
[chunking]
chunk_size = 100
overlap = 100
"#,
    );
    let output = run(&["--config", config.to_str().unwrap(), "models"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("overlap"), "stderr: {}", stderr);
}

#[test]
fn test_chunk_command_prints_spans() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(
        tmp.path(),
        r#"
[chunking]
chunk_size = 100
overlap = 20
"#,
    );
    let file = tmp.path().join("notes.txt");
    fs::write(&file, "x".repeat(250)).unwrap();

    let output = run(&[
        "--config",
        config.to_str().unwrap(),
        "chunk",
        file.to_str().unwrap(),
        "--json",
    ]);
    assert!(output.status.success());
    let chunks: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let spans: Vec<(u64, u64)> = chunks
        .as_array()
        .unwrap()
        .iter()
        .map(|c| (c["start"].as_u64().unwrap(), c["end"].as_u64().unwrap()))
        .collect();
    assert_eq!(spans, vec![(0, 100), (80, 180), (160, 250)]);
}

#[test]
fn test_chunk_rejects_unsupported_file() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("image.png");
    fs::write(&file, b"\x89PNG").unwrap();
    let output = run(&["chunk", file.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unsupported file type"));
}
