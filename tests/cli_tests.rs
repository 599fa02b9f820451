use std::io::Write;
use std::process::Command;

use tempfile::NamedTempFile;

const BINARY_NAME: &str = "mext";

/// Runs the CLI binary with the given arguments and returns its output.
fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new("cargo")
        .args(["run", "--bin", BINARY_NAME, "--"])
        .args(args)
        .output()
        .expect("Failed to execute command")
}

/// Creates a temporary file with the given suffix and writes `contents` to it.
fn write_temp(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("Failed to create temp file");
    file.write_all(contents.as_bytes()).expect("Failed to write to temp file");
    file
}

#[test]
fn renders_a_template_file_to_stdout() {
    let template = write_temp(".mext", "Hello, {name}!");
    let params = write_temp(".json", r#"{"name": "World"}"#);

    let output = run_cli(&[
        template.path().to_str().unwrap(),
        "-p",
        params.path().to_str().unwrap(),
    ]);

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "Hello, World!");
}

#[test]
fn writes_output_to_a_file_with_output_flag() {
    let template = write_temp(".mext", "fixed output");
    let out_path = tempfile::NamedTempFile::new().unwrap().path().to_path_buf();

    let output = run_cli(&[
        template.path().to_str().unwrap(),
        "-o",
        out_path.to_str().unwrap(),
    ]);

    assert!(output.status.success());
    let written = std::fs::read_to_string(&out_path).unwrap();
    assert_eq!(written, "fixed output");
}

#[test]
fn merges_multiple_param_files_left_to_right() {
    let template = write_temp(".mext", "{a} {b}");
    let first = write_temp(".json", r#"{"a": "1", "b": "1"}"#);
    let second = write_temp(".json", r#"{"b": "2"}"#);

    let output = run_cli(&[
        template.path().to_str().unwrap(),
        "-p",
        first.path().to_str().unwrap(),
        "-p",
        second.path().to_str().unwrap(),
    ]);

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "1 2");
}

#[test]
fn reports_a_nonzero_exit_code_on_render_error() {
    let template = write_temp(".mext", "{undefined_name}");

    let output = run_cli(&[template.path().to_str().unwrap()]);

    assert!(!output.status.success());
    assert!(!output.stderr.is_empty());
}

#[test]
fn trace_flag_writes_chunks_to_stderr() {
    let template = write_temp(".mext", "{@set a 1}{a}");

    let output = run_cli(&[template.path().to_str().unwrap(), "--trace"]);

    assert!(output.status.success());
    assert!(!output.stderr.is_empty());
}
