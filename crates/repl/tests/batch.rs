//! Integration tests for batch mode (`--eval`, `-m`/`--mung`), exercising
//! the compiled `sciteco` binary end to end the way a user would invoke
//! it -- grounded in spec.md §8's "Concrete scenarios".

use std::io::Write;
use std::process::Command;

fn eval(macro_text: &str) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_sciteco"))
        .arg("--no-profile")
        .arg("--eval")
        .arg(macro_text)
        .output()
        .expect("failed to run sciteco binary")
}

/// §8 scenario 1: `"10*5-3="` prints `47`.
#[test]
fn arithmetic_prints_result() {
    let out = eval("10*5-3=");
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "47");
}

/// `n\` then bare `\` round-trips the integer through the current radix
/// (spec.md §8 "Numeric laws").
#[test]
fn backslash_roundtrip() {
    let out = eval("42\\ 0J\\=");
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "42");
}

/// `EX$$` exits with the popped argument as the process exit code.
#[test]
fn ex_sets_exit_code() {
    let out = eval("3EX");
    assert_eq!(out.status.code(), Some(3));
}

/// A syntax error in `--eval` mode is reported and the process exits
/// non-zero (spec.md §7 "In batch mode, the error is printed ... and the
/// process exits non-zero").
#[test]
fn unmatched_close_angle_is_a_batch_error() {
    let out = eval(">");
    assert!(!out.status.success());
    assert!(!out.stderr.is_empty());
}

/// `-m`/`--mung` loads a file as a macro; `--no-profile` is still honored
/// so the test doesn't depend on the invoking user's `~/.teco_ini`.
#[test]
fn mung_runs_a_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "7*6=").unwrap();
    let out = Command::new(env!("CARGO_BIN_EXE_sciteco"))
        .arg("--no-profile")
        .arg("--mung")
        .arg(file.path())
        .output()
        .expect("failed to run sciteco binary");
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "42");
}
