//! End-to-end tests for the `relabel` binary

use assert_cmd::Command;
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use relabel_runtime::bytecode::{BinaryOperator, CodeBuilder, Comparison};
use relabel_runtime::goto::MarkerNames;
use relabel_runtime::CodeObject;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn relabel(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("relabel").unwrap();
    cmd.current_dir(dir);
    for var in [
        "RUST_LOG",
        "RELABEL_JUMP_MARKER",
        "RELABEL_LABEL_MARKER",
        "RELABEL_MAX_EXTENSION_STAGES",
        "RELABEL_MAX_STEPS",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn write_code(dir: &TempDir, name: &str, code: &CodeObject) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, code.to_json().unwrap()).unwrap();
    path
}

fn skip_b(markers: MarkerNames) -> CodeObject {
    let mut b = CodeBuilder::new("func").with_markers(markers);
    b.print_const("A");
    b.goto_marker("L");
    b.print_const("B");
    b.label_marker("L");
    b.print_const("C");
    b.finish().unwrap()
}

#[test]
fn test_run_patched() {
    let dir = TempDir::new().unwrap();
    let input = write_code(&dir, "func.json", &skip_b(MarkerNames::default()));

    relabel(dir.path())
        .args(["run", "--patch"])
        .arg(&input)
        .assert()
        .success()
        .stdout("A\nC\n");
}

#[test]
fn test_run_unpatched_fails_at_marker() {
    let dir = TempDir::new().unwrap();
    let input = write_code(&dir, "func.json", &skip_b(MarkerNames::default()));

    relabel(dir.path())
        .arg("run")
        .arg(&input)
        .assert()
        .failure()
        .stdout("A\n")
        .stderr(predicate::str::contains("not goto-patched"));
}

#[test]
fn test_patch_to_file() {
    let dir = TempDir::new().unwrap();
    let code = skip_b(MarkerNames::default());
    let input = write_code(&dir, "func.json", &code);
    let output = dir.path().join("patched.json");

    relabel(dir.path())
        .arg("patch")
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .arg("--stats")
        .assert()
        .success()
        .stderr(predicate::str::contains("1 jump(s)"));

    let patched = CodeObject::from_json(&fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(patched.instructions.len(), code.instructions.len());
    assert_eq!(patched, relabel_runtime::patch(&code).unwrap());

    relabel(dir.path())
        .arg("run")
        .arg(&output)
        .assert()
        .success()
        .stdout("A\nC\n");
}

#[test]
fn test_patch_to_stdout() {
    let dir = TempDir::new().unwrap();
    let input = write_code(&dir, "func.json", &skip_b(MarkerNames::default()));

    let out = relabel(dir.path()).arg("patch").arg(&input).output().unwrap();
    assert!(out.status.success());
    let patched = CodeObject::from_json(&String::from_utf8(out.stdout).unwrap()).unwrap();
    assert_eq!(patched.name, "func");
}

#[test]
fn test_patch_reports_unresolved_label() {
    let dir = TempDir::new().unwrap();
    let mut b = CodeBuilder::new("func");
    b.goto_marker("nowhere");
    let input = write_code(&dir, "func.json", &b.finish().unwrap());

    relabel(dir.path())
        .arg("patch")
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing label marker for `nowhere`"));
}

#[test]
fn test_scan_text() {
    let dir = TempDir::new().unwrap();
    let input = write_code(&dir, "func.json", &skip_b(MarkerNames::default()));

    relabel(dir.path())
        .arg("scan")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("L  target 0028  jumps from 0008"))
        .stdout(predicate::str::contains("0008 -> 0028  JUMP_FORWARD 9"));
}

#[test]
fn test_scan_json() {
    let dir = TempDir::new().unwrap();
    let input = write_code(&dir, "func.json", &skip_b(MarkerNames::default()));

    let out = relabel(dir.path())
        .args(["scan", "--json"])
        .arg(&input)
        .output()
        .unwrap();
    assert!(out.status.success());
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["plan"][0]["origin"], 8);
    assert_eq!(report["plan"][0]["target"], 28);
    assert_eq!(report["erase"]["ranges"].as_array().map(Vec::len), Some(2));
}

#[test]
fn test_disasm_patched() {
    let dir = TempDir::new().unwrap();
    let input = write_code(&dir, "func.json", &skip_b(MarkerNames::default()));

    relabel(dir.path())
        .args(["disasm", "--patch"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("JUMP_FORWARD"))
        .stdout(predicate::str::contains("(GOTO)").not());
}

#[test]
fn test_markers_from_config() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("relabel.toml"),
        "[markers]\njump = \"JUMP\"\nlabel = \"HERE\"\n",
    )
    .unwrap();
    let input = write_code(&dir, "func.json", &skip_b(MarkerNames::new("JUMP", "HERE")));

    relabel(dir.path())
        .args(["run", "--patch"])
        .arg(&input)
        .assert()
        .success()
        .stdout("A\nC\n");
}

#[test]
fn test_markers_from_env() {
    let dir = TempDir::new().unwrap();
    let input = write_code(&dir, "func.json", &skip_b(MarkerNames::new("JUMP", "LABEL")));

    relabel(dir.path())
        .env("RELABEL_JUMP_MARKER", "JUMP")
        .args(["run", "--patch"])
        .arg(&input)
        .assert()
        .success()
        .stdout("A\nC\n");
}

#[test]
fn test_invalid_config() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("relabel.toml"), "[patch]\nmax_extension_stages = 7\n").unwrap();
    let input = write_code(&dir, "func.json", &skip_b(MarkerNames::default()));

    relabel(dir.path())
        .arg("patch")
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load relabel.toml"));
}

#[test]
fn test_run_step_limit() {
    let dir = TempDir::new().unwrap();
    let mut b = CodeBuilder::new("spin");
    b.load_const(0i64).store_fast("k");
    b.label_marker("top");
    b.update_local("k", BinaryOperator::Add, 1i64);
    b.goto_marker("top");
    let input = write_code(&dir, "spin.json", &b.finish().unwrap());

    relabel(dir.path())
        .args(["run", "--patch", "--max-steps", "500"])
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("step limit of 500"));
}

#[test]
fn test_run_with_arguments() {
    let dir = TempDir::new().unwrap();
    let mut b = CodeBuilder::new("countdown");
    b.arg("n");
    b.label_marker("top");
    b.print_local("n");
    b.update_local("n", BinaryOperator::Sub, 1i64);
    let done = b.new_label();
    b.load_fast("n").load_const(0i64).compare(Comparison::Greater);
    b.pop_jump_if_false(done);
    b.goto_marker("top");
    b.place(done).unwrap();
    b.load_fast("n").return_value();
    let input = write_code(&dir, "countdown.json", &b.finish().unwrap());

    relabel(dir.path())
        .args(["run", "--patch"])
        .arg(&input)
        .arg("3")
        .assert()
        .success()
        .stdout("3\n2\n1\n0\n");
}

#[test]
fn test_missing_input() {
    let dir = TempDir::new().unwrap();
    relabel(dir.path())
        .args(["disasm", "nope.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read code object"));
}
