use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::tempdir;

fn quack_binary() -> &'static str {
    env!("CARGO_BIN_EXE_quack")
}

fn run(args: &[&str], paths: &[&Path]) -> Output {
    Command::new(quack_binary())
        .args(args)
        .args(paths)
        .env_remove("RUST_LOG")
        .output()
        .expect("run quack")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn types_reports_module_bindings() {
    let tmp = tempdir().expect("tempdir");
    let script = tmp.path().join("main.qk");
    fs::write(
        &script,
        "def double(x: int) -> int\n  return x + x\nend\ncount = double(2)\nname = \"quack\"\npair = (count, name)\n",
    )
    .expect("write script");

    let output = run(&["types"], &[&script]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let text = stdout(&output);
    assert!(text.contains("double(): int"), "got: {text}");
    assert!(text.contains("count: int"), "got: {text}");
    assert!(text.contains("name: str"), "got: {text}");
    assert!(text.contains("pair: tuple[int, str]"), "got: {text}");
    assert!(text.contains("main.qk:4:1"), "expected locations, got: {text}");
}

#[test]
fn calls_reports_argument_mapping() {
    let tmp = tempdir().expect("tempdir");
    let script = tmp.path().join("calls.qk");
    fs::write(
        &script,
        "class Point\n  def __init__(self, x, y=0)\n  end\nend\np = Point(1)\nmissing(2)\n",
    )
    .expect("write script");

    let output = run(&["calls"], &[&script]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let text = stdout(&output);
    assert!(
        text.contains("Point(..) -> __init__ [offset 1, constructor]"),
        "got: {text}"
    );
    assert!(text.contains("    1 -> x"), "got: {text}");
    assert!(text.contains("implicit: self"), "got: {text}");
    assert!(text.contains("defaulted: y"), "got: {text}");
    assert!(text.contains("missing(..) -> <unresolved>"), "got: {text}");
    assert!(text.contains("unmapped arguments: 2"), "got: {text}");
}

#[test]
fn json_output_is_machine_readable() {
    let tmp = tempdir().expect("tempdir");
    let script = tmp.path().join("main.qk");
    fs::write(&script, "def f(a, *rest)\nend\nf(1, 2, 3)\n").expect("write script");

    let output = run(&["calls", "--json"], &[&script]);
    assert!(output.status.success());

    let entries: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json output");
    let call = &entries[0];
    assert_eq!(call["callee"]["name"], "f");
    assert_eq!(call["callee"]["implicit_offset"], 0);
    let mapped: Vec<(String, String)> = call["mapped"]
        .as_array()
        .expect("mapped array")
        .iter()
        .map(|pair| {
            (
                pair["argument"].as_str().unwrap_or_default().to_string(),
                pair["parameter"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    assert_eq!(
        mapped,
        vec![
            ("1".to_string(), "a".to_string()),
            ("2".to_string(), "rest".to_string()),
            ("3".to_string(), "rest".to_string()),
        ]
    );
}

#[test]
fn directories_are_walked_for_sources() {
    let tmp = tempdir().expect("tempdir");
    let nested = tmp.path().join("pkg");
    fs::create_dir_all(&nested).expect("create dir");
    fs::write(nested.join("util.qk"), "def helper() -> float\nend\n").expect("write util");
    fs::write(tmp.path().join("main.qk"), "import util\nvalue = util.helper()\n")
        .expect("write main");
    fs::write(tmp.path().join("notes.txt"), "not a source file\n").expect("write notes");

    let output = run(&["types"], &[tmp.path()]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let text = stdout(&output);
    assert!(text.contains("util: module util"), "got: {text}");
    assert!(text.contains("value: float"), "got: {text}");
    assert!(text.contains("helper(): float"), "got: {text}");
}

#[test]
fn index_only_mode_leaves_inferred_returns_unknown() {
    let tmp = tempdir().expect("tempdir");
    let script = tmp.path().join("main.qk");
    fs::write(&script, "def g()\n  return 1\nend\nv = g()\n").expect("write script");

    let full = stdout(&run(&["types"], &[&script]));
    assert!(full.contains("v: int"), "got: {full}");

    let indexed = stdout(&run(&["types", "--index-only"], &[&script]));
    assert!(indexed.contains("v: unknown"), "got: {indexed}");

    let config = tmp.path().join("quack.yaml");
    fs::write(&config, "mode: index-only\n").expect("write config");
    let configured = stdout(&run(
        &["types", "--config", config.to_str().expect("utf-8 path")],
        &[&script],
    ));
    assert!(configured.contains("v: unknown"), "got: {configured}");
}

#[test]
fn config_can_disable_literal_splicing() {
    let tmp = tempdir().expect("tempdir");
    let script = tmp.path().join("main.qk");
    fs::write(&script, "def f(a, b)\nend\nf(*[1, 2])\n").expect("write script");

    let spliced = stdout(&run(&["calls"], &[&script]));
    assert!(spliced.contains("    1 -> a"), "got: {spliced}");
    assert!(spliced.contains("from spliced elements: a, b"), "got: {spliced}");

    let config = tmp.path().join("quack.yaml");
    fs::write(&config, "language:\n  splice_literal_star_args: false\n").expect("write config");
    let opaque = stdout(&run(
        &["calls", "--config", config.to_str().expect("utf-8 path")],
        &[&script],
    ));
    assert!(opaque.contains("spillover: a, b"), "got: {opaque}");
}

#[test]
fn missing_paths_fail_with_context() {
    let tmp = tempdir().expect("tempdir");
    let output = run(&["types"], &[&tmp.path().join("nope.qk")]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to access"), "got: {stderr}");
}

#[test]
fn syntax_errors_point_at_the_source() {
    let tmp = tempdir().expect("tempdir");
    let script = tmp.path().join("broken.qk");
    fs::write(&script, "def f(\n").expect("write script");

    let output = run(&["types"], &[&script]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error"), "got: {stderr}");
    assert!(stderr.contains("-->"), "got: {stderr}");
    assert!(stderr.contains("failed to parse"), "got: {stderr}");
}

#[test]
fn parse_warnings_do_not_stop_the_analysis() {
    let tmp = tempdir().expect("tempdir");
    let script = tmp.path().join("main.qk");
    fs::write(&script, "def f(a, b)\nend\nf(b=1, 2)\n").expect("write script");

    let output = run(&["calls"], &[&script]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("warning: positional argument follows keyword argument"),
        "got: {stderr}"
    );
    assert!(stderr.contains("main.qk:3:"), "got: {stderr}");
    assert!(stdout(&output).contains("f(..) -> f"), "got: {}", stdout(&output));
}

#[test]
fn invalid_config_is_reported() {
    let tmp = tempdir().expect("tempdir");
    let script = tmp.path().join("main.qk");
    fs::write(&script, "x = 1\n").expect("write script");
    let config = tmp.path().join("quack.yaml");
    fs::write(&config, "mode: sometimes\n").expect("write config");

    let output = run(
        &["types", "--config", config.to_str().expect("utf-8 path")],
        &[&script],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load config"), "got: {stderr}");
}
