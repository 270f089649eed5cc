use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn cvsload_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("cvsload");
    path
}

const MAIN_C: &str = "head\t1.2;
access;
symbols
\tREL_1_0:1.2;
locks; strict;
comment\t@ * @;


1.2
date\t2004.03.02.12.00.00;\tauthor ann;\tstate Exp;
branches;
next\t1.1;

1.1
date\t2004.03.01.12.00.00;\tauthor ann;\tstate Exp;
branches;
next\t;


desc
@@


1.2
log
@print a greeting
@
text
@/* $Revision$ */
int main(void) { puts(\"hi\"); }
@


1.1
log
@initial import
@
text
@d2 1
a2 1
int main(void) { return 0; }
@
";

const README: &str = "head\t1.1;
access;
symbols;
locks; strict;


1.1
date\t2004.03.01.12.00.02;\tauthor ann;\tstate Exp;
branches;
next\t;


desc
@@


1.1
log
@initial import
@
text
@Read me.
@
";

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    // Scratch repository
    let cvsroot = root.join("cvsroot");
    fs::create_dir_all(cvsroot.join("CVSROOT")).unwrap();
    let module = cvsroot.join("hello");
    fs::create_dir_all(module.join("src")).unwrap();
    fs::write(module.join("src/main.c,v"), MAIN_C).unwrap();
    fs::write(module.join("README,v"), README).unwrap();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_content = format!(
        r#"[origin]
url = "file://{}/cvsroot/hello"
id = "test:hello"

[store]
path = "{}/data/cvsload.sqlite"

[workers]
parse = 2
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("cvsload.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_cvsload(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = cvsload_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run cvsload binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn load_json(config_path: &Path, extra: &[&str]) -> serde_json::Value {
    let mut args = vec!["load", "--json"];
    args.extend_from_slice(extra);
    let (stdout, stderr, success) = run_cvsload(config_path, &args);
    assert!(success, "load failed: stdout={}, stderr={}", stdout, stderr);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("bad report JSON ({}): {}", e, stdout))
}

#[test]
fn test_init_creates_store() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cvsload(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/cvsload.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_cvsload(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_cvsload(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_load_and_reload() {
    let (_tmp, config_path) = setup_test_env();
    run_cvsload(&config_path, &["init"]);

    let first = load_json(&config_path, &[]);
    assert_eq!(first["origin"], "test:hello");
    assert_eq!(first["status"], "full");
    assert_eq!(first["eventful"], true);
    assert_eq!(first["counts"]["files_processed"], 2);
    assert_eq!(first["counts"]["commits_synthesized"], 2);
    assert_eq!(first["counts"]["commits_ingested"], 2);

    // The store already holds everything
    let second = load_json(&config_path, &[]);
    assert_eq!(second["status"], "full");
    assert_eq!(second["eventful"], false);
    assert_eq!(second["counts"]["commits_ingested"], 0);

    let (stdout, _, success) = run_cvsload(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Revisions:   2"), "got: {}", stdout);
    assert!(stdout.contains("test:hello"));
    assert!(stdout.contains("uneventful"));
}

#[test]
fn test_load_without_init() {
    let (_tmp, config_path) = setup_test_env();

    let report = load_json(&config_path, &[]);
    assert_eq!(report["counts"]["commits_ingested"], 2);
}

#[test]
fn test_load_dry_run() {
    let (tmp, config_path) = setup_test_env();

    let report = load_json(&config_path, &["--dry-run"]);
    assert_eq!(report["counts"]["commits_synthesized"], 2);
    assert_eq!(report["counts"]["commits_ingested"], 0);
    assert!(!tmp.path().join("data/cvsload.sqlite").exists());
}

#[test]
fn test_load_human_report() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cvsload(&config_path, &["load"]);
    assert!(success, "load failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("status:               full"));
    assert!(stdout.contains("commits ingested:     2"));
}

#[test]
fn test_load_missing_module_fails() {
    let (tmp, config_path) = setup_test_env();
    fs::remove_dir_all(tmp.path().join("cvsroot/hello")).unwrap();

    let (stdout, stderr, success) = run_cvsload(&config_path, &["load"]);
    assert!(!success, "expected failure, got: {}", stdout);
    assert!(stderr.contains("not found"), "stderr: {}", stderr);
}

#[test]
fn test_graph_json() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cvsload(&config_path, &["graph", "--json"]);
    assert!(success, "graph failed: {}", stderr);
    let graph: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let commits = graph["commits"].as_array().unwrap();
    assert_eq!(commits.len(), 2);
    assert!(commits[0]["message"].as_str().unwrap().starts_with("initial import"));
    assert_eq!(commits[0]["members"].as_array().unwrap().len(), 2);
    assert_eq!(commits[1]["parents"][0], 0);
    assert_eq!(graph["tags"]["REL_1_0"], 1);
}

#[test]
fn test_graph_human() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_cvsload(&config_path, &["graph"]);
    assert!(success);
    assert!(stdout.contains("print a greeting"));
    assert!(stdout.contains("1.2 src/main.c"));
    assert!(stdout.contains("REL_1_0 -> #1"));
}

#[test]
fn test_inspect_needs_no_config() {
    let (tmp, _config_path) = setup_test_env();
    let file = tmp.path().join("cvsroot/hello/src/main.c,v");

    let output = Command::new(cvsload_binary())
        .arg("--config")
        .arg("/nonexistent/cvsload.toml")
        .arg("inspect")
        .arg(&file)
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("head:      1.2"));
    assert!(stdout.contains("symbol:    REL_1_0 = 1.2"));
    assert!(stdout.contains("initial import"));
}

#[test]
fn test_bad_config_is_rejected() {
    let (tmp, _config_path) = setup_test_env();
    let bad = tmp.path().join("config/bad.toml");
    fs::write(&bad, "[origin]\nurl = \"/x\"\n[store]\npath = \"db\"\n[workers]\nparse = 0\n").unwrap();

    let (_, stderr, success) = run_cvsload(&bad, &["load"]);
    assert!(!success);
    assert!(stderr.contains("workers.parse"), "stderr: {}", stderr);
}
