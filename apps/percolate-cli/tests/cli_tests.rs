use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

const CONFIG: &str = r#"
[matching]
mode = "simple"
workers = 2

[schema]
fields = [
    { name = "name", kind = "text" },
    { name = "text", kind = "text" },
]

[reader]
path = "queries.json"

[[sinks]]
kind = "file"
path = "out/results.jsonl"
fields = "id,name"
"#;

const QUERIES: &str = r#"[
    {"query_id": "q1", "query_name": "foxes", "query": "text:fox"},
    {"query_id": "q2", "query_name": "beta", "query": "q=name:beta"}
]"#;

const DOCS: &str = r#"{"id": "d1", "name": "alpha", "text": "quick brown fox"}
{"id": "d2", "name": "Beta", "text": "lazy fox"}
not a document
{"id": "d3", "name": "gamma", "text": "sleepy cat"}
"#;

fn setup(queries: &str) -> anyhow::Result<TempDir> {
    let dir = TempDir::new()?;
    fs::write(dir.path().join("config.toml"), CONFIG)?;
    fs::write(dir.path().join("queries.json"), queries)?;
    fs::write(dir.path().join("docs.jsonl"), DOCS)?;
    Ok(dir)
}

fn percolate(dir: &Path, args: &[&str]) -> anyhow::Result<Output> {
    let config = dir.join("config.toml");
    Ok(Command::new(env!("CARGO_BIN_EXE_percolate"))
        .args(args)
        .arg("--config")
        .arg(&config)
        .current_dir(dir)
        .env("RUST_LOG", "warn")
        .output()?)
}

#[test]
fn run_writes_grouped_results() -> anyhow::Result<()> {
    let dir = setup(QUERIES)?;
    let docs = dir.path().join("docs.jsonl");
    let out = percolate(dir.path(), &["run", docs.to_str().unwrap(), "--batch-size", "10"])?;
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let stats: serde_json::Value = serde_json::from_slice(&out.stdout)?;
    assert_eq!(stats["documents_accepted"], 3);
    assert_eq!(stats["records_delivered"], 3);

    let results = fs::read_to_string(dir.path().join("out/results.jsonl"))?;
    let lines: Vec<serde_json::Value> = results.lines().map(serde_json::from_str).collect::<Result<_, _>>()?;
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["q1"].as_array().map(Vec::len), Some(2));
    assert_eq!(lines[0]["q2"][0]["id"], "d2");
    assert_eq!(lines[0]["q2"][0]["query_s"], "q=name:beta");
    Ok(())
}

#[test]
fn info_lists_queries() -> anyhow::Result<()> {
    let dir = setup(QUERIES)?;
    let out = percolate(dir.path(), &["info"])?;
    assert!(out.status.success());
    let info: serde_json::Value = serde_json::from_slice(&out.stdout)?;
    assert_eq!(info["query_count"], 2);
    assert_eq!(info["queries"]["q1"], "text:fox");
    Ok(())
}

#[test]
fn check_fails_on_bad_queries() -> anyhow::Result<()> {
    let dir = setup(r#"[{"query_id": "q1", "query": "colour:red"}]"#)?;
    let out = percolate(dir.path(), &["check"])?;
    assert!(!out.status.success());

    let dir = setup(QUERIES)?;
    assert!(percolate(dir.path(), &["check"])?.status.success());
    Ok(())
}
