use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use percolate_core::config::{Config, PercolatorConfig};
use percolate_core::traits::{QueryReader, QueryRegistry};
use percolate_core::types::{InputDocument, Meta};
use percolate_io::{build_reader, build_sinks};
use percolate_pipeline::{Pipeline, PipelineOptions};
use percolate_text::QueryMonitor;

const DEFAULT_BATCH_SIZE: usize = 500;

const USAGE: &str = "Usage: percolate <run|info|check> [--config <file>] [args...]
  run <documents.jsonl> [--batch-size N]   match documents and dispatch results
  info                                     list registered queries
  check                                    validate config and compile queries";

struct Args {
    cmd: String,
    config: Option<PathBuf>,
    batch_size: usize,
    positional: Vec<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = env::args().skip(1);
    let Some(cmd) = args.next() else { bail!("{USAGE}") };
    let mut parsed = Args { cmd, config: None, batch_size: DEFAULT_BATCH_SIZE, positional: Vec::new() };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => parsed.config = Some(args.next().map(PathBuf::from).context("--config requires a path")?),
            "--batch-size" | "-b" => {
                let n = args.next().context("--batch-size requires a number")?;
                parsed.batch_size = n.parse().with_context(|| format!("invalid --batch-size '{n}'"))?;
                if parsed.batch_size == 0 { bail!("--batch-size must be > 0"); }
            }
            "--help" | "-h" => bail!("{USAGE}"),
            _ if !arg.starts_with('-') => parsed.positional.push(arg),
            _ => bail!("unknown option '{arg}'\n{USAGE}"),
        }
    }
    Ok(parsed)
}

fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("percolate=info"))?;
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
    Ok(())
}

/// Loads the config and the directory its relative paths resolve against.
fn load_config(path: Option<&Path>) -> anyhow::Result<(PercolatorConfig, PathBuf)> {
    let (config, base) = match path {
        Some(p) => (Config::from_file(p)?, p.parent().map(Path::to_path_buf).unwrap_or_default()),
        None => (Config::load()?, env::current_dir()?),
    };
    Ok((config.percolator()?, base))
}

/// Builds the registry from the configured query source. Queries that fail
/// to compile are reported and skipped.
fn load_monitor(config: &PercolatorConfig, base: &Path) -> anyhow::Result<(QueryMonitor, usize)> {
    let monitor = QueryMonitor::new(&config.schema)?;
    let Some(reader_config) = &config.reader else {
        bail!("reader.path must be configured");
    };
    let reader = build_reader(reader_config, base)?;
    let metadata = Meta::from([("source".to_string(), reader.path().display().to_string())]);
    let queries = reader.read_all(&metadata)?;
    let total = queries.len();
    let errors = monitor.register_all(queries);
    tracing::info!(registered = total - errors.len(), rejected = errors.len(), "queries loaded");
    Ok((monitor, errors.len()))
}

fn read_documents(path: &Path) -> anyhow::Result<Vec<InputDocument>> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut docs = Vec::new();
    for (n, line) in content.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
        match serde_json::from_str::<InputDocument>(line) {
            Ok(doc) => docs.push(doc),
            Err(e) => tracing::warn!(line = n + 1, error = %e, "skipping malformed document line"),
        }
    }
    Ok(docs)
}

fn run(args: &Args, config: &PercolatorConfig, base: &Path) -> anyhow::Result<()> {
    let Some(docs_path) = args.positional.first() else { bail!("run requires a documents file\n{USAGE}") };
    let (monitor, _) = load_monitor(config, base)?;
    let sinks = build_sinks(&config.sinks, base)?;
    let pipeline = Pipeline::new(Arc::new(monitor), sinks, PipelineOptions::from_config(config))?;

    let docs = read_documents(Path::new(docs_path))?;
    let pb = ProgressBar::new(docs.len() as u64);
    pb.set_style(ProgressStyle::default_bar().template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} docs ({percent}%) {msg}")?.progress_chars("#>-"));
    let mut processor = pipeline.processor();
    for doc in docs {
        processor.accept(doc);
        if processor.pending() >= args.batch_size {
            processor.finish();
        }
        pb.inc(1);
    }
    processor.finish();
    pb.finish_with_message("submitted");
    pipeline.shutdown();

    println!("{}", serde_json::to_string_pretty(&pipeline.stats())?);
    Ok(())
}

fn info(config: &PercolatorConfig, base: &Path) -> anyhow::Result<()> {
    let (monitor, _) = load_monitor(config, base)?;
    let queries: BTreeMap<String, String> = monitor.queries().iter().map(|q| (q.id.clone(), q.query.clone())).collect();
    let sinks: Vec<String> = config.sinks.iter().map(|s| s.fields().to_string()).collect();
    let view = json!({
        "query_count": monitor.query_count(),
        "queries": queries,
        "mode": config.matching.mode,
        "workers": config.matching.workers,
        "sink_fields": sinks,
    });
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

fn check(config: &PercolatorConfig, base: &Path) -> anyhow::Result<()> {
    let (monitor, rejected) = load_monitor(config, base)?;
    println!("config ok: {} sinks, mode {}, {} workers", config.sinks.len(), config.matching.mode, config.matching.workers);
    println!("queries: {} registered, {} rejected", monitor.queries().len(), rejected);
    if rejected > 0 { bail!("{rejected} queries failed to compile"); }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let args = parse_args()?;
    let (config, base) = load_config(args.config.as_deref()).map_err(|e| { eprintln!("Error loading config: {}", e); e })?;
    match args.cmd.as_str() {
        "run" => run(&args, &config, &base),
        "info" => info(&config, &base),
        "check" => check(&config, &base),
        other => bail!("Unknown command: {other}\n{USAGE}"),
    }
}
