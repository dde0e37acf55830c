use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use percolate_core::config::{FieldDef, FieldKind, SchemaConfig};
use percolate_core::error::{Error, Result};
use percolate_core::record::{FieldList, SinkPayload};
use percolate_core::traits::{MatchingEngine, QueryRegistry, ResultSink};
use percolate_core::types::{IngestedDocument, InputDocument, MatchMode, MatchOutcome, StandingQuery};
use percolate_pipeline::{Pipeline, PipelineOptions};
use percolate_text::QueryMonitor;
use serde_json::json;

struct RecordingSink {
    name: String,
    fields: FieldList,
    payloads: Mutex<Vec<SinkPayload>>,
    shutdowns: AtomicUsize,
    late_deliveries: AtomicUsize,
}

impl RecordingSink {
    fn new(name: &str, fields: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fields: FieldList::parse(fields).unwrap(),
            payloads: Mutex::new(Vec::new()),
            shutdowns: AtomicUsize::new(0),
            late_deliveries: AtomicUsize::new(0),
        })
    }

    fn payloads(&self) -> Vec<SinkPayload> { self.payloads.lock().unwrap().clone() }

    fn json(&self) -> Vec<serde_json::Value> {
        self.payloads().iter().map(|p| serde_json::to_value(p).unwrap()).collect()
    }
}

impl ResultSink for RecordingSink {
    fn name(&self) -> &str { &self.name }
    fn field_list(&self) -> &FieldList { &self.fields }
    fn deliver(&self, payload: &SinkPayload) -> Result<()> {
        if self.shutdowns.load(Ordering::SeqCst) > 0 {
            self.late_deliveries.fetch_add(1, Ordering::SeqCst);
        }
        self.payloads.lock().unwrap().push(payload.clone());
        Ok(())
    }
    fn shutdown(&self) -> Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct BrokenSink {
    fields: FieldList,
    panic: bool,
}

impl ResultSink for BrokenSink {
    fn name(&self) -> &str { if self.panic { "panicking" } else { "failing" } }
    fn field_list(&self) -> &FieldList { &self.fields }
    fn deliver(&self, _payload: &SinkPayload) -> Result<()> {
        if self.panic { panic!("sink blew up"); }
        Err(Error::sink("failing", "connection refused"))
    }
    fn shutdown(&self) -> Result<()> { Ok(()) }
}

/// Wraps a monitor and pretends some queries were deleted after matching.
struct HidingRegistry {
    monitor: QueryMonitor,
    hidden: HashSet<String>,
}

impl QueryRegistry for HidingRegistry {
    type Engine = QueryMonitor;
    fn engine(&self) -> &QueryMonitor { &self.monitor }
    fn query_count(&self) -> usize { self.monitor.query_count() - self.hidden.len() }
    fn lookup(&self, query_id: &str) -> Option<Arc<StandingQuery>> {
        if self.hidden.contains(query_id) { None } else { self.monitor.lookup(query_id) }
    }
    fn list(&self) -> Vec<Arc<StandingQuery>> {
        self.monitor.queries().into_iter().filter(|q| !self.hidden.contains(&q.id)).collect()
    }
}

/// An engine whose batch evaluation always fails.
struct BrokenEngine;

impl MatchingEngine for BrokenEngine {
    type Doc = String;
    fn convert(&self, doc: &InputDocument) -> Result<IngestedDocument<String>> {
        let id = doc.get("id").and_then(|v| v.first()).map(|v| v.to_string()).ok_or_else(|| Error::conversion("?", "no id"))?;
        Ok(IngestedDocument { id: id.clone(), matchable: id })
    }
    fn match_batch(&self, _docs: &[IngestedDocument<String>], _mode: MatchMode) -> Result<Vec<MatchOutcome>> {
        Err(Error::Engine("index writer failed".into()))
    }
}

impl QueryRegistry for BrokenEngine {
    type Engine = Self;
    fn engine(&self) -> &Self { self }
    fn query_count(&self) -> usize { 0 }
    fn lookup(&self, _query_id: &str) -> Option<Arc<StandingQuery>> { None }
    fn list(&self) -> Vec<Arc<StandingQuery>> { Vec::new() }
}

fn monitor() -> QueryMonitor {
    let m = QueryMonitor::new(&SchemaConfig {
        fields: vec![FieldDef::new("name", FieldKind::Text), FieldDef::new("text", FieldKind::Text)],
        ..SchemaConfig::default()
    })
    .unwrap();
    let errors = m.register_all(vec![
        StandingQuery::new("q1", "foxes", "text:fox"),
        StandingQuery::new("q2", "beta", "name:beta"),
    ]);
    assert!(errors.is_empty(), "{errors:?}");
    m
}

fn documents() -> Vec<InputDocument> {
    vec![
        InputDocument::new().with_field("id", "d1").with_field("name", "alpha").with_field("text", "quick brown fox"),
        InputDocument::new().with_field("id", "d2").with_field("name", "Beta").with_field("text", "lazy fox"),
        InputDocument::new().with_field("id", "d3").with_field("name", "gamma").with_field("text", "sleepy cat"),
    ]
}

fn options(mode: MatchMode) -> PipelineOptions {
    PipelineOptions { mode, workers: 2, ..PipelineOptions::default() }
}

fn run_one_batch<R: QueryRegistry>(pipeline: &Pipeline<R>, docs: Vec<InputDocument>) {
    let mut processor = pipeline.processor();
    for doc in docs {
        processor.accept(doc);
    }
    processor.finish();
    pipeline.flush();
}

#[test]
fn simple_mode_groups_records_by_query() -> anyhow::Result<()> {
    let sink = RecordingSink::new("recording", "id,name");
    let pipeline = Pipeline::new(Arc::new(monitor()), vec![sink.clone() as Arc<dyn ResultSink>], options(MatchMode::Simple))?;
    run_one_batch(&pipeline, documents());

    assert_eq!(sink.json(), vec![json!({
        "q1": [
            {"id": "d1", "name": "alpha", "queryid_s": "q1", "query_s": "text:fox"},
            {"id": "d2", "name": "Beta", "queryid_s": "q1", "query_s": "text:fox"},
        ],
        "q2": [
            {"id": "d2", "name": "Beta", "queryid_s": "q2", "query_s": "name:beta"},
        ],
    })]);

    let stats = pipeline.stats();
    assert_eq!(stats.documents_accepted, 3);
    assert_eq!(stats.batches_dispatched, 1);
    assert_eq!(stats.matches, 3);
    assert_eq!(stats.records_delivered, 3);
    Ok(())
}

#[test]
fn highlighting_mode_adds_hits() -> anyhow::Result<()> {
    let sink = RecordingSink::new("recording", "id");
    let pipeline = Pipeline::new(Arc::new(monitor()), vec![sink.clone() as Arc<dyn ResultSink>], options(MatchMode::Highlighting))?;
    run_one_batch(&pipeline, documents());

    let payloads = sink.payloads();
    assert_eq!(payloads.len(), 1);
    let q2 = payloads[0].get("q2").expect("q2 group");
    assert_eq!(q2.len(), 1);
    let hits: serde_json::Value = serde_json::from_str(q2[0].hits().expect("hits_s present"))?;
    assert_eq!(hits, json!({"name": [{"start_position": 0, "end_position": 0, "start_offset": 0, "end_offset": 4}]}));

    for (_, records) in payloads[0].iter() {
        assert!(records.iter().all(|r| r.hits().is_some()));
    }
    Ok(())
}

#[test]
fn every_record_sits_under_its_own_query() -> anyhow::Result<()> {
    let sink = RecordingSink::new("recording", "*");
    let pipeline = Pipeline::new(Arc::new(monitor()), vec![sink.clone() as Arc<dyn ResultSink>], options(MatchMode::Simple))?;
    let docs: Vec<InputDocument> = (0..40)
        .map(|i| {
            let text = if i % 2 == 0 { "a fox" } else { "a dog" };
            let name = if i % 5 == 0 { "beta" } else { "delta" };
            InputDocument::new().with_field("id", format!("doc-{i}")).with_field("name", name).with_field("text", text)
        })
        .collect();
    run_one_batch(&pipeline, docs);

    let payload = &sink.payloads()[0];
    for (query_id, records) in payload.iter() {
        assert!(!records.is_empty());
        assert!(records.iter().all(|r| r.query_id() == query_id));
    }
    assert_eq!(payload.get("q1").map(<[_]>::len), Some(20));
    assert_eq!(payload.get("q2").map(<[_]>::len), Some(8));
    Ok(())
}

#[test]
fn query_deleted_before_dispatch_is_dropped() -> anyhow::Result<()> {
    let registry = HidingRegistry { monitor: monitor(), hidden: HashSet::from(["q2".to_string()]) };
    let sink = RecordingSink::new("recording", "id");
    let pipeline = Pipeline::new(Arc::new(registry), vec![sink.clone() as Arc<dyn ResultSink>], options(MatchMode::Simple))?;
    run_one_batch(&pipeline, documents());

    let payloads = sink.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].query_ids().collect::<Vec<_>>(), vec!["q1"]);
    assert_eq!(payloads[0].record_count(), 2);
    assert_eq!(pipeline.stats().records_dropped, 1);
    Ok(())
}

#[test]
fn malformed_document_does_not_poison_the_batch() -> anyhow::Result<()> {
    let sink = RecordingSink::new("recording", "id");
    let pipeline = Pipeline::new(Arc::new(monitor()), vec![sink.clone() as Arc<dyn ResultSink>], options(MatchMode::Simple))?;
    let mut processor = pipeline.processor();
    let mut docs = documents();
    docs.insert(1, InputDocument::new().with_field("name", "no id here").with_field("text", "fox"));
    docs.push(InputDocument::new().with_field("id", "d4").with_field("colour", "red"));
    let accepted: Vec<bool> = docs.into_iter().map(|d| processor.accept(d)).collect();
    assert_eq!(accepted, vec![true, false, true, true, false]);
    assert_eq!(processor.pending(), 3);
    processor.finish();
    pipeline.flush();

    assert_eq!(sink.payloads()[0].record_count(), 3);
    let stats = pipeline.stats();
    assert_eq!(stats.documents_rejected, 2);
    assert_eq!(stats.documents_accepted, 3);
    Ok(())
}

#[test]
fn failing_sinks_do_not_block_others() -> anyhow::Result<()> {
    let fields = FieldList::parse("id")?;
    let recording = RecordingSink::new("recording", "id");
    let failing: Arc<dyn ResultSink> = Arc::new(BrokenSink { fields: fields.clone(), panic: false });
    let panicking: Arc<dyn ResultSink> = Arc::new(BrokenSink { fields, panic: true });
    let sinks = vec![failing, panicking, recording.clone() as Arc<dyn ResultSink>];
    let pipeline = Pipeline::new(Arc::new(monitor()), sinks, options(MatchMode::Simple))?;
    run_one_batch(&pipeline, documents());
    run_one_batch(&pipeline, documents());

    assert_eq!(recording.payloads().len(), 2);
    let stats = pipeline.stats();
    assert_eq!(stats.sink_failures, 4);
    assert_eq!(stats.batches_dispatched, 2);
    Ok(())
}

#[test]
fn engine_failure_drops_the_batch_only() -> anyhow::Result<()> {
    let sink = RecordingSink::new("recording", "id");
    let pipeline = Pipeline::new(Arc::new(BrokenEngine), vec![sink.clone() as Arc<dyn ResultSink>], options(MatchMode::Simple))?;
    run_one_batch(&pipeline, documents());
    run_one_batch(&pipeline, documents());

    assert!(sink.payloads().is_empty());
    let stats = pipeline.stats();
    assert_eq!(stats.batches_submitted, 2);
    assert_eq!(stats.batches_failed, 2);
    assert_eq!(stats.batches_dispatched, 0);
    Ok(())
}

#[test]
fn batches_without_matches_deliver_an_empty_payload() -> anyhow::Result<()> {
    let sink = RecordingSink::new("recording", "id");
    let pipeline = Pipeline::new(Arc::new(monitor()), vec![sink.clone() as Arc<dyn ResultSink>], options(MatchMode::Simple))?;
    run_one_batch(&pipeline, vec![InputDocument::new().with_field("id", "d9").with_field("text", "nothing relevant")]);
    // an empty batch is never submitted
    run_one_batch(&pipeline, Vec::new());

    let payloads = sink.payloads();
    assert_eq!(payloads.len(), 1);
    assert!(payloads[0].is_empty());
    assert_eq!(sink.json(), vec![json!({})]);
    assert_eq!(pipeline.stats().batches_submitted, 1);
    assert_eq!(pipeline.stats().batches_dispatched, 1);
    Ok(())
}

#[test]
fn concurrent_processors_dispatch_every_batch() -> anyhow::Result<()> {
    let sink = RecordingSink::new("recording", "id");
    let pipeline = Arc::new(Pipeline::new(Arc::new(monitor()), vec![sink.clone() as Arc<dyn ResultSink>], options(MatchMode::Simple))?);
    std::thread::scope(|scope| {
        for t in 0..4 {
            let pipeline = Arc::clone(&pipeline);
            scope.spawn(move || {
                let mut processor = pipeline.processor();
                for b in 0..5 {
                    for i in 0..10 {
                        processor.accept(InputDocument::new().with_field("id", format!("t{t}-b{b}-{i}")).with_field("text", "a fox"));
                    }
                    processor.finish();
                }
            });
        }
    });
    pipeline.flush();

    let payloads = sink.payloads();
    assert_eq!(payloads.len(), 20);
    assert!(payloads.iter().all(|p| p.record_count() == 10 && p.query_ids().eq(["q1"])));
    assert_eq!(pipeline.stats().records_delivered, 200);
    Ok(())
}

#[test]
fn shutdown_is_idempotent_and_final() -> anyhow::Result<()> {
    let sink = RecordingSink::new("recording", "id");
    let pipeline = Pipeline::new(Arc::new(monitor()), vec![sink.clone() as Arc<dyn ResultSink>], options(MatchMode::Simple))?;
    let mut processor = pipeline.processor();
    for doc in documents() {
        processor.accept(doc);
    }
    processor.finish();
    pipeline.shutdown();
    assert_eq!(sink.payloads().len(), 1, "in-flight batch drained before shutdown");

    pipeline.shutdown();
    assert!(pipeline.is_shut_down());

    for doc in documents() {
        processor.accept(doc);
    }
    processor.finish();
    pipeline.flush();
    drop(pipeline);
    assert_eq!(sink.payloads().len(), 1);
    assert_eq!(sink.shutdowns.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn batches_racing_shutdown_never_reach_a_closed_sink() -> anyhow::Result<()> {
    for _ in 0..20 {
        let sink = RecordingSink::new("recording", "id");
        let pipeline = Arc::new(Pipeline::new(Arc::new(monitor()), vec![sink.clone() as Arc<dyn ResultSink>], options(MatchMode::Simple))?);
        std::thread::scope(|scope| {
            for t in 0..4 {
                let pipeline = Arc::clone(&pipeline);
                scope.spawn(move || {
                    let mut processor = pipeline.processor();
                    for b in 0..25 {
                        processor.accept(InputDocument::new().with_field("id", format!("t{t}-b{b}")).with_field("text", "a fox"));
                        processor.finish();
                    }
                });
            }
            scope.spawn(|| pipeline.shutdown());
        });
        pipeline.flush();

        assert_eq!(sink.late_deliveries.load(Ordering::SeqCst), 0);
        assert_eq!(sink.shutdowns.load(Ordering::SeqCst), 1);
        let stats = pipeline.stats();
        assert_eq!(stats.batches_submitted, stats.batches_dispatched);
        assert_eq!(sink.payloads().len() as u64, stats.batches_dispatched);
    }
    Ok(())
}

#[test]
fn pipeline_requires_sinks_and_workers() {
    assert!(matches!(Pipeline::new(Arc::new(monitor()), Vec::new(), options(MatchMode::Simple)), Err(Error::InvalidConfig(_))));
    let sink: Arc<dyn ResultSink> = RecordingSink::new("recording", "id");
    let zero = PipelineOptions { workers: 0, ..PipelineOptions::default() };
    assert!(matches!(Pipeline::new(Arc::new(monitor()), vec![sink], zero), Err(Error::InvalidConfig(_))));
}

#[test]
fn info_reports_registry_and_sinks() -> anyhow::Result<()> {
    let sink: Arc<dyn ResultSink> = RecordingSink::new("recording", "id");
    let pipeline = Pipeline::new(Arc::new(monitor()), vec![sink], options(MatchMode::Highlighting))?;
    let info = pipeline.info();
    assert_eq!(info.query_count, 2);
    assert_eq!(info.queries.get("q1").map(String::as_str), Some("text:fox"));
    assert_eq!(info.mode, MatchMode::Highlighting);
    assert_eq!(info.workers, 2);
    assert_eq!(info.sinks, vec!["recording".to_string()]);
    Ok(())
}
