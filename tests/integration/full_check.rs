#![allow(missing_docs)]

use std::sync::Arc;

use parking_lot::Mutex;
use storecheck::aggregate::{CountsKey, WILDCARD};
use storecheck::check::{checker, CheckContext, RecordChecks};
use storecheck::plan::plan;
use storecheck::progress::{NoProgress, ProgressListener, ProgressMonitorFactory};
use storecheck::record::{
    DynamicRecord, NodeRecord, PropertyRecord, PropertyValue, RelationshipGroupRecord,
    RelationshipRecord, SchemaRecord, SchemaRule, TokenKind, TokenRecord,
};
use storecheck::report::CollectingReporter;
use storecheck::store::{
    FailingStructure, IndexEntry, MemoryCounts, MemoryIndex, MemoryStore, RecordStore,
    TokenScanEntry,
};
use storecheck::types::{LabelId, PropKeyId, NONE};
use storecheck::{
    CheckConfig, CheckError, CheckFlags, CheckReport, FullCheck, RecordType, Result, StoreAccess,
};

fn init_tracing() {
    storecheck::logging::init("warn");
}

fn tokens(kind: TokenKind, count: u64) -> (Vec<TokenRecord>, Vec<DynamicRecord>) {
    let tokens = (0..count).map(|id| TokenRecord::new(id, kind, id)).collect();
    let names = (0..count).map(|id| DynamicRecord::new(id, 6)).collect();
    (tokens, names)
}

fn nodes() -> Vec<NodeRecord> {
    vec![
        NodeRecord::new(0)
            .with_labels(&[0])
            .with_next_rel(0)
            .with_next_prop(0),
        NodeRecord::new(1).with_labels(&[0, 1]).with_next_rel(0),
        NodeRecord::new(2).with_next_rel(1),
    ]
}

/// r0: 0 -> 1, r1: 1 -> 2. Node 1's chain is r0 then r1.
fn relationships() -> Vec<RelationshipRecord> {
    let mut r0 = RelationshipRecord::new(0, 0, 1, 0).with_next_prop(1);
    r0.second_next_rel = 1;
    let mut r1 = RelationshipRecord::new(1, 1, 2, 0);
    r1.first_prev_rel = 0;
    r1.first_in_first_chain = false;
    vec![r0, r1]
}

fn properties() -> Vec<PropertyRecord> {
    vec![
        PropertyRecord::new(0).with_block(0, PropertyValue::Int(1)),
        PropertyRecord::new(1).with_block(1, PropertyValue::String(0)),
    ]
}

fn schema() -> Vec<SchemaRecord> {
    vec![
        SchemaRecord::new(
            0,
            SchemaRule::Index {
                label: LabelId(0),
                keys: vec![PropKeyId(0)],
                unique: true,
                owning_constraint: Some(1),
            },
        ),
        SchemaRecord::new(
            1,
            SchemaRule::UniquenessConstraint {
                label: LabelId(0),
                keys: vec![PropKeyId(0)],
                owned_index: 0,
            },
        ),
    ]
}

fn counts(wildcard_nodes: u64) -> Vec<(CountsKey, u64)> {
    let rel = CountsKey::relationship;
    vec![
        (CountsKey::node(WILDCARD), wildcard_nodes),
        (CountsKey::node(0), 2),
        (CountsKey::node(1), 1),
        (rel(WILDCARD, WILDCARD, WILDCARD), 2),
        (rel(WILDCARD, 0, WILDCARD), 2),
        (rel(0, WILDCARD, WILDCARD), 2),
        (rel(0, 0, WILDCARD), 2),
        (rel(1, WILDCARD, WILDCARD), 1),
        (rel(1, 0, WILDCARD), 1),
        (rel(WILDCARD, WILDCARD, 0), 1),
        (rel(WILDCARD, 0, 0), 1),
        (rel(WILDCARD, WILDCARD, 1), 1),
        (rel(WILDCARD, 0, 1), 1),
    ]
}

fn scan_entry(entity: u64, tokens: &[u32]) -> TokenScanEntry {
    TokenScanEntry {
        entity,
        tokens: tokens.to_vec(),
    }
}

fn consistent_stores() -> StoreAccess {
    let (labels, label_names) = tokens(TokenKind::Label, 2);
    let (types, type_names) = tokens(TokenKind::RelationshipType, 1);
    let (keys, key_names) = tokens(TokenKind::PropertyKey, 2);
    StoreAccess::in_memory()
        .with_nodes(nodes())
        .with_relationships(relationships())
        .with_properties(properties())
        .with_strings(vec![DynamicRecord::new(0, 10)])
        .with_schema(schema())
        .with_labels(labels, label_names)
        .with_relationship_types(types, type_names)
        .with_property_keys(keys, key_names)
        .with_counts(Arc::new(MemoryCounts::new(counts(3))))
        .with_label_scan(vec![scan_entry(0, &[0]), scan_entry(1, &[0, 1])])
        .with_type_scan(vec![scan_entry(0, &[0]), scan_entry(1, &[0])])
        .with_index(Arc::new(MemoryIndex::new(
            0,
            vec![IndexEntry {
                node: 0,
                value: b"1".to_vec(),
            }],
        )))
        .with_structure(Arc::new(FailingStructure::reporting("id_generators", Vec::new())))
}

fn config() -> CheckConfig {
    CheckConfig::default()
        .with_threads(3)
        .with_queue_capacity(2)
        .with_warm_up(true)
}

fn run(stores: StoreAccess) -> Result<CheckReport> {
    init_tracing();
    FullCheck::new(stores, config(), CheckFlags::all()).execute()
}

fn messages_for(report: &CheckReport, record_type: RecordType, id: u64) -> Vec<String> {
    report
        .findings
        .iter()
        .filter(|finding| finding.record_type == record_type && finding.id == id)
        .map(|finding| finding.message.clone())
        .collect()
}

#[test]
fn consistent_store_has_no_findings() -> Result<()> {
    let report = run(consistent_stores())?;
    assert!(report.is_consistent(), "unexpected findings: {:#?}", report.findings);
    assert_eq!(report.dropped_findings, 0);
    assert_eq!(report.tasks_run.len(), plan(&CheckFlags::all()).len());
    assert_eq!(report.statistics.dense_nodes, 0);
    assert_eq!(report.statistics.sparse_nodes, 3);
    assert!(report.statistics.records > 0);
    Ok(())
}

#[test]
fn single_record_passes_give_the_same_verdict() -> Result<()> {
    init_tracing();
    let config = config().with_threads(1).with_records_per_pass(1);
    let report = FullCheck::new(consistent_stores(), config, CheckFlags::all()).execute()?;
    assert!(report.is_consistent(), "unexpected findings: {:#?}", report.findings);
    Ok(())
}

#[test]
fn counts_mismatch_is_reported() -> Result<()> {
    let stores = consistent_stores().with_counts(Arc::new(MemoryCounts::new(counts(4))));
    let report = run(stores)?;
    assert_eq!(report.summary.total_errors, 1);
    assert_eq!(report.summary.errors_for(RecordType::Counts), 1);
    assert!(report.findings[0].message.contains("(:*) is 3 but the counts store holds 4"));
    Ok(())
}

#[test]
fn missing_counts_store_is_one_finding() -> Result<()> {
    let mut stores = consistent_stores();
    stores.counts = None;
    let report = run(stores)?;
    assert_eq!(report.summary.total_errors, 1);
    assert!(report.findings[0].message.contains("counts were not checked"));
    Ok(())
}

#[test]
fn missing_mandatory_property_is_reported() -> Result<()> {
    let mut schema = schema();
    schema.push(SchemaRecord::new(
        2,
        SchemaRule::NodePropertyExistence {
            label: LabelId(1),
            key: PropKeyId(0),
        },
    ));
    let report = run(consistent_stores().with_schema(schema))?;
    assert_eq!(report.summary.total_errors, 1);
    assert_eq!(
        messages_for(&report, RecordType::Node, 1),
        vec!["mandatory property 0 is missing".to_string()]
    );
    Ok(())
}

#[test]
fn unreferenced_string_chain_is_an_orphan() -> Result<()> {
    let stores = consistent_stores()
        .with_strings(vec![DynamicRecord::new(0, 10), DynamicRecord::new(1, 4)]);
    let report = run(stores)?;
    assert_eq!(report.summary.total_errors, 1);
    assert_eq!(
        messages_for(&report, RecordType::StringProperty, 1),
        vec!["chain is not referenced by any record".to_string()]
    );
    Ok(())
}

#[test]
fn broken_back_link_is_reported() -> Result<()> {
    let mut rels = relationships();
    rels[1].first_prev_rel = 7;
    let report = run(consistent_stores().with_relationships(rels))?;
    assert!(!report.is_consistent());
    let findings = messages_for(&report, RecordType::Relationship, 1);
    assert!(
        findings.iter().any(|m| m.contains("previous relationship for node 1 is 7")),
        "{findings:?}"
    );
    assert!(findings.iter().any(|m| m.contains("previous relationship 7")));
    Ok(())
}

#[test]
fn node_missing_from_label_scan_is_reported() -> Result<()> {
    let stores = consistent_stores().with_label_scan(vec![scan_entry(0, &[0])]);
    let report = run(stores)?;
    assert_eq!(
        messages_for(&report, RecordType::Node, 1),
        vec!["labelled node is missing from the label scan store".to_string()]
    );
    Ok(())
}

#[test]
fn offline_index_skips_content_check() -> Result<()> {
    let mut stores = consistent_stores();
    stores.indexes = vec![Arc::new(
        MemoryIndex::new(
            0,
            vec![IndexEntry {
                node: 2,
                value: b"x".to_vec(),
            }],
        )
        .corrupt("tree height mismatch"),
    )];
    let report = run(stores)?;
    // Only the structural problem; the bad entry for node 2 is never read.
    assert_eq!(report.summary.errors_for(RecordType::IndexEntry), 1);
    assert!(report.findings[0].message.contains("tree height mismatch"));
    Ok(())
}

#[test]
fn shared_property_chain_conflicts() -> Result<()> {
    let mut nodes = nodes();
    nodes[2].next_prop = 0;
    // Node 0 owns the chain however the workers interleave.
    for _ in 0..5 {
        let report = run(consistent_stores().with_nodes(nodes.clone()))?;
        let conflicts: Vec<_> = report
            .findings
            .iter()
            .filter(|finding| finding.message.contains("is owned by"))
            .collect();
        assert_eq!(conflicts.len(), 1, "{:#?}", report.findings);
        assert_eq!(conflicts[0].record_type, RecordType::Node);
        assert_eq!(conflicts[0].id, 2);
        assert_eq!(conflicts[0].message, "property chain 0 is owned by node[0]");
    }
    Ok(())
}

/// Node 0 made dense, its only relationship r0 headed from group 0.
fn dense_stores(first_out: u64) -> StoreAccess {
    let mut nodes = nodes();
    nodes[0].dense = true;
    let mut group = RelationshipGroupRecord::new(0, 0, 0);
    group.first_out = first_out;
    consistent_stores().with_nodes(nodes).with_groups(vec![group])
}

#[test]
fn dense_node_chains_are_headed_from_groups() -> Result<()> {
    for threads in [1, 2, 3] {
        init_tracing();
        let config = config().with_threads(threads);
        let report = FullCheck::new(dense_stores(0), config, CheckFlags::all()).execute()?;
        assert!(report.is_consistent(), "unexpected findings: {:#?}", report.findings);
        assert_eq!(report.statistics.dense_nodes, 1);
        assert_eq!(report.statistics.sparse_nodes, 2);
    }
    Ok(())
}

#[test]
fn dense_node_group_not_heading_the_chain_is_reported() -> Result<()> {
    let report = run(dense_stores(2))?;
    let findings = messages_for(&report, RecordType::Relationship, 0);
    assert!(
        findings.iter().any(|m| {
            m.contains("marked first in the group chain of node 0, whose first relationship is 2")
        }),
        "{:#?}",
        report.findings
    );
    Ok(())
}

#[derive(Default)]
struct RecordingProgress {
    started: Mutex<Vec<String>>,
}

impl ProgressMonitorFactory for RecordingProgress {
    fn listener(&self, task: &str) -> Box<dyn ProgressListener> {
        self.started.lock().push(task.to_string());
        Box::new(NoProgress)
    }
}

#[test]
fn store_failure_stops_the_run() {
    init_tracing();
    // Nothing references the unused record 2, so only a scan reaches it.
    let mut rels = relationships();
    rels.push(RelationshipRecord::new(2, 0, 0, 0).unused());
    let failing = Arc::new(MemoryStore::new("relationships", rels).fail_scan_at(2));
    let mut stores = consistent_stores();
    let relationships: Arc<dyn RecordStore<RelationshipRecord>> = failing.clone();
    stores.relationships = relationships;
    let progress = Arc::new(RecordingProgress::default());

    let err = FullCheck::new(stores, config(), CheckFlags::default())
        .with_progress(progress.clone())
        .execute()
        .unwrap_err();

    match err {
        CheckError::TaskFailed {
            task,
            store,
            high_id,
            source,
            ..
        } => {
            assert_eq!(task, "relationship_counts");
            assert_eq!(store, "relationships");
            assert_eq!(high_id, 3);
            assert!(matches!(*source, CheckError::Store { .. }));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(failing.is_closed());
    assert_eq!(
        *progress.started.lock(),
        vec!["node_labels".to_string(), "relationship_counts".to_string()]
    );
}

#[test]
fn failing_record_check_stops_the_run() {
    init_tracing();
    let mut checks = RecordChecks::default();
    checks.relationship = checker(|record: &RelationshipRecord, _: &CheckContext<'_>| {
        Err(CheckError::check(format!("cannot check relationship {}", record.id)))
    });
    let progress = Arc::new(RecordingProgress::default());

    let err = FullCheck::new(consistent_stores(), config(), CheckFlags::all())
        .with_checks(checks)
        .with_progress(progress.clone())
        .execute()
        .unwrap_err();

    match err {
        CheckError::TaskFailed { task, source, .. } => {
            assert_eq!(task, "relationship_counts");
            match *source {
                CheckError::WorkerFailed { source, .. } => {
                    assert!(matches!(*source, CheckError::Check { .. }));
                }
                other => panic!("unexpected cause {other:?}"),
            }
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(
        *progress.started.lock(),
        vec!["node_labels".to_string(), "relationship_counts".to_string()]
    );
}

#[test]
fn invalid_config_is_rejected_before_any_task() {
    init_tracing();
    let progress = Arc::new(RecordingProgress::default());
    let err = FullCheck::new(consistent_stores(), config().with_threads(0), CheckFlags::all())
        .with_progress(progress.clone())
        .execute()
        .unwrap_err();
    assert!(matches!(err, CheckError::Config(_)));
    assert!(progress.started.lock().is_empty());
}

#[test]
fn findings_are_forwarded_and_serialized() -> Result<()> {
    init_tracing();
    let forwarded = Arc::new(CollectingReporter::new(10));
    let stores = consistent_stores().with_counts(Arc::new(MemoryCounts::new(counts(4))));
    let report = FullCheck::new(stores, config(), CheckFlags::default())
        .with_reporter(forwarded.clone())
        .execute()?;
    assert_eq!(forwarded.findings(), report.findings);

    let json = report.to_json().expect("serialize report");
    let value: serde_json::Value = serde_json::from_str(&json).expect("parse report");
    assert_eq!(value["summary"]["total_errors"], 1);
    assert_eq!(value["findings"][0]["record_type"], "counts");
    assert_eq!(value["tasks_run"][0]["name"], "node_labels");
    Ok(())
}

#[test]
fn unused_records_are_ignored() -> Result<()> {
    let mut nodes = nodes();
    nodes.push(NodeRecord::new(3).with_labels(&[9]).with_next_rel(44).unused());
    let mut props = properties();
    let mut stale = PropertyRecord::new(2).linked(NONE, 99);
    stale.in_use = false;
    props.push(stale);
    let report = run(consistent_stores().with_nodes(nodes).with_properties(props))?;
    assert!(report.is_consistent(), "unexpected findings: {:#?}", report.findings);
    Ok(())
}
