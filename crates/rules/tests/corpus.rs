use canon_ir::{DiagramIr, Edge, Node};
use canon_rules::layout::{index_path, lock_path, INDEX_FILE, PAGE_FILE, RULES_FILE};
use canon_rules::{check_staleness, refresh, table, DedupPolicy, Status};
use pretty_assertions::assert_eq;
use std::path::Path;
use tempfile::TempDir;

const PAYMENTS: &str = "# Payments\n\nCard numbers MUST NOT be written to logs.\n\nServices should emit audit events.\n";
const ORDERS: &str = "# Orders\n\nAll order APIs must require authentication.\n";

fn write_doc(category: &Path, doc: &str, text: &str) {
    let dir = category.join(doc);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(PAGE_FILE), text).unwrap();
}

fn write_ir(category: &Path, doc: &str) {
    let mut ir = DiagramIr::default();
    ir.nodes.push(Node::new("gw", "API Gateway"));
    ir.nodes.push(Node::new("svc", "Orders"));
    ir.edges.push(Edge::new("e1", "gw", "svc").with_label("HTTPS"));
    let dir = category.join(doc).join("diagrams");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("flow.ir.json"),
        ir.to_canonical_json().unwrap(),
    )
    .unwrap();
}

fn corpus() -> TempDir {
    let root = TempDir::new().unwrap();
    write_doc(root.path(), "payments", PAYMENTS);
    write_doc(root.path(), "orders", ORDERS);
    write_ir(root.path(), "orders");
    std::fs::create_dir_all(root.path().join(".git")).unwrap();
    root
}

#[tokio::test]
async fn fresh_corpus_reports_missing_then_current() {
    let root = corpus();
    let report = check_staleness(root.path()).await.unwrap();
    assert_eq!(report.summary.total, 2);
    assert_eq!(report.summary.missing, 2);
    assert_eq!(report.index.status, Status::Missing);

    let summary = refresh(root.path(), "security", &DedupPolicy::default())
        .await
        .unwrap();
    assert_eq!(summary.refreshed, vec!["orders".to_string(), "payments".to_string()]);
    assert!(summary.is_success());

    let report = check_staleness(root.path()).await.unwrap();
    assert_eq!(report.summary.current, 2);
    assert!(report.is_current(), "{report}");

    let index = table::read_index(&index_path(root.path()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(index.source_count(), 2);
    assert!(index
        .rules
        .iter()
        .any(|r| r.ast_condition.as_deref() == Some("node.role == gateway")));
    assert_eq!(index.rules[0].severity, canon_rules::Severity::Critical);
}

#[tokio::test]
async fn changed_bytes_are_stale_until_refreshed() {
    let root = corpus();
    let policy = DedupPolicy::default();
    refresh(root.path(), "security", &policy).await.unwrap();

    write_doc(
        root.path(),
        "payments",
        "# Payments\n\nCard numbers MUST NOT be written to logs or traces.\n",
    );
    let report = check_staleness(root.path()).await.unwrap();
    assert_eq!(report.status_of("payments"), Some(Status::Stale));
    assert_eq!(report.status_of("orders"), Some(Status::Current));
    assert_eq!(report.index.status, Status::Stale);
    let entry = report.files.iter().find(|e| e.source == "payments").unwrap();
    assert!(entry.reason.starts_with("Content changed (fingerprint"));

    let orders_table = std::fs::read_to_string(root.path().join("orders").join(RULES_FILE)).unwrap();
    let summary = refresh(root.path(), "security", &policy).await.unwrap();
    assert_eq!(summary.refreshed, vec!["payments".to_string()]);
    assert_eq!(summary.skipped_current, 1);
    // untouched documents are not re-extracted
    assert_eq!(
        std::fs::read_to_string(root.path().join("orders").join(RULES_FILE)).unwrap(),
        orders_table
    );

    let report = check_staleness(root.path()).await.unwrap();
    assert_eq!(report.status_of("payments"), Some(Status::Current));
    let index = table::read_index(&index_path(root.path()))
        .await
        .unwrap()
        .unwrap();
    assert!(index.rules.iter().any(|r| r.condition.contains("or traces")));
    assert!(!index
        .rules
        .iter()
        .any(|r| r.condition == "Card numbers MUST NOT be written to logs."));
}

#[tokio::test]
async fn deleted_source_is_orphan_and_left_alone() {
    let root = corpus();
    refresh(root.path(), "security", &DedupPolicy::default())
        .await
        .unwrap();
    let rules_file = root.path().join("payments").join(RULES_FILE);
    let before = std::fs::read_to_string(&rules_file).unwrap();

    std::fs::remove_file(root.path().join("payments").join(PAGE_FILE)).unwrap();
    let report = check_staleness(root.path()).await.unwrap();
    assert_eq!(report.status_of("payments"), Some(Status::Orphan));
    assert_eq!(report.summary.orphan, 1);

    let summary = refresh(root.path(), "security", &DedupPolicy::default())
        .await
        .unwrap();
    assert_eq!(summary.orphans, vec!["payments".to_string()]);
    assert_eq!(std::fs::read_to_string(&rules_file).unwrap(), before);
}

#[tokio::test]
async fn corrupt_index_stops_refresh_without_overwrite() {
    let root = corpus();
    let index = root.path().join(INDEX_FILE);
    std::fs::write(&index, "not an index").unwrap();
    let err = refresh(root.path(), "security", &DedupPolicy::default())
        .await
        .unwrap_err();
    assert!(matches!(err, canon_rules::RulesError::CorruptIndex { .. }));
    assert_eq!(std::fs::read_to_string(&index).unwrap(), "not an index");
}

#[tokio::test]
async fn unmerged_tables_that_fail_to_merge_are_per_document_failures() {
    let root = corpus();
    let policy = DedupPolicy::default();
    refresh(root.path(), "security", &policy).await.unwrap();

    // current tables, but the index is gone and the lock cannot be opened
    std::fs::remove_file(index_path(root.path())).unwrap();
    let lock = lock_path(root.path());
    if lock.exists() {
        std::fs::remove_file(&lock).unwrap();
    }
    std::fs::create_dir_all(&lock).unwrap();

    let summary = refresh(root.path(), "security", &policy).await.unwrap();
    assert_eq!(summary.skipped_current, 2);
    let failed: Vec<&str> = summary.failures.iter().map(|(s, _)| s.as_str()).collect();
    assert_eq!(failed, vec!["orders", "payments"]);
    assert!(summary.failures[0].1.contains("lock"), "{summary}");
    assert!(!summary.is_success());
    assert!(!index_path(root.path()).exists());
}

#[tokio::test]
async fn report_serializes_with_statuses() {
    let root = corpus();
    let report = check_staleness(root.path()).await.unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["files"][0]["source"], "orders");
    assert_eq!(json["files"][0]["status"], "missing");
    assert_eq!(json["summary"]["missing"], 2);
    assert!(report.to_string().ends_with("2 sources: 0 current, 0 stale, 2 missing, 0 orphan"));
}
