// ==========================================
// 导入管道集成测试
// ==========================================
// 测试目标: 发现 → 映射 → 抽取 → 校验 → 写入 全流程
// 覆盖: dry run 输出 / 提交写入 / 严格模式 / 步骤截断 / 致命与文件级错误
// ==========================================


use std::sync::Arc;
use tempfile::TempDir;
use test_helpers::*;
use workbook_etl::config::SheetProfileRegistry;
use workbook_etl::domain::{
    Collection, IssueSource, MappingStrategy, PipelineInput, PipelineStep, Severity, SheetStatus,
};
use workbook_etl::importer::{
    CalamineWorkbookReader, MemoryWorkbookReader, PipelineError, PipelineOrchestrator, SheetGrid,
    ISSUES_FILE, SUMMARY_FILE,
};
use workbook_etl::logging;
use workbook_etl::repository::SqliteDocumentStore;

fn orchestrator(reader: MemoryWorkbookReader, dir: &TempDir) -> PipelineOrchestrator {
    PipelineOrchestrator::new(
        Arc::new(reader),
        Arc::new(SheetProfileRegistry::builtin()),
        test_config(dir.path()),
    )
}

// ==========================================
// dry run
// ==========================================

#[tokio::test]
async fn test_two_sheet_workbook_end_to_end() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(memory_reader(), &dir);

    let input = PipelineInput::new(vec![path(PROJECT_WORKBOOK)], "org-1");
    let output = orch.run(&input).await.unwrap();

    // 发现: 작성요령 跳过, 사업목록 → projects
    let manifest = &output.manifests[0];
    assert_eq!(manifest.summary.total_sheets, 2);
    assert_eq!(sheet_of(manifest, "작성요령").status, SheetStatus::Skipped);
    assert_eq!(
        sheet_of(manifest, "사업목록").target_collection,
        Some(Collection::Projects)
    );

    // 映射: 只有一个有效映射
    let active: Vec<_> = output.mappings.iter().filter(|m| !m.skipped).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].sheet_name, "사업목록");
    assert_eq!(active[0].strategy, MappingStrategy::Static);

    // 抽取 + 校验: 只有비목的行不算错误
    assert_eq!(output.extractions.len(), 1);
    assert_eq!(output.extractions[0].records.len(), 3);
    let report = &output.validations[0];
    assert_eq!(report.stats.errors, 0);
    assert_eq!(report.cleaned_records.len(), 3);

    // 写入
    assert_eq!(output.loads.len(), 1);
    assert_eq!(output.loads[0].documents_written, 3);
    assert_eq!(output.completed_steps, PipelineStep::ALL.to_vec());

    let docs = read_json(&dir.path().join("out").join("projects_사업목록.json"));
    let docs = docs.as_array().unwrap();
    assert_eq!(docs.len(), 3);
    assert_eq!(docs[0]["name"], "스마트팜 구축");
    assert_eq!(docs[0]["contractAmount"], 120_000_000.0);
    assert_eq!(docs[0]["status"], "IN_PROGRESS");
    assert_eq!(docs[2]["budgetCategory"], "인건비");
}

#[tokio::test]
async fn test_dry_run_writes_transactions_file() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(memory_reader(), &dir);

    let input = PipelineInput::new(vec![path(BANK_WORKBOOK)], "org-1");
    let output = orch.run(&input).await.unwrap();

    let report = &output.validations[0];
    assert_eq!(report.collection, Collection::Transactions);
    assert_eq!(report.stats.errors, 0);

    // 括号金额为负数 → 仅提示
    assert!(report
        .issues
        .iter()
        .any(|i| i.severity == Severity::Info && i.field.as_deref() == Some("bankAmount")));

    let file = dir.path().join("out").join("transactions_통장내역.json");
    assert_eq!(output.loads[0].output_path.as_deref(), Some(file.as_path()));

    let docs = read_json(&file);
    let docs = docs.as_array().unwrap();
    assert_eq!(docs.len(), report.cleaned_records.len());
    for doc in docs {
        assert!(doc["importSource"]
            .as_str()
            .unwrap()
            .starts_with("excel:통장내역:row"));
        assert_eq!(doc["orgId"], "org-1");
    }
    assert_eq!(docs[0]["dateTime"], "2024-03-05");
    assert_eq!(docs[1]["dateTime"], "2024-03-06");
    assert_eq!(docs[1]["method"], "CORP_CARD");
    assert_eq!(docs[2]["method"], "AUTO_DEBIT");
    assert_eq!(docs[2]["bankAmount"], -3300.0);

    let summary = read_json(&dir.path().join("out").join(SUMMARY_FILE));
    assert_eq!(summary["totals"]["cleanedRecords"], 3);
    assert_eq!(summary["totals"]["documentsWritten"], 3);

    let issues = read_json(&dir.path().join("out").join(ISSUES_FILE));
    assert_eq!(issues[0]["sheetName"], "통장내역");
    assert_eq!(issues[0]["collection"], "transactions");
}

#[tokio::test]
async fn test_csv_file_through_calamine_reader() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let csv_path = dir.path().join("통장내역.csv");
    std::fs::write(
        &csv_path,
        "\u{feff}거래일자,결제수단,적요,출금액\n2024.03.05,계좌이체,사무용품,\"12,000\"\n2024.03.06,현금,다과,\"5,000\"\n",
    )
    .unwrap();

    let orch = PipelineOrchestrator::new(
        Arc::new(CalamineWorkbookReader::new()),
        Arc::new(SheetProfileRegistry::builtin()),
        test_config(dir.path()),
    );
    let output = orch
        .run(&PipelineInput::new(vec![csv_path], "org-1"))
        .await
        .unwrap();

    assert_eq!(output.manifests[0].sheets.len(), 1);
    assert_eq!(output.validations[0].stats.errors, 0);

    let docs = read_json(&dir.path().join("out").join("transactions_통장내역.json"));
    let docs = docs.as_array().unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0]["bankAmount"], 12000.0);
    assert_eq!(docs[1]["method"], "CASH");
}

// ==========================================
// 步骤截断
// ==========================================

#[tokio::test]
async fn test_stops_after_requested_step() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(memory_reader(), &dir);

    let input = PipelineInput::new(vec![path(BANK_WORKBOOK)], "org-1").up_to(PipelineStep::Extract);
    let output = orch.run(&input).await.unwrap();

    assert_eq!(
        output.completed_steps,
        vec![PipelineStep::Discover, PipelineStep::Map, PipelineStep::Extract]
    );
    assert_eq!(output.extractions[0].records.len(), 3);
    assert!(output.validations.is_empty());
    assert!(output.loads.is_empty());

    let out = dir.path().join("out");
    let summary = read_json(&out.join(SUMMARY_FILE));
    assert_eq!(summary["completedSteps"], serde_json::json!([1, 2, 3]));
    assert!(!out.join(ISSUES_FILE).exists());
    assert!(!out.join("transactions_통장내역.json").exists());
}

#[tokio::test]
async fn test_discover_only_reports_manifest() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(memory_reader(), &dir);

    let input = PipelineInput::new(vec![path(PROJECT_WORKBOOK), path(BANK_WORKBOOK)], "org-1")
        .up_to(PipelineStep::Discover);
    let output = orch.run(&input).await.unwrap();

    assert_eq!(output.manifests.len(), 2);
    assert!(output.mappings.is_empty());
    assert_eq!(output.manifests[0].summary.mappable_sheets, 1);
    assert_eq!(output.manifests[0].summary.skipped_sheets, 1);
}

// ==========================================
// 提交写入
// ==========================================

#[tokio::test]
async fn test_commit_is_idempotent() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteDocumentStore::open(&dir.path().join("store.db")).unwrap());
    let orch = orchestrator(memory_reader(), &dir).with_document_store(store.clone());

    let input = PipelineInput::new(vec![path(BANK_WORKBOOK)], "org-1").with_commit(true);

    let first = orch.run(&input).await.unwrap();
    assert_eq!(first.documents_written(), 3);
    assert_eq!(store.count("orgs/org-1/transactions").unwrap(), 3);
    let ids: Vec<_> = store
        .list("orgs/org-1/transactions")
        .unwrap()
        .into_iter()
        .map(|d| d["id"].clone())
        .collect();

    let second = orch.run(&input).await.unwrap();
    assert_eq!(second.documents_written(), 3);
    assert_eq!(store.count("orgs/org-1/transactions").unwrap(), 3);
    let ids_again: Vec<_> = store
        .list("orgs/org-1/transactions")
        .unwrap()
        .into_iter()
        .map(|d| d["id"].clone())
        .collect();
    assert_eq!(ids, ids_again);

    // 提交模式不写 dry run 文件
    assert!(!dir.path().join("out").join("transactions_통장내역.json").exists());
}

fn single_project_sheet(name: &str) -> Vec<SheetGrid> {
    vec![SheetGrid::from_text_rows(
        "사업목록",
        &[&["사업명", "계약금액"], &[name, "1,000"]],
    )]
}

#[tokio::test]
async fn test_same_named_workbooks_in_different_dirs() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let reader = MemoryWorkbookReader::new()
        .with_workbook("/2024/경영관리.xlsx", single_project_sheet("A-2024"))
        .with_workbook("/2025/경영관리.xlsx", single_project_sheet("B-2025"));
    let store = Arc::new(SqliteDocumentStore::in_memory().unwrap());
    let orch = orchestrator(reader, &dir).with_document_store(store.clone());

    let input = PipelineInput::new(
        vec![path("/2024/경영관리.xlsx"), path("/2025/경영관리.xlsx")],
        "org-1",
    )
    .with_commit(true);
    let output = orch.run(&input).await.unwrap();

    // 每个工作表只抽取一次
    assert_eq!(output.extractions.len(), 2);
    let names: Vec<_> = output
        .extractions
        .iter()
        .map(|e| e.records[0].fields["name"].clone())
        .collect();
    assert_eq!(names, vec![serde_json::json!("A-2024"), serde_json::json!("B-2025")]);
    assert_eq!(output.documents_written(), 2);

    // 两个文件的记录都保留在文档库中
    let stored: Vec<_> = store
        .list("orgs/org-1/projects")
        .unwrap()
        .into_iter()
        .map(|d| d["name"].clone())
        .collect();
    assert_eq!(stored.len(), 2);
    assert!(stored.contains(&serde_json::json!("A-2024")));
    assert!(stored.contains(&serde_json::json!("B-2025")));
}

#[tokio::test]
async fn test_strict_mode_blocks_sheet_with_errors() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let reader = MemoryWorkbookReader::new().with_workbook(BANK_WORKBOOK, bank_workbook_with_errors());
    let store = Arc::new(SqliteDocumentStore::in_memory().unwrap());
    let orch = orchestrator(reader, &dir).with_document_store(store.clone());

    let input = PipelineInput::new(vec![path(BANK_WORKBOOK)], "org-1").with_commit(true);
    let output = orch.run(&input).await.unwrap();

    assert_eq!(output.validations[0].stats.errors, 2);
    let load = &output.loads[0];
    assert_eq!(load.documents_written, 0);
    assert_eq!(load.errors.len(), 1);
    assert!(load.errors[0].contains("Strict mode"));
    assert_eq!(store.count("orgs/org-1/transactions").unwrap(), 0);
}

#[tokio::test]
async fn test_allow_sheet_errors_writes_clean_records_only() {
    let dir = TempDir::new().unwrap();
    let reader = MemoryWorkbookReader::new().with_workbook(BANK_WORKBOOK, bank_workbook_with_errors());
    let store = Arc::new(SqliteDocumentStore::in_memory().unwrap());
    let orch = orchestrator(reader, &dir).with_document_store(store.clone());

    let input = PipelineInput::new(vec![path(BANK_WORKBOOK)], "org-1")
        .with_commit(true)
        .with_allow_sheet_errors(true);
    let output = orch.run(&input).await.unwrap();

    assert_eq!(output.loads[0].documents_written, 1);
    assert_eq!(store.count("orgs/org-1/transactions").unwrap(), 1);
}

#[tokio::test]
async fn test_failed_batch_is_not_counted() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FailingStore::default());
    let orch = orchestrator(memory_reader(), &dir).with_document_store(store.clone());

    let input = PipelineInput::new(vec![path(BANK_WORKBOOK)], "org-1").with_commit(true);
    let output = orch.run(&input).await.unwrap();

    assert_eq!(output.loads[0].documents_written, 0);
    assert!(!output.loads[0].errors.is_empty());
    assert_eq!(store.attempts(), 1);
}

// ==========================================
// 推理服务
// ==========================================

#[tokio::test]
async fn test_llm_mapping_failure_yields_empty_mapping() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let client = Arc::new(FailingClient::default());
    let orch = orchestrator(memory_reader(), &dir).with_completion_client(client.clone());

    let input = PipelineInput::new(vec![path(PROJECT_WORKBOOK)], "org-1")
        .with_llm(true)
        .up_to(PipelineStep::Map);
    let output = orch.run(&input).await.unwrap();

    let mapping = output
        .mappings
        .iter()
        .find(|m| m.sheet_name == "사업목록")
        .unwrap();
    assert!(!mapping.skipped);
    assert!(mapping.column_mappings.is_empty());
    assert_eq!(mapping.strategy, MappingStrategy::Llm);

    // 跳过的工作表不调用推理服务；重试次数为 0
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn test_llm_mapping_and_review() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let client = Arc::new(ScriptedClient::new(vec![
        r#"```json
{"mappings": [
  {"excelColumn": "거래일자", "firestoreField": "dateTime", "transform": "normalizeDate", "confidence": 0.95},
  {"excelColumn": "결제수단", "firestoreField": "method", "transform": "normalizePaymentMethod"},
  {"excelColumn": "출금액", "firestoreField": "bankAmount"},
  {"excelColumn": "없는열", "firestoreField": "note"},
  {"excelColumn": "적요", "firestoreField": "unknownField"}
]}
```"#,
        r#"{"issues": [{"recordIndex": 0, "field": "description", "severity": "error", "message": "적요 누락"}]}"#,
    ]));
    let orch = orchestrator(memory_reader(), &dir).with_completion_client(client.clone());

    let input = PipelineInput::new(vec![path(BANK_WORKBOOK)], "org-1").with_llm(true);
    let output = orch.run(&input).await.unwrap();

    let mapping = &output.mappings[0];
    assert_eq!(mapping.column_mappings.len(), 3);
    let amount = mapping
        .column_mappings
        .iter()
        .find(|c| c.target_field == "bankAmount")
        .unwrap();
    assert_eq!(amount.transform.as_deref(), Some("normalizeAmount"));
    assert_eq!(amount.confidence, 0.5);

    let report = &output.validations[0];
    assert_eq!(report.stats.errors, 0);
    assert_eq!(report.cleaned_records.len(), 3);
    let reviewed = report
        .issues
        .iter()
        .find(|i| i.source == IssueSource::Llm)
        .unwrap();
    assert_eq!(reviewed.severity, Severity::Warning);
    assert!(reviewed.row.is_some());

    assert_eq!(client.calls(), 2);
    assert!(client.prompts()[0].contains("통장내역"));
}

#[tokio::test]
async fn test_use_llm_without_client_falls_back_to_static() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(memory_reader(), &dir);

    let input = PipelineInput::new(vec![path(BANK_WORKBOOK)], "org-1").with_llm(true);
    let output = orch.run(&input).await.unwrap();

    assert_eq!(output.mappings[0].strategy, MappingStrategy::Static);
    assert_eq!(output.validations[0].cleaned_records.len(), 3);
}

// ==========================================
// 错误处理
// ==========================================

#[tokio::test]
async fn test_missing_file_is_fatal() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(memory_reader(), &dir);

    let input = PipelineInput::new(vec![path(BANK_WORKBOOK), path("/virtual/없음.xlsx")], "org-1");
    let err = orch.run(&input).await.unwrap_err();

    assert!(matches!(err, PipelineError::InputFileNotFound(_)));
    assert!(!dir.path().join("out").join(SUMMARY_FILE).exists());
}

#[tokio::test]
async fn test_commit_without_store_is_fatal() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(memory_reader(), &dir);

    let input = PipelineInput::new(vec![path(BANK_WORKBOOK)], "org-1").with_commit(true);
    let err = orch.run(&input).await.unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
}

#[tokio::test]
async fn test_commit_with_empty_org_is_fatal() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteDocumentStore::in_memory().unwrap());
    let orch = orchestrator(memory_reader(), &dir).with_document_store(store);

    let input = PipelineInput::new(vec![path(BANK_WORKBOOK)], "  ").with_commit(true);
    let err = orch.run(&input).await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));
}

#[tokio::test]
async fn test_commit_flag_without_load_step_needs_no_store() {
    let dir = TempDir::new().unwrap();
    let orch = orchestrator(memory_reader(), &dir);

    let input = PipelineInput::new(vec![path(BANK_WORKBOOK)], "")
        .with_commit(true)
        .up_to(PipelineStep::Validate);
    let output = orch.run(&input).await.unwrap();
    assert_eq!(output.validations.len(), 1);
}

#[tokio::test]
async fn test_unreadable_file_does_not_stop_others() {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let reader = memory_reader().with_unreadable("/virtual/깨진파일.xlsx", "zip header 손상");
    let orch = orchestrator(reader, &dir);

    let input = PipelineInput::new(
        vec![path("/virtual/깨진파일.xlsx"), path(BANK_WORKBOOK)],
        "org-1",
    );
    let output = orch.run(&input).await.unwrap();

    assert_eq!(output.file_failures.len(), 1);
    assert_eq!(output.file_failures[0].file_name, "깨진파일.xlsx");
    assert_eq!(output.file_failures[0].step, PipelineStep::Discover);
    assert_eq!(output.manifests.len(), 1);
    assert_eq!(output.documents_written(), 3);

    let summary = read_json(&dir.path().join("out").join(SUMMARY_FILE));
    let files = summary["files"].as_array().unwrap();
    assert!(files.iter().any(|f| f["fileName"] == "깨진파일.xlsx" && f["failure"].is_string()));
}
