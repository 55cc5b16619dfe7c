// ==========================================
// 工作簿 ETL - 步骤 5: 写入
// ==========================================
// 写入目标由 LoadSink 决定（构造时选定）:
//   DryRunSink: 每个 (集合, 工作表) 一个 JSON 数组文件
//   StoreSink: 按 500 条分批 upsert 到 "orgs/{orgId}/{collection}"
// 严格模式: commit 且不允许错误时，含 error 的工作表整体不写入
// ==========================================

use crate::domain::pipeline::LoadResult;
use crate::domain::record::ExtractedRecord;
use crate::domain::types::Collection;
use crate::domain::validation::ValidationReport;
use crate::repository::{Document, DocumentStore};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    pub org_id: String,
    pub allow_sheet_errors_on_commit: bool,
}

impl LoadOptions {
    pub fn new(org_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            allow_sheet_errors_on_commit: false,
        }
    }

    pub fn with_allow_sheet_errors(mut self, allow: bool) -> Self {
        self.allow_sheet_errors_on_commit = allow;
        self
    }
}

// ==========================================
// 文档整形
// ==========================================

/// 工作表名 → 文件名安全片段（非字母数字且非韩文 → _）
pub fn sanitize_sheet_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || is_hangul(c) { c } else { '_' })
        .collect()
}

fn is_hangul(c: char) -> bool {
    matches!(c, '\u{AC00}'..='\u{D7A3}' | '\u{1100}'..='\u{11FF}' | '\u{3130}'..='\u{318F}')
}

/// 由来源生成确定性 id（同一源行重复导入得到相同 id）
///
/// 使用完整输入路径：不同目录下的同名工作簿不会互相覆盖
pub fn deterministic_id(org_id: &str, collection: Collection, record: &ExtractedRecord) -> String {
    let key = format!(
        "{}/{}/{}/{}/{}",
        org_id,
        collection,
        record.source.path.display(),
        record.source.sheet,
        record.source.row
    );
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).to_string()
}

/// 记录 → 目标文档
pub fn shape_document(record: &ExtractedRecord, collection: Collection, org_id: &str, now: &str) -> Document {
    let mut doc = record.without_source();

    let has_id = doc
        .get("id")
        .and_then(Value::as_str)
        .map(|id| !id.trim().is_empty())
        .unwrap_or(false);
    if !has_id {
        doc.insert("id".to_string(), Value::String(deterministic_id(org_id, collection, record)));
    }

    doc.insert("orgId".to_string(), Value::String(org_id.to_string()));
    doc.insert("importedAt".to_string(), Value::String(now.to_string()));
    doc.insert(
        "importSource".to_string(),
        Value::String(format!("excel:{}:row{}", record.source.sheet, record.source.row)),
    );
    if doc.get("createdAt").map(Value::is_null).unwrap_or(true) {
        doc.insert("createdAt".to_string(), Value::String(now.to_string()));
    }
    doc.insert("updatedAt".to_string(), Value::String(now.to_string()));
    doc
}

// ==========================================
// LoadSink Trait
// ==========================================
#[async_trait]
pub trait LoadSink: Send + Sync {
    async fn write(&self, report: &ValidationReport, documents: Vec<Document>, options: &LoadOptions) -> LoadResult;

    /// 是否为真实写入（决定严格模式是否生效）
    fn is_commit(&self) -> bool;
}

fn empty_result(report: &ValidationReport) -> LoadResult {
    LoadResult {
        file_name: report.file_name.clone(),
        collection: report.collection,
        sheet_name: report.sheet_name.clone(),
        documents_written: 0,
        output_path: None,
        errors: Vec::new(),
    }
}

// ===== DryRunSink =====
pub struct DryRunSink {
    output_dir: PathBuf,
}

impl DryRunSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_path(&self, collection: Collection, sheet_name: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.json", collection, sanitize_sheet_name(sheet_name)))
    }

    fn write_file(path: &Path, documents: &[Document]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(documents)?;
        fs::write(path, json)
    }
}

#[async_trait]
impl LoadSink for DryRunSink {
    async fn write(&self, report: &ValidationReport, documents: Vec<Document>, _options: &LoadOptions) -> LoadResult {
        let mut result = empty_result(report);
        let path = self.output_path(report.collection, &report.sheet_name);

        match Self::write_file(&path, &documents) {
            Ok(()) => {
                result.documents_written = documents.len();
                result.output_path = Some(path);
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "dry-run 文件写入失败");
                result.errors.push(format!("{}: {}", path.display(), e));
            }
        }
        result
    }

    fn is_commit(&self) -> bool {
        false
    }
}

// ===== StoreSink =====
pub struct StoreSink {
    store: Arc<dyn DocumentStore>,
    batch_size: usize,
}

impl StoreSink {
    pub fn new(store: Arc<dyn DocumentStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl LoadSink for StoreSink {
    async fn write(&self, report: &ValidationReport, documents: Vec<Document>, options: &LoadOptions) -> LoadResult {
        let mut result = empty_result(report);
        let collection_path = format!("orgs/{}/{}", options.org_id, report.collection);

        for (batch_no, chunk) in documents.chunks(self.batch_size).enumerate() {
            match self.store.batch_upsert(&collection_path, chunk, true).await {
                Ok(written) => result.documents_written += written,
                Err(e) => {
                    // 失败批次不计数，并停止该工作表后续批次
                    error!(collection_path = %collection_path, batch = batch_no + 1, error = %e, "批次写入失败");
                    result
                        .errors
                        .push(format!("batch {} failed: {}", batch_no + 1, e));
                    break;
                }
            }
        }
        result
    }

    fn is_commit(&self) -> bool {
        true
    }
}

// ==========================================
// Loader
// ==========================================
pub struct Loader {
    sink: Arc<dyn LoadSink>,
}

impl Loader {
    pub fn new(sink: Arc<dyn LoadSink>) -> Self {
        Self { sink }
    }

    pub fn dry_run(output_dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(DryRunSink::new(output_dir)))
    }

    pub fn commit(store: Arc<dyn DocumentStore>, batch_size: usize) -> Self {
        Self::new(Arc::new(StoreSink::new(store, batch_size)))
    }

    pub fn is_commit(&self) -> bool {
        self.sink.is_commit()
    }

    #[instrument(skip_all, fields(org_id = %options.org_id, commit = self.sink.is_commit()))]
    pub async fn load(&self, reports: &[ValidationReport], options: &LoadOptions) -> Vec<LoadResult> {
        let mut results = Vec::with_capacity(reports.len());

        for report in reports {
            if self.sink.is_commit() && !options.allow_sheet_errors_on_commit && report.stats.errors > 0 {
                warn!(
                    sheet = %report.sheet_name,
                    errors = report.stats.errors,
                    "严格模式: 工作表含校验错误，跳过写入"
                );
                let mut result = empty_result(report);
                result.errors.push(format!(
                    "Strict mode: sheet '{}' has {} validation error(s); nothing written",
                    report.sheet_name, report.stats.errors
                ));
                results.push(result);
                continue;
            }

            let now = Utc::now().to_rfc3339();
            let documents: Vec<Document> = report
                .cleaned_records
                .iter()
                .map(|r| shape_document(r, report.collection, &options.org_id, &now))
                .collect();

            let result = self.sink.write(report, documents, options).await;
            info!(
                sheet = %report.sheet_name,
                collection = %report.collection,
                written = result.documents_written,
                errors = result.errors.len(),
                "工作表写入完成"
            );
            results.push(result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::SourceRef;
    use crate::domain::validation::ValidationStats;
    use crate::repository::{RepositoryError, RepositoryResult};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn record(row: usize, fields: Value) -> ExtractedRecord {
        let mut r = ExtractedRecord::new(SourceRef {
            row,
            file: "book.xlsx".to_string(),
            path: std::path::PathBuf::from("/data/book.xlsx"),
            sheet: "통장내역".to_string(),
        });
        if let Value::Object(map) = fields {
            r.fields = map;
        }
        r
    }

    fn report(records: Vec<ExtractedRecord>, errors: usize) -> ValidationReport {
        ValidationReport {
            file_name: "book.xlsx".to_string(),
            collection: Collection::Transactions,
            sheet_name: "통장내역".to_string(),
            issues: vec![],
            stats: ValidationStats {
                input_records: records.len() + errors,
                output_records: records.len(),
                errors,
                warnings: 0,
            },
            cleaned_records: records,
        }
    }

    /// 第 fail_on 批失败的存储替身
    struct FailingStore {
        fail_on: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DocumentStore for FailingStore {
        async fn batch_upsert(&self, _path: &str, documents: &[Document], _merge: bool) -> RepositoryResult<usize> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.fail_on {
                Err(RepositoryError::DatabaseQueryError("disk full".to_string()))
            } else {
                Ok(documents.len())
            }
        }
    }

    #[test]
    fn test_sanitize_keeps_hangul_and_alnum() {
        assert_eq!(sanitize_sheet_name("통장내역"), "통장내역");
        assert_eq!(
            sanitize_sheet_name("사용내역(통장내역기준)"),
            "사용내역_통장내역기준_"
        );
        assert_eq!(sanitize_sheet_name("2024 Q1/예산"), "2024_Q1_예산");
    }

    #[test]
    fn test_shape_document() {
        let r = record(7, json!({"method": "CASH"}));
        let doc = shape_document(&r, Collection::Transactions, "acme", "2024-01-01T00:00:00Z");
        assert_eq!(doc["importSource"], "excel:통장내역:row7");
        assert_eq!(doc["orgId"], "acme");
        assert!(doc.get("_source").is_none());
        assert_eq!(doc["createdAt"], "2024-01-01T00:00:00Z");

        // 同一来源 → 相同 id
        let again = shape_document(&r, Collection::Transactions, "acme", "2025-01-01T00:00:00Z");
        assert_eq!(doc["id"], again["id"]);

        let with_id = record(8, json!({"id": "keep-me", "createdAt": "2020-01-01"}));
        let doc = shape_document(&with_id, Collection::Transactions, "acme", "now");
        assert_eq!(doc["id"], "keep-me");
        assert_eq!(doc["createdAt"], "2020-01-01");
        assert_eq!(doc["updatedAt"], "now");
    }

    #[test]
    fn test_same_file_name_in_different_dirs_gets_distinct_ids() {
        let a = record(3, json!({}));
        let mut b = record(3, json!({}));
        b.source.path = PathBuf::from("/archive/2025/book.xlsx");
        assert_eq!(a.source.file, b.source.file);

        let id_a = deterministic_id("acme", Collection::Transactions, &a);
        let id_b = deterministic_id("acme", Collection::Transactions, &b);
        assert_ne!(id_a, id_b);
    }

    #[tokio::test]
    async fn test_dry_run_writes_json_array() {
        let dir = TempDir::new().unwrap();
        let loader = Loader::dry_run(dir.path());
        let results = loader
            .load(&[report(vec![record(3, json!({"method": "CASH"}))], 1)], &LoadOptions::new("acme"))
            .await;

        // dry run 不受严格模式影响
        assert_eq!(results[0].documents_written, 1);
        let path = results[0].output_path.clone().unwrap();
        assert_eq!(path, dir.path().join("transactions_통장내역.json"));
        let written: Vec<Value> = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert!(written[0]["importSource"].as_str().unwrap().starts_with("excel:통장내역:row"));
    }

    #[tokio::test]
    async fn test_strict_mode_blocks_sheet_with_errors() {
        let store = Arc::new(FailingStore {
            fail_on: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let loader = Loader::commit(store.clone(), DEFAULT_BATCH_SIZE);
        let reports = [report(vec![record(3, json!({}))], 2)];

        let results = loader.load(&reports, &LoadOptions::new("acme")).await;
        assert_eq!(results[0].documents_written, 0);
        assert!(results[0].errors[0].contains("Strict mode"));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);

        let results = loader
            .load(&reports, &LoadOptions::new("acme").with_allow_sheet_errors(true))
            .await;
        assert_eq!(results[0].documents_written, 1);
    }

    #[tokio::test]
    async fn test_failed_batch_stops_sheet_and_is_not_counted() {
        let store = Arc::new(FailingStore {
            fail_on: 2,
            calls: AtomicUsize::new(0),
        });
        let loader = Loader::commit(store.clone(), 2);
        let records = (1..=5).map(|row| record(row, json!({}))).collect();

        let results = loader.load(&[report(records, 0)], &LoadOptions::new("acme")).await;
        assert_eq!(results[0].documents_written, 2);
        assert_eq!(results[0].errors.len(), 1);
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }
}
