// ==========================================
// 工作簿 ETL - 步骤 4: 记录校验
// ==========================================
// 规则校验（始终执行）+ LLM 审阅（可选，仅追加 warning/info）
// 含 error 的记录不进入 cleaned_records
// ==========================================

use crate::config::SchemaCatalog;
use crate::domain::record::{ExtractedRecord, ExtractionResult};
use crate::domain::types::{Collection, IssueSource, Severity};
use crate::domain::validation::{ValidationIssue, ValidationReport};
use crate::llm::{complete_json, CompletionClient, CompletionOptions};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const TRANSACTION_AMOUNT_FIELDS: [&str; 4] = ["bankAmount", "depositAmount", "expenseAmount", "vatIn"];
const BUDGET_FIELDS: [&str; 3] = ["budgetCategory", "budgetSubCategory", "budgetItem"];

// ==========================================
// 规则校验
// ==========================================

/// 单条记录的规则校验
pub fn check_record(collection: Collection, sheet: &str, record: &ExtractedRecord) -> Vec<ValidationIssue> {
    match collection {
        Collection::Projects => check_project(sheet, record),
        Collection::Transactions => check_transaction(sheet, record),
        Collection::Members => check_member(sheet, record),
    }
}

fn check_project(sheet: &str, r: &ExtractedRecord) -> Vec<ValidationIssue> {
    let row = r.row();
    let mut issues = Vec::new();

    // 예산 내역 행은 사업명 없이 비목/세목/세세목만 존재할 수 있음
    if !r.has_value("name") && !BUDGET_FIELDS.iter().any(|f| r.has_value(f)) {
        issues.push(
            ValidationIssue::rule(Severity::Error, sheet, row, "name", "사업명 또는 예산 항목이 없습니다")
                .with_suggestion("사업명 또는 비목/세목/세세목 중 하나를 입력하세요"),
        );
    }

    if let Some(amount) = r.get_f64("contractAmount") {
        if amount < 0.0 {
            issues.push(ValidationIssue::rule(
                Severity::Warning,
                sheet,
                row,
                "contractAmount",
                format!("계약금액이 음수입니다: {}", amount),
            ));
        }
    }

    if let Some(rate) = r.get_f64("profitRate") {
        if !(0.0..=1.0).contains(&rate) {
            issues.push(ValidationIssue::rule(
                Severity::Warning,
                sheet,
                row,
                "profitRate",
                format!("이익률이 0~1 범위를 벗어났습니다: {}", rate),
            ));
        }
    }

    // YYYY-MM-DD 文本按字典序即时间序
    if let (Some(start), Some(end)) = (r.get_str("startDate"), r.get_str("endDate")) {
        if start > end {
            issues.push(ValidationIssue::rule(
                Severity::Warning,
                sheet,
                row,
                "startDate",
                format!("시작일({})이 종료일({})보다 늦습니다", start, end),
            ));
        }
    }

    issues
}

fn check_transaction(sheet: &str, r: &ExtractedRecord) -> Vec<ValidationIssue> {
    let row = r.row();
    let mut issues = Vec::new();

    if !r.has_value("dateTime") && !r.has_value("weekCode") {
        issues.push(ValidationIssue::rule(
            Severity::Error,
            sheet,
            row,
            "dateTime",
            "거래일자와 주차 코드가 모두 없습니다",
        ));
    }

    if !r.has_value("method") {
        issues.push(
            ValidationIssue::rule(Severity::Error, sheet, row, "method", "결제 수단이 없습니다")
                .with_suggestion("계좌이체/법인카드/현금/자동이체 중 하나"),
        );
    }

    if !TRANSACTION_AMOUNT_FIELDS.iter().any(|f| r.has_value(f)) {
        issues.push(ValidationIssue::rule(
            Severity::Error,
            sheet,
            row,
            "amount",
            "출금액/입금액/집행액/부가세가 모두 없습니다",
        ));
    }

    for field in TRANSACTION_AMOUNT_FIELDS {
        if let Some(amount) = r.get_f64(field) {
            if amount < 0.0 {
                issues.push(ValidationIssue::rule(
                    Severity::Info,
                    sheet,
                    row,
                    field,
                    format!("음수 금액 (정정/취소 거래): {}", amount),
                ));
            }
        }
    }

    issues
}

fn check_member(sheet: &str, r: &ExtractedRecord) -> Vec<ValidationIssue> {
    let row = r.row();
    let mut issues = Vec::new();

    if !r.has_value("name") {
        issues.push(ValidationIssue::rule(Severity::Error, sheet, row, "name", "성명이 없습니다"));
    }

    if let Some(rate) = r.get_f64("participationRate") {
        if !(0.0..=1.0).contains(&rate) {
            issues.push(ValidationIssue::rule(
                Severity::Warning,
                sheet,
                row,
                "participationRate",
                format!("참여율이 0~1 범위를 벗어났습니다: {}", rate),
            ));
        }
    }

    issues
}

// ==========================================
// LLM 审阅
// ==========================================
const REVIEW_SYSTEM_PROMPT: &str = "You review normalized records imported from Korean business spreadsheets. \
Report only concrete data-quality problems. Respond with a single JSON object only.";

#[derive(Debug, Deserialize)]
struct LlmReviewResponse {
    #[serde(default)]
    issues: Vec<LlmIssue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LlmIssue {
    #[serde(default)]
    record_index: Option<usize>,
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    message: String,
    #[serde(default)]
    suggestion: Option<String>,
}

pub struct Validator {
    client: Option<Arc<dyn CompletionClient>>,
    options: CompletionOptions,
    sample_size: usize,
}

impl Validator {
    /// 仅规则校验
    pub fn rules_only() -> Self {
        Self {
            client: None,
            options: CompletionOptions::default(),
            sample_size: 0,
        }
    }

    pub fn with_llm(client: Arc<dyn CompletionClient>, options: CompletionOptions, sample_size: usize) -> Self {
        Self {
            client: Some(client),
            options: options.with_system(REVIEW_SYSTEM_PROMPT),
            sample_size,
        }
    }

    #[instrument(skip_all, fields(file = %extraction.file_name, sheet = %extraction.sheet_name))]
    pub async fn validate(&self, extraction: &ExtractionResult, use_llm: bool) -> ValidationReport {
        let collection = extraction.target_collection;
        let sheet = extraction.sheet_name.as_str();

        debug!("步骤 4.1: 规则校验");
        let mut issues: Vec<ValidationIssue> = extraction
            .records
            .iter()
            .flat_map(|r| check_record(collection, sheet, r))
            .collect();

        let error_rows: HashSet<usize> = issues
            .iter()
            .filter(|i| i.is_error())
            .filter_map(|i| i.row)
            .collect();

        if use_llm && !extraction.records.is_empty() {
            if let Some(client) = &self.client {
                debug!("步骤 4.2: LLM 审阅");
                issues.extend(self.review(client.as_ref(), extraction).await);
            }
        }

        let cleaned_records: Vec<ExtractedRecord> = extraction
            .records
            .iter()
            .filter(|r| !error_rows.contains(&r.row()))
            .cloned()
            .collect();

        let stats = ValidationReport::compute_stats(extraction.records.len(), &issues, &cleaned_records);
        info!(
            input = stats.input_records,
            output = stats.output_records,
            errors = stats.errors,
            warnings = stats.warnings,
            "记录校验完成"
        );

        ValidationReport {
            file_name: extraction.file_name.clone(),
            collection,
            sheet_name: extraction.sheet_name.clone(),
            issues,
            cleaned_records,
            stats,
        }
    }

    fn build_review_prompt(&self, extraction: &ExtractionResult) -> String {
        let sample: Vec<Value> = extraction
            .records
            .iter()
            .take(self.sample_size)
            .enumerate()
            .map(|(idx, r)| {
                let mut fields = r.without_source();
                fields.insert("recordIndex".to_string(), json!(idx));
                Value::Object(fields)
            })
            .collect();

        format!(
            "## Schema\n{}\n## Sheet\n{}\n\n## Records\n{}\n\n## Output\n\
             Return {{ \"issues\": [{{ \"recordIndex\": number, \"field\": string | null, \
             \"severity\": \"warning\" | \"info\", \"message\": string, \"suggestion\": string | null }}] }}. \
             Return an empty list when nothing is wrong.",
            SchemaCatalog::render_for_prompt(extraction.target_collection),
            extraction.sheet_name,
            serde_json::to_string_pretty(&sample).unwrap_or_else(|_| "[]".to_string())
        )
    }

    /// 失败时降级为无 LLM 问题
    async fn review(&self, client: &dyn CompletionClient, extraction: &ExtractionResult) -> Vec<ValidationIssue> {
        let prompt = self.build_review_prompt(extraction);
        let response: LlmReviewResponse = match complete_json(client, &prompt, &self.options).await {
            Ok(r) => r,
            Err(e) => {
                warn!(sheet = %extraction.sheet_name, error = %e, "LLM 审阅失败，仅保留规则校验结果");
                return Vec::new();
            }
        };

        let sampled = &extraction.records[..self.sample_size.min(extraction.records.len())];
        response
            .issues
            .into_iter()
            .map(|issue| {
                // error 降级为 warning，LLM 问题不剔除记录
                let severity = match issue.severity.as_deref().map(str::parse::<Severity>) {
                    Some(Ok(Severity::Info)) => Severity::Info,
                    _ => Severity::Warning,
                };
                ValidationIssue {
                    severity,
                    sheet: extraction.sheet_name.clone(),
                    row: issue
                        .record_index
                        .and_then(|idx| sampled.get(idx))
                        .map(ExtractedRecord::row),
                    field: issue.field,
                    message: issue.message,
                    suggestion: issue.suggestion,
                    source: IssueSource::Llm,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::{ExtractionStats, SourceRef};
    use crate::llm::{LlmError, LlmResult};
    use async_trait::async_trait;
    use std::time::Duration;

    fn record(row: usize, fields: Value) -> ExtractedRecord {
        let mut r = ExtractedRecord::new(SourceRef {
            row,
            file: "book.xlsx".to_string(),
            path: std::path::PathBuf::from("/data/book.xlsx"),
            sheet: "s".to_string(),
        });
        if let Value::Object(map) = fields {
            r.fields = map;
        }
        r
    }

    fn extraction(collection: Collection, records: Vec<ExtractedRecord>) -> ExtractionResult {
        ExtractionResult {
            file_name: "book.xlsx".to_string(),
            sheet_name: "s".to_string(),
            target_collection: collection,
            records,
            errors: vec![],
            stats: ExtractionStats::default(),
        }
    }

    struct FixedClient(Option<String>);

    #[async_trait]
    impl CompletionClient for FixedClient {
        async fn complete(&self, _prompt: &str, _options: &CompletionOptions) -> LlmResult<String> {
            self.0.clone().ok_or(LlmError::EmptyResponse)
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn llm_validator(reply: Option<&str>) -> Validator {
        let options = CompletionOptions {
            retries: 0,
            retry_base_delay: Duration::ZERO,
            ..Default::default()
        };
        Validator::with_llm(Arc::new(FixedClient(reply.map(str::to_string))), options, 20)
    }

    #[test]
    fn test_empty_transaction_has_three_errors() {
        let issues = check_record(Collection::Transactions, "s", &record(2, json!({})));
        assert_eq!(issues.len(), 3);
        assert!(issues.iter().all(|i| i.severity == Severity::Error));
    }

    #[test]
    fn test_negative_transaction_amount_is_info() {
        let r = record(
            2,
            json!({"weekCode": "2024-03-W2", "method": "TRANSFER", "bankAmount": -5000.0}),
        );
        let issues = check_record(Collection::Transactions, "s", &r);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Info);
    }

    #[test]
    fn test_budget_row_without_name_is_valid_project() {
        let r = record(4, json!({"budgetCategory": "인건비", "budgetAmount": 1000.0}));
        assert!(check_record(Collection::Projects, "예산", &r).is_empty());

        let r = record(5, json!({"name": null, "profitRate": 1.5, "startDate": "2024-12-01", "endDate": "2024-01-01"}));
        let issues = check_record(Collection::Projects, "예산", &r);
        assert_eq!(issues.iter().filter(|i| i.is_error()).count(), 1);
        assert_eq!(issues.iter().filter(|i| i.severity == Severity::Warning).count(), 2);
    }

    #[test]
    fn test_member_rules() {
        let r = record(3, json!({"name": "김철수", "participationRate": 1.2}));
        let issues = check_record(Collection::Members, "s", &r);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field.as_deref(), Some("participationRate"));
    }

    #[tokio::test]
    async fn test_cleaned_records_exclude_error_rows() {
        let ext = extraction(
            Collection::Transactions,
            vec![
                record(3, json!({"dateTime": "2024-01-15", "method": "CORP_CARD", "bankAmount": 12000.0})),
                record(4, json!({"dateTime": "2024-01-16"})),
            ],
        );
        let report = Validator::rules_only().validate(&ext, false).await;
        assert_eq!(report.cleaned_records.len(), 1);
        assert_eq!(report.cleaned_records[0].row(), 3);
        assert_eq!(report.stats.input_records, 2);
        assert_eq!(report.stats.output_records, 1);
        assert_eq!(report.stats.errors, 2);
    }

    #[tokio::test]
    async fn test_llm_errors_demoted_and_never_exclude() {
        let reply = r#"{"issues": [
            {"recordIndex": 0, "field": "description", "severity": "error", "message": "적요가 모호함"},
            {"recordIndex": 9, "severity": "info", "message": "참고"}
        ]}"#;
        let ext = extraction(
            Collection::Transactions,
            vec![record(3, json!({"dateTime": "2024-01-15", "method": "CASH", "expenseAmount": 1.0}))],
        );
        let report = llm_validator(Some(reply)).validate(&ext, true).await;

        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.issues[0].severity, Severity::Warning);
        assert_eq!(report.issues[0].row, Some(3));
        assert_eq!(report.issues[0].source, IssueSource::Llm);
        assert_eq!(report.issues[1].row, None);
        assert_eq!(report.stats.errors, 0);
        assert_eq!(report.stats.warnings, 1);
        assert_eq!(report.cleaned_records.len(), 1);
    }

    #[tokio::test]
    async fn test_llm_failure_degrades_to_rule_issues() {
        let ext = extraction(Collection::Members, vec![record(2, json!({}))]);
        let report = llm_validator(None).validate(&ext, true).await;
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].source, IssueSource::Rule);
        assert!(report.cleaned_records.is_empty());
    }
}
