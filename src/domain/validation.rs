// ==========================================
// 工作簿 ETL - 校验报告
// ==========================================
// cleaned_records ⊆ records，且仅包含零 error 的记录
// ==========================================

use crate::domain::record::ExtractedRecord;
use crate::domain::types::{Collection, IssueSource, Severity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub severity: Severity,
    pub sheet: String,
    pub row: Option<usize>,
    pub field: Option<String>,
    pub message: String,
    pub suggestion: Option<String>,
    pub source: IssueSource,
}

impl ValidationIssue {
    pub fn rule(
        severity: Severity,
        sheet: &str,
        row: usize,
        field: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            sheet: sheet.to_string(),
            row: Some(row),
            field: Some(field.to_string()),
            message: message.into(),
            suggestion: None,
            source: IssueSource::Rule,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationStats {
    pub input_records: usize,
    pub output_records: usize,
    pub errors: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub file_name: String,
    pub collection: Collection,
    pub sheet_name: String,
    pub issues: Vec<ValidationIssue>,
    pub cleaned_records: Vec<ExtractedRecord>,
    pub stats: ValidationStats,
}

impl ValidationReport {
    /// 由问题列表与清洗结果直接计算统计
    pub fn compute_stats(
        input_records: usize,
        issues: &[ValidationIssue],
        cleaned: &[ExtractedRecord],
    ) -> ValidationStats {
        ValidationStats {
            input_records,
            output_records: cleaned.len(),
            errors: issues.iter().filter(|i| i.severity == Severity::Error).count(),
            warnings: issues
                .iter()
                .filter(|i| i.severity == Severity::Warning)
                .count(),
        }
    }
}
