// ==========================================
// 工作簿 ETL - 管道输入/输出
// ==========================================
// 输出累积每个阶段的中间产物，便于失败与审计报告引用
// ==========================================

use crate::domain::mapping::SheetMapping;
use crate::domain::record::ExtractionResult;
use crate::domain::sheet::SheetManifest;
use crate::domain::types::{Collection, PipelineStep};
use crate::domain::validation::ValidationReport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

// ==========================================
// LoadResult - 单个工作表的写入结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadResult {
    pub file_name: String,
    pub collection: Collection,
    pub sheet_name: String,
    pub documents_written: usize,
    pub output_path: Option<PathBuf>,
    pub errors: Vec<String>,
}

// ==========================================
// PipelineInput - 运行参数
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineInput {
    pub files: Vec<PathBuf>,
    pub commit: bool,
    pub use_llm: bool,
    pub org_id: String,
    pub steps: BTreeSet<PipelineStep>,
    pub allow_sheet_errors_on_commit: bool,
}

impl PipelineInput {
    /// 默认：全部 5 步、dry run、静态映射
    pub fn new(files: Vec<PathBuf>, org_id: impl Into<String>) -> Self {
        Self {
            files,
            commit: false,
            use_llm: false,
            org_id: org_id.into(),
            steps: PipelineStep::ALL.into_iter().collect(),
            allow_sheet_errors_on_commit: false,
        }
    }

    /// 仅运行到指定步骤（含）
    pub fn up_to(mut self, last: PipelineStep) -> Self {
        self.steps = PipelineStep::ALL
            .into_iter()
            .filter(|s| *s <= last)
            .collect();
        self
    }

    pub fn with_commit(mut self, commit: bool) -> Self {
        self.commit = commit;
        self
    }

    pub fn with_llm(mut self, use_llm: bool) -> Self {
        self.use_llm = use_llm;
        self
    }

    pub fn with_allow_sheet_errors(mut self, allow: bool) -> Self {
        self.allow_sheet_errors_on_commit = allow;
        self
    }

    pub fn requests(&self, step: PipelineStep) -> bool {
        self.steps.contains(&step)
    }
}

/// 单个文件级失败（不终止整个运行）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    pub file_name: String,
    pub step: PipelineStep,
    pub message: String,
}

// ==========================================
// PipelineOutput - 运行产物
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    pub manifests: Vec<SheetManifest>,
    pub mappings: Vec<SheetMapping>,
    pub extractions: Vec<ExtractionResult>,
    pub validations: Vec<ValidationReport>,
    pub loads: Vec<LoadResult>,
    pub file_failures: Vec<FileFailure>,
    pub completed_steps: Vec<PipelineStep>,
    pub duration: Duration,
}

impl PipelineOutput {
    pub fn documents_written(&self) -> usize {
        self.loads.iter().map(|l| l.documents_written).sum()
    }
}

// ==========================================
// RunSummary - pipeline-summary.json
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub file_name: String,
    pub failure: Option<String>,
    pub sheets: usize,
    pub mappable_sheets: usize,
    pub skipped_sheets: usize,
    pub unclassified_sheets: usize,
    pub merged_cells: usize,
    pub mapped_sheets: usize,
    pub column_mappings: usize,
    pub extracted_records: usize,
    pub extraction_errors: usize,
    pub cleaned_records: usize,
    pub validation_errors: usize,
    pub validation_warnings: usize,
    pub documents_written: usize,
    pub load_errors: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub org_id: String,
    pub commit: bool,
    pub use_llm: bool,
    pub completed_steps: Vec<u8>,
    pub duration_ms: u64,
    pub files: Vec<FileSummary>,
    pub totals: FileSummary,
}

impl RunSummary {
    pub fn from_output(input: &PipelineInput, output: &PipelineOutput) -> Self {
        let mut files: Vec<FileSummary> = Vec::new();

        fn entry<'a>(files: &'a mut Vec<FileSummary>, name: &str) -> &'a mut FileSummary {
            let pos = match files.iter().position(|f| f.file_name == name) {
                Some(pos) => pos,
                None => {
                    files.push(FileSummary {
                        file_name: name.to_string(),
                        ..Default::default()
                    });
                    files.len() - 1
                }
            };
            &mut files[pos]
        }

        for manifest in &output.manifests {
            let f = entry(&mut files, &manifest.file_name);
            f.sheets += manifest.summary.total_sheets;
            f.mappable_sheets += manifest.summary.mappable_sheets;
            f.skipped_sheets += manifest.summary.skipped_sheets;
            f.unclassified_sheets += manifest.summary.unclassified_sheets;
            f.merged_cells += manifest.summary.total_merged_cells;
        }
        for failure in &output.file_failures {
            let f = entry(&mut files, &failure.file_name);
            f.failure = Some(format!("[{}] {}", failure.step, failure.message));
        }
        for mapping in output.mappings.iter().filter(|m| !m.skipped) {
            let f = entry(&mut files, &mapping.file_name);
            f.mapped_sheets += 1;
            f.column_mappings += mapping.column_mappings.len();
        }
        for extraction in &output.extractions {
            let f = entry(&mut files, &extraction.file_name);
            f.extracted_records += extraction.records.len();
            f.extraction_errors += extraction.errors.len();
        }
        for report in &output.validations {
            let f = entry(&mut files, &report.file_name);
            f.cleaned_records += report.cleaned_records.len();
            f.validation_errors += report.stats.errors;
            f.validation_warnings += report.stats.warnings;
        }
        for load in &output.loads {
            let f = entry(&mut files, &load.file_name);
            f.documents_written += load.documents_written;
            f.load_errors += load.errors.len();
        }

        let mut totals = FileSummary {
            file_name: "*".to_string(),
            ..Default::default()
        };
        for f in &files {
            totals.sheets += f.sheets;
            totals.mappable_sheets += f.mappable_sheets;
            totals.skipped_sheets += f.skipped_sheets;
            totals.unclassified_sheets += f.unclassified_sheets;
            totals.merged_cells += f.merged_cells;
            totals.mapped_sheets += f.mapped_sheets;
            totals.column_mappings += f.column_mappings;
            totals.extracted_records += f.extracted_records;
            totals.extraction_errors += f.extraction_errors;
            totals.cleaned_records += f.cleaned_records;
            totals.validation_errors += f.validation_errors;
            totals.validation_warnings += f.validation_warnings;
            totals.documents_written += f.documents_written;
            totals.load_errors += f.load_errors;
        }

        RunSummary {
            org_id: input.org_id.clone(),
            commit: input.commit,
            use_llm: input.use_llm,
            completed_steps: output.completed_steps.iter().map(|s| s.number()).collect(),
            duration_ms: output.duration.as_millis() as u64,
            files,
            totals,
        }
    }
}
