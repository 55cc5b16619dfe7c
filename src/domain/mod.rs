// ==========================================
// 工作簿 ETL - 领域模型层
// ==========================================
// 职责: 定义各阶段的输入/输出结构与基础类型
// 红线: 不含 I/O，不含阶段逻辑
// ==========================================

pub mod mapping;
pub mod pipeline;
pub mod record;
pub mod sheet;
pub mod types;
pub mod validation;

// 重导出核心类型
pub use mapping::{ColumnMapping, SheetMapping};
pub use pipeline::{FileFailure, FileSummary, LoadResult, PipelineInput, PipelineOutput, RunSummary};
pub use record::{ExtractedRecord, ExtractionError, ExtractionResult, ExtractionStats, SourceRef};
pub use sheet::{
    ManifestSheet, ManifestSummary, SheetInfo, SheetManifest, SheetOverride, SheetOverrides,
    SheetProfile, SheetStatus,
};
pub use types::{CellValue, Collection, IssueSource, MappingStrategy, PipelineStep, Severity};
pub use validation::{ValidationIssue, ValidationReport, ValidationStats};
