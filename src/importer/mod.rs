// ==========================================
// 工作簿 ETL - 导入层
// ==========================================
// 职责: 工作簿 → 标准化文档的五阶段管道
// 支持: Excel (.xlsx), CSV
// ==========================================

// 模块声明
pub mod error;
pub mod loader;
pub mod normalizer;
pub mod orchestrator;
pub mod record_extractor;
pub mod schema_mapper;
pub mod sheet_discovery;
pub mod validator;
pub mod workbook_reader;

// 重导出核心类型
pub use error::{ImportError, ImportResult, PipelineError, PipelineResult};
pub use loader::{DryRunSink, LoadOptions, LoadSink, Loader, StoreSink};
pub use normalizer::Transform;
pub use orchestrator::{PipelineOrchestrator, ISSUES_FILE, SUMMARY_FILE};
pub use record_extractor::RecordExtractor;
pub use schema_mapper::{map_manifest, LlmSchemaMapper, SchemaMapper, StaticSchemaMapper};
pub use sheet_discovery::SheetDiscovery;
pub use validator::Validator;

// 重导出端口
pub use workbook_reader::{
    CalamineWorkbookReader, MemoryWorkbookReader, MergedRegion, ParsedSheet, RawRow, SheetGrid,
    WorkbookReader,
};
