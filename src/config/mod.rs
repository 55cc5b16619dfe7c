// ==========================================
// 工作簿 ETL - 配置层
// ==========================================
// 职责: 运行配置、工作表路由规则、目标 schema 目录
// 红线: 纯静态数据 + 环境变量读取，不做 I/O 以外的副作用
// ==========================================

pub mod pipeline_config;
pub mod schema_catalog;
pub mod sheet_profiles;

// 重导出
pub use pipeline_config::{config_keys, ConfigError, LlmSettings, PipelineConfig};
pub use schema_catalog::{CollectionSchema, FieldSpec, FieldType, SchemaCatalog};
pub use sheet_profiles::SheetProfileRegistry;
