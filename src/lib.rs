// ==========================================
// 工作簿 ETL - 核心库
// ==========================================
// 系统定位: 手工维护的韩文业务/财务工作簿 → 多租户文档库
// 管道: 发现 → 映射 → 抽取 → 校验 → 写入
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 配置层 - 运行配置 / 工作表规则 / 目标 schema
pub mod config;

// 导入层 - 五阶段管道
pub mod importer;

// 推理服务端口
pub mod llm;

// 文档存储层
pub mod repository;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

pub use config::{PipelineConfig, SchemaCatalog, SheetProfileRegistry};
pub use domain::{
    CellValue, Collection, ExtractedRecord, PipelineInput, PipelineOutput, PipelineStep,
    Severity, SheetManifest, SheetMapping, ValidationReport,
};
pub use importer::{PipelineError, PipelineOrchestrator};
pub use llm::{AnthropicClient, CompletionClient};
pub use repository::{DocumentStore, SqliteDocumentStore};

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
