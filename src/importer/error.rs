// ==========================================
// 工作簿 ETL - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 分级: ImportError 为文件/工作表级；PipelineError 为整次运行级（致命）
// ==========================================

use crate::config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// 导入模块错误类型（文件/工作表级，可恢复）
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("文件不存在: {0}")]
    FileNotFound(String),

    #[error("文件格式不支持: {0}（仅支持 .xlsx/.csv）")]
    UnsupportedFormat(String),

    #[error("文件读取失败: {0}")]
    FileReadError(String),

    #[error("Excel 解析失败: {0}")]
    ExcelParseError(String),

    #[error("CSV 解析失败: {0}")]
    CsvParseError(String),

    #[error("工作簿无工作表: {0}")]
    EmptyWorkbook(String),

    #[error("工作表不存在 (文件 {file}): {sheet}")]
    SheetNotFound { file: String, sheet: String },
}

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FileReadError(err.to_string())
    }
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CsvParseError(err.to_string())
    }
}

impl From<calamine::XlsxError> for ImportError {
    fn from(err: calamine::XlsxError) -> Self {
        ImportError::ExcelParseError(err.to_string())
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;

// ==========================================
// PipelineError - 终止整次运行的错误
// ==========================================
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("输入文件不存在: {0}")]
    InputFileNotFound(PathBuf),

    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    #[error("运行参数无效: {0}")]
    InvalidInput(String),

    #[error("输出写入失败 ({path}): {message}")]
    OutputWrite { path: PathBuf, message: String },

    #[error("序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
