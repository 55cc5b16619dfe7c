// ==========================================
// 工作簿 ETL - 抽取记录
// ==========================================
// 每条记录通过 _source 追溯到唯一的源行
// ==========================================

use crate::domain::types::Collection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// 记录来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub row: usize, // 工作表物理行号（从 1 开始）
    pub file: String,
    pub path: PathBuf, // 完整输入路径（文档 id 的一部分）
    pub sheet: String,
}

// ==========================================
// ExtractedRecord - 目标字段 → 标准化值 + 来源
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    #[serde(rename = "_source")]
    pub source: SourceRef,
}

impl ExtractedRecord {
    pub fn new(source: SourceRef) -> Self {
        Self {
            fields: Map::new(),
            source,
        }
    }

    pub fn row(&self) -> usize {
        self.source.row
    }

    /// 字段值（null 视为缺失）
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    /// 字段存在且非 null、非空字符串
    pub fn has_value(&self, field: &str) -> bool {
        match self.get(field) {
            None => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        }
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// 去掉来源信息后的纯字段（供 LLM 审阅 / 入库）
    pub fn without_source(&self) -> Map<String, Value> {
        self.fields.clone()
    }
}

/// 抽取错误（行级或表级）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionError {
    pub row: Option<usize>,
    pub field: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionStats {
    pub data_rows: usize,
    pub records: usize,
    pub mapped_columns: usize,
    pub unresolved_columns: usize,
    pub conversion_failures: usize,
}

// ==========================================
// ExtractionResult - 单个工作表的抽取结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub file_name: String,
    pub sheet_name: String,
    pub target_collection: Collection,
    pub records: Vec<ExtractedRecord>,
    pub errors: Vec<ExtractionError>,
    pub stats: ExtractionStats,
}
