// ==========================================
// 工作簿 ETL - 列映射
// ==========================================

use crate::domain::sheet::SheetManifest;
use crate::domain::types::{Collection, MappingStrategy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 源列 → 目标字段
///
/// confidence 仅用于报告与筛选展示，不参与是否抽取的判定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMapping {
    pub source_column: String,
    pub target_field: String,
    pub transform: Option<String>,
    pub confidence: f64,
    pub note: Option<String>,
}

impl ColumnMapping {
    pub fn new(source_column: impl Into<String>, target_field: impl Into<String>) -> Self {
        Self {
            source_column: source_column.into(),
            target_field: target_field.into(),
            transform: None,
            confidence: 1.0,
            note: None,
        }
    }

    pub fn with_transform(mut self, transform: impl Into<String>) -> Self {
        self.transform = Some(transform.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

// ==========================================
// SheetMapping - 单个工作表的映射结果
// ==========================================
// skipped = true 的映射不会进入抽取阶段；
// LLM 映射失败时 skipped = false 且映射为空
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetMapping {
    pub file_name: String,
    pub file_path: PathBuf, // 完整输入路径；同名工作簿靠它区分
    pub sheet_name: String,
    pub target_collection: Option<Collection>,
    pub column_mappings: Vec<ColumnMapping>,
    pub skipped: bool,
    pub skip_reason: Option<String>,
    pub strategy: MappingStrategy,
}

impl SheetMapping {
    /// 有效映射（进入抽取阶段）
    pub fn mapped(
        manifest: &SheetManifest,
        sheet_name: impl Into<String>,
        collection: Collection,
        column_mappings: Vec<ColumnMapping>,
        strategy: MappingStrategy,
    ) -> Self {
        Self {
            file_name: manifest.file_name.clone(),
            file_path: manifest.file_path.clone(),
            sheet_name: sheet_name.into(),
            target_collection: Some(collection),
            column_mappings,
            skipped: false,
            skip_reason: None,
            strategy,
        }
    }

    pub fn skipped(
        manifest: &SheetManifest,
        sheet_name: impl Into<String>,
        target_collection: Option<Collection>,
        reason: impl Into<String>,
        strategy: MappingStrategy,
    ) -> Self {
        Self {
            file_name: manifest.file_name.clone(),
            file_path: manifest.file_path.clone(),
            sheet_name: sheet_name.into(),
            target_collection,
            column_mappings: Vec::new(),
            skipped: true,
            skip_reason: Some(reason.into()),
            strategy,
        }
    }

    pub fn belongs_to(&self, manifest: &SheetManifest) -> bool {
        self.file_path == manifest.file_path
    }

    /// 平均置信度（无映射时为 None）
    pub fn mean_confidence(&self) -> Option<f64> {
        if self.column_mappings.is_empty() {
            return None;
        }
        let total: f64 = self.column_mappings.iter().map(|m| m.confidence).sum();
        Some(total / self.column_mappings.len() as f64)
    }
}
