// ==========================================
// 工作簿 ETL - 工作表结构与清单
// ==========================================
// 职责: SheetInfo / SheetProfile / SheetManifest
// 行号约定: 对外暴露的行号一律从 1 开始
// ==========================================

use crate::domain::types::{CellValue, Collection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

// ==========================================
// SheetInfo - 工作表形状（发现阶段产出，创建后不可变）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetInfo {
    pub name: String,
    pub row_count: usize,
    pub column_count: usize,
    pub merged_cell_count: usize,
    pub header_row_count: usize,
    pub header_start_row: usize,
    pub data_start_row: usize,
    pub headers: Vec<String>,                // 合并后的列名（每列一个）
    pub sample_headers: Vec<Vec<String>>,    // 原始表头行（最多 2 行）
    pub sample_rows: Vec<Vec<CellValue>>,    // 样例数据行
}

// ==========================================
// SheetOverride - 表头/数据起始行覆写
// ==========================================
// 覆写必须在解析时生效，事后无法纠正表头/数据误判
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetOverride {
    pub header_row_count: Option<usize>,
    pub header_start_row: Option<usize>,
    pub data_start_row: Option<usize>,
}

impl SheetOverride {
    pub fn is_empty(&self) -> bool {
        self.header_row_count.is_none()
            && self.header_start_row.is_none()
            && self.data_start_row.is_none()
    }
}

/// 工作表名 → 覆写
pub type SheetOverrides = HashMap<String, SheetOverride>;

// ==========================================
// SheetProfile - 工作表路由规则
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetProfile {
    pub name_pattern: String,
    pub collection: Option<Collection>,
    pub skip: bool,
    pub hint: Option<String>,
    #[serde(flatten)]
    pub overrides: SheetOverride,
}

impl SheetProfile {
    pub fn new(name_pattern: impl Into<String>, collection: Collection) -> Self {
        Self {
            name_pattern: name_pattern.into(),
            collection: Some(collection),
            skip: false,
            hint: None,
            overrides: SheetOverride::default(),
        }
    }

    /// 跳过型规则（说明页、目录、代码表等）
    pub fn skipped(name_pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name_pattern: name_pattern.into(),
            collection: None,
            skip: true,
            hint: Some(reason.into()),
            overrides: SheetOverride::default(),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_header_rows(mut self, count: usize) -> Self {
        self.overrides.header_row_count = Some(count);
        self
    }

    pub fn with_header_start(mut self, row: usize) -> Self {
        self.overrides.header_start_row = Some(row);
        self
    }

    /// 模式长度（按字符计，韩文按 1 计）
    pub fn pattern_len(&self) -> usize {
        self.name_pattern.chars().count()
    }
}

// ==========================================
// 清单条目分类
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SheetStatus {
    Mappable,     // 命中规则且有目标集合
    Skipped,      // 规则要求跳过或无目标集合
    Unclassified, // 未命中任何规则（保留以便人工查看）
}

// ==========================================
// ManifestSheet - SheetInfo + 规则元数据
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSheet {
    #[serde(flatten)]
    pub info: SheetInfo,
    pub status: SheetStatus,
    pub target_collection: Option<Collection>,
    pub skip: bool,
    pub hint: Option<String>,
    pub matched_pattern: Option<String>,
    #[serde(skip_serializing_if = "SheetOverride::is_empty", default)]
    pub overrides: SheetOverride,
}

impl ManifestSheet {
    pub fn from_profile(info: SheetInfo, profile: Option<&SheetProfile>) -> Self {
        match profile {
            None => Self {
                info,
                status: SheetStatus::Unclassified,
                target_collection: None,
                skip: false,
                hint: None,
                matched_pattern: None,
                overrides: SheetOverride::default(),
            },
            Some(p) => {
                let status = if p.skip || p.collection.is_none() {
                    SheetStatus::Skipped
                } else {
                    SheetStatus::Mappable
                };
                Self {
                    info,
                    status,
                    target_collection: p.collection,
                    skip: p.skip,
                    hint: p.hint.clone(),
                    matched_pattern: Some(p.name_pattern.clone()),
                    overrides: p.overrides,
                }
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn is_mappable(&self) -> bool {
        self.status == SheetStatus::Mappable
    }
}

// ==========================================
// SheetManifest - 单个工作簿的发现结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetManifest {
    pub file_name: String,
    pub file_path: PathBuf,
    pub sheets: Vec<ManifestSheet>,
    pub summary: ManifestSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSummary {
    pub total_sheets: usize,
    pub mappable_sheets: usize,
    pub skipped_sheets: usize,
    pub unclassified_sheets: usize,
    pub total_merged_cells: usize,
}

impl ManifestSummary {
    pub fn from_sheets(sheets: &[ManifestSheet]) -> Self {
        let mut summary = ManifestSummary {
            total_sheets: sheets.len(),
            ..Default::default()
        };
        for sheet in sheets {
            match sheet.status {
                SheetStatus::Mappable => summary.mappable_sheets += 1,
                SheetStatus::Skipped => summary.skipped_sheets += 1,
                SheetStatus::Unclassified => summary.unclassified_sheets += 1,
            }
            summary.total_merged_cells += sheet.info.merged_cell_count;
        }
        summary
    }
}

impl SheetManifest {
    pub fn sheet(&self, name: &str) -> Option<&ManifestSheet> {
        self.sheets.iter().find(|s| s.info.name == name)
    }
}
