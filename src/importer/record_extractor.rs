// ==========================================
// 工作簿 ETL - 步骤 3: 记录抽取
// ==========================================
// 每个数据行 → 一条记录；按映射对单元格应用标准化函数
// 未映射列丢弃；全空记录照常产出（由校验阶段判定）
// ==========================================

use crate::domain::mapping::SheetMapping;
use crate::domain::record::{
    ExtractedRecord, ExtractionError, ExtractionResult, ExtractionStats, SourceRef,
};
use crate::domain::types::Collection;
use crate::importer::normalizer::{is_null_sentinel, Transform};
use crate::importer::workbook_reader::ParsedSheet;
use tracing::{debug, info, instrument};

/// 已解析到列索引的映射
struct ResolvedColumn<'a> {
    index: usize,
    field: &'a str,
    transform: Option<Transform>,
    transform_name: Option<&'a str>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RecordExtractor;

impl RecordExtractor {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip_all, fields(file = %mapping.file_name, sheet = %mapping.sheet_name))]
    pub fn extract(
        &self,
        parsed: &ParsedSheet,
        mapping: &SheetMapping,
        collection: Collection,
    ) -> ExtractionResult {
        let mut errors = Vec::new();
        let mut stats = ExtractionStats {
            data_rows: parsed.rows.len(),
            ..Default::default()
        };

        debug!("步骤 3.1: 解析映射列");
        let mut columns = Vec::with_capacity(mapping.column_mappings.len());
        for m in &mapping.column_mappings {
            let Some(index) = parsed.column_index(&m.source_column) else {
                stats.unresolved_columns += 1;
                errors.push(ExtractionError {
                    row: None,
                    field: Some(m.target_field.clone()),
                    message: format!("열을 찾을 수 없음: {}", m.source_column),
                });
                continue;
            };

            let transform = m.transform.as_deref().and_then(Transform::from_name);
            if transform.is_none() {
                if let Some(name) = &m.transform {
                    debug!(transform = %name, field = %m.target_field, "未知标准化函数，按原值透传");
                }
            }
            columns.push(ResolvedColumn {
                index,
                field: &m.target_field,
                transform,
                transform_name: m.transform.as_deref(),
            });
        }
        stats.mapped_columns = columns.len();

        debug!("步骤 3.2: 逐行转换");
        let mut records = Vec::with_capacity(parsed.rows.len());
        for row in &parsed.rows {
            let mut record = ExtractedRecord::new(SourceRef {
                row: row.row_number,
                file: mapping.file_name.clone(),
                path: mapping.file_path.clone(),
                sheet: mapping.sheet_name.clone(),
            });

            for col in &columns {
                let cell = row.cell(col.index);
                let value = match col.transform {
                    Some(t) => t.apply(cell),
                    None => cell.to_json(),
                };

                let text = cell.to_text();
                if value.is_null() && !cell.is_blank() && !is_null_sentinel(&text) {
                    stats.conversion_failures += 1;
                    errors.push(ExtractionError {
                        row: Some(row.row_number),
                        field: Some(col.field.to_string()),
                        message: format!(
                            "값을 변환할 수 없음: '{}' ({})",
                            text,
                            col.transform_name.unwrap_or("raw")
                        ),
                    });
                }
                record.set(col.field, value);
            }
            records.push(record);
        }
        stats.records = records.len();

        info!(
            records = stats.records,
            mapped_columns = stats.mapped_columns,
            unresolved = stats.unresolved_columns,
            conversion_failures = stats.conversion_failures,
            "记录抽取完成"
        );

        ExtractionResult {
            file_name: mapping.file_name.clone(),
            sheet_name: mapping.sheet_name.clone(),
            target_collection: collection,
            records,
            errors,
            stats,
        }
    }

    /// 工作表无法重新读取时的空结果
    pub fn unreadable(mapping: &SheetMapping, collection: Collection, message: impl Into<String>) -> ExtractionResult {
        ExtractionResult {
            file_name: mapping.file_name.clone(),
            sheet_name: mapping.sheet_name.clone(),
            target_collection: collection,
            records: Vec::new(),
            errors: vec![ExtractionError {
                row: None,
                field: None,
                message: message.into(),
            }],
            stats: ExtractionStats::default(),
        }
    }
}
