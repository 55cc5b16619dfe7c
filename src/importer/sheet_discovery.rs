// ==========================================
// 工作簿 ETL - 步骤 1: 工作表发现
// ==========================================
// 两遍读取:
//   第 1 遍: 无覆写读取全部工作表（表名 + 默认表头检测）
//   第 2 遍: 仅对规则带覆写的工作表按覆写重新读取
// 未命中规则的工作表保留为 unclassified
// ==========================================

use crate::config::SheetProfileRegistry;
use crate::domain::sheet::{ManifestSheet, ManifestSummary, SheetManifest, SheetOverrides};
use crate::importer::error::ImportResult;
use crate::importer::workbook_reader::{display_name, WorkbookReader};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub struct SheetDiscovery {
    reader: Arc<dyn WorkbookReader>,
    registry: Arc<SheetProfileRegistry>,
}

impl SheetDiscovery {
    pub fn new(reader: Arc<dyn WorkbookReader>, registry: Arc<SheetProfileRegistry>) -> Self {
        Self { reader, registry }
    }

    /// 发现工作簿内的工作表并按规则分类
    #[instrument(skip(self), fields(file = %path.display()))]
    pub fn discover(&self, path: &Path) -> ImportResult<SheetManifest> {
        debug!("步骤 1.1: 无覆写读取工作表");
        let infos = self.reader.discover_sheets(path, &SheetOverrides::new())?;

        debug!("步骤 1.2: 按规则覆写重新读取");
        let mut sheets = Vec::with_capacity(infos.len());
        let mut reread = 0usize;
        for info in infos {
            let profile = self.registry.find_profile(&info.name);
            let info = match profile {
                Some(p) if !p.overrides.is_empty() => {
                    reread += 1;
                    self.reader.describe_sheet(path, &info.name, &p.overrides)?
                }
                _ => info,
            };
            sheets.push(ManifestSheet::from_profile(info, profile));
        }

        let summary = ManifestSummary::from_sheets(&sheets);
        info!(
            total = summary.total_sheets,
            mappable = summary.mappable_sheets,
            skipped = summary.skipped_sheets,
            unclassified = summary.unclassified_sheets,
            reread,
            "工作表发现完成"
        );

        Ok(SheetManifest {
            file_name: display_name(path),
            file_path: path.to_path_buf(),
            sheets,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sheet::{SheetProfile, SheetStatus};
    use crate::domain::types::Collection;
    use crate::importer::workbook_reader::{MemoryWorkbookReader, SheetGrid};

    fn workbook() -> Vec<SheetGrid> {
        vec![
            SheetGrid::from_text_rows("작성요령", &[&["항목", "설명"], &["a", "b"]]),
            SheetGrid::from_text_rows(
                "통장내역",
                &[&["거래일자", "적요", "출금액"], &["24.01.15", "사무용품", "12000"]],
            ),
            SheetGrid::from_text_rows(
                "사용내역",
                &[
                    &["사용내역", ""],
                    &["기준", "월"],
                    &["일자", "금액"],
                    &["24.01.02", "1000"],
                ],
            ),
            SheetGrid::from_text_rows("Sheet1", &[&["x", "y"]]),
        ]
    }

    fn discovery(reader: Arc<MemoryWorkbookReader>) -> SheetDiscovery {
        let registry = SheetProfileRegistry::new(vec![
            SheetProfile::skipped("작성요령", "가이드"),
            SheetProfile::new("통장내역", Collection::Transactions),
            SheetProfile::new("사용내역", Collection::Transactions).with_header_start(3),
        ]);
        SheetDiscovery::new(reader, Arc::new(registry))
    }

    #[test]
    fn test_classifies_sheets_and_counts() {
        let reader = Arc::new(MemoryWorkbookReader::new().with_workbook("book.xlsx", workbook()));
        let manifest = discovery(reader.clone())
            .discover(Path::new("book.xlsx"))
            .unwrap();

        assert_eq!(manifest.file_name, "book.xlsx");
        assert_eq!(manifest.summary.total_sheets, 4);
        assert_eq!(manifest.summary.mappable_sheets, 2);
        assert_eq!(manifest.summary.skipped_sheets, 1);
        assert_eq!(manifest.summary.unclassified_sheets, 1);

        let unclassified = manifest.sheet("Sheet1").unwrap();
        assert_eq!(unclassified.status, SheetStatus::Unclassified);
        assert!(!unclassified.skip);
        assert!(!unclassified.is_mappable());
    }

    #[test]
    fn test_second_pass_only_for_overridden_sheets() {
        let reader = Arc::new(MemoryWorkbookReader::new().with_workbook("book.xlsx", workbook()));
        let manifest = discovery(reader.clone())
            .discover(Path::new("book.xlsx"))
            .unwrap();

        assert_eq!(reader.full_reads(), 1);
        assert_eq!(reader.sheet_reads(), 1);

        let usage = manifest.sheet("사용내역").unwrap();
        assert_eq!(usage.info.header_start_row, 3);
        assert_eq!(usage.info.headers, vec!["일자", "금액"]);
        assert_eq!(usage.overrides.header_start_row, Some(3));
    }

    #[test]
    fn test_no_overrides_uses_first_pass_only() {
        let reader = Arc::new(MemoryWorkbookReader::new().with_workbook(
            "plain.xlsx",
            vec![SheetGrid::from_text_rows("통장내역", &[&["일자", "금액"]])],
        ));
        discovery(reader.clone())
            .discover(Path::new("plain.xlsx"))
            .unwrap();
        assert_eq!(reader.full_reads(), 1);
        assert_eq!(reader.sheet_reads(), 0);
    }

    #[test]
    fn test_missing_file_is_error() {
        let reader = Arc::new(MemoryWorkbookReader::new());
        assert!(discovery(reader).discover(Path::new("none.xlsx")).is_err());
    }
}
