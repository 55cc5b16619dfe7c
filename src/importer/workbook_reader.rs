// ==========================================
// 工作簿 ETL - 工作簿读取端口与适配器
// ==========================================
// 端口: WorkbookReader（同步，按工作表返回网格）
// 适配器: CalamineWorkbookReader (.xlsx / .csv) / MemoryWorkbookReader (测试/内存数据)
// 表头检测: 合并单元格感知，支持覆写表头起始行/行数/数据起始行
// ==========================================

use crate::domain::sheet::{SheetInfo, SheetOverride, SheetOverrides};
use crate::domain::types::CellValue;
use crate::importer::error::{ImportError, ImportResult};
use calamine::{open_workbook, Data, Reader, Xlsx};
use chrono::Timelike;
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

/// 表头自动检测的扫描上限（行）
const HEADER_SCAN_ROWS: usize = 20;
const SAMPLE_HEADER_ROWS: usize = 2;
const SAMPLE_DATA_ROWS: usize = 5;

// ==========================================
// 网格模型
// ==========================================

/// 合并区域（0 起始，闭区间）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergedRegion {
    pub start_row: usize,
    pub start_col: usize,
    pub end_row: usize,
    pub end_col: usize,
}

impl MergedRegion {
    pub fn new(start_row: usize, start_col: usize, end_row: usize, end_col: usize) -> Self {
        Self {
            start_row,
            start_col,
            end_row,
            end_col,
        }
    }

    fn spans_rows(&self) -> bool {
        self.end_row > self.start_row
    }

    fn spans_cols(&self) -> bool {
        self.end_col > self.start_col
    }
}

/// 单个工作表的原始网格（从 A1 开始对齐）
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SheetGrid {
    pub name: String,
    pub cells: Vec<Vec<CellValue>>,
    pub merged: Vec<MergedRegion>,
}

/// 解析后的数据行
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub row_number: usize, // 物理行号（从 1 开始）
    pub cells: Vec<CellValue>,
}

impl RawRow {
    pub fn cell(&self, col: usize) -> &CellValue {
        static EMPTY: CellValue = CellValue::Empty;
        self.cells.get(col).unwrap_or(&EMPTY)
    }
}

/// 解析结果: 合并表头 + 数据行
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSheet {
    pub name: String,
    pub headers: Vec<String>,
    pub data_start_row: usize,
    pub rows: Vec<RawRow>,
}

impl ParsedSheet {
    /// 列索引（按 header_key 比较）
    pub fn column_index(&self, header: &str) -> Option<usize> {
        let wanted = header_key(header);
        self.headers.iter().position(|h| header_key(h) == wanted)
    }
}

/// 表头比较键：去空白、转大写（映射与抽取共用）
pub fn header_key(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

/// 表头布局（0 起始）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SheetLayout {
    header_start: usize,
    header_rows: usize,
    data_start: usize,
}

impl SheetGrid {
    pub fn new(name: impl Into<String>, cells: Vec<Vec<CellValue>>) -> Self {
        Self {
            name: name.into(),
            cells,
            merged: Vec::new(),
        }
    }

    pub fn with_merged(mut self, region: MergedRegion) -> Self {
        self.merged.push(region);
        self
    }

    /// 由文本行构造（测试/CSV 常用）
    pub fn from_text_rows(name: impl Into<String>, rows: &[&[&str]]) -> Self {
        let cells = rows
            .iter()
            .map(|row| row.iter().map(|s| CellValue::from(*s)).collect())
            .collect();
        Self::new(name, cells)
    }

    pub fn row_count(&self) -> usize {
        self.cells.len()
    }

    pub fn column_count(&self) -> usize {
        self.cells.iter().map(Vec::len).max().unwrap_or(0)
    }

    fn raw(&self, row: usize, col: usize) -> &CellValue {
        static EMPTY: CellValue = CellValue::Empty;
        self.cells
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY)
    }

    /// 合并区域左上角的值填充整个区域
    fn filled(&self) -> Vec<Vec<CellValue>> {
        let width = self.column_count();
        let mut grid: Vec<Vec<CellValue>> = self
            .cells
            .iter()
            .map(|row| {
                let mut padded = row.clone();
                padded.resize(width, CellValue::Empty);
                padded
            })
            .collect();

        for region in &self.merged {
            let anchor = self.raw(region.start_row, region.start_col).clone();
            for row in region.start_row..=region.end_row.min(grid.len().saturating_sub(1)) {
                for col in region.start_col..=region.end_col.min(width.saturating_sub(1)) {
                    if grid[row][col].is_blank() {
                        grid[row][col] = anchor.clone();
                    }
                }
            }
        }
        grid
    }

    // ==========================================
    // 表头布局检测
    // ==========================================
    fn detect_header_start(&self) -> usize {
        let scan = self.row_count().min(HEADER_SCAN_ROWS);
        let mut first_non_blank = None;
        for row in 0..scan {
            let non_empty: Vec<&CellValue> = self.cells[row].iter().filter(|c| !c.is_blank()).collect();
            if non_empty.is_empty() {
                continue;
            }
            first_non_blank.get_or_insert(row);
            let texts = non_empty
                .iter()
                .filter(|c| matches!(c, CellValue::Text(_)))
                .count();
            // 表头行: 至少 2 个非空单元格且以文本为主
            if non_empty.len() >= 2 && texts * 2 > non_empty.len() {
                return row;
            }
        }
        first_non_blank.unwrap_or(0)
    }

    fn detect_header_rows(&self, header_start: usize) -> usize {
        let mut rows = 1;
        for region in self.merged.iter().filter(|r| r.start_row == header_start) {
            if region.spans_rows() {
                rows = rows.max(region.end_row - region.start_row + 1);
            } else if region.spans_cols() {
                rows = rows.max(2);
            }
        }
        rows
    }

    fn layout(&self, ov: &SheetOverride) -> SheetLayout {
        let header_start = match ov.header_start_row {
            Some(row) => row.saturating_sub(1),
            None => self.detect_header_start(),
        };
        let header_rows = ov
            .header_row_count
            .unwrap_or_else(|| self.detect_header_rows(header_start))
            .max(1);
        let data_start = match ov.data_start_row {
            Some(row) => row.saturating_sub(1),
            None => header_start + header_rows,
        };
        SheetLayout {
            header_start,
            header_rows,
            data_start,
        }
    }

    fn headers(&self, filled: &[Vec<CellValue>], layout: &SheetLayout) -> Vec<String> {
        let width = self.column_count();
        let header_end = (layout.header_start + layout.header_rows).min(filled.len());
        let mut seen: HashMap<String, usize> = HashMap::new();

        (0..width)
            .map(|col| {
                let mut parts: Vec<String> = (layout.header_start..header_end)
                    .map(|row| filled[row][col].to_text())
                    .filter(|text| !text.is_empty())
                    .collect();
                parts.dedup();

                let base = if parts.is_empty() {
                    format!("열{}", col + 1)
                } else {
                    parts.join(" ")
                };

                let count = seen.entry(base.clone()).or_insert(0);
                *count += 1;
                if *count == 1 {
                    base
                } else {
                    format!("{}_{}", base, count)
                }
            })
            .collect()
    }

    fn data_rows(&self, filled: Vec<Vec<CellValue>>, layout: &SheetLayout) -> Vec<RawRow> {
        filled
            .into_iter()
            .enumerate()
            .skip(layout.data_start)
            .filter(|(_, cells)| cells.iter().any(|c| !c.is_blank()))
            .map(|(idx, cells)| RawRow {
                row_number: idx + 1,
                cells,
            })
            .collect()
    }

    /// 解析为表头 + 数据行
    pub fn parse(&self, ov: &SheetOverride) -> ParsedSheet {
        let layout = self.layout(ov);
        let filled = self.filled();
        let headers = self.headers(&filled, &layout);
        let rows = self.data_rows(filled, &layout);

        ParsedSheet {
            name: self.name.clone(),
            headers,
            data_start_row: layout.data_start + 1,
            rows,
        }
    }

    /// 生成 SheetInfo（形状 + 样例）
    pub fn describe(&self, ov: &SheetOverride) -> SheetInfo {
        let layout = self.layout(ov);
        let filled = self.filled();
        let headers = self.headers(&filled, &layout);

        let sample_headers = filled
            .iter()
            .skip(layout.header_start)
            .take(layout.header_rows.min(SAMPLE_HEADER_ROWS))
            .map(|row| row.iter().map(CellValue::to_text).collect())
            .collect();

        let sample_rows = self
            .data_rows(filled, &layout)
            .into_iter()
            .take(SAMPLE_DATA_ROWS)
            .map(|row| row.cells)
            .collect();

        SheetInfo {
            name: self.name.clone(),
            row_count: self.row_count(),
            column_count: self.column_count(),
            merged_cell_count: self.merged.len(),
            header_row_count: layout.header_rows,
            header_start_row: layout.header_start + 1,
            data_start_row: layout.data_start + 1,
            headers,
            sample_headers,
            sample_rows,
        }
    }
}

// ==========================================
// WorkbookReader 端口
// ==========================================
pub trait WorkbookReader: Send + Sync {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    /// 读取全部工作表网格（保持工作簿中的顺序）
    fn sheet_grids(&self, path: &Path) -> ImportResult<Vec<SheetGrid>>;

    /// 读取单个工作表网格
    fn sheet_grid(&self, path: &Path, sheet: &str) -> ImportResult<SheetGrid> {
        self.sheet_grids(path)?
            .into_iter()
            .find(|g| g.name == sheet)
            .ok_or_else(|| ImportError::SheetNotFound {
                file: display_name(path),
                sheet: sheet.to_string(),
            })
    }

    fn discover_sheets(&self, path: &Path, overrides: &SheetOverrides) -> ImportResult<Vec<SheetInfo>> {
        let grids = self.sheet_grids(path)?;
        if grids.is_empty() {
            return Err(ImportError::EmptyWorkbook(display_name(path)));
        }
        Ok(grids
            .iter()
            .map(|grid| {
                let ov = overrides.get(&grid.name).copied().unwrap_or_default();
                grid.describe(&ov)
            })
            .collect())
    }

    fn describe_sheet(&self, path: &Path, sheet: &str, ov: &SheetOverride) -> ImportResult<SheetInfo> {
        Ok(self.sheet_grid(path, sheet)?.describe(ov))
    }

    fn parse_sheet(&self, path: &Path, sheet: &str, ov: &SheetOverride) -> ImportResult<ParsedSheet> {
        Ok(self.sheet_grid(path, sheet)?.parse(ov))
    }
}

pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

// ==========================================
// CalamineWorkbookReader - .xlsx (calamine) / .csv (csv)
// ==========================================
#[derive(Debug, Default, Clone, Copy)]
pub struct CalamineWorkbookReader;

impl CalamineWorkbookReader {
    pub fn new() -> Self {
        Self
    }

    fn open_xlsx(&self, path: &Path) -> ImportResult<Xlsx<BufReader<File>>> {
        let mut workbook: Xlsx<_> = open_workbook(path)?;
        if let Err(e) = workbook.load_merged_regions() {
            // 合并信息缺失时退化为普通网格
            warn!(file = %path.display(), error = %e, "合并单元格信息读取失败");
        }
        Ok(workbook)
    }

    /// 只解析一个工作表（合并区域 + 单元格区域）
    fn read_worksheet(workbook: &mut Xlsx<BufReader<File>>, name: &str) -> ImportResult<SheetGrid> {
        // 先收集合并区域，再借用 worksheet_range
        let merged: Vec<MergedRegion> = workbook
            .merged_regions_by_sheet(name)
            .into_iter()
            .map(|(_, _, dims)| {
                MergedRegion::new(
                    dims.start.0 as usize,
                    dims.start.1 as usize,
                    dims.end.0 as usize,
                    dims.end.1 as usize,
                )
            })
            .collect();

        let range = workbook.worksheet_range(name)?;
        let (row_offset, col_offset) = range
            .start()
            .map(|(r, c)| (r as usize, c as usize))
            .unwrap_or((0, 0));

        let mut cells: Vec<Vec<CellValue>> = vec![Vec::new(); row_offset];
        for row in range.rows() {
            let mut out = vec![CellValue::Empty; col_offset];
            out.extend(row.iter().map(convert_cell));
            cells.push(out);
        }

        debug!(sheet = %name, rows = cells.len(), merged = merged.len(), "工作表网格读取完成");
        Ok(SheetGrid {
            name: name.to_string(),
            cells,
            merged,
        })
    }

    fn read_xlsx(&self, path: &Path) -> ImportResult<Vec<SheetGrid>> {
        let mut workbook = self.open_xlsx(path)?;
        let names = workbook.sheet_names();
        let mut grids = Vec::with_capacity(names.len());
        for name in names {
            grids.push(Self::read_worksheet(&mut workbook, &name)?);
        }
        Ok(grids)
    }

    fn read_xlsx_sheet(&self, path: &Path, sheet: &str) -> ImportResult<SheetGrid> {
        let mut workbook = self.open_xlsx(path)?;
        if !workbook.sheet_names().iter().any(|n| n == sheet) {
            return Err(ImportError::SheetNotFound {
                file: display_name(path),
                sheet: sheet.to_string(),
            });
        }
        Self::read_worksheet(&mut workbook, sheet)
    }

    fn read_csv(&self, path: &Path) -> ImportResult<Vec<SheetGrid>> {
        let file = File::open(path)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(false) // 表头由布局检测决定
            .flexible(true)
            .from_reader(file);

        let mut cells = Vec::new();
        for result in reader.records() {
            let record = result?;
            cells.push(
                record
                    .iter()
                    .map(|v| CellValue::from(v.trim_start_matches('\u{feff}')))
                    .collect(),
            );
        }

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Sheet1".to_string());
        Ok(vec![SheetGrid::new(name, cells)])
    }
}

enum SourceFormat {
    Xlsx,
    Csv,
}

fn source_format(path: &Path) -> ImportResult<SourceFormat> {
    if !path.exists() {
        return Err(ImportError::FileNotFound(path.display().to_string()));
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "xlsx" | "xlsm" => Ok(SourceFormat::Xlsx),
        "csv" => Ok(SourceFormat::Csv),
        _ => Err(ImportError::UnsupportedFormat(ext)),
    }
}

impl WorkbookReader for CalamineWorkbookReader {
    fn sheet_grids(&self, path: &Path) -> ImportResult<Vec<SheetGrid>> {
        match source_format(path)? {
            SourceFormat::Xlsx => self.read_xlsx(path),
            SourceFormat::Csv => self.read_csv(path),
        }
    }

    fn sheet_grid(&self, path: &Path, sheet: &str) -> ImportResult<SheetGrid> {
        match source_format(path)? {
            SourceFormat::Xlsx => self.read_xlsx_sheet(path, sheet),
            // CSV 只有一个工作表
            SourceFormat::Csv => self
                .read_csv(path)?
                .into_iter()
                .find(|g| g.name == sheet)
                .ok_or_else(|| ImportError::SheetNotFound {
                    file: display_name(path),
                    sheet: sheet.to_string(),
                }),
        }
    }
}

/// calamine 单元格 → CellValue（日期渲染为 ISO 文本）
fn convert_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::from(s.as_str()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(value) if value.num_seconds_from_midnight() == 0 => {
                CellValue::Text(value.format("%Y-%m-%d").to_string())
            }
            Some(value) => CellValue::Text(value.format("%Y-%m-%dT%H:%M:%S").to_string()),
            None => CellValue::Number(dt.as_f64()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => CellValue::Text(e.to_string()),
    }
}

// ==========================================
// MemoryWorkbookReader - 内存工作簿（带读取计数）
// ==========================================
#[derive(Debug, Default)]
pub struct MemoryWorkbookReader {
    workbooks: HashMap<PathBuf, Vec<SheetGrid>>,
    unreadable: HashMap<PathBuf, String>,
    full_reads: AtomicUsize,
    sheet_reads: AtomicUsize,
}

impl MemoryWorkbookReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workbook(mut self, path: impl Into<PathBuf>, sheets: Vec<SheetGrid>) -> Self {
        self.workbooks.insert(path.into(), sheets);
        self
    }

    /// 存在但无法解析的文件
    pub fn with_unreadable(mut self, path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        self.unreadable.insert(path.into(), message.into());
        self
    }

    pub fn full_reads(&self) -> usize {
        self.full_reads.load(Ordering::SeqCst)
    }

    pub fn sheet_reads(&self) -> usize {
        self.sheet_reads.load(Ordering::SeqCst)
    }

    fn lookup(&self, path: &Path) -> ImportResult<&Vec<SheetGrid>> {
        if let Some(message) = self.unreadable.get(path) {
            return Err(ImportError::ExcelParseError(message.clone()));
        }
        self.workbooks
            .get(path)
            .ok_or_else(|| ImportError::FileNotFound(path.display().to_string()))
    }
}

impl WorkbookReader for MemoryWorkbookReader {
    fn exists(&self, path: &Path) -> bool {
        self.workbooks.contains_key(path) || self.unreadable.contains_key(path)
    }

    fn sheet_grids(&self, path: &Path) -> ImportResult<Vec<SheetGrid>> {
        self.full_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.lookup(path)?.clone())
    }

    fn sheet_grid(&self, path: &Path, sheet: &str) -> ImportResult<SheetGrid> {
        self.sheet_reads.fetch_add(1, Ordering::SeqCst);
        self.lookup(path)?
            .iter()
            .find(|g| g.name == sheet)
            .cloned()
            .ok_or_else(|| ImportError::SheetNotFound {
                file: display_name(path),
                sheet: sheet.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    fn budget_grid() -> SheetGrid {
        // 1 行标题 + 2 行合并表头 + 2 行数据
        SheetGrid::from_text_rows(
            "예산",
            &[
                &["2024 사업 예산", "", "", ""],
                &["비목", "금액", "", "비고"],
                &["", "편성", "집행", ""],
                &["인건비", "1,000", "800", ""],
                &["여비", "200", "150", "출장"],
            ],
        )
        .with_merged(MergedRegion::new(0, 0, 0, 3))
        .with_merged(MergedRegion::new(1, 0, 2, 0))
        .with_merged(MergedRegion::new(1, 1, 1, 2))
        .with_merged(MergedRegion::new(1, 3, 2, 3))
    }

    #[test]
    fn test_detects_two_row_merged_header() {
        let info = budget_grid().describe(&SheetOverride::default());
        assert_eq!(info.header_start_row, 2);
        assert_eq!(info.header_row_count, 2);
        assert_eq!(info.data_start_row, 4);
        assert_eq!(info.headers, vec!["비목", "금액 편성", "금액 집행", "비고"]);
        assert_eq!(info.merged_cell_count, 4);
        assert_eq!(info.sample_rows.len(), 2);
        assert_eq!(info.sample_headers.len(), 2);
    }

    #[test]
    fn test_parse_keeps_physical_row_numbers() {
        let parsed = budget_grid().parse(&SheetOverride::default());
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].row_number, 4);
        assert_eq!(parsed.rows[1].row_number, 5);
        assert_eq!(parsed.rows[1].cell(3), &CellValue::text("출장"));
        assert_eq!(parsed.column_index("금액 집행"), Some(2));
        assert_eq!(parsed.column_index("금액집행"), Some(2));
    }

    #[test]
    fn test_column_index_ignores_case() {
        let grid = SheetGrid::from_text_rows("s", &[&["Date", "VAT"], &["24.01.02", "100"]]);
        let parsed = grid.parse(&SheetOverride::default());
        assert_eq!(parsed.column_index("vat"), Some(1));
        assert_eq!(parsed.column_index(" da te "), Some(0));
        assert_eq!(header_key("매입 부가세"), header_key("매입부가세"));
    }

    #[test]
    fn test_override_applied_at_parse_time() {
        let grid = SheetGrid::from_text_rows(
            "사용내역",
            &[
                &["사용내역", ""],
                &["기준일", "2024-01-01"],
                &["일자", "금액"],
                &["24.01.02", "1000"],
            ],
        );
        let ov = SheetOverride {
            header_start_row: Some(3),
            ..Default::default()
        };
        let parsed = grid.parse(&ov);
        assert_eq!(parsed.headers, vec!["일자", "금액"]);
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].row_number, 4);
    }

    #[test]
    fn test_data_start_override_skips_unit_row() {
        let grid = SheetGrid::from_text_rows(
            "인력현황",
            &[&["성명", "직급"], &["(단위: 명)", ""], &["홍길동", "책임"]],
        );
        let ov = SheetOverride {
            data_start_row: Some(3),
            ..Default::default()
        };
        let parsed = grid.parse(&ov);
        assert_eq!(parsed.headers, vec!["성명", "직급"]);
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].row_number, 3);
    }

    #[test]
    fn test_blank_and_duplicate_headers() {
        let grid = SheetGrid::from_text_rows(
            "s",
            &[&["금액", "", "금액"], &["1", "2", "3"], &["", "", ""], &["4", "5", "6"]],
        );
        let parsed = grid.parse(&SheetOverride::default());
        assert_eq!(parsed.headers, vec!["금액", "열2", "금액_2"]);
        // 全空行被跳过
        assert_eq!(parsed.rows.iter().map(|r| r.row_number).collect::<Vec<_>>(), vec![2, 4]);
    }

    #[test]
    fn test_empty_sheet_describes_without_panic() {
        let info = SheetGrid::new("빈시트", vec![]).describe(&SheetOverride::default());
        assert_eq!(info.row_count, 0);
        assert!(info.headers.is_empty());
        assert!(info.sample_rows.is_empty());
    }

    #[test]
    fn test_csv_is_single_sheet_named_after_stem() {
        let mut file = Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "일자,적요,출금액").unwrap();
        writeln!(file, "24.01.15,사무용품,\"12,000\"").unwrap();

        let reader = CalamineWorkbookReader::new();
        let sheets = reader
            .discover_sheets(file.path(), &SheetOverrides::new())
            .unwrap();
        assert_eq!(sheets.len(), 1);
        let stem = file.path().file_stem().unwrap().to_string_lossy().to_string();
        assert_eq!(sheets[0].name, stem);
        assert_eq!(sheets[0].headers, vec!["일자", "적요", "출금액"]);

        let parsed = reader
            .parse_sheet(file.path(), &stem, &SheetOverride::default())
            .unwrap();
        assert_eq!(parsed.rows[0].cell(2), &CellValue::text("12,000"));
    }

    /// 用 rust_xlsxwriter 生成真实 .xlsx：표지 + 예산（2 行合并表头）
    fn write_budget_xlsx(path: &Path) {
        use rust_xlsxwriter::{Format, Workbook};

        let fmt = Format::new();
        let mut workbook = Workbook::new();

        let cover = workbook.add_worksheet();
        cover.set_name("표지").unwrap();
        cover.write_string(0, 0, "2024 경영관리").unwrap();

        let sheet = workbook.add_worksheet();
        sheet.set_name("예산").unwrap();
        sheet.merge_range(0, 0, 0, 3, "2024 사업 예산", &fmt).unwrap();
        sheet.merge_range(1, 0, 2, 0, "비목", &fmt).unwrap();
        sheet.merge_range(1, 1, 1, 2, "금액", &fmt).unwrap();
        sheet.merge_range(1, 3, 2, 3, "비고", &fmt).unwrap();
        sheet.write_string(2, 1, "편성").unwrap();
        sheet.write_string(2, 2, "집행").unwrap();
        sheet.write_string(3, 0, "인건비").unwrap();
        sheet.write_string(3, 1, "1,000").unwrap();
        sheet.write_number(3, 2, 800.0).unwrap();
        sheet.write_string(4, 0, "여비").unwrap();
        sheet.write_string(4, 1, "200").unwrap();
        sheet.write_number(4, 2, 150.0).unwrap();
        sheet.write_string(4, 3, "출장").unwrap();

        workbook.save(path).unwrap();
    }

    #[test]
    fn test_xlsx_single_sheet_read_keeps_merged_regions() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("budget.xlsx");
        write_budget_xlsx(&path);
        let reader = CalamineWorkbookReader::new();

        let grid = reader.sheet_grid(&path, "예산").unwrap();
        assert_eq!(grid.name, "예산");
        assert_eq!(grid.merged.len(), 4);

        let info = grid.describe(&SheetOverride::default());
        assert_eq!(info.header_row_count, 2);
        assert_eq!(info.headers, vec!["비목", "금액 편성", "금액 집행", "비고"]);

        let parsed = reader
            .parse_sheet(&path, "예산", &SheetOverride::default())
            .unwrap();
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].cell(2), &CellValue::Number(800.0));

        let err = reader.sheet_grid(&path, "없는시트").unwrap_err();
        assert!(matches!(err, ImportError::SheetNotFound { .. }));
    }

    #[test]
    fn test_xlsx_discovery_lists_every_sheet_in_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("budget.xlsx");
        write_budget_xlsx(&path);

        let sheets = CalamineWorkbookReader::new()
            .discover_sheets(&path, &SheetOverrides::new())
            .unwrap();
        let names: Vec<_> = sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["표지", "예산"]);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = Builder::new().suffix(".txt").tempfile().unwrap();
        let err = CalamineWorkbookReader::new()
            .sheet_grids(file.path())
            .unwrap_err();
        assert!(matches!(err, ImportError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_memory_reader_counts_reads() {
        let reader = MemoryWorkbookReader::new().with_workbook("a.xlsx", vec![budget_grid()]);
        let path = Path::new("a.xlsx");
        assert!(reader.exists(path));
        reader.discover_sheets(path, &SheetOverrides::new()).unwrap();
        reader
            .describe_sheet(path, "예산", &SheetOverride::default())
            .unwrap();
        assert_eq!(reader.full_reads(), 1);
        assert_eq!(reader.sheet_reads(), 1);

        let err = reader
            .parse_sheet(path, "없는시트", &SheetOverride::default())
            .unwrap_err();
        assert!(matches!(err, ImportError::SheetNotFound { .. }));
    }
}
