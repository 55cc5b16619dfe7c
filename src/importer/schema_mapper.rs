// ==========================================
// 工作簿 ETL - 步骤 2: 列映射
// ==========================================
// 两种可互换策略（SchemaMapper trait）:
//   StaticSchemaMapper: 按集合的列名别名表确定性映射
//   LlmSchemaMapper: 按 schema + 表头 + 样例行生成提示词，由推理服务给出映射
// 跳过/未分类的工作表不调用任何策略，直接记为 skipped
// ==========================================

use crate::config::{CollectionSchema, FieldSpec, FieldType, SchemaCatalog};
use crate::domain::mapping::{ColumnMapping, SheetMapping};
use crate::domain::sheet::{ManifestSheet, SheetManifest, SheetStatus};
use crate::domain::types::{Collection, MappingStrategy};
use crate::importer::normalizer::Transform;
use crate::importer::workbook_reader::header_key;
use crate::llm::{complete_json, CompletionClient, CompletionOptions};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const EXACT_CONFIDENCE: f64 = 1.0;
const CONTAINS_CONFIDENCE: f64 = 0.8;

#[async_trait]
pub trait SchemaMapper: Send + Sync {
    /// 映射一个可映射的工作表（调用方保证 sheet.is_mappable()）
    async fn map_sheet(&self, manifest: &SheetManifest, sheet: &ManifestSheet) -> SheetMapping;

    fn strategy(&self) -> MappingStrategy;
}

/// 映射整个清单；不可映射的工作表直接记为 skipped
pub async fn map_manifest(mapper: &dyn SchemaMapper, manifest: &SheetManifest) -> Vec<SheetMapping> {
    let mut mappings = Vec::with_capacity(manifest.sheets.len());
    for sheet in &manifest.sheets {
        let mapping = match sheet.status {
            SheetStatus::Mappable => mapper.map_sheet(manifest, sheet).await,
            SheetStatus::Skipped => SheetMapping::skipped(
                manifest,
                sheet.name(),
                sheet.target_collection,
                sheet.hint.clone().unwrap_or_else(|| "건너뛰기 규칙".to_string()),
                mapper.strategy(),
            ),
            SheetStatus::Unclassified => SheetMapping::skipped(
                manifest,
                sheet.name(),
                None,
                "분류 규칙 없음",
                mapper.strategy(),
            ),
        };
        if !mapping.skipped {
            debug!(sheet = %mapping.sheet_name, mean_confidence = ?mapping.mean_confidence(), "工作表映射置信度");
        }
        mappings.push(mapping);
    }

    info!(
        file = %manifest.file_name,
        sheets = mappings.len(),
        active = mappings.iter().filter(|m| !m.skipped).count(),
        "列映射完成"
    );
    mappings
}

/// 字段类型 → 默认标准化函数
pub fn default_transform(field: &FieldSpec) -> Transform {
    match field.field_type {
        FieldType::String => Transform::String,
        FieldType::Amount => Transform::Amount,
        FieldType::Percent => Transform::Percent,
        FieldType::Date => Transform::Date,
        FieldType::WeekCode => Transform::WeekCode,
        FieldType::Enum => match field.name {
            "method" => Transform::PaymentMethod,
            "status" => Transform::ProjectStatus,
            "type" => Transform::ProjectType,
            "settlementType" => Transform::SettlementType,
            "accountType" => Transform::AccountType,
            _ => Transform::String,
        },
    }
}

/// 表头比较键: 去空白 + 大写
// ==========================================
// 静态别名表
// ==========================================
type AliasTable = &'static [(&'static str, &'static [&'static str])];

const PROJECT_ALIASES: AliasTable = &[
    ("name", &["사업명", "과제명", "프로젝트명", "사업명칭"]),
    ("code", &["사업코드", "과제번호", "사업번호"]),
    ("type", &["사업유형", "사업구분", "유형"]),
    ("status", &["진행상태", "진행현황", "상태"]),
    ("clientOrg", &["발주처", "발주기관", "고객사", "주관기관"]),
    ("department", &["담당부서", "수행부서", "부서"]),
    ("manager", &["담당자", "책임자", "PM"]),
    ("contractAmount", &["계약금액", "총사업비", "계약액", "사업비"]),
    ("profitRate", &["이익률", "수익률", "마진율"]),
    ("settlementType", &["정산구분", "정산여부", "정산"]),
    ("accountType", &["계좌구분", "전용계좌", "계좌"]),
    ("startDate", &["사업시작일", "계약시작일", "착수일", "시작일"]),
    ("endDate", &["사업종료일", "계약종료일", "완료일", "종료일"]),
    ("budgetCategory", &["비목"]),
    ("budgetSubCategory", &["세목"]),
    ("budgetItem", &["세세목", "산출내역", "내역"]),
    ("budgetAmount", &["예산액", "편성액", "금액편성", "예산"]),
    ("note", &["비고", "메모"]),
];

const TRANSACTION_ALIASES: AliasTable = &[
    ("dateTime", &["거래일자", "거래일시", "사용일자", "승인일자", "거래일", "일자", "날짜"]),
    ("weekCode", &["주차코드", "주차", "주간"]),
    ("method", &["결제수단", "결제방법", "지급방법", "지출방법", "사용구분"]),
    ("description", &["적요", "거래내용", "사용목적", "내용"]),
    ("counterparty", &["거래처", "가맹점", "사용처", "상호", "받는분"]),
    ("projectName", &["사업명", "과제명", "프로젝트"]),
    ("budgetCategory", &["집행비목", "예산과목", "비목"]),
    ("bankAmount", &["통장출금", "찾으신금액", "출금액", "출금"]),
    ("depositAmount", &["맡기신금액", "입금액", "입금"]),
    ("expenseAmount", &["공급가액", "집행액", "사용금액", "공급가", "금액"]),
    ("vatIn", &["매입부가세", "부가세", "세액", "VAT"]),
    ("balance", &["거래후잔액", "잔액"]),
    ("evidence", &["증빙구분", "증빙유형", "증빙"]),
    ("note", &["비고", "메모"]),
];

const MEMBER_ALIASES: AliasTable = &[
    ("name", &["성명", "이름", "연구원명", "인력명", "참여자"]),
    ("employeeNo", &["사번", "직원번호"]),
    ("role", &["직급", "직위", "역할", "담당업무"]),
    ("department", &["소속부서", "소속", "부서"]),
    ("projectName", &["참여사업", "사업명", "과제명"]),
    ("participationRate", &["참여율", "참여비율", "투입률"]),
    ("startDate", &["참여시작일", "투입시작", "시작일"]),
    ("endDate", &["참여종료일", "투입종료", "종료일"]),
    ("monthlyCost", &["월인건비", "월급여", "월단가", "인건비"]),
    ("note", &["비고", "메모"]),
];

fn alias_table(collection: Collection) -> AliasTable {
    match collection {
        Collection::Projects => PROJECT_ALIASES,
        Collection::Transactions => TRANSACTION_ALIASES,
        Collection::Members => MEMBER_ALIASES,
    }
}

// ==========================================
// StaticSchemaMapper
// ==========================================
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticSchemaMapper;

impl StaticSchemaMapper {
    pub fn new() -> Self {
        Self
    }

    /// 表头列表 → 列映射
    /// 第 1 遍精确匹配（1.0），第 2 遍最长别名包含匹配（0.8）；每个字段只被首个命中列认领
    pub fn map_headers(&self, collection: Collection, headers: &[String]) -> Vec<ColumnMapping> {
        let schema = SchemaCatalog::schema(collection);
        let table = alias_table(collection);
        let keys: Vec<String> = headers.iter().map(|h| header_key(h)).collect();

        let mut claimed_fields: HashSet<&str> = HashSet::new();
        let mut assigned: Vec<Option<(&'static str, f64)>> = vec![None; headers.len()];

        // ===== 第 1 遍: 精确匹配 =====
        for (col, key) in keys.iter().enumerate() {
            let hit = table.iter().find(|(field, aliases)| {
                !claimed_fields.contains(field) && aliases.iter().any(|a| header_key(a) == *key)
            });
            if let Some(&(field, _)) = hit {
                claimed_fields.insert(field);
                assigned[col] = Some((field, EXACT_CONFIDENCE));
            }
        }

        // ===== 第 2 遍: 包含匹配（最长别名优先） =====
        for (col, key) in keys.iter().enumerate() {
            if assigned[col].is_some() || key.is_empty() {
                continue;
            }
            let best = table
                .iter()
                .filter(|(field, _)| !claimed_fields.contains(field))
                .flat_map(|(field, aliases)| aliases.iter().map(move |a| (*field, header_key(a))))
                .filter(|(_, alias)| key.contains(alias.as_str()))
                .max_by_key(|(_, alias)| alias.chars().count());
            if let Some((field, _)) = best {
                claimed_fields.insert(field);
                assigned[col] = Some((field, CONTAINS_CONFIDENCE));
            }
        }

        headers
            .iter()
            .zip(assigned)
            .filter_map(|(header, hit)| {
                let (field, confidence) = hit?;
                let transform = schema
                    .field(field)
                    .map(default_transform)
                    .unwrap_or(Transform::String);
                Some(
                    ColumnMapping::new(header.clone(), field)
                        .with_transform(transform.name())
                        .with_confidence(confidence),
                )
            })
            .collect()
    }
}

#[async_trait]
impl SchemaMapper for StaticSchemaMapper {
    async fn map_sheet(&self, manifest: &SheetManifest, sheet: &ManifestSheet) -> SheetMapping {
        let Some(collection) = sheet.target_collection else {
            return SheetMapping::skipped(
                manifest,
                sheet.name(),
                None,
                "목표 컬렉션 없음",
                MappingStrategy::Static,
            );
        };

        let column_mappings = self.map_headers(collection, &sheet.info.headers);
        debug!(
            sheet = sheet.name(),
            collection = %collection,
            mapped = column_mappings.len(),
            headers = sheet.info.headers.len(),
            "静态映射完成"
        );

        SheetMapping::mapped(manifest, sheet.name(), collection, column_mappings, MappingStrategy::Static)
    }

    fn strategy(&self) -> MappingStrategy {
        MappingStrategy::Static
    }
}

// ==========================================
// LlmSchemaMapper
// ==========================================
const MAPPING_SYSTEM_PROMPT: &str = "You map columns of Korean business spreadsheets to a fixed target schema. \
Respond with a single JSON object only.";

#[derive(Debug, Deserialize)]
struct LlmMappingResponse {
    #[serde(default)]
    mappings: Vec<LlmColumnMapping>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LlmColumnMapping {
    excel_column: String,
    firestore_field: String,
    #[serde(default)]
    transform: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    note: Option<String>,
}

pub struct LlmSchemaMapper {
    client: Arc<dyn CompletionClient>,
    options: CompletionOptions,
    sample_rows: usize,
}

impl LlmSchemaMapper {
    pub fn new(client: Arc<dyn CompletionClient>, options: CompletionOptions, sample_rows: usize) -> Self {
        Self {
            client,
            options: options.with_system(MAPPING_SYSTEM_PROMPT),
            sample_rows,
        }
    }

    /// 构建映射提示词
    pub fn build_prompt(&self, sheet: &ManifestSheet, collection: Collection) -> String {
        let mut prompt = String::new();
        let _ = writeln!(prompt, "## Target schema");
        prompt.push_str(&SchemaCatalog::render_for_prompt(collection));

        let _ = writeln!(prompt, "\n## Sheet");
        let _ = writeln!(prompt, "Name: {}", sheet.name());
        if let Some(hint) = &sheet.hint {
            let _ = writeln!(prompt, "Hint: {}", hint);
        }

        let _ = writeln!(prompt, "\n## Header rows (raw)");
        for row in &sheet.info.sample_headers {
            let _ = writeln!(prompt, "{}", row.join(" | "));
        }

        let _ = writeln!(prompt, "\n## Combined column headers (use these exact strings as excelColumn)");
        for header in &sheet.info.headers {
            let _ = writeln!(prompt, "- {}", header);
        }

        let _ = writeln!(prompt, "\n## Sample data rows");
        for row in sheet.info.sample_rows.iter().take(self.sample_rows) {
            let cells: Vec<String> = row.iter().map(|c| c.to_text()).collect();
            let _ = writeln!(prompt, "{}", cells.join(" | "));
        }

        let transforms: Vec<&str> = Transform::ALL.iter().map(|t| t.name()).collect();
        let _ = writeln!(prompt, "\n## Available transforms\n{}", transforms.join(", "));

        let _ = writeln!(
            prompt,
            "\n## Output\nReturn {{ \"mappings\": [{{ \"excelColumn\": string, \"firestoreField\": string, \
             \"transform\": string | null, \"confidence\": number 0-1, \"note\": string | null }}] }}. \
             Omit columns that match no field."
        );
        prompt
    }

    /// 过滤 schema 外字段与表中不存在的列；同一字段只保留首个
    fn accept_mappings(
        &self,
        sheet: &ManifestSheet,
        schema: &CollectionSchema,
        raw: Vec<LlmColumnMapping>,
    ) -> Vec<ColumnMapping> {
        let mut claimed: HashSet<String> = HashSet::new();
        let mut accepted = Vec::with_capacity(raw.len());

        for m in raw {
            let Some(field) = schema.field(&m.firestore_field) else {
                warn!(sheet = sheet.name(), field = %m.firestore_field, "映射字段不在 schema 中，已丢弃");
                continue;
            };
            // 列名统一为工作表中的原始表头
            let wanted = header_key(&m.excel_column);
            let Some(header) = sheet.info.headers.iter().find(|h| header_key(h) == wanted) else {
                warn!(sheet = sheet.name(), column = %m.excel_column, "映射列不在工作表中，已丢弃");
                continue;
            };
            if !claimed.insert(field.name.to_string()) {
                warn!(sheet = sheet.name(), field = field.name, "字段被多列映射，保留首个");
                continue;
            }

            let transform = m
                .transform
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| default_transform(field).name().to_string());
            let mut mapping = ColumnMapping::new(header.as_str(), field.name)
                .with_transform(transform)
                .with_confidence(m.confidence.unwrap_or(0.5));
            mapping.note = m.note;
            accepted.push(mapping);
        }
        accepted
    }
}

#[async_trait]
impl SchemaMapper for LlmSchemaMapper {
    async fn map_sheet(&self, manifest: &SheetManifest, sheet: &ManifestSheet) -> SheetMapping {
        let Some(collection) = sheet.target_collection else {
            return SheetMapping::skipped(
                manifest,
                sheet.name(),
                None,
                "목표 컬렉션 없음",
                MappingStrategy::Llm,
            );
        };

        let prompt = self.build_prompt(sheet, collection);
        let response: Result<LlmMappingResponse, _> =
            complete_json(self.client.as_ref(), &prompt, &self.options).await;

        let column_mappings = match response {
            Ok(parsed) => {
                let schema = SchemaCatalog::schema(collection);
                self.accept_mappings(sheet, schema, parsed.mappings)
            }
            Err(e) => {
                // 失败不跳过: 记为空映射，后续阶段产出 0 条记录
                error!(sheet = sheet.name(), error = %e, "LLM 映射失败");
                Vec::new()
            }
        };

        debug!(
            sheet = sheet.name(),
            model = self.client.model_name(),
            mapped = column_mappings.len(),
            "LLM 映射完成"
        );

        SheetMapping::mapped(manifest, sheet.name(), collection, column_mappings, MappingStrategy::Llm)
    }

    fn strategy(&self) -> MappingStrategy {
        MappingStrategy::Llm
    }
}
