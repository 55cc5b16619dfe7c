// ==========================================
// 工作簿 ETL - 目标集合字段目录
// ==========================================
// 职责: 描述每个目标集合的字段、类型与必填性
// 用途: 渲染为 LLM 映射提示词中的 schema 段落；映射结果字段校验
// ==========================================

use crate::domain::types::Collection;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Amount,
    Percent,
    Date,
    WeekCode,
    Enum,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Amount => "number(amount)",
            FieldType::Percent => "number(ratio 0-1)",
            FieldType::Date => "date(YYYY-MM-DD)",
            FieldType::WeekCode => "weekCode(YYYY-MM-W#)",
            FieldType::Enum => "enum",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub description: &'static str,
    pub enum_values: &'static [&'static str],
}

#[derive(Debug, Clone, Copy)]
pub struct CollectionSchema {
    pub collection: Collection,
    pub description: &'static str,
    pub fields: &'static [FieldSpec],
}

impl CollectionSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

const fn field(
    name: &'static str,
    field_type: FieldType,
    required: bool,
    description: &'static str,
) -> FieldSpec {
    FieldSpec {
        name,
        field_type,
        required,
        description,
        enum_values: &[],
    }
}

const fn enum_field(
    name: &'static str,
    required: bool,
    description: &'static str,
    enum_values: &'static [&'static str],
) -> FieldSpec {
    FieldSpec {
        name,
        field_type: FieldType::Enum,
        required,
        description,
        enum_values,
    }
}

// ===== 枚举取值（与标准化器输出一致） =====
pub const PROJECT_TYPES: &[&str] = &["RND", "SERVICE", "CONSULTING", "EDUCATION", "INTERNAL", "OTHER"];
pub const PROJECT_STATUSES: &[&str] = &["CONTRACT_PENDING", "IN_PROGRESS", "COMPLETED", "ON_HOLD", "CANCELLED"];
pub const SETTLEMENT_TYPES: &[&str] = &["SETTLED", "UNSETTLED", "FIXED", "ACTUAL_COST"];
pub const ACCOUNT_TYPES: &[&str] = &["DEDICATED", "GENERAL", "NONE"];
pub const PAYMENT_METHODS: &[&str] = &["TRANSFER", "CORP_CARD", "CASH", "AUTO_DEBIT", "OTHER"];

const PROJECT_FIELDS: &[FieldSpec] = &[
    field("name", FieldType::String, true, "사업명 (예산 내역 행은 비어 있을 수 있음)"),
    field("code", FieldType::String, false, "사업 코드/과제 번호"),
    enum_field("type", false, "사업 유형", PROJECT_TYPES),
    enum_field("status", false, "진행 상태", PROJECT_STATUSES),
    field("clientOrg", FieldType::String, false, "발주처/고객사"),
    field("department", FieldType::String, false, "담당 부서"),
    field("manager", FieldType::String, false, "담당자(PM)"),
    field("contractAmount", FieldType::Amount, false, "총 계약금액(원)"),
    field("profitRate", FieldType::Percent, false, "이익률"),
    enum_field("settlementType", false, "정산 구분", SETTLEMENT_TYPES),
    enum_field("accountType", false, "전용계좌 구분", ACCOUNT_TYPES),
    field("startDate", FieldType::Date, false, "사업 시작일"),
    field("endDate", FieldType::Date, false, "사업 종료일"),
    field("budgetCategory", FieldType::String, false, "예산 비목"),
    field("budgetSubCategory", FieldType::String, false, "예산 세목"),
    field("budgetItem", FieldType::String, false, "예산 세세목/내역"),
    field("budgetAmount", FieldType::Amount, false, "예산 편성액(원)"),
    field("note", FieldType::String, false, "비고"),
];

const TRANSACTION_FIELDS: &[FieldSpec] = &[
    field("dateTime", FieldType::Date, false, "거래 일자 (weekCode 와 둘 중 하나 필수)"),
    field("weekCode", FieldType::WeekCode, false, "주차 코드 (dateTime 과 둘 중 하나 필수)"),
    enum_field("method", true, "결제 수단", PAYMENT_METHODS),
    field("description", FieldType::String, false, "적요/거래 내용"),
    field("counterparty", FieldType::String, false, "거래처/가맹점"),
    field("projectName", FieldType::String, false, "관련 사업명"),
    field("budgetCategory", FieldType::String, false, "집행 비목"),
    field("bankAmount", FieldType::Amount, false, "통장 출금액"),
    field("depositAmount", FieldType::Amount, false, "입금액"),
    field("expenseAmount", FieldType::Amount, false, "집행(공급가)액"),
    field("vatIn", FieldType::Amount, false, "매입 부가세"),
    field("balance", FieldType::Amount, false, "잔액"),
    field("evidence", FieldType::String, false, "증빙 구분"),
    field("note", FieldType::String, false, "비고"),
];

const MEMBER_FIELDS: &[FieldSpec] = &[
    field("name", FieldType::String, true, "성명"),
    field("employeeNo", FieldType::String, false, "사번"),
    field("role", FieldType::String, false, "직급/역할"),
    field("department", FieldType::String, false, "소속 부서"),
    field("projectName", FieldType::String, false, "참여 사업명"),
    field("participationRate", FieldType::Percent, false, "참여율"),
    field("startDate", FieldType::Date, false, "참여 시작일"),
    field("endDate", FieldType::Date, false, "참여 종료일"),
    field("monthlyCost", FieldType::Amount, false, "월 인건비(원)"),
    field("note", FieldType::String, false, "비고"),
];

const SCHEMAS: &[CollectionSchema] = &[
    CollectionSchema {
        collection: Collection::Projects,
        description: "사업(프로젝트) 및 사업별 예산 내역. 원본 1행 = 1문서",
        fields: PROJECT_FIELDS,
    },
    CollectionSchema {
        collection: Collection::Transactions,
        description: "통장/카드/집행 거래 내역. 원본 1행 = 1문서",
        fields: TRANSACTION_FIELDS,
    },
    CollectionSchema {
        collection: Collection::Members,
        description: "사업 참여 인력. 원본 1행 = 1문서",
        fields: MEMBER_FIELDS,
    },
];

/// 静态 schema 目录
pub struct SchemaCatalog;

impl SchemaCatalog {
    pub fn schema(collection: Collection) -> &'static CollectionSchema {
        // SCHEMAS 覆盖 Collection::ALL
        SCHEMAS
            .iter()
            .find(|s| s.collection == collection)
            .unwrap_or(&SCHEMAS[0])
    }

    pub fn schemas() -> &'static [CollectionSchema] {
        SCHEMAS
    }

    /// 渲染为提示词可读的文本
    pub fn render_for_prompt(collection: Collection) -> String {
        let schema = Self::schema(collection);
        let mut out = String::new();
        let _ = writeln!(out, "Collection: {} - {}", collection, schema.description);
        for f in schema.fields {
            let _ = write!(
                out,
                "- {} ({}, {}): {}",
                f.name,
                f.field_type.as_str(),
                if f.required { "required" } else { "optional" },
                f.description
            );
            if !f.enum_values.is_empty() {
                let _ = write!(out, " [values: {}]", f.enum_values.join(", "));
            }
            out.push('\n');
        }
        out
    }
}
