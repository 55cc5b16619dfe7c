// ==========================================
// 工作簿 ETL - 单元格值标准化器
// ==========================================
// 职责: 原始单元格 → 标准标量（日期/周次/金额/比率/枚举代码/文本）
// 红线: 纯函数，无法识别时返回 None，绝不 panic
// ==========================================

use crate::domain::types::CellValue;
use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

// ===== 电子表格错误值 / 无意义占位符 =====
const NULL_SENTINELS: &[&str] = &[
    "#REF!", "#N/A", "#VALUE!", "#DIV/0!", "#NAME?", "#NUM!", "#NULL!", "알 수 없음", "N/A", "-",
];

fn iso_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}").expect("ISO 日期正则"))
}

fn short_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([0-9]{2}|[0-9]{4})\s*[./-]\s*([0-9]{1,2})\s*[./-]\s*([0-9]{1,2})\.?(?:\s*\([^)]*\))?$")
            .expect("短日期正则")
    })
}

fn week_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9]{2})-([0-9]{1,2})-([0-9]{1,2})$").expect("周次正则"))
}

/// 是否为错误值/占位符（视为"有意留空"，不计入转换失败）
pub fn is_null_sentinel(text: &str) -> bool {
    let trimmed = text.trim();
    NULL_SENTINELS
        .iter()
        .any(|s| s.eq_ignore_ascii_case(trimmed))
}

/// 两位年份一律视为 20YY
fn expand_year(raw: &str) -> Option<i32> {
    let year: i32 = raw.parse().ok()?;
    Some(if raw.len() == 2 { 2000 + year } else { year })
}

// ==========================================
// 日期
// ==========================================
/// ISO 日期前 10 位透传；YY.MM.DD / YYYY.MM.DD / YYYY-MM-DD / YYYY/MM/DD → YYYY-MM-DD
pub fn normalize_date(value: &CellValue) -> Option<String> {
    let text = match value {
        CellValue::Text(s) => s.trim().to_string(),
        _ => return None,
    };
    if text.is_empty() {
        return None;
    }

    if iso_date_re().is_match(&text) {
        return Some(text[..10].to_string());
    }

    let caps = short_date_re().captures(&text)?;
    let year = expand_year(&caps[1])?;
    let month: u32 = caps[2].parse().ok()?;
    let day: u32 = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day).map(|d| d.format("%Y-%m-%d").to_string())
}

// ==========================================
// 周次
// ==========================================
/// ISO 日期透传；YY-M-W → YYYY-MM-W{week}
pub fn normalize_week_code(value: &CellValue) -> Option<String> {
    let text = match value {
        CellValue::Text(s) => s.trim().to_string(),
        _ => return None,
    };

    if iso_date_re().is_match(&text) {
        return Some(text[..10].to_string());
    }

    let caps = week_code_re().captures(&text)?;
    let year = expand_year(&caps[1])?;
    let month: u32 = caps[2].parse().ok()?;
    let week: u32 = caps[3].parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=6).contains(&week) {
        return None;
    }
    Some(format!("{:04}-{:02}-W{}", year, month, week))
}

// ==========================================
// 金额
// ==========================================
/// 数值透传（保留符号，非有限值 → None）；文本去千分位/空白/₩/원 后解析
pub fn normalize_amount(value: &CellValue) -> Option<f64> {
    match value {
        CellValue::Number(n) => n.is_finite().then_some(*n),
        CellValue::Text(s) => parse_amount_text(s),
        _ => None,
    }
}

fn parse_amount_text(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || is_null_sentinel(trimmed) {
        return None;
    }

    let mut cleaned: String = trimmed
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, ',' | '₩' | '￦' | '\\'))
        .collect();
    cleaned = cleaned.replace('원', "");

    // 会计格式 (1,000) → -1000
    let negative = cleaned.starts_with('(') && cleaned.ends_with(')');
    if negative {
        cleaned = cleaned[1..cleaned.len() - 1].to_string();
    }

    if cleaned.is_empty() || is_null_sentinel(&cleaned) {
        return None;
    }

    let parsed: f64 = cleaned.parse().ok()?;
    if !parsed.is_finite() {
        return None;
    }
    Some(if negative { -parsed } else { parsed })
}

// ==========================================
// 比率
// ==========================================
/// > 1 视为百分数整数（÷100），≤ 1 视为小数；文本先去掉末尾 %
pub fn normalize_percent(value: &CellValue) -> Option<f64> {
    let n = match value {
        CellValue::Number(n) => n.is_finite().then_some(*n)?,
        CellValue::Text(s) => {
            let trimmed = s.trim();
            let stripped = trimmed.strip_suffix('%').unwrap_or(trimmed);
            parse_amount_text(stripped)?
        }
        _ => return None,
    };
    Some(if n > 1.0 { n / 100.0 } else { n })
}

// ==========================================
// 枚举代码
// ==========================================
// 查找顺序: 精确匹配 → 按表顺序子串包含 → 表默认值
// 子串匹配按声明顺序，较具体的键需排在前面

const PAYMENT_METHOD_TABLE: &[(&str, &str)] = &[
    ("자동이체", "AUTO_DEBIT"),
    ("CMS", "AUTO_DEBIT"),
    ("계좌이체", "TRANSFER"),
    ("인터넷뱅킹", "TRANSFER"),
    ("이체", "TRANSFER"),
    ("송금", "TRANSFER"),
    ("법인카드", "CORP_CARD"),
    ("체크카드", "CORP_CARD"),
    ("카드", "CORP_CARD"),
    ("현금", "CASH"),
];

const PROJECT_STATUS_TABLE: &[(&str, &str)] = &[
    ("계약전", "CONTRACT_PENDING"),
    ("계약대기", "CONTRACT_PENDING"),
    ("제안", "CONTRACT_PENDING"),
    ("진행중", "IN_PROGRESS"),
    ("수행중", "IN_PROGRESS"),
    ("진행", "IN_PROGRESS"),
    ("완료", "COMPLETED"),
    ("종료", "COMPLETED"),
    ("보류", "ON_HOLD"),
    ("중단", "ON_HOLD"),
    ("취소", "CANCELLED"),
];

const PROJECT_TYPE_TABLE: &[(&str, &str)] = &[
    ("연구개발", "RND"),
    ("R&D", "RND"),
    ("RND", "RND"),
    ("용역", "SERVICE"),
    ("컨설팅", "CONSULTING"),
    ("교육", "EDUCATION"),
    ("자체", "INTERNAL"),
    ("내부", "INTERNAL"),
];

const SETTLEMENT_TYPE_TABLE: &[(&str, &str)] = &[
    ("미정산", "UNSETTLED"),
    ("비정산", "UNSETTLED"),
    ("정산", "SETTLED"),
    ("정액", "FIXED"),
    ("실비", "ACTUAL_COST"),
];

const ACCOUNT_TYPE_TABLE: &[(&str, &str)] = &[
    ("해당없음", "NONE"),
    ("없음", "NONE"),
    ("미개설", "NONE"),
    ("전용계좌", "DEDICATED"),
    ("전용", "DEDICATED"),
    ("일반계좌", "GENERAL"),
    ("일반", "GENERAL"),
    ("공용", "GENERAL"),
];

fn lookup_enum(
    value: &CellValue,
    table: &[(&str, &'static str)],
    default: Option<&'static str>,
) -> Option<&'static str> {
    let text = value.to_text().to_uppercase();
    if text.is_empty() {
        return None;
    }

    if let Some((_, code)) = table.iter().find(|(key, _)| key.to_uppercase() == text) {
        return Some(code);
    }
    if let Some((_, code)) = table
        .iter()
        .find(|(key, _)| text.contains(&key.to_uppercase()))
    {
        return Some(code);
    }
    default
}

/// 결제수단；未命中 → OTHER
pub fn normalize_payment_method(value: &CellValue) -> Option<&'static str> {
    lookup_enum(value, PAYMENT_METHOD_TABLE, Some("OTHER"))
}

/// 진행상태；未命中 → None
pub fn normalize_project_status(value: &CellValue) -> Option<&'static str> {
    lookup_enum(value, PROJECT_STATUS_TABLE, None)
}

/// 사업유형；未命中 → OTHER
pub fn normalize_project_type(value: &CellValue) -> Option<&'static str> {
    lookup_enum(value, PROJECT_TYPE_TABLE, Some("OTHER"))
}

/// 정산구분；无安全默认值 → None
pub fn normalize_settlement_type(value: &CellValue) -> Option<&'static str> {
    lookup_enum(value, SETTLEMENT_TYPE_TABLE, None)
}

/// 계좌구분；未命中 → NONE（无专用账户本身有业务含义）
pub fn normalize_account_type(value: &CellValue) -> Option<&'static str> {
    lookup_enum(value, ACCOUNT_TYPE_TABLE, Some("NONE"))
}

// ==========================================
// 文本
// ==========================================
pub fn normalize_string(value: &CellValue) -> Option<String> {
    let text = value.to_text();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

// ==========================================
// Transform - 按名称选择标准化函数
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Date,
    WeekCode,
    Amount,
    Percent,
    PaymentMethod,
    ProjectStatus,
    ProjectType,
    SettlementType,
    AccountType,
    String,
}

impl Transform {
    pub const ALL: [Transform; 10] = [
        Transform::Date,
        Transform::WeekCode,
        Transform::Amount,
        Transform::Percent,
        Transform::PaymentMethod,
        Transform::ProjectStatus,
        Transform::ProjectType,
        Transform::SettlementType,
        Transform::AccountType,
        Transform::String,
    ];

    /// 接受 normalizeAmount / normalize_amount / amount 等写法
    pub fn from_name(name: &str) -> Option<Self> {
        let key: String = name
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();
        let key = key.strip_prefix("normalize").unwrap_or(&key);
        match key {
            "date" => Some(Transform::Date),
            "weekcode" => Some(Transform::WeekCode),
            "amount" => Some(Transform::Amount),
            "percent" => Some(Transform::Percent),
            "paymentmethod" => Some(Transform::PaymentMethod),
            "projectstatus" => Some(Transform::ProjectStatus),
            "projecttype" => Some(Transform::ProjectType),
            "settlementtype" => Some(Transform::SettlementType),
            "accounttype" => Some(Transform::AccountType),
            "string" => Some(Transform::String),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transform::Date => "normalizeDate",
            Transform::WeekCode => "normalizeWeekCode",
            Transform::Amount => "normalizeAmount",
            Transform::Percent => "normalizePercent",
            Transform::PaymentMethod => "normalizePaymentMethod",
            Transform::ProjectStatus => "normalizeProjectStatus",
            Transform::ProjectType => "normalizeProjectType",
            Transform::SettlementType => "normalizeSettlementType",
            Transform::AccountType => "normalizeAccountType",
            Transform::String => "normalizeString",
        }
    }

    pub fn apply(&self, value: &CellValue) -> Value {
        match self {
            Transform::Date => normalize_date(value).map(Value::String).unwrap_or(Value::Null),
            Transform::WeekCode => normalize_week_code(value)
                .map(Value::String)
                .unwrap_or(Value::Null),
            Transform::Amount => number_value(normalize_amount(value)),
            Transform::Percent => number_value(normalize_percent(value)),
            Transform::PaymentMethod => code_value(normalize_payment_method(value)),
            Transform::ProjectStatus => code_value(normalize_project_status(value)),
            Transform::ProjectType => code_value(normalize_project_type(value)),
            Transform::SettlementType => code_value(normalize_settlement_type(value)),
            Transform::AccountType => code_value(normalize_account_type(value)),
            Transform::String => normalize_string(value)
                .map(Value::String)
                .unwrap_or(Value::Null),
        }
    }
}

fn number_value(n: Option<f64>) -> Value {
    n.and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn code_value(code: Option<&'static str>) -> Value {
    code.map(|c| Value::String(c.to_string()))
        .unwrap_or(Value::Null)
}

/// 按名称应用标准化；名称缺失或未知时透传去空白的原值
pub fn apply_transform(name: Option<&str>, value: &CellValue) -> Value {
    match name.and_then(Transform::from_name) {
        Some(transform) => transform.apply(value),
        None => value.to_json(),
    }
}
