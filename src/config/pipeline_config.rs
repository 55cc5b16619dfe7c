// ==========================================
// 工作簿 ETL - 管道配置
// ==========================================
// 职责: 配置加载（环境变量 + 默认值）
// 红线: 不读取 .env 文件，不解析命令行
// ==========================================

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// 配置错误
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("配置缺失 (key: {key}): {message}")]
    Missing { key: String, message: String },

    #[error("配置值格式错误 (key: {key}, value: {value}): {message}")]
    InvalidValue {
        key: String,
        value: String,
        message: String,
    },
}

// ==========================================
// 配置键
// ==========================================
pub mod config_keys {
    // 输出与存储
    pub const OUTPUT_DIR: &str = "WORKBOOK_ETL_OUTPUT_DIR";
    pub const STORE_PATH: &str = "WORKBOOK_ETL_STORE_PATH";

    // 批量与采样
    pub const LOAD_BATCH_SIZE: &str = "WORKBOOK_ETL_LOAD_BATCH_SIZE";
    pub const VALIDATION_SAMPLE: &str = "WORKBOOK_ETL_VALIDATION_SAMPLE";
    pub const MAPPING_SAMPLE_ROWS: &str = "WORKBOOK_ETL_MAPPING_SAMPLE_ROWS";

    // 推理服务
    pub const LLM_API_KEY: &str = "ANTHROPIC_API_KEY";
    pub const LLM_MODEL: &str = "ANTHROPIC_MODEL";
    pub const LLM_MAX_TOKENS: &str = "WORKBOOK_ETL_LLM_MAX_TOKENS";
    pub const LLM_TEMPERATURE: &str = "WORKBOOK_ETL_LLM_TEMPERATURE";
    pub const LLM_RETRIES: &str = "WORKBOOK_ETL_LLM_RETRIES";
    pub const LLM_RETRY_DELAY_MS: &str = "WORKBOOK_ETL_LLM_RETRY_DELAY_MS";

    // 运行参数（由入口程序读取）
    pub const COMMIT: &str = "WORKBOOK_ETL_COMMIT";
    pub const USE_LLM: &str = "WORKBOOK_ETL_USE_LLM";
    pub const ORG_ID: &str = "WORKBOOK_ETL_ORG_ID";
    pub const STEPS: &str = "WORKBOOK_ETL_STEPS";
    pub const ALLOW_SHEET_ERRORS: &str = "WORKBOOK_ETL_ALLOW_SHEET_ERRORS";
    pub const LOG_FORMAT: &str = "WORKBOOK_ETL_LOG_FORMAT"; // "json" 时输出 JSON 行
}

// ===== 默认值 =====
pub const DEFAULT_OUTPUT_DIR: &str = "etl-output";
pub const DEFAULT_LOAD_BATCH_SIZE: usize = 500;
pub const DEFAULT_VALIDATION_SAMPLE: usize = 20;
pub const DEFAULT_MAPPING_SAMPLE_ROWS: usize = 5;
pub const DEFAULT_LLM_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_LLM_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_LLM_TEMPERATURE: f32 = 0.0;
pub const DEFAULT_LLM_RETRIES: u32 = 2;
pub const DEFAULT_LLM_RETRY_DELAY_MS: u64 = 1_000;

// ==========================================
// LlmSettings - 推理服务参数
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct LlmSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub retries: u32,
    pub retry_base_delay: Duration, // 第 n 次重试前等待 base × n
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_LLM_MODEL.to_string(),
            max_tokens: DEFAULT_LLM_MAX_TOKENS,
            temperature: DEFAULT_LLM_TEMPERATURE,
            retries: DEFAULT_LLM_RETRIES,
            retry_base_delay: Duration::from_millis(DEFAULT_LLM_RETRY_DELAY_MS),
        }
    }
}

// ==========================================
// PipelineConfig
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    pub store_path: Option<PathBuf>,
    pub load_batch_size: usize,
    pub validation_sample_size: usize,
    pub mapping_sample_rows: usize,
    pub llm: LlmSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            store_path: None,
            load_batch_size: DEFAULT_LOAD_BATCH_SIZE,
            validation_sample_size: DEFAULT_VALIDATION_SAMPLE,
            mapping_sample_rows: DEFAULT_MAPPING_SAMPLE_ROWS,
            llm: LlmSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// 从进程环境变量加载
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意 key → value 来源加载（未设置的键取默认值）
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            output_dir: get(config_keys::OUTPUT_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            store_path: get(config_keys::STORE_PATH).map(PathBuf::from),
            load_batch_size: parse_or(
                config_keys::LOAD_BATCH_SIZE,
                get(config_keys::LOAD_BATCH_SIZE),
                defaults.load_batch_size,
            )?,
            validation_sample_size: parse_or(
                config_keys::VALIDATION_SAMPLE,
                get(config_keys::VALIDATION_SAMPLE),
                defaults.validation_sample_size,
            )?,
            mapping_sample_rows: parse_or(
                config_keys::MAPPING_SAMPLE_ROWS,
                get(config_keys::MAPPING_SAMPLE_ROWS),
                defaults.mapping_sample_rows,
            )?,
            llm: LlmSettings {
                api_key: get(config_keys::LLM_API_KEY),
                model: get(config_keys::LLM_MODEL).unwrap_or(defaults.llm.model),
                max_tokens: parse_or(
                    config_keys::LLM_MAX_TOKENS,
                    get(config_keys::LLM_MAX_TOKENS),
                    defaults.llm.max_tokens,
                )?,
                temperature: parse_or(
                    config_keys::LLM_TEMPERATURE,
                    get(config_keys::LLM_TEMPERATURE),
                    defaults.llm.temperature,
                )?,
                retries: parse_or(
                    config_keys::LLM_RETRIES,
                    get(config_keys::LLM_RETRIES),
                    defaults.llm.retries,
                )?,
                retry_base_delay: Duration::from_millis(parse_or(
                    config_keys::LLM_RETRY_DELAY_MS,
                    get(config_keys::LLM_RETRY_DELAY_MS),
                    DEFAULT_LLM_RETRY_DELAY_MS,
                )?),
            },
        }
        .validated()?)
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.load_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: config_keys::LOAD_BATCH_SIZE.to_string(),
                value: "0".to_string(),
                message: "批量大小必须大于 0".to_string(),
            });
        }
        Ok(self)
    }

    /// 提交模式必需：文档库路径
    pub fn require_store_path(&self) -> Result<&PathBuf, ConfigError> {
        self.store_path.as_ref().ok_or_else(|| ConfigError::Missing {
            key: config_keys::STORE_PATH.to_string(),
            message: "commit 模式需要配置文档库".to_string(),
        })
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.clone(),
                message: e.to_string(),
            }),
    }
}

/// 布尔开关解析（1/true/yes/y/on）
pub fn is_true(v: &str) -> bool {
    matches!(
        v.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// 步骤列表解析: "1,2,3" 或 "1-3"
pub fn parse_steps(raw: &str) -> Result<Vec<u8>, ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidValue {
        key: config_keys::STEPS.to_string(),
        value: raw.to_string(),
        message: message.to_string(),
    };

    let mut steps = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some((from, to)) = part.split_once('-') {
            let from: u8 = from.trim().parse().map_err(|_| invalid("步骤必须是 1-5"))?;
            let to: u8 = to.trim().parse().map_err(|_| invalid("步骤必须是 1-5"))?;
            if from > to {
                return Err(invalid("步骤区间起点大于终点"));
            }
            steps.extend(from..=to);
        } else {
            steps.push(part.parse().map_err(|_| invalid("步骤必须是 1-5"))?);
        }
    }

    if steps.iter().any(|s| !(1..=5).contains(s)) {
        return Err(invalid("步骤必须是 1-5"));
    }
    steps.sort_unstable();
    steps.dedup();
    Ok(steps)
}
