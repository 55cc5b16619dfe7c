// ==========================================
// 工作簿 ETL - 推理服务（文本补全）端口
// ==========================================
// 端口: CompletionClient（prompt → 文本）
// 适配器: AnthropicClient（Messages API）
// 重试: 共 retries + 1 次，第 n 次失败后等待 base × n（线性退避）
// ==========================================

pub mod anthropic_client;

pub use anthropic_client::AnthropicClient;

use crate::config::LlmSettings;
use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// 解析失败时附带的响应片段长度（字符）
const EXCERPT_CHARS: usize = 200;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("推理服务未配置: {0}")]
    NotConfigured(String),

    #[error("推理服务请求失败: {0}")]
    Request(String),

    #[error("推理服务返回错误 {status}: {body}")]
    Api { status: u16, body: String },

    #[error("推理服务响应为空")]
    EmptyResponse,

    #[error("响应不是有效 JSON ({message})，响应片段: {excerpt}")]
    InvalidJson { message: String, excerpt: String },
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Request(err.to_string())
    }
}

pub type LlmResult<T> = Result<T, LlmError>;

// ==========================================
// CompletionOptions
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub system: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self::from_settings(&LlmSettings::default())
    }
}

impl CompletionOptions {
    pub fn from_settings(settings: &LlmSettings) -> Self {
        Self {
            system: None,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            retries: settings.retries,
            retry_base_delay: settings.retry_base_delay,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    fn delay_before(&self, next_attempt: u32) -> Duration {
        self.retry_base_delay * next_attempt.saturating_sub(1)
    }
}

// ==========================================
// CompletionClient 端口
// ==========================================
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// 单次调用，不重试
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> LlmResult<String>;

    fn model_name(&self) -> &str;
}

async fn with_retry<T, F, Fut>(options: &CompletionOptions, mut call: F) -> LlmResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LlmResult<T>>,
{
    let attempts = options.retries + 1;
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                attempt += 1;
                let delay = options.delay_before(attempt);
                warn!(
                    attempt = attempt - 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "推理服务调用失败，准备重试"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// 带重试的文本补全
pub async fn complete_with_retry(
    client: &dyn CompletionClient,
    prompt: &str,
    options: &CompletionOptions,
) -> LlmResult<String> {
    with_retry(options, || client.complete(prompt, options)).await
}

/// 带重试的 JSON 补全（解析失败同样计为一次失败）
pub async fn complete_json<T: DeserializeOwned>(
    client: &dyn CompletionClient,
    prompt: &str,
    options: &CompletionOptions,
) -> LlmResult<T> {
    with_retry(options, || async {
        let text = client.complete(prompt, options).await?;
        parse_json_response(&text)
    })
    .await
}

fn fenced_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[a-zA-Z]*\s*\n?(.*?)```").expect("代码块正则"))
}

/// 取第一个 ``` 代码块内容；没有代码块时取原文
pub fn extract_json_block(text: &str) -> &str {
    match fenced_block_re().captures(text).and_then(|c| c.get(1)) {
        Some(m) => m.as_str().trim(),
        None => text.trim(),
    }
}

pub fn parse_json_response<T: DeserializeOwned>(text: &str) -> LlmResult<T> {
    serde_json::from_str(extract_json_block(text)).map_err(|e| LlmError::InvalidJson {
        message: e.to_string(),
        excerpt: text.chars().take(EXCERPT_CHARS).collect(),
    })
}
