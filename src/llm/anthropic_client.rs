// ==========================================
// 工作簿 ETL - Anthropic Messages API 适配器
// ==========================================

use crate::config::LlmSettings;
use crate::llm::{CompletionClient, CompletionOptions, LlmError, LlmResult};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct AnthropicClient {
    api_key: String,
    client: reqwest::Client,
    model: String,
    endpoint: String,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client: reqwest::Client::new(),
            model: model.into(),
            endpoint: MESSAGES_URL.to_string(),
        }
    }

    /// 由配置构建；未设置 API key 时返回 NotConfigured
    pub fn from_settings(settings: &LlmSettings) -> LlmResult<Self> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| LlmError::NotConfigured("ANTHROPIC_API_KEY 未设置".to_string()))?;
        Ok(Self::new(api_key, settings.model.clone()))
    }

    /// 替换接口地址（代理/网关）
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request_body(&self, prompt: &str, options: &CompletionOptions) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": &self.model,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "messages": [{"role": "user", "content": prompt}]
        });
        if let Some(system) = &options.system {
            body["system"] = serde_json::Value::String(system.clone());
        }
        body
    }
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> LlmResult<String> {
        debug!(model = %self.model, prompt_chars = prompt.chars().count(), "调用推理服务");

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&self.request_body(prompt, options))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }

        let api_response: ApiResponse = response.json().await?;
        api_response
            .content
            .into_iter()
            .find_map(|c| c.text)
            .filter(|t| !t.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
