use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::provider::Generator;
use super::types::ChatRequest;
use crate::core::config::{LlmBackend, LlmSettings};
use crate::rag::error::{RagError, Result};

/// Chat completions against any OpenAI-compatible endpoint
/// (OpenAI, Groq, LM Studio, llama.cpp server, ...).
#[derive(Clone)]
pub struct OpenAiCompatibleGenerator {
    backend: LlmBackend,
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiCompatibleGenerator {
    pub fn new(
        backend: LlmBackend,
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for LLM backend")?;
        Ok(Self {
            backend,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body(&self, request: &ChatRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages,
            "stream": false,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.temperature { obj.insert("temperature".to_string(), json!(t)); }
            if let Some(t) = request.max_tokens { obj.insert("max_tokens".to_string(), json!(t)); }
        }
        body
    }
}

#[async_trait]
impl Generator for OpenAiCompatibleGenerator {
    fn name(&self) -> &str {
        match self.backend {
            LlmBackend::Openai => "openai",
            LlmBackend::Groq => "groq",
            LlmBackend::Lmstudio => "lmstudio",
            LlmBackend::OpenaiCompatible => "openai_compatible",
        }
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: ChatRequest) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.request_body(&request);

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let res = req
            .send()
            .await
            .map_err(|e| RagError::Generation(format!("{} request failed: {}", self.name(), e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(RagError::Generation(format!(
                "{} chat error ({}): {}",
                self.name(),
                status,
                text
            )));
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|e| RagError::Generation(format!("invalid response body: {}", e)))?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| RagError::Generation("response has no message content".to_string()))?;

        Ok(content.to_string())
    }
}

/// Resolves the configured LLM backend once at startup.
pub fn build_generator(settings: &LlmSettings) -> anyhow::Result<Arc<dyn Generator>> {
    let api_key = settings
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty());
    if settings.backend.requires_api_key() && api_key.is_none() {
        anyhow::bail!(
            "llm.api_key is required for the {} backend (or set RAGDESK_LLM_API_KEY)",
            settings.backend
        );
    }

    let base_url = settings
        .base_url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| settings.backend.default_base_url());

    let generator = OpenAiCompatibleGenerator::new(
        settings.backend,
        base_url,
        settings.model.clone(),
        api_key,
        Duration::from_secs(settings.timeout_secs),
    )?;

    tracing::info!(
        "LLM backend: {} (model={}, base_url={})",
        settings.backend,
        settings.model,
        generator.base_url()
    );
    Ok(Arc::new(generator))
}
