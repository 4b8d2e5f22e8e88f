use async_trait::async_trait;
use serde_json::json;

use crate::provider::{backend_error, parse_json, send};
use crate::{ProviderAdapter, RequestOption, RequestOptions, PARAM_SYSTEM, PARAM_TOP_P};
use chorus_types::{ChorusError, QueryContext, Result};

const PROVIDER: &str = "deepseek";
const DEFAULT_MAX_TOKENS: u32 = 1000;
const DEFAULT_TEMPERATURE: f64 = 0.7;

// ---------------------------------------------------------------------------
// DeepSeekAdapter
// ---------------------------------------------------------------------------

/// Adapter for DeepSeek's OpenAI-compatible Chat Completions endpoint.
#[derive(Debug)]
pub struct DeepSeekAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl DeepSeekAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.deepseek.com".to_string(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Request translation
// ---------------------------------------------------------------------------

fn build_request_body(prompt: &str, model: &str, opts: &RequestOptions) -> serde_json::Value {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = opts.param_str(PARAM_SYSTEM) {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": prompt }));

    let mut body = json!({
        "model": model,
        "messages": messages,
        "max_tokens": opts.max_tokens,
        "temperature": opts.temperature,
        "stream": false,
    });
    if let Some(top_p) = opts.param_f64(PARAM_TOP_P) {
        body["top_p"] = json!(top_p);
    }
    body
}

// ---------------------------------------------------------------------------
// Response translation
// ---------------------------------------------------------------------------

fn parse_response(body: &serde_json::Value) -> Result<String> {
    let choice = body["choices"]
        .as_array()
        .and_then(|choices| choices.first())
        .ok_or_else(|| ChorusError::EmptyResponse {
            provider: PROVIDER.into(),
        })?;

    choice["message"]["content"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| ChorusError::MalformedResponse {
            provider: PROVIDER.into(),
            message: "choice has no message content".into(),
        })
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for DeepSeekAdapter {
    async fn query(
        &self,
        ctx: &QueryContext,
        prompt: &str,
        options: &[RequestOption],
    ) -> Result<String> {
        let opts = RequestOptions::with_defaults(DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE)
            .apply(options);
        let model = opts.require_model(PROVIDER)?;
        let body = build_request_body(prompt, model, &opts);

        tracing::debug!(
            provider = PROVIDER,
            model,
            remaining_ms = ?ctx.remaining().map(|left| left.as_millis()),
            "Sending request"
        );

        let request = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body);

        let (status, response_body) = ctx.run(PROVIDER, send(PROVIDER, request)).await?;

        if !status.is_success() {
            return Err(backend_error(PROVIDER, status, &response_body));
        }

        parse_response(&parse_json(PROVIDER, &response_body)?)
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
