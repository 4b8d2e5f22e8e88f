use async_trait::async_trait;
use serde_json::json;

use crate::provider::{backend_error, parse_json, send};
use crate::{ProviderAdapter, RequestOption, RequestOptions, PARAM_SYSTEM, PARAM_TOP_P};
use chorus_types::{ChorusError, QueryContext, Result};

const PROVIDER: &str = "anthropic";
const DEFAULT_MAX_TOKENS: u32 = 1000;
const DEFAULT_TEMPERATURE: f64 = 0.7;
const API_VERSION: &str = "2023-06-01";

// ---------------------------------------------------------------------------
// AnthropicAdapter
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AnthropicAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".to_string(),
        }
    }

    /// Use a shared transport instead of a private one.
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
// Request translation (options → Messages API JSON)
// ---------------------------------------------------------------------------

fn build_request_body(prompt: &str, model: &str, opts: &RequestOptions) -> serde_json::Value {
    let mut body = json!({
        "model": model,
        "max_tokens": opts.max_tokens,
        "messages": [{ "role": "user", "content": prompt }],
        "temperature": opts.temperature,
    });

    if let Some(system) = opts.param_str(PARAM_SYSTEM) {
        body["system"] = json!(system);
    }

    if let Some(top_p) = opts.param_f64(PARAM_TOP_P) {
        body["top_p"] = json!(top_p);
    }

    body
}

// ---------------------------------------------------------------------------
// Response translation
// ---------------------------------------------------------------------------

fn parse_response(body: &serde_json::Value) -> Result<String> {
    let blocks = body["content"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    if blocks.is_empty() {
        return Err(ChorusError::EmptyResponse {
            provider: PROVIDER.into(),
        });
    }

    blocks
        .iter()
        .find(|block| block["type"] == "text")
        .and_then(|block| block["text"].as_str())
        .map(String::from)
        .ok_or_else(|| ChorusError::MalformedResponse {
            provider: PROVIDER.into(),
            message: "no text content in response".into(),
        })
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
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
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
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
