use async_trait::async_trait;
use serde_json::json;
use tokio::sync::RwLock;

use crate::provider::{backend_error, parse_json, send};
use crate::{ProviderAdapter, RequestOption, RequestOptions, PARAM_SYSTEM, PARAM_TOP_K, PARAM_TOP_P};
use chorus_types::{ChorusError, QueryContext, Result};

const PROVIDER: &str = "google";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TEMPERATURE: f64 = 0.7;

// ---------------------------------------------------------------------------
// GoogleAdapter
// ---------------------------------------------------------------------------

/// Adapter for the Gemini `generateContent` API.
///
/// Unlike the other adapters this one holds a client handle that must be
/// released with [`ProviderAdapter::close`]; queries after close fail with a
/// transport error.
#[derive(Debug)]
pub struct GoogleAdapter {
    client: RwLock<Option<reqwest::Client>>,
    api_key: String,
    base_url: String,
}

impl GoogleAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: RwLock::new(Some(reqwest::Client::new())),
            api_key: api_key.into(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = RwLock::new(Some(client));
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn client(&self) -> Result<reqwest::Client> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| ChorusError::Transport {
                provider: PROVIDER.into(),
                message: "client closed".into(),
            })
    }
}

// ---------------------------------------------------------------------------
// Request translation (options → Gemini JSON)
// ---------------------------------------------------------------------------

fn build_request_body(prompt: &str, opts: &RequestOptions) -> serde_json::Value {
    let mut generation_config = json!({
        "maxOutputTokens": opts.max_tokens,
        "temperature": opts.temperature,
    });
    if let Some(top_p) = opts.param_f64(PARAM_TOP_P) {
        generation_config["topP"] = json!(top_p);
    }
    if let Some(top_k) = opts.param_i64(PARAM_TOP_K) {
        generation_config["topK"] = json!(top_k);
    }

    let mut body = json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": generation_config,
    });

    if let Some(system) = opts.param_str(PARAM_SYSTEM) {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }

    body
}

// ---------------------------------------------------------------------------
// Response translation
// ---------------------------------------------------------------------------

fn parse_response(body: &serde_json::Value) -> Result<String> {
    let parts = body["candidates"]
        .as_array()
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate["content"]["parts"].as_array())
        .filter(|parts| !parts.is_empty())
        .ok_or_else(|| ChorusError::EmptyResponse {
            provider: PROVIDER.into(),
        })?;

    parts[0]["text"]
        .as_str()
        .map(String::from)
        .ok_or_else(|| ChorusError::MalformedResponse {
            provider: PROVIDER.into(),
            message: "first part has no text".into(),
        })
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    async fn query(
        &self,
        ctx: &QueryContext,
        prompt: &str,
        options: &[RequestOption],
    ) -> Result<String> {
        let opts = RequestOptions::with_defaults(DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE)
            .apply(options);
        let model = opts.require_model(PROVIDER)?;
        let client = self.client().await?;
        let body = build_request_body(prompt, &opts);

        tracing::debug!(
            provider = PROVIDER,
            model,
            remaining_ms = ?ctx.remaining().map(|left| left.as_millis()),
            "Sending request"
        );

        let request = client
            .post(format!("{}/models/{}:generateContent", self.base_url, model))
            .query(&[("key", self.api_key.as_str())])
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

    async fn close(&self) -> Result<()> {
        if self.client.write().await.take().is_some() {
            tracing::debug!(provider = PROVIDER, "Client closed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{with_model, with_param, with_system, with_top_p};
    use chorus_types::ErrorKind;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolve(options: &[RequestOption]) -> RequestOptions {
        RequestOptions::with_defaults(DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE).apply(options)
    }

    #[test]
    fn build_request_body_defaults() {
        let body = build_request_body("Hello", &resolve(&[with_model("gemini-2.0-flash")]));

        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Hello");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
        assert_eq!(body["generationConfig"]["temperature"], 0.7);
        assert!(body.get("systemInstruction").is_none());
        assert!(body["generationConfig"].get("topK").is_none());
    }

    #[test]
    fn build_request_body_maps_sampling_and_system() {
        let opts = resolve(&[
            with_model("gemini-2.0-flash"),
            with_system("Be concise."),
            with_top_p(0.8),
            with_param("top_k", 40i64),
        ]);
        let body = build_request_body("Hi", &opts);

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be concise.");
        assert_eq!(body["generationConfig"]["topP"], 0.8);
        assert_eq!(body["generationConfig"]["topK"], 40);
    }

    #[test]
    fn build_request_body_ignores_float_top_k() {
        let opts = resolve(&[with_model("m"), with_param("top_k", 4.5)]);
        let body = build_request_body("Hi", &opts);
        assert!(body["generationConfig"].get("topK").is_none());
    }

    #[test]
    fn parse_response_first_candidate_first_part() {
        let body = json!({
            "candidates": [
                {"content": {"role": "model", "parts": [{"text": "one"}, {"text": "two"}]}},
                {"content": {"role": "model", "parts": [{"text": "other"}]}}
            ]
        });
        assert_eq!(parse_response(&body).unwrap(), "one");
    }

    #[test]
    fn parse_response_empty_shapes() {
        for body in [
            json!({}),
            json!({"candidates": []}),
            json!({"candidates": [{"content": {"parts": []}}]}),
            json!({"candidates": [{"finishReason": "SAFETY"}]}),
        ] {
            let err = parse_response(&body).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::EmptyResponse, "body: {body}");
        }
    }

    #[tokio::test]
    async fn query_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.0-flash:generateContent"))
            .and(query_param("key", "g-key"))
            .and(body_partial_json(json!({"generationConfig": {"maxOutputTokens": 1024}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "Mock Google response"}]}}]
            })))
            .mount(&server)
            .await;

        let adapter = GoogleAdapter::new("g-key").with_base_url(server.uri());
        let resp = adapter
            .query(&QueryContext::new(), "Test prompt", &[with_model("gemini-2.0-flash")])
            .await
            .unwrap();
        assert_eq!(resp, "Mock Google response");
    }

    #[tokio::test]
    async fn backend_error_uses_status_category() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT"}
            })))
            .mount(&server)
            .await;

        let adapter = GoogleAdapter::new("bad").with_base_url(server.uri());
        let err = adapter
            .query(&QueryContext::new(), "hi", &[with_model("gemini-2.0-flash")])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "google API error (INVALID_ARGUMENT): API key not valid"
        );
    }

    #[tokio::test]
    async fn query_after_close_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "ok"}]}}]
            })))
            .expect(0)
            .mount(&server)
            .await;

        let adapter = GoogleAdapter::new("k").with_base_url(server.uri());
        adapter.close().await.unwrap();
        // Second close is a no-op
        adapter.close().await.unwrap();

        let err = adapter
            .query(&QueryContext::new(), "hi", &[with_model("gemini-2.0-flash")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.to_string().contains("client closed"));
    }

    #[tokio::test]
    async fn with_client_chains_with_base_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.0-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "shared client"}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let adapter = GoogleAdapter::new("k")
            .with_client(http)
            .with_base_url(server.uri());
        let resp = adapter
            .query(&QueryContext::new(), "hi", &[with_model("gemini-2.0-flash")])
            .await
            .unwrap();
        assert_eq!(resp, "shared client");
    }

    #[tokio::test]
    async fn missing_model_is_checked_before_close_state() {
        let adapter = GoogleAdapter::new("k");
        adapter.close().await.unwrap();
        let err = adapter
            .query(&QueryContext::new(), "hi", &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingModel);
    }
}
