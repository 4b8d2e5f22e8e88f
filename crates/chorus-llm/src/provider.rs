use std::sync::Arc;

use async_trait::async_trait;
use chorus_types::{ChorusError, QueryContext, Result};

use crate::RequestOption;

// ---------------------------------------------------------------------------
// ProviderAdapter
// ---------------------------------------------------------------------------

/// Translates the uniform query contract into one backend's wire protocol.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Perform exactly one remote call and return the extracted text.
    async fn query(
        &self,
        ctx: &QueryContext,
        prompt: &str,
        options: &[RequestOption],
    ) -> Result<String>;

    fn name(&self) -> &str;

    /// Release long-lived client handles. Called once at service teardown.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DynProvider
// ---------------------------------------------------------------------------

/// Shared handle to a boxed adapter; cheap to clone into fan-out tasks.
#[derive(Clone)]
pub struct DynProvider(Arc<dyn ProviderAdapter>);

impl DynProvider {
    pub fn new(provider: impl ProviderAdapter + 'static) -> Self {
        Self(Arc::new(provider))
    }

    pub async fn query(
        &self,
        ctx: &QueryContext,
        prompt: &str,
        options: &[RequestOption],
    ) -> Result<String> {
        self.0.query(ctx, prompt, options).await
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub async fn close(&self) -> Result<()> {
        self.0.close().await
    }
}

impl std::fmt::Debug for DynProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DynProvider").field(&self.name()).finish()
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers shared by the adapters
// ---------------------------------------------------------------------------

/// Send `request` and read the whole body. Non-success statuses are returned
/// to the caller, not mapped here.
pub(crate) async fn send(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<(reqwest::StatusCode, String)> {
    let resp = request
        .send()
        .await
        .map_err(|e| transport_error(provider, e))?;
    let status = resp.status();
    let body = resp.text().await.map_err(|e| transport_error(provider, e))?;
    Ok((status, body))
}

pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> ChorusError {
    if err.is_timeout() {
        ChorusError::Timeout {
            provider: provider.to_string(),
        }
    } else {
        ChorusError::Transport {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    }
}

/// Map a non-success response. Understands `{"error": {"type"|"status", "message"}}`
/// bodies and falls back to the raw body text.
pub(crate) fn backend_error(provider: &str, status: reqwest::StatusCode, body: &str) -> ChorusError {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let error = parsed.as_ref().map(|v| &v["error"]);

    let category = error
        .and_then(|e| e["type"].as_str().or_else(|| e["status"].as_str()))
        .map(String::from);
    let message = error
        .and_then(|e| e["message"].as_str())
        .map(String::from)
        .unwrap_or_else(|| body.to_string());

    ChorusError::Backend {
        provider: provider.to_string(),
        status: status.as_u16(),
        category,
        message,
    }
}

pub(crate) fn parse_json(provider: &str, body: &str) -> Result<serde_json::Value> {
    serde_json::from_str(body).map_err(|e| ChorusError::MalformedResponse {
        provider: provider.to_string(),
        message: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_types::ErrorKind;
    use std::collections::HashMap;

    struct MockProvider;

    #[async_trait]
    impl ProviderAdapter for MockProvider {
        async fn query(
            &self,
            _ctx: &QueryContext,
            prompt: &str,
            _options: &[RequestOption],
        ) -> Result<String> {
            Ok(format!("echo: {prompt}"))
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    #[tokio::test]
    async fn dyn_provider_query() {
        let provider = DynProvider::new(MockProvider);
        let ctx = QueryContext::new();
        let resp = provider.query(&ctx, "hi", &[]).await.unwrap();
        assert_eq!(resp, "echo: hi");
        assert_eq!(provider.name(), "mock");
    }

    #[tokio::test]
    async fn default_close_is_noop() {
        let provider = DynProvider::new(MockProvider);
        provider.close().await.unwrap();
        provider.close().await.unwrap();
    }

    #[tokio::test]
    async fn dyn_provider_in_hashmap() {
        let mut providers: HashMap<String, DynProvider> = HashMap::new();
        providers.insert("mock".into(), DynProvider::new(MockProvider));

        let provider = providers.get("mock").unwrap().clone();
        let resp = provider
            .query(&QueryContext::new(), "x", &[])
            .await
            .unwrap();
        assert_eq!(resp, "echo: x");
    }

    #[test]
    fn backend_error_reads_type_and_message() {
        let err = backend_error(
            "anthropic",
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"type":"error","error":{"type":"invalid_request_error","message":"bad max_tokens"}}"#,
        );
        match err {
            ChorusError::Backend {
                status,
                category,
                message,
                ..
            } => {
                assert_eq!(status, 400);
                assert_eq!(category.as_deref(), Some("invalid_request_error"));
                assert_eq!(message, "bad max_tokens");
            }
            other => panic!("expected Backend, got {other:?}"),
        }
    }

    #[test]
    fn backend_error_reads_google_status() {
        let err = backend_error(
            "google",
            reqwest::StatusCode::FORBIDDEN,
            r#"{"error":{"code":403,"message":"API key not valid","status":"PERMISSION_DENIED"}}"#,
        );
        assert!(matches!(
            err,
            ChorusError::Backend { category: Some(ref c), .. } if c == "PERMISSION_DENIED"
        ));
    }

    #[test]
    fn backend_error_falls_back_to_raw_body() {
        let err = backend_error(
            "deepseek",
            reqwest::StatusCode::BAD_GATEWAY,
            "<html>bad gateway</html>",
        );
        match err {
            ChorusError::Backend {
                category, message, ..
            } => {
                assert!(category.is_none());
                assert_eq!(message, "<html>bad gateway</html>");
            }
            other => panic!("expected Backend, got {other:?}"),
        }
    }

    #[test]
    fn parse_json_failure_is_malformed() {
        let err = parse_json("google", "not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }
}
