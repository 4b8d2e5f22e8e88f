use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chorus_history::HistoryStore;
use chorus_types::{ChorusError, QueryContext, Result};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::task::TaskTracker;

use crate::{
    with_model, AnthropicAdapter, DeepSeekAdapter, DynProvider, GoogleAdapter, ModelRegistry,
    ProviderAdapter, ProviderResponse, RequestOption,
};

/// Temperature recorded in history when the caller never set one.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Receives history-write failures. They never reach the query's caller.
pub type ErrorSink = Arc<dyn Fn(&ChorusError) + Send + Sync>;

// ---------------------------------------------------------------------------
// LlmService
// ---------------------------------------------------------------------------

/// Routes single queries to the adapter serving a model, and fans prompts out
/// to every configured adapter concurrently.
pub struct LlmService {
    providers: HashMap<String, DynProvider>,
    registry: Arc<ModelRegistry>,
    history: Option<HistoryStore>,
    error_sink: ErrorSink,
    pending_writes: TaskTracker,
}

impl LlmService {
    /// Build adapters for every provider with a non-empty credential. All
    /// adapters share `http`.
    pub fn new(api_keys: &HashMap<String, String>, http: reqwest::Client) -> Self {
        let mut service = Self::empty();

        for (provider, key) in api_keys {
            if key.is_empty() {
                continue;
            }
            match provider.as_str() {
                "anthropic" => {
                    service.register_provider(AnthropicAdapter::new(key).with_client(http.clone()))
                }
                "deepseek" => {
                    service.register_provider(DeepSeekAdapter::new(key).with_client(http.clone()))
                }
                "google" => {
                    service.register_provider(GoogleAdapter::new(key).with_client(http.clone()))
                }
                other => tracing::debug!(provider = other, "No adapter for provider, skipping"),
            }
        }

        service
    }

    /// A service with no adapters, the builtin registry and no history.
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
            registry: Arc::new(ModelRegistry::builtin()),
            history: None,
            error_sink: Arc::new(|err: &ChorusError| {
                tracing::warn!(error = %err, "Query history write failed");
            }),
            pending_writes: TaskTracker::new(),
        }
    }

    /// Register an adapter under its own `name()`, replacing any previous one.
    pub fn register_provider(&mut self, provider: impl ProviderAdapter + 'static) {
        let name = provider.name().to_string();
        self.providers.insert(name, DynProvider::new(provider));
    }

    pub fn with_registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_history(mut self, history: HistoryStore) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_error_sink(mut self, sink: impl Fn(&ChorusError) + Send + Sync + 'static) -> Self {
        self.error_sink = Arc::new(sink);
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn history(&self) -> Option<&HistoryStore> {
        self.history.as_ref()
    }

    /// Names of the providers with an adapter, sorted.
    pub fn configured_providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    // -----------------------------------------------------------------------
    // Single-model query
    // -----------------------------------------------------------------------

    /// Query the adapter serving `model` and measure the call.
    ///
    /// On success the exchange is appended to the history store (if any) in
    /// a detached task; the write is never awaited here.
    pub async fn query_with_timing(
        &self,
        ctx: &QueryContext,
        prompt: &str,
        model: &str,
        options: &[RequestOption],
    ) -> Result<(String, Duration)> {
        let provider_name = self
            .registry
            .provider_for_model(model)
            .ok_or_else(|| ChorusError::UnknownModel(model.to_string()))?;
        let provider = self
            .providers
            .get(provider_name)
            .ok_or_else(|| ChorusError::ProviderNotConfigured(provider_name.to_string()))?;

        let options = routed_options(model, options);
        let temperature = effective_temperature(&options);

        let started = Instant::now();
        let result = ctx
            .run(provider_name, provider.query(ctx, prompt, &options))
            .await;
        let elapsed = started.elapsed();

        match result {
            Ok(response) => {
                tracing::info!(
                    provider = provider_name,
                    model,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Query completed"
                );
                if let Some(history) = &self.history {
                    self.spawn_history_write(history.clone(), prompt, model, &response, elapsed, temperature);
                }
                Ok((response, elapsed))
            }
            Err(err) => {
                tracing::debug!(
                    provider = provider_name,
                    model,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %err,
                    "Query failed"
                );
                Err(err)
            }
        }
    }

    /// [`query_with_timing`](Self::query_with_timing) without the duration.
    pub async fn query(
        &self,
        ctx: &QueryContext,
        prompt: &str,
        model: &str,
        options: &[RequestOption],
    ) -> Result<String> {
        self.query_with_timing(ctx, prompt, model, options)
            .await
            .map(|(response, _)| response)
    }

    fn spawn_history_write(
        &self,
        history: HistoryStore,
        prompt: &str,
        model: &str,
        response: &str,
        elapsed: Duration,
        temperature: f64,
    ) {
        let sink = Arc::clone(&self.error_sink);
        let prompt = prompt.to_string();
        let model = model.to_string();
        let response = response.to_string();

        // Detached: outlives the query's context. Only shutdown waits for it.
        self.pending_writes.spawn(async move {
            if let Err(err) = history
                .log_query(&prompt, &model, &response, elapsed, temperature)
                .await
            {
                sink(&err);
            }
        });
    }

    // -----------------------------------------------------------------------
    // Fan-out
    // -----------------------------------------------------------------------

    /// Send `prompt` to every configured provider's default model at once.
    ///
    /// Returns once every call has finished, with exactly one entry per
    /// configured provider. Failures are reported in the entries, never as a
    /// call-level error. Results are not written to history.
    pub async fn query_all(
        &self,
        ctx: &QueryContext,
        prompt: &str,
        options: &[RequestOption],
    ) -> HashMap<String, ProviderResponse> {
        let results = Arc::new(Mutex::new(HashMap::with_capacity(self.providers.len())));
        let mut tasks = JoinSet::new();

        for (name, provider) in &self.providers {
            let name = name.clone();
            let provider = provider.clone();
            let registry = Arc::clone(&self.registry);
            let ctx = ctx.clone();
            let prompt = prompt.to_string();
            let options = options.to_vec();
            let results = Arc::clone(&results);

            tasks.spawn(async move {
                let response =
                    query_provider(&name, &provider, &registry, &ctx, &prompt, &options).await;
                results.lock().await.insert(name, response);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "Fan-out task did not complete");
            }
        }

        let mut results = std::mem::take(&mut *results.lock().await);

        // A task that panicked left no entry behind.
        for name in self.providers.keys() {
            if !results.contains_key(name) {
                let err = ChorusError::Other(format!("query task for {name} did not complete"));
                results.insert(name.clone(), ProviderResponse::failed(name, None, err));
            }
        }

        results
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Release every adapter's client handle, wait for in-flight history
    /// writes, then close the history store.
    pub async fn shutdown(&self) {
        for (name, provider) in &self.providers {
            if let Err(err) = provider.close().await {
                tracing::warn!(provider = %name, error = %err, "Failed to close provider");
            }
        }
        self.pending_writes.close();
        self.pending_writes.wait().await;
        if let Some(history) = &self.history {
            history.close().await;
        }
    }
}

impl std::fmt::Debug for LlmService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmService")
            .field("providers", &self.configured_providers())
            .field("history", &self.history.as_ref().map(HistoryStore::path))
            .finish_non_exhaustive()
    }
}

/// One fan-out task: pick the provider's default model and time the call.
async fn query_provider(
    name: &str,
    provider: &DynProvider,
    registry: &ModelRegistry,
    ctx: &QueryContext,
    prompt: &str,
    options: &[RequestOption],
) -> ProviderResponse {
    let model = match registry.default_model_for_provider(name) {
        Ok(model) => model.to_string(),
        Err(err) => return ProviderResponse::failed(name, None, err),
    };

    let options = routed_options(&model, options);
    let started = Instant::now();
    let result = ctx.run(name, provider.query(ctx, prompt, &options)).await;
    let elapsed = started.elapsed();

    tracing::debug!(
        provider = name,
        model = %model,
        elapsed_ms = elapsed.as_millis() as u64,
        ok = result.is_ok(),
        "Fan-out call finished"
    );

    match result {
        Ok(response) => ProviderResponse {
            provider: name.to_string(),
            model: Some(model),
            response,
            error: None,
            elapsed,
        },
        Err(err) => ProviderResponse {
            provider: name.to_string(),
            model: Some(model),
            response: String::new(),
            error: Some(err),
            elapsed,
        },
    }
}

/// The routing model goes first so caller options apply on top of it.
fn routed_options(model: &str, options: &[RequestOption]) -> Vec<RequestOption> {
    let mut routed = Vec::with_capacity(options.len() + 1);
    routed.push(with_model(model));
    routed.extend_from_slice(options);
    routed
}

/// The last explicit temperature, including 0.0; the default otherwise.
fn effective_temperature(options: &[RequestOption]) -> f64 {
    options
        .iter()
        .rev()
        .find_map(|option| match option {
            RequestOption::Temperature(t) => Some(*t),
            _ => None,
        })
        .unwrap_or(DEFAULT_TEMPERATURE)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{with_max_tokens, with_system, with_temperature};
    use async_trait::async_trait;
    use chorus_types::ErrorKind;

    struct Echo(&'static str);

    #[async_trait]
    impl ProviderAdapter for Echo {
        async fn query(
            &self,
            _ctx: &QueryContext,
            prompt: &str,
            options: &[RequestOption],
        ) -> Result<String> {
            let opts = crate::RequestOptions::default().apply(options);
            Ok(format!("{}:{}", opts.require_model(self.0)?, prompt))
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    fn registry() -> ModelRegistry {
        ModelRegistry::new(vec![("a", vec!["m1", "m1b"]), ("b", vec!["m2"])]).unwrap()
    }

    #[test]
    fn temperature_defaults_when_unset() {
        assert_eq!(effective_temperature(&[]), DEFAULT_TEMPERATURE);
        assert_eq!(
            effective_temperature(&[with_model("m"), with_max_tokens(10)]),
            DEFAULT_TEMPERATURE
        );
    }

    #[test]
    fn explicit_zero_temperature_is_kept() {
        assert_eq!(effective_temperature(&[with_temperature(0.0)]), 0.0);
        assert_eq!(
            effective_temperature(&[with_temperature(0.3), with_temperature(1.2)]),
            1.2
        );
    }

    #[test]
    fn routing_model_precedes_caller_options() {
        let routed = routed_options("m1", &[with_system("s"), with_temperature(0.1)]);
        assert_eq!(routed.len(), 3);
        assert_eq!(routed[0], with_model("m1"));
        assert_eq!(routed[1], with_system("s"));
    }

    #[test]
    fn new_builds_adapters_for_non_empty_known_keys() {
        let keys = HashMap::from([
            ("anthropic".to_string(), "sk-ant".to_string()),
            ("deepseek".to_string(), String::new()),
            ("google".to_string(), "g-key".to_string()),
            ("openai".to_string(), "sk-oai".to_string()),
        ]);
        let service = LlmService::new(&keys, reqwest::Client::new());
        assert_eq!(service.configured_providers(), vec!["anthropic", "google"]);
        assert!(service.history().is_none());
    }

    #[tokio::test]
    async fn unknown_model_is_rejected_before_routing() {
        let mut service = LlmService::empty().with_registry(registry());
        service.register_provider(Echo("a"));

        let err = service
            .query_with_timing(&QueryContext::new(), "hi", "nope", &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownModel);
        assert_eq!(err.stage(), "model validation");
    }

    #[tokio::test]
    async fn known_model_without_adapter_is_not_configured() {
        let mut service = LlmService::empty().with_registry(registry());
        service.register_provider(Echo("a"));

        let err = service
            .query(&QueryContext::new(), "hi", "m2", &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderNotConfigured);
        assert_eq!(err.to_string(), "provider b not configured");
    }

    #[tokio::test]
    async fn query_routes_requested_model() {
        let mut service = LlmService::empty().with_registry(registry());
        service.register_provider(Echo("a"));

        // A non-default model of the provider is passed through as requested.
        let (resp, elapsed) = service
            .query_with_timing(&QueryContext::new(), "hi", "m1b", &[])
            .await
            .unwrap();
        assert_eq!(resp, "m1b:hi");
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn canceled_context_fails_single_query() {
        let mut service = LlmService::empty().with_registry(registry());
        service.register_provider(Echo("a"));
        let ctx = QueryContext::new();
        ctx.cancel();

        let err = service.query(&ctx, "hi", "m1", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Canceled);
    }

    #[tokio::test]
    async fn fan_out_uses_default_models() {
        let mut service = LlmService::empty().with_registry(registry());
        service.register_provider(Echo("a"));
        service.register_provider(Echo("b"));

        let results = service.query_all(&QueryContext::new(), "x", &[]).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results["a"].response, "m1:x");
        assert_eq!(results["a"].model.as_deref(), Some("m1"));
        assert_eq!(results["b"].response, "m2:x");
    }

    #[tokio::test]
    async fn fan_out_reports_provider_without_models() {
        let mut service = LlmService::empty().with_registry(registry());
        service.register_provider(Echo("a"));
        service.register_provider(Echo("orphan"));

        let results = service.query_all(&QueryContext::new(), "x", &[]).await;
        let orphan = &results["orphan"];
        assert!(orphan.model.is_none());
        assert!(orphan.response.is_empty());
        assert_eq!(
            orphan.error.as_ref().map(ChorusError::kind),
            Some(ErrorKind::NoDefaultModel)
        );
        assert!(results["a"].is_ok());
    }

    #[tokio::test]
    async fn fan_out_with_no_providers_is_empty() {
        let service = LlmService::empty();
        let results = service.query_all(&QueryContext::new(), "x", &[]).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn register_provider_replaces_same_name() {
        let mut service = LlmService::empty().with_registry(registry());
        service.register_provider(Echo("a"));
        service.register_provider(Echo("a"));
        assert_eq!(service.configured_providers(), vec!["a"]);
    }
}
