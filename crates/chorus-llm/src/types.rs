use std::collections::HashMap;
use std::time::Duration;

use chorus_types::{ChorusError, Result};

/// Well-known provider-specific parameter keys.
pub const PARAM_SYSTEM: &str = "system";
pub const PARAM_TOP_P: &str = "top_p";
pub const PARAM_TOP_K: &str = "top_k";

// ---------------------------------------------------------------------------
// ParamValue
// ---------------------------------------------------------------------------

/// Value of a provider-specific parameter. Adapters read only the keys and
/// shapes they understand and ignore everything else.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(f) => Some(*f),
            ParamValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

// ---------------------------------------------------------------------------
// RequestOptions
// ---------------------------------------------------------------------------

/// Resolved configuration for one provider call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestOptions {
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub params: HashMap<String, ParamValue>,
}

impl RequestOptions {
    /// Start from a backend's own defaults.
    pub fn with_defaults(max_tokens: u32, temperature: f64) -> Self {
        Self {
            model: None,
            max_tokens,
            temperature,
            params: HashMap::new(),
        }
    }

    /// Apply `options` in order; later options override earlier ones.
    pub fn apply(mut self, options: &[RequestOption]) -> Self {
        for option in options {
            option.apply_to(&mut self);
        }
        self
    }

    /// The model to call, or `MissingModel` for `provider`.
    pub fn require_model(&self, provider: &str) -> Result<&str> {
        self.model
            .as_deref()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| ChorusError::MissingModel {
                provider: provider.to_string(),
            })
    }

    pub fn param(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }

    /// Non-empty text parameter.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.param(key)
            .and_then(ParamValue::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.param(key).and_then(ParamValue::as_f64)
    }

    pub fn param_i64(&self, key: &str) -> Option<i64> {
        self.param(key).and_then(ParamValue::as_i64)
    }
}

// ---------------------------------------------------------------------------
// RequestOption
// ---------------------------------------------------------------------------

/// One independent mutation of [`RequestOptions`].
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOption {
    Model(String),
    MaxTokens(u32),
    Temperature(f64),
    Param(String, ParamValue),
}

impl RequestOption {
    pub fn apply_to(&self, options: &mut RequestOptions) {
        match self {
            RequestOption::Model(model) => options.model = Some(model.clone()),
            RequestOption::MaxTokens(n) => options.max_tokens = *n,
            RequestOption::Temperature(t) => options.temperature = *t,
            RequestOption::Param(key, value) => {
                options.params.insert(key.clone(), value.clone());
            }
        }
    }
}

pub fn with_model(model: impl Into<String>) -> RequestOption {
    RequestOption::Model(model.into())
}

pub fn with_max_tokens(max_tokens: u32) -> RequestOption {
    RequestOption::MaxTokens(max_tokens)
}

pub fn with_temperature(temperature: f64) -> RequestOption {
    RequestOption::Temperature(temperature)
}

pub fn with_param(key: impl Into<String>, value: impl Into<ParamValue>) -> RequestOption {
    RequestOption::Param(key.into(), value.into())
}

pub fn with_system(prompt: impl Into<String>) -> RequestOption {
    with_param(PARAM_SYSTEM, prompt.into())
}

pub fn with_top_p(top_p: f64) -> RequestOption {
    with_param(PARAM_TOP_P, top_p)
}

// ---------------------------------------------------------------------------
// ProviderResponse
// ---------------------------------------------------------------------------

/// One provider's result within a fan-out.
#[derive(Debug)]
pub struct ProviderResponse {
    pub provider: String,
    /// `None` when no model could be chosen for the provider.
    pub model: Option<String>,
    pub response: String,
    pub error: Option<ChorusError>,
    pub elapsed: Duration,
}

impl ProviderResponse {
    pub(crate) fn failed(provider: &str, model: Option<String>, error: ChorusError) -> Self {
        Self {
            provider: provider.to_string(),
            model,
            response: String::new(),
            error: Some(error),
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
