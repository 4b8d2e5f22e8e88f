use std::collections::{BTreeMap, HashMap};

use chorus_types::{ChorusError, Result};

/// Provider → ordered model list shipped with chorus. The first model of each
/// provider is its default.
const BUILTIN_MODELS: &[(&str, &[&str])] = &[
    ("anthropic", &["claude-3-7-sonnet-latest"]),
    ("deepseek", &["deepseek-coder", "deepseek-chat"]),
    (
        "google",
        &[
            "gemini-2.5-pro-exp-03-25",
            "gemini-2.0-flash",
            "gemini-2.0-flash-lite",
            "gemini-1.5-flash",
            "gemini-1.5-flash-8b",
        ],
    ),
];

// ---------------------------------------------------------------------------
// ModelRegistry
// ---------------------------------------------------------------------------

/// Immutable mapping of providers to the models they serve, plus the inverse
/// index. Built once; tests that need another table build their own instance.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    providers: BTreeMap<String, Vec<String>>,
    model_to_provider: HashMap<String, String>,
}

impl ModelRegistry {
    /// Build from a provider → models table. Fails if a model is listed under
    /// more than one provider.
    pub fn new<P, M, I>(table: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, Vec<M>)>,
        P: Into<String>,
        M: Into<String>,
    {
        let mut providers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut model_to_provider: HashMap<String, String> = HashMap::new();

        for (provider, models) in table {
            let provider = provider.into();
            let models: Vec<String> = models.into_iter().map(Into::into).collect();

            for model in &models {
                if let Some(existing) = model_to_provider.get(model) {
                    if existing != &provider {
                        return Err(ChorusError::InvalidRegistry(format!(
                            "model {model} listed under both {existing} and {provider}"
                        )));
                    }
                }
                model_to_provider.insert(model.clone(), provider.clone());
            }

            providers.entry(provider).or_default().extend(models);
        }

        Ok(Self {
            providers,
            model_to_provider,
        })
    }

    /// The table shipped with chorus.
    pub fn builtin() -> Self {
        let mut providers = BTreeMap::new();
        let mut model_to_provider = HashMap::new();
        for (provider, models) in BUILTIN_MODELS {
            for model in *models {
                model_to_provider.insert(model.to_string(), provider.to_string());
            }
            providers.insert(
                provider.to_string(),
                models.iter().map(|m| m.to_string()).collect(),
            );
        }
        Self {
            providers,
            model_to_provider,
        }
    }

    pub fn provider_for_model(&self, model: &str) -> Option<&str> {
        self.model_to_provider.get(model).map(String::as_str)
    }

    /// Models of `provider` in declaration order; empty if unknown.
    pub fn models_for_provider(&self, provider: &str) -> &[String] {
        self.providers
            .get(provider)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_valid_model(&self, model: &str) -> bool {
        self.model_to_provider.contains_key(model)
    }

    pub fn is_valid_provider(&self, provider: &str) -> bool {
        self.providers.contains_key(provider)
    }

    pub fn default_model_for_provider(&self, provider: &str) -> Result<&str> {
        self.models_for_provider(provider)
            .first()
            .map(String::as_str)
            .ok_or_else(|| ChorusError::NoDefaultModel(provider.to_string()))
    }

    /// Known providers, sorted by name.
    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    /// `(provider, models)` pairs, sorted by provider name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.providers
            .iter()
            .map(|(p, models)| (p.as_str(), models.as_slice()))
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
