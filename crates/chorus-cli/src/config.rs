//! On-disk credentials: `~/.config/chorus/config.yml`, with
//! `<PROVIDER>_API_KEY` environment variables as fallback.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use chorus_llm::ModelRegistry;
use chorus_types::{ChorusError, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "config.yml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

/// `~/.config/chorus`, on every platform.
pub fn config_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".config").join("chorus"))
        .ok_or_else(|| ChorusError::Config("cannot determine home directory".into()))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// A missing file is an empty config.
    pub fn load_from(path: &Path) -> Result<Self> {
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ChorusError::Config(format!(
                    "error reading {}: {e}",
                    path.display()
                )))
            }
        };

        // An empty file deserializes to null
        if source.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&source)
            .map_err(|e| ChorusError::Config(format!("error parsing {}: {e}", path.display())))
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Write the file readable by the owner only.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let yaml = serde_yaml::to_string(self)
            .map_err(|e| ChorusError::Config(format!("error serializing config: {e}")))?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(yaml.as_bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "Saved config");
        Ok(())
    }

    /// Key from the file if non-empty, else `<PROVIDER>_API_KEY`.
    pub fn api_key(&self, provider: &str) -> Option<String> {
        self.api_key_with(provider, |var| std::env::var(var).ok())
    }

    fn api_key_with(&self, provider: &str, env: impl Fn(&str) -> Option<String>) -> Option<String> {
        self.providers
            .get(provider)
            .map(|p| p.api_key.clone())
            .filter(|key| !key.is_empty())
            .or_else(|| env(&env_var_name(provider)))
            .filter(|key| !key.is_empty())
    }

    pub fn set_api_key(&mut self, registry: &ModelRegistry, provider: &str, key: &str) -> Result<()> {
        if !registry.is_valid_provider(provider) {
            return Err(ChorusError::Config(format!("unsupported provider: {provider}")));
        }
        if key.is_empty() {
            return Err(ChorusError::Config("API key must not be empty".into()));
        }
        self.providers
            .entry(provider.to_string())
            .or_default()
            .api_key = key.to_string();
        Ok(())
    }

    /// Non-empty credentials for every provider `registry` knows.
    pub fn api_keys(&self, registry: &ModelRegistry) -> HashMap<String, String> {
        collect_keys(registry, |provider| self.api_key(provider))
    }
}

fn collect_keys(
    registry: &ModelRegistry,
    key_for: impl Fn(&str) -> Option<String>,
) -> HashMap<String, String> {
    registry
        .providers()
        .filter_map(|provider| key_for(provider).map(|key| (provider.to_string(), key)))
        .collect()
}

fn env_var_name(provider: &str) -> String {
    format!("{}_API_KEY", provider.to_uppercase())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
