//! Multi-provider LLM querying for chorus (Anthropic, DeepSeek, Google).
//!
//! Provides the `ProviderAdapter` trait, the `DynProvider` wrapper, the
//! static `ModelRegistry`, request option mutators, and `LlmService` for
//! single-model timed queries and concurrent fan-out to every provider.

mod anthropic;
mod deepseek;
mod google;
mod provider;
mod registry;
mod service;
mod types;

pub use anthropic::AnthropicAdapter;
pub use deepseek::DeepSeekAdapter;
pub use google::GoogleAdapter;
pub use provider::{DynProvider, ProviderAdapter};
pub use registry::ModelRegistry;
pub use service::{ErrorSink, LlmService, DEFAULT_TEMPERATURE};
pub use types::*;

pub use chorus_types::{ChorusError, ErrorKind, QueryContext, Result};
