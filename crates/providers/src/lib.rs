//! Generative-model providers for ClawdVC.
//!
//! All providers implement the `clawdvc_core::Provider` trait.

pub mod anthropic;

pub use anthropic::AnthropicProvider;

use clawdvc_config::AppConfig;
use clawdvc_core::error::ProviderError;
use clawdvc_core::provider::Provider;
use std::sync::Arc;

/// Build the provider described by `config`.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config
        .api_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| ProviderError::NotConfigured("ANTHROPIC_API_KEY is not set".into()))?;
    Ok(Arc::new(AnthropicProvider::new(api_key)))
}
