//! LLM provider routing. Python's `importlib`-driven dynamic dispatch
//! (`router.py`'s `_build_provider`) becomes a static string-keyed
//! constructor match over known provider identifiers; `reqwest` unifies
//! the per-library SSL-client dispatch (`httpx` / `httpx_openai` / gemini
//! `HttpOptions`) that the original special-cased.

use crate::config::{ProviderEntry, ProvidersConfig, Settings};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, prompt: &str, max_tokens: i64) -> EngineResult<String>;
    fn name(&self) -> &str;
}

/// A provider resolved with its token budgets bound, mirroring
/// `router.py`'s `get_provider` attaching `max_classify_tokens` /
/// `max_synthesize_tokens` to the returned instance.
pub struct ResolvedProvider {
    pub provider: Arc<dyn LlmProvider>,
    pub max_classify_tokens: i64,
    pub max_synthesize_tokens: i64,
}

fn build_http_client(ssl_cert_file: Option<&str>) -> EngineResult<reqwest::Client> {
    let mut builder = reqwest::ClientBuilder::new();
    if let Some(path) = ssl_cert_file {
        if let Ok(bytes) = std::fs::read(path) {
            if let Ok(cert) = reqwest::Certificate::from_pem(&bytes) {
                builder = builder.add_root_certificate(cert);
            } else {
                warn!(path, "SSL_CERT_FILE did not parse as PEM, ignoring");
            }
        }
    }
    builder
        .build()
        .map_err(|e| EngineError::Configuration(format!("building HTTP client: {e}")))
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn generate(&self, prompt: &str, max_tokens: i64) -> EngineResult<String> {
        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "max_tokens": max_tokens,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .send()
            .await
            .map_err(|e| EngineError::ProviderUnavailable(format!("OpenAI request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::ProviderUnavailable(format!(
                "OpenAI returned {}",
                response.status()
            )));
        }

        let parsed: OpenAiChatResponse = response
            .json()
            .await
            .map_err(|e| EngineError::ProviderUnavailable(format!("decoding OpenAI response: {e}")))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// ---------------------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------------------

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct AnthropicMessageResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Deserialize)]
struct AnthropicContentBlock {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn generate(&self, prompt: &str, max_tokens: i64) -> EngineResult<String> {
        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&serde_json::json!({
                "model": self.model,
                "max_tokens": max_tokens,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .send()
            .await
            .map_err(|e| EngineError::ProviderUnavailable(format!("Anthropic request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::ProviderUnavailable(format!(
                "Anthropic returned {}",
                response.status()
            )));
        }

        let parsed: AnthropicMessageResponse = response
            .json()
            .await
            .map_err(|e| EngineError::ProviderUnavailable(format!("decoding Anthropic response: {e}")))?;

        Ok(parsed
            .content
            .into_iter()
            .next()
            .map(|b| b.text)
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn generate(&self, prompt: &str, max_tokens: i64) -> EngineResult<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "contents": [{"parts": [{"text": prompt}]}],
                "generationConfig": {"maxOutputTokens": max_tokens},
            }))
            .send()
            .await
            .map_err(|e| EngineError::ProviderUnavailable(format!("Gemini request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::ProviderUnavailable(format!(
                "Gemini returned {}",
                response.status()
            )));
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| EngineError::ProviderUnavailable(format!("decoding Gemini response: {e}")))?;

        Ok(parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ---------------------------------------------------------------------------
// Registry / router
// ---------------------------------------------------------------------------

fn build_provider(
    name: &str,
    entry: &ProviderEntry,
    model: String,
    ssl_cert_file: Option<&str>,
) -> EngineResult<Option<Arc<dyn LlmProvider>>> {
    let api_key = match Settings::api_key_for(&entry.api_key_env) {
        Some(k) => k,
        None => {
            info!(provider = name, env = %entry.api_key_env, "missing API key, provider unavailable");
            return Ok(None);
        }
    };
    let client = build_http_client(ssl_cert_file)?;

    let provider: Arc<dyn LlmProvider> = match name {
        "openai" => Arc::new(OpenAiProvider {
            client,
            api_key,
            model,
        }),
        "anthropic" => Arc::new(AnthropicProvider {
            client,
            api_key,
            model,
        }),
        "gemini" => Arc::new(GeminiProvider {
            client,
            api_key,
            model,
        }),
        other => {
            warn!(provider = other, "unknown provider identifier, not built");
            return Ok(None);
        }
    };
    Ok(Some(provider))
}

fn resolve_int(env_var: &str, env_value: Option<i64>, yaml_default: Option<i64>, hardcoded: i64) -> i64 {
    if let Ok(raw) = std::env::var(env_var) {
        if let Ok(parsed) = raw.parse::<i64>() {
            return parsed;
        }
    }
    env_value.or(yaml_default).unwrap_or(hardcoded)
}

/// Primary -> fallback -> `None` resolution, exactly as `router.py`'s
/// `get_provider`.
pub fn get_provider(settings: &Settings, registry: &ProvidersConfig) -> Option<ResolvedProvider> {
    if !settings.llm_enabled {
        info!("LLM disabled (LLM_ENABLED=false)");
        return None;
    }

    let primary_name = settings.llm_provider.to_lowercase();
    if let Some(entry) = registry.providers.get(&primary_name) {
        let model = settings
            .llm_model
            .clone()
            .unwrap_or_else(|| entry.default_model.clone());
        match build_provider(&primary_name, entry, model, settings.ssl_cert_file.as_deref()) {
            Ok(Some(provider)) => {
                return Some(ResolvedProvider {
                    provider,
                    max_classify_tokens: resolve_int(
                        "LLM_MAX_CLASSIFY_TOKENS",
                        settings.llm_max_classify_tokens,
                        entry.max_classify_tokens,
                        500,
                    ),
                    max_synthesize_tokens: resolve_int(
                        "LLM_MAX_SYNTHESIZE_TOKENS",
                        settings.llm_max_synthesize_tokens,
                        entry.max_synthesize_tokens,
                        1000,
                    ),
                });
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to build primary provider"),
        }
    } else {
        warn!(provider = %primary_name, "provider not registered in providers.yaml");
    }

    let fallback_name = settings
        .llm_fallback_provider
        .clone()
        .or_else(|| {
            registry
                .providers
                .get(&primary_name)
                .and_then(|e| e.fallback_provider.clone())
        })
        .map(|s| s.to_lowercase());

    if let Some(fallback_name) = fallback_name {
        info!(provider = %fallback_name, "trying fallback provider");
        if let Some(entry) = registry.providers.get(&fallback_name) {
            let model = settings
                .llm_fallback_model
                .clone()
                .unwrap_or_else(|| entry.default_model.clone());
            match build_provider(&fallback_name, entry, model, settings.ssl_cert_file.as_deref()) {
                Ok(Some(provider)) => {
                    return Some(ResolvedProvider {
                        provider,
                        max_classify_tokens: resolve_int(
                            "LLM_FALLBACK_MAX_CLASSIFY_TOKENS",
                            settings.llm_fallback_max_classify_tokens,
                            entry.max_classify_tokens,
                            500,
                        ),
                        max_synthesize_tokens: resolve_int(
                            "LLM_FALLBACK_MAX_SYNTHESIZE_TOKENS",
                            settings.llm_fallback_max_synthesize_tokens,
                            entry.max_synthesize_tokens,
                            2000,
                        ),
                    });
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "failed to build fallback provider"),
            }
        } else {
            warn!(provider = %fallback_name, "fallback provider not registered in providers.yaml");
        }
    }

    warn!("no provider available (missing API key or bad config)");
    None
}

/// Build a one-off provider for a single request's `llm_provider`/
/// `llm_model` override (`POST /query`'s request-scoped fields). Nothing
/// global is mutated: the caller threads the returned provider through a
/// cloned `PipelineDeps` for just that request, so there is no shared
/// state to restore afterward.
pub fn build_override_provider(
    settings: &Settings,
    registry: &ProvidersConfig,
    name: &str,
    model: Option<&str>,
) -> Option<ResolvedProvider> {
    let name = name.to_lowercase();
    let entry = registry.providers.get(&name)?;
    let model = model
        .map(|m| m.to_string())
        .unwrap_or_else(|| entry.default_model.clone());
    match build_provider(&name, entry, model, settings.ssl_cert_file.as_deref()) {
        Ok(Some(provider)) => Some(ResolvedProvider {
            provider,
            max_classify_tokens: resolve_int(
                "LLM_MAX_CLASSIFY_TOKENS",
                settings.llm_max_classify_tokens,
                entry.max_classify_tokens,
                500,
            ),
            max_synthesize_tokens: resolve_int(
                "LLM_MAX_SYNTHESIZE_TOKENS",
                settings.llm_max_synthesize_tokens,
                entry.max_synthesize_tokens,
                1000,
            ),
        }),
        Ok(None) => None,
        Err(e) => {
            warn!(provider = %name, error = %e, "failed to build request-scoped provider override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entry(api_key_env: &str) -> ProviderEntry {
        ProviderEntry {
            api_key_env: api_key_env.to_string(),
            default_model: "test-model".to_string(),
            module: None,
            class: None,
            ssl_client_type: None,
            constructor_ssl_kwarg: None,
            fallback_provider: None,
            max_classify_tokens: None,
            max_synthesize_tokens: None,
        }
    }

    #[test]
    fn resolve_int_prefers_env_over_yaml_and_hardcoded() {
        std::env::set_var("TEST_RESOLVE_INT_VAR", "42");
        assert_eq!(resolve_int("TEST_RESOLVE_INT_VAR", None, Some(7), 1), 42);
        std::env::remove_var("TEST_RESOLVE_INT_VAR");
    }

    #[test]
    fn resolve_int_falls_back_to_yaml_then_hardcoded() {
        std::env::remove_var("TEST_RESOLVE_INT_UNSET");
        assert_eq!(resolve_int("TEST_RESOLVE_INT_UNSET", None, Some(7), 1), 7);
        assert_eq!(resolve_int("TEST_RESOLVE_INT_UNSET", None, None, 1), 1);
    }

    #[test]
    fn get_provider_returns_none_when_llm_disabled() {
        let mut registry = ProvidersConfig::default();
        registry
            .providers
            .insert("openai".to_string(), entry("OPENAI_API_KEY"));

        let mut settings = test_settings();
        settings.llm_enabled = false;
        assert!(get_provider(&settings, &registry).is_none());
    }

    #[test]
    fn get_provider_returns_none_without_api_key() {
        std::env::remove_var("TEST_PROVIDER_KEY_UNSET");
        let mut registry = ProvidersConfig::default();
        registry
            .providers
            .insert("openai".to_string(), entry("TEST_PROVIDER_KEY_UNSET"));

        let settings = test_settings();
        assert!(get_provider(&settings, &registry).is_none());
    }

    fn test_settings() -> Settings {
        // Settings has no public constructor beyond `load`, which reads the
        // environment; tests rely on that plus scoped env var mutation.
        Settings::load_for_test()
    }

    #[allow(dead_code)]
    fn unused(_: HashMap<String, String>) {}
}
