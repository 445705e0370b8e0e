//! Application configuration: environment variables plus the five
//! YAML-backed config files (`providers.yaml`, `intents.yaml`,
//! `cypher_templates.yaml`, `evaluation_criteria.yaml`, `test_queries.yaml`).
//!
//! `Settings` is constructed once from the environment and cached in a
//! `OnceLock`, mirroring the source's `@lru_cache get_settings()` idiom.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_int(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub neo4j_uri: String,
    pub neo4j_username: String,
    pub neo4j_password: String,
    pub neo4j_database: String,

    pub llm_enabled: bool,
    pub llm_provider: String,
    pub llm_model: Option<String>,
    pub llm_fallback_provider: Option<String>,
    pub llm_fallback_model: Option<String>,

    pub embedding_provider: String,
    pub embedding_model: Option<String>,

    pub ssl_cert_file: Option<String>,

    pub llm_max_classify_tokens: Option<i64>,
    pub llm_max_synthesize_tokens: Option<i64>,
    pub llm_fallback_max_classify_tokens: Option<i64>,
    pub llm_fallback_max_synthesize_tokens: Option<i64>,

    pub config_dir: PathBuf,
    pub prompts_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl Settings {
    fn load() -> Self {
        let config_dir = env_opt("ENGINE_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("config"));

        Settings {
            neo4j_uri: env_string("NEO4J_URI", "bolt://localhost:7687"),
            neo4j_username: env_string("NEO4J_USERNAME", "neo4j"),
            neo4j_password: env_string("NEO4J_PASSWORD", ""),
            neo4j_database: env_string("NEO4J_DATABASE", "neo4j"),

            llm_enabled: env_bool("LLM_ENABLED", true),
            llm_provider: env_string("LLM_PROVIDER", "anthropic"),
            llm_model: env_opt("LLM_MODEL"),
            llm_fallback_provider: env_opt("LLM_FALLBACK_PROVIDER"),
            llm_fallback_model: env_opt("LLM_FALLBACK_MODEL"),

            embedding_provider: env_string("EMBEDDING_PROVIDER", "local"),
            embedding_model: env_opt("EMBEDDING_MODEL"),

            ssl_cert_file: env_opt("SSL_CERT_FILE"),

            llm_max_classify_tokens: env_opt("LLM_MAX_CLASSIFY_TOKENS").and_then(|v| v.parse().ok()),
            llm_max_synthesize_tokens: env_opt("LLM_MAX_SYNTHESIZE_TOKENS")
                .and_then(|v| v.parse().ok()),
            llm_fallback_max_classify_tokens: env_opt("LLM_FALLBACK_MAX_CLASSIFY_TOKENS")
                .and_then(|v| v.parse().ok()),
            llm_fallback_max_synthesize_tokens: env_opt("LLM_FALLBACK_MAX_SYNTHESIZE_TOKENS")
                .and_then(|v| v.parse().ok()),

            prompts_dir: config_dir.join("prompts"),
            data_dir: env_opt("ENGINE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            config_dir,
        }
    }

    /// API key for a provider name, via its declared env var (resolved by the caller
    /// from the provider registry, not hardcoded here).
    pub fn api_key_for(env_var: &str) -> Option<String> {
        env_opt(env_var)
    }

    pub fn resolve_int(&self, env_value: Option<i64>, yaml_default: Option<i64>, hardcoded: i64) -> i64 {
        env_value.or(yaml_default).unwrap_or(hardcoded)
    }

    /// Build a fresh `Settings` from the current environment, bypassing the
    /// process-wide `OnceLock` cache. Only meant for tests that mutate env
    /// vars scoped to a single assertion.
    #[cfg(test)]
    pub fn load_for_test() -> Self {
        Self::load()
    }
}

static SETTINGS: OnceLock<Settings> = OnceLock::new();

pub fn get_settings() -> &'static Settings {
    SETTINGS.get_or_init(Settings::load)
}

// ---------------------------------------------------------------------------
// providers.yaml
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderEntry {
    pub api_key_env: String,
    pub default_model: String,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub ssl_client_type: Option<String>,
    #[serde(default)]
    pub constructor_ssl_kwarg: Option<String>,
    #[serde(default)]
    pub fallback_provider: Option<String>,
    #[serde(default)]
    pub max_classify_tokens: Option<i64>,
    #[serde(default)]
    pub max_synthesize_tokens: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderEntry>,
}

// ---------------------------------------------------------------------------
// intents.yaml
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IntentSpec {
    pub description: String,
    #[serde(default)]
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct IntentsConfig {
    #[serde(default)]
    pub intents: HashMap<String, IntentSpec>,
}

// ---------------------------------------------------------------------------
// cypher_templates.yaml
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CypherTemplate {
    /// Intent or list of intents this template serves.
    #[serde(default)]
    pub intent: TemplateIntents,
    #[serde(default)]
    pub entity_types: Vec<String>,
    #[serde(default)]
    pub params: Vec<String>,
    pub cypher: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(untagged)]
pub enum TemplateIntents {
    #[default]
    None,
    One(String),
    Many(Vec<String>),
}

impl TemplateIntents {
    pub fn contains(&self, intent: &str) -> bool {
        match self {
            TemplateIntents::None => false,
            TemplateIntents::One(s) => s == intent,
            TemplateIntents::Many(v) => v.iter().any(|s| s == intent),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CypherTemplatesConfig {
    #[serde(default)]
    pub templates: HashMap<String, CypherTemplate>,
    #[serde(default)]
    pub entity_patterns: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub default_templates: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// evaluation_criteria.yaml
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CriterionSpec {
    pub id: String,
    pub name: String,
    pub principle_id: String,
    pub agent_target: String,
    pub description: String,
    pub weight: f64,
    pub scoring_rubric: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EvalSettings {
    #[serde(default = "default_min_composite")]
    pub min_composite_score: f64,
    #[serde(default)]
    pub evaluation_sample_rate: f64,
    #[serde(default = "default_max_response_length")]
    pub max_response_length: usize,
    #[serde(default = "default_true")]
    pub feedback_enabled: bool,
}

fn default_min_composite() -> f64 {
    0.6
}
fn default_max_response_length() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EvaluationCriteriaConfig {
    #[serde(default)]
    pub criteria: HashMap<String, Vec<CriterionSpec>>,
    #[serde(default)]
    pub settings: EvalSettings,
}

// ---------------------------------------------------------------------------
// test_queries.yaml
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TestQuerySpec {
    pub query: String,
    #[serde(default)]
    pub expected_intent: Option<String>,
    #[serde(default)]
    pub expected_entities: Vec<String>,
    #[serde(default)]
    pub expected_template: Option<String>,
    #[serde(default)]
    pub expected_retrieval: Option<String>,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default)]
    pub min_sources: usize,
    #[serde(default)]
    pub min_results: usize,
    #[serde(default = "default_true")]
    pub no_error: bool,
}

fn default_min_confidence() -> f64 {
    0.5
}

pub type TestQueriesConfig = HashMap<String, Vec<TestQuerySpec>>;

// ---------------------------------------------------------------------------
// Generic loader
// ---------------------------------------------------------------------------

/// Load and parse a YAML config file relative to `settings.config_dir`.
/// A missing file degrades to the type's `Default` rather than failing
/// the whole process (ConfigurationError is reserved for malformed YAML).
pub fn load_yaml<T: for<'de> Deserialize<'de> + Default>(
    config_dir: &Path,
    filename: &str,
) -> Result<T, EngineError> {
    let path = config_dir.join(filename);
    if !path.exists() {
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| EngineError::Configuration(format!("reading {filename}: {e}")))?;
    serde_yaml::from_str(&content)
        .map_err(|e| EngineError::Configuration(format!("parsing {filename}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_degrades_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg: ProvidersConfig = load_yaml(dir.path(), "providers.yaml").unwrap();
        assert!(cfg.providers.is_empty());
    }

    #[test]
    fn malformed_yaml_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("intents.yaml"), "not: [valid yaml").unwrap();
        let result: Result<IntentsConfig, _> = load_yaml(dir.path(), "intents.yaml");
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[test]
    fn template_intents_contains_matches_single_and_list() {
        assert!(TemplateIntents::One("lookup".into()).contains("lookup"));
        assert!(!TemplateIntents::One("lookup".into()).contains("comparison"));
        assert!(TemplateIntents::Many(vec!["lookup".into(), "exploration".into()])
            .contains("exploration"));
    }
}
