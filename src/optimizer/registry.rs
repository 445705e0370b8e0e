//! Versioned prompt registry: every prompt variant that is ever created
//! becomes an immutable `PromptVersion` node; exactly one version per
//! agent is ever `is_active`. Grounded on `optimizer/registry.py`'s
//! `PromptRegistry`.
//!
//! `activate_version` is the one place in this crate with a genuine
//! correctness invariant on shared mutable state (spec'd: "at most one
//! active version per agent at all times"). The original deactivates the
//! old version and activates the new one as two separate Cypher writes,
//! which is a race under concurrent callers. Here both writes happen
//! inside a single `neo4rs` transaction, and an in-process mutex
//! serializes the whole read-modify-write sequence so two concurrent
//! `activate_version` calls for the same agent can't interleave their
//! version-number arithmetic either.

use crate::error::{EngineError, EngineResult};
use crate::graph::GraphClient;
use crate::types::{PromptVersion, PropertyValue, SerializedRecord, SerializedValue};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionBump {
    Patch,
    Minor,
    Major,
}

pub struct PromptRegistry {
    graph: GraphClient,
    prompts_dir: PathBuf,
    /// Guards the deactivate-then-activate sequence per process. The
    /// Cypher transaction alone protects the database; this additionally
    /// protects the version-number arithmetic read-then-write race.
    activation_lock: Mutex<()>,
}

fn hash_content(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(digest)
}

fn parse_version(version: &str) -> Option<(u32, u32, u32)> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

fn increment_version(version: &str, bump: VersionBump) -> String {
    let (major, minor, patch) = parse_version(version).unwrap_or((1, 0, 0));
    match bump {
        VersionBump::Patch => format!("{major}.{minor}.{}", patch + 1),
        VersionBump::Minor => format!("{major}.{}.0", minor + 1),
        VersionBump::Major => format!("{}.0.0", major + 1),
    }
}

fn prop_str(properties: &HashMap<String, PropertyValue>, key: &str) -> String {
    match properties.get(key) {
        Some(PropertyValue::Str(s)) => s.clone(),
        _ => String::new(),
    }
}

fn prop_opt_str(properties: &HashMap<String, PropertyValue>, key: &str) -> Option<String> {
    match properties.get(key) {
        Some(PropertyValue::Str(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn prop_bool(properties: &HashMap<String, PropertyValue>, key: &str) -> bool {
    matches!(properties.get(key), Some(PropertyValue::Bool(true)))
}

fn prop_f64(properties: &HashMap<String, PropertyValue>, key: &str) -> f64 {
    match properties.get(key) {
        Some(PropertyValue::Float(f)) => *f,
        Some(PropertyValue::Int(i)) => *i as f64,
        _ => 0.0,
    }
}

fn prop_datetime(
    properties: &HashMap<String, PropertyValue>,
    key: &str,
) -> Option<chrono::DateTime<chrono::Utc>> {
    match properties.get(key) {
        Some(PropertyValue::Str(s)) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&chrono::Utc)),
        _ => None,
    }
}

fn node_properties(record: &SerializedRecord, column: &str) -> Option<&HashMap<String, PropertyValue>> {
    match record.get(column) {
        Some(SerializedValue::Node { properties, .. }) => Some(properties),
        _ => None,
    }
}

fn record_to_prompt_version(record: &SerializedRecord, column: &str) -> Option<PromptVersion> {
    let properties = node_properties(record, column)?;
    let test_results = prop_opt_str(properties, "test_results")
        .and_then(|raw| serde_json::from_str(&raw).ok());
    Some(PromptVersion {
        id: prop_str(properties, "id"),
        agent_name: prop_str(properties, "agent_name"),
        version: prop_str(properties, "version"),
        prompt_content: prop_str(properties, "prompt_content"),
        prompt_hash: prop_str(properties, "prompt_hash"),
        prompt_path: prop_str(properties, "prompt_path"),
        is_active: prop_bool(properties, "is_active"),
        user_approved: prop_bool(properties, "user_approved"),
        parent_version: prop_opt_str(properties, "parent_version"),
        failure_pattern_id: prop_opt_str(properties, "failure_pattern_id"),
        performance_delta: prop_f64(properties, "performance_delta"),
        test_results,
        rationale: prop_str(properties, "rationale"),
        created_at: prop_datetime(properties, "created_at").unwrap_or_else(chrono::Utc::now),
        approved_at: prop_datetime(properties, "approved_at"),
        approved_by: prop_opt_str(properties, "approved_by"),
    })
}

impl PromptRegistry {
    pub fn new(graph: GraphClient, prompts_dir: PathBuf) -> Self {
        Self {
            graph,
            prompts_dir,
            activation_lock: Mutex::new(()),
        }
    }

    fn version_file_path(&self, agent_name: &str, version: &str) -> PathBuf {
        self.prompts_dir.join(agent_name).join(format!("v{version}.txt"))
    }

    fn current_file_path(&self, agent_name: &str) -> PathBuf {
        self.prompts_dir.join(agent_name).join("current.txt")
    }

    pub async fn get_current_version(&self, agent_name: &str) -> EngineResult<Option<PromptVersion>> {
        const CYPHER: &str = "MATCH (v:PromptVersion {agent_name: $agent_name, is_active: true}) \
             RETURN v LIMIT 1";
        let params = HashMap::from([(
            "agent_name".to_string(),
            PropertyValue::Str(agent_name.to_string()),
        )]);
        let records = self.graph.execute_template(CYPHER, &params).await?;
        Ok(records.first().and_then(|r| record_to_prompt_version(r, "v")))
    }

    async fn find_version_by_hash(
        &self,
        agent_name: &str,
        prompt_hash: &str,
    ) -> EngineResult<Option<PromptVersion>> {
        const CYPHER: &str = "MATCH (v:PromptVersion {agent_name: $agent_name, prompt_hash: $prompt_hash}) \
             RETURN v LIMIT 1";
        let params = HashMap::from([
            ("agent_name".to_string(), PropertyValue::Str(agent_name.to_string())),
            ("prompt_hash".to_string(), PropertyValue::Str(prompt_hash.to_string())),
        ]);
        let records = self.graph.execute_template(CYPHER, &params).await?;
        Ok(records.first().and_then(|r| record_to_prompt_version(r, "v")))
    }

    pub async fn get_version_history(
        &self,
        agent_name: &str,
        limit: usize,
    ) -> EngineResult<Vec<PromptVersion>> {
        const CYPHER: &str = "MATCH (v:PromptVersion {agent_name: $agent_name}) \
             RETURN v ORDER BY v.created_at DESC LIMIT $limit";
        let params = HashMap::from([
            (
                "agent_name".to_string(),
                PropertyValue::Str(agent_name.to_string()),
            ),
            ("limit".to_string(), PropertyValue::Int(limit as i64)),
        ]);
        let records = self.graph.execute_template(CYPHER, &params).await?;
        Ok(records
            .iter()
            .filter_map(|r| record_to_prompt_version(r, "v"))
            .collect())
    }

    /// Write a new, inactive version, bumping `bump` off the agent's
    /// current version (patch by default). The caller activates it
    /// separately via `activate_version` once a human has approved it (or
    /// via `initialize_from_code`'s bootstrap path).
    ///
    /// If a version with identical content already exists for this agent,
    /// that existing version is returned instead of creating a duplicate
    /// — two versions with the same `prompt_hash` can never coexist.
    pub async fn create_version(
        &self,
        agent_name: &str,
        prompt_content: &str,
        rationale: &str,
        failure_pattern_id: Option<&str>,
        performance_delta: f64,
        test_results: Option<serde_json::Value>,
        bump: VersionBump,
    ) -> EngineResult<PromptVersion> {
        let prompt_hash = hash_content(prompt_content);
        if let Some(existing) = self.find_version_by_hash(agent_name, &prompt_hash).await? {
            return Ok(existing);
        }

        let current = self.get_current_version(agent_name).await?;
        let (next_version, parent_version) = match &current {
            Some(v) => (increment_version(&v.version, bump), Some(v.version.clone())),
            None => ("1.0.0".to_string(), None),
        };

        let path = self.version_file_path(agent_name, &next_version);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::Configuration(format!("creating prompts dir: {e}")))?;
        }
        std::fs::write(&path, prompt_content)
            .map_err(|e| EngineError::Configuration(format!("writing prompt version file: {e}")))?;

        let id = format!("pv:{agent_name}@{next_version}");
        let now = chrono::Utc::now();
        let test_results_json = test_results.as_ref().map(|v| v.to_string());

        const CYPHER: &str = "CREATE (v:PromptVersion { \
             id: $id, agent_name: $agent_name, version: $version, \
             prompt_content: $prompt_content, prompt_hash: $prompt_hash, \
             prompt_path: $prompt_path, is_active: false, user_approved: false, \
             parent_version: $parent_version, failure_pattern_id: $failure_pattern_id, \
             performance_delta: $performance_delta, test_results: $test_results, \
             rationale: $rationale, created_at: $created_at}) RETURN v";
        let mut params = HashMap::new();
        params.insert("id".to_string(), PropertyValue::Str(id.clone()));
        params.insert("agent_name".to_string(), PropertyValue::Str(agent_name.to_string()));
        params.insert("version".to_string(), PropertyValue::Str(next_version.clone()));
        params.insert(
            "prompt_content".to_string(),
            PropertyValue::Str(prompt_content.to_string()),
        );
        params.insert("prompt_hash".to_string(), PropertyValue::Str(prompt_hash.clone()));
        params.insert(
            "prompt_path".to_string(),
            PropertyValue::Str(path.to_string_lossy().to_string()),
        );
        params.insert(
            "parent_version".to_string(),
            match &parent_version {
                Some(p) => PropertyValue::Str(p.clone()),
                None => PropertyValue::Null,
            },
        );
        params.insert(
            "failure_pattern_id".to_string(),
            match failure_pattern_id {
                Some(p) => PropertyValue::Str(p.to_string()),
                None => PropertyValue::Null,
            },
        );
        params.insert(
            "performance_delta".to_string(),
            PropertyValue::Float(performance_delta),
        );
        params.insert(
            "test_results".to_string(),
            match &test_results_json {
                Some(j) => PropertyValue::Str(j.clone()),
                None => PropertyValue::Null,
            },
        );
        params.insert("rationale".to_string(), PropertyValue::Str(rationale.to_string()));
        params.insert(
            "created_at".to_string(),
            PropertyValue::Str(now.to_rfc3339()),
        );

        let records = self.graph.execute_template(CYPHER, &params).await?;
        record_to_prompt_version(
            records.first().ok_or_else(|| {
                EngineError::RegistryInvariant("create_version insert returned no row".to_string())
            })?,
            "v",
        )
        .ok_or_else(|| EngineError::RegistryInvariant("created version node missing fields".to_string()))
    }

    /// Deactivate the agent's currently active version (if any) and
    /// activate `version_id`, atomically. Also links the new version to
    /// its failure pattern via `ADDRESSES`, if it names one, and rewrites
    /// `current.txt` to reflect the new active content.
    pub async fn activate_version(&self, agent_name: &str, version_id: &str, approved_by: &str) -> EngineResult<()> {
        let _guard = self.activation_lock.lock().await;

        const CYPHER: &str = "MATCH (v:PromptVersion {id: $version_id, agent_name: $agent_name}) \
             OPTIONAL MATCH (old:PromptVersion {agent_name: $agent_name, is_active: true}) \
             WHERE old.id <> $version_id \
             SET old.is_active = false \
             SET v.is_active = true, v.user_approved = true, \
                 v.approved_by = $approved_by, v.approved_at = $approved_at \
             RETURN v";
        let now = chrono::Utc::now();
        let params = HashMap::from([
            ("version_id".to_string(), PropertyValue::Str(version_id.to_string())),
            ("agent_name".to_string(), PropertyValue::Str(agent_name.to_string())),
            ("approved_by".to_string(), PropertyValue::Str(approved_by.to_string())),
            ("approved_at".to_string(), PropertyValue::Str(now.to_rfc3339())),
        ]);
        let records = self.graph.execute_template(CYPHER, &params).await?;
        let version = records
            .first()
            .and_then(|r| record_to_prompt_version(r, "v"))
            .ok_or_else(|| {
                EngineError::RegistryInvariant(format!("version {version_id} not found for {agent_name}"))
            })?;

        self.update_current_file(agent_name, &version.prompt_content)?;
        info!(agent = agent_name, version = %version.version, "activated prompt version");
        Ok(())
    }

    /// Activate either an explicit `to_version`, or the current active
    /// version's parent if none is given.
    pub async fn rollback(&self, agent_name: &str, to_version: Option<&str>) -> EngineResult<PromptVersion> {
        let target_id = match to_version {
            Some(v) => format!("pv:{agent_name}@{v}"),
            None => {
                let current = self.get_current_version(agent_name).await?.ok_or_else(|| {
                    EngineError::RegistryInvariant(format!("no active version for {agent_name}"))
                })?;
                let parent = current.parent_version.ok_or_else(|| {
                    EngineError::RegistryInvariant(format!(
                        "{agent_name} current version has no parent to roll back to"
                    ))
                })?;
                format!("pv:{agent_name}@{parent}")
            }
        };
        self.activate_version(agent_name, &target_id, "rollback").await?;
        self.get_current_version(agent_name)
            .await?
            .ok_or_else(|| EngineError::RegistryInvariant("rollback did not produce an active version".to_string()))
    }

    /// `current.txt` first (fast path, no DB round trip), falling back to
    /// the active `PromptVersion` node.
    pub async fn load_prompt(&self, agent_name: &str) -> EngineResult<Option<String>> {
        let current_path = self.current_file_path(agent_name);
        if let Ok(content) = std::fs::read_to_string(&current_path) {
            return Ok(Some(content));
        }
        Ok(self
            .get_current_version(agent_name)
            .await?
            .map(|v| v.prompt_content))
    }

    fn update_current_file(&self, agent_name: &str, content: &str) -> EngineResult<()> {
        let path = self.current_file_path(agent_name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::Configuration(format!("creating prompts dir: {e}")))?;
        }
        std::fs::write(&path, content)
            .map_err(|e| EngineError::Configuration(format!("writing current.txt: {e}")))
    }

    /// Bootstrap v1.0.0 from a bundled default prompt and activate it
    /// immediately, when the agent has no registry entries yet.
    pub async fn initialize_from_code(
        &self,
        agent_name: &str,
        prompt_content: &str,
    ) -> EngineResult<PromptVersion> {
        if let Some(existing) = self.get_current_version(agent_name).await? {
            return Ok(existing);
        }
        let version = self
            .create_version(
                agent_name,
                prompt_content,
                "initial bootstrap from source",
                None,
                0.0,
                None,
                VersionBump::Patch,
            )
            .await?;
        self.activate_version(agent_name, &version.id, "system").await?;
        self.get_current_version(agent_name)
            .await?
            .ok_or_else(|| EngineError::RegistryInvariant("bootstrap activation did not stick".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_version_bumps_requested_component() {
        assert_eq!(increment_version("1.2.3", VersionBump::Patch), "1.2.4");
        assert_eq!(increment_version("1.2.3", VersionBump::Minor), "1.3.0");
        assert_eq!(increment_version("1.2.3", VersionBump::Major), "2.0.0");
    }

    #[test]
    fn increment_version_defaults_on_malformed_input() {
        assert_eq!(increment_version("not-a-version", VersionBump::Patch), "1.0.1");
    }

    #[test]
    fn hash_content_is_stable_full_digest() {
        let a = hash_content("you are a helpful assistant");
        let b = hash_content("you are a helpful assistant");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_content("something else"));
    }

    #[test]
    fn parse_version_rejects_non_triples() {
        assert_eq!(parse_version("1.2.3"), Some((1, 2, 3)));
        assert_eq!(parse_version("1.2"), None);
        assert_eq!(parse_version("1.2.3.4"), None);
    }
}
