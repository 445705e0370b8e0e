//! Prompt variant generation: given a failure pattern, asks an LLM to
//! propose alternative prompts addressing its root-cause hypotheses, then
//! hands a chosen variant to the registry as a new version.
//!
//! Grounded on `optimizer/generator.py`'s `VariantGenerator`. The
//! original falls back to regex-scanning Python source files for
//! `prompt = """..."""` literals when the registry has nothing recorded
//! yet; that fallback is specific to reading Python source and does not
//! generalize, so it is dropped here. Prompts are always seeded into the
//! registry first via `PromptRegistry::initialize_from_code`.

use crate::optimizer::registry::{PromptRegistry, VersionBump};
use crate::providers::ResolvedProvider;
use crate::types::{FailurePattern, PromptVariant, PromptVersion};
use regex::Regex;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

#[derive(Deserialize)]
struct RawVariant {
    prompt: String,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    addresses_hypotheses: Vec<usize>,
}

pub struct VariantGenerator {
    registry: Arc<PromptRegistry>,
    variant_counter: AtomicUsize,
}

impl VariantGenerator {
    pub fn new(registry: Arc<PromptRegistry>) -> Self {
        Self {
            registry,
            variant_counter: AtomicUsize::new(0),
        }
    }

    /// Generate up to `num_variants` candidate prompts addressing
    /// `pattern`'s root-cause hypotheses. Falls back to a single
    /// unmodified-prompt variant (rationale explaining why) when no LLM
    /// is configured, since there is nothing else to diversify from.
    pub async fn generate_variants(
        &self,
        pattern: &FailurePattern,
        num_variants: usize,
        provider: Option<&ResolvedProvider>,
    ) -> Vec<PromptVariant> {
        let current_prompt = match self.registry.load_prompt(&pattern.agent_name).await {
            Ok(Some(p)) => p,
            Ok(None) => {
                warn!(agent = %pattern.agent_name, "no current prompt registered, cannot generate variants");
                return Vec::new();
            }
            Err(e) => {
                warn!(agent = %pattern.agent_name, error = %e, "failed to load current prompt");
                return Vec::new();
            }
        };

        let Some(resolved) = provider else {
            return Vec::new();
        };

        let raw_variants = self
            .generate_with_llm(pattern, &current_prompt, num_variants, resolved)
            .await;

        raw_variants
            .into_iter()
            .map(|raw| self.build_variant(pattern, raw))
            .collect()
    }

    async fn generate_with_llm(
        &self,
        pattern: &FailurePattern,
        current_prompt: &str,
        num_variants: usize,
        resolved: &ResolvedProvider,
    ) -> Vec<RawVariant> {
        let hypotheses: String = pattern
            .root_cause_hypotheses
            .iter()
            .enumerate()
            .map(|(i, h)| format!("{}. {h}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "The \"{}\" agent's prompt below is producing responses that score poorly on \
             \"{}\" ({} failures, avg score {:.2}).\n\n\
             Current prompt:\n---\n{current_prompt}\n---\n\n\
             Suspected root causes:\n{hypotheses}\n\n\
             Propose {num_variants} revised versions of this prompt, each addressing one or more \
             of the root causes above. Respond with a JSON array of objects, each with keys \
             \"prompt\" (the full revised prompt text), \"rationale\" (why this change should help), \
             and \"addresses_hypotheses\" (a list of the 1-based hypothesis numbers it targets). \
             Output ONLY the JSON array.",
            pattern.agent_name, pattern.criterion_id, pattern.frequency, pattern.avg_score,
        );

        match resolved.provider.generate(&prompt, 1500).await {
            Ok(text) => parse_variants(&text).unwrap_or_default(),
            Err(e) => {
                warn!(agent = %pattern.agent_name, error = %e, "variant generation failed");
                Vec::new()
            }
        }
    }

    fn build_variant(&self, pattern: &FailurePattern, raw: RawVariant) -> PromptVariant {
        let count = self.variant_counter.fetch_add(1, Ordering::Relaxed) + 1;
        PromptVariant {
            id: format!("var:{}:{count:03}", pattern.agent_name),
            agent_name: pattern.agent_name.clone(),
            prompt_content: raw.prompt,
            rationale: raw.rationale,
            addresses_hypotheses: raw.addresses_hypotheses,
            failure_pattern_id: pattern.id.clone(),
            created_at: chrono::Utc::now(),
        }
    }

    /// Write `variant` into the registry as a new, inactive version —
    /// activation is a separate, human-gated step.
    pub async fn apply_variant(
        &self,
        variant: &PromptVariant,
        performance_delta: f64,
        test_results: Option<serde_json::Value>,
    ) -> crate::error::EngineResult<PromptVersion> {
        self.registry
            .create_version(
                &variant.agent_name,
                &variant.prompt_content,
                &variant.rationale,
                Some(&variant.failure_pattern_id),
                performance_delta,
                test_results,
                VersionBump::Patch,
            )
            .await
    }

    /// A terse unified-style diff between the current and variant prompt,
    /// line by line: prefixes removed lines with `-`, added lines with
    /// `+`, unchanged lines with a space. Good enough for a human
    /// reviewer comparing two short prompt texts side by side.
    pub fn generate_diff(current: &str, variant: &str) -> String {
        let current_lines: Vec<&str> = current.lines().collect();
        let variant_lines: Vec<&str> = variant.lines().collect();
        let mut out = String::new();
        for line in &current_lines {
            if !variant_lines.contains(line) {
                out.push_str("-");
                out.push_str(line);
                out.push('\n');
            }
        }
        for line in &variant_lines {
            if !current_lines.contains(line) {
                out.push_str("+");
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}

fn parse_variants(text: &str) -> Option<Vec<RawVariant>> {
    let re = Regex::new(r"(?s)\[.*\]").ok()?;
    let matched = re.find(text)?;
    serde_json::from_str(matched.as_str()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_variants_extracts_json_array() {
        let text = "sure, here:\n[{\"prompt\": \"p\", \"rationale\": \"r\", \"addresses_hypotheses\": [1]}]";
        let variants = parse_variants(text).unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].prompt, "p");
        assert_eq!(variants[0].addresses_hypotheses, vec![1]);
    }

    #[test]
    fn parse_variants_none_on_garbage() {
        assert!(parse_variants("not json").is_none());
    }

    #[test]
    fn generate_diff_marks_added_and_removed_lines() {
        let diff = VariantGenerator::generate_diff("line one\nline two", "line one\nline three");
        assert!(diff.contains("-line two"));
        assert!(diff.contains("+line three"));
        assert!(!diff.contains("line one"));
    }
}
