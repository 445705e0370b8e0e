//! Search Planner: turns an intent plus normalized entities into a
//! concrete `SearchStrategy` — which Cypher template to run, its bound
//! parameters, and whether to also consult the vector store.
//!
//! Grounded on `search_planner.py`'s template-selection table and entity
//! type detection via regex patterns.

use crate::config::CypherTemplatesConfig;
use crate::types::{Intent, PropertyValue, RetrievalType, SearchStrategy};
use regex::Regex;
use std::collections::HashMap;

/// Detect the entity "type" (as named in `entity_patterns`) a mention
/// most plausibly belongs to, by regex match against its surface form.
fn detect_entity_type(entity: &str, patterns: &HashMap<String, Vec<String>>) -> Option<String> {
    for (entity_type, regexes) in patterns {
        for pattern in regexes {
            if let Ok(re) = Regex::new(&format!("(?i){pattern}")) {
                if re.is_match(entity) {
                    return Some(entity_type.clone());
                }
            }
        }
    }
    None
}

fn find_template<'a>(
    config: &'a CypherTemplatesConfig,
    intent: &str,
    entity_type: Option<&str>,
) -> Option<(&'a str, &'a crate::config::CypherTemplate)> {
    config
        .templates
        .iter()
        .find(|(_, t)| {
            t.intent.contains(intent)
                && entity_type
                    .map(|et| t.entity_types.iter().any(|e| e == et))
                    .unwrap_or(t.entity_types.is_empty())
        })
        .map(|(name, t)| (name.as_str(), t))
}

/// Plan a search strategy for `intent`, `entities`, and the raw `query`
/// text against the configured Cypher template catalog.
///
/// Retrieval mode follows a fixed table: `expansion`, and any intent with
/// no matching template, go `vector_first` (the graph has nothing useful
/// to say); `lookup`/`exploration`/`path_trace` with a resolved template
/// go `hybrid`, augmenting the graph result with vector context; every
/// other templated intent stays `graph_only`.
pub fn plan(intent: Intent, entities: &[String], query: &str, config: &CypherTemplatesConfig) -> SearchStrategy {
    if intent == Intent::OutOfScope {
        return SearchStrategy {
            retrieval_type: Some(RetrievalType::None),
            message: Some("query is outside the corpus' scope".to_string()),
            ..Default::default()
        };
    }

    if intent == Intent::Expansion {
        return SearchStrategy {
            retrieval_type: Some(RetrievalType::VectorFirst),
            vector_query: Some(query.to_string()),
            ..Default::default()
        };
    }

    let entity_type = entities
        .first()
        .and_then(|e| detect_entity_type(e, &config.entity_patterns));

    let template = find_template(config, intent.as_str(), entity_type.as_deref()).or_else(|| {
        config
            .default_templates
            .get(intent.as_str())
            .and_then(|name| config.templates.get(name).map(|t| (name.as_str(), t)))
    });

    let Some((template_key, template)) = template else {
        // No matching template: fall back to vector-first, letting the
        // embedding index carry the whole query.
        return SearchStrategy {
            retrieval_type: Some(RetrievalType::VectorFirst),
            vector_query: Some(query.to_string()),
            ..Default::default()
        };
    };

    let mut parameters = HashMap::new();
    for (i, param) in template.params.iter().enumerate() {
        if let Some(entity) = entities.get(i).or_else(|| entities.first()) {
            parameters.insert(param.clone(), PropertyValue::Str(entity.clone()));
        }
    }
    if template.params.iter().any(|p| p == "entity_ids") {
        // Multi-value params (e.g. comparison's two-entity templates) are
        // carried as a JSON-ish comma join; the graph client only binds
        // scalar params, so callers needing a list build it at execution
        // time from `entities` directly rather than through `parameters`.
    }

    let retrieval_type = match intent {
        Intent::Lookup | Intent::Exploration | Intent::PathTrace => RetrievalType::Hybrid,
        _ => RetrievalType::GraphOnly,
    };

    SearchStrategy {
        retrieval_type: Some(retrieval_type),
        cypher_template: Some(template.cypher.clone()),
        parameters,
        template_key: Some(template_key.to_string()),
        vector_query: (retrieval_type == RetrievalType::Hybrid).then(|| query.to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CypherTemplate, TemplateIntents};

    fn config_with_lookup_template() -> CypherTemplatesConfig {
        let mut templates = HashMap::new();
        templates.insert(
            "lookup_method".to_string(),
            CypherTemplate {
                intent: TemplateIntents::One("lookup".to_string()),
                entity_types: vec!["method".to_string()],
                params: vec!["entity_id".to_string()],
                cypher: "MATCH (n:Method {id: $entity_id}) RETURN n".to_string(),
            },
        );
        let mut entity_patterns = HashMap::new();
        entity_patterns.insert("method".to_string(), vec!["^m:".to_string()]);
        CypherTemplatesConfig {
            templates,
            entity_patterns,
            default_templates: HashMap::new(),
        }
    }

    #[test]
    fn out_of_scope_plans_no_retrieval() {
        let strategy = plan(Intent::OutOfScope, &[], "irrelevant query", &CypherTemplatesConfig::default());
        assert_eq!(strategy.retrieval_type, Some(RetrievalType::None));
        assert!(strategy.message.is_some());
    }

    #[test]
    fn lookup_with_matching_entity_type_selects_hybrid_template() {
        let config = config_with_lookup_template();
        let strategy = plan(Intent::Lookup, &["m:react".to_string()], "what is react?", &config);
        assert_eq!(strategy.retrieval_type, Some(RetrievalType::Hybrid));
        assert_eq!(strategy.template_key, Some("lookup_method".to_string()));
        assert_eq!(
            strategy.parameters.get("entity_id"),
            Some(&PropertyValue::Str("m:react".to_string()))
        );
        assert_eq!(strategy.vector_query, Some("what is react?".to_string()));
    }

    #[test]
    fn aggregation_with_matching_template_stays_graph_only() {
        let mut config = config_with_lookup_template();
        config.templates.get_mut("lookup_method").unwrap().intent =
            TemplateIntents::One("aggregation".to_string());
        let strategy = plan(Intent::Aggregation, &["m:react".to_string()], "how many methods", &config);
        assert_eq!(strategy.retrieval_type, Some(RetrievalType::GraphOnly));
        assert_eq!(strategy.vector_query, None);
    }

    #[test]
    fn unmatched_entity_falls_back_to_vector_first() {
        let config = config_with_lookup_template();
        let strategy = plan(Intent::Lookup, &["unknown thing".to_string()], "unknown thing", &config);
        assert_eq!(strategy.retrieval_type, Some(RetrievalType::VectorFirst));
        assert_eq!(strategy.vector_query, Some("unknown thing".to_string()));
    }

    #[test]
    fn expansion_always_plans_vector_first_with_no_template() {
        let config = config_with_lookup_template();
        let strategy = plan(
            Intent::Expansion,
            &["m:react".to_string()],
            "latest agent frameworks in 2025",
            &config,
        );
        assert_eq!(strategy.retrieval_type, Some(RetrievalType::VectorFirst));
        assert_eq!(strategy.cypher_template, None);
        assert_eq!(strategy.vector_query, Some("latest agent frameworks in 2025".to_string()));
    }
}
