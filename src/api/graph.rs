//! Graph read/write routes: `GET /graph/principles`, and the two-step
//! KG-writer flow (`POST /graph/nodes/propose` / `approve`) that lets a
//! human turn a web search hit into a durable `Method`/`Implementation`/
//! `Document` node plus its vector-store entry.
//!
//! Grounded on `kg_writer.py`'s `propose_node`/`approve_node`.

use crate::api::{ApiError, AppState};
use crate::error::EngineError;
use crate::types::{PropertyValue, SerializedRecord, SerializedValue, VectorHit, VectorSourceType};
use axum::extract::State;
use axum::Json;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

// ---------------------------------------------------------------------------
// GET /graph/principles
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct PrincipleSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub method_count: i64,
    pub impl_count: i64,
}

fn prop_str(record: &SerializedRecord, column: &str) -> String {
    match record.get(column) {
        Some(SerializedValue::Scalar(PropertyValue::Str(s))) => s.clone(),
        _ => String::new(),
    }
}

fn prop_int(record: &SerializedRecord, column: &str) -> i64 {
    match record.get(column) {
        Some(SerializedValue::Scalar(PropertyValue::Int(i))) => *i,
        _ => 0,
    }
}

pub async fn list_principles(
    State(state): State<AppState>,
) -> Result<Json<Vec<PrincipleSummary>>, ApiError> {
    const CYPHER: &str = "MATCH (p:Principle) \
         OPTIONAL MATCH (m:Method)-[:ADDRESSES]->(p) \
         OPTIONAL MATCH (i:Implementation)-[:IMPLEMENTS]->(m) \
         RETURN p.id AS id, p.name AS name, p.description AS description, \
                count(DISTINCT m) AS method_count, count(DISTINCT i) AS impl_count \
         ORDER BY p.id";
    let records = state.graph.execute_template(CYPHER, &HashMap::new()).await?;
    Ok(Json(
        records
            .iter()
            .map(|r| PrincipleSummary {
                id: prop_str(r, "id"),
                name: prop_str(r, "name"),
                description: prop_str(r, "description"),
                method_count: prop_int(r, "method_count"),
                impl_count: prop_int(r, "impl_count"),
            })
            .collect(),
    ))
}

// ---------------------------------------------------------------------------
// Shared node-proposal shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AddressEntry {
    pub principle: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_role() -> String {
    "primary".to_string()
}
fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImplementsEntry {
    pub method: String,
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "first_class".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProposedNode {
    pub node_type: String,
    pub node_id: String,
    pub name: String,
    pub description: String,

    #[serde(default)]
    pub method_family: Option<String>,
    #[serde(default)]
    pub method_type: Option<String>,
    #[serde(default)]
    pub granularity: Option<String>,
    #[serde(default)]
    pub addresses: Option<Vec<AddressEntry>>,

    #[serde(default)]
    pub impl_type: Option<String>,
    #[serde(default)]
    pub maintainer: Option<String>,
    #[serde(default)]
    pub source_repo: Option<String>,
    #[serde(default)]
    pub implements: Option<Vec<ImplementsEntry>>,

    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub authors: Option<Vec<String>>,
    #[serde(default)]
    pub year: Option<i64>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub proposes: Option<Vec<String>>,

    pub source_url: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub exists_in_kg: bool,
    #[serde(default)]
    pub existing_description: Option<String>,
    /// Only meaningful on the `approve` request: update an existing node
    /// instead of refusing because it already exists.
    #[serde(default)]
    pub update_mode: bool,
}

fn default_confidence() -> f64 {
    0.7
}

// ---------------------------------------------------------------------------
// POST /graph/nodes/propose
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct WebResultRequest {
    pub title: String,
    pub url: String,
    pub content: String,
}

#[derive(Debug, Deserialize, Default)]
struct RawExtraction {
    #[serde(default)]
    node_type: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    method_family: Option<String>,
    #[serde(default)]
    method_type: Option<String>,
    #[serde(default)]
    granularity: Option<String>,
    #[serde(default)]
    addresses: Option<Vec<AddressEntry>>,
    #[serde(default)]
    impl_type: Option<String>,
    #[serde(default)]
    maintainer: Option<String>,
    #[serde(default)]
    source_repo: Option<String>,
    #[serde(default)]
    implements: Option<Vec<ImplementsEntry>>,
    #[serde(default)]
    doc_type: Option<String>,
    #[serde(default)]
    authors: Option<Vec<String>>,
    #[serde(default)]
    year: Option<i64>,
    #[serde(default)]
    venue: Option<String>,
    #[serde(default)]
    proposes: Option<Vec<String>>,
    #[serde(default)]
    confidence: Option<f64>,
}

const EXTRACTION_PROMPT_PREAMBLE: &str = "You are an expert at extracting structured knowledge from \
web content about AI agents and LLMs. Determine whether the entity described is a Method (a \
technique, algorithm, or approach), an Implementation (a framework, library, or tool), or a \
Document (a paper, article, or documentation page). Extract it as a single JSON object with keys \
matching a Method/Implementation/Document node as appropriate (node_type, name, description, plus \
the type-specific fields). Output ONLY the JSON object, optionally inside a ```json code fence.";

fn extract_json_object(text: &str) -> Option<&str> {
    if let Ok(fenced) = Regex::new(r"(?s)```json\s*(\{.*?\})\s*```") {
        if let Some(captures) = fenced.captures(text) {
            return captures.get(1).map(|m| m.as_str());
        }
    }
    Regex::new(r"(?s)\{.*\}").ok()?.find(text).map(|m| m.as_str())
}

fn node_id_prefix(node_type: &str) -> &'static str {
    match node_type {
        "Implementation" => "impl:",
        "Document" => "doc:",
        _ => "m:",
    }
}

fn slugify(name: &str) -> String {
    name.to_lowercase()
        .replace(' ', "-")
        .replace('_', "-")
        .chars()
        .take(30)
        .collect()
}

async fn find_existing_node(
    state: &AppState,
    node_id: &str,
    name: &str,
    label: &str,
) -> Result<Option<(String, Option<String>)>, ApiError> {
    let by_id = state
        .graph
        .execute_template(
            "MATCH (n {id: $id}) RETURN n.id AS id, n.description AS description",
            &HashMap::from([("id".to_string(), PropertyValue::Str(node_id.to_string()))]),
        )
        .await?;
    if let Some(record) = by_id.first() {
        return Ok(Some((prop_str(record, "id"), Some(prop_str(record, "description")))));
    }

    let cypher = format!(
        "MATCH (n:{label}) WHERE toLower(n.name) = toLower($name) \
         RETURN n.id AS id, n.description AS description"
    );
    let by_name = state
        .graph
        .execute_template(&cypher, &HashMap::from([("name".to_string(), PropertyValue::Str(name.to_string()))]))
        .await?;
    Ok(by_name
        .first()
        .map(|record| (prop_str(record, "id"), Some(prop_str(record, "description")))))
}

pub async fn propose_node(
    State(state): State<AppState>,
    Json(req): Json<WebResultRequest>,
) -> Result<Json<ProposedNode>, ApiError> {
    let llm = state.deps.llm.as_ref().ok_or_else(|| {
        ApiError(EngineError::ProviderUnavailable(
            "no LLM provider available for node proposal".to_string(),
        ))
    })?;

    let truncated: String = req.content.chars().take(3000).collect();
    let prompt = format!(
        "{EXTRACTION_PROMPT_PREAMBLE}\n\nTITLE: {}\nURL: {}\nCONTENT:\n{truncated}",
        req.title, req.url
    );

    let response = llm
        .provider
        .generate(&prompt, 1000)
        .await
        .map_err(ApiError)?;

    let json_str = extract_json_object(&response).ok_or_else(|| {
        ApiError(EngineError::Synthesis(
            "LLM response did not contain a JSON node proposal".to_string(),
        ))
    })?;
    let raw: RawExtraction = serde_json::from_str(json_str)
        .map_err(|e| ApiError(EngineError::Synthesis(format!("malformed node proposal JSON: {e}"))))?;

    let node_type = raw.node_type.unwrap_or_else(|| "Method".to_string());
    let name = raw.name.unwrap_or_else(|| "unknown".to_string());
    let mut node_id = format!("{}{}", node_id_prefix(&node_type), slugify(&name));

    let label = node_type.as_str();
    let mut exists_in_kg = false;
    let mut existing_description = None;
    match find_existing_node(&state, &node_id, &name, label).await {
        Ok(Some((existing_id, description))) => {
            node_id = existing_id;
            exists_in_kg = true;
            existing_description = description;
        }
        Ok(None) => {}
        Err(e) => warn!(error = ?e.0, "error checking for existing node"),
    }

    Ok(Json(ProposedNode {
        node_type,
        node_id,
        name,
        description: raw.description.unwrap_or_default(),
        method_family: raw.method_family,
        method_type: raw.method_type,
        granularity: raw.granularity,
        addresses: raw.addresses,
        impl_type: raw.impl_type,
        maintainer: raw.maintainer,
        source_repo: raw.source_repo,
        implements: raw.implements,
        doc_type: raw.doc_type,
        authors: raw.authors,
        year: raw.year,
        venue: raw.venue,
        proposes: raw.proposes,
        source_url: req.url,
        confidence: raw.confidence.unwrap_or(0.7),
        exists_in_kg,
        existing_description,
        update_mode: false,
    }))
}

// ---------------------------------------------------------------------------
// POST /graph/nodes/approve
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ApprovalResult {
    pub success: bool,
    pub node_id: String,
    pub message: String,
}

fn str_param(value: &str) -> PropertyValue {
    PropertyValue::Str(value.to_string())
}

async fn upsert_method_node(state: &AppState, proposed: &ProposedNode) -> Result<(), ApiError> {
    const CYPHER: &str = "MERGE (m:Method {id: $id}) SET \
         m.name = $name, m.description = $description, m.method_family = $method_family, \
         m.method_type = $method_type, m.granularity = $granularity, m.source_url = $source_url";
    let params = HashMap::from([
        ("id".to_string(), str_param(&proposed.node_id)),
        ("name".to_string(), str_param(&proposed.name)),
        ("description".to_string(), str_param(&proposed.description)),
        ("method_family".to_string(), str_param(proposed.method_family.as_deref().unwrap_or(""))),
        ("method_type".to_string(), str_param(proposed.method_type.as_deref().unwrap_or(""))),
        ("granularity".to_string(), str_param(proposed.granularity.as_deref().unwrap_or("atomic"))),
        ("source_url".to_string(), str_param(&proposed.source_url)),
    ]);
    state.graph.execute_template(CYPHER, &params).await?;

    for addr in proposed.addresses.as_deref().unwrap_or(&[]) {
        const REL_CYPHER: &str = "MATCH (m:Method {id: $method_id}) MATCH (p:Principle {id: $principle_id}) \
             MERGE (m)-[r:ADDRESSES]->(p) SET r.role = $role, r.weight = $weight";
        let rel_params = HashMap::from([
            ("method_id".to_string(), str_param(&proposed.node_id)),
            ("principle_id".to_string(), str_param(&addr.principle)),
            ("role".to_string(), str_param(&addr.role)),
            ("weight".to_string(), PropertyValue::Float(addr.weight)),
        ]);
        state.graph.execute_template(REL_CYPHER, &rel_params).await?;
    }
    Ok(())
}

async fn upsert_implementation_node(state: &AppState, proposed: &ProposedNode) -> Result<(), ApiError> {
    const CYPHER: &str = "MERGE (i:Implementation {id: $id}) SET \
         i.name = $name, i.description = $description, i.impl_type = $impl_type, \
         i.maintainer = $maintainer, i.source_repo = $source_repo, i.source_url = $source_url";
    let params = HashMap::from([
        ("id".to_string(), str_param(&proposed.node_id)),
        ("name".to_string(), str_param(&proposed.name)),
        ("description".to_string(), str_param(&proposed.description)),
        ("impl_type".to_string(), str_param(proposed.impl_type.as_deref().unwrap_or(""))),
        ("maintainer".to_string(), str_param(proposed.maintainer.as_deref().unwrap_or(""))),
        ("source_repo".to_string(), str_param(proposed.source_repo.as_deref().unwrap_or(""))),
        ("source_url".to_string(), str_param(&proposed.source_url)),
    ]);
    state.graph.execute_template(CYPHER, &params).await?;

    for impl_entry in proposed.implements.as_deref().unwrap_or(&[]) {
        const REL_CYPHER: &str = "MATCH (i:Implementation {id: $impl_id}) MATCH (m:Method {id: $method_id}) \
             MERGE (i)-[r:IMPLEMENTS]->(m) SET r.support_level = $level";
        let rel_params = HashMap::from([
            ("impl_id".to_string(), str_param(&proposed.node_id)),
            ("method_id".to_string(), str_param(&impl_entry.method)),
            ("level".to_string(), str_param(&impl_entry.level)),
        ]);
        state.graph.execute_template(REL_CYPHER, &rel_params).await?;
    }
    Ok(())
}

async fn upsert_document_node(state: &AppState, proposed: &ProposedNode) -> Result<(), ApiError> {
    const CYPHER: &str = "MERGE (d:Document {id: $id}) SET \
         d.title = $name, d.abstract = $description, d.doc_type = $doc_type, \
         d.authors = $authors, d.venue = $venue, d.source_url = $source_url";
    let params = HashMap::from([
        ("id".to_string(), str_param(&proposed.node_id)),
        ("name".to_string(), str_param(&proposed.name)),
        ("description".to_string(), str_param(&proposed.description)),
        ("doc_type".to_string(), str_param(proposed.doc_type.as_deref().unwrap_or("paper"))),
        ("authors".to_string(), str_param(&proposed.authors.clone().unwrap_or_default().join(", "))),
        ("venue".to_string(), str_param(proposed.venue.as_deref().unwrap_or(""))),
        ("source_url".to_string(), str_param(&proposed.source_url)),
    ]);
    state.graph.execute_template(CYPHER, &params).await?;

    for method_id in proposed.proposes.as_deref().unwrap_or(&[]) {
        const REL_CYPHER: &str = "MATCH (d:Document {id: $doc_id}) MATCH (m:Method {id: $method_id}) \
             MERGE (d)-[:PROPOSES]->(m)";
        let rel_params = HashMap::from([
            ("doc_id".to_string(), str_param(&proposed.node_id)),
            ("method_id".to_string(), str_param(method_id)),
        ]);
        state.graph.execute_template(REL_CYPHER, &rel_params).await?;
    }
    Ok(())
}

fn vdb_text(proposed: &ProposedNode) -> String {
    let mut lines = vec![
        format!("[{}] {}", proposed.node_type, proposed.name),
        format!("Description: {}", proposed.description),
    ];
    match proposed.node_type.as_str() {
        "Method" => {
            if let Some(family) = &proposed.method_family {
                lines.push(format!("Family: {family}"));
            }
        }
        "Implementation" => {
            if let Some(impl_type) = &proposed.impl_type {
                lines.push(format!("Type: {impl_type}"));
            }
            if let Some(maintainer) = &proposed.maintainer {
                lines.push(format!("Maintainer: {maintainer}"));
            }
        }
        "Document" => {
            if let Some(authors) = &proposed.authors {
                lines.push(format!("Authors: {}", authors.join(", ")));
            }
        }
        _ => {}
    }
    lines.join("\n")
}

pub async fn approve_node(
    State(state): State<AppState>,
    Json(proposed): Json<ProposedNode>,
) -> Result<Json<ApprovalResult>, ApiError> {
    let existing = state
        .graph
        .execute_template(
            "MATCH (n {id: $id}) RETURN n",
            &HashMap::from([("id".to_string(), str_param(&proposed.node_id))]),
        )
        .await?;
    let node_exists = !existing.is_empty();

    if node_exists && !proposed.update_mode {
        return Ok(Json(ApprovalResult {
            success: false,
            node_id: proposed.node_id.clone(),
            message: format!("Node {} already exists. Use update mode to modify.", proposed.node_id),
        }));
    }
    if !node_exists && proposed.update_mode {
        return Ok(Json(ApprovalResult {
            success: false,
            node_id: proposed.node_id.clone(),
            message: format!("Node {} not found. Cannot update non-existent node.", proposed.node_id),
        }));
    }

    match proposed.node_type.as_str() {
        "Method" => upsert_method_node(&state, &proposed).await?,
        "Implementation" => upsert_implementation_node(&state, &proposed).await?,
        "Document" => upsert_document_node(&state, &proposed).await?,
        other => {
            return Ok(Json(ApprovalResult {
                success: false,
                node_id: proposed.node_id.clone(),
                message: format!("Unknown node type: {other}"),
            }))
        }
    }

    let text = vdb_text(&proposed);
    match state.deps.embedder.embed(&text).await {
        Ok(embedding) => {
            let hit = VectorHit {
                source_type: VectorSourceType::KgNode,
                source_id: proposed.node_id.clone(),
                source_url: Some(proposed.source_url.clone()),
                node_id: Some(proposed.node_id.clone()),
                node_label: Some(proposed.node_type.clone()),
                title: proposed.name.clone(),
                text,
                score: 1.0,
                collected_at: Some(chrono::Utc::now().to_rfc3339()),
                collector: Some("kg_writer".to_string()),
            };
            if let Err(e) = state.deps.vector_store.upsert(hit, embedding).await {
                warn!(node_id = %proposed.node_id, error = %e, "failed to upsert node into vector store");
            }
        }
        Err(e) => warn!(node_id = %proposed.node_id, error = %e, "embedding failed, skipping vector store upsert"),
    }

    let action = if proposed.update_mode { "Updated" } else { "Created" };
    Ok(Json(ApprovalResult {
        success: true,
        node_id: proposed.node_id.clone(),
        message: format!("{action} {} node: {}", proposed.node_type, proposed.node_id),
    }))
}
