//! Error taxonomy for the retrieval pipeline, critic, and optimizer.
//!
//! Stage-level failures are caught at stage boundaries and reduced to a
//! `StageOutcome::Failed` pushed onto the query context (see `types.rs`);
//! only `PromptRegistry::activate_version` / `rollback` propagate an
//! `EngineError` all the way to the HTTP boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing config file, malformed YAML. Fatal at startup, degrades to
    /// defaults at runtime.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No API key, or provider construction failed. Non-fatal: callers
    /// treat this as `None` and fall back to heuristic paths.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Graph or vector collaborator call failed or timed out.
    #[error("retrieval error: {0}")]
    Retrieval(String),

    /// LLM call failed during answer generation.
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Scoring failed; evaluation is skipped.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// Duplicate-content version creation, or activation target missing.
    /// The only variant allowed to abort a request.
    #[error("registry invariant violated: {0}")]
    RegistryInvariant(String),

    /// Malformed request or unknown agent at the HTTP boundary.
    #[error("validation error: {0}")]
    Validation(String),
}

impl EngineError {
    /// HTTP status code this taxonomy variant maps to at the API boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Validation(_) => 400,
            EngineError::RegistryInvariant(msg) => {
                if msg.contains("not found") || msg.contains("no parent") {
                    404
                } else {
                    409
                }
            }
            EngineError::Configuration(_) => 500,
            EngineError::ProviderUnavailable(_) => 503,
            EngineError::Retrieval(_) => 503,
            EngineError::Synthesis(_) => 500,
            EngineError::Evaluation(_) => 500,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
