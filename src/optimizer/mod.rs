//! Prompt optimization loop: mine low-scoring evaluations into failure
//! patterns, generate LLM-authored prompt variants, A/B test them against
//! a held-out query set, and gate promotion through a versioned,
//! human-approved prompt registry.
//!
//! Grounded on `optimizer/analyzer.py`, `optimizer/generator.py`,
//! `optimizer/registry.py`, and `optimizer/runner.py`.

pub mod analyzer;
pub mod generator;
pub mod registry;
pub mod runner;

pub use analyzer::FailureAnalyzer;
pub use generator::VariantGenerator;
pub use registry::PromptRegistry;
pub use runner::TestRunner;
