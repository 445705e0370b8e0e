//! Critic Evaluator: scores agent outputs against weighted rubrics and
//! produces improvement feedback for low-scoring responses.

pub mod evaluator;
pub mod scorer;
pub mod store;

pub use evaluator::CriticEvaluator;
pub use scorer::EvalContext;
pub use store::{list_evaluations, persist_evaluation};
