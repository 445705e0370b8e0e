//! Retrieval collaborators: text embedding, the vector store, and web
//! search. The graph collaborator lives in `crate::graph` since it is
//! shared with the write-side (prompt registry's graph-backed history).

pub mod embedder;
pub mod vector_store;
pub mod web_search;

pub use embedder::{build_embedding_provider, EmbeddingProvider};
pub use vector_store::{SqliteVectorStore, VectorStore};
pub use web_search::{url_fingerprint, TavilySearch, WebSearchProvider, WebSearchResult};
