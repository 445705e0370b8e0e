//! Text embedding collaborator: a local ONNX model for the offline path
//! and a remote HTTP embedding API, selected by `EMBEDDING_PROVIDER`.
//!
//! The local path reuses the ONNX tokenize/infer/mean-pool/L2-normalize
//! pipeline from `embeddings.rs`'s `SemanticEngine`, scoped to arbitrary
//! corpus text instead of principle rows. The remote path is grounded on
//! `embedder.py`'s `EmbeddingClient`.

use crate::config::Settings;
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use ndarray::Array2;
use ort::{
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenizers::Tokenizer;
use tokio::sync::Mutex;

pub const EMBEDDING_DIM: usize = 384;
const MAX_SEQ_LEN: usize = 256;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>>;
    fn dimension(&self) -> usize;
}

/// Local all-MiniLM-L6-v2 model, run through `ort`. Session state is
/// behind a `Mutex` since `ort::Session::run` takes `&mut self` and the
/// provider is shared across concurrent query tasks via `Arc`.
pub struct LocalEmbedder {
    inner: Mutex<LocalEmbedderState>,
}

struct LocalEmbedderState {
    session: Session,
    tokenizer: Tokenizer,
}

impl LocalEmbedder {
    pub fn load(model_dir: &Path) -> EngineResult<Self> {
        std::fs::create_dir_all(model_dir)
            .map_err(|e| EngineError::Configuration(format!("creating model dir: {e}")))?;

        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        if !model_path.exists() || !tokenizer_path.exists() {
            Self::download_model(model_dir)?;
        }

        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(4))
            .and_then(|b| b.commit_from_file(&model_path))
            .map_err(|e| EngineError::Configuration(format!("loading ONNX model: {e}")))?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EngineError::Configuration(format!("loading tokenizer: {e}")))?;

        Ok(Self {
            inner: Mutex::new(LocalEmbedderState { session, tokenizer }),
        })
    }

    fn download_model(model_dir: &Path) -> EngineResult<()> {
        use hf_hub::api::sync::Api;

        let api = Api::new()
            .map_err(|e| EngineError::Configuration(format!("hf-hub API init: {e}")))?;
        let repo = api.model("sentence-transformers/all-MiniLM-L6-v2".to_string());

        let model_path = repo
            .get("onnx/model.onnx")
            .map_err(|e| EngineError::Configuration(format!("downloading model: {e}")))?;
        std::fs::copy(&model_path, model_dir.join("model.onnx"))
            .map_err(|e| EngineError::Configuration(format!("copying model: {e}")))?;

        let tokenizer_path = repo
            .get("tokenizer.json")
            .map_err(|e| EngineError::Configuration(format!("downloading tokenizer: {e}")))?;
        std::fs::copy(&tokenizer_path, model_dir.join("tokenizer.json"))
            .map_err(|e| EngineError::Configuration(format!("copying tokenizer: {e}")))?;

        Ok(())
    }

    fn mean_pool_flat(data: &[f32], seq_len: usize, shape: &[i64]) -> Vec<f32> {
        let mut result = vec![0.0f32; EMBEDDING_DIM];
        let embed_dim = if shape.len() >= 3 {
            shape[2] as usize
        } else {
            EMBEDDING_DIM
        };
        for i in 0..seq_len {
            for j in 0..embed_dim.min(EMBEDDING_DIM) {
                let idx = i * embed_dim + j;
                if idx < data.len() {
                    result[j] += data[idx];
                }
            }
        }
        for v in result.iter_mut() {
            *v /= seq_len.max(1) as f32;
        }
        result
    }

    fn l2_normalize(vec: &[f32]) -> Vec<f32> {
        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vec.iter().map(|x| x / norm).collect()
        } else {
            vec.to_vec()
        }
    }

    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let mut state = self.inner.lock().await;

        let encoding = state
            .tokenizer
            .encode(text, true)
            .map_err(|e| EngineError::Retrieval(format!("tokenization failed: {e}")))?;

        let ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let token_type_ids: Vec<i64> = vec![0i64; ids.len()];

        let len = ids.len().min(MAX_SEQ_LEN).max(1);
        let ids = &ids[..len];
        let attention_mask = &attention_mask[..len];
        let token_type_ids = &token_type_ids[..len];

        let input_ids = Array2::from_shape_vec((1, len), ids.to_vec())
            .map_err(|e| EngineError::Retrieval(e.to_string()))?;
        let attention = Array2::from_shape_vec((1, len), attention_mask.to_vec())
            .map_err(|e| EngineError::Retrieval(e.to_string()))?;
        let token_types = Array2::from_shape_vec((1, len), token_type_ids.to_vec())
            .map_err(|e| EngineError::Retrieval(e.to_string()))?;

        let outputs = state
            .session
            .run(inputs![
                "input_ids" => Tensor::from_array(input_ids).map_err(|e| EngineError::Retrieval(e.to_string()))?,
                "attention_mask" => Tensor::from_array(attention).map_err(|e| EngineError::Retrieval(e.to_string()))?,
                "token_type_ids" => Tensor::from_array(token_types).map_err(|e| EngineError::Retrieval(e.to_string()))?,
            ])
            .map_err(|e| EngineError::Retrieval(format!("ONNX inference failed: {e}")))?;

        let output = outputs
            .get("last_hidden_state")
            .or_else(|| outputs.get("token_embeddings"))
            .ok_or_else(|| EngineError::Retrieval("no embedding output found".to_string()))?;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::Retrieval(e.to_string()))?;
        let shape_vec: Vec<i64> = shape.iter().copied().collect();
        let data_vec: Vec<f32> = data.to_vec();
        drop(outputs);

        let embedding = Self::mean_pool_flat(&data_vec, len, &shape_vec);
        Ok(Self::l2_normalize(&embedding))
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}

pub fn default_model_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kg-answer-engine")
        .join("models")
        .join("minilm")
}

/// Remote OpenAI-compatible embeddings endpoint, grounded on `embedder.py`'s
/// `EmbeddingClient`.
pub struct RemoteEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl RemoteEmbedder {
    pub fn new(api_key: String, model: String) -> EngineResult<Self> {
        let client = reqwest::ClientBuilder::new()
            .build()
            .map_err(|e| EngineError::Configuration(format!("building HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            model,
            dimension: 1536,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedder {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "model": self.model, "input": text }))
            .send()
            .await
            .map_err(|e| EngineError::ProviderUnavailable(format!("embedding request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::ProviderUnavailable(format!(
                "embedding API returned {}",
                response.status()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EngineError::ProviderUnavailable(format!("decoding embedding response: {e}")))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EngineError::ProviderUnavailable("embedding response had no data".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Build the embedding provider named by `EMBEDDING_PROVIDER` (`local` runs
/// the bundled ONNX model; anything else is looked up in `providers.yaml`
/// and dispatched to a remote HTTP embedder).
pub fn build_embedding_provider(settings: &Settings) -> EngineResult<Arc<dyn EmbeddingProvider>> {
    if settings.embedding_provider == "local" {
        let embedder = LocalEmbedder::load(&default_model_dir())?;
        return Ok(Arc::new(embedder));
    }

    let api_key = Settings::api_key_for("OPENAI_API_KEY").ok_or_else(|| {
        EngineError::ProviderUnavailable(format!(
            "no API key configured for embedding provider '{}'",
            settings.embedding_provider
        ))
    })?;
    let model = settings
        .embedding_model
        .clone()
        .unwrap_or_else(|| "text-embedding-3-small".to_string());
    Ok(Arc::new(RemoteEmbedder::new(api_key, model)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((LocalEmbedder::cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(LocalEmbedder::cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_produces_unit_vector() {
        let v = LocalEmbedder::l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }
}
