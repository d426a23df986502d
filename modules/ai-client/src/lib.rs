mod client;
mod schema;
mod types;

pub use client::AiClient;
pub use schema::StructuredOutput;
pub use types::{ChatRequest, EmbeddingData, EmbeddingResponse, WireMessage};

use anyhow::Result;
use async_trait::async_trait;

/// Embedding provider seam. Implemented by [`AiClient`] for production and by
/// in-memory fakes in tests.
#[async_trait]
pub trait EmbedProvider: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Name of the model the vectors came from.
    fn model_name(&self) -> &str;
}

#[async_trait]
impl EmbedProvider for AiClient {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        AiClient::embed_batch(self, texts).await
    }

    fn model_name(&self) -> &str {
        self.embedding_model()
    }
}
