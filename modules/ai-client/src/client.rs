use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::schema::StructuredOutput;
use crate::types::*;

const CHAT_TIMEOUT: Duration = Duration::from_secs(20);
const EMBED_TIMEOUT: Duration = Duration::from_secs(30);

/// OpenAI-compatible API client. One instance per process; cheap to clone.
///
/// The bearer token is baked into each HTTP client as a sensitive default
/// header, so request code never touches credentials.
#[derive(Clone)]
pub struct AiClient {
    base_url: String,
    chat_model: String,
    embedding_model: String,
    chat_http: reqwest::Client,
    embed_http: reqwest::Client,
}

fn authed_http(api_key: &str, timeout: Duration) -> reqwest::Client {
    let mut token = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .expect("API key contains invalid header characters");
    token.set_sensitive(true);
    let mut defaults = HeaderMap::new();
    defaults.insert(AUTHORIZATION, token);
    reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(defaults)
        .build()
        .expect("Failed to build AI HTTP client")
}

impl AiClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            chat_http: authed_http(&api_key, CHAT_TIMEOUT),
            embed_http: authed_http(&api_key, EMBED_TIMEOUT),
        }
    }

    pub fn with_chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = model.into();
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    /// POST a JSON body and decode a JSON response; non-2xx becomes an error
    /// carrying the endpoint, status and response text.
    async fn post<Resp: DeserializeOwned>(
        &self,
        http: &reqwest::Client,
        endpoint: &str,
        body: &impl Serialize,
    ) -> Result<Resp> {
        let url = format!("{}/{endpoint}", self.base_url);
        let response = http.post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("{endpoint} returned {status}: {detail}"));
        }
        response
            .json()
            .await
            .with_context(|| format!("failed to decode {endpoint} response"))
    }

    /// Simple chat completion returning the assistant's text.
    pub async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest::new(&self.chat_model)
            .message(WireMessage::system(system))
            .message(WireMessage::user(user));
        debug!(model = %request.model, "chat request");

        let response: ChatResponse = self
            .post(&self.chat_http, "chat/completions", &request)
            .await?;
        first_choice(response)
    }

    /// Chat completion with an enforced JSON schema, deserialized into `T`.
    pub async fn structured<T: StructuredOutput>(&self, system: &str, user: &str) -> Result<T> {
        let request = ChatRequest::new(&self.chat_model)
            .message(WireMessage::system(system))
            .message(WireMessage::user(user))
            .json_schema(T::schema_name_str(), <T as StructuredOutput>::json_schema());
        debug!(model = %request.model, schema = %T::schema_name_str(), "structured request");

        let response: ChatResponse = self
            .post(&self.chat_http, "chat/completions", &request)
            .await?;
        let content = first_choice(response)?;
        serde_json::from_str(&content).context("failed to deserialize structured response")
    }

    /// Batch embeddings. The provider may reorder `data`; results are
    /// reassembled by `index` so output order always matches input order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input: texts.to_vec(),
        };
        let response: EmbeddingResponse = self
            .post(&self.embed_http, "embeddings", &request)
            .await?;

        if response.data.len() != texts.len() {
            return Err(anyhow!(
                "embedding count mismatch: sent {}, got {}",
                texts.len(),
                response.data.len()
            ));
        }
        let mut ordered = response.data;
        ordered.sort_by_key(|d| d.index);
        Ok(ordered.into_iter().map(|d| d.embedding).collect())
    }
}

fn first_choice(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| anyhow!("chat response contained no content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_models() {
        let client = AiClient::new("sk-test", "https://api.openai.com/v1/")
            .with_chat_model("gpt-4o")
            .with_embedding_model("text-embedding-3-large");
        assert_eq!(client.chat_model(), "gpt-4o");
        assert_eq!(client.embedding_model(), "text-embedding-3-large");
        assert_eq!(client.base_url, "https://api.openai.com/v1");
    }
}
