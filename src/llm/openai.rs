//! OpenAI-compatible chat/embedding provider.
//!
//! Works against any endpoint speaking the `/v1/chat/completions` and
//! `/v1/embeddings` wire format, including self-hosted gateways.

use reqwest::Client;
use tokio::sync::mpsc;

use crate::error::{VikingError, VikingResult};

use super::{
    parse_sse_line, ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, Provider,
    StreamResponse,
};

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url("https://api.openai.com", api_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn chat_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn embeddings_url(&self) -> String {
        format!("{}/v1/embeddings", self.base_url)
    }

    async fn post(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> VikingResult<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VikingError::Provider(format!(
                "openai API error {status}: {body}"
            )));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl Provider for OpenAiProvider {
    async fn chat(&self, request: &ChatRequest) -> VikingResult<ChatResponse> {
        let mut request = request.clone();
        request.stream = false;
        let body = serde_json::to_value(&request)?;

        let response = self.post(&self.chat_url(), &body).await?;
        Ok(response.json().await?)
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> VikingResult<mpsc::UnboundedReceiver<StreamResponse>> {
        let mut request = request.clone();
        request.stream = true;
        let body = serde_json::to_value(&request)?;

        let mut response = self.post(&self.chat_url(), &body).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut buffer = String::new();
            while let Ok(Some(chunk)) = response.chunk().await {
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                // frames are newline-delimited `data: <json>` lines
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim_end_matches('\r').to_string();
                    buffer.drain(..=newline);
                    if line.trim() == "data: [DONE]" {
                        return;
                    }
                    if let Some(frame) = parse_sse_line(&line) {
                        if tx.send(frame).is_err() {
                            return;
                        }
                    }
                }
            }
            // flush a trailing frame without a newline
            if let Some(frame) = parse_sse_line(buffer.trim_end()) {
                let _ = tx.send(frame);
            }
        });

        Ok(rx)
    }

    async fn embed(&self, request: &EmbeddingRequest) -> VikingResult<EmbeddingResponse> {
        if request.input.is_empty() {
            return Err(VikingError::InvalidArgument(
                "embedding input is empty".into(),
            ));
        }
        let body = serde_json::to_value(request)?;
        let response = self.post(&self.embeddings_url(), &body).await?;
        Ok(response.json().await?)
    }
}
