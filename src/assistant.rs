//! Adapter to the external question-answering service used in assist mode.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::AssistantError;

const API_VERSION: &str = "20150910";

/// "Answer this text". Stateless from the relay's point of view.
#[async_trait]
pub trait Assistant: Send + Sync {
    async fn query(&self, text: &str) -> Result<String, AssistantError>;
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: [&'a str; 1],
    lang: &'a str,
    #[serde(rename = "sessionId")]
    session_id: &'a str,
}

/// HTTP client for an api.ai-style `POST /query` endpoint.
#[derive(Clone)]
pub struct HttpAssistant {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    lang: String,
    session_id: String,
}

impl HttpAssistant {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            lang: "en".to_string(),
            session_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }
}

#[async_trait]
impl Assistant for HttpAssistant {
    async fn query(&self, text: &str) -> Result<String, AssistantError> {
        let url = format!("{}/query?v={}", self.base_url, API_VERSION);
        let res = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&QueryRequest {
                query: [text],
                lang: &self.lang,
                session_id: &self.session_id,
            })
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(AssistantError::Api(format!("{} {}", status, body)));
        }

        let body: Value = res.json().await?;
        body.pointer("/result/fulfillment/speech")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|speech| !speech.is_empty())
            .map(String::from)
            .ok_or(AssistantError::EmptyAnswer)
    }
}
