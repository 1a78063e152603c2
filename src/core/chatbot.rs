//! Client for the hosted question-answering chatbot.

use crate::core::config::data::ChatbotConfig;
use crate::core::message::ChatTurn;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const CHATBOT_CONNECT_TIMEOUT_SECONDS: u64 = 10;
const CHATBOT_REQUEST_TIMEOUT_SECONDS: u64 = 60;

/// Response fields that may carry the answer, in lookup order.
const ANSWER_FIELDS: [&str; 4] = ["answer", "text", "response", "output"];

#[derive(Debug, Error)]
pub enum ChatbotError {
    #[error("failed to build chatbot HTTP client: {0}")]
    Client(String),
    #[error("chatbot request failed: {0}")]
    Request(String),
    #[error("chatbot returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("chatbot response did not contain an answer")]
    MissingAnswer,
    #[error("chatbot API key environment variable {0} is not set")]
    MissingCredential(String),
}

#[derive(Serialize)]
struct AskRequest<'a> {
    question: &'a str,
    history: &'a [ChatTurn],
}

#[derive(Clone)]
pub struct ChatbotClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for ChatbotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatbotClient")
            .field("url", &self.url)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl ChatbotClient {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Result<Self, ChatbotError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CHATBOT_CONNECT_TIMEOUT_SECONDS))
            .timeout(Duration::from_secs(CHATBOT_REQUEST_TIMEOUT_SECONDS))
            .build()
            .map_err(|err| ChatbotError::Client(err.to_string()))?;
        Ok(Self::with_client(client, url, api_key))
    }

    pub fn with_client(
        client: reqwest::Client,
        url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            api_key,
        }
    }

    pub fn from_config(config: &ChatbotConfig) -> Result<Self, ChatbotError> {
        let api_key = match config.api_key_env.as_deref() {
            Some(var) => Some(
                std::env::var(var)
                    .ok()
                    .filter(|key| !key.trim().is_empty())
                    .ok_or_else(|| ChatbotError::MissingCredential(var.to_string()))?,
            ),
            None => None,
        };
        Self::new(config.url.clone(), api_key)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn ask(&self, question: &str, history: &[ChatTurn]) -> Result<String, ChatbotError> {
        debug!(url = %self.url, history = history.len(), "Asking hosted chatbot");
        let mut request = self
            .client
            .post(&self.url)
            .json(&AskRequest { question, history });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ChatbotError::Request(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ChatbotError::Request(err.to_string()))?;
        if !status.is_success() {
            return Err(ChatbotError::Status {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        match serde_json::from_str::<Value>(&body) {
            Ok(value) => extract_answer(&value).ok_or(ChatbotError::MissingAnswer),
            // Some deployments answer with plain text.
            Err(_) if !body.trim().is_empty() => Ok(body.trim().to_string()),
            Err(_) => Err(ChatbotError::MissingAnswer),
        }
    }
}

pub fn extract_answer(value: &Value) -> Option<String> {
    if let Some(text) = value.as_str() {
        return Some(text.to_string());
    }
    ANSWER_FIELDS
        .iter()
        .find_map(|field| value.get(field).and_then(Value::as_str))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn answer_is_read_from_known_fields() {
        assert_eq!(
            extract_answer(&json!({ "answer": "a", "text": "b" })).as_deref(),
            Some("a")
        );
        assert_eq!(
            extract_answer(&json!({ "output": "o" })).as_deref(),
            Some("o")
        );
        assert_eq!(extract_answer(&json!("plain")).as_deref(), Some("plain"));
        assert_eq!(extract_answer(&json!({ "answer": 3 })), None);
    }

    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            let mut chunk = [0_u8; 4096];
            loop {
                let read = stream.read(&mut chunk).await.expect("read");
                request.extend_from_slice(&chunk[..read]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| {
                            line.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|value| value.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length || read == 0 {
                        break;
                    }
                }
                if read == 0 {
                    break;
                }
            }
            stream.write_all(response.as_bytes()).await.expect("write");
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{addr}/ask"), handle)
    }

    fn test_client(url: String, api_key: Option<&str>) -> ChatbotClient {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .expect("client");
        ChatbotClient::with_client(client, url, api_key.map(str::to_string))
    }

    #[tokio::test]
    async fn ask_posts_question_and_history() {
        let (url, handle) = serve_once(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\nconnection: close\r\ncontent-length: 20\r\n\r\n{\"answer\":\"Paris!!\"}",
        )
        .await;
        let client = test_client(url, Some("secret"));
        let history = vec![ChatTurn {
            role: "user".to_string(),
            content: "hi".to_string(),
        }];

        let answer = client
            .ask("Capital of France?", &history)
            .await
            .expect("answer");
        assert_eq!(answer, "Paris!!");

        let request = handle.await.expect("server");
        assert!(request.starts_with("POST /ask "));
        assert!(request
            .to_ascii_lowercase()
            .contains("authorization: bearer secret"));
        assert!(request.contains("\"question\":\"Capital of France?\""));
        let history_json = r#""history":[{"role":"user","content":"hi"}]"#;
        assert!(request.contains(history_json));
    }

    #[tokio::test]
    async fn ask_surfaces_error_status() {
        let (url, handle) = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\ncontent-type: text/plain\r\nconnection: close\r\ncontent-length: 4\r\n\r\ndown",
        )
        .await;
        let client = test_client(url, None);

        let err = client.ask("hello", &[]).await.expect_err("503");
        match err {
            ChatbotError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "down");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        handle.await.expect("server");
    }
}
