//! OpenAI-compatible chat completions backend.
//!
//! One [`OpenAiClient`] is shared by every session (HTTP pool, API key
//! rotation); each session gets its own [`OpenAiBackend`] carrying the
//! message history.

use std::{
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    futures::StreamExt,
    parley_config::OpenAiConfig,
    parley_service_traits::{BackendError, ChatBackend, TextStream, is_assistant_role},
    secrecy::{ExposeSecret, Secret},
    serde::Serialize,
    tracing::{debug, trace},
};

use crate::{
    error::{Error, Result},
    sse::{SseBuffer, SseLineResult, classify_reqwest_error},
};

/// Type name under which this backend is registered.
pub const BACKEND_TYPE: &str = "openai-api";

const DEFAULT_MODELS: &[&str] = &[
    "gpt-3.5-turbo",
    "gpt-3.5-turbo-1106",
    "gpt-4",
    "gpt-4-turbo",
    "gpt-4o",
    "gpt-4o-mini",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// Drop the oldest non-system messages until at most `max` remain.
/// `max == 0` keeps everything.
fn trim_history(history: &mut Vec<ChatMessage>, max: usize) {
    if max == 0 {
        return;
    }
    while history.len() > max {
        match history.iter().position(|m| m.role != "system") {
            Some(index) => {
                history.remove(index);
            },
            None => break,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Shared client ───────────────────────────────────────────────────────────

pub struct OpenAiClient {
    config: OpenAiConfig,
    keys: Vec<Secret<String>>,
    next_key: AtomicUsize,
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let keys: Vec<Secret<String>> = config
            .api_keys
            .iter()
            .filter(|k| !k.expose_secret().trim().is_empty())
            .cloned()
            .collect();
        if keys.is_empty() {
            return Err(Error::MissingApiKey {
                backend: BACKEND_TYPE.into(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;

        debug!(
            endpoint = %config.api_endpoint,
            model = %config.model,
            keys = keys.len(),
            stream = config.stream,
            "openai client ready"
        );
        Ok(Self {
            config,
            keys,
            next_key: AtomicUsize::new(0),
            http,
        })
    }

    #[must_use]
    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    /// A fresh backend for one session.
    #[must_use]
    pub fn backend(self: &Arc<Self>, session_id: &str) -> OpenAiBackend {
        OpenAiBackend {
            client: Arc::clone(self),
            session_id: session_id.to_string(),
            model: Mutex::new(self.config.model.clone()),
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn next_api_key(&self) -> &Secret<String> {
        let index = self.next_key.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        &self.keys[index]
    }

    fn request_body(&self, model: &str, messages: &[ChatMessage]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "temperature": self.config.temperature,
            "top_p": self.config.top_p,
            "presence_penalty": self.config.presence_penalty,
            "frequency_penalty": self.config.frequency_penalty,
            "stream": self.config.stream,
        });
        if let Some(max_tokens) = self.config.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }

    async fn send(
        &self,
        body: &serde_json::Value,
    ) -> std::result::Result<reqwest::Response, BackendError> {
        let url = format!(
            "{}/chat/completions",
            self.config.api_endpoint.trim_end_matches('/')
        );
        let resp = self
            .http
            .post(url)
            .header(
                "Authorization",
                format!("Bearer {}", self.next_api_key().expose_secret()),
            )
            .json(body)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

// ── Per-session backend ─────────────────────────────────────────────────────

pub struct OpenAiBackend {
    client: Arc<OpenAiClient>,
    session_id: String,
    model: Mutex<String>,
    history: Arc<Mutex<Vec<ChatMessage>>>,
}

impl OpenAiBackend {
    #[must_use]
    pub fn history(&self) -> Vec<ChatMessage> {
        lock(&self.history).clone()
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn ask(&self, prompt: &str) -> TextStream {
        let client = Arc::clone(&self.client);
        let history = Arc::clone(&self.history);
        let model = self.current_model();
        let session_id = self.session_id.clone();
        let user = ChatMessage::user(prompt);

        Box::pin(async_stream::stream! {
            let mut messages = lock(&history).clone();
            messages.push(user.clone());
            let body = client.request_body(&model, &messages);

            debug!(
                session_id = %session_id,
                model = %model,
                messages_count = messages.len(),
                "openai chat request"
            );
            trace!(body = %body, "openai request body");

            let resp = match client.send(&body).await {
                Ok(resp) => resp,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };

            let mut reply = String::new();
            if client.config.stream {
                let mut byte_stream = resp.bytes_stream();
                let mut buffer = SseBuffer::default();
                let mut done = false;

                'read: while let Some(chunk) = byte_stream.next().await {
                    let chunk = match chunk {
                        Ok(c) => c,
                        Err(e) => {
                            yield Err(classify_reqwest_error(&e));
                            return;
                        },
                    };
                    for result in buffer.push(&chunk) {
                        match result {
                            SseLineResult::Delta(text) => {
                                reply.push_str(&text);
                                yield Ok(text);
                            },
                            SseLineResult::Error(message) => {
                                yield Err(BackendError::Protocol(message));
                                return;
                            },
                            SseLineResult::Done => {
                                done = true;
                                break 'read;
                            },
                            SseLineResult::Skip => {},
                        }
                    }
                }

                // Some servers close without [DONE] or a trailing newline.
                if !done {
                    match buffer.finish() {
                        Some(SseLineResult::Delta(text)) => {
                            reply.push_str(&text);
                            yield Ok(text);
                        },
                        Some(SseLineResult::Error(message)) => {
                            yield Err(BackendError::Protocol(message));
                            return;
                        },
                        _ => {},
                    }
                }
            } else {
                let value: serde_json::Value = match resp.json().await {
                    Ok(v) => v,
                    Err(e) => {
                        yield Err(classify_reqwest_error(&e));
                        return;
                    },
                };
                let Some(content) = value["choices"][0]["message"]["content"].as_str() else {
                    yield Err(BackendError::Protocol(format!("no message content in {value}")));
                    return;
                };
                reply = content.to_string();
                yield Ok(reply.clone());
            }

            let mut history = lock(&history);
            history.push(user);
            history.push(ChatMessage::assistant(reply));
            trim_history(&mut history, client.config.max_history);
            debug!(session_id = %session_id, history = history.len(), "openai exchange recorded");
        })
    }

    async fn rollback(&self) -> bool {
        let mut history = lock(&self.history);
        let n = history.len();
        let last_exchange =
            n >= 2 && history[n - 1].role == "assistant" && history[n - 2].role == "user";
        if last_exchange {
            history.truncate(n - 2);
        }
        last_exchange
    }

    async fn on_reset(&self) {
        lock(&self.history).clear();
        debug!(session_id = %self.session_id, "openai history cleared");
    }

    async fn switch_model(&self, model: &str) {
        *lock(&self.model) = model.to_string();
    }

    fn current_model(&self) -> String {
        lock(&self.model).clone()
    }

    fn supported_models(&self) -> Vec<String> {
        let mut models: Vec<String> = DEFAULT_MODELS.iter().map(|m| m.to_string()).collect();
        let configured = &self.client.config.model;
        if !models.contains(configured) {
            models.push(configured.clone());
        }
        models
    }

    async fn preset_ask(
        &self,
        role: &str,
        text: &str,
    ) -> std::result::Result<Option<String>, BackendError> {
        let mut history = lock(&self.history);
        if is_assistant_role(role) {
            history.push(ChatMessage::assistant(text));
            return Ok(Some(text.to_string()));
        }
        match role {
            "system" | "user" => {
                history.push(ChatMessage::new(role, text));
                Ok(None)
            },
            other => Err(BackendError::other(format!("unsupported preset role '{other}'"))),
        }
    }
}
