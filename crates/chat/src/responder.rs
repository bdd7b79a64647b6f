use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use murmur_llm::{CompletionRequest, LlmProvider, ProviderError, ProviderMessage, Role};
use murmur_storage::{MessageRecord, Sender, UserId};
use snafu::{ResultExt, Snafu, ensure};

pub const FALLBACK_TOPIC: &str = "a friendly conversation";
const TOPIC_WORD_COUNT: usize = 3;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ResponderError {
    #[snafu(display("assistant provider failed on `{stage}`: {source}"))]
    Provider {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("assistant returned an empty reply on `{stage}`"))]
    EmptyReply { stage: &'static str },
    #[snafu(display("assistant did not reply within {timeout_ms} ms on `{stage}`"))]
    TimedOut { stage: &'static str, timeout_ms: u64 },
}

/// Produces the assistant reply for one turn. Never writes to the message store.
pub trait Responder: Send + Sync {
    /// `prior_history` holds the confirmed conversation before `latest_user_text`.
    fn respond<'a>(
        &'a self,
        user_id: &'a UserId,
        latest_user_text: &'a str,
        prior_history: &'a [MessageRecord],
    ) -> BoxFuture<'a, Result<String, ResponderError>>;
}

/// First three whitespace-separated words of `text`, or [`FALLBACK_TOPIC`].
pub fn derive_topic(text: &str) -> String {
    let topic = text
        .split_whitespace()
        .take(TOPIC_WORD_COUNT)
        .collect::<Vec<_>>()
        .join(" ");
    if topic.is_empty() {
        FALLBACK_TOPIC.to_string()
    } else {
        topic
    }
}

pub fn conversation_prompt(topic: &str) -> String {
    format!("Generate an initial prompt for a conversation about {topic}.")
}

/// Responder backed by a completion provider.
pub struct LlmResponder {
    provider: Arc<dyn LlmProvider>,
    model_id: String,
    temperature: Option<f64>,
    max_tokens: Option<u64>,
}

impl LlmResponder {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        let model_id = provider.default_model().to_string();
        Self {
            provider,
            model_id,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        if !model_id.trim().is_empty() {
            self.model_id = model_id.trim().to_string();
        }
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u64>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    fn build_request(
        &self,
        latest_user_text: &str,
        prior_history: &[MessageRecord],
    ) -> CompletionRequest {
        let mut messages = prior_history
            .iter()
            .map(|record| {
                let role = match record.sender {
                    Sender::User => Role::User,
                    Sender::Ai => Role::Assistant,
                };
                ProviderMessage::new(role, record.text.clone())
            })
            .collect::<Vec<_>>();
        messages.push(ProviderMessage::new(
            Role::User,
            conversation_prompt(&derive_topic(latest_user_text)),
        ));

        let mut request = CompletionRequest::new(self.model_id.clone(), messages);
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        request
    }
}

impl Responder for LlmResponder {
    fn respond<'a>(
        &'a self,
        user_id: &'a UserId,
        latest_user_text: &'a str,
        prior_history: &'a [MessageRecord],
    ) -> BoxFuture<'a, Result<String, ResponderError>> {
        Box::pin(async move {
            let request = self.build_request(latest_user_text, prior_history);
            tracing::debug!(
                user_id = %user_id,
                provider_id = %self.provider.id(),
                model_id = %self.model_id,
                history_len = prior_history.len(),
                "requesting assistant reply"
            );

            let reply = self
                .provider
                .complete(request)
                .await
                .context(ProviderSnafu {
                    stage: "responder-complete",
                })?;

            let reply = reply.trim().to_string();
            ensure!(
                !reply.is_empty(),
                EmptyReplySnafu {
                    stage: "responder-validate-reply",
                }
            );
            Ok(reply)
        })
    }
}

/// Bounds another responder's latency. Elapsing is reported as [`ResponderError::TimedOut`].
pub struct TimeoutResponder {
    inner: Arc<dyn Responder>,
    timeout: Duration,
}

impl TimeoutResponder {
    pub fn new(inner: Arc<dyn Responder>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl Responder for TimeoutResponder {
    fn respond<'a>(
        &'a self,
        user_id: &'a UserId,
        latest_user_text: &'a str,
        prior_history: &'a [MessageRecord],
    ) -> BoxFuture<'a, Result<String, ResponderError>> {
        Box::pin(async move {
            let inner = self.inner.respond(user_id, latest_user_text, prior_history);
            match tokio::time::timeout(self.timeout, inner).await {
                Ok(result) => result,
                Err(_) => {
                    let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                    tracing::warn!(user_id = %user_id, timeout_ms, "assistant reply timed out");
                    TimedOutSnafu {
                        stage: "responder-timeout",
                        timeout_ms,
                    }
                    .fail()
                }
            }
        })
    }
}
