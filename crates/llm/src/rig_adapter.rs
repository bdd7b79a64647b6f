use futures::future::BoxFuture;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::message::AssistantContent;
use rig::prelude::CompletionClient;
use rig::providers::openai;
use snafu::{ResultExt, ensure};

use super::provider::{
    CompletionRequest, CompletionsFailedSnafu, DEFAULT_OPENAI_MODEL, EmptyPromptSnafu,
    HttpClientSnafu, LlmProvider, MissingApiKeySnafu, ProviderConfig, ProviderMessage,
    ProviderResult, Role,
};

pub const RIG_OPENAI_PROVIDER_ID: &str = "openai";

pub struct RigProviderAdapter {
    config: ProviderConfig,
    client: openai::Client,
}

impl RigProviderAdapter {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-adapter-new",
                provider_id: config.provider_id.clone(),
            }
        );

        let client = Self::build_client(&config)?;
        Ok(Self { config, client })
    }

    fn build_client(config: &ProviderConfig) -> ProviderResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    fn to_rig_message(message: &ProviderMessage) -> Option<RigMessage> {
        match message.role {
            Role::System => None,
            Role::User => Some(RigMessage::user(message.content.clone())),
            Role::Assistant => Some(RigMessage::assistant(message.content.clone())),
        }
    }

    fn merged_preamble(request: &CompletionRequest) -> Option<String> {
        // Rig exposes a single preamble field, so system-role messages are folded into it.
        let preamble_parts = request
            .messages
            .iter()
            .filter(|message| {
                matches!(message.role, Role::System) && !message.content.trim().is_empty()
            })
            .map(|message| message.content.clone())
            .collect::<Vec<_>>();

        if preamble_parts.is_empty() {
            None
        } else {
            Some(preamble_parts.join("\n\n"))
        }
    }

    fn collect_text<'c>(choice: impl IntoIterator<Item = &'c AssistantContent>) -> String {
        choice
            .into_iter()
            .filter_map(|content| match content {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    async fn run_completion(&self, request: CompletionRequest) -> ProviderResult<String> {
        let model = self.client.completion_model(request.model_id.clone());

        let mut messages = request
            .messages
            .iter()
            .filter_map(Self::to_rig_message)
            .collect::<Vec<_>>();

        let Some(prompt) = messages.pop() else {
            tracing::warn!(
                model_id = %request.model_id,
                total_message_count = request.messages.len(),
                "cannot run completion because no user/assistant messages remain after filtering"
            );
            return EmptyPromptSnafu {
                stage: "complete-pop-prompt",
                model_id: request.model_id.clone(),
            }
            .fail();
        };

        let mut builder = model.completion_request(prompt).messages(messages);

        if let Some(preamble) = Self::merged_preamble(&request) {
            builder = builder.preamble(preamble);
        }

        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature);
        }

        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }

        let response = builder.send().await.context(CompletionsFailedSnafu {
            stage: "complete-send",
        })?;

        let text = Self::collect_text(response.choice.iter());
        tracing::debug!(
            provider_id = %self.config.provider_id,
            model_id = %request.model_id,
            reply_len = text.len(),
            "completion finished"
        );
        Ok(text)
    }
}

impl LlmProvider for RigProviderAdapter {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "Rig OpenAI"
    }

    fn default_model(&self) -> &str {
        self.config
            .default_model
            .as_deref()
            .unwrap_or(DEFAULT_OPENAI_MODEL)
    }

    fn complete<'a>(&'a self, request: CompletionRequest) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move {
            ensure!(
                !request.messages.is_empty(),
                EmptyPromptSnafu {
                    stage: "complete",
                    model_id: request.model_id.clone(),
                }
            );

            self.run_completion(request).await.inspect_err(|error| {
                tracing::error!(
                    provider_id = %self.config.provider_id,
                    error = %error,
                    "completion request failed"
                );
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(messages: Vec<ProviderMessage>) -> CompletionRequest {
        CompletionRequest::new(DEFAULT_OPENAI_MODEL, messages)
    }

    #[test]
    fn system_messages_fold_into_preamble() {
        let request = request(vec![
            ProviderMessage::new(Role::System, "you are a chat assistant"),
            ProviderMessage::new(Role::User, "hi"),
            ProviderMessage::new(Role::System, "   "),
            ProviderMessage::new(Role::System, "be brief"),
        ]);

        assert_eq!(
            RigProviderAdapter::merged_preamble(&request).as_deref(),
            Some("you are a chat assistant\n\nbe brief")
        );
    }

    #[test]
    fn preamble_is_absent_without_system_content() {
        let request = request(vec![ProviderMessage::new(Role::User, "hi")]);
        assert_eq!(RigProviderAdapter::merged_preamble(&request), None);
    }

    #[test]
    fn system_messages_are_not_sent_as_chat_turns() {
        assert!(
            RigProviderAdapter::to_rig_message(&ProviderMessage::new(Role::System, "rules"))
                .is_none()
        );
        assert!(
            RigProviderAdapter::to_rig_message(&ProviderMessage::new(Role::User, "hi")).is_some()
        );
    }

    #[test]
    fn adapter_requires_api_key() {
        let config = ProviderConfig::new("openai", "  ", "", None);
        assert!(matches!(
            RigProviderAdapter::new(config),
            Err(crate::ProviderError::MissingApiKey { .. })
        ));
    }
}
