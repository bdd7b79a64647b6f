use std::sync::Arc;

mod provider;
mod rig_adapter;

pub use provider::{
    CompletionRequest, DEFAULT_OPENAI_MODEL, LlmProvider, ProviderConfig, ProviderError,
    ProviderMessage, ProviderResult, Role,
};
pub use rig_adapter::{RIG_OPENAI_PROVIDER_ID, RigProviderAdapter};

pub fn create_provider(mut config: ProviderConfig) -> ProviderResult<Arc<dyn LlmProvider>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "openai" | "rig-openai" => {
            config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
            Ok(Arc::new(RigProviderAdapter::new(config)?))
        }
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-provider",
            provider_id: config.provider_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_rejected() {
        let config = ProviderConfig::new("genkit", "key", "", None);
        let error = create_provider(config).err().expect("unsupported provider");
        assert!(matches!(
            error,
            ProviderError::UnsupportedProvider { ref provider_id, .. } if provider_id == "genkit"
        ));
    }

    #[test]
    fn blank_provider_id_defaults_to_openai() {
        let config = ProviderConfig::new("", "sk-test", "http://127.0.0.1:9/v1", None);
        let provider = create_provider(config).expect("openai adapter");
        assert_eq!(provider.id(), RIG_OPENAI_PROVIDER_ID);
        assert_eq!(provider.default_model(), DEFAULT_OPENAI_MODEL);
    }
}
