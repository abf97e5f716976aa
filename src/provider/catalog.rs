//! Model lists offered by the config editor.

use super::{Error, OllamaClient, Provider};
use async_trait::async_trait;

/// Source of selectable model names per provider.
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    async fn models(&self, provider: Provider) -> Result<Vec<String>, Error>;
}

/// Static lists for hosted providers, live discovery for Ollama.
pub struct ProviderCatalog {
    ollama: OllamaClient,
}

impl ProviderCatalog {
    pub fn new(ollama: OllamaClient) -> Self {
        Self { ollama }
    }
}

#[async_trait]
impl ModelCatalog for ProviderCatalog {
    async fn models(&self, provider: Provider) -> Result<Vec<String>, Error> {
        match provider {
            Provider::Ollama => self.ollama.list_models().await,
            other => Ok(other
                .known_models()
                .iter()
                .map(|m| (*m).to_string())
                .collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_lists() {
        let catalog = ProviderCatalog::new(OllamaClient::new(Some("127.0.0.1:9")));
        let gemini = catalog.models(Provider::Gemini).await.unwrap();
        assert!(gemini.contains(&"gemini-2.5-flash".to_string()));
        let bedrock = catalog.models(Provider::Bedrock).await.unwrap();
        assert_eq!(bedrock.len(), Provider::Bedrock.known_models().len());
    }
}
