use super::claude::ClaudeAdapter;
use super::gemini::GeminiAdapter;
use super::openai::OpenAiAdapter;
use super::{default_model, LlmAdapter, LlmModel, LlmService};
use crate::core::credentials::{CredentialError, CredentialStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

type AdapterFactory = Box<dyn Fn(LlmService) -> Arc<dyn LlmAdapter> + Send + Sync>;

/// Builds each provider adapter on first use and keeps its credential in
/// sync with the credential store.
pub struct ProviderRegistry {
    credentials: Arc<CredentialStore>,
    factory: AdapterFactory,
    adapters: Mutex<HashMap<LlmService, Arc<dyn LlmAdapter>>>,
}

impl ProviderRegistry {
    pub fn new(http: reqwest::Client, credentials: Arc<CredentialStore>) -> Self {
        Self::with_factory(
            credentials,
            Box::new(move |service: LlmService| -> Arc<dyn LlmAdapter> {
                let model = default_model_for(service);
                match service {
                    LlmService::Claude => Arc::new(ClaudeAdapter::new(http.clone(), model)),
                    LlmService::OpenAi => Arc::new(OpenAiAdapter::new(http.clone(), model)),
                    LlmService::Gemini => Arc::new(GeminiAdapter::new(http.clone(), model)),
                }
            }),
        )
    }

    pub fn with_factory(credentials: Arc<CredentialStore>, factory: AdapterFactory) -> Self {
        Self {
            credentials,
            factory,
            adapters: Mutex::new(HashMap::new()),
        }
    }

    /// The adapter for `service`, constructed and credentialed on first use.
    pub fn adapter(&self, service: LlmService) -> Arc<dyn LlmAdapter> {
        let mut adapters = self.adapters.lock().unwrap_or_else(PoisonError::into_inner);
        adapters
            .entry(service)
            .or_insert_with(|| {
                debug!(service = %service, "Creating provider adapter");
                let adapter = (self.factory)(service);
                match self.credentials.get(service.id(), Some(service.env_var())) {
                    Ok(Some(key)) => adapter.set_credential(&key),
                    Ok(None) => {}
                    Err(err) => warn!(service = %service, error = %err, "Failed to read API key"),
                }
                adapter
            })
            .clone()
    }

    /// The adapter serving `model`, switched to that model.
    pub fn select(&self, model: &LlmModel) -> Arc<dyn LlmAdapter> {
        let adapter = self.adapter(model.service);
        adapter.set_model(model.id);
        adapter
    }

    /// Stores `key` and applies it to the live adapter, if one exists.
    pub fn set_credential(&self, service: LlmService, key: &str) -> Result<(), CredentialError> {
        self.credentials.set(service.id(), key.trim())?;
        let adapters = self.adapters.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(adapter) = adapters.get(&service) {
            adapter.set_credential(key);
        }
        Ok(())
    }

    pub fn has_credential(&self, service: LlmService) -> bool {
        matches!(
            self.credentials.get(service.id(), Some(service.env_var())),
            Ok(Some(_))
        )
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }
}

fn default_model_for(service: LlmService) -> &'static str {
    super::MODELS
        .iter()
        .find(|model| model.service == service)
        .map(|model| model.id)
        .unwrap_or(default_model().id)
}
