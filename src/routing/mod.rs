pub mod dispatch;

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::providers::{build_provider, Provider};
use crate::stream::reasoning::markers_from_names;
use crate::transport::HttpTransport;

/// The resolved target for a request.
#[derive(Clone)]
pub struct RouteTarget {
    pub provider: Arc<dyn Provider>,
    /// Model id sent to the provider.
    pub actual_model: String,
    /// Output token cap from the model entry, if configured.
    pub max_token: Option<u64>,
}

impl std::fmt::Debug for RouteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTarget")
            .field("provider", &self.provider.name())
            .field("actual_model", &self.actual_model)
            .field("max_token", &self.max_token)
            .finish()
    }
}

#[derive(Debug, Clone)]
struct ModelEntry {
    provider: String,
    actual_model: String,
    max_token: Option<u64>,
}

/// A configured model as listed by `/v1/models`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelListing {
    pub name: String,
    pub provider: String,
}

/// Maps public model names to providers.
///
/// Names not configured under `llm.models` are tried as `provider/model`,
/// which passes `model` through to the named provider unchanged.
pub struct ModelRouter {
    providers: FxHashMap<String, Arc<dyn Provider>>,
    models: FxHashMap<String, ModelEntry>,
    listing: Vec<ModelListing>,
}

impl ModelRouter {
    /// Build every configured provider and index the model table.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Config`] when a provider cannot be built or a model
    /// references an unknown provider.
    pub fn new(config: &AppConfig, transport: Arc<HttpTransport>) -> Result<Self, GatewayError> {
        let markers = markers_from_names(&config.reasoning.markers);
        let providers = config
            .llm
            .providers
            .iter()
            .map(|provider| build_provider(provider, Arc::clone(&transport), markers.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::with_providers(providers, config)
    }

    /// Index already-built providers against the model table.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Config`] when a model references an unknown provider.
    pub fn with_providers(
        providers: Vec<Arc<dyn Provider>>,
        config: &AppConfig,
    ) -> Result<Self, GatewayError> {
        let providers: FxHashMap<String, Arc<dyn Provider>> = providers
            .into_iter()
            .map(|provider| (provider.name().to_string(), provider))
            .collect();

        let mut models = FxHashMap::default();
        let mut listing = Vec::with_capacity(config.llm.models.len());
        for model in &config.llm.models {
            if !providers.contains_key(&model.provider) {
                return Err(GatewayError::Config(format!(
                    "init model {} fail, can not find provider {}",
                    model.name, model.provider
                )));
            }
            let actual_model = if model.model.is_empty() {
                model.name.clone()
            } else {
                model.model.clone()
            };
            models.insert(
                model.name.clone(),
                ModelEntry {
                    provider: model.provider.clone(),
                    actual_model,
                    max_token: model.max_token,
                },
            );
            listing.push(ModelListing {
                name: model.name.clone(),
                provider: model.provider.clone(),
            });
        }

        tracing::debug!(
            providers = providers.len(),
            models = models.len(),
            "model router ready"
        );
        Ok(Self {
            providers,
            models,
            listing,
        })
    }

    /// Resolve a public model name.
    ///
    /// # Errors
    ///
    /// [`GatewayError::ModelNotFound`] when neither the table nor the
    /// `provider/model` form matches.
    pub fn resolve(&self, model: &str) -> Result<RouteTarget, GatewayError> {
        if let Some(entry) = self.models.get(model) {
            if let Some(provider) = self.providers.get(&entry.provider) {
                return Ok(RouteTarget {
                    provider: Arc::clone(provider),
                    actual_model: entry.actual_model.clone(),
                    max_token: entry.max_token,
                });
            }
        }

        if let Some((provider_name, actual_model)) = model.split_once('/') {
            if let Some(provider) = self.providers.get(provider_name) {
                if !actual_model.is_empty() {
                    return Ok(RouteTarget {
                        provider: Arc::clone(provider),
                        actual_model: actual_model.to_string(),
                        max_token: None,
                    });
                }
            }
        }

        Err(GatewayError::ModelNotFound(model.to_string()))
    }

    /// Configured models, in config order.
    #[must_use]
    pub fn models(&self) -> &[ModelListing] {
        &self.listing
    }

    #[must_use]
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }
}
