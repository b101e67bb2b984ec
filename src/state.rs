use std::sync::Arc;
use std::time::Duration;

use crate::auth::{authenticate, build_allowed_key_set, AllowedClientKeys};
use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::protocol::canonical::IngressApi;
use crate::routing::ModelRouter;
use crate::transport::HttpTransport;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub model_router: ModelRouter,
    allowed_client_keys: AllowedClientKeys,
}

impl AppState {
    /// Build the transport, every provider and the token index.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Config`] when a provider cannot be built.
    pub fn new(config: AppConfig) -> Result<Self, GatewayError> {
        let transport = Arc::new(HttpTransport::new(&config.server));
        let model_router = ModelRouter::new(&config, transport)?;
        Ok(Self::with_router(config, model_router))
    }

    #[must_use]
    pub fn with_router(config: AppConfig, model_router: ModelRouter) -> Self {
        let allowed_client_keys = build_allowed_key_set(&config.tokens);
        Self {
            config,
            model_router,
            allowed_client_keys,
        }
    }

    /// Authenticate a front-end request using the prebuilt token index.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Auth` when the token is missing or invalid.
    pub fn authenticate(
        &self,
        ingress: IngressApi,
        headers: &http::HeaderMap,
    ) -> Result<(), GatewayError> {
        authenticate(ingress, headers, &self.allowed_client_keys)
    }

    /// Deadline for one upstream exchange, streaming included.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.server.timeout)
    }
}
