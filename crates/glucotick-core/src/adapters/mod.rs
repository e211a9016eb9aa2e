//! Provider adapters and the factory that selects one from configuration.

pub mod librelink;
pub mod nightscout;

use std::sync::Arc;

pub use librelink::LibreLinkProvider;
pub use nightscout::NightscoutProvider;

use crate::config::{resolve_credentials, ConfigSource, EnvSecretStore, SecretStore};
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::provider::Provider;
use crate::ProviderId;

/// Builds the provider named by the `provider` setting.
///
/// Unknown names resolve to Nightscout. Empty credentials are filled from
/// `secrets` before construction.
pub fn build_provider(
    config: Arc<dyn ConfigSource>,
    secrets: &dyn SecretStore,
    http_client: Arc<dyn HttpClient>,
) -> Arc<dyn Provider> {
    let settings = resolve_credentials(config.settings(), secrets);
    let provider: Arc<dyn Provider> = match settings.provider_id() {
        ProviderId::Nightscout => Arc::new(NightscoutProvider::from_settings(&settings, http_client)),
        ProviderId::Librelink => Arc::new(LibreLinkProvider::from_settings(
            &settings,
            http_client,
            config,
        )),
    };
    tracing::debug!(
        provider = %provider.id(),
        configured = provider.is_configured(),
        "provider constructed"
    );
    provider
}

/// Constructs providers for the monitor on startup and reconfiguration.
pub trait ProviderFactory: Send + Sync {
    fn build(&self, config: Arc<dyn ConfigSource>) -> Arc<dyn Provider>;
}

/// [`build_provider`] over a fixed secret store and transport.
pub struct DefaultProviderFactory {
    secrets: Arc<dyn SecretStore>,
    http_client: Arc<dyn HttpClient>,
}

impl DefaultProviderFactory {
    pub fn new(secrets: Arc<dyn SecretStore>, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            secrets,
            http_client,
        }
    }
}

impl Default for DefaultProviderFactory {
    fn default() -> Self {
        Self::new(
            Arc::new(EnvSecretStore),
            Arc::new(ReqwestHttpClient::default()),
        )
    }
}

impl ProviderFactory for DefaultProviderFactory {
    fn build(&self, config: Arc<dyn ConfigSource>) -> Arc<dyn Provider> {
        build_provider(config, self.secrets.as_ref(), self.http_client.clone())
    }
}
