//! Shared application state

use crate::{
    config::Config,
    gateway::{
        Destination, FhirDestination, FhirSource, HttpTerminologyValidator, LegacySource,
        ResourceSource, TerminologyValidator,
    },
    services::forward::{ForwardService, Gateways},
    Result,
};
use relay_client::{FhirRestClient, LegacyCredentials, LegacyRestClient, TerminologyClient};
use std::sync::Arc;

/// Shared application state passed to all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub forward_service: Arc<ForwardService>,
}

impl AppState {
    /// Build the HTTP gateways described by `config` and the service on top.
    ///
    /// Endpoint problems surface here as [`crate::Error::Configuration`], so
    /// the process refuses to start instead of failing per request.
    pub fn new(config: Config) -> Result<Self> {
        let gateways = build_gateways(&config)?;
        let service = ForwardService::new(
            gateways,
            config.forwarding.clone(),
            config.terminology.timeout(),
        )
        .with_source_base_url(&config.sources.primary_url);
        Ok(Self::with_service(config, service))
    }

    /// State around an already built service (tests use in-memory gateways)
    pub fn with_service(config: Config, service: ForwardService) -> Self {
        Self {
            config: Arc::new(config),
            forward_service: Arc::new(service),
        }
    }
}

fn build_gateways(config: &Config) -> Result<Gateways> {
    let sources_cfg = &config.sources;
    let fhir_source = |name: &str, url: &str| -> Result<Arc<dyn ResourceSource>> {
        let client = FhirRestClient::new(url, sources_cfg.timeout())?;
        Ok(Arc::new(FhirSource::new(
            name,
            client,
            sources_cfg.page_size,
            sources_cfg.max_pages,
        )))
    };

    let mut sources = vec![fhir_source("primary", &sources_cfg.primary_url)?];
    if let Some(url) = &sources_cfg.secondary_url {
        sources.push(fhir_source("secondary", url)?);
    }
    if let Some(url) = &sources_cfg.legacy_url {
        let credentials = match (&sources_cfg.legacy_username, &sources_cfg.legacy_password) {
            (Some(username), Some(password)) => Some(LegacyCredentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        let client = LegacyRestClient::new(url.as_str(), credentials, sources_cfg.timeout())?;
        sources.push(Arc::new(LegacySource::new(client)));
    }

    let destination: Arc<dyn Destination> = Arc::new(FhirDestination::new(FhirRestClient::new(
        config.destination.url.as_str(),
        config.destination.timeout(),
    )?));

    let terminology: Option<Arc<dyn TerminologyValidator>> = if config.terminology.enabled {
        let client = TerminologyClient::new(
            config.terminology.url.as_str(),
            config.terminology.timeout(),
        )?;
        Some(Arc::new(HttpTerminologyValidator::new(client)))
    } else {
        None
    };

    tracing::info!(
        sources = sources.len(),
        terminology = terminology.is_some(),
        "Gateways configured"
    );

    Ok(Gateways {
        sources,
        destination,
        terminology,
    })
}
