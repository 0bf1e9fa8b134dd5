pub mod builders;
pub mod fakes;

use anyhow::Context as _;
use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, Method, Request, StatusCode},
    Router,
};
use relay::{
    api::create_router,
    gateway::{Destination, ResourceSource, TerminologyValidator},
    services::forward::{ForwardService, Gateways},
    AppState, Config,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tower::ServiceExt as _;

// Re-export commonly used items
pub use builders::*;
pub use fakes::*;

/// Router wired to in-memory gateways
///
/// Sources are consulted primary, secondary, then legacy.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub primary: Arc<InMemorySource>,
    pub secondary: Arc<InMemorySource>,
    pub legacy: Arc<LegacyRecords>,
    pub destination: Arc<RecordingDestination>,
    pub terminology: Arc<TerminologyRecorder>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::new_with_config(|_| {})
    }

    pub fn new_with_config(configure: impl FnOnce(&mut Config)) -> Self {
        Self::build(
            InMemorySource::new("primary"),
            InMemorySource::new("secondary").without_search(),
            configure,
        )
    }

    /// Neither FHIR source serves searches, so they fall through to legacy.
    pub fn legacy_searches() -> Self {
        Self::build(
            InMemorySource::new("primary").without_search(),
            InMemorySource::new("secondary").without_search(),
            |_| {},
        )
    }

    fn build(
        primary: InMemorySource,
        secondary: InMemorySource,
        configure: impl FnOnce(&mut Config),
    ) -> Self {
        let mut config = Config::default();
        config.terminology.enabled = true;
        configure(&mut config);

        let primary = Arc::new(primary);
        let secondary = Arc::new(secondary);
        let legacy = Arc::new(LegacyRecords::default());
        let destination = Arc::new(RecordingDestination::default());
        let terminology = Arc::new(TerminologyRecorder::default());

        let sources: Vec<Arc<dyn ResourceSource>> =
            vec![primary.clone(), secondary.clone(), legacy.clone()];
        let gateways = Gateways {
            sources,
            destination: destination.clone() as Arc<dyn Destination>,
            terminology: config
                .terminology
                .enabled
                .then(|| terminology.clone() as Arc<dyn TerminologyValidator>),
        };
        let service = ForwardService::new(
            gateways,
            config.forwarding.clone(),
            config.terminology.timeout(),
        )
        .with_source_base_url(&config.sources.primary_url);

        let state = AppState::with_service(config, service);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            primary,
            secondary,
            legacy,
            destination,
            terminology,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Bytes>,
    ) -> anyhow::Result<(StatusCode, HeaderMap, Bytes)> {
        let request = Request::builder()
            .method(method)
            .uri(path_and_query)
            .header("host", "relay.test")
            .header("content-type", "application/json")
            .body(match body {
                Some(bytes) => Body::from(bytes),
                None => Body::empty(),
            })
            .context("build request")?;

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .context("dispatch request")?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .context("read response body")?;

        Ok((status, headers, body))
    }

    /// POST a trigger event for `uuid` and decode the JSON answer
    pub async fn trigger(
        &self,
        path: &str,
        uuid: &str,
    ) -> anyhow::Result<(StatusCode, JsonValue)> {
        let body = to_json_body(&serde_json::json!({ "uuid": uuid }))?;
        let (status, _headers, bytes) = self.request(Method::POST, path, Some(body)).await?;
        let json = serde_json::from_slice(&bytes).context("decode response body")?;
        Ok((status, json))
    }
}

/// Number of PUTs recorded for `key`
pub fn put_count(app: &TestApp, key: &str) -> usize {
    app.destination
        .put_keys()
        .iter()
        .filter(|k| k.as_str() == key)
        .count()
}
