//! Resource fetching across an ordered chain of sources

use crate::gateway::{ResourceSource, SearchResults};
use crate::metrics::SOURCE_FETCHES_TOTAL;
use crate::{Error, Result};
use relay_models::FhirResource;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Reads resources from the first source that knows them.
///
/// Sources are tried in the order given (primary gateway, secondary gateway,
/// legacy API). A source answering "not found" hands over to the next one;
/// any other failure stops the chain and is returned.
#[derive(Clone)]
pub struct ResourceFetcher {
    sources: Vec<Arc<dyn ResourceSource>>,
}

impl ResourceFetcher {
    pub fn new(sources: Vec<Arc<dyn ResourceSource>>) -> Self {
        Self { sources }
    }

    /// Fetch by type and id; `Ok(None)` when every source reports not-found.
    #[tracing::instrument(skip(self), fields(source = tracing::field::Empty))]
    pub async fn fetch(&self, resource_type: &str, id: &str) -> Result<Option<FhirResource>> {
        for source in &self.sources {
            let result = source.read(resource_type, id).await;
            record_fetch(source.name(), &result);

            match result? {
                Some(raw) => {
                    tracing::Span::current().record("source", source.name());
                    return to_resource(raw, resource_type, id).map(Some);
                }
                None => {
                    tracing::debug!(source = source.name(), "Not found, trying next source");
                }
            }
        }
        Ok(None)
    }

    /// Search a patient's resources of one type using the same fallback chain.
    pub async fn search(
        &self,
        resource_type: &str,
        patient_id: &str,
        includes: &[&str],
    ) -> Result<Option<SearchResults>> {
        for source in &self.sources {
            if let Some(results) = source.search(resource_type, patient_id, includes).await? {
                tracing::debug!(
                    source = source.name(),
                    resource_type,
                    matches = results.matches.len(),
                    included = results.included.len(),
                    "Search answered"
                );
                return Ok(Some(results));
            }
        }
        Ok(None)
    }

    /// Patient summary from the first source offering one
    pub async fn summary(&self, patient_id: &str) -> Result<Option<JsonValue>> {
        for source in &self.sources {
            if let Some(summary) = source.summary(patient_id).await? {
                return Ok(Some(summary));
            }
        }
        Ok(None)
    }
}

fn record_fetch(source: &str, result: &Result<Option<JsonValue>>) {
    let outcome = match result {
        Ok(Some(_)) => "found",
        Ok(None) => "not_found",
        Err(_) => "error",
    };
    SOURCE_FETCHES_TOTAL
        .with_label_values(&[source, outcome])
        .inc();
}

fn to_resource(raw: JsonValue, resource_type: &str, id: &str) -> Result<FhirResource> {
    let resource = FhirResource::from_value(raw)?;
    if resource.resource_type != resource_type {
        return Err(Error::InvalidResource(format!(
            "asked for {resource_type}/{id}, source returned {}",
            resource.key()
        )));
    }
    Ok(resource)
}
