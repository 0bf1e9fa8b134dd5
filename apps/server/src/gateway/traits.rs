//! Core traits for sources, destination and terminology service

use crate::Result;
use async_trait::async_trait;
use relay_client::{CodingPayload, SearchResults, WriteResponse};
use relay_models::FhirResource;
use serde_json::Value as JsonValue;

/// A system resources can be read from
///
/// Sources are consulted in a fixed priority order; `Ok(None)` hands the
/// request to the next source in the chain.
#[async_trait]
pub trait ResourceSource: Send + Sync {
    /// Short label used in logs and metrics (e.g. "primary")
    fn name(&self) -> &str;

    /// Read a resource by type and id
    ///
    /// # Returns
    /// * `Ok(Some(resource))` - Resource found
    /// * `Ok(None)` - Resource unknown to this source (404/410, or a type the
    ///   source cannot serve)
    async fn read(&self, resource_type: &str, id: &str) -> Result<Option<JsonValue>>;

    /// Search resources of `resource_type` belonging to a patient
    ///
    /// # Arguments
    /// * `includes` - `_include` values (e.g. `MedicationRequest:medication`)
    ///
    /// # Returns
    /// * `Ok(Some(results))` - Every page, matches and included resources split
    /// * `Ok(None)` - The source does not serve this search
    async fn search(
        &self,
        resource_type: &str,
        patient_id: &str,
        includes: &[&str],
    ) -> Result<Option<SearchResults>>;

    /// Patient summary document (`Patient/{id}/$summary`)
    ///
    /// Sources without a summary operation keep the default.
    async fn summary(&self, _patient_id: &str) -> Result<Option<JsonValue>> {
        Ok(None)
    }
}

/// The repository resources are forwarded to
#[async_trait]
pub trait Destination: Send + Sync {
    /// Idempotent `PUT {type}/{id}`
    ///
    /// HTTP error statuses are returned as a `WriteResponse`, not as `Err`.
    /// `Err` is reserved for transport failures.
    async fn put(&self, resource: &FhirResource) -> Result<WriteResponse>;

    /// Submit a transaction Bundle
    async fn submit_transaction(&self, bundle: &JsonValue) -> Result<WriteResponse>;
}

/// Best-effort terminology validation
#[async_trait]
pub trait TerminologyValidator: Send + Sync {
    /// Returns the HTTP status reported by the validator
    async fn validate(&self, coding: &CodingPayload) -> Result<u16>;
}
