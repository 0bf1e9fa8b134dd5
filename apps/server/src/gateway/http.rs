//! Gateway implementations over FHIR REST

use super::traits::{Destination, ResourceSource, TerminologyValidator};
use crate::Result;
use async_trait::async_trait;
use relay_client::{
    CodingPayload, FhirRestClient, SearchResults, TerminologyClient, WriteResponse,
};
use relay_models::FhirResource;
use serde_json::Value as JsonValue;

/// A FHIR gateway used as a source
pub struct FhirSource {
    name: String,
    client: FhirRestClient,
    page_size: u32,
    max_pages: usize,
}

impl FhirSource {
    pub fn new(
        name: impl Into<String>,
        client: FhirRestClient,
        page_size: u32,
        max_pages: usize,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            page_size,
            max_pages,
        }
    }
}

#[async_trait]
impl ResourceSource for FhirSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, resource_type: &str, id: &str) -> Result<Option<JsonValue>> {
        Ok(self.client.read(resource_type, id).await?)
    }

    async fn search(
        &self,
        resource_type: &str,
        patient_id: &str,
        includes: &[&str],
    ) -> Result<Option<SearchResults>> {
        let mut params = vec![
            ("patient", patient_id.to_string()),
            ("_count", self.page_size.to_string()),
        ];
        params.extend(includes.iter().map(|inc| ("_include", inc.to_string())));

        Ok(self
            .client
            .search(resource_type, &params, self.max_pages)
            .await?)
    }

    async fn summary(&self, patient_id: &str) -> Result<Option<JsonValue>> {
        Ok(self.client.summary(patient_id).await?)
    }
}

/// The destination FHIR repository
pub struct FhirDestination {
    client: FhirRestClient,
}

impl FhirDestination {
    pub fn new(client: FhirRestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Destination for FhirDestination {
    async fn put(&self, resource: &FhirResource) -> Result<WriteResponse> {
        Ok(self
            .client
            .put(&resource.resource_type, &resource.id, &resource.raw)
            .await?)
    }

    async fn submit_transaction(&self, bundle: &JsonValue) -> Result<WriteResponse> {
        Ok(self.client.post_transaction(bundle).await?)
    }
}

pub struct HttpTerminologyValidator {
    client: TerminologyClient,
}

impl HttpTerminologyValidator {
    pub fn new(client: TerminologyClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TerminologyValidator for HttpTerminologyValidator {
    async fn validate(&self, coding: &CodingPayload) -> Result<u16> {
        Ok(self.client.validate(coding).await?)
    }
}
