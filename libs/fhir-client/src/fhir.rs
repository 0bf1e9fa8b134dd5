//! FHIR REST gateway client

use crate::error::{Error, Result};
use crate::models::{SearchResults, WriteResponse};
use relay_models::Bundle;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

const FHIR_JSON: &str = "application/fhir+json";

/// Client for one FHIR REST base URL.
#[derive(Debug, Clone)]
pub struct FhirRestClient {
    client: Client,
    base_url: String,
}

impl FhirRestClient {
    /// Create a client for `base_url` with the given per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Config("FHIR base URL must not be empty".to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET [base]/Type/id`. 404 and 410 map to `Ok(None)`.
    pub async fn read(&self, resource_type: &str, id: &str) -> Result<Option<Value>> {
        let url = format!(
            "{}/{}/{}",
            self.base_url,
            resource_type,
            urlencoding::encode(id)
        );
        self.get_json(&url).await
    }

    /// `GET [base]/Patient/id/$summary`, the patient summary document.
    pub async fn summary(&self, patient_id: &str) -> Result<Option<Value>> {
        let url = format!(
            "{}/Patient/{}/$summary",
            self.base_url,
            urlencoding::encode(patient_id)
        );
        self.get_json(&url).await
    }

    /// Search `[base]/Type?params`, following `next` links for at most
    /// `max_pages` pages. A 404 on the first page maps to `Ok(None)`.
    pub async fn search(
        &self,
        resource_type: &str,
        params: &[(&str, String)],
        max_pages: usize,
    ) -> Result<Option<SearchResults>> {
        let mut url = format!("{}/{}", self.base_url, resource_type);
        if !params.is_empty() {
            let query: Vec<String> = params
                .iter()
                .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
                .collect();
            url.push('?');
            url.push_str(&query.join("&"));
        }

        let mut results = SearchResults::default();
        let mut next = Some(url);
        let mut pages = 0;

        while let Some(page_url) = next.take() {
            let Some(page) = self.get_json(&page_url).await? else {
                if pages == 0 {
                    return Ok(None);
                }
                break;
            };
            pages += 1;

            let bundle = Bundle::from_value(&page).map_err(|e| Error::InvalidResponse {
                url: page_url.clone(),
                message: e.to_string(),
            })?;
            next = bundle.next_link().map(str::to_string);
            let (matches, included) = bundle.into_search_results();
            results.matches.extend(matches);
            results.included.extend(included);

            if pages >= max_pages {
                if next.is_some() {
                    tracing::warn!(
                        "Search {} truncated after {} pages",
                        resource_type,
                        max_pages
                    );
                    results.truncated = true;
                }
                break;
            }
        }

        Ok(Some(results))
    }

    /// `PUT [base]/Type/id`. Any HTTP status is returned as a `WriteResponse`.
    pub async fn put(&self, resource_type: &str, id: &str, resource: &Value) -> Result<WriteResponse> {
        let url = format!(
            "{}/{}/{}",
            self.base_url,
            resource_type,
            urlencoding::encode(id)
        );
        let request = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, FHIR_JSON)
            .header(reqwest::header::ACCEPT, FHIR_JSON)
            .json(resource);
        self.write(request).await
    }

    /// `POST [base]` with a transaction bundle.
    pub async fn post_transaction(&self, bundle: &Value) -> Result<WriteResponse> {
        let request = self
            .client
            .post(&self.base_url)
            .header(reqwest::header::CONTENT_TYPE, FHIR_JSON)
            .header(reqwest::header::ACCEPT, FHIR_JSON)
            .json(bundle);
        self.write(request).await
    }

    async fn get_json(&self, url: &str) -> Result<Option<Value>> {
        tracing::debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, FHIR_JSON)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }

        let text = response.text().await?;
        let value = serde_json::from_str(&text)?;
        Ok(Some(value))
    }

    async fn write(&self, request: reqwest::RequestBuilder) -> Result<WriteResponse> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = serde_json::from_str(&text).ok();
        Ok(WriteResponse { status, body, text })
    }
}
