//! Client for the legacy (non-FHIR) record REST API
//!
//! The legacy API exposes three record kinds the relay can synthesize FHIR
//! resources from: providers, drugs and medication orders.

use crate::error::{Error, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Basic auth credentials for the legacy API
#[derive(Debug, Clone)]
pub struct LegacyCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LegacyRestClient {
    client: Client,
    base_url: String,
    credentials: Option<LegacyCredentials>,
}

impl LegacyRestClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Option<LegacyCredentials>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Config("legacy base URL must not be empty".to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    /// `GET [base]/provider/{id}?v=full`. 404 and 410 map to `Ok(None)`.
    pub async fn provider(&self, id: &str) -> Result<Option<Value>> {
        let url = format!("{}/provider/{}?v=full", self.base_url, urlencoding::encode(id));
        self.get_json(&url).await
    }

    /// `GET [base]/drug/{id}?v=full`
    pub async fn drug(&self, id: &str) -> Result<Option<Value>> {
        let url = format!("{}/drug/{}?v=full", self.base_url, urlencoding::encode(id));
        self.get_json(&url).await
    }

    /// `GET [base]/order?patient={id}&v=full`; returns the `results` array.
    pub async fn orders_for_patient(&self, patient_id: &str) -> Result<Option<Vec<Value>>> {
        let url = format!(
            "{}/order?patient={}&v=full",
            self.base_url,
            urlencoding::encode(patient_id)
        );
        let Some(body) = self.get_json(&url).await? else {
            return Ok(None);
        };
        match body.get("results") {
            Some(Value::Array(results)) => Ok(Some(results.clone())),
            None => Ok(Some(Vec::new())),
            Some(_) => Err(Error::InvalidResponse {
                url,
                message: "'results' is not an array".to_string(),
            }),
        }
    }

    async fn get_json(&self, url: &str) -> Result<Option<Value>> {
        tracing::debug!("GET {}", url);
        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }
        let response = request.send().await?;

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

        Ok(Some(response.json().await?))
    }
}
