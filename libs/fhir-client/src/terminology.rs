//! Terminology validation client

use crate::error::Result;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// One coding submitted for validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodingPayload {
    pub system: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// Client for the terminology validator's `POST /_validate`.
#[derive(Debug, Clone)]
pub struct TerminologyClient {
    client: Client,
    base_url: String,
}

impl TerminologyClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Submit one coding. Returns the HTTP status; the body is not inspected.
    pub async fn validate(&self, coding: &CodingPayload) -> Result<u16> {
        let url = format!("{}/_validate", self.base_url);
        let response = self.client.post(&url).json(coding).send().await?;
        Ok(response.status().as_u16())
    }
}
