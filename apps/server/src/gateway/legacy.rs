//! Legacy record API as a last-resort source
//!
//! Only three record kinds map onto FHIR: providers become `Practitioner`,
//! drugs become `Medication` and drug orders become `MedicationRequest`. The
//! synthesized resources carry the minimum the destination needs.

use super::traits::ResourceSource;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_client::{LegacyRestClient, SearchResults};
use serde_json::{json, Value as JsonValue};

pub struct LegacySource {
    client: LegacyRestClient,
}

impl LegacySource {
    pub fn new(client: LegacyRestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceSource for LegacySource {
    fn name(&self) -> &str {
        "legacy"
    }

    async fn read(&self, resource_type: &str, id: &str) -> Result<Option<JsonValue>> {
        match resource_type {
            "Practitioner" => Ok(self
                .client
                .provider(id)
                .await?
                .map(|record| practitioner_from_provider(id, &record))),
            "Medication" => Ok(self
                .client
                .drug(id)
                .await?
                .map(|record| medication_from_drug(id, &record))),
            _ => Ok(None),
        }
    }

    async fn search(
        &self,
        resource_type: &str,
        patient_id: &str,
        _includes: &[&str],
    ) -> Result<Option<SearchResults>> {
        if resource_type != "MedicationRequest" {
            return Ok(None);
        }
        let Some(orders) = self.client.orders_for_patient(patient_id).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        let matches = orders
            .iter()
            .filter_map(|order| medication_request_from_order(patient_id, order, now))
            .collect();
        Ok(Some(SearchResults {
            matches,
            ..SearchResults::default()
        }))
    }
}

/// `Practitioner` with only `id` and `name`
pub fn practitioner_from_provider(id: &str, record: &JsonValue) -> JsonValue {
    let display = record
        .pointer("/person/display")
        .and_then(JsonValue::as_str)
        .or_else(|| record.get("display").and_then(JsonValue::as_str))
        .map(provider_name)
        .unwrap_or_default();

    let mut practitioner = json!({"resourceType": "Practitioner", "id": id});
    if !display.is_empty() {
        practitioner["name"] = json!([{ "text": display }]);
    }
    practitioner
}

/// Provider displays look like `"<identifier> - <name>"`; keep the name part.
fn provider_name(display: &str) -> String {
    display
        .split_once(" - ")
        .map(|(_, name)| name)
        .unwrap_or(display)
        .trim()
        .to_string()
}

/// `Medication` with only `code.text`
pub fn medication_from_drug(id: &str, record: &JsonValue) -> JsonValue {
    let text = record
        .get("name")
        .or_else(|| record.get("display"))
        .and_then(JsonValue::as_str)
        .unwrap_or(id);
    json!({
        "resourceType": "Medication",
        "id": id,
        "code": {"text": text}
    })
}

/// `MedicationRequest` from a drug order. Orders without a `uuid` are skipped.
///
/// Status is `completed` once either the stop or the auto-expiry timestamp
/// has passed, `active` otherwise.
pub fn medication_request_from_order(
    patient_id: &str,
    order: &JsonValue,
    now: DateTime<Utc>,
) -> Option<JsonValue> {
    let id = order.get("uuid").and_then(JsonValue::as_str)?;

    let ended = ["dateStopped", "autoExpireDate"]
        .iter()
        .filter_map(|field| order.get(*field).and_then(JsonValue::as_str))
        .filter_map(parse_timestamp)
        .any(|at| at <= now);
    let status = if ended { "completed" } else { "active" };

    let mut request = json!({
        "resourceType": "MedicationRequest",
        "id": id,
        "status": status,
        "intent": "order",
        "subject": {"reference": format!("Patient/{patient_id}")}
    });

    let drug_id = order.pointer("/drug/uuid").and_then(JsonValue::as_str);
    let drug_display = order.pointer("/drug/display").and_then(JsonValue::as_str);
    match (drug_id, drug_display) {
        (Some(drug_id), _) => {
            request["medicationReference"] = json!({"reference": format!("Medication/{drug_id}")});
        }
        (None, Some(display)) => {
            request["medicationCodeableConcept"] = json!({"text": display});
        }
        (None, None) => {}
    }

    if let Some(orderer) = order.pointer("/orderer/uuid").and_then(JsonValue::as_str) {
        request["requester"] = json!({"reference": format!("Practitioner/{orderer}")});
    }
    if let Some(activated) = order.get("dateActivated").and_then(JsonValue::as_str) {
        if let Some(at) = parse_timestamp(activated) {
            request["authoredOn"] = json!(at.to_rfc3339());
        }
    }
    if let Some(instructions) = order.get("dosingInstructions").and_then(JsonValue::as_str) {
        request["dosageInstruction"] = json!([{ "text": instructions }]);
    }

    Some(request)
}

/// RFC 3339, or the legacy `2024-01-02T10:00:00.000+0000` form
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
