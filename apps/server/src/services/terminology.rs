//! Best-effort terminology notifications
//!
//! Codings of every uploaded resource are posted to the terminology
//! validator on detached tasks. Nothing in a forward run waits for them and
//! their outcome never changes an upload result.

use crate::gateway::{CodingPayload, TerminologyValidator};
use crate::metrics::TERMINOLOGY_NOTIFICATIONS_TOTAL;
use relay_models::FhirResource;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Elements whose `coding[]` is reported
const CODED_ELEMENTS: &[&str] = &["code", "vaccineCode", "medicationCodeableConcept"];

#[derive(Clone)]
pub struct TerminologyNotifier {
    validator: Option<Arc<dyn TerminologyValidator>>,
    timeout: Duration,
}

impl TerminologyNotifier {
    pub fn new(validator: Option<Arc<dyn TerminologyValidator>>, timeout: Duration) -> Self {
        Self { validator, timeout }
    }

    /// Notifier that never sends anything
    pub fn disabled() -> Self {
        Self::new(None, Duration::from_secs(1))
    }

    /// Spawn one validation call per coding of `resource`.
    ///
    /// The returned handles may be dropped; the tasks keep running.
    pub fn notify(&self, resource: &FhirResource) -> Vec<JoinHandle<()>> {
        let Some(validator) = &self.validator else {
            return Vec::new();
        };

        codings_of(&resource.raw)
            .into_iter()
            .map(|coding| {
                let validator = validator.clone();
                let timeout = self.timeout;
                let resource = resource.key();
                tokio::spawn(async move {
                    let outcome =
                        match tokio::time::timeout(timeout, validator.validate(&coding)).await {
                            Ok(Ok(status)) if (200..300).contains(&status) => "accepted",
                            Ok(Ok(status)) => {
                                tracing::debug!(
                                    resource = %resource,
                                    system = %coding.system,
                                    code = %coding.code,
                                    status,
                                    "Terminology validator disagreed"
                                );
                                "rejected"
                            }
                            Ok(Err(e)) => {
                                tracing::warn!(resource = %resource, error = %e, "Terminology notification failed");
                                "error"
                            }
                            Err(_) => {
                                tracing::warn!(resource = %resource, "Terminology notification timed out");
                                "timeout"
                            }
                        };
                    TERMINOLOGY_NOTIFICATIONS_TOTAL
                        .with_label_values(&[outcome])
                        .inc();
                })
            })
            .collect()
    }
}

/// Codings carrying both `system` and `code`, in element order
pub fn codings_of(resource: &JsonValue) -> Vec<CodingPayload> {
    CODED_ELEMENTS
        .iter()
        .filter_map(|element| resource.get(*element))
        .filter_map(|concept| concept.get("coding").and_then(JsonValue::as_array))
        .flatten()
        .filter_map(|coding| {
            let system = coding.get("system").and_then(JsonValue::as_str)?;
            let code = coding.get("code").and_then(JsonValue::as_str)?;
            Some(CodingPayload {
                system: system.to_string(),
                code: code.to_string(),
                display: coding
                    .get("display")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string),
            })
        })
        .collect()
}
