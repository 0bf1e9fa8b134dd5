//! ITI-65 "Provide Document Bundle" assembly
//!
//! Turns a patient summary document into a transaction carrying the
//! summary, its DocumentReference, the SubmissionSet List and the Patient.
//! Inside the summary every entry is given a `urn:uuid:` full URL and all
//! internal references are rewritten to those URNs. References to resources
//! outside the summary are made absolute, against the configured external
//! base, else the base the entry was served from, else the source base.

use crate::services::sections::{finalize_sections, LOINC};
use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{SecondsFormat, Utc};
use relay_models::{rewrite_references, Bundle, BundleEntry, BundleType, ResourceRef};
use serde_json::{json, Value as JsonValue};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

const MHD_SUBMISSION_SET_PROFILE: &str =
    "https://profiles.ihe.net/ITI/MHD/StructureDefinition/IHE.MHD.Minimal.SubmissionSet";
const MHD_DOCUMENT_REFERENCE_PROFILE: &str =
    "https://profiles.ihe.net/ITI/MHD/StructureDefinition/IHE.MHD.Minimal.DocumentReference";
const MHD_SOURCE_ID_EXTENSION: &str =
    "https://profiles.ihe.net/ITI/MHD/StructureDefinition/ihe-sourceId";
const MHD_LIST_TYPES: &str = "https://profiles.ihe.net/ITI/MHD/CodeSystem/MHDlistTypes";
const IHE_FORMAT_CODES: &str = "http://ihe.net/fhir/ihe.formatcode.fhir/CodeSystem/formatcode";
const IPS_FORMAT_CODE: &str = "urn:ihe:pcc:ips:2020";
const PATIENT_SUMMARY_DOCUMENT: &str = "60591-5";
const RFC3986: &str = "urn:ietf:rfc:3986";

/// Result of [`BundleAssembler::assemble`]
#[derive(Debug, Clone)]
pub struct AssembledDocument {
    /// The transaction Bundle to submit
    pub transaction: JsonValue,
    pub bundle_id: String,
    pub bundle_urn: String,
    pub patient: ResourceRef,
    /// Serialized summary size in bytes
    pub size: usize,
    /// Base64 SHA-256 of the serialized summary
    pub hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct BundleAssembler {
    strip_code_systems: bool,
    external_base_url: Option<String>,
    source_base_url: Option<String>,
}

impl BundleAssembler {
    pub fn new(strip_code_systems: bool, external_base_url: Option<String>) -> Self {
        Self {
            strip_code_systems,
            external_base_url: external_base_url.map(|u| u.trim_end_matches('/').to_string()),
            source_base_url: None,
        }
    }

    /// Last-resort base for references leaving the summary
    pub fn with_source_base(mut self, base_url: impl Into<String>) -> Self {
        self.source_base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    #[tracing::instrument(skip_all)]
    pub fn assemble(&self, mut summary: JsonValue) -> Result<AssembledDocument> {
        if summary.get("resourceType").and_then(JsonValue::as_str) != Some("Bundle") {
            return Err(Error::InvalidResource(
                "patient summary is not a Bundle".to_string(),
            ));
        }

        let bundle_id = match summary.get("id").and_then(JsonValue::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let id = Uuid::new_v4().to_string();
                summary["id"] = json!(id);
                id
            }
        };

        let serialized = serde_json::to_vec(&summary)
            .map_err(|e| Error::Internal(format!("failed to serialize summary: {e}")))?;
        let size = serialized.len();
        let hash = BASE64.encode(Sha256::digest(&serialized));

        let entries = summary
            .get_mut("entry")
            .and_then(JsonValue::as_array_mut)
            .ok_or_else(|| Error::InvalidResource("patient summary has no entries".to_string()))?;

        let served_from: Vec<Option<String>> = entries
            .iter()
            .map(|e| e.get("fullUrl").and_then(JsonValue::as_str).and_then(base_of))
            .collect();
        let document_base = served_from.iter().flatten().next().cloned();

        let urns = assign_urns(entries);
        let mut patient = None;

        for (entry, entry_base) in entries.iter_mut().zip(served_from) {
            let full_url = entry
                .get("fullUrl")
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string();
            let Some(resource) = entry.get_mut("resource") else {
                continue;
            };
            let base = self
                .external_base_url
                .as_deref()
                .or(entry_base.as_deref())
                .or(document_base.as_deref())
                .or(self.source_base_url.as_deref());
            rewrite_references(resource, &mut |raw| map_reference(&urns, base, raw));
            strip_profiles(resource);
            if self.strip_code_systems {
                strip_coding_systems(resource);
            }

            let resource_type = resource
                .get("resourceType")
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string();
            match resource_type.as_str() {
                "Composition" => finalize_sections(resource),
                "Patient" if patient.is_none() => {
                    let id = resource
                        .get("id")
                        .and_then(JsonValue::as_str)
                        .unwrap_or_default()
                        .to_string();
                    patient = Some((ResourceRef::new("Patient", id), full_url, resource.clone()));
                }
                _ => {}
            }
        }

        let (patient_ref, patient_urn, patient_resource) = patient
            .filter(|(r, _, _)| !r.id.is_empty())
            .ok_or_else(|| Error::InvalidResource("patient summary has no Patient".to_string()))?;

        let bundle_uuid = Uuid::parse_str(&bundle_id).unwrap_or_else(|_| Uuid::new_v4());
        let bundle_urn = format!("urn:uuid:{bundle_uuid}");
        let document_reference_urn = urn();
        let list_urn = urn();
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let submission_set = json!({
            "resourceType": "List",
            "meta": {"profile": [MHD_SUBMISSION_SET_PROFILE]},
            "extension": [{
                "url": MHD_SOURCE_ID_EXTENSION,
                "valueIdentifier": {"value": bundle_urn}
            }],
            "identifier": [{"use": "usual", "system": RFC3986, "value": list_urn}],
            "status": "current",
            "mode": "working",
            "code": {"coding": [{"system": MHD_LIST_TYPES, "code": "submissionset"}]},
            "subject": {"reference": patient_urn},
            "date": now,
            "entry": [{"item": {"reference": document_reference_urn}}]
        });

        let document_reference = json!({
            "resourceType": "DocumentReference",
            "meta": {"profile": [MHD_DOCUMENT_REFERENCE_PROFILE]},
            "masterIdentifier": {"system": RFC3986, "value": bundle_urn},
            "status": "current",
            "type": {"coding": [{
                "system": LOINC,
                "code": PATIENT_SUMMARY_DOCUMENT,
                "display": "Patient summary Document"
            }]},
            "subject": {"reference": patient_urn},
            "date": now,
            "content": [{
                "attachment": {
                    "contentType": "application/fhir+json",
                    "url": bundle_urn,
                    "size": size,
                    "hash": hash
                },
                "format": {"system": IHE_FORMAT_CODES, "code": IPS_FORMAT_CODE}
            }]
        });

        let mut transaction = Bundle::new(BundleType::Transaction);
        transaction.id = Some(Uuid::new_v4().to_string());
        transaction.timestamp = Some(now);
        transaction.add_entry(
            BundleEntry::for_resource(&patient_urn, patient_resource)
                .with_request("PUT", patient_ref.key()),
        );
        transaction.add_entry(
            BundleEntry::for_resource(&list_urn, submission_set).with_request("POST", "List"),
        );
        transaction.add_entry(
            BundleEntry::for_resource(&document_reference_urn, document_reference)
                .with_request("POST", "DocumentReference"),
        );
        transaction.add_entry(
            BundleEntry::for_resource(&bundle_urn, summary).with_request("POST", "Bundle"),
        );

        tracing::info!(
            bundle_id = %bundle_id,
            patient = %patient_ref,
            size,
            "Assembled provide-document transaction"
        );

        Ok(AssembledDocument {
            transaction: transaction.to_value()?,
            bundle_id,
            bundle_urn,
            patient: patient_ref,
            size,
            hash,
        })
    }

}

/// Target URN of a reference, or the absolute form of a relative reference
/// to a resource outside the summary.
fn map_reference(urns: &HashMap<String, String>, base: Option<&str>, raw: &str) -> Option<String> {
    if let Some(urn) = urns.get(raw) {
        return Some(urn.clone());
    }
    let target = ResourceRef::parse(raw)?;
    if let Some(urn) = urns.get(&target.key()) {
        return Some(urn.clone());
    }
    if raw.contains("://") {
        return None;
    }
    match base {
        Some(base) => Some(format!("{base}/{}", target.key())),
        None => {
            tracing::warn!(reference = raw, "No base to make reference absolute");
            None
        }
    }
}

/// `http://host/fhir` for `http://host/fhir/Type/id[/_history/v]`
fn base_of(full_url: &str) -> Option<String> {
    if !full_url.contains("://") {
        return None;
    }
    let path = full_url.split("/_history/").next()?.trim_end_matches('/');
    let mut parts = path.rsplitn(3, '/');
    let _id = parts.next().filter(|s| !s.is_empty())?;
    let resource_type = parts.next()?;
    let base = parts.next()?;
    if !resource_type.starts_with(|c: char| c.is_ascii_uppercase()) || !base.contains("://") {
        return None;
    }
    Some(base.to_string())
}

fn urn() -> String {
    format!("urn:uuid:{}", Uuid::new_v4())
}

/// Give every entry a `urn:uuid:` full URL.
///
/// Returns the lookup from `Type/id` and previous full URLs to the URN.
fn assign_urns(entries: &mut [JsonValue]) -> HashMap<String, String> {
    let mut urns = HashMap::new();

    for entry in entries.iter_mut() {
        let previous = entry
            .get("fullUrl")
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        let urn = match &previous {
            Some(url) if url.starts_with("urn:uuid:") => url.clone(),
            _ => urn(),
        };

        if let Some(previous) = previous.filter(|p| *p != urn) {
            urns.insert(previous, urn.clone());
        }
        let key = entry.get("resource").and_then(|r| {
            let rt = r.get("resourceType")?.as_str()?;
            let id = r.get("id")?.as_str()?;
            Some(format!("{rt}/{id}"))
        });
        if let Some(key) = key {
            urns.entry(key).or_insert_with(|| urn.clone());
        }

        entry["fullUrl"] = json!(urn);
    }

    urns
}

fn strip_profiles(resource: &mut JsonValue) {
    let Some(meta) = resource.get_mut("meta").and_then(JsonValue::as_object_mut) else {
        return;
    };
    meta.remove("profile");
    if meta.is_empty() {
        if let Some(obj) = resource.as_object_mut() {
            obj.remove("meta");
        }
    }
}

/// Drop `system` from medication and vaccine codings.
fn strip_coding_systems(resource: &mut JsonValue) {
    let element = match resource.get("resourceType").and_then(JsonValue::as_str) {
        Some("Medication") => "code",
        Some("Immunization") => "vaccineCode",
        Some("MedicationRequest") | Some("MedicationStatement") => "medicationCodeableConcept",
        _ => return,
    };
    let Some(codings) = resource
        .get_mut(element)
        .and_then(|c| c.get_mut("coding"))
        .and_then(JsonValue::as_array_mut)
    else {
        return;
    };
    for coding in codings.iter_mut().filter_map(JsonValue::as_object_mut) {
        coding.remove("system");
    }
}
