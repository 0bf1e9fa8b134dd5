use axum::body::Bytes;
use serde_json::{json, Value as JsonValue};

/// Converts a JSON value to request body bytes
pub fn to_json_body(value: &JsonValue) -> anyhow::Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

pub fn patient(id: &str) -> JsonValue {
    json!({
        "resourceType": "Patient",
        "id": id,
        "name": [{"family": "Wanjiru", "given": ["Achieng"]}],
        "gender": "female"
    })
}

pub fn practitioner(id: &str) -> JsonValue {
    json!({
        "resourceType": "Practitioner",
        "id": id,
        "name": [{"text": format!("Clinician {id}")}]
    })
}

pub fn location(id: &str, part_of: Option<&str>) -> JsonValue {
    let mut location = json!({
        "resourceType": "Location",
        "id": id,
        "name": format!("Ward {id}")
    });
    if let Some(parent) = part_of {
        location["partOf"] = json!({"reference": format!("Location/{parent}")});
    }
    location
}

/// Builder for Encounter resources
pub struct EncounterBuilder {
    id: String,
    patient: String,
    locations: Vec<String>,
    participants: Vec<String>,
    service_provider: Option<String>,
}

impl EncounterBuilder {
    pub fn new(id: impl Into<String>, patient: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            patient: patient.into(),
            locations: Vec::new(),
            participants: Vec::new(),
            service_provider: None,
        }
    }

    pub fn location(mut self, id: impl Into<String>) -> Self {
        self.locations.push(id.into());
        self
    }

    pub fn participant(mut self, practitioner: impl Into<String>) -> Self {
        self.participants.push(practitioner.into());
        self
    }

    pub fn service_provider(mut self, organization: impl Into<String>) -> Self {
        self.service_provider = Some(organization.into());
        self
    }

    pub fn build(self) -> JsonValue {
        let mut encounter = json!({
            "resourceType": "Encounter",
            "id": self.id,
            "status": "finished",
            "class": {
                "system": "http://terminology.hl7.org/CodeSystem/v3-ActCode",
                "code": "AMB"
            },
            "subject": {"reference": format!("Patient/{}", self.patient)}
        });
        if !self.locations.is_empty() {
            encounter["location"] = self
                .locations
                .iter()
                .map(|l| json!({"location": {"reference": format!("Location/{l}")}}))
                .collect();
        }
        if !self.participants.is_empty() {
            encounter["participant"] = self
                .participants
                .iter()
                .map(|p| json!({"individual": {"reference": format!("Practitioner/{p}")}}))
                .collect();
        }
        if let Some(org) = self.service_provider {
            encounter["serviceProvider"] = json!({"reference": format!("Organization/{org}")});
        }
        encounter
    }
}

pub fn observation(id: &str, patient: &str, encounter: &str) -> JsonValue {
    json!({
        "resourceType": "Observation",
        "id": id,
        "status": "final",
        "code": {"coding": [{"system": "http://loinc.org", "code": "8867-4", "display": "Heart rate"}]},
        "subject": {"reference": format!("Patient/{patient}")},
        "encounter": {"reference": format!("Encounter/{encounter}")},
        "valueQuantity": {"value": 72, "unit": "/min"}
    })
}

pub fn condition(id: &str, patient: &str) -> JsonValue {
    json!({
        "resourceType": "Condition",
        "id": id,
        "code": {"coding": [{"system": "http://snomed.info/sct", "code": "38341003", "display": "Hypertension"}]},
        "subject": {"reference": format!("Patient/{patient}")}
    })
}

pub fn medication_request(id: &str, patient: &str, medication: &str) -> JsonValue {
    json!({
        "resourceType": "MedicationRequest",
        "id": id,
        "status": "active",
        "intent": "order",
        "medicationReference": {"reference": format!("Medication/{medication}")},
        "subject": {"reference": format!("Patient/{patient}")}
    })
}

pub fn medication(id: &str) -> JsonValue {
    json!({
        "resourceType": "Medication",
        "id": id,
        "code": {"text": format!("Drug {id}")}
    })
}

/// `Bundle` of type `document` as returned by `$summary`
///
/// The Composition lists every condition under both the problems and the
/// past illness sections.
pub fn summary_document(patient: &JsonValue, conditions: &[JsonValue]) -> JsonValue {
    let patient_ref = format!("Patient/{}", patient["id"].as_str().unwrap_or_default());
    let condition_refs: Vec<JsonValue> = conditions
        .iter()
        .map(|c| json!({"reference": format!("Condition/{}", c["id"].as_str().unwrap_or_default())}))
        .collect();

    let composition = json!({
        "resourceType": "Composition",
        "id": "comp-1",
        "status": "final",
        "type": {"coding": [{"system": "http://loinc.org", "code": "60591-5"}]},
        "subject": {"reference": patient_ref},
        "date": "2024-06-01T10:00:00Z",
        "title": "Patient summary",
        "section": [
            {
                "title": "Past illness",
                "code": {"coding": [{"system": "http://loinc.org", "code": "11348-0"}]},
                "entry": condition_refs.clone()
            },
            {
                "title": "Problems",
                "code": {"coding": [{"system": "http://loinc.org", "code": "11450-4"}]},
                "entry": condition_refs
            }
        ]
    });

    let mut entries = vec![
        json!({"fullUrl": "https://gateway.test/fhir/Composition/comp-1", "resource": composition}),
        json!({"fullUrl": format!("https://gateway.test/fhir/{patient_ref}"), "resource": patient}),
    ];
    for condition in conditions {
        entries.push(json!({
            "fullUrl": format!("https://gateway.test/fhir/Condition/{}", condition["id"].as_str().unwrap_or_default()),
            "resource": condition
        }));
    }

    json!({
        "resourceType": "Bundle",
        "type": "document",
        "entry": entries
    })
}
