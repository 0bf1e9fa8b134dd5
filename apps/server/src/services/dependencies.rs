//! Structural references per resource type
//!
//! Each entry names a reference path and what to do when its target cannot
//! be uploaded. Entries are listed in resolution order: a resource's
//! dependencies are resolved field by field in this order before the
//! resource itself is uploaded.

use relay_models::StripMode;

/// What happens to a reference whose target is unavailable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyPolicy {
    /// The referencing resource cannot be uploaded without it
    Required,
    /// Delete the reference element
    Strip,
    /// Delete the enclosing repeating element
    StripContainer,
    /// Point it at the configured default Organization, or strip it
    DefaultOrganization,
}

impl DependencyPolicy {
    pub fn strip_mode(self) -> StripMode {
        match self {
            DependencyPolicy::StripContainer => StripMode::Container,
            _ => StripMode::Field,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyField {
    pub path: &'static str,
    pub policy: DependencyPolicy,
}

const fn field(path: &'static str, policy: DependencyPolicy) -> DependencyField {
    DependencyField { path, policy }
}

use DependencyPolicy::{DefaultOrganization, Required, Strip, StripContainer};

const LOCATION: &[DependencyField] = &[
    field("partOf", Strip),
    field("managingOrganization", DefaultOrganization),
];

const ENCOUNTER: &[DependencyField] = &[
    field("partOf", Strip),
    field("location[].location", StripContainer),
    field("participant[].individual", Strip),
    field("subject", Required),
    field("serviceProvider", DefaultOrganization),
];

const OBSERVATION: &[DependencyField] = &[
    field("hasMember[]", StripContainer),
    field("subject", Required),
    field("encounter", Strip),
    field("performer[]", StripContainer),
];

const CONDITION: &[DependencyField] = &[
    field("subject", Required),
    field("encounter", Strip),
    field("recorder", Strip),
    field("asserter", Strip),
];

const MEDICATION_REQUEST: &[DependencyField] = &[
    field("medicationReference", Strip),
    field("subject", Required),
    field("encounter", Strip),
    field("requester", Strip),
    field("recorder", Strip),
];

const IMMUNIZATION: &[DependencyField] = &[
    field("patient", Required),
    field("encounter", Strip),
    field("performer[].actor", StripContainer),
    field("location", Strip),
];

const PROCEDURE: &[DependencyField] = &[
    field("subject", Required),
    field("encounter", Strip),
    field("performer[].actor", StripContainer),
    field("location", Strip),
];

const ALLERGY_INTOLERANCE: &[DependencyField] = &[
    field("patient", Required),
    field("encounter", Strip),
    field("recorder", Strip),
    field("asserter", Strip),
];

const ORGANIZATION: &[DependencyField] = &[field("partOf", Strip)];

const PATIENT: &[DependencyField] = &[
    field("managingOrganization", DefaultOrganization),
    field("generalPractitioner[]", StripContainer),
];

/// Dependency fields for `resource_type`; empty for leaves and unknown types.
pub fn dependencies_of(resource_type: &str) -> &'static [DependencyField] {
    match resource_type {
        "Location" => LOCATION,
        "Encounter" => ENCOUNTER,
        "Observation" => OBSERVATION,
        "Condition" => CONDITION,
        "MedicationRequest" => MEDICATION_REQUEST,
        "Immunization" => IMMUNIZATION,
        "Procedure" => PROCEDURE,
        "AllergyIntolerance" => ALLERGY_INTOLERANCE,
        "Organization" => ORGANIZATION,
        "Patient" => PATIENT,
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_have_no_dependencies() {
        assert!(dependencies_of("Practitioner").is_empty());
        assert!(dependencies_of("Medication").is_empty());
        assert!(dependencies_of("Basic").is_empty());
    }

    #[test]
    fn parents_resolve_before_actors() {
        let paths: Vec<&str> = dependencies_of("Encounter").iter().map(|f| f.path).collect();
        assert_eq!(
            paths,
            vec![
                "partOf",
                "location[].location",
                "participant[].individual",
                "subject",
                "serviceProvider"
            ]
        );
    }

    #[test]
    fn patient_link_is_required_on_clinical_types() {
        for rt in ["Observation", "Condition", "MedicationRequest", "Procedure"] {
            assert!(dependencies_of(rt)
                .iter()
                .any(|f| f.path == "subject" && f.policy == DependencyPolicy::Required));
        }
        for rt in ["Immunization", "AllergyIntolerance"] {
            assert!(dependencies_of(rt)
                .iter()
                .any(|f| f.path == "patient" && f.policy == DependencyPolicy::Required));
        }
    }

    #[test]
    fn container_policy_strips_whole_element() {
        assert_eq!(StripContainer.strip_mode(), StripMode::Container);
        assert_eq!(Strip.strip_mode(), StripMode::Field);
    }
}
