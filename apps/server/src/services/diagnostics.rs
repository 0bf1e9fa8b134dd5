//! Missing-dependency detection in destination diagnostics

use lazy_static::lazy_static;
use regex::Regex;
use relay_models::ResourceRef;

/// A dependency the destination reported as unknown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependency {
    pub resource_type: String,
    pub id: String,
}

impl MissingDependency {
    pub fn to_ref(&self) -> ResourceRef {
        ResourceRef::new(&self.resource_type, &self.id)
    }
}

/// Extracts missing dependencies from a rejected write's diagnostics.
///
/// The diagnostic wording is specific to the destination server product, so
/// it sits behind a trait.
pub trait DiagnosticParser: Send + Sync {
    /// Every `Type/id` the text names, in order of appearance
    fn mentioned(&self, diagnostics: &str) -> Vec<MissingDependency>;

    /// First named dependency other than the rejected resource itself
    fn missing_dependency(
        &self,
        diagnostics: &str,
        rejected: &ResourceRef,
    ) -> Option<MissingDependency> {
        self.mentioned(diagnostics)
            .into_iter()
            .find(|m| m.resource_type != rejected.resource_type || m.id != rejected.id)
    }
}

lazy_static! {
    static ref RESOURCE_MENTION: Regex =
        Regex::new(r"Resource\s+([A-Z][A-Za-z]+)/([A-Za-z0-9\-.]{1,64})")
            .expect("Failed to compile RESOURCE_MENTION");
}

/// Parser for HAPI-style messages such as
/// `Resource Medication/42 not found, specified in path: MedicationRequest.medication`
#[derive(Debug, Clone, Copy, Default)]
pub struct HapiDiagnosticParser;

impl DiagnosticParser for HapiDiagnosticParser {
    fn mentioned(&self, diagnostics: &str) -> Vec<MissingDependency> {
        RESOURCE_MENTION
            .captures_iter(diagnostics)
            .map(|caps| MissingDependency {
                resource_type: caps[1].to_string(),
                id: caps[2].to_string(),
            })
            .collect()
    }
}
