//! Literal FHIR references (`Reference.reference`)
//!
//! The relay only follows literal references that name a resource by type and
//! logical id. Contained (`#id`), `urn:` and conditional (`Type?query`)
//! references never resolve to a `ResourceRef`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// `(resourceType, id)` identity of a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub resource_type: String,
    pub id: String,
}

impl ResourceRef {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Parse a literal reference.
    ///
    /// Accepts `Type/id`, `Type/id/_history/vid` and absolute URLs whose path
    /// ends in either form. Returns `None` for anything else.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('#') || raw.starts_with("urn:") || raw.contains('?')
        {
            return None;
        }

        let raw = raw.split_once('#').map(|(b, _)| b).unwrap_or(raw);
        let path = match raw.split_once("://") {
            Some((_, rest)) => rest.split_once('/').map(|(_, p)| p)?,
            None => raw,
        };

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let tail = match segments.as_slice() {
            [.., rt, id, "_history", _vid] => [*rt, *id],
            [.., rt, id] => [*rt, *id],
            _ => return None,
        };

        let [resource_type, id] = tail;
        if !is_valid_resource_type_name(resource_type) || !is_valid_id(id) {
            return None;
        }
        Some(Self::new(resource_type, id))
    }

    /// Relative reference string, `Type/id`
    pub fn key(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }

    pub fn is_type(&self, resource_type: &str) -> bool {
        self.resource_type == resource_type
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.id)
    }
}

pub fn is_valid_resource_type_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if first.is_ascii_uppercase() => chars.all(|c| c.is_ascii_alphanumeric()),
        _ => false,
    }
}

/// FHIR `id` datatype: `[A-Za-z0-9\-\.]{1,64}`
pub fn is_valid_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 64
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_relative_reference() {
        assert_eq!(
            ResourceRef::parse("Location/L1"),
            Some(ResourceRef::new("Location", "L1"))
        );
    }

    #[test]
    fn parses_versioned_and_absolute_references() {
        assert_eq!(
            ResourceRef::parse("Practitioner/7/_history/3"),
            Some(ResourceRef::new("Practitioner", "7"))
        );
        assert_eq!(
            ResourceRef::parse("https://gw.example.org/fhir/Patient/abc-123"),
            Some(ResourceRef::new("Patient", "abc-123"))
        );
        assert_eq!(
            ResourceRef::parse("http://gw/fhir/Encounter/e.1/_history/2"),
            Some(ResourceRef::new("Encounter", "e.1"))
        );
    }

    #[test]
    fn rejects_non_literal_references() {
        assert_eq!(ResourceRef::parse("#med1"), None);
        assert_eq!(ResourceRef::parse("urn:uuid:7f3c"), None);
        assert_eq!(ResourceRef::parse("Patient?identifier=x|1"), None);
        assert_eq!(ResourceRef::parse("Patient"), None);
        assert_eq!(ResourceRef::parse("patient/1"), None);
        assert_eq!(ResourceRef::parse("Patient/has space"), None);
        assert_eq!(ResourceRef::parse(""), None);
    }

    #[test]
    fn key_and_display_agree() {
        let r = ResourceRef::new("Medication", "42");
        assert_eq!(r.key(), "Medication/42");
        assert_eq!(r.to_string(), "Medication/42");
        assert!(r.is_type("Medication"));
    }
}
