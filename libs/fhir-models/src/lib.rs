//! FHIR data models for the relay integration layer
//!
//! This crate provides the handful of FHIR structures the forwarding engine
//! works with directly. Clinical payloads stay as `serde_json::Value`; only
//! the parts the engine reasons about are typed.
//!
//! # Module Organization
//!
//! - `common`: Version-agnostic models that work across FHIR R4, R4B, and R5
//!
//! # Example
//!
//! ```rust
//! use relay_models::common::{FhirResource, ResourceRef};
//! use serde_json::json;
//!
//! let encounter = FhirResource::from_value(json!({
//!     "resourceType": "Encounter",
//!     "id": "E1",
//!     "subject": {"reference": "Patient/P1"}
//! }))
//! .unwrap();
//!
//! let refs = encounter.references_at("subject");
//! assert_eq!(refs, vec![ResourceRef::new("Patient", "P1")]);
//! ```

pub mod common;

// Re-export commonly used types
pub use common::*;
