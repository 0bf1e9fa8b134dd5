//! Seams to the systems the relay talks to
//!
//! The engine only sees the traits in [`traits`]; [`http`] and [`legacy`]
//! implement them over the REST clients from `relay-client`.

pub mod http;
pub mod legacy;
pub mod traits;

pub use http::{FhirDestination, FhirSource, HttpTerminologyValidator};
pub use legacy::LegacySource;
pub use traits::{Destination, ResourceSource, TerminologyValidator};

pub use relay_client::{CodingPayload, SearchResults, WriteResponse};
