//! REST clients used by the relay
//!
//! This crate provides async-first clients for the three kinds of upstream
//! system the relay talks to:
//!
//! - [`FhirRestClient`]: a FHIR REST gateway (source or destination)
//! - [`LegacyRestClient`]: the legacy, non-FHIR record REST API
//! - [`TerminologyClient`]: the terminology validation service
//!
//! All clients are cheap to clone and carry a per-request timeout.
//!
//! # Examples
//!
//! ```rust,no_run
//! use relay_client::FhirRestClient;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = FhirRestClient::new("https://gateway.example.org/fhir", Duration::from_secs(30))?;
//! if let Some(patient) = client.read("Patient", "123").await? {
//!     println!("{}", patient["id"]);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod fhir;
pub mod legacy;
pub mod models;
pub mod terminology;

pub use error::{Error, Result};
pub use fhir::FhirRestClient;
pub use legacy::{LegacyCredentials, LegacyRestClient};
pub use models::{SearchResults, WriteResponse};
pub use terminology::{CodingPayload, TerminologyClient};
