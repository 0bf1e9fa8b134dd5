//! FHIR Relay
//!
//! Forwards clinical resources from source record systems to a destination
//! FHIR repository:
//! - Dependency-aware upload ordering with cycle detection
//! - Recovery from destination-reported missing dependencies
//! - Source fallback chain (FHIR gateways, then a legacy REST API)
//! - IHE ITI-65 document bundle assembly and submission

#![allow(
    clippy::too_many_arguments,      // Functions with many args are acceptable for domain operations
    clippy::type_complexity,         // Complex types are acceptable when they represent domain concepts
    clippy::large_enum_variant,      // Large enum variants acceptable; boxing may impact performance
)]

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod metrics;
pub mod request_context;
pub mod services;
pub mod state;

pub use config::Config;
pub use error::{Error, Result};
pub use state::AppState;
