//! Version-agnostic FHIR models
//!
//! Types that work across FHIR R4, R4B, and R5

pub mod bundle;
pub mod error;
pub mod reference;
pub mod resource;

// Re-export commonly used types
pub use bundle::*;
pub use error::{Error, Result};
pub use reference::*;
pub use resource::*;
