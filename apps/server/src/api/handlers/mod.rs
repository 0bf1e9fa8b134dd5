//! Request handlers for API endpoints
//!
//! Handlers extract and validate the request, hand the work to the
//! forwarding service and shape its report into a response.

pub mod forward;
pub mod metrics;

pub use forward::*;
pub use metrics::*;
