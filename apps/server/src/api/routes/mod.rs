//! Route tables

pub mod forwarder;
pub mod metrics;
