//! Per-request context injected by middleware.

/// Identity of one inbound request; a trigger request's id doubles as the
/// forward run id in logs and responses.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
}

impl RequestContext {
    pub fn run_id(&self) -> &str {
        &self.request_id
    }
}
