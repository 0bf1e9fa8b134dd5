//! Destination uploads with a single dependency-recovery retry
//!
//! Every PUT goes through [`UploadController::put_with_dependency_recovery`]:
//!
//! - 2xx: done
//! - transport timeout or connection failure: one more attempt
//! - 4xx whose diagnostics name another resource: resolve that resource, then
//!   one more attempt
//! - any other 4xx: [`Error::ValidationRejected`], no retry
//! - 5xx: [`Error::Upstream`], no retry
//!
//! The second attempt never retries again.

use crate::gateway::{Destination, WriteResponse};
use crate::metrics::{UPLOADS_TOTAL, UPLOAD_RETRIES_TOTAL};
use crate::services::diagnostics::DiagnosticParser;
use crate::{Error, Result};
use relay_models::{FhirResource, ResourceRef};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// How an upload reached the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPath {
    FirstAttempt,
    AfterTransientRetry,
    AfterDependencyRecovery,
}

impl UploadPath {
    pub fn attempts(self) -> u8 {
        match self {
            UploadPath::FirstAttempt => 1,
            _ => 2,
        }
    }
}

#[derive(Clone)]
pub struct UploadController {
    destination: Arc<dyn Destination>,
    parser: Arc<dyn DiagnosticParser>,
}

enum Attempt {
    Uploaded,
    Transient(Error),
    MissingDependency(ResourceRef, WriteResponse),
    Rejected(WriteResponse),
    ServerError(WriteResponse),
}

impl UploadController {
    pub fn new(destination: Arc<dyn Destination>, parser: Arc<dyn DiagnosticParser>) -> Self {
        Self {
            destination,
            parser,
        }
    }

    /// PUT `resource`, recovering once from a diagnosed missing dependency.
    ///
    /// `recover` uploads the named dependency and reports whether it is now
    /// available at the destination. When it is not, references to it are
    /// stripped from `resource` before the retry.
    pub async fn put_with_dependency_recovery<F, Fut>(
        &self,
        resource: &mut FhirResource,
        limiter: &Semaphore,
        recover: F,
    ) -> Result<UploadPath>
    where
        F: FnOnce(ResourceRef) -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let key = resource.key();

        let path = match self.attempt(resource, limiter).await? {
            Attempt::Uploaded => {
                record_upload(&key, "uploaded");
                return Ok(UploadPath::FirstAttempt);
            }
            Attempt::Transient(e) => {
                tracing::warn!(resource = %key, error = %e, "Transient upload failure, retrying once");
                UploadPath::AfterTransientRetry
            }
            Attempt::MissingDependency(missing, _) => {
                tracing::info!(resource = %key, missing = %missing, "Destination reports missing dependency");
                let available = recover(missing.clone()).await?;
                if !available {
                    let stripped = resource.strip_references_where(|r| r == &missing);
                    tracing::warn!(
                        resource = %key,
                        missing = %missing,
                        stripped,
                        "Missing dependency unavailable, retrying without it"
                    );
                }
                UploadPath::AfterDependencyRecovery
            }
            Attempt::Rejected(response) => return Err(rejected(&key, &response)),
            Attempt::ServerError(response) => return Err(server_error(&key, &response)),
        };

        let reason = match path {
            UploadPath::AfterTransientRetry => "transient",
            _ => "dependency",
        };
        let result = match self.attempt(resource, limiter).await? {
            Attempt::Uploaded => Ok(path),
            Attempt::Transient(e) => Err(e),
            Attempt::MissingDependency(missing, _) => Err(Error::MissingDependency {
                resource: key.clone(),
                missing,
            }),
            Attempt::Rejected(response) => Err(rejected(&key, &response)),
            Attempt::ServerError(response) => Err(server_error(&key, &response)),
        };

        let outcome = if result.is_ok() { "success" } else { "failure" };
        UPLOAD_RETRIES_TOTAL
            .with_label_values(&[reason, outcome])
            .inc();
        record_upload(&key, if result.is_ok() { "uploaded" } else { "rejected" });
        result
    }

    async fn attempt(&self, resource: &FhirResource, limiter: &Semaphore) -> Result<Attempt> {
        let response = {
            let _permit = limiter
                .acquire()
                .await
                .map_err(|_| Error::Internal("upload limiter closed".to_string()))?;
            self.destination.put(resource).await
        };

        let response = match response {
            Ok(response) => response,
            Err(e @ Error::TransientTransport(_)) => return Ok(Attempt::Transient(e)),
            Err(e) => {
                record_upload(&resource.key(), "error");
                return Err(e);
            }
        };

        if response.is_success() {
            return Ok(Attempt::Uploaded);
        }
        if !response.is_client_error() {
            return Ok(Attempt::ServerError(response));
        }

        let diagnostics = response.diagnostics();
        match self.parser.missing_dependency(&diagnostics, &resource.key()) {
            Some(missing) => Ok(Attempt::MissingDependency(missing.to_ref(), response)),
            None => Ok(Attempt::Rejected(response)),
        }
    }
}

fn rejected(key: &ResourceRef, response: &WriteResponse) -> Error {
    record_upload(key, "rejected");
    Error::ValidationRejected {
        resource: key.clone(),
        status: response.status,
        diagnostics: response.diagnostics(),
    }
}

fn server_error(key: &ResourceRef, response: &WriteResponse) -> Error {
    record_upload(key, "error");
    Error::Upstream(format!(
        "destination answered {} for {}: {}",
        response.status,
        key,
        response.diagnostics()
    ))
}

fn record_upload(key: &ResourceRef, outcome: &str) {
    UPLOADS_TOTAL
        .with_label_values(&[key.resource_type.as_str(), outcome])
        .inc();
}
