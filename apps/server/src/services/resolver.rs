//! Dependency-aware resolution and upload
//!
//! A [`DependencyResolver`] belongs to exactly one forward run. Before a
//! resource is uploaded, every reference listed for its type in
//! [`dependencies_of`] is resolved (fetched, recursively resolved and
//! uploaded) field by field. References inside one field are independent
//! and resolved concurrently. Targets that cannot be uploaded are handled by
//! the field's [`DependencyPolicy`].
//!
//! Network calls hold a permit of the run's limiter only while in flight, so
//! recursion never starves the pool.

use crate::config::DefaultOrganizationConfig;
use crate::gateway::SearchResults;
use crate::services::dependencies::{dependencies_of, DependencyField, DependencyPolicy};
use crate::services::fetcher::ResourceFetcher;
use crate::services::ledger::{Begin, LedgerState, UploadLedger};
use crate::services::terminology::TerminologyNotifier;
use crate::services::uploader::UploadController;
use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use relay_models::{FhirResource, ResourceRef};
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tokio::sync::{watch, Semaphore, SemaphorePermit};

/// Outcome of resolving one reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepStatus {
    /// Uploaded to the destination during this run
    Available,
    /// Unknown to every source, or part of a reference cycle
    Absent,
    /// Could not be uploaded
    Failed,
}

impl DepStatus {
    pub fn is_available(self) -> bool {
        self == DepStatus::Available
    }
}

impl From<LedgerState> for DepStatus {
    fn from(state: LedgerState) -> Self {
        match state {
            LedgerState::Uploaded => DepStatus::Available,
            LedgerState::Failed => DepStatus::Failed,
            LedgerState::KnownAbsent | LedgerState::InProgress => DepStatus::Absent,
        }
    }
}

pub struct DependencyResolver {
    fetcher: ResourceFetcher,
    uploader: UploadController,
    notifier: TerminologyNotifier,
    ledger: UploadLedger,
    prefetched: Mutex<HashMap<ResourceRef, JsonValue>>,
    limiter: Semaphore,
    concurrency: usize,
    default_organization: Option<ResourceRef>,
    notes: Mutex<Vec<String>>,
    cancel: watch::Receiver<bool>,
}

impl DependencyResolver {
    pub fn new(
        fetcher: ResourceFetcher,
        uploader: UploadController,
        notifier: TerminologyNotifier,
        max_concurrent_requests: usize,
        default_organization: Option<&DefaultOrganizationConfig>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let concurrency = max_concurrent_requests.max(1);
        let mut prefetched = HashMap::new();
        let default_organization = default_organization.map(|org| {
            let key = ResourceRef::new("Organization", &org.id);
            prefetched.insert(
                key.clone(),
                json!({"resourceType": "Organization", "id": org.id, "name": org.name}),
            );
            key
        });

        Self {
            fetcher,
            uploader,
            notifier,
            ledger: UploadLedger::new(),
            prefetched: Mutex::new(prefetched),
            limiter: Semaphore::new(concurrency),
            concurrency,
            default_organization,
            notes: Mutex::new(Vec::new()),
            cancel,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn ledger(&self) -> &UploadLedger {
        &self.ledger
    }

    /// Uploaded resources per type
    pub fn sent(&self) -> BTreeMap<String, usize> {
        self.ledger.uploaded_counts()
    }

    pub fn notes(&self) -> Vec<String> {
        self.notes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn add_note(&self, note: impl Into<String>) {
        self.notes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(note.into());
    }

    /// Seed resources that need no fetch, e.g. `_include`d search entries.
    ///
    /// Entries without `resourceType` or `id` are ignored. An existing entry
    /// is not replaced.
    pub fn prefetch(&self, resources: impl IntoIterator<Item = JsonValue>) {
        let mut prefetched = self
            .prefetched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for raw in resources {
            if let Ok(resource) = FhirResource::from_value(raw) {
                prefetched
                    .entry(resource.key())
                    .or_insert(resource.raw);
            }
        }
    }

    /// Fail with [`Error::Cancelled`] once the caller has gone away.
    pub fn ensure_active(&self, step: &str) -> Result<()> {
        if *self.cancel.borrow() {
            return Err(Error::Cancelled(step.to_string()));
        }
        Ok(())
    }

    /// Fetch a resource through the prefetch cache and the source chain.
    pub async fn load(&self, target: &ResourceRef) -> Result<Option<FhirResource>> {
        let cached = self
            .prefetched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(target);
        if let Some(raw) = cached {
            return FhirResource::from_value(raw).map(Some).map_err(Error::from);
        }

        let _permit = self.permit().await?;
        self.fetcher.fetch(&target.resource_type, &target.id).await
    }

    /// Search a patient's resources through the source chain.
    pub async fn search(
        &self,
        resource_type: &str,
        patient_id: &str,
        includes: &[&str],
    ) -> Result<Option<SearchResults>> {
        let _permit = self.permit().await?;
        self.fetcher.search(resource_type, patient_id, includes).await
    }

    /// Patient summary document from the first source offering one
    pub async fn summary(&self, patient_id: &str) -> Result<Option<JsonValue>> {
        let _permit = self.permit().await?;
        self.fetcher.summary(patient_id).await
    }

    async fn permit(&self) -> Result<SemaphorePermit<'_>> {
        self.limiter
            .acquire()
            .await
            .map_err(|_| Error::Internal("request limiter closed".to_string()))
    }

    /// Resolve and upload an already fetched top-level resource.
    ///
    /// Unlike nested dependencies, a failure here is returned to the caller.
    pub async fn forward(&self, resource: FhirResource) -> Result<DepStatus> {
        let key = resource.key();
        match self.ledger.begin(None, &key) {
            Begin::Acquired => {
                let outcome = self.process(resource).await;
                self.settle(&key, outcome)?;
                Ok(DepStatus::Available)
            }
            Begin::Settled(state) => Ok(state.into()),
            Begin::Wait => Ok(self.ledger.wait_settled(&key).await.into()),
            Begin::Cycle => Ok(DepStatus::Absent),
        }
    }

    /// Resolve `target` on behalf of `parent`, uploading it if needed.
    ///
    /// Absence and resource-scoped upload failures are reported through
    /// [`DepStatus`]; transport, source and cancellation errors are returned.
    pub fn resolve_ref(
        &self,
        parent: Option<ResourceRef>,
        target: ResourceRef,
    ) -> BoxFuture<'_, Result<DepStatus>> {
        async move {
            match self.ledger.begin(parent.as_ref(), &target) {
                Begin::Settled(state) => Ok(state.into()),
                Begin::Wait => Ok(self.ledger.wait_settled(&target).await.into()),
                Begin::Cycle => {
                    tracing::warn!(
                        resource = %target,
                        parent = parent.as_ref().map(ToString::to_string),
                        "Reference cycle, treating target as absent"
                    );
                    Ok(DepStatus::Absent)
                }
                Begin::Acquired => {
                    let resource = match self.load(&target).await {
                        Ok(Some(resource)) => resource,
                        Ok(None) => {
                            tracing::info!(resource = %target, "Dependency absent from every source");
                            self.ledger.finish(&target, LedgerState::KnownAbsent);
                            return Ok(DepStatus::Absent);
                        }
                        Err(e) => {
                            self.ledger.finish(&target, LedgerState::Failed);
                            return Err(e);
                        }
                    };

                    let outcome = self.process(resource).await;
                    match self.settle(&target, outcome) {
                        Ok(()) => Ok(DepStatus::Available),
                        Err(e) if e.is_resource_scoped() => {
                            tracing::warn!(resource = %target, error = %e, "Dependency could not be uploaded");
                            self.add_note(format!("{target}: {e}"));
                            Ok(DepStatus::Failed)
                        }
                        Err(e) => Err(e),
                    }
                }
            }
        }
        .boxed()
    }

    fn settle(&self, key: &ResourceRef, outcome: Result<()>) -> Result<()> {
        let state = if outcome.is_ok() {
            LedgerState::Uploaded
        } else {
            LedgerState::Failed
        };
        self.ledger.finish(key, state);
        outcome
    }

    /// Resolve the dependencies of an acquired resource, then upload it.
    #[tracing::instrument(skip_all, fields(resource_type = %resource.resource_type, id = %resource.id))]
    async fn process(&self, mut resource: FhirResource) -> Result<()> {
        let key = resource.key();

        for field in dependencies_of(&resource.resource_type) {
            let targets = resource.references_at(field.path);
            if targets.is_empty() {
                continue;
            }

            let resolved: Vec<(ResourceRef, Result<DepStatus>)> = futures::stream::iter(targets)
                .map(|target| {
                    let parent = key.clone();
                    async move {
                        let status = self.resolve_ref(Some(parent), target.clone()).await;
                        (target, status)
                    }
                })
                .buffered(self.concurrency)
                .collect()
                .await;

            for (target, status) in resolved {
                if !status?.is_available() {
                    self.apply_policy(&mut resource, field, &target).await?;
                }
            }
        }

        self.ensure_active("upload")?;

        let parent = key.clone();
        self.uploader
            .put_with_dependency_recovery(&mut resource, &self.limiter, |missing| async move {
                self.resolve_ref(Some(parent), missing)
                    .await
                    .map(DepStatus::is_available)
            })
            .await?;

        tracing::debug!(resource = %key, "Uploaded");
        self.notifier.notify(&resource);
        Ok(())
    }

    async fn apply_policy(
        &self,
        resource: &mut FhirResource,
        field: &DependencyField,
        target: &ResourceRef,
    ) -> Result<()> {
        let key = resource.key();
        match field.policy {
            DependencyPolicy::Required => Err(Error::MissingDependency {
                resource: key,
                missing: target.clone(),
            }),
            DependencyPolicy::Strip | DependencyPolicy::StripContainer => {
                resource.strip_reference(field.path, target, field.policy.strip_mode());
                tracing::debug!(resource = %key, path = field.path, target = %target, "Stripped unavailable reference");
                Ok(())
            }
            DependencyPolicy::DefaultOrganization => {
                if let Some(org) = self.default_organization.as_ref().filter(|org| *org != target) {
                    let status = self.resolve_ref(Some(key.clone()), org.clone()).await?;
                    if status.is_available() {
                        resource.rewrite_reference(field.path, target, org);
                        tracing::debug!(resource = %key, path = field.path, from = %target, to = %org, "Rewrote to default organization");
                        return Ok(());
                    }
                }
                resource.strip_reference(field.path, target, field.policy.strip_mode());
                Ok(())
            }
        }
    }
}
