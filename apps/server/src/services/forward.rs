//! Forward runs
//!
//! One run per trigger event:
//!
//! 1. `resolve-root`: fetch the root resource (404 when absent everywhere)
//! 2. `forward-root`: upload its dependency closure, then the root itself
//! 3. `search-and-forward`: for every clinical type of the flavor, search the
//!    patient's resources and forward each match. Failures are recorded as
//!    notes and the remaining types continue.
//! 4. `assemble-document` / `send-document` (document flavors only): fetch
//!    the patient summary, assemble the ITI-65 transaction and submit it.
//!
//! Progress is never rolled back. The report always carries the per-type
//! counts of what reached the destination.

use crate::config::ForwardingConfig;
use crate::gateway::{Destination, ResourceSource, TerminologyValidator};
use crate::metrics::{FORWARD_RUNS_TOTAL, FORWARD_RUN_DURATION_SECONDS};
use crate::services::assembler::BundleAssembler;
use crate::services::diagnostics::{DiagnosticParser, HapiDiagnosticParser};
use crate::services::fetcher::ResourceFetcher;
use crate::services::resolver::DependencyResolver;
use crate::services::terminology::TerminologyNotifier;
use crate::services::uploader::UploadController;
use crate::{Error, Result};
use futures::StreamExt;
use relay_models::{is_valid_id, FhirResource, ResourceRef};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::Instrument;

/// Trigger families sharing the forwarding engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flavor {
    Encounter,
    Immunization,
    Procedure,
    Condition,
    MedicationRequest,
    Iti65,
}

impl Flavor {
    pub const ALL: [Flavor; 6] = [
        Flavor::Encounter,
        Flavor::Immunization,
        Flavor::Procedure,
        Flavor::Condition,
        Flavor::MedicationRequest,
        Flavor::Iti65,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Flavor::Encounter => "encounter",
            Flavor::Immunization => "immunization",
            Flavor::Procedure => "procedure",
            Flavor::Condition => "condition",
            Flavor::MedicationRequest => "medication-request",
            Flavor::Iti65 => "iti65",
        }
    }

    pub fn profile(self) -> &'static ForwardProfile {
        match self {
            Flavor::Encounter => &ENCOUNTER_PROFILE,
            Flavor::Immunization => &IMMUNIZATION_PROFILE,
            Flavor::Procedure => &PROCEDURE_PROFILE,
            Flavor::Condition => &CONDITION_PROFILE,
            Flavor::MedicationRequest => &MEDICATION_REQUEST_PROFILE,
            Flavor::Iti65 => &ITI65_PROFILE,
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flavor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Flavor::ALL
            .into_iter()
            .find(|flavor| flavor.as_str() == s)
            .ok_or_else(|| Error::InvalidRequest(format!("unknown forward flavor '{s}'")))
    }
}

/// A patient-scoped search run after the root is forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchSpec {
    pub resource_type: &'static str,
    pub includes: &'static [&'static str],
}

const fn search(resource_type: &'static str) -> SearchSpec {
    SearchSpec {
        resource_type,
        includes: &[],
    }
}

const MEDICATION_REQUESTS: SearchSpec = SearchSpec {
    resource_type: "MedicationRequest",
    includes: &["MedicationRequest:medication"],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardProfile {
    pub root_type: &'static str,
    pub searches: &'static [SearchSpec],
    /// Assemble and submit the patient summary document
    pub document: bool,
}

const ENCOUNTER_PROFILE: ForwardProfile = ForwardProfile {
    root_type: "Encounter",
    searches: &[
        search("Observation"),
        search("Condition"),
        search("MedicationRequest"),
        search("Immunization"),
        search("Procedure"),
        search("AllergyIntolerance"),
    ],
    document: false,
};

const IMMUNIZATION_PROFILE: ForwardProfile = ForwardProfile {
    root_type: "Patient",
    searches: &[search("Immunization")],
    document: false,
};

const PROCEDURE_PROFILE: ForwardProfile = ForwardProfile {
    root_type: "Patient",
    searches: &[search("Procedure")],
    document: false,
};

const CONDITION_PROFILE: ForwardProfile = ForwardProfile {
    root_type: "Patient",
    searches: &[search("Condition")],
    document: false,
};

const MEDICATION_REQUEST_PROFILE: ForwardProfile = ForwardProfile {
    root_type: "Patient",
    searches: &[MEDICATION_REQUESTS],
    document: false,
};

const ITI65_PROFILE: ForwardProfile = ForwardProfile {
    root_type: "Patient",
    searches: &[
        search("Condition"),
        MEDICATION_REQUESTS,
        search("Immunization"),
        search("AllergyIntolerance"),
    ],
    document: true,
};

/// Run step names reported on failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    ResolveRoot,
    ForwardRoot,
    SearchAndForward,
    AssembleDocument,
    SendDocument,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::ResolveRoot => "resolve-root",
            Step::ForwardRoot => "forward-root",
            Step::SearchAndForward => "search-and-forward",
            Step::AssembleDocument => "assemble-document",
            Step::SendDocument => "send-document",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Ok => "ok",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }
}

/// Why a run stopped
#[derive(Debug)]
pub struct RunFailure {
    pub step: Step,
    pub error: Error,
}

impl RunFailure {
    fn at(step: Step) -> impl FnOnce(Error) -> RunFailure {
        move |error| RunFailure { step, error }
    }
}

#[derive(Debug)]
pub struct ForwardReport {
    pub status: RunStatus,
    pub uuid: String,
    pub run_id: String,
    pub sent: BTreeMap<String, usize>,
    pub notes: Vec<String>,
    pub failure: Option<RunFailure>,
}

/// The systems a run talks to
#[derive(Clone)]
pub struct Gateways {
    /// Read sources in priority order
    pub sources: Vec<Arc<dyn ResourceSource>>,
    pub destination: Arc<dyn Destination>,
    pub terminology: Option<Arc<dyn TerminologyValidator>>,
}

pub struct ForwardService {
    fetcher: ResourceFetcher,
    uploader: UploadController,
    notifier: TerminologyNotifier,
    destination: Arc<dyn Destination>,
    assembler: BundleAssembler,
    config: ForwardingConfig,
}

impl ForwardService {
    pub fn new(gateways: Gateways, config: ForwardingConfig, terminology_timeout: Duration) -> Self {
        Self::with_parser(gateways, config, terminology_timeout, Arc::new(HapiDiagnosticParser))
    }

    pub fn with_parser(
        gateways: Gateways,
        config: ForwardingConfig,
        terminology_timeout: Duration,
        parser: Arc<dyn DiagnosticParser>,
    ) -> Self {
        Self {
            fetcher: ResourceFetcher::new(gateways.sources),
            uploader: UploadController::new(gateways.destination.clone(), parser),
            notifier: TerminologyNotifier::new(gateways.terminology, terminology_timeout),
            destination: gateways.destination,
            assembler: BundleAssembler::new(
                config.strip_code_systems,
                config.external_base_url.clone(),
            ),
            config,
        }
    }

    /// Base URL of the source summaries are read from, used for document
    /// references the summary does not resolve.
    pub fn with_source_base_url(mut self, base_url: &str) -> Self {
        self.assembler = self.assembler.with_source_base(base_url);
        self
    }

    /// Execute one forward run for `root_id`.
    ///
    /// Flipping `cancel` to `true` stops the run before its next upload.
    pub async fn run(
        &self,
        flavor: Flavor,
        root_id: &str,
        run_id: &str,
        cancel: watch::Receiver<bool>,
    ) -> ForwardReport {
        let started = Instant::now();
        let resolver = DependencyResolver::new(
            self.fetcher.clone(),
            self.uploader.clone(),
            self.notifier.clone(),
            self.config.max_concurrent_requests,
            self.config.default_organization.as_ref(),
            cancel,
        );

        let span = tracing::info_span!("forward_run", run_id, flavor = flavor.as_str(), root_id);
        let outcome = self
            .execute(flavor, root_id, &resolver)
            .instrument(span.clone())
            .await;

        let mut sent = resolver.sent();
        let failure = match outcome {
            Ok(document_sent) => {
                if document_sent {
                    *sent.entry("Bundle".to_string()).or_insert(0) += 1;
                }
                None
            }
            Err(failure) => Some(failure),
        };
        let notes = resolver.notes();
        let status = match (&failure, notes.is_empty()) {
            (Some(_), _) => RunStatus::Failed,
            (None, false) => RunStatus::Partial,
            (None, true) => RunStatus::Ok,
        };

        FORWARD_RUNS_TOTAL
            .with_label_values(&[flavor.as_str(), status.as_str()])
            .inc();
        FORWARD_RUN_DURATION_SECONDS
            .with_label_values(&[flavor.as_str()])
            .observe(started.elapsed().as_secs_f64());

        span.in_scope(|| match &failure {
            Some(f) => tracing::warn!(
                step = f.step.as_str(),
                error = %f.error,
                ?sent,
                "Forward run failed"
            ),
            None => tracing::info!(
                status = status.as_str(),
                ?sent,
                notes = notes.len(),
                "Forward run finished"
            ),
        });

        ForwardReport {
            status,
            uuid: root_id.to_string(),
            run_id: run_id.to_string(),
            sent,
            notes,
            failure,
        }
    }

    /// Returns whether a document was submitted.
    async fn execute(
        &self,
        flavor: Flavor,
        root_id: &str,
        resolver: &DependencyResolver,
    ) -> std::result::Result<bool, RunFailure> {
        let profile = flavor.profile();

        if !is_valid_id(root_id) {
            return Err(RunFailure {
                step: Step::ResolveRoot,
                error: Error::InvalidRequest(format!("'{root_id}' is not a valid resource id")),
            });
        }

        let root_ref = ResourceRef::new(profile.root_type, root_id);
        let root = resolver
            .load(&root_ref)
            .await
            .map_err(RunFailure::at(Step::ResolveRoot))?
            .ok_or_else(|| RunFailure {
                step: Step::ResolveRoot,
                error: Error::NotFound(root_ref.to_string()),
            })?;

        let patient_id = patient_of(&root).ok_or_else(|| RunFailure {
            step: Step::ResolveRoot,
            error: Error::InvalidResource(format!("{root_ref} has no Patient subject")),
        })?;

        resolver
            .forward(root)
            .await
            .map_err(RunFailure::at(Step::ForwardRoot))?;

        for spec in profile.searches {
            match self.search_and_forward(resolver, spec, &patient_id).await {
                Ok(()) => {}
                Err(e @ Error::Cancelled(_)) => {
                    return Err(RunFailure {
                        step: Step::SearchAndForward,
                        error: e,
                    })
                }
                Err(e) => {
                    tracing::warn!(resource_type = spec.resource_type, error = %e, "Search and forward failed");
                    resolver.add_note(format!("{}: {e}", spec.resource_type));
                }
            }
        }

        if profile.document {
            self.send_document(resolver, &patient_id).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn search_and_forward(
        &self,
        resolver: &DependencyResolver,
        spec: &SearchSpec,
        patient_id: &str,
    ) -> Result<()> {
        resolver.ensure_active(Step::SearchAndForward.as_str())?;

        let Some(results) = resolver
            .search(spec.resource_type, patient_id, spec.includes)
            .await?
        else {
            tracing::debug!(resource_type = spec.resource_type, "No source serves this search");
            return Ok(());
        };

        if results.truncated {
            resolver.add_note(format!(
                "{}: search truncated at the page limit, later pages not forwarded",
                spec.resource_type
            ));
        }
        resolver.prefetch(results.included);

        let matches: Vec<FhirResource> = results
            .matches
            .into_iter()
            .filter_map(|raw| match FhirResource::from_value(raw) {
                Ok(resource) => Some(resource),
                Err(e) => {
                    resolver.add_note(format!("{}: unusable search match: {e}", spec.resource_type));
                    None
                }
            })
            .collect();

        tracing::debug!(resource_type = spec.resource_type, matches = matches.len(), "Forwarding search matches");

        let outcomes: Vec<(ResourceRef, Result<_>)> = futures::stream::iter(matches)
            .map(|resource| async move {
                let key = resource.key();
                (key, resolver.forward(resource).await)
            })
            .buffered(resolver.concurrency())
            .collect()
            .await;

        for (key, outcome) in outcomes {
            match outcome {
                Ok(_) => {}
                Err(e @ Error::Cancelled(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(resource = %key, error = %e, "Resource not forwarded");
                    resolver.add_note(format!("{key}: {e}"));
                }
            }
        }
        Ok(())
    }

    async fn send_document(
        &self,
        resolver: &DependencyResolver,
        patient_id: &str,
    ) -> std::result::Result<(), RunFailure> {
        let summary = resolver
            .summary(patient_id)
            .await
            .map_err(RunFailure::at(Step::AssembleDocument))?
            .ok_or_else(|| RunFailure {
                step: Step::AssembleDocument,
                error: Error::NotFound(format!("Patient/{patient_id}/$summary")),
            })?;

        let assembled = self
            .assembler
            .assemble(summary)
            .map_err(RunFailure::at(Step::AssembleDocument))?;

        resolver
            .ensure_active(Step::SendDocument.as_str())
            .map_err(RunFailure::at(Step::SendDocument))?;

        let response = self
            .destination
            .submit_transaction(&assembled.transaction)
            .await
            .map_err(RunFailure::at(Step::SendDocument))?;

        if response.is_success() {
            tracing::info!(bundle_id = %assembled.bundle_id, status = response.status, "Document submitted");
            return Ok(());
        }

        let error = if response.is_client_error() {
            Error::ValidationRejected {
                resource: ResourceRef::new("Bundle", &assembled.bundle_id),
                status: response.status,
                diagnostics: response.diagnostics(),
            }
        } else {
            Error::Upstream(format!(
                "destination answered {} to the document transaction: {}",
                response.status,
                response.diagnostics()
            ))
        };
        Err(RunFailure {
            step: Step::SendDocument,
            error,
        })
    }
}

/// Patient a root resource belongs to
fn patient_of(root: &FhirResource) -> Option<String> {
    if root.resource_type == "Patient" {
        return Some(root.id.clone());
    }
    ["subject", "patient"]
        .iter()
        .flat_map(|path| root.references_at(path))
        .find(|r| r.is_type("Patient"))
        .map(|r| r.id)
}
