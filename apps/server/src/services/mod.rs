//! Forwarding engine
//!
//! - [`forward`]: run orchestration per trigger flavor
//! - [`resolver`]: dependency closure resolution and upload
//! - [`uploader`]: destination PUTs with one dependency-recovery retry
//! - [`assembler`] and [`sections`]: ITI-65 document transactions

pub mod assembler;
pub mod dependencies;
pub mod diagnostics;
pub mod fetcher;
pub mod forward;
pub mod ledger;
pub mod resolver;
pub mod sections;
pub mod terminology;
pub mod uploader;

pub use assembler::{AssembledDocument, BundleAssembler};
pub use diagnostics::{DiagnosticParser, HapiDiagnosticParser, MissingDependency};
pub use fetcher::ResourceFetcher;
pub use forward::{Flavor, ForwardReport, ForwardService, Gateways, RunStatus};
pub use ledger::UploadLedger;
pub use resolver::{DepStatus, DependencyResolver};
pub use terminology::TerminologyNotifier;
pub use uploader::UploadController;
