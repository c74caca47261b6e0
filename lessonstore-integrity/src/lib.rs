//! # lessonstore-integrity
//!
//! Content integrity passes over a lesson store:
//! - Identifier repair ([`identity`])
//! - Duplicate resolution ([`duplicates`])
//! - Prerequisite graph validation ([`prerequisites`])
//! - Tag provenance and coverage ([`tags`])
//! - Document ingest pipeline ([`ingest`])
//!
//! Schema migration lives in `lessonstore_common::db::migrator`.

pub mod duplicates;
pub mod identity;
pub mod ingest;
pub mod prerequisites;
pub mod report;
pub mod status;
pub mod tags;

pub use duplicates::{DuplicateReport, DuplicateResolver, TitleMatch};
pub use identity::{IdentityReport, IdentityValidator};
pub use ingest::{ingest, load_documents, IngestOptions, IngestReport};
pub use prerequisites::{PlaceholderPolicy, PrerequisiteGraphValidator, PrerequisiteReport};
pub use report::{PassSummary, Summarize};
pub use status::StoreStatus;
pub use tags::{SweepReport, TagAssociationManager};
