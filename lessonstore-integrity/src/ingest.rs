//! Document ingest pipeline
//!
//! Loads a directory of lesson documents and runs them through every pass:
//! identifier repair, document-stage prerequisite filtering, insertion,
//! duplicate resolution, store-stage prerequisite validation and the tag
//! coverage sweep.

use crate::duplicates::{DuplicateReport, DuplicateResolver, TitleMatch};
use crate::identity::{IdentityReport, IdentityValidator};
use crate::prerequisites::{PlaceholderPolicy, PrerequisiteGraphValidator, PrerequisiteReport};
use crate::report::{PassSummary, Summarize};
use crate::tags::{SweepReport, TagAssociationManager};
use lessonstore_common::db::TagProvenance;
use lessonstore_common::document::{encode_blocks, encode_prerequisites, LessonDocument};
use lessonstore_common::{time, Error, Result};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// A document file that could not be read or parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    pub path: PathBuf,
    pub reason: String,
}

/// Documents loaded from a directory
#[derive(Debug, Clone, Default)]
pub struct LoadedCorpus {
    pub documents: Vec<LessonDocument>,
    pub malformed: Vec<MalformedRecord>,
}

/// Load every `*.json` file under `dir`, in file name order
///
/// Files that fail to parse are recorded and skipped.
pub fn load_documents(dir: &Path) -> Result<LoadedCorpus> {
    if !dir.is_dir() {
        return Err(Error::NotFound(format!("document directory {}", dir.display())));
    }

    let mut corpus = LoadedCorpus::default();
    let walker = WalkDir::new(dir).follow_links(false).sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Error accessing entry: {}", e);
                if let Some(path) = e.path() {
                    corpus.malformed.push(MalformedRecord {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    });
                }
                continue;
            }
        };

        let is_json = entry
            .path()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if !entry.file_type().is_file() || !is_json {
            continue;
        }

        match LessonDocument::from_path(entry.path()) {
            Ok(doc) => corpus.documents.push(doc),
            Err(Error::MalformedDocument { path, reason }) => {
                warn!("Skipping malformed document {}: {}", path.display(), reason);
                corpus.malformed.push(MalformedRecord { path, reason });
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        loaded = corpus.documents.len(),
        malformed = corpus.malformed.len(),
        "Loaded documents from {}",
        dir.display()
    );
    Ok(corpus)
}

/// Pipeline settings
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub policy: PlaceholderPolicy,
    pub title_match: TitleMatch,
    pub check_cycles: bool,
    /// Fallback tag for the coverage sweep; `None` skips the sweep
    pub fallback_tag: Option<String>,
}

/// Rows written by [`insert_documents`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertSummary {
    pub inserted: usize,
    pub tags_created: usize,
    pub associations_created: usize,
}

/// Outcome of every pipeline stage
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub malformed: Vec<MalformedRecord>,
    pub identity: IdentityReport,
    pub document_prerequisites: PrerequisiteReport,
    pub insert: InsertSummary,
    pub duplicates: DuplicateReport,
    pub store_prerequisites: PrerequisiteReport,
    pub sweep: Option<SweepReport>,
}

impl Summarize for IngestReport {
    fn summary(&self) -> PassSummary {
        let mut parts = vec![
            self.identity.summary(),
            self.document_prerequisites.summary(),
            self.duplicates.summary(),
            self.store_prerequisites.summary(),
        ];
        if let Some(sweep) = &self.sweep {
            parts.push(sweep.summary());
        }

        let mut summary = PassSummary {
            skipped: self.malformed.len(),
            ..PassSummary::new("ingest")
        };
        for part in &parts {
            summary.repaired += part.repaired;
            summary.deleted += part.deleted;
            summary.errored += part.errored;
        }
        summary
    }
}

/// Insert documents as lesson rows in one transaction
///
/// Each document's tags become system tags associated with the lesson.
pub async fn insert_documents(pool: &SqlitePool, docs: &[LessonDocument]) -> Result<InsertSummary> {
    let mut tx = pool.begin().await?;
    let mut summary = InsertSummary::default();

    for doc in docs {
        let now = time::now_store();
        sqlx::query(
            "INSERT INTO lessons
             (lesson_id, title, domain, order_index, content_blocks, prerequisites, hidden, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&doc.lesson_id)
        .bind(&doc.title)
        .bind(&doc.domain)
        .bind(doc.order_index)
        .bind(encode_blocks(&doc.content_blocks)?)
        .bind(encode_prerequisites(&doc.prerequisites)?)
        .bind(doc.hidden as i64)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        summary.inserted += 1;

        for name in doc.tags.iter().map(|t| t.trim()) {
            if name.is_empty() {
                warn!(lesson_id = %doc.lesson_id, "Ignoring empty tag name");
                continue;
            }
            let (tag, created) =
                TagAssociationManager::create_or_fetch_in(&mut tx, name, &TagProvenance::System, None).await?;
            if created {
                summary.tags_created += 1;
            }
            if TagAssociationManager::associate_in(&mut tx, &doc.lesson_id, &tag.tag_id).await? {
                summary.associations_created += 1;
            }
        }
    }

    tx.commit().await?;
    info!(
        inserted = summary.inserted,
        tags_created = summary.tags_created,
        associations = summary.associations_created,
        "Inserted documents"
    );
    Ok(summary)
}

/// Run a loaded corpus through the whole pipeline
pub async fn ingest(pool: &SqlitePool, corpus: LoadedCorpus, options: &IngestOptions) -> Result<IngestReport> {
    let LoadedCorpus { mut documents, malformed } = corpus;
    info!("=== Ingest: {} document(s) ===", documents.len());

    let identity = IdentityValidator::repair_corpus(&mut documents);
    let document_prerequisites = PrerequisiteGraphValidator::validate_documents(&mut documents, &options.policy);
    let insert = insert_documents(pool, &documents).await?;
    let duplicates = DuplicateResolver::resolve(pool, options.title_match).await?;
    let store_prerequisites =
        PrerequisiteGraphValidator::validate_store(pool, &options.policy, options.check_cycles).await?;

    let sweep = match &options.fallback_tag {
        Some(name) => Some(TagAssociationManager::sweep_untagged(pool, name).await?),
        None => None,
    };

    Ok(IngestReport {
        malformed,
        identity,
        document_prerequisites,
        insert,
        duplicates,
        store_prerequisites,
        sweep,
    })
}
