//! Identifier validation and repair
//!
//! Lesson and content block identifiers must parse as UUIDs. Invalid ones are
//! replaced with fresh v4 UUIDs; block identifiers repeated within a lesson are
//! replaced the same way. A replacement is never an identifier already in use
//! and an old identifier is never handed out again. Valid identifiers in any
//! other spelling (upper case, braced, simple, urn) are rewritten to the
//! lower-case hyphenated form, and prerequisite entries follow.
//!
//! Lessons sharing the same invalid identifier get the same replacement, so a
//! rename always maps one old identifier to one new identifier and the lessons
//! remain same-identifier duplicates for the duplicate pass.

use crate::report::{PassSummary, Summarize};
use lessonstore_common::db::load_lesson_rows;
use lessonstore_common::document::{encode_blocks, encode_prerequisites, ContentBlock, LessonDocument};
use lessonstore_common::{uuid_utils, Result};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What kind of entity an identifier belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Lesson,
    Block,
}

/// Why an identifier was replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairReason {
    /// Did not parse as a UUID
    Invalid,
    /// Block identifier already used earlier in the same lesson
    Repeated,
    /// Valid UUID not written in lower-case hyphenated form
    Noncanonical,
}

/// One identifier replacement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierRepair {
    pub kind: IdentifierKind,
    /// Owning lesson, after any lesson repair
    pub lesson_id: String,
    pub old_id: String,
    pub new_id: String,
    pub reason: RepairReason,
}

impl fmt::Display for IdentifierRepair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self.reason {
            RepairReason::Invalid => "invalid",
            RepairReason::Repeated => "repeated",
            RepairReason::Noncanonical => "noncanonical",
        };
        match self.kind {
            IdentifierKind::Lesson => {
                write!(f, "lesson '{}' -> '{}' ({})", self.old_id, self.new_id, reason)
            }
            IdentifierKind::Block => write!(
                f,
                "block '{}' of lesson {} -> '{}' ({})",
                self.old_id, self.lesson_id, self.new_id, reason
            ),
        }
    }
}

/// Outcome of an identity pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityReport {
    pub lessons_checked: usize,
    pub blocks_checked: usize,
    pub repairs: Vec<IdentifierRepair>,
    /// Prerequisite entries and tag associations rewritten to a new or canonical lesson identifier
    pub references_updated: usize,
    /// Progress rows still pointing at a retired lesson identifier
    pub orphaned_progress: i64,
    /// Rows whose stored payload could not be decoded
    pub errored: usize,
}

impl IdentityReport {
    /// Lesson renames as (old, new) pairs, in repair order
    pub fn lesson_renames(&self) -> Vec<(&str, &str)> {
        let mut seen = HashSet::new();
        self.repairs
            .iter()
            .filter(|r| r.kind == IdentifierKind::Lesson)
            .filter(|r| seen.insert(r.old_id.as_str()))
            .map(|r| (r.old_id.as_str(), r.new_id.as_str()))
            .collect()
    }
}

impl Summarize for IdentityReport {
    fn summary(&self) -> PassSummary {
        let checked = self.lessons_checked + self.blocks_checked;
        PassSummary {
            repaired: self.repairs.len(),
            skipped: checked.saturating_sub(self.repairs.len()),
            errored: self.errored,
            ..PassSummary::new("repair-ids")
        }
    }
}

/// Replacement identifiers handed out during one pass
struct Renames {
    by_old: HashMap<String, String>,
    taken: HashSet<Uuid>,
}

impl Renames {
    fn new<'a>(existing: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            by_old: HashMap::new(),
            taken: existing
                .into_iter()
                .filter_map(|id| uuid_utils::parse(id).ok())
                .collect(),
        }
    }

    fn replacement(&mut self, old_id: &str) -> String {
        if let Some(new_id) = self.by_old.get(old_id) {
            return new_id.clone();
        }
        let new_id = fresh_id(&self.taken);
        if let Ok(uuid) = uuid_utils::parse(&new_id) {
            self.taken.insert(uuid);
        }
        self.by_old.insert(old_id.to_string(), new_id.clone());
        new_id
    }

    /// New identifier for a lesson that is invalid or not in canonical form
    fn lesson_replacement(&mut self, lesson_id: &str) -> Option<(String, RepairReason)> {
        match uuid_utils::canonical(lesson_id) {
            Some(canonical) if canonical == lesson_id => None,
            Some(canonical) => {
                self.by_old.insert(lesson_id.to_string(), canonical.clone());
                Some((canonical, RepairReason::Noncanonical))
            }
            None => Some((self.replacement(lesson_id), RepairReason::Invalid)),
        }
    }

    /// Rewritten form of a prerequisite entry, if it changes
    fn reference(&self, target: &str) -> Option<String> {
        if let Some(new_id) = self.by_old.get(target) {
            return Some(new_id.clone());
        }
        uuid_utils::canonical(target).filter(|canonical| canonical != target)
    }
}

fn fresh_id(taken: &HashSet<Uuid>) -> String {
    uuid_utils::generate_unused(|candidate| {
        uuid_utils::parse(candidate)
            .map(|uuid| taken.contains(&uuid))
            .unwrap_or(false)
    })
}

/// Validates and repairs lesson and block identifiers
pub struct IdentityValidator;

impl IdentityValidator {
    pub fn is_valid_identifier(id: &str) -> bool {
        uuid_utils::is_valid(id)
    }

    /// Repair block identifiers of one lesson in place
    ///
    /// The first occurrence of a valid identifier keeps it, rewritten to
    /// canonical form if needed; later repeats and invalid identifiers are
    /// replaced.
    pub fn repair_blocks(lesson_id: &str, blocks: &mut [ContentBlock]) -> Vec<IdentifierRepair> {
        let mut existing: HashSet<Uuid> = blocks
            .iter()
            .filter_map(|b| uuid_utils::parse(&b.block_id).ok())
            .collect();
        let mut seen = HashSet::new();
        let mut repairs = Vec::new();

        for block in blocks.iter_mut() {
            let (canonical, reason) = match uuid_utils::parse(&block.block_id) {
                Ok(uuid) if seen.insert(uuid) => {
                    let canonical = uuid.hyphenated().to_string();
                    if canonical == block.block_id {
                        continue;
                    }
                    (Some(canonical), RepairReason::Noncanonical)
                }
                Ok(_) => (None, RepairReason::Repeated),
                Err(_) => (None, RepairReason::Invalid),
            };

            let new_id = canonical.unwrap_or_else(|| {
                let new_id = fresh_id(&existing);
                if let Ok(uuid) = uuid_utils::parse(&new_id) {
                    existing.insert(uuid);
                    seen.insert(uuid);
                }
                new_id
            });
            let old_id = std::mem::replace(&mut block.block_id, new_id.clone());
            debug!(lesson_id, old_id = %old_id, new_id = %new_id, "Replaced block identifier");
            repairs.push(IdentifierRepair {
                kind: IdentifierKind::Block,
                lesson_id: lesson_id.to_string(),
                old_id,
                new_id,
                reason,
            });
        }

        repairs
    }

    /// Repair one document in isolation
    ///
    /// References from other documents are not touched; use
    /// [`IdentityValidator::repair_corpus`] when the document is part of a corpus.
    pub fn repair_document(doc: &mut LessonDocument) -> Vec<IdentifierRepair> {
        let mut renames = Renames::new(std::iter::once(doc.lesson_id.as_str()));
        Self::repair_lesson(doc, &mut renames)
    }

    /// Repair every document and rewrite prerequisite references to renamed lessons
    pub fn repair_corpus(docs: &mut [LessonDocument]) -> IdentityReport {
        let mut renames = Renames::new(docs.iter().map(|d| d.lesson_id.as_str()));
        let mut report = IdentityReport::default();

        for doc in docs.iter_mut() {
            report.lessons_checked += 1;
            report.blocks_checked += doc.content_blocks.len();
            report.repairs.extend(Self::repair_lesson(doc, &mut renames));
        }

        for doc in docs.iter_mut() {
            for prerequisite in doc.prerequisites.iter_mut() {
                if let Some(new_id) = renames.reference(prerequisite) {
                    *prerequisite = new_id;
                    report.references_updated += 1;
                }
            }
        }

        for repair in &report.repairs {
            info!("  Repaired {}", repair);
        }
        report
    }

    fn repair_lesson(doc: &mut LessonDocument, renames: &mut Renames) -> Vec<IdentifierRepair> {
        let mut repairs = Vec::new();

        if let Some((new_id, reason)) = renames.lesson_replacement(&doc.lesson_id) {
            let old_id = std::mem::replace(&mut doc.lesson_id, new_id.clone());
            repairs.push(IdentifierRepair {
                kind: IdentifierKind::Lesson,
                lesson_id: new_id.clone(),
                old_id,
                new_id,
                reason,
            });
        }

        repairs.extend(Self::repair_blocks(&doc.lesson_id, &mut doc.content_blocks));
        repairs
    }

    /// Repair identifiers stored in `lessons` within one transaction
    ///
    /// Lesson renames are carried into `lesson_tags` and into every lesson's
    /// prerequisite list. Progress rows keyed by a retired identifier are
    /// counted but left alone.
    pub async fn repair_store(pool: &SqlitePool) -> Result<IdentityReport> {
        info!("=== Identifier repair ===");
        let mut tx = pool.begin().await?;

        let rows = load_lesson_rows(&mut tx).await?;
        let mut renames = Renames::new(rows.iter().map(|r| r.lesson_id.as_str()));
        let mut report = IdentityReport::default();

        for row in &rows {
            report.lessons_checked += 1;

            let mut lesson_id = row.lesson_id.clone();
            if let Some((new_id, reason)) = renames.lesson_replacement(&row.lesson_id) {
                lesson_id = new_id;
                report.repairs.push(IdentifierRepair {
                    kind: IdentifierKind::Lesson,
                    lesson_id: lesson_id.clone(),
                    old_id: row.lesson_id.clone(),
                    new_id: lesson_id.clone(),
                    reason,
                });
            }

            let mut encoded_blocks = None;
            match row.blocks() {
                Ok(mut blocks) => {
                    report.blocks_checked += blocks.len();
                    let repairs = Self::repair_blocks(&lesson_id, &mut blocks);
                    if !repairs.is_empty() {
                        encoded_blocks = Some(encode_blocks(&blocks)?);
                        report.repairs.extend(repairs);
                    }
                }
                Err(e) => {
                    warn!(
                        row_id = row.row_id,
                        lesson_id = %row.lesson_id,
                        "Content blocks not decodable, left unchanged: {}",
                        e
                    );
                    report.errored += 1;
                }
            }

            if lesson_id != row.lesson_id || encoded_blocks.is_some() {
                sqlx::query(
                    "UPDATE lessons SET lesson_id = ?, content_blocks = COALESCE(?, content_blocks) WHERE id = ?",
                )
                .bind(&lesson_id)
                .bind(encoded_blocks)
                .bind(row.row_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        for (old_id, new_id) in &renames.by_old {
            // The new identifier may already carry the same tag
            let moved = sqlx::query("UPDATE OR IGNORE lesson_tags SET lesson_id = ? WHERE lesson_id = ?")
                .bind(new_id)
                .bind(old_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            sqlx::query("DELETE FROM lesson_tags WHERE lesson_id = ?")
                .bind(old_id)
                .execute(&mut *tx)
                .await?;
            report.references_updated += moved as usize;

            let orphaned: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM lesson_progress WHERE lesson_id = ?")
                    .bind(old_id)
                    .fetch_one(&mut *tx)
                    .await?;
            if orphaned > 0 {
                warn!(
                    old_id = %old_id,
                    new_id = %new_id,
                    orphaned,
                    "Progress rows reference a retired lesson identifier"
                );
                report.orphaned_progress += orphaned;
            }
        }

        for row in &rows {
            let prerequisites = match row.prerequisite_ids() {
                Ok(prerequisites) => prerequisites,
                Err(e) => {
                    warn!(row_id = row.row_id, "Prerequisites not decodable: {}", e);
                    report.errored += 1;
                    continue;
                }
            };

            let mut rewritten = 0;
            let updated: Vec<String> = prerequisites
                .into_iter()
                .map(|p| match renames.reference(&p) {
                    Some(new_id) => {
                        rewritten += 1;
                        new_id
                    }
                    None => p,
                })
                .collect();

            if rewritten > 0 {
                sqlx::query("UPDATE lessons SET prerequisites = ? WHERE id = ?")
                    .bind(encode_prerequisites(&updated)?)
                    .bind(row.row_id)
                    .execute(&mut *tx)
                    .await?;
                report.references_updated += rewritten;
            }
        }

        tx.commit().await?;

        for repair in &report.repairs {
            info!("  Repaired {}", repair);
        }
        info!(
            repaired = report.repairs.len(),
            references_updated = report.references_updated,
            "Identifier repair complete"
        );
        Ok(report)
    }
}
