//! Duplicate lesson resolution
//!
//! Two equivalences are resolved in turn: same lesson identifier (UUIDs
//! compared by value, whatever their spelling), then same title. Within each class one canonical row survives:
//!
//! 1. latest `updated_at`
//! 2. latest `created_at`
//! 3. lexicographically smallest `lesson_id`
//! 4. lowest internal row id
//!
//! Missing or unparseable timestamps sort oldest. Classes decided by steps 3
//! or 4 are counted as ambiguous ties and logged.

use crate::report::{PassSummary, Summarize};
use lessonstore_common::db::{load_lesson_rows, LessonRow};
use lessonstore_common::{uuid_utils, Result};
use sqlx::SqlitePool;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::{info, warn};

/// Equivalence a duplicate was found under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Equivalence {
    SameIdentifier,
    SameTitle,
}

impl fmt::Display for Equivalence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Equivalence::SameIdentifier => f.write_str("same identifier"),
            Equivalence::SameTitle => f.write_str("same title"),
        }
    }
}

/// How titles are compared
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TitleMatch {
    #[default]
    Exact,
    /// Trimmed, whitespace collapsed, case folded
    Normalized,
}

impl TitleMatch {
    pub fn key(&self, title: &str) -> String {
        match self {
            TitleMatch::Exact => title.to_string(),
            TitleMatch::Normalized => title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase(),
        }
    }
}

/// Identifying key of a lesson row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonKey {
    pub row_id: i64,
    pub lesson_id: String,
    pub title: String,
}

impl From<&LessonRow> for LessonKey {
    fn from(row: &LessonRow) -> Self {
        Self {
            row_id: row.row_id,
            lesson_id: row.lesson_id.clone(),
            title: row.title.clone(),
        }
    }
}

impl fmt::Display for LessonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {} ({} \"{}\")", self.row_id, self.lesson_id, self.title)
    }
}

/// Audit record for one deleted row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateDeletion {
    pub equivalence: Equivalence,
    pub deleted: LessonKey,
    pub retained: LessonKey,
}

impl fmt::Display for DuplicateDeletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deleted {} kept {} [{}]", self.deleted, self.retained, self.equivalence)
    }
}

/// Survivors sharing a (domain, order_index) slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderCollision {
    pub domain: String,
    pub order_index: i64,
    pub lesson_ids: Vec<String>,
}

/// Selection made for one equivalence pass, before anything is deleted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionPlan {
    pub deletions: Vec<DuplicateDeletion>,
    /// Classes whose canonical row was decided by the identifier or row id tie-break
    pub ambiguous_ties: usize,
}

/// Outcome of a duplicate pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplicateReport {
    pub rows_scanned: usize,
    pub deletions: Vec<DuplicateDeletion>,
    pub ambiguous_ties: usize,
    /// Tag associations moved from a vanished identifier to its retained lesson
    pub associations_moved: u64,
    pub order_collisions: Vec<OrderCollision>,
}

impl Summarize for DuplicateReport {
    fn summary(&self) -> PassSummary {
        PassSummary {
            repaired: self.associations_moved as usize,
            deleted: self.deletions.len(),
            skipped: self.rows_scanned.saturating_sub(self.deletions.len()),
            ..PassSummary::new("dedupe")
        }
    }
}

/// Orders rows so the canonical member comes first
pub fn canonical_order(a: &LessonRow, b: &LessonRow) -> Ordering {
    timestamp_order(a, b)
        .then_with(|| a.lesson_id.cmp(&b.lesson_id))
        .then_with(|| a.row_id.cmp(&b.row_id))
}

fn timestamp_order(a: &LessonRow, b: &LessonRow) -> Ordering {
    b.updated_at
        .cmp(&a.updated_at)
        .then_with(|| b.created_at.cmp(&a.created_at))
}

/// Pick the canonical row of every equivalence class
///
/// Pure selection; rows are not modified.
pub fn plan_resolution(rows: &[LessonRow], equivalence: Equivalence, title_match: TitleMatch) -> ResolutionPlan {
    let mut classes: BTreeMap<String, Vec<&LessonRow>> = BTreeMap::new();
    for row in rows {
        let key = match equivalence {
            Equivalence::SameIdentifier => uuid_utils::identity_key(&row.lesson_id),
            Equivalence::SameTitle => title_match.key(&row.title),
        };
        classes.entry(key).or_default().push(row);
    }

    let mut plan = ResolutionPlan::default();
    for (key, mut members) in classes {
        if members.len() < 2 {
            continue;
        }
        members.sort_by(|a, b| canonical_order(a, b));

        let canonical = members[0];
        if timestamp_order(canonical, members[1]) == Ordering::Equal {
            plan.ambiguous_ties += 1;
            warn!(
                class = %key,
                equivalence = %equivalence,
                retained_row = canonical.row_id,
                "Duplicate class has identical timestamps, kept by identifier and row order"
            );
        }

        let retained = LessonKey::from(canonical);
        for member in &members[1..] {
            plan.deletions.push(DuplicateDeletion {
                equivalence,
                deleted: LessonKey::from(*member),
                retained: retained.clone(),
            });
        }
    }
    plan
}

/// (domain, order_index) slots held by more than one lesson
pub fn order_collisions(rows: &[LessonRow]) -> Vec<OrderCollision> {
    let mut slots: BTreeMap<(String, i64), Vec<String>> = BTreeMap::new();
    for row in rows {
        slots
            .entry((row.domain.clone(), row.order_index))
            .or_default()
            .push(row.lesson_id.clone());
    }

    slots
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|((domain, order_index), mut lesson_ids)| {
            lesson_ids.sort();
            OrderCollision {
                domain,
                order_index,
                lesson_ids,
            }
        })
        .collect()
}

/// Deletes non-canonical duplicate lessons
pub struct DuplicateResolver;

impl DuplicateResolver {
    /// Resolve both equivalences in one transaction
    pub async fn resolve(pool: &SqlitePool, title_match: TitleMatch) -> Result<DuplicateReport> {
        info!("=== Duplicate resolution ===");
        let mut tx = pool.begin().await?;

        let mut rows = load_lesson_rows(&mut tx).await?;
        let mut report = DuplicateReport {
            rows_scanned: rows.len(),
            ..Default::default()
        };

        for equivalence in [Equivalence::SameIdentifier, Equivalence::SameTitle] {
            let plan = plan_resolution(&rows, equivalence, title_match);
            report.ambiguous_ties += plan.ambiguous_ties;

            let deleted: HashSet<i64> = plan.deletions.iter().map(|d| d.deleted.row_id).collect();
            for deletion in &plan.deletions {
                sqlx::query("DELETE FROM lessons WHERE id = ?")
                    .bind(deletion.deleted.row_id)
                    .execute(&mut *tx)
                    .await?;
                info!("  Duplicate {}", deletion);
            }
            rows.retain(|r| !deleted.contains(&r.row_id));
            report.deletions.extend(plan.deletions);
        }

        let surviving: HashSet<&str> = rows.iter().map(|r| r.lesson_id.as_str()).collect();
        for deletion in &report.deletions {
            let old_id = deletion.deleted.lesson_id.as_str();
            let new_id = deletion.retained.lesson_id.as_str();
            if old_id == new_id || surviving.contains(old_id) {
                continue;
            }

            let copied = sqlx::query(
                "INSERT OR IGNORE INTO lesson_tags (lesson_id, tag_id, created_at)
                 SELECT ?, tag_id, created_at FROM lesson_tags WHERE lesson_id = ?",
            )
            .bind(new_id)
            .bind(old_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            sqlx::query("DELETE FROM lesson_tags WHERE lesson_id = ?")
                .bind(old_id)
                .execute(&mut *tx)
                .await?;

            if copied > 0 {
                info!(from = old_id, to = new_id, count = copied, "Moved tag associations");
            }
            report.associations_moved += copied;
        }

        tx.commit().await?;

        report.order_collisions = order_collisions(&rows);
        for collision in &report.order_collisions {
            warn!(
                domain = %collision.domain,
                order_index = collision.order_index,
                "Lessons share an order slot: {}",
                collision.lesson_ids.join(", ")
            );
        }

        info!(
            deleted = report.deletions.len(),
            ambiguous_ties = report.ambiguous_ties,
            "Duplicate resolution complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(hour: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap())
    }

    fn row(row_id: i64, lesson_id: &str, title: &str, updated_at: Option<DateTime<Utc>>) -> LessonRow {
        LessonRow {
            row_id,
            lesson_id: lesson_id.to_string(),
            title: title.to_string(),
            domain: "rust".to_string(),
            order_index: row_id,
            content_blocks: "[]".to_string(),
            prerequisites: Some("[]".to_string()),
            hidden: false,
            created_at: at(1),
            updated_at,
        }
    }

    #[test]
    fn test_latest_update_wins() {
        let rows = vec![
            row(1, "L1", "A", at(2)),
            row(2, "L1", "B", at(4)),
            row(3, "L1", "C", at(3)),
        ];
        let plan = plan_resolution(&rows, Equivalence::SameIdentifier, TitleMatch::Exact);

        let deleted: Vec<i64> = plan.deletions.iter().map(|d| d.deleted.row_id).collect();
        assert_eq!(deleted, vec![3, 1]);
        assert!(plan.deletions.iter().all(|d| d.retained.row_id == 2));
        assert_eq!(plan.ambiguous_ties, 0);
    }

    #[test]
    fn test_missing_timestamp_sorts_oldest() {
        let rows = vec![row(1, "L1", "A", None), row(2, "L1", "A", at(1))];
        let plan = plan_resolution(&rows, Equivalence::SameIdentifier, TitleMatch::Exact);
        assert_eq!(plan.deletions[0].deleted.row_id, 1);
    }

    #[test]
    fn test_creation_time_breaks_update_tie() {
        let mut older = row(1, "L1", "A", at(5));
        older.created_at = at(0);
        let newer = row(2, "L1", "A", at(5));
        let plan = plan_resolution(&[older, newer], Equivalence::SameIdentifier, TitleMatch::Exact);
        assert_eq!(plan.deletions[0].retained.row_id, 2);
        assert_eq!(plan.ambiguous_ties, 0);
    }

    #[test]
    fn test_identical_timestamps_flagged_and_stable() {
        let rows = vec![
            row(7, "L2", "Same", at(1)),
            row(3, "L1", "Same", at(1)),
            row(5, "L1", "Same", at(1)),
        ];
        let plan = plan_resolution(&rows, Equivalence::SameTitle, TitleMatch::Exact);

        assert_eq!(plan.ambiguous_ties, 1);
        assert!(plan.deletions.iter().all(|d| d.retained.row_id == 3));

        let mut reversed = rows.clone();
        reversed.reverse();
        let again = plan_resolution(&reversed, Equivalence::SameTitle, TitleMatch::Exact);
        assert!(again.deletions.iter().all(|d| d.retained.row_id == 3));
    }

    #[test]
    fn test_normalized_titles() {
        let rows = vec![
            row(1, "L1", "Ownership  Basics", at(1)),
            row(2, "L2", " ownership basics ", at(2)),
        ];
        assert!(plan_resolution(&rows, Equivalence::SameTitle, TitleMatch::Exact)
            .deletions
            .is_empty());

        let plan = plan_resolution(&rows, Equivalence::SameTitle, TitleMatch::Normalized);
        assert_eq!(plan.deletions.len(), 1);
        assert_eq!(plan.deletions[0].retained.lesson_id, "L2");
    }

    #[test]
    fn test_order_collisions() {
        let mut a = row(1, "L1", "A", at(1));
        let mut b = row(2, "L2", "B", at(1));
        a.order_index = 4;
        b.order_index = 4;
        let c = row(3, "L3", "C", at(1));

        let collisions = order_collisions(&[a, b, c]);
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].lesson_ids, vec!["L1".to_string(), "L2".to_string()]);
    }
}
