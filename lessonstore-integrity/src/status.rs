//! Store overview: row counts and schema drift

use lessonstore_common::db::{SchemaDrift, SchemaMigrator};
use lessonstore_common::Result;
use sqlx::SqlitePool;
use std::fmt;

/// Counts across the store plus any drift from the declared schema
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStatus {
    pub lesson_rows: i64,
    pub distinct_lessons: i64,
    pub system_tags: i64,
    pub user_tags: i64,
    pub associations: i64,
    pub untagged_lessons: i64,
    pub progress_rows: i64,
    pub drift: Vec<SchemaDrift>,
}

impl StoreStatus {
    pub async fn collect(pool: &SqlitePool) -> Result<Self> {
        Ok(Self {
            lesson_rows: count(pool, "SELECT COUNT(*) FROM lessons").await?,
            distinct_lessons: count(pool, "SELECT COUNT(DISTINCT lesson_id) FROM lessons").await?,
            system_tags: count(pool, "SELECT COUNT(*) FROM tags WHERE created_by IS NULL").await?,
            user_tags: count(pool, "SELECT COUNT(*) FROM tags WHERE created_by IS NOT NULL").await?,
            associations: count(pool, "SELECT COUNT(*) FROM lesson_tags").await?,
            untagged_lessons: count(
                pool,
                "SELECT COUNT(DISTINCT l.lesson_id) FROM lessons l
                 WHERE NOT EXISTS (SELECT 1 FROM lesson_tags lt WHERE lt.lesson_id = l.lesson_id)",
            )
            .await?,
            progress_rows: count(pool, "SELECT COUNT(*) FROM lesson_progress").await?,
            drift: SchemaMigrator::drift(pool).await?,
        })
    }

    /// Rows sharing a lesson identifier with another row
    pub fn duplicate_rows(&self) -> i64 {
        self.lesson_rows - self.distinct_lessons
    }
}

async fn count(pool: &SqlitePool, sql: &str) -> Result<i64> {
    Ok(sqlx::query_scalar(sql).fetch_one(pool).await?)
}

impl fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Lessons: {} rows, {} distinct identifiers ({} duplicate rows)",
            self.lesson_rows,
            self.distinct_lessons,
            self.duplicate_rows()
        )?;
        writeln!(f, "Tags: {} system, {} user", self.system_tags, self.user_tags)?;
        writeln!(
            f,
            "Associations: {} ({} untagged lessons)",
            self.associations, self.untagged_lessons
        )?;
        writeln!(f, "Progress rows: {}", self.progress_rows)?;
        if self.drift.is_empty() {
            writeln!(f, "Schema: matches declared shape")
        } else {
            writeln!(f, "Schema drift:")?;
            for drift in &self.drift {
                writeln!(f, "  {}", drift)?;
            }
            Ok(())
        }
    }
}
