//! Tag provenance and lesson coverage
//!
//! System tags (`created_by IS NULL`) are visible to every user; a user tag is
//! visible only to its creator. The sweep guarantees that every lesson carries
//! at least one tag.

use crate::report::{PassSummary, Summarize};
use lessonstore_common::db::{LessonTag, Tag, TagProvenance};
use lessonstore_common::{time, uuid_utils, Error, Result};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

const TAG_COLUMNS: &str = "tag_id, name, description, created_by, created_at";

const FALLBACK_DESCRIPTION: &str = "Assigned to lessons that had no tags";

/// Outcome of a coverage sweep
#[derive(Debug, Clone, PartialEq)]
pub struct SweepReport {
    pub fallback_tag: Tag,
    pub fallback_created: bool,
    pub lessons_checked: usize,
    /// Lessons that received the fallback tag
    pub lessons_tagged: Vec<String>,
}

impl Summarize for SweepReport {
    fn summary(&self) -> PassSummary {
        PassSummary {
            repaired: self.lessons_tagged.len(),
            skipped: self.lessons_checked.saturating_sub(self.lessons_tagged.len()),
            ..PassSummary::new("tag-sweep")
        }
    }
}

/// Tag creation, association and coverage
pub struct TagAssociationManager;

impl TagAssociationManager {
    /// Return the tag with this name and provenance, creating it if absent
    pub async fn create_or_fetch(
        pool: &SqlitePool,
        name: &str,
        provenance: &TagProvenance,
        description: Option<&str>,
    ) -> Result<Tag> {
        let mut conn = pool.acquire().await?;
        let (tag, _) = Self::create_or_fetch_in(&mut conn, name, provenance, description).await?;
        Ok(tag)
    }

    /// As [`TagAssociationManager::create_or_fetch`], on a caller's connection
    ///
    /// Returns whether the tag was created.
    pub async fn create_or_fetch_in(
        conn: &mut SqliteConnection,
        name: &str,
        provenance: &TagProvenance,
        description: Option<&str>,
    ) -> Result<(Tag, bool)> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("tag name must not be empty".to_string()));
        }
        if let TagProvenance::User(user) = provenance {
            if user.trim().is_empty() {
                return Err(Error::InvalidInput("user id must not be empty".to_string()));
            }
        }

        if let Some(tag) = Self::find(conn, name, provenance).await? {
            return Ok((tag, false));
        }

        let tag_id = uuid_utils::generate().to_string();
        sqlx::query(
            "INSERT INTO tags (tag_id, name, description, is_system, created_by, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&tag_id)
        .bind(name)
        .bind(description)
        .bind(provenance.is_system() as i64)
        .bind(provenance.owner())
        .bind(time::now_store())
        .execute(&mut *conn)
        .await?;

        info!(tag_id = %tag_id, name, provenance = %provenance, "Created tag");

        let tag = Self::find(conn, name, provenance)
            .await?
            .ok_or_else(|| Error::NotFound(format!("tag '{}' after insert", name)))?;
        Ok((tag, true))
    }

    async fn find(conn: &mut SqliteConnection, name: &str, provenance: &TagProvenance) -> Result<Option<Tag>> {
        let row = match provenance.owner() {
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM tags WHERE name = ? AND created_by IS NULL",
                    TAG_COLUMNS
                ))
                .bind(name)
                .fetch_optional(&mut *conn)
                .await?
            }
            Some(user) => {
                sqlx::query(&format!(
                    "SELECT {} FROM tags WHERE name = ? AND created_by = ?",
                    TAG_COLUMNS
                ))
                .bind(name)
                .bind(user)
                .fetch_optional(&mut *conn)
                .await?
            }
        };
        Ok(row.as_ref().map(Tag::from_row))
    }

    /// Associate a lesson with a tag
    ///
    /// Returns false if the association already existed. An unknown lesson or
    /// tag is [`Error::NotFound`].
    pub async fn associate(pool: &SqlitePool, lesson_id: &str, tag_id: &str) -> Result<bool> {
        let mut conn = pool.acquire().await?;
        Self::associate_in(&mut conn, lesson_id, tag_id).await
    }

    pub async fn associate_in(conn: &mut SqliteConnection, lesson_id: &str, tag_id: &str) -> Result<bool> {
        let lesson_exists: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM lessons WHERE lesson_id = ?)")
            .bind(lesson_id)
            .fetch_one(&mut *conn)
            .await?;
        if lesson_exists == 0 {
            return Err(Error::NotFound(format!("lesson {}", lesson_id)));
        }

        let tag_exists: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tags WHERE tag_id = ?)")
            .bind(tag_id)
            .fetch_one(&mut *conn)
            .await?;
        if tag_exists == 0 {
            return Err(Error::NotFound(format!("tag {}", tag_id)));
        }

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO lesson_tags (lesson_id, tag_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(lesson_id)
        .bind(tag_id)
        .bind(time::now_store())
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if inserted > 0 {
            debug!(lesson_id, tag_id, "Associated tag");
        }
        Ok(inserted > 0)
    }

    /// System tags only, by name
    pub async fn list_system_tags(pool: &SqlitePool) -> Result<Vec<Tag>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tags WHERE created_by IS NULL ORDER BY name",
            TAG_COLUMNS
        ))
        .fetch_all(pool)
        .await?;
        Ok(rows.iter().map(Tag::from_row).collect())
    }

    /// System tags plus the tags `user_id` created
    pub async fn list_visible_tags(pool: &SqlitePool, user_id: &str) -> Result<Vec<Tag>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tags WHERE created_by IS NULL OR created_by = ?
             ORDER BY created_by IS NOT NULL, name",
            TAG_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(pool)
        .await?;
        Ok(rows.iter().map(Tag::from_row).collect())
    }

    /// Tags on a lesson that `viewer` may see
    ///
    /// With no viewer only system tags are returned.
    pub async fn tags_for_lesson(pool: &SqlitePool, lesson_id: &str, viewer: Option<&str>) -> Result<Vec<Tag>> {
        let rows = sqlx::query(
            "SELECT t.tag_id, t.name, t.description, t.created_by, t.created_at
             FROM tags t JOIN lesson_tags lt ON lt.tag_id = t.tag_id
             WHERE lt.lesson_id = ? AND (t.created_by IS NULL OR t.created_by = ?)
             ORDER BY t.name",
        )
        .bind(lesson_id)
        .bind(viewer)
        .fetch_all(pool)
        .await?;
        Ok(rows.iter().map(Tag::from_row).collect())
    }

    /// Raw association rows for a lesson
    pub async fn associations(pool: &SqlitePool, lesson_id: &str) -> Result<Vec<LessonTag>> {
        let rows = sqlx::query(
            "SELECT lesson_id, tag_id, created_at FROM lesson_tags WHERE lesson_id = ? ORDER BY tag_id",
        )
        .bind(lesson_id)
        .fetch_all(pool)
        .await?;
        Ok(rows.iter().map(LessonTag::from_row).collect())
    }

    /// Lesson identifiers with no tag association at all
    pub async fn untagged_lessons(conn: &mut SqliteConnection) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT DISTINCT l.lesson_id FROM lessons l
             WHERE NOT EXISTS (SELECT 1 FROM lesson_tags lt WHERE lt.lesson_id = l.lesson_id)
             ORDER BY l.lesson_id",
        )
        .fetch_all(&mut *conn)
        .await?;
        Ok(ids)
    }

    /// Give every untagged lesson the system fallback tag, in one transaction
    pub async fn sweep_untagged(pool: &SqlitePool, fallback_name: &str) -> Result<SweepReport> {
        info!("=== Tag coverage sweep ===");
        let mut tx = pool.begin().await?;

        let lessons_checked: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT lesson_id) FROM lessons")
            .fetch_one(&mut *tx)
            .await?;

        let (fallback_tag, fallback_created) = Self::create_or_fetch_in(
            &mut tx,
            fallback_name,
            &TagProvenance::System,
            Some(FALLBACK_DESCRIPTION),
        )
        .await?;

        let untagged = Self::untagged_lessons(&mut tx).await?;
        let mut lessons_tagged = Vec::new();
        for lesson_id in untagged {
            if Self::associate_in(&mut tx, &lesson_id, &fallback_tag.tag_id).await? {
                info!(lesson_id = %lesson_id, tag = %fallback_tag.name, "  Tagged untagged lesson");
                lessons_tagged.push(lesson_id);
            }
        }

        tx.commit().await?;

        info!(tagged = lessons_tagged.len(), "Tag coverage sweep complete");
        Ok(SweepReport {
            fallback_tag,
            fallback_created,
            lessons_checked: lessons_checked as usize,
            lessons_tagged,
        })
    }
}
