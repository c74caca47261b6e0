//! Database models

use crate::document::{decode_blocks, decode_prerequisites, ContentBlock};
use crate::time::parse_store;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

/// Columns selected for [`LessonRow`]
pub const LESSON_COLUMNS: &str =
    "id, lesson_id, title, domain, order_index, content_blocks, prerequisites, hidden, created_at, updated_at";

/// A row of the `lessons` table
#[derive(Debug, Clone, PartialEq)]
pub struct LessonRow {
    /// Internal row identifier
    pub row_id: i64,
    pub lesson_id: String,
    pub title: String,
    pub domain: String,
    pub order_index: i64,
    /// Serialized content blocks, kept raw so a bad payload only fails its own pass step
    pub content_blocks: String,
    /// Serialized prerequisite list
    pub prerequisites: Option<String>,
    pub hidden: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl LessonRow {
    pub fn from_row(row: &SqliteRow) -> Self {
        let created_at: Option<String> = row.get("created_at");
        let updated_at: Option<String> = row.get("updated_at");
        Self {
            row_id: row.get("id"),
            lesson_id: row.get("lesson_id"),
            title: row.get("title"),
            domain: row.get("domain"),
            order_index: row.get("order_index"),
            content_blocks: row.get("content_blocks"),
            prerequisites: row.get("prerequisites"),
            hidden: row.get::<i64, _>("hidden") != 0,
            created_at: created_at.as_deref().and_then(parse_store),
            updated_at: updated_at.as_deref().and_then(parse_store),
        }
    }

    pub fn blocks(&self) -> Result<Vec<ContentBlock>> {
        decode_blocks(&self.content_blocks)
    }

    pub fn prerequisite_ids(&self) -> Result<Vec<String>> {
        decode_prerequisites(self.prerequisites.as_deref())
    }
}

/// Load every lesson row ordered by internal row id
pub async fn load_lesson_rows(conn: &mut SqliteConnection) -> Result<Vec<LessonRow>> {
    let rows = sqlx::query(&format!("SELECT {} FROM lessons ORDER BY id", LESSON_COLUMNS))
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.iter().map(LessonRow::from_row).collect())
}

/// Who a tag belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagProvenance {
    /// Created by the platform; visible to every user
    System,
    /// Created by a user; visible only to that user
    User(String),
}

impl TagProvenance {
    /// Value of the `created_by` column
    pub fn owner(&self) -> Option<&str> {
        match self {
            TagProvenance::System => None,
            TagProvenance::User(user) => Some(user),
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, TagProvenance::System)
    }

    pub fn from_owner(owner: Option<String>) -> Self {
        match owner {
            None => TagProvenance::System,
            Some(user) => TagProvenance::User(user),
        }
    }
}

impl std::fmt::Display for TagProvenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagProvenance::System => write!(f, "system"),
            TagProvenance::User(user) => write!(f, "user:{}", user),
        }
    }
}

/// A row of the `tags` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub tag_id: String,
    pub name: String,
    pub description: Option<String>,
    pub provenance: TagProvenance,
    pub created_at: Option<DateTime<Utc>>,
}

impl Tag {
    pub fn from_row(row: &SqliteRow) -> Self {
        let created_at: Option<String> = row.get("created_at");
        Self {
            tag_id: row.get("tag_id"),
            name: row.get("name"),
            description: row.get("description"),
            provenance: TagProvenance::from_owner(row.get("created_by")),
            created_at: created_at.as_deref().and_then(parse_store),
        }
    }
}

/// A row of the `lesson_tags` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonTag {
    pub lesson_id: String,
    pub tag_id: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl LessonTag {
    pub fn from_row(row: &SqliteRow) -> Self {
        let created_at: Option<String> = row.get("created_at");
        Self {
            lesson_id: row.get("lesson_id"),
            tag_id: row.get("tag_id"),
            created_at: created_at.as_deref().and_then(parse_store),
        }
    }
}
