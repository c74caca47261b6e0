//! Table Schema Definitions
//!
//! Single source of truth for the store's shape. Each struct declares one
//! table: the columns it is created with, which of those columns were added
//! after the table first shipped (and so must be addable to older stores),
//! table-level constraints and secondary indexes.

use crate::db::schema_sync::ColumnDefinition;

/// Secondary index declaration
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    /// Partial index predicate (`WHERE ...`)
    pub predicate: Option<String>,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
            predicate: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }
}

/// Defines expected schema for a database table
pub trait TableSchema {
    /// Table name in database
    fn table_name() -> &'static str;

    /// Expected column definitions (order matters for new table creation)
    fn expected_columns() -> Vec<ColumnDefinition>;

    /// Names of columns added after the table's first release
    fn evolved_columns() -> &'static [&'static str] {
        &[]
    }

    /// Table-level constraints appended to CREATE TABLE
    fn table_constraints() -> Vec<String> {
        Vec::new()
    }

    /// Secondary indexes
    fn indexes() -> Vec<IndexDefinition> {
        Vec::new()
    }
}

/// `lessons`: one row per ingested lesson document.
///
/// `lesson_id` is intentionally not unique; duplicate rows land here and are
/// collapsed by duplicate resolution. `id` is the internal row identifier.
pub struct LessonsTableSchema;

impl TableSchema for LessonsTableSchema {
    fn table_name() -> &'static str {
        "lessons"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "INTEGER").autoincrement(),
            ColumnDefinition::new("lesson_id", "TEXT").not_null(),
            ColumnDefinition::new("title", "TEXT").not_null(),
            ColumnDefinition::new("domain", "TEXT").not_null(),
            ColumnDefinition::new("order_index", "INTEGER").not_null().default("0"),
            ColumnDefinition::new("content_blocks", "TEXT").not_null().default("'[]'"),
            ColumnDefinition::new("prerequisites", "TEXT").not_null().default("'[]'"),
            ColumnDefinition::new("hidden", "INTEGER").not_null().default("0"),
            ColumnDefinition::new("created_at", "TEXT"),
            ColumnDefinition::new("updated_at", "TEXT"),
        ]
    }

    fn evolved_columns() -> &'static [&'static str] {
        &["prerequisites", "hidden", "created_at", "updated_at"]
    }

    fn indexes() -> Vec<IndexDefinition> {
        vec![
            IndexDefinition::new("idx_lessons_lesson_id", &["lesson_id"]),
            IndexDefinition::new("idx_lessons_title", &["title"]),
            IndexDefinition::new("idx_lessons_domain_order", &["domain", "order_index"]),
        ]
    }
}

/// `tags`: classification labels. `created_by IS NULL` marks a system tag.
pub struct TagsTableSchema;

impl TableSchema for TagsTableSchema {
    fn table_name() -> &'static str {
        "tags"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("tag_id", "TEXT").primary_key(),
            ColumnDefinition::new("name", "TEXT").not_null(),
            ColumnDefinition::new("description", "TEXT"),
            // Tags predating provenance tracking were all platform-created
            ColumnDefinition::new("is_system", "INTEGER").not_null().default("1"),
            ColumnDefinition::new("created_by", "TEXT"),
            ColumnDefinition::new("created_at", "TEXT"),
        ]
    }

    fn evolved_columns() -> &'static [&'static str] {
        &["description", "is_system", "created_by", "created_at"]
    }

    fn indexes() -> Vec<IndexDefinition> {
        vec![
            IndexDefinition::new("idx_tags_system_name", &["name"])
                .unique()
                .predicate("created_by IS NULL"),
            IndexDefinition::new("idx_tags_user_name", &["created_by", "name"])
                .unique()
                .predicate("created_by IS NOT NULL"),
        ]
    }
}

/// `lesson_tags`: many-to-many join between lesson identifiers and tags
pub struct LessonTagsTableSchema;

impl TableSchema for LessonTagsTableSchema {
    fn table_name() -> &'static str {
        "lesson_tags"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("lesson_id", "TEXT").not_null(),
            ColumnDefinition::new("tag_id", "TEXT").not_null(),
            ColumnDefinition::new("created_at", "TEXT"),
        ]
    }

    fn evolved_columns() -> &'static [&'static str] {
        &["created_at"]
    }

    fn table_constraints() -> Vec<String> {
        vec![
            "PRIMARY KEY (lesson_id, tag_id)".to_string(),
            "FOREIGN KEY (tag_id) REFERENCES tags(tag_id) ON DELETE CASCADE".to_string(),
        ]
    }

    fn indexes() -> Vec<IndexDefinition> {
        vec![IndexDefinition::new("idx_lesson_tags_tag_id", &["tag_id"])]
    }
}

/// `lesson_progress`: per-user completion tracking, owned by other services.
/// Read-only from this engine's perspective.
pub struct LessonProgressTableSchema;

impl TableSchema for LessonProgressTableSchema {
    fn table_name() -> &'static str {
        "lesson_progress"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("user_id", "TEXT").not_null(),
            ColumnDefinition::new("lesson_id", "TEXT").not_null(),
            ColumnDefinition::new("completed", "INTEGER").not_null().default("0"),
            ColumnDefinition::new("completed_at", "TEXT"),
        ]
    }

    fn table_constraints() -> Vec<String> {
        vec!["PRIMARY KEY (user_id, lesson_id)".to_string()]
    }

    fn indexes() -> Vec<IndexDefinition> {
        vec![IndexDefinition::new("idx_lesson_progress_lesson_id", &["lesson_id"])]
    }
}
