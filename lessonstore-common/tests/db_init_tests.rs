//! Store initialisation and additive migration against on-disk stores

use lessonstore_common::db::{
    init_store, open_store, ColumnDefinition, DeltaOutcome, SchemaMigrator, StructuralDelta,
};
use lessonstore_common::Error;
use sqlx::SqlitePool;

async fn insert_lesson(pool: &SqlitePool, lesson_id: &str, title: &str) {
    sqlx::query("INSERT INTO lessons (lesson_id, title, domain, order_index) VALUES (?, ?, 'rust', 1)")
        .bind(lesson_id)
        .bind(title)
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_init_creates_store_and_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("lessons.db");

    let (pool, report) = init_store(&db_path).await.unwrap();
    assert!(db_path.exists(), "store file was not created");
    assert!(report.applied_count() > 0);
    drop(pool);

    let (pool, report) = init_store(&db_path).await.unwrap();
    assert_eq!(report.applied_count(), 0, "second init must be a no-op");
    drop(pool);

    let pool = open_store(&db_path).await.unwrap();
    let tables: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('lessons', 'tags', 'lesson_tags', 'lesson_progress')",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(tables, 4);
}

#[tokio::test]
async fn test_add_column_with_default_twice() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, _) = init_store(&dir.path().join("lessons.db")).await.unwrap();

    insert_lesson(&pool, "a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d", "One").await;
    insert_lesson(&pool, "0f8fad5b-d9cb-469f-a165-70867728950e", "Two").await;

    let delta = StructuralDelta::add_column(
        "lessons",
        ColumnDefinition::new("x", "INTEGER").not_null().default("0"),
    );

    let first = SchemaMigrator::apply_delta(&pool, &delta).await.unwrap();
    assert_eq!(first, DeltaOutcome::Applied);
    let second = SchemaMigrator::apply_delta(&pool, &delta).await.unwrap();
    assert_eq!(second, DeltaOutcome::AlreadyApplied);
    assert_eq!(second.to_string(), "already applied");

    let columns: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info('lessons') WHERE name = 'x'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(columns, 1);

    let values: Vec<Option<i64>> = sqlx::query_scalar("SELECT x FROM lessons ORDER BY id")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(values, vec![Some(0), Some(0)]);
}

#[tokio::test]
async fn test_nullable_column_with_default_backfills_existing_rows() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, _) = init_store(&dir.path().join("lessons.db")).await.unwrap();
    insert_lesson(&pool, "a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d", "One").await;

    let delta = StructuralDelta::add_column(
        "lessons",
        ColumnDefinition::new("featured", "INTEGER").default("0"),
    );
    SchemaMigrator::apply_delta(&pool, &delta).await.unwrap();

    let nulls: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM lessons WHERE featured IS NULL")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(nulls, 0);
}

#[tokio::test]
async fn test_legacy_store_is_brought_forward() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("legacy.db");

    // Shape of a store written before visibility, prerequisites and provenance existed
    {
        let pool = SqlitePool::connect(&format!("sqlite://{}?mode=rwc", db_path.display()))
            .await
            .unwrap();
        for sql in [
            "CREATE TABLE lessons (id INTEGER PRIMARY KEY AUTOINCREMENT, lesson_id TEXT NOT NULL, title TEXT NOT NULL, domain TEXT NOT NULL, order_index INTEGER NOT NULL DEFAULT 0, content_blocks TEXT NOT NULL DEFAULT '[]')",
            "INSERT INTO lessons (lesson_id, title, domain, order_index) VALUES ('a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d', 'Legacy', 'rust', 1)",
            "CREATE TABLE tags (tag_id TEXT PRIMARY KEY, name TEXT NOT NULL)",
            "INSERT INTO tags (tag_id, name) VALUES ('7c9e6679-7425-40de-944b-e07fc1f90ae7', 'basics')",
        ] {
            sqlx::query(sql).execute(&pool).await.unwrap();
        }
        pool.close().await;
    }

    let (pool, report) = init_store(&db_path).await.unwrap();
    assert!(report.applied_count() > 0);

    let (hidden, prerequisites): (i64, String) =
        sqlx::query_as("SELECT hidden, prerequisites FROM lessons")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(hidden, 0);
    assert_eq!(prerequisites, "[]");

    let (is_system, created_by): (i64, Option<String>) =
        sqlx::query_as("SELECT is_system, created_by FROM tags")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(is_system, 1);
    assert!(created_by.is_none());

    let again = SchemaMigrator::migrate(&pool).await.unwrap();
    assert_eq!(again.applied_count(), 0);
}

#[tokio::test]
async fn test_failed_delta_leaves_no_partial_change() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("dupes.db");

    {
        let pool = SqlitePool::connect(&format!("sqlite://{}?mode=rwc", db_path.display()))
            .await
            .unwrap();
        for sql in [
            "CREATE TABLE tags (tag_id TEXT PRIMARY KEY, name TEXT NOT NULL)",
            "INSERT INTO tags (tag_id, name) VALUES ('t1', 'basics'), ('t2', 'basics')",
        ] {
            sqlx::query(sql).execute(&pool).await.unwrap();
        }
        pool.close().await;
    }

    // The system-name unique index cannot be built over duplicate names
    let err = init_store(&db_path).await.unwrap_err();
    assert!(matches!(err, Error::Database(_)), "unexpected error {:?}", err);

    let pool = open_store(&db_path).await.unwrap();
    let index: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_tags_system_name'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(index, 0);

    // Deltas that ran before the failure were committed on their own
    let lessons: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'lessons'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(lessons, 1);
}
