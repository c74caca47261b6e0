//! Prerequisite validation against a store

use lessonstore_common::db::{load_lesson_rows, open_memory_store, SchemaMigrator};
use lessonstore_integrity::prerequisites::StripReason;
use lessonstore_integrity::{DuplicateResolver, PlaceholderPolicy, PrerequisiteGraphValidator, Summarize, TitleMatch};
use sqlx::SqlitePool;

const L1: &str = "a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d";
const L2: &str = "b2c3d4e5-f6a7-4b8c-9d0e-1f2a3b4c5d6e";
const L3: &str = "c3d4e5f6-a7b8-4c9d-8e1f-2a3b4c5d6e7f";
const PLACEHOLDER: &str = "bt000000-0000-4000-8000-000000000001";

async fn create_test_store() -> SqlitePool {
    let pool = open_memory_store().await.unwrap();
    SchemaMigrator::migrate(&pool).await.unwrap();
    pool
}

async fn insert_lesson(pool: &SqlitePool, lesson_id: &str, prerequisites: &[&str]) {
    sqlx::query("INSERT INTO lessons (lesson_id, title, domain, prerequisites) VALUES (?, ?, 'rust', ?)")
        .bind(lesson_id)
        .bind(format!("Lesson {}", lesson_id))
        .bind(serde_json::to_string(prerequisites).unwrap())
        .execute(pool)
        .await
        .unwrap();
}

async fn prerequisites_of(pool: &SqlitePool, lesson_id: &str) -> Vec<String> {
    let mut conn = pool.acquire().await.unwrap();
    load_lesson_rows(&mut conn)
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.lesson_id == lesson_id)
        .unwrap()
        .prerequisite_ids()
        .unwrap()
}

#[tokio::test]
async fn test_placeholder_and_dangling_edges_stripped() {
    let pool = create_test_store().await;
    insert_lesson(&pool, L2, &[]).await;
    insert_lesson(&pool, L1, &[PLACEHOLDER, L2, "lesson-that-was-deleted"]).await;

    let report = PrerequisiteGraphValidator::validate_store(&pool, &PlaceholderPolicy::default(), false)
        .await
        .unwrap();

    assert_eq!(prerequisites_of(&pool, L1).await, vec![L2.to_string()]);
    assert_eq!(report.count(StripReason::Placeholder), 1);
    assert_eq!(report.count(StripReason::Dangling), 1);
    assert_eq!(report.lessons_changed, 1);
}

#[tokio::test]
async fn test_second_run_strips_nothing() {
    let pool = create_test_store().await;
    insert_lesson(&pool, L2, &[L2]).await;
    insert_lesson(&pool, L1, &[L2, L2, PLACEHOLDER]).await;

    let policy = PlaceholderPolicy::default();
    let first = PrerequisiteGraphValidator::validate_store(&pool, &policy, false).await.unwrap();
    assert_eq!(first.stripped.len(), 3);

    let second = PrerequisiteGraphValidator::validate_store(&pool, &policy, false).await.unwrap();
    assert!(second.stripped.is_empty());
    assert!(second.summary().is_noop());
}

#[tokio::test]
async fn test_configured_prefixes_replace_default() {
    let pool = create_test_store().await;
    insert_lesson(&pool, L2, &[]).await;
    insert_lesson(&pool, L3, &[]).await;
    insert_lesson(&pool, L1, &[L2, L3]).await;

    let policy = PlaceholderPolicy::new(["C3D4E5F6-"]);
    let report = PrerequisiteGraphValidator::validate_store(&pool, &policy, false).await.unwrap();

    assert_eq!(report.count(StripReason::Placeholder), 1);
    assert_eq!(prerequisites_of(&pool, L1).await, vec![L2.to_string()]);
}

#[tokio::test]
async fn test_cycles_reported_not_broken() {
    let pool = create_test_store().await;
    insert_lesson(&pool, L1, &[L3]).await;
    insert_lesson(&pool, L2, &[L1]).await;
    insert_lesson(&pool, L3, &[L2]).await;

    let policy = PlaceholderPolicy::default();
    let unchecked = PrerequisiteGraphValidator::validate_store(&pool, &policy, false).await.unwrap();
    assert!(!unchecked.has_cycles());

    let report = PrerequisiteGraphValidator::validate_store(&pool, &policy, true).await.unwrap();
    assert_eq!(report.cycles.len(), 3);
    assert!(report.stripped.is_empty());
    assert_eq!(prerequisites_of(&pool, L1).await, vec![L3.to_string()]);
    assert_eq!(report.summary().errored, 3);
}

#[tokio::test]
async fn test_spellings_of_one_identifier_resolve_as_one_lesson() {
    let upper = L1.to_uppercase();
    let braced = format!("{{{}}}", L1);
    let pool = create_test_store().await;
    insert_lesson(&pool, &upper, &[]).await;
    insert_lesson(&pool, L1, &[]).await;
    insert_lesson(&pool, L2, &[braced.as_str()]).await;

    let duplicates = DuplicateResolver::resolve(&pool, TitleMatch::Exact).await.unwrap();
    assert_eq!(duplicates.deletions.len(), 1);
    assert_eq!(duplicates.deletions[0].retained.lesson_id, upper);

    let report = PrerequisiteGraphValidator::validate_store(&pool, &PlaceholderPolicy::default(), true)
        .await
        .unwrap();
    assert!(report.stripped.is_empty());
    assert!(!report.has_cycles());
    assert_eq!(prerequisites_of(&pool, L2).await, vec![braced]);
}
