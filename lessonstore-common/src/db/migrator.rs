//! Additive, idempotent schema migrations
//!
//! The store's desired shape is declared as a list of structural deltas
//! (create table, add column, create index). Each delta is applied iff its
//! target is absent, inside its own transaction:
//!
//! 1. Begin transaction
//! 2. Introspect the target (`sqlite_master` / `pragma_table_info`)
//! 3. Present → roll back, report `AlreadyApplied`
//! 4. Absent → execute DDL (plus default backfill for added columns), commit
//!
//! Any failure rolls the transaction back, so a delta is either fully applied
//! or not applied at all. Destructive changes (drop, rename, retype) are never
//! expressed as deltas.
//!
//! # Example
//!
//! ```rust,ignore
//! let delta = StructuralDelta::add_column(
//!     "lessons",
//!     ColumnDefinition::new("difficulty", "INTEGER").not_null().default("0"),
//! );
//! assert_eq!(SchemaMigrator::apply_delta(&pool, &delta).await?, DeltaOutcome::Applied);
//! assert_eq!(SchemaMigrator::apply_delta(&pool, &delta).await?, DeltaOutcome::AlreadyApplied);
//! ```

use crate::db::schema_sync::{
    validate_identifier, ColumnDefinition, SchemaDiff, SchemaDrift, SchemaIntrospector,
};
use crate::db::table_schemas::{
    IndexDefinition, LessonProgressTableSchema, LessonTagsTableSchema, LessonsTableSchema,
    TableSchema, TagsTableSchema,
};
use crate::{Error, Result};
use sqlx::{SqliteConnection, SqlitePool};
use std::fmt;
use tracing::{debug, error, info, warn};

/// One additive structural change
#[derive(Debug, Clone, PartialEq)]
pub enum StructuralDelta {
    CreateTable {
        table: String,
        columns: Vec<ColumnDefinition>,
        constraints: Vec<String>,
    },
    AddColumn {
        table: String,
        column: ColumnDefinition,
    },
    CreateIndex {
        table: String,
        index: IndexDefinition,
    },
}

impl StructuralDelta {
    /// CREATE TABLE for a declared schema
    pub fn create_table<T: TableSchema>() -> Self {
        StructuralDelta::CreateTable {
            table: T::table_name().to_string(),
            columns: T::expected_columns(),
            constraints: T::table_constraints(),
        }
    }

    pub fn add_column(table: impl Into<String>, column: ColumnDefinition) -> Self {
        StructuralDelta::AddColumn {
            table: table.into(),
            column,
        }
    }

    pub fn create_index(table: impl Into<String>, index: IndexDefinition) -> Self {
        StructuralDelta::CreateIndex {
            table: table.into(),
            index,
        }
    }

    /// Table the delta creates or extends
    pub fn table(&self) -> &str {
        match self {
            StructuralDelta::CreateTable { table, .. }
            | StructuralDelta::AddColumn { table, .. }
            | StructuralDelta::CreateIndex { table, .. } => table,
        }
    }

    fn validate(&self) -> Result<()> {
        validate_identifier(self.table())?;
        match self {
            StructuralDelta::CreateTable { columns, .. } => {
                if columns.is_empty() {
                    return Err(Error::InvalidInput(format!(
                        "table '{}' declares no columns",
                        self.table()
                    )));
                }
                columns.iter().try_for_each(ColumnDefinition::validate)
            }
            StructuralDelta::AddColumn { column, .. } => {
                column.validate()?;
                if let Some(default) = column.default_value.as_deref() {
                    let keyword = default.trim().to_ascii_uppercase();
                    if matches!(keyword.as_str(), "CURRENT_TIMESTAMP" | "CURRENT_DATE" | "CURRENT_TIME") {
                        return Err(Error::InvalidInput(format!(
                            "column '{}': SQLite cannot add a column with DEFAULT {}; add it without a default and backfill",
                            column.name, keyword
                        )));
                    }
                }
                column.to_add_column_sql().map(|_| ())
            }
            StructuralDelta::CreateIndex { index, .. } => {
                validate_identifier(&index.name)?;
                if index.columns.is_empty() {
                    return Err(Error::InvalidInput(format!(
                        "index '{}' declares no columns",
                        index.name
                    )));
                }
                index.columns.iter().try_for_each(|c| validate_identifier(c))
            }
        }
    }
}

impl fmt::Display for StructuralDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuralDelta::CreateTable { table, .. } => write!(f, "create table {}", table),
            StructuralDelta::AddColumn { table, column } => match &column.default_value {
                Some(default) => write!(
                    f,
                    "add column {}.{} {} default {}",
                    table, column.name, column.sql_type, default
                ),
                None => write!(f, "add column {}.{} {}", table, column.name, column.sql_type),
            },
            StructuralDelta::CreateIndex { table, index } => write!(
                f,
                "create {}index {} on {}({})",
                if index.unique { "unique " } else { "" },
                index.name,
                table,
                index.columns.join(", ")
            ),
        }
    }
}

/// Result of applying one delta
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    Applied,
    AlreadyApplied,
}

impl fmt::Display for DeltaOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaOutcome::Applied => write!(f, "applied"),
            DeltaOutcome::AlreadyApplied => write!(f, "already applied"),
        }
    }
}

/// Per-delta outcome record
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaRecord {
    pub delta: String,
    pub outcome: DeltaOutcome,
}

/// Outcome of a migration run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationReport {
    pub records: Vec<DeltaRecord>,
}

impl MigrationReport {
    pub fn applied_count(&self) -> usize {
        self.count(DeltaOutcome::Applied)
    }

    pub fn already_applied_count(&self) -> usize {
        self.count(DeltaOutcome::AlreadyApplied)
    }

    fn count(&self, outcome: DeltaOutcome) -> usize {
        self.records.iter().filter(|r| r.outcome == outcome).count()
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in &self.records {
            writeln!(f, "  [{}] {}", record.outcome, record.delta)?;
        }
        Ok(())
    }
}

/// The store's declared shape as an ordered delta list
pub fn declared_deltas() -> Vec<StructuralDelta> {
    let mut deltas = Vec::new();
    deltas.extend(deltas_for::<LessonsTableSchema>());
    deltas.extend(deltas_for::<TagsTableSchema>());
    deltas.extend(deltas_for::<LessonTagsTableSchema>());
    deltas.extend(deltas_for::<LessonProgressTableSchema>());
    deltas
}

fn deltas_for<T: TableSchema>() -> Vec<StructuralDelta> {
    let columns = T::expected_columns();
    let mut deltas = vec![StructuralDelta::create_table::<T>()];
    deltas.extend(
        columns
            .into_iter()
            .filter(|c| T::evolved_columns().contains(&c.name.as_str()))
            .map(|c| StructuralDelta::add_column(T::table_name(), c)),
    );
    deltas.extend(
        T::indexes()
            .into_iter()
            .map(|i| StructuralDelta::create_index(T::table_name(), i)),
    );
    deltas
}

/// Applies structural deltas against a store
pub struct SchemaMigrator;

impl SchemaMigrator {
    /// Apply the declared deltas
    pub async fn migrate(pool: &SqlitePool) -> Result<MigrationReport> {
        info!("=== Schema migration ===");
        Self::apply_all(pool, &declared_deltas()).await
    }

    /// Apply deltas in order; the first failure aborts the run
    ///
    /// Deltas committed before the failure stay committed.
    pub async fn apply_all(pool: &SqlitePool, deltas: &[StructuralDelta]) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();
        for delta in deltas {
            let outcome = Self::apply_delta(pool, delta).await?;
            report.records.push(DeltaRecord {
                delta: delta.to_string(),
                outcome,
            });
        }
        info!(
            applied = report.applied_count(),
            already_applied = report.already_applied_count(),
            "Schema migration complete"
        );
        Ok(report)
    }

    /// Apply one delta iff its target is absent
    pub async fn apply_delta(pool: &SqlitePool, delta: &StructuralDelta) -> Result<DeltaOutcome> {
        delta.validate()?;

        let mut tx = pool.begin().await?;

        let present = match Self::is_present(&mut tx, delta).await {
            Ok(present) => present,
            Err(e) => {
                error!("  ✗ {}: {}", delta, e);
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback failed: {}", rollback_err);
                }
                return Err(e);
            }
        };

        if present {
            info!("  {} - already applied", delta);
            tx.rollback().await?;
            return Ok(DeltaOutcome::AlreadyApplied);
        }

        if let Err(e) = Self::execute(&mut tx, delta).await {
            error!("  ✗ {}: {} (rolled back)", delta, e);
            if let Err(rollback_err) = tx.rollback().await {
                warn!("Rollback failed: {}", rollback_err);
            }
            return Err(e);
        }

        tx.commit().await?;
        info!("  ✓ {}", delta);
        Ok(DeltaOutcome::Applied)
    }

    /// Report drift between declared and actual schema
    pub async fn drift(pool: &SqlitePool) -> Result<Vec<SchemaDrift>> {
        let mut conn = pool.acquire().await?;
        let mut drift = Vec::new();
        drift.extend(Self::drift_for::<LessonsTableSchema>(&mut conn).await?);
        drift.extend(Self::drift_for::<TagsTableSchema>(&mut conn).await?);
        drift.extend(Self::drift_for::<LessonTagsTableSchema>(&mut conn).await?);
        drift.extend(Self::drift_for::<LessonProgressTableSchema>(&mut conn).await?);
        SchemaDiff::warn_non_additive(&drift);
        Ok(drift)
    }

    async fn drift_for<T: TableSchema>(conn: &mut SqliteConnection) -> Result<Vec<SchemaDrift>> {
        let actual = SchemaIntrospector::introspect_table(conn, T::table_name()).await?;
        Ok(SchemaDiff::compare(T::table_name(), &T::expected_columns(), &actual))
    }

    async fn is_present(conn: &mut SqliteConnection, delta: &StructuralDelta) -> Result<bool> {
        match delta {
            StructuralDelta::CreateTable { table, .. } => {
                SchemaIntrospector::table_exists(conn, table).await
            }
            StructuralDelta::AddColumn { table, column } => {
                Self::require_table(conn, table, delta).await?;
                SchemaIntrospector::column_exists(conn, table, &column.name).await
            }
            StructuralDelta::CreateIndex { table, index } => {
                Self::require_table(conn, table, delta).await?;
                if SchemaIntrospector::index_exists(conn, &index.name).await? {
                    return Ok(true);
                }
                for column in &index.columns {
                    if !SchemaIntrospector::column_exists(conn, table, column).await? {
                        return Err(Error::StoreInconsistent(format!(
                            "cannot {}: column {}.{} does not exist",
                            delta, table, column
                        )));
                    }
                }
                Ok(false)
            }
        }
    }

    async fn require_table(
        conn: &mut SqliteConnection,
        table: &str,
        delta: &StructuralDelta,
    ) -> Result<()> {
        if SchemaIntrospector::table_exists(conn, table).await? {
            Ok(())
        } else {
            Err(Error::StoreInconsistent(format!(
                "cannot {}: table '{}' does not exist",
                delta, table
            )))
        }
    }

    async fn execute(conn: &mut SqliteConnection, delta: &StructuralDelta) -> Result<()> {
        match delta {
            StructuralDelta::CreateTable {
                table,
                columns,
                constraints,
            } => {
                let body: Vec<String> = columns
                    .iter()
                    .map(ColumnDefinition::to_sql)
                    .chain(constraints.iter().cloned())
                    .collect();
                let sql = format!("CREATE TABLE {} (\n    {}\n)", table, body.join(",\n    "));
                debug!("{}", sql);
                sqlx::query(&sql).execute(&mut *conn).await?;
            }
            StructuralDelta::AddColumn { table, column } => {
                let sql = format!("ALTER TABLE {} ADD COLUMN {}", table, column.to_add_column_sql()?);
                debug!("{}", sql);
                sqlx::query(&sql).execute(&mut *conn).await?;

                if let Some(default) = column
                    .default_value
                    .as_deref()
                    .filter(|d| !d.eq_ignore_ascii_case("NULL"))
                {
                    let backfill = format!(
                        "UPDATE {table} SET {col} = {default} WHERE {col} IS NULL",
                        table = table,
                        col = column.name,
                        default = default
                    );
                    let filled = sqlx::query(&backfill).execute(&mut *conn).await?;
                    debug!(rows = filled.rows_affected(), "Backfilled {}.{}", table, column.name);
                }
            }
            StructuralDelta::CreateIndex { table, index } => {
                let mut sql = format!(
                    "CREATE {}INDEX {} ON {}({})",
                    if index.unique { "UNIQUE " } else { "" },
                    index.name,
                    table,
                    index.columns.join(", ")
                );
                if let Some(predicate) = &index.predicate {
                    sql.push_str(&format!(" WHERE {}", predicate));
                }
                debug!("{}", sql);
                sqlx::query(&sql).execute(&mut *conn).await?;
            }
        }
        Ok(())
    }
}
