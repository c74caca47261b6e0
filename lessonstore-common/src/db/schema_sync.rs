//! Schema introspection and drift detection
//!
//! The store carries no version counter: its structural state is whatever
//! `sqlite_master` and `pragma_table_info` report. Migrations compare that
//! state to declared column definitions and act only on what is absent.
//!
//! Introspection helpers take a `&mut SqliteConnection` so they can run either
//! on a pooled connection or inside an open transaction.

use crate::{Error, Result};
use sqlx::{Row, SqliteConnection};
use tracing::warn;

/// Column definition with SQL constraints
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    /// Column name
    pub name: String,
    /// SQL type (e.g., "TEXT", "INTEGER", "REAL")
    pub sql_type: String,
    /// NOT NULL constraint
    pub not_null: bool,
    /// PRIMARY KEY constraint
    pub primary_key: bool,
    /// AUTOINCREMENT (only meaningful on an INTEGER PRIMARY KEY)
    pub autoincrement: bool,
    /// UNIQUE constraint
    pub unique: bool,
    /// DEFAULT value as a SQL literal
    pub default_value: Option<String>,
}

impl ColumnDefinition {
    /// Create new column definition
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
            primary_key: false,
            autoincrement: false,
            unique: false,
            default_value: None,
        }
    }

    /// Mark column as PRIMARY KEY
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Mark column as PRIMARY KEY AUTOINCREMENT
    pub fn autoincrement(mut self) -> Self {
        self.primary_key = true;
        self.autoincrement = true;
        self
    }

    /// Mark column as NOT NULL
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Mark column as UNIQUE
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set DEFAULT value
    pub fn default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Column clause for CREATE TABLE
    pub fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.sql_type);
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
            if self.autoincrement {
                sql.push_str(" AUTOINCREMENT");
            }
        }
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default_value {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
        sql
    }

    /// Column clause for ALTER TABLE ADD COLUMN
    ///
    /// SQLite cannot add PRIMARY KEY or UNIQUE columns, nor NOT NULL columns
    /// without a default.
    pub fn to_add_column_sql(&self) -> Result<String> {
        if self.primary_key || self.unique {
            return Err(Error::InvalidInput(format!(
                "column '{}' cannot be added with PRIMARY KEY or UNIQUE; declare it in CREATE TABLE",
                self.name
            )));
        }
        if self.not_null && self.default_value.is_none() {
            return Err(Error::InvalidInput(format!(
                "NOT NULL column '{}' requires a DEFAULT value",
                self.name
            )));
        }
        Ok(self.to_sql())
    }

    /// Check the column name, type and default literal before they reach DDL
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.name)?;
        if self.sql_type.is_empty()
            || !self
                .sql_type
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '_')
        {
            return Err(Error::InvalidInput(format!(
                "invalid SQL type '{}' for column '{}'",
                self.sql_type, self.name
            )));
        }
        if let Some(default) = &self.default_value {
            validate_default_literal(default)?;
        }
        Ok(())
    }
}

/// Table/column/index names must be plain SQL identifiers
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid SQL identifier '{}'", name)))
    }
}

/// Accepted DEFAULT literals: numbers, single-quoted strings, NULL, TRUE/FALSE
/// and the CURRENT_* keywords. SQLite accepts the CURRENT_* keywords only at
/// table creation, not when adding a column.
pub fn validate_default_literal(literal: &str) -> Result<()> {
    let upper = literal.trim().to_ascii_uppercase();
    let keyword = matches!(
        upper.as_str(),
        "NULL" | "TRUE" | "FALSE" | "CURRENT_TIMESTAMP" | "CURRENT_DATE" | "CURRENT_TIME"
    );
    let numeric = {
        let t = literal.trim();
        !t.is_empty()
            && t.chars().all(|c| c.is_ascii_digit() || "+-.eE".contains(c))
            && t.parse::<f64>().is_ok()
    };
    let quoted = {
        let t = literal.trim();
        t.len() >= 2
            && t.starts_with('\'')
            && t.ends_with('\'')
            && !t[1..t.len() - 1].replace("''", "").contains('\'')
    };
    if keyword || numeric || quoted {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "unsupported DEFAULT literal '{}' (use a number, a 'quoted' string, NULL or TRUE/FALSE)",
            literal
        )))
    }
}

/// Actual column from database introspection (PRAGMA table_info result)
#[derive(Debug, Clone)]
pub struct ActualColumn {
    /// Column ID (position in table)
    pub cid: i32,
    /// Column name
    pub name: String,
    /// SQL type from PRAGMA table_info
    pub type_name: String,
    /// NOT NULL constraint
    pub not_null: bool,
    /// DEFAULT value
    pub default_value: Option<String>,
    /// PRIMARY KEY flag
    pub pk: bool,
}

/// Schema drift detected between expected and actual schema
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaDrift {
    /// Table missing from database
    MissingTable { table: String },
    /// Column missing from database
    MissingColumn {
        table: String,
        column: ColumnDefinition,
    },
    /// Column type mismatch (cannot auto-fix)
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },
    /// Constraint mismatch (cannot auto-fix)
    ConstraintMismatch {
        table: String,
        column: String,
        constraint: String,
    },
}

impl SchemaDrift {
    /// Whether an additive delta can close this drift
    pub fn is_additive(&self) -> bool {
        matches!(
            self,
            SchemaDrift::MissingTable { .. } | SchemaDrift::MissingColumn { .. }
        )
    }
}

impl std::fmt::Display for SchemaDrift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaDrift::MissingTable { table } => write!(f, "missing table {}", table),
            SchemaDrift::MissingColumn { table, column } => {
                write!(f, "missing column {}.{} ({})", table, column.name, column.sql_type)
            }
            SchemaDrift::TypeMismatch { table, column, expected, actual } => write!(
                f,
                "type mismatch {}.{}: expected {}, found {}",
                table, column, expected, actual
            ),
            SchemaDrift::ConstraintMismatch { table, column, constraint } => {
                write!(f, "constraint mismatch {}.{}: missing {}", table, column, constraint)
            }
        }
    }
}

/// Schema introspection - read actual database schema
pub struct SchemaIntrospector;

impl SchemaIntrospector {
    /// Read actual columns from database table using PRAGMA table_info
    ///
    /// Returns columns in database order (by cid)
    pub async fn introspect_table(
        conn: &mut SqliteConnection,
        table_name: &str,
    ) -> Result<Vec<ActualColumn>> {
        let rows = sqlx::query(
            r#"
            SELECT cid, name, type, "notnull", dflt_value, pk
            FROM pragma_table_info(?)
            ORDER BY cid
            "#,
        )
        .bind(table_name)
        .fetch_all(&mut *conn)
        .await?;

        let columns = rows
            .iter()
            .map(|row| ActualColumn {
                cid: row.get("cid"),
                name: row.get("name"),
                type_name: row.get("type"),
                not_null: row.get::<i32, _>("notnull") != 0,
                default_value: row.get("dflt_value"),
                pk: row.get::<i32, _>("pk") != 0,
            })
            .collect();

        Ok(columns)
    }

    /// Check if table exists
    pub async fn table_exists(conn: &mut SqliteConnection, table_name: &str) -> Result<bool> {
        Self::object_exists(conn, "table", table_name).await
    }

    /// Check if index exists
    pub async fn index_exists(conn: &mut SqliteConnection, index_name: &str) -> Result<bool> {
        Self::object_exists(conn, "index", index_name).await
    }

    /// Check if a column exists on a table
    pub async fn column_exists(
        conn: &mut SqliteConnection,
        table_name: &str,
        column_name: &str,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?",
        )
        .bind(table_name)
        .bind(column_name)
        .fetch_one(&mut *conn)
        .await?;
        Ok(count > 0)
    }

    async fn object_exists(conn: &mut SqliteConnection, kind: &str, name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM sqlite_master
                WHERE type = ? AND name = ?
            )
            "#,
        )
        .bind(kind)
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;

        Ok(exists)
    }
}

/// Schema comparison - detect drift between expected and actual
pub struct SchemaDiff;

impl SchemaDiff {
    /// Compare expected schema to actual database schema
    pub fn compare(
        table_name: &str,
        expected: &[ColumnDefinition],
        actual: &[ActualColumn],
    ) -> Vec<SchemaDrift> {
        if actual.is_empty() {
            return vec![SchemaDrift::MissingTable {
                table: table_name.to_string(),
            }];
        }

        let mut drift = Vec::new();

        for expected_col in expected {
            if let Some(actual_col) = actual.iter().find(|c| c.name == expected_col.name) {
                if !Self::types_compatible(&expected_col.sql_type, &actual_col.type_name) {
                    drift.push(SchemaDrift::TypeMismatch {
                        table: table_name.to_string(),
                        column: expected_col.name.clone(),
                        expected: expected_col.sql_type.clone(),
                        actual: actual_col.type_name.clone(),
                    });
                }

                if expected_col.not_null && !actual_col.not_null && !expected_col.primary_key {
                    drift.push(SchemaDrift::ConstraintMismatch {
                        table: table_name.to_string(),
                        column: expected_col.name.clone(),
                        constraint: "NOT NULL".to_string(),
                    });
                }

                if expected_col.primary_key && !actual_col.pk {
                    drift.push(SchemaDrift::ConstraintMismatch {
                        table: table_name.to_string(),
                        column: expected_col.name.clone(),
                        constraint: "PRIMARY KEY".to_string(),
                    });
                }
            } else {
                drift.push(SchemaDrift::MissingColumn {
                    table: table_name.to_string(),
                    column: expected_col.clone(),
                });
            }
        }

        drift
    }

    /// Check if SQL types are compatible (SQLite type affinity rules)
    fn types_compatible(expected: &str, actual: &str) -> bool {
        let exp = expected.to_uppercase();
        let act = actual.to_uppercase();

        if exp == act {
            return true;
        }

        if exp.contains("INT") && act.contains("INT") {
            return true;
        }

        let texty = |t: &str| t.contains("TEXT") || t.contains("CHAR") || t.contains("CLOB");
        if texty(&exp) && texty(&act) {
            return true;
        }

        let real = |t: &str| t.contains("REAL") || t.contains("FLOAT") || t.contains("DOUBLE");
        if real(&exp) && real(&act) {
            return true;
        }

        false
    }

    /// Log drift that an additive migration will not repair
    pub fn warn_non_additive(drift: &[SchemaDrift]) {
        for item in drift.iter().filter(|d| !d.is_additive()) {
            warn!("  ⚠ {} - manual migration required", item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Connection;

    async fn setup_test_conn() -> SqliteConnection {
        SqliteConnection::connect("sqlite::memory:").await.unwrap()
    }

    #[test]
    fn test_column_definition_builder() {
        let col = ColumnDefinition::new("test_col", "TEXT")
            .not_null()
            .unique()
            .default("'default_value'");

        assert_eq!(col.name, "test_col");
        assert_eq!(col.sql_type, "TEXT");
        assert!(col.not_null);
        assert!(col.unique);
        assert_eq!(col.default_value, Some("'default_value'".to_string()));
        assert_eq!(col.to_sql(), "test_col TEXT NOT NULL UNIQUE DEFAULT 'default_value'");
    }

    #[test]
    fn test_autoincrement_renders_primary_key() {
        let col = ColumnDefinition::new("id", "INTEGER").autoincrement();
        assert_eq!(col.to_sql(), "id INTEGER PRIMARY KEY AUTOINCREMENT");
        assert!(col.to_add_column_sql().is_err());
    }

    #[test]
    fn test_add_column_sql_requires_default_for_not_null() {
        let col = ColumnDefinition::new("hidden", "INTEGER").not_null();
        assert!(matches!(col.to_add_column_sql(), Err(Error::InvalidInput(_))));

        let col = col.default("0");
        assert_eq!(col.to_add_column_sql().unwrap(), "hidden INTEGER NOT NULL DEFAULT 0");
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("lesson_tags").is_ok());
        assert!(validate_identifier("_x1").is_ok());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("name; DROP TABLE lessons").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_validate_default_literal() {
        for ok in ["0", "-1.5", "'[]'", "'it''s'", "NULL", "true", "CURRENT_TIMESTAMP"] {
            assert!(validate_default_literal(ok).is_ok(), "{} should be accepted", ok);
        }
        for bad in ["'unterminated", "1); DROP TABLE tags; --", "random()", "'a'b'", "inf"] {
            assert!(validate_default_literal(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_types_compatible() {
        assert!(SchemaDiff::types_compatible("TEXT", "TEXT"));
        assert!(SchemaDiff::types_compatible("text", "TEXT"));
        assert!(SchemaDiff::types_compatible("INTEGER", "INT"));
        assert!(SchemaDiff::types_compatible("TEXT", "VARCHAR"));
        assert!(SchemaDiff::types_compatible("DOUBLE", "REAL"));
        assert!(!SchemaDiff::types_compatible("TEXT", "INTEGER"));
        assert!(!SchemaDiff::types_compatible("REAL", "TEXT"));
    }

    #[tokio::test]
    async fn test_introspect_table() {
        let mut conn = setup_test_conn().await;

        sqlx::query(
            r#"
            CREATE TABLE test_table (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                value REAL DEFAULT 0
            )
            "#,
        )
        .execute(&mut conn)
        .await
        .unwrap();

        let columns = SchemaIntrospector::introspect_table(&mut conn, "test_table")
            .await
            .unwrap();

        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].name, "id");
        assert!(columns[0].pk);
        assert_eq!(columns[1].name, "name");
        assert!(columns[1].not_null);
        assert_eq!(columns[2].type_name, "REAL");
        assert_eq!(columns[2].default_value, Some("0".to_string()));
    }

    #[tokio::test]
    async fn test_detect_missing_column_and_table() {
        let mut conn = setup_test_conn().await;

        sqlx::query("CREATE TABLE test_table (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
            .execute(&mut conn)
            .await
            .unwrap();

        let expected = vec![
            ColumnDefinition::new("id", "INTEGER").primary_key(),
            ColumnDefinition::new("name", "TEXT").not_null(),
            ColumnDefinition::new("value", "REAL"),
        ];

        let actual = SchemaIntrospector::introspect_table(&mut conn, "test_table")
            .await
            .unwrap();
        let drift = SchemaDiff::compare("test_table", &expected, &actual);

        assert_eq!(drift.len(), 1);
        match &drift[0] {
            SchemaDrift::MissingColumn { table, column } => {
                assert_eq!(table, "test_table");
                assert_eq!(column.name, "value");
            }
            other => panic!("Expected MissingColumn, got {:?}", other),
        }

        let missing = SchemaIntrospector::introspect_table(&mut conn, "nope").await.unwrap();
        let drift = SchemaDiff::compare("nope", &expected, &missing);
        assert_eq!(drift, vec![SchemaDrift::MissingTable { table: "nope".to_string() }]);
    }

    #[tokio::test]
    async fn test_detect_type_mismatch_is_not_additive() {
        let mut conn = setup_test_conn().await;

        sqlx::query("CREATE TABLE test_table (id INTEGER PRIMARY KEY, value TEXT)")
            .execute(&mut conn)
            .await
            .unwrap();

        let expected = vec![
            ColumnDefinition::new("id", "INTEGER").primary_key(),
            ColumnDefinition::new("value", "INTEGER"),
        ];
        let actual = SchemaIntrospector::introspect_table(&mut conn, "test_table")
            .await
            .unwrap();
        let drift = SchemaDiff::compare("test_table", &expected, &actual);

        assert_eq!(drift.len(), 1);
        assert!(!drift[0].is_additive());
        assert!(drift[0].to_string().contains("expected INTEGER, found TEXT"));
    }

    #[tokio::test]
    async fn test_object_existence() {
        let mut conn = setup_test_conn().await;

        assert!(!SchemaIntrospector::table_exists(&mut conn, "t").await.unwrap());

        sqlx::query("CREATE TABLE t (id INTEGER, name TEXT)")
            .execute(&mut conn)
            .await
            .unwrap();
        sqlx::query("CREATE INDEX idx_t_name ON t(name)")
            .execute(&mut conn)
            .await
            .unwrap();

        assert!(SchemaIntrospector::table_exists(&mut conn, "t").await.unwrap());
        assert!(SchemaIntrospector::index_exists(&mut conn, "idx_t_name").await.unwrap());
        assert!(SchemaIntrospector::column_exists(&mut conn, "t", "name").await.unwrap());
        assert!(!SchemaIntrospector::column_exists(&mut conn, "t", "missing").await.unwrap());
    }
}
