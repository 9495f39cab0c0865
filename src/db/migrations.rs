//! Database migrations and initialization.

use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

/// Initialize the SQLite database with schema and pragmas.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _meta| Box::pin(async move { configure_pragmas_conn(conn).await }))
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await?;

    run_migrations(&pool).await?;

    info!("database initialized at {}", db_path);
    Ok(pool)
}

/// Run all database migrations. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let schema_sql = include_str!("schema.sql");

    for statement in split_statements(schema_sql) {
        sqlx::query(&statement).execute(pool).await?;
    }

    info!("migrations completed");
    Ok(())
}

/// Split the schema into executable statements.
///
/// A naive split on ';' breaks trigger bodies, so statements between
/// `CREATE TRIGGER` and its closing `END;` are kept whole.
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_trigger = false;

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }

        current.push_str(line);
        current.push('\n');

        if trimmed.to_ascii_uppercase().contains("CREATE TRIGGER") {
            in_trigger = true;
        }

        let upper = trimmed.to_ascii_uppercase();
        let ends = if in_trigger {
            upper == "END;"
        } else {
            trimmed.ends_with(';')
        };
        if ends {
            statements.push(current.trim().to_string());
            current.clear();
            in_trigger = false;
        }
    }

    if !current.trim().is_empty() {
        statements.push(current.trim().to_string());
    }
    statements
}

/// Configure SQLite pragmas for reliability under concurrent writers.
async fn configure_pragmas_conn(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    use sqlx::Row;

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *conn)
        .await?;

    // journal_mode returns the actual mode set; must use fetch to get result
    let row = sqlx::query("PRAGMA journal_mode = WAL")
        .fetch_one(&mut *conn)
        .await?;
    let journal_mode: String = row.get(0);
    info!("sqlite journal_mode set to {}", journal_mode);

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&mut *conn)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&mut *conn)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_split_statements_keeps_triggers_whole() {
        let sql = r#"
            CREATE TABLE a (x INTEGER);
            CREATE TRIGGER t AFTER INSERT ON a
            BEGIN
                UPDATE a SET x = 1;
                INSERT INTO a (x) VALUES (2);
            END;
            CREATE TABLE b (y INTEGER);
        "#;
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 3);
        assert!(stmts[1].contains("UPDATE a SET x = 1;"));
        assert!(stmts[1].trim_end().ends_with("END;"));
    }

    #[test]
    fn test_split_statements_on_real_schema() {
        let stmts = split_statements(include_str!("schema.sql"));
        let triggers = stmts
            .iter()
            .filter(|s| s.to_ascii_uppercase().contains("CREATE TRIGGER"))
            .count();
        assert_eq!(triggers, 2);
        for s in &stmts {
            assert!(s.ends_with(';'), "statement not terminated: {}", s);
        }
    }

    #[tokio::test]
    async fn test_init_db_creates_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();

        let pool = init_db(&db_path).await.expect("init_db failed");
        assert!(Path::new(&db_path).exists());

        let result: (i64,) = sqlx::query_as("SELECT 1")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        assert_eq!(result.0, 1);
    }

    #[tokio::test]
    async fn test_migrations_create_tables_and_triggers() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");

        for table in [
            "assets",
            "positions",
            "order_buckets",
            "stop_buckets",
            "exposure_agg",
        ] {
            let row: (String,) =
                sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name=?")
                    .bind(table)
                    .fetch_one(&pool)
                    .await
                    .unwrap_or_else(|_| panic!("missing table {}", table));
            assert_eq!(row.0, table);
        }

        let triggers: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type='trigger'")
                .fetch_one(&pool)
                .await
                .expect("query failed");
        assert_eq!(triggers.0, 2);
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");

        run_migrations(&pool)
            .await
            .expect("second migration run failed");

        let result: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type='table'")
                .fetch_one(&pool)
                .await
                .expect("query failed");
        assert!(result.0 > 0);
    }
}
