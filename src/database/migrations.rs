use sqlx::{Pool, Row, Sqlite};
use std::collections::HashSet;
use tracing::{info, instrument, warn};

use super::schema::{CURRENT_SCHEMA, EXPECTED_TABLES, SCHEMA_VERSION};
use crate::error::AppError;

/// Brings the database up to `SCHEMA_VERSION`.
///
/// Returns `true` when the schema was (re)applied. The schema is written with
/// `IF NOT EXISTS` throughout, so re-applying it over a partially created
/// database only fills in what is missing. A database stamped with a newer
/// version than this binary knows is refused rather than downgraded.
#[instrument(skip(pool))]
pub async fn migrate_database(pool: &Pool<Sqlite>) -> Result<bool, AppError> {
    let current_version = user_version(pool).await?;

    if current_version > SCHEMA_VERSION {
        return Err(AppError::Internal(format!(
            "Database schema version {} is newer than supported version {}",
            current_version, SCHEMA_VERSION
        )));
    }

    let missing = missing_tables(pool).await?;

    if current_version == SCHEMA_VERSION && missing.is_empty() {
        info!(version = current_version, "No schema changes needed");
        return Ok(false);
    }

    if current_version == SCHEMA_VERSION {
        warn!(missing = ?missing, "Schema version current but tables missing, re-applying");
    }

    let mut tx = pool.begin().await?;

    for statement in schema_statements() {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to apply schema: {}", e)))?;
    }

    let stamp = format!("PRAGMA user_version = {}", SCHEMA_VERSION);
    sqlx::query(&stamp).execute(&mut *tx).await?;

    tx.commit().await?;

    info!(
        from = current_version,
        to = SCHEMA_VERSION,
        "Database schema migrated"
    );
    Ok(true)
}

/// The schema holds no triggers, so every `;` ends a statement.
fn schema_statements() -> impl Iterator<Item = &'static str> {
    CURRENT_SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
}

async fn user_version(pool: &Pool<Sqlite>) -> Result<i64, AppError> {
    Ok(sqlx::query("PRAGMA user_version")
        .fetch_one(pool)
        .await?
        .get::<i64, _>(0))
}

#[instrument(skip_all)]
pub async fn missing_tables(pool: &Pool<Sqlite>) -> Result<Vec<&'static str>, AppError> {
    let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
        .fetch_all(pool)
        .await?;

    let present: HashSet<String> = rows.iter().map(|row| row.get::<String, _>(0)).collect();

    Ok(EXPECTED_TABLES
        .iter()
        .copied()
        .filter(|table| !present.contains(*table))
        .collect())
}
