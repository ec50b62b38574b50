//! Series and source binding CRUD.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::{Database, NewSeries, NewSourceBinding, SeriesRow, SourceBindingRow};

const SERIES_COLUMNS: &str = "id, title, folder, category, paused, created_at";
const BINDING_COLUMNS: &str = r#"
    id, series_id, source_id, series_key, scanlator, language,
    priority, enabled, installed, chapter_list, created_at
"#;

impl Database {
    /// Insert a new series
    pub async fn insert_series(&self, series: &NewSeries) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO series (title, folder, category, paused, created_at) VALUES (?, ?, ?, 0, ?)",
        )
        .bind(&series.title)
        .bind(&series.folder)
        .bind(&series.category)
        .bind(super::now_ts())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert series: {}",
                e
            )))
        })?;

        Ok(result.last_insert_rowid())
    }

    /// Get a series by ID
    pub async fn get_series(&self, id: i64) -> Result<Option<SeriesRow>> {
        let row = sqlx::query_as::<_, SeriesRow>(&format!(
            "SELECT {SERIES_COLUMNS} FROM series WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get series: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List all series, oldest first
    pub async fn list_series(&self) -> Result<Vec<SeriesRow>> {
        let rows = sqlx::query_as::<_, SeriesRow>(&format!(
            "SELECT {SERIES_COLUMNS} FROM series ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list series: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Delete a series; its bindings cascade
    pub async fn delete_series(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM series WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete series: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() == 1)
    }

    /// Set the advisory pause flag on a series
    pub async fn set_series_paused(&self, id: i64, paused: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE series SET paused = ? WHERE id = ?")
            .bind(paused as i32)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set series paused: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() == 1)
    }

    /// Insert a new source binding for a series
    pub async fn insert_binding(&self, binding: &NewSourceBinding) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO source_bindings (
                series_id, source_id, series_key, scanlator, language,
                priority, enabled, installed, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, 1, 1, ?)
            "#,
        )
        .bind(binding.series_id)
        .bind(&binding.source_id)
        .bind(&binding.series_key)
        .bind(&binding.scanlator)
        .bind(&binding.language)
        .bind(binding.priority)
        .bind(super::now_ts())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert binding: {}",
                e
            )))
        })?;

        Ok(result.last_insert_rowid())
    }

    /// Bindings for a series, ranked by priority (lower preferred)
    pub async fn bindings_for_series(&self, series_id: i64) -> Result<Vec<SourceBindingRow>> {
        let rows = sqlx::query_as::<_, SourceBindingRow>(&format!(
            r#"
            SELECT {BINDING_COLUMNS} FROM source_bindings
            WHERE series_id = ?
            ORDER BY priority ASC, id ASC
            "#
        ))
        .bind(series_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list bindings: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Enable or disable a binding
    pub async fn set_binding_enabled(&self, id: i64, enabled: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE source_bindings SET enabled = ? WHERE id = ?")
            .bind(enabled as i32)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set binding enabled: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() == 1)
    }

    /// Mark a binding's provider extension installed or uninstalled
    pub async fn set_binding_installed(&self, id: i64, installed: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE source_bindings SET installed = ? WHERE id = ?")
            .bind(installed as i32)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set binding installed: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() == 1)
    }

    /// Store the last-known chapter list for a binding (JSON)
    pub async fn update_binding_chapters(&self, id: i64, chapter_list: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE source_bindings SET chapter_list = ? WHERE id = ?")
            .bind(chapter_list)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update binding chapters: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() == 1)
    }
}
