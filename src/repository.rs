use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    models::{FileRecord, NewFileRecord},
    utils::like_pattern,
};

const SELECT_COLUMNS: &str =
    "SELECT id, original_name, stored_name, size_bytes, mime_type, uploaded_at FROM files";

/// Queries against the `files` metadata table.
#[derive(Debug, Clone)]
pub struct FileRepository {
    pool: SqlitePool,
}

impl FileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a row, stamping it with the current time.
    pub async fn insert(&self, file: &NewFileRecord) -> Result<FileRecord, sqlx::Error> {
        sqlx::query_as::<_, FileRecord>(
            r#"
            INSERT INTO files (original_name, stored_name, size_bytes, mime_type, uploaded_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, original_name, stored_name, size_bytes, mime_type, uploaded_at
            "#,
        )
        .bind(&file.original_name)
        .bind(&file.stored_name)
        .bind(file.size_bytes)
        .bind(&file.mime_type)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<FileRecord>, sqlx::Error> {
        sqlx::query_as::<_, FileRecord>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// All rows, newest first.
    pub async fn list(&self) -> Result<Vec<FileRecord>, sqlx::Error> {
        sqlx::query_as::<_, FileRecord>(&format!(
            "{SELECT_COLUMNS} ORDER BY uploaded_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await
    }

    /// Rows whose original name contains `query`, newest first.
    ///
    /// SQLite's `LIKE` folds ASCII case only.
    pub async fn search(&self, query: &str) -> Result<Vec<FileRecord>, sqlx::Error> {
        sqlx::query_as::<_, FileRecord>(&format!(
            r"{SELECT_COLUMNS} WHERE original_name LIKE ? ESCAPE '\' ORDER BY uploaded_at DESC, id DESC"
        ))
        .bind(like_pattern(query))
        .fetch_all(&self.pool)
        .await
    }

    /// Returns `false` when no row had this id.
    pub async fn delete(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_stored_names(&self) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>("SELECT stored_name FROM files")
            .fetch_all(&self.pool)
            .await
    }

    #[cfg(test)]
    pub async fn count(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await
    }
}
