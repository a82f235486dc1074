use async_trait::async_trait;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::str::FromStr;
use tracing::debug;

use crate::{
    error::Result,
    storage::{Session, SessionStorage},
};

const CREATE_SESSIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS booking_sessions (
        id TEXT PRIMARY KEY,
        patient_id TEXT NOT NULL,
        data TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
"#;

/// SessionStorage backed by a SQLite table; the session is kept as a JSON document.
#[derive(Clone)]
pub struct SqliteSessionStorage {
    pool: SqlitePool,
}

impl SqliteSessionStorage {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Shares an existing pool and makes sure the sessions table exists.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(CREATE_SESSIONS_TABLE).execute(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl SessionStorage for SqliteSessionStorage {
    async fn save(&self, session: Session) -> Result<()> {
        let data = serde_json::to_string(&session)?;
        debug!(session_id = %session.id, "Saving booking session");

        sqlx::query(
            r#"
            INSERT INTO booking_sessions (id, patient_id, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&session.id)
        .bind(&session.patient_id)
        .bind(data)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT data FROM booking_sessions WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(data,)| serde_json::from_str(&data).map_err(Into::into))
            .transpose()
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM booking_sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Specialty;

    async fn memory_storage() -> SqliteSessionStorage {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteSessionStorage::from_pool(pool).await.unwrap()
    }

    #[tokio::test]
    async fn saves_and_restores_in_progress_booking() {
        let storage = memory_storage().await;

        let mut session = Session::new_for_patient("p1");
        session.flow.select_specialty(Specialty::Pediatrics).unwrap();
        storage.save(session.clone()).await.unwrap();

        let restored = storage.get(&session.id).await.unwrap().unwrap();
        assert_eq!(restored.flow, session.flow);
        assert_eq!(restored.patient_id, "p1");

        // saving again updates in place
        session.flow.retreat().unwrap();
        session.touch();
        storage.save(session.clone()).await.unwrap();
        let restored = storage.get(&session.id).await.unwrap().unwrap();
        assert_eq!(restored.flow, session.flow);

        storage.delete(&session.id).await.unwrap();
        assert!(storage.get(&session.id).await.unwrap().is_none());
    }
}
