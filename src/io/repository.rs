//! Student repository and its chunk writer.
//!
//! Each chunk is written in its own transaction. Any failure inside the chunk rolls
//! back every record already saved for it.

use crate::error::SinkError;
use crate::io::sink::ChunkSink;
use crate::io::student;
use crate::record::{Chunk, DomainRecord};
use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ActiveValue::Set, ConnectionTrait, DatabaseConnection,
    DbErr, EntityTrait, PaginatorTrait, QueryOrder, TransactionTrait,
};

/// Repository over the `student` table.
#[derive(Clone)]
pub struct StudentRepository {
    db: DatabaseConnection,
}

impl StudentRepository {
    /// Wrap an open connection.
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Insert one record and return the identifier the store assigned.
    pub async fn save<C: ConnectionTrait>(conn: &C, record: &DomainRecord) -> Result<i32, DbErr> {
        let model = student::ActiveModel {
            id: NotSet,
            firstname: Set(record.first_name.clone()),
            lastname: Set(record.last_name.clone()),
            age: Set(record.age),
            insertion_date: Set(record.insertion_timestamp.clone()),
        }
        .insert(conn)
        .await?;

        Ok(model.id)
    }

    /// Number of stored students.
    pub async fn count(&self) -> Result<u64, DbErr> {
        student::Entity::find().count(&self.db).await
    }

    /// All stored students in id order.
    pub async fn find_all(&self) -> Result<Vec<student::Model>, DbErr> {
        student::Entity::find()
            .order_by_asc(student::Column::Id)
            .all(&self.db)
            .await
    }

    async fn save_chunk<C: ConnectionTrait>(conn: &C, chunk: &Chunk) -> Result<Vec<i32>, SinkError> {
        let mut ids = Vec::with_capacity(chunk.len());
        for record in chunk.records() {
            if let Some(id) = record.id {
                return Err(SinkError::ConstraintViolation(format!(
                    "record already carries id {} in chunk {}",
                    id,
                    chunk.index()
                )));
            }
            ids.push(Self::save(conn, record).await.map_err(classify_db_error)?);
        }
        Ok(ids)
    }
}

#[async_trait]
impl ChunkSink for StudentRepository {
    async fn write_chunk(&self, chunk: &Chunk) -> Result<Vec<i32>, SinkError> {
        let txn = self.db.begin().await.map_err(classify_db_error)?;

        match Self::save_chunk(&txn, chunk).await {
            Ok(ids) => {
                txn.commit().await.map_err(classify_db_error)?;
                Ok(ids)
            }
            Err(e) => {
                if let Err(rollback) = txn.rollback().await {
                    tracing::warn!("Rollback of chunk {} failed: {}", chunk.index(), rollback);
                }
                Err(e)
            }
        }
    }
}

/// Map a store error onto the sink taxonomy.
pub fn classify_db_error(err: DbErr) -> SinkError {
    if let Some(sql_err) = err.sql_err() {
        return SinkError::ConstraintViolation(sql_err.to_string());
    }
    match &err {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => SinkError::Unavailable(err.to_string()),
        DbErr::Exec(_) | DbErr::Query(_) if is_busy(&err) => SinkError::Unavailable(err.to_string()),
        _ => SinkError::Storage(err.to_string()),
    }
}

/// SQLite lock contention (`SQLITE_BUSY`, `SQLITE_LOCKED`).
fn is_busy(err: &DbErr) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("database is busy")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputConfig;
    use crate::io::store;
    use sea_orm::RuntimeErr;

    async fn memory_repository() -> StudentRepository {
        let config = OutputConfig {
            database_url: "sqlite::memory:".to_string(),
            max_connections: None,
            create_schema: true,
        };
        StudentRepository::new(store::connect(&config).await.unwrap())
    }

    fn student(first: &str, age: i32) -> DomainRecord {
        DomainRecord {
            id: None,
            first_name: first.to_string(),
            last_name: "Test".to_string(),
            age,
            insertion_timestamp: "01/02/2024 10:11:12".to_string(),
        }
    }

    #[tokio::test]
    async fn test_write_chunk_assigns_ids() {
        let repo = memory_repository().await;
        let chunk = Chunk::new(0, vec![student("Ada", 36), student("Alan", 41)]);

        let ids = repo.write_chunk(&chunk).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids[0] < ids[1]);

        let stored = repo.find_all().await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].firstname, "Ada");
        assert_eq!(stored[0].insertion_date, "01/02/2024 10:11:12");
        assert_eq!(stored[1].age, 41);
    }

    #[tokio::test]
    async fn test_failed_chunk_rolls_back_entirely() {
        let repo = memory_repository().await;
        let mut tainted = student("Alan", 41);
        tainted.id = Some(5);
        let chunk = Chunk::new(0, vec![student("Ada", 36), tainted]);

        let err = repo.write_chunk(&chunk).await.unwrap_err();
        assert!(matches!(err, SinkError::ConstraintViolation(_)));
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_table_is_storage_error() {
        let config = OutputConfig {
            database_url: "sqlite::memory:".to_string(),
            max_connections: None,
            create_schema: false,
        };
        let repo = StudentRepository::new(store::connect(&config).await.unwrap());

        let err = repo
            .write_chunk(&Chunk::new(0, vec![student("Ada", 36)]))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Storage(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify_lock_contention_as_retryable() {
        let err = classify_db_error(DbErr::Exec(RuntimeErr::Internal(
            "error returned from database: (code: 5) database is locked".into(),
        )));
        assert!(matches!(err, SinkError::Unavailable(_)));

        let err = classify_db_error(DbErr::Query(RuntimeErr::Internal("database table is locked".into())));
        assert!(err.is_retryable());

        let err = classify_db_error(DbErr::Exec(RuntimeErr::Internal("no such table: student".into())));
        assert!(matches!(err, SinkError::Storage(_)));
    }

    #[test]
    fn test_classify_connection_errors_as_retryable() {
        let err = classify_db_error(DbErr::Conn(RuntimeErr::Internal("refused".into())));
        assert!(err.is_retryable());

        let err = classify_db_error(DbErr::Custom("bad".into()));
        assert!(matches!(err, SinkError::Storage(_)));
    }
}
