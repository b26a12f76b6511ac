pub mod conversations;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Type alias for the shared database connection.
/// rusqlite is synchronous, so it is wrapped in Arc<Mutex> for thread safety
/// with tokio::task::spawn_blocking for DB operations.
pub type DbPool = Arc<Mutex<Connection>>;

/// Errors raised by the durable store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    Poisoned,
    #[error("{0} not found")]
    NotFound(&'static str),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Map store failures at the REST handler edge.
impl From<StoreError> for axum::http::StatusCode {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NOT_FOUND,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::CONFLICT
            }
            other => {
                tracing::error!(error = %other, "Store failure");
                Self::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Initialize the SQLite database: create data directory if needed,
/// open (or create) the database file, enable WAL mode, and run migrations.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join("duet.db");
    let mut conn = Connection::open(&db_path)?;

    // WAL for concurrent readers while the presence sweep writes
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    migrations::migrations().to_latest(&mut conn)?;

    tracing::info!("Database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}

/// Open a private in-memory database with the full schema applied.
pub fn init_memory_db() -> Result<DbPool, Box<dyn std::error::Error>> {
    let mut conn = Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    migrations::migrations().to_latest(&mut conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Lock the shared connection, mapping poisoning to a store error.
pub fn lock(db: &DbPool) -> StoreResult<MutexGuard<'_, Connection>> {
    db.lock().map_err(|_| StoreError::Poisoned)
}

/// Run a store closure on the blocking pool.
///
/// A panicked or cancelled blocking task is reported as a poisoned store.
pub async fn with_db<T, F>(db: &DbPool, f: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = lock(&db)?;
        f(&conn)
    })
    .await
    .map_err(|_| StoreError::Poisoned)?
}

/// Timestamp format used for every stored instant.
/// Fixed width with a `Z` suffix so that string order equals time order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}
