pub mod migrations;
pub mod models;

use rusqlite::Connection;
use std::error::Error;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared handle to the chat database. Sessions and HTTP handlers take the
/// lock inside `spawn_blocking` (see `chat::store::blocking`).
pub type DbPool = Arc<Mutex<Connection>>;

pub const DB_FILE_NAME: &str = "social.db";

/// How long a write waits on SQLite's file lock (checkpoints, external
/// readers) before giving up with `SQLITE_BUSY`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open `<data_dir>/social.db`, creating the directory if needed, and bring
/// the schema up to date.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn Error>> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join(DB_FILE_NAME);
    let mut conn = Connection::open(&db_path)?;

    // WAL lets history reads proceed while sessions persist messages
    conn.pragma_update(None, "journal_mode", "WAL")?;
    prepare(&mut conn)?;

    tracing::info!("Database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}

fn prepare(conn: &mut Connection) -> Result<(), Box<dyn Error>> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    migrations::migrations().to_latest(conn)?;
    Ok(())
}

/// Migrated in-memory database for unit tests.
#[cfg(test)]
pub fn in_memory() -> DbPool {
    let mut conn = Connection::open_in_memory().unwrap();
    prepare(&mut conn).unwrap();
    Arc::new(Mutex::new(conn))
}
