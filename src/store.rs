//! Process-wide handle to the database.
//!
//! One connection behind a mutex: writes are serialized, and every read sees
//! a committed state. Writers bump a version counter that subscribers watch
//! to know when rankings need recomputing.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::db::{Database, DbError, Result};

#[derive(Clone)]
pub struct SharedStore {
    db: Arc<Mutex<Database>>,
    version: Arc<watch::Sender<u64>>,
}

impl SharedStore {
    pub fn new(db: Database) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            db: Arc::new(Mutex::new(db)),
            version: Arc::new(version),
        }
    }

    fn lock(db: &Mutex<Database>) -> MutexGuard<'_, Database> {
        // A panic mid-query leaves SQLite itself consistent
        db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a read on the calling thread.
    pub fn read<R>(&self, f: impl FnOnce(&Database) -> Result<R>) -> Result<R> {
        f(&Self::lock(&self.db))
    }

    /// Run a write on the calling thread and notify subscribers on success.
    pub fn write<R>(&self, f: impl FnOnce(&Database) -> Result<R>) -> Result<R> {
        let result = f(&Self::lock(&self.db))?;
        self.notify_changed();
        Ok(result)
    }

    /// Run a read on the blocking pool.
    pub async fn read_async<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Database) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&Self::lock(&db)))
            .await
            .map_err(|e| DbError::Task(e.to_string()))?
    }

    /// Run a write on the blocking pool and notify subscribers on success.
    pub async fn write_async<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Database) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let result = self.read_async(f).await?;
        self.notify_changed();
        Ok(result)
    }

    fn notify_changed(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Current write counter.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Receiver that is marked changed after every successful write.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}
