//! Periodic retained message checkpoints
//!
//! Saves are blocking file I/O, so they run on the blocking pool. A mutex
//! around the database keeps a save from interleaving with a load.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::error::{PersistenceError, Result};
use super::retained_db::RetainedMessagesDb;
use crate::config::Config;
use crate::metrics;
use crate::retain::RetainedTable;

/// Moves the retained table to and from disk
#[derive(Debug)]
pub struct Checkpointer {
    db: Mutex<RetainedMessagesDb>,
    table: Arc<RetainedTable>,
    expire_after: Option<Duration>,
}

impl Checkpointer {
    pub fn new(db: RetainedMessagesDb, table: Arc<RetainedTable>) -> Self {
        Self {
            db: Mutex::new(db),
            table,
            expire_after: None,
        }
    }

    /// Checkpointer for the retained file named in the configuration
    pub fn from_config(config: &Config, table: Arc<RetainedTable>) -> Self {
        let db = RetainedMessagesDb::new(config.persistence.retained_path())
            .with_max_file_size(config.persistence.max_file_size);
        Self::new(db, table).with_expire_after(config.retain.expire_after)
    }

    /// Load the configured retained file and start periodic checkpoints.
    ///
    /// Returns `None` without touching the disk when persistence is disabled.
    pub async fn start(config: &Config, table: Arc<RetainedTable>) -> Result<Option<CheckpointHandle>> {
        if !config.persistence.enabled {
            info!("Retained message persistence disabled");
            return Ok(None);
        }

        let checkpointer = Arc::new(Self::from_config(config, table));
        checkpointer.load_in_background().await?;

        let interval = config.persistence.checkpoint_interval;
        info!(
            path = %config.persistence.retained_path().display(),
            interval = ?interval,
            "Retained message checkpoints started"
        );
        Ok(Some(checkpointer.spawn(interval)))
    }

    /// Drop retained messages older than `max_age` before each save
    pub fn with_expire_after(mut self, max_age: Option<Duration>) -> Self {
        self.expire_after = max_age;
        self
    }

    pub fn table(&self) -> &Arc<RetainedTable> {
        &self.table
    }

    /// Fill the table from disk. Returns the number of messages inserted.
    pub fn load(&self) -> Result<usize> {
        let messages = self.db.lock().load_all()?;
        let read = messages.len();
        let inserted = self.table.load_from(messages);
        info!(read, inserted, "Loaded retained messages");
        Ok(inserted)
    }

    /// Snapshot the table and write it out. Returns the number saved.
    pub fn save(&self) -> Result<usize> {
        self.table.expire(self.expire_after);
        let snapshot = self.table.snapshot();

        let result = self.db.lock().save_all(&snapshot);
        match &result {
            Ok(saved) => {
                if let Some(m) = metrics::global() {
                    m.checkpoints_total.inc();
                }
                info!(saved, "Saved retained messages");
            }
            Err(e) => {
                if let Some(m) = metrics::global() {
                    m.checkpoint_failures_total.inc();
                }
                error!("Failed to save retained messages: {}", e);
            }
        }
        result
    }

    /// Run [`Checkpointer::save`] on the blocking pool
    pub async fn save_in_background(self: &Arc<Self>) -> Result<usize> {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || this.save())
            .await
            .map_err(|e| PersistenceError::Io(std::io::Error::other(e)))?
    }

    /// Run [`Checkpointer::load`] on the blocking pool
    pub async fn load_in_background(self: &Arc<Self>) -> Result<usize> {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || this.load())
            .await
            .map_err(|e| PersistenceError::Io(std::io::Error::other(e)))?
    }

    /// Start saving every `interval` until the returned handle is shut down
    pub fn spawn(self: Arc<Self>, interval: Duration) -> CheckpointHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(Self::checkpoint_loop(Arc::clone(&self), shutdown_rx, interval));

        CheckpointHandle {
            shutdown_tx,
            task,
            checkpointer: self,
        }
    }

    async fn checkpoint_loop(
        checkpointer: Arc<Self>,
        mut shutdown_rx: mpsc::Receiver<()>,
        period: Duration,
    ) {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // failures are logged and counted by save()
                    let _ = checkpointer.save_in_background().await;
                }

                _ = shutdown_rx.recv() => {
                    debug!("Checkpoint loop received shutdown signal");
                    break;
                }
            }
        }

        debug!("Checkpoint loop exited");
    }
}

/// Running checkpoint task
#[derive(Debug)]
pub struct CheckpointHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
    checkpointer: Arc<Checkpointer>,
}

impl CheckpointHandle {
    pub fn checkpointer(&self) -> &Arc<Checkpointer> {
        &self.checkpointer
    }

    /// Stop the periodic task and write a final checkpoint
    pub async fn shutdown(self) -> Result<usize> {
        info!("Shutting down retained message checkpoints");

        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            error!("Checkpoint task failed: {}", e);
        }

        self.checkpointer.save_in_background().await
    }
}
