//! In-memory registry of pipeline runs.
//!
//! The registry is the only structure mutated by more than one concurrent
//! task: the orchestrator's run body writes its own entry while status
//! queries read any entry. Entries are locked individually so unrelated runs
//! never serialize on each other.

mod entry;

pub use entry::{CancelToken, PipelineRun, RunResults, RunStatus, RunUpdate};

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No entry exists for the given run id.
    #[error("run {0} not found")]
    NotFound(Uuid),

    /// An entry already exists for the given run id.
    #[error("run {0} already registered")]
    AlreadyExists(Uuid),
}

/// One registry slot: the status record plus its cancellation token.
struct RegistryEntry {
    run: Mutex<PipelineRun>,
    cancel: CancelToken,
}

/// Concurrent map from run id to status record.
#[derive(Default)]
pub struct RunRegistry {
    entries: RwLock<HashMap<Uuid, Arc<RegistryEntry>>>,
}

impl RunRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new pending run and returns its cancellation token.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::AlreadyExists` if the run id is taken; run
    /// ids are single-use.
    pub async fn create(&self, run: PipelineRun) -> Result<CancelToken, RegistryError> {
        let run_id = run.run_id;
        let mut entries = self.entries.write().await;
        if entries.contains_key(&run_id) {
            return Err(RegistryError::AlreadyExists(run_id));
        }

        let cancel = CancelToken::new();
        entries.insert(
            run_id,
            Arc::new(RegistryEntry {
                run: Mutex::new(run),
                cancel: cancel.clone(),
            }),
        );
        debug!(run_id = %run_id, "Run registered");
        Ok(cancel)
    }

    /// Merges a partial update into a run's record.
    ///
    /// The merge happens under the entry's own lock; readers observe either
    /// the old record or the fully merged one, never a torn state.
    pub async fn update(&self, run_id: Uuid, update: RunUpdate) -> Result<(), RegistryError> {
        let entry = self.entry(run_id).await?;
        let mut run = entry.run.lock().await;
        run.apply(update);
        Ok(())
    }

    /// Returns a snapshot of a run's record.
    pub async fn get(&self, run_id: Uuid) -> Result<PipelineRun, RegistryError> {
        let entry = self.entry(run_id).await?;
        let run = entry.run.lock().await;
        Ok(run.clone())
    }

    /// Returns snapshots of all runs, most recently created first.
    pub async fn list(&self) -> Vec<PipelineRun> {
        let entries: Vec<Arc<RegistryEntry>> =
            self.entries.read().await.values().cloned().collect();

        let mut runs = Vec::with_capacity(entries.len());
        for entry in entries {
            runs.push(entry.run.lock().await.clone());
        }
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs
    }

    /// Removes a run, cancelling it first when still active.
    ///
    /// The cancellation token is signalled before the entry disappears so
    /// the run body stops dispatching work; in-flight calls drain on their
    /// own.
    pub async fn delete(&self, run_id: Uuid) -> Result<(), RegistryError> {
        let entry = {
            let mut entries = self.entries.write().await;
            entries.remove(&run_id).ok_or(RegistryError::NotFound(run_id))?
        };

        entry.cancel.cancel();
        let mut run = entry.run.lock().await;
        run.apply(RunUpdate::new().status(RunStatus::Cancelled));
        debug!(run_id = %run_id, "Run deleted");
        Ok(())
    }

    /// Returns the cancellation token of an active run.
    pub async fn cancel_token(&self, run_id: Uuid) -> Result<CancelToken, RegistryError> {
        let entry = self.entry(run_id).await?;
        Ok(entry.cancel.clone())
    }

    async fn entry(&self, run_id: Uuid) -> Result<Arc<RegistryEntry>, RegistryError> {
        self.entries
            .read()
            .await
            .get(&run_id)
            .cloned()
            .ok_or(RegistryError::NotFound(run_id))
    }
}
