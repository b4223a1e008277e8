//! Install and activation.
//!
//! A gateway starts out [`Parsed`](WorkerState::Parsed). Installing fills
//! the current generation from the manifest; activating deletes every older
//! generation. Requests are answered in every state; the lifecycle only
//! decides what is in the cache.
//!
//! ```text
//! Parsed ─install─▶ Installing ─▶ Installed ─activate─▶ Activating ─▶ Activated
//!                       │
//!                       └─(cache store failed)─▶ Redundant
//! ```

use crate::error::{ErrorKind, Result};
use crate::gateway::Gateway;
use crate::message::Request;
use derive_more::Display;
use exn::ResultExt;
use futures::StreamExt;
use shelter_cache::{Generation, GenerationName};
use tracing::instrument;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    #[display("parsed")]
    Parsed,
    #[display("installing")]
    Installing,
    #[display("installed")]
    Installed,
    #[display("activating")]
    Activating,
    #[display("activated")]
    Activated,
    /// Install failed; a fresh install may be attempted.
    #[display("redundant")]
    Redundant,
}

/// What an install managed to cache.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PopulateReport {
    /// Canonical keys now stored, in manifest order.
    pub stored: Vec<String>,
    /// Manifest entries that could not be fetched or stored.
    pub failed: Vec<String>,
}

impl PopulateReport {
    /// Whether every manifest entry made it into the cache.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Gateway {
    /// Install, then activate straight away if `lifecycle.skip_waiting` is
    /// set. Otherwise the gateway waits in [`Installed`](WorkerState::Installed)
    /// for [`skip_waiting`](Self::skip_waiting).
    pub async fn start(&self) -> Result<PopulateReport> {
        let report = self.install().await?;
        if self.config().lifecycle.skip_waiting {
            self.activate().await?;
        }
        Ok(report)
    }

    /// Open the current generation and fill it from the manifest.
    ///
    /// Individual fetch failures don't fail the install; they are logged and
    /// listed in the report. Only a cache that can't be opened at all makes
    /// the gateway [`Redundant`](WorkerState::Redundant).
    #[instrument(skip(self), fields(generation = %self.generation_name()))]
    pub async fn install(&self) -> Result<PopulateReport> {
        self.transition("install", &[WorkerState::Parsed, WorkerState::Redundant], WorkerState::Installing)?;
        let generation = match self.current().await {
            Ok(generation) => generation,
            Err(err) => {
                self.set_state(WorkerState::Redundant);
                return Err(err);
            },
        };
        let report = self.populate(&generation, &self.config().manifest).await;
        if report.is_complete() {
            tracing::info!(stored = report.stored.len(), "Installed");
        } else {
            tracing::warn!(stored = report.stored.len(), failed = ?report.failed, "Installed with a partial cache");
        }
        self.set_state(WorkerState::Installed);
        Ok(report)
    }

    /// Fetch every resource and store the successful responses in
    /// `generation`, at most `lifecycle.install_concurrency` at a time.
    pub async fn populate(&self, generation: &Generation, resources: &[String]) -> PopulateReport {
        let concurrency = self.config().lifecycle.install_concurrency.max(1);
        let outcomes: Vec<(String, Option<String>)> = futures::stream::iter(resources)
            .map(|resource| async move {
                let stored = self.populate_one(generation, resource).await;
                (resource.clone(), stored)
            })
            .buffered(concurrency)
            .collect()
            .await;
        let mut report = PopulateReport::default();
        for (resource, stored) in outcomes {
            match stored {
                Some(key) => report.stored.push(key),
                None => report.failed.push(resource),
            }
        }
        report
    }

    async fn populate_one(&self, generation: &Generation, resource: &str) -> Option<String> {
        let key = self.normalizer().normalize(resource);
        let response = match self.fetch(&Request::get(resource)).await {
            Ok(response) if response.is_cacheable() => response,
            Ok(response) => {
                tracing::warn!(resource, status = response.status.as_u16(), "Skipping manifest entry");
                return None;
            },
            Err(err) => {
                tracing::warn!(resource, error = %err, "Failed to fetch manifest entry");
                return None;
            },
        };
        match generation.put(&key, &response.into_entry()).await {
            Ok(()) => Some(key),
            Err(err) => {
                tracing::warn!(resource, error = %err, "Failed to store manifest entry");
                None
            },
        }
    }

    /// Delete every stale generation. Returns the names deleted.
    ///
    /// Requires an installed gateway. If cleanup fails the gateway stays
    /// [`Installed`](WorkerState::Installed) so activation can be retried.
    #[instrument(skip(self), fields(generation = %self.generation_name()))]
    pub async fn activate(&self) -> Result<Vec<GenerationName>> {
        self.transition("activate", &[WorkerState::Installed], WorkerState::Activating)?;
        let deleted = self
            .storage()
            .delete_generations_except(self.generation_name(), self.cleanup_scope())
            .await
            .or_raise(|| ErrorKind::Cache);
        match deleted {
            Ok(deleted) => {
                for name in &deleted {
                    tracing::info!(stale = %name, "Deleted stale generation");
                }
                self.set_state(WorkerState::Activated);
                Ok(deleted)
            },
            Err(err) => {
                self.set_state(WorkerState::Installed);
                Err(err)
            },
        }
    }

    /// Control signal: activate an installed gateway now. A no-op once
    /// activated.
    pub async fn skip_waiting(&self) -> Result<()> {
        match self.state() {
            WorkerState::Activated => Ok(()),
            WorkerState::Installed => self.activate().await.map(|_| ()),
            state => exn::bail!(ErrorKind::Lifecycle("skip waiting", state)),
        }
    }
}
