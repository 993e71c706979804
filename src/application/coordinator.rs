use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{sleep, timeout};

use crate::domain::{DomainEvent, EventSink, NullSink};
use crate::storage::Repository;

use super::CoreError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
const ACQUIRE_ATTEMPTS: u32 = 3;
const ACQUIRE_BACKOFF: Duration = Duration::from_millis(50);

/// The only component allowed to begin, commit or roll back the underlying
/// persistence transaction. A unit of work holds an exclusive write section
/// for its whole lifetime, so two atomic operations never interleave their
/// writes; reads outside a unit of work go straight to the pool and observe
/// last-committed state.
#[derive(Clone)]
pub struct TransactionCoordinator {
    pool: SqlitePool,
    write_section: Arc<Mutex<()>>,
    sink: Arc<dyn EventSink>,
}

impl TransactionCoordinator {
    pub fn new(repo: &Repository) -> Self {
        Self::with_sink(repo, Arc::new(NullSink))
    }

    pub fn with_sink(repo: &Repository, sink: Arc<dyn EventSink>) -> Self {
        Self {
            pool: repo.pool().clone(),
            write_section: Arc::new(Mutex::new(())),
            sink,
        }
    }

    /// Open a unit of work. Acquisition of the write section is retried a
    /// bounded number of times with backoff before surfacing
    /// `ConcurrencyConflict`; no other failure is ever retried.
    pub async fn begin(&self) -> Result<UnitOfWork, CoreError> {
        let guard = self.acquire_write_section().await?;
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        Ok(UnitOfWork {
            tx,
            events: Vec::new(),
            sink: self.sink.clone(),
            _guard: guard,
        })
    }

    /// Run `op` inside a fresh unit of work: commit on `Ok`, roll back on
    /// `Err` and propagate the original error. Composed workflows take
    /// `&mut UnitOfWork`, so nested steps always join the enclosing unit of
    /// work; there are no partial sub-commits.
    pub async fn run_atomic<T, F>(&self, op: F) -> Result<T, CoreError>
    where
        F: for<'u> FnOnce(&'u mut UnitOfWork) -> BoxFuture<'u, Result<T, CoreError>>,
    {
        let mut uow = self.begin().await?;
        match op(&mut uow).await {
            Ok(value) => {
                uow.commit().await?;
                Ok(value)
            }
            Err(err) => {
                uow.rollback().await?;
                Err(err)
            }
        }
    }

    async fn acquire_write_section(&self) -> Result<OwnedMutexGuard<()>, CoreError> {
        let mut backoff = ACQUIRE_BACKOFF;
        for attempt in 1..=ACQUIRE_ATTEMPTS {
            match timeout(ACQUIRE_TIMEOUT, self.write_section.clone().lock_owned()).await {
                Ok(guard) => return Ok(guard),
                Err(_) if attempt < ACQUIRE_ATTEMPTS => {
                    sleep(backoff).await;
                    backoff *= 2;
                }
                Err(_) => break,
            }
        }
        Err(CoreError::ConcurrencyConflict)
    }
}

/// An open transaction plus the domain events buffered during it. Events
/// reach the sink only after a successful commit; rollback (explicit or by
/// drop) discards writes and events together.
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
    events: Vec<DomainEvent>,
    sink: Arc<dyn EventSink>,
    _guard: OwnedMutexGuard<()>,
}

impl UnitOfWork {
    /// The connection all repository calls inside this unit of work use.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Buffer an event for delivery after commit.
    pub fn defer_event(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    /// Events buffered so far (committed work only becomes visible to the
    /// sink; this accessor exists for composition and tests).
    pub fn pending_events(&self) -> &[DomainEvent] {
        &self.events
    }

    pub async fn commit(self) -> Result<Vec<DomainEvent>, CoreError> {
        self.tx.commit().await.context("Failed to commit")?;
        for event in &self.events {
            self.sink.publish(event);
        }
        Ok(self.events)
    }

    pub async fn rollback(self) -> Result<(), CoreError> {
        self.tx.rollback().await.context("Failed to roll back")?;
        Ok(())
    }
}
