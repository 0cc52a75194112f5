//! Sessions and cursors for the in-memory driver.

use std::{
    any::Any,
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use bson::Document;
use mea::{mutex::Mutex, rwlock::RwLock};
use tracing::trace;
use uuid::Uuid;

use mgolayer_core::{
    driver::{DriverCursor, DriverSession, TransactionSettings},
    error::{DriverError, MgoResult},
};

use crate::store::StoreMap;

/// Server error code for transaction state violations.
const NO_SUCH_TRANSACTION: i32 = 251;

/// A cursor over a materialized result set.
#[derive(Debug)]
pub struct MemoryCursor {
    documents: VecDeque<Document>,
}

impl MemoryCursor {
    pub(crate) fn new(documents: Vec<Document>) -> Self {
        Self {
            documents: documents.into(),
        }
    }
}

#[async_trait]
impl DriverCursor for MemoryCursor {
    async fn next_document(&mut self) -> MgoResult<Option<Document>> {
        Ok(self.documents.pop_front())
    }

    async fn close(&mut self) -> MgoResult<()> {
        self.documents.clear();
        Ok(())
    }
}

/// A session over an [`InMemoryDriver`](crate::InMemoryDriver).
///
/// Writes are applied to the shared store as they happen. Starting a transaction takes a
/// snapshot of the whole store and aborting restores it, so an aborted transaction leaves no
/// trace. Transactions are not isolated from concurrent writers outside the session.
#[derive(Debug)]
pub struct MemorySession {
    id: Uuid,
    store: Arc<RwLock<StoreMap>>,
    snapshot: Mutex<Option<StoreMap>>,
    active: AtomicBool,
}

impl MemorySession {
    pub(crate) fn new(store: Arc<RwLock<StoreMap>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            store,
            snapshot: Mutex::new(None),
            active: AtomicBool::new(false),
        }
    }

    /// The session's identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    fn not_in_transaction(&self) -> DriverError {
        DriverError::new("no transaction started").with_code(NO_SUCH_TRANSACTION)
    }
}

#[async_trait]
impl DriverSession for MemorySession {
    async fn start_transaction(&self, _settings: &TransactionSettings) -> MgoResult<()> {
        if self.active.load(Ordering::SeqCst) {
            return Err(DriverError::new("transaction already in progress").into());
        }

        let snapshot = self.store.read().await.clone();
        *self.snapshot.lock().await = Some(snapshot);
        self.active.store(true, Ordering::SeqCst);
        trace!(session = %self.id, "transaction started");
        Ok(())
    }

    async fn commit_transaction(&self) -> MgoResult<()> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Err(self.not_in_transaction().into());
        }

        self.snapshot.lock().await.take();
        trace!(session = %self.id, "transaction committed");
        Ok(())
    }

    async fn abort_transaction(&self) -> MgoResult<()> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Err(self.not_in_transaction().into());
        }

        if let Some(snapshot) = self.snapshot.lock().await.take() {
            *self.store.write().await = snapshot;
        }
        trace!(session = %self.id, "transaction aborted");
        Ok(())
    }

    async fn end(&self) -> MgoResult<()> {
        if self.in_transaction() {
            self.abort_transaction().await?;
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;
    use mgolayer_core::driver::Namespace;

    #[tokio::test]
    async fn abort_restores_the_snapshot() {
        let store = Arc::new(RwLock::new(StoreMap::new()));
        let ns = Namespace::new("app", "users");
        store
            .write()
            .await
            .insert(ns.clone(), vec![doc! { "_id": 1 }]);

        let session = MemorySession::new(store.clone());
        session
            .start_transaction(&TransactionSettings::default())
            .await
            .unwrap();
        store.write().await.entry(ns.clone()).or_default().push(doc! { "_id": 2 });

        session.abort_transaction().await.unwrap();

        assert!(!session.in_transaction());
        assert_eq!(store.read().await.get(&ns).map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn commit_without_transaction_fails() {
        let session = MemorySession::new(Arc::new(RwLock::new(StoreMap::new())));
        assert!(session.commit_transaction().await.is_err());
        assert!(session.end().await.is_ok());
    }
}
