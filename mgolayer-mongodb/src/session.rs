//! Sessions and cursors backed by the `mongodb` crate.

use std::{
    any::Any,
    collections::VecDeque,
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use bson::Document;
use futures::TryStreamExt;
use mea::mutex::{Mutex, MutexGuard};
use mongodb::{ClientSession, Cursor, options::TransactionOptions};

use mgolayer_core::{
    driver::{DriverCursor, DriverSession, TransactionSettings},
    error::MgoResult,
};

use crate::error::convert_error;

/// A server-side cursor streamed in batches.
pub struct MongoCursor {
    inner: Option<Cursor<Document>>,
}

impl MongoCursor {
    pub(crate) fn new(inner: Cursor<Document>) -> Self {
        Self { inner: Some(inner) }
    }
}

impl fmt::Debug for MongoCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoCursor")
            .field("open", &self.inner.is_some())
            .finish()
    }
}

#[async_trait]
impl DriverCursor for MongoCursor {
    async fn next_document(&mut self) -> MgoResult<Option<Document>> {
        match self.inner.as_mut() {
            Some(cursor) => cursor.try_next().await.map_err(convert_error),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> MgoResult<()> {
        // Dropping the cursor kills it on the server.
        self.inner.take();
        Ok(())
    }
}

/// Results of a read run inside a session.
///
/// Session cursors need the session for every batch, so reads in a session are drained
/// while the session is held and served from memory afterwards.
#[derive(Debug)]
pub struct BufferedCursor {
    documents: VecDeque<Document>,
}

impl BufferedCursor {
    pub(crate) fn new(documents: Vec<Document>) -> Self {
        Self {
            documents: documents.into(),
        }
    }
}

#[async_trait]
impl DriverCursor for BufferedCursor {
    async fn next_document(&mut self) -> MgoResult<Option<Document>> {
        Ok(self.documents.pop_front())
    }

    async fn close(&mut self) -> MgoResult<()> {
        self.documents.clear();
        Ok(())
    }
}

/// A `mongodb` client session.
///
/// The underlying session is used by one operation at a time.
pub struct MongoSession {
    inner: Mutex<ClientSession>,
    active: AtomicBool,
}

impl MongoSession {
    pub(crate) fn new(inner: ClientSession) -> Self {
        Self {
            inner: Mutex::new(inner),
            active: AtomicBool::new(false),
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, ClientSession> {
        self.inner.lock().await
    }
}

impl fmt::Debug for MongoSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoSession")
            .field("in_transaction", &self.in_transaction())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DriverSession for MongoSession {
    async fn start_transaction(&self, settings: &TransactionSettings) -> MgoResult<()> {
        let mut options = TransactionOptions::default();
        options.max_commit_time = settings.max_commit_time;

        let mut session = self.lock().await;
        session
            .start_transaction()
            .with_options(options)
            .await
            .map_err(convert_error)?;
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit_transaction(&self) -> MgoResult<()> {
        let mut session = self.lock().await;
        session.commit_transaction().await.map_err(convert_error)?;
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn abort_transaction(&self) -> MgoResult<()> {
        let mut session = self.lock().await;
        let result = session.abort_transaction().await.map_err(convert_error);
        self.active.store(false, Ordering::SeqCst);
        result
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
