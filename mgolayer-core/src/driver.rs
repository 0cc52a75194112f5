//! Document store driver abstraction.
//!
//! The operation layer never talks to a server directly. Everything that touches storage
//! goes through the [`Driver`] trait defined here, which accepts opaque filter and update
//! documents and hands back raw results. Wire encoding, transport, pooling and server
//! discovery all live behind this seam.
//!
//! # Traits
//!
//! - [`Driver`]: The storage operations the layer relies on
//! - [`DriverCursor`]: A lazily consumed stream of result documents
//! - [`DriverSession`]: A server session able to host one transaction at a time
//! - [`DriverBuilder`]: Factory trait for creating driver instances
//!
//! The settings structs in this module ([`FindSettings`], [`UpdateSettings`], ...) are the
//! per-operation knobs a driver understands. Callers do not build them directly in most cases;
//! the [`options`](crate::options) layer resolves them from caller overrides.

use std::{
    any::Any,
    fmt::{self, Debug},
    future::Future,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use tracing::debug;

use crate::{
    context::Context,
    error::{MgoResult, TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    results::{
        BulkResult, DeleteResult, InsertManyResult, InsertOneResult, UpdateResult,
    },
};

/// How long the convenient-transaction loop keeps retrying before giving up.
pub const TRANSACTION_RETRY_LIMIT: Duration = Duration::from_secs(120);

/// Fully qualified collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub db: String,
    pub coll: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

/// Settings for multi-document and single-document finds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindSettings {
    pub sort: Option<Document>,
    pub projection: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    pub hint: Option<Bson>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountSettings {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertSettings {
    pub ordered: Option<bool>,
    pub bypass_document_validation: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSettings {
    pub upsert: Option<bool>,
    pub bypass_document_validation: Option<bool>,
    pub array_filters: Option<Vec<Document>>,
    pub hint: Option<Bson>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplaceSettings {
    pub upsert: Option<bool>,
    pub bypass_document_validation: Option<bool>,
    pub hint: Option<Bson>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteSettings {
    pub hint: Option<Bson>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateSettings {
    pub allow_disk_use: Option<bool>,
    pub batch_size: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSettings {
    pub causal_consistency: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionSettings {
    pub max_commit_time: Option<Duration>,
}

/// The mutation performed by [`Driver::find_one_and_modify`].
#[derive(Debug, Clone, PartialEq)]
pub enum Modification {
    Delete,
    Replace(Document),
    Update(Document),
}

/// A find-and-modify request.
///
/// `upsert` and `return_new` are ignored for [`Modification::Delete`].
#[derive(Debug, Clone, PartialEq)]
pub struct FindAndModify {
    pub modification: Modification,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
    pub upsert: bool,
    pub return_new: bool,
}

/// A single write queued in a bulk batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOperation {
    InsertOne { document: Document },
    DeleteOne { filter: Document },
    DeleteMany { filter: Document },
    ReplaceOneUpsert { filter: Document, replacement: Document },
    UpdateOne { filter: Document, update: Document },
    UpdateMany { filter: Document, update: Document },
}

impl WriteOperation {
    pub fn name(&self) -> &'static str {
        match self {
            WriteOperation::InsertOne { .. } => "insertOne",
            WriteOperation::DeleteOne { .. } => "deleteOne",
            WriteOperation::DeleteMany { .. } => "deleteMany",
            WriteOperation::ReplaceOneUpsert { .. } => "replaceOne",
            WriteOperation::UpdateOne { .. } => "updateOne",
            WriteOperation::UpdateMany { .. } => "updateMany",
        }
    }
}

/// A lazily consumed stream of result documents.
#[async_trait]
pub trait DriverCursor: Send + Debug {
    /// Returns the next document, or `None` once the stream is exhausted.
    async fn next_document(&mut self) -> MgoResult<Option<Document>>;

    /// Releases server-side resources. Calling it more than once is harmless.
    async fn close(&mut self) -> MgoResult<()>;
}

/// A server session.
///
/// Sessions are shared behind an `Arc` so every method takes `&self`; implementations
/// guard their state internally. A session hosts at most one transaction at a time.
#[async_trait]
pub trait DriverSession: Send + Sync + Debug {
    async fn start_transaction(&self, settings: &TransactionSettings) -> MgoResult<()>;

    async fn commit_transaction(&self) -> MgoResult<()>;

    async fn abort_transaction(&self) -> MgoResult<()>;

    /// Ends the session. Any transaction still open is aborted.
    async fn end(&self) -> MgoResult<()>;

    /// Returns `true` while a transaction has been started and neither committed nor aborted.
    fn in_transaction(&self) -> bool;

    /// Returns a reference to `self` as a trait object for downcasting.
    ///
    /// Drivers use this to recover their own session type from a [`Context`].
    fn as_any(&self) -> &dyn Any;
}

/// Abstract interface for document store drivers.
///
/// Filters, updates and pipelines are passed through verbatim. The `ctx` argument carries
/// the session the call must run in, if any; deadlines are enforced by the caller.
///
/// # Errors
///
/// Implementations report server and transport failures as
/// [`MgoError::Driver`](crate::error::MgoError::Driver), preserving the server error code and
/// labels. Decoding failures map to [`MgoError::Serialization`](crate::error::MgoError::Serialization).
#[async_trait]
pub trait Driver: Send + Sync + Debug + 'static {
    /// Opens a cursor over the documents matching `filter`.
    async fn find(
        &self,
        ctx: &Context,
        ns: &Namespace,
        filter: Document,
        settings: FindSettings,
    ) -> MgoResult<Box<dyn DriverCursor>>;

    /// Returns the first document matching `filter`, if any. `settings.limit` is ignored.
    async fn find_one(
        &self,
        ctx: &Context,
        ns: &Namespace,
        filter: Document,
        settings: FindSettings,
    ) -> MgoResult<Option<Document>>;

    async fn count_documents(
        &self,
        ctx: &Context,
        ns: &Namespace,
        filter: Document,
        settings: CountSettings,
    ) -> MgoResult<u64>;

    /// Returns the distinct values of `key` across the documents matching `filter`.
    async fn distinct(
        &self,
        ctx: &Context,
        ns: &Namespace,
        key: &str,
        filter: Document,
    ) -> MgoResult<Vec<Bson>>;

    async fn insert_one(
        &self,
        ctx: &Context,
        ns: &Namespace,
        document: Document,
        settings: InsertSettings,
    ) -> MgoResult<InsertOneResult>;

    async fn insert_many(
        &self,
        ctx: &Context,
        ns: &Namespace,
        documents: Vec<Document>,
        settings: InsertSettings,
    ) -> MgoResult<InsertManyResult>;

    /// Applies an update document to the first (`multi == false`) or every matching document.
    async fn update(
        &self,
        ctx: &Context,
        ns: &Namespace,
        filter: Document,
        update: Document,
        multi: bool,
        settings: UpdateSettings,
    ) -> MgoResult<UpdateResult>;

    async fn replace_one(
        &self,
        ctx: &Context,
        ns: &Namespace,
        filter: Document,
        replacement: Document,
        settings: ReplaceSettings,
    ) -> MgoResult<UpdateResult>;

    /// Deletes the first (`multi == false`) or every matching document.
    async fn delete(
        &self,
        ctx: &Context,
        ns: &Namespace,
        filter: Document,
        multi: bool,
        settings: DeleteSettings,
    ) -> MgoResult<DeleteResult>;

    /// Atomically finds one document and deletes, replaces or updates it.
    ///
    /// Returns the pre-image, or the post-image when `request.return_new` is set.
    /// `None` means no document was returned: nothing matched, or an upsert inserted a
    /// document while the pre-image was requested.
    async fn find_one_and_modify(
        &self,
        ctx: &Context,
        ns: &Namespace,
        filter: Document,
        request: FindAndModify,
    ) -> MgoResult<Option<Document>>;

    /// Submits `operations` in one round trip.
    ///
    /// `ordered` of `None` selects the driver's default, which is ordered.
    async fn bulk_write(
        &self,
        ctx: &Context,
        ns: &Namespace,
        operations: Vec<WriteOperation>,
        ordered: Option<bool>,
    ) -> MgoResult<BulkResult>;

    async fn aggregate(
        &self,
        ctx: &Context,
        ns: &Namespace,
        pipeline: Vec<Document>,
        settings: AggregateSettings,
    ) -> MgoResult<Box<dyn DriverCursor>>;

    /// Runs a database command and returns the server's reply.
    async fn run_command(&self, ctx: &Context, db: &str, command: Document)
    -> MgoResult<Document>;

    async fn drop_collection(&self, ctx: &Context, ns: &Namespace) -> MgoResult<()>;

    async fn drop_database(&self, ctx: &Context, db: &str) -> MgoResult<()>;

    async fn ping(&self, ctx: &Context) -> MgoResult<()>;

    /// Reports the server version string, e.g. `"4.4.6"`.
    async fn server_version(&self, ctx: &Context) -> MgoResult<Option<String>> {
        let reply = self
            .run_command(ctx, "admin", doc! { "buildInfo": 1 })
            .await?;
        match reply.get("version") {
            Some(Bson::String(version)) => Ok(Some(version.clone())),
            _ => Ok(None),
        }
    }

    async fn start_session(
        &self,
        ctx: &Context,
        settings: SessionSettings,
    ) -> MgoResult<Arc<dyn DriverSession>>;

    /// Releases every connection held by the driver.
    async fn shutdown(&self) -> MgoResult<()> {
        Ok(())
    }
}

/// Factory trait for creating driver instances.
#[async_trait]
pub trait DriverBuilder {
    type Driver: Driver;

    /// Builds and returns a new driver instance.
    async fn build(self) -> MgoResult<Self::Driver>;
}

/// Runs `body` inside a transaction on `session`, following the driver transaction protocol.
///
/// The body is rerun from a fresh transaction when it fails with an error labelled
/// [`TRANSIENT_TRANSACTION_ERROR`]. A commit failing with
/// [`UNKNOWN_TRANSACTION_COMMIT_RESULT`] is retried on its own, while a transient commit
/// failure restarts the whole transaction. Retrying stops after [`TRANSACTION_RETRY_LIMIT`].
///
/// If the body ends the transaction itself, no commit is attempted.
pub async fn with_transaction<R, F, Fut>(
    session: &dyn DriverSession,
    settings: &TransactionSettings,
    mut body: F,
) -> MgoResult<R>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = MgoResult<R>>,
{
    let started = std::time::Instant::now();

    'attempt: loop {
        session.start_transaction(settings).await?;

        let value = match body().await {
            Ok(value) => value,
            Err(err) => {
                if session.in_transaction()
                    && let Err(abort_err) = session.abort_transaction().await
                {
                    debug!(error = %abort_err, "abort after failed transaction body");
                }
                if err.has_label(TRANSIENT_TRANSACTION_ERROR)
                    && started.elapsed() < TRANSACTION_RETRY_LIMIT
                {
                    debug!(error = %err, "retrying transient transaction failure");
                    continue 'attempt;
                }
                return Err(err);
            }
        };

        if !session.in_transaction() {
            return Ok(value);
        }

        loop {
            match session.commit_transaction().await {
                Ok(()) => return Ok(value),
                Err(err) => {
                    if started.elapsed() < TRANSACTION_RETRY_LIMIT {
                        if err.has_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) {
                            debug!(error = %err, "retrying commit with unknown result");
                            continue;
                        }
                        if err.has_label(TRANSIENT_TRANSACTION_ERROR) {
                            debug!(error = %err, "restarting transaction after transient commit failure");
                            continue 'attempt;
                        }
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    use super::*;
    use crate::error::{DriverError, MgoError};

    #[derive(Debug, Default)]
    struct ScriptedSession {
        active: AtomicBool,
        starts: AtomicUsize,
        aborts: AtomicUsize,
        commit_failures: Mutex<Vec<DriverError>>,
    }

    #[async_trait]
    impl DriverSession for ScriptedSession {
        async fn start_transaction(&self, _settings: &TransactionSettings) -> MgoResult<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.active.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn commit_transaction(&self) -> MgoResult<()> {
            if let Some(err) = self.commit_failures.lock().unwrap().pop() {
                return Err(err.into());
            }
            self.active.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn abort_transaction(&self) -> MgoResult<()> {
            self.aborts.fetch_add(1, Ordering::SeqCst);
            self.active.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn end(&self) -> MgoResult<()> {
            Ok(())
        }

        fn in_transaction(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[tokio::test]
    async fn transient_body_failure_reruns_the_transaction() {
        let session = ScriptedSession::default();
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let result = with_transaction(&session, &TransactionSettings::default(), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(DriverError::new("conflict")
                    .with_label(TRANSIENT_TRANSACTION_ERROR)
                    .into())
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(session.starts.load(Ordering::SeqCst), 2);
        assert_eq!(session.aborts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn other_body_failure_aborts_and_returns() {
        let session = ScriptedSession::default();

        let result: MgoResult<()> =
            with_transaction(&session, &TransactionSettings::default(), || async {
                Err(MgoError::NoSuchDocuments)
            })
            .await;

        assert!(matches!(result, Err(MgoError::NoSuchDocuments)));
        assert_eq!(session.starts.load(Ordering::SeqCst), 1);
        assert_eq!(session.aborts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_commit_result_retries_only_the_commit() {
        let session = ScriptedSession::default();
        session
            .commit_failures
            .lock()
            .unwrap()
            .push(DriverError::new("network").with_label(UNKNOWN_TRANSACTION_COMMIT_RESULT));
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let result = with_transaction(&session, &TransactionSettings::default(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        })
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn namespace_display() {
        assert_eq!(Namespace::new("app", "users").to_string(), "app.users");
    }
}
