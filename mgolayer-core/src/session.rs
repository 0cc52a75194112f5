//! Sessions and the transaction coordinator.

use std::{future::Future, sync::Arc};

use tracing::debug;

use crate::{
    context::Context,
    driver::{DriverSession, with_transaction},
    error::{DriverError, MgoError, MgoResult, TRANSIENT_TRANSACTION_ERROR},
    options::{TransactionOptions, resolve},
};

/// A server session obtained from [`Client::session`](crate::client::Client::session).
///
/// A session hosts at most one transaction at a time and must not be shared between
/// concurrent callers while a transaction is running. End it with [`Session::end_session`].
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<dyn DriverSession>,
}

impl Session {
    pub(crate) fn new(inner: Arc<dyn DriverSession>) -> Self {
        Self { inner }
    }

    /// Runs `callback` inside a transaction and returns its result.
    ///
    /// The callback receives a context bound to this session; operations must be given that
    /// context to take part in the transaction. It may run more than once: it is rerun on
    /// transient failures, and returning [`MgoError::TransactionRetry`] requests a rerun
    /// explicitly. No backoff is applied between attempts.
    ///
    /// # Errors
    ///
    /// Returns the callback's error, or the driver's commit error, once retrying is over.
    pub async fn start_transaction<R, F, Fut>(
        &self,
        ctx: &Context,
        mut callback: F,
        options: Option<TransactionOptions>,
    ) -> MgoResult<R>
    where
        F: FnMut(Context) -> Fut,
        Fut: Future<Output = MgoResult<R>>,
    {
        let settings = resolve(options).settings;
        let txn_ctx = ctx.with_session(self.inner.clone());

        with_transaction(self.inner.as_ref(), &settings, || {
            let attempt = callback(txn_ctx.clone());
            async move {
                match attempt.await {
                    Err(MgoError::TransactionRetry) => {
                        debug!("transaction callback requested a retry");
                        Err(DriverError::new("transaction retry requested")
                            .with_label(TRANSIENT_TRANSACTION_ERROR)
                            .into())
                    }
                    other => other,
                }
            }
        })
        .await
    }

    pub async fn abort_transaction(&self) -> MgoResult<()> {
        self.inner.abort_transaction().await
    }

    /// Ends the session, aborting any transaction still in progress.
    pub async fn end_session(&self) -> MgoResult<()> {
        self.inner.end().await
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }
}
