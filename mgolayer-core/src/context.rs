//! Per-call execution context.
//!
//! A [`Context`] travels with every operation. It carries an optional deadline, applied
//! around each driver call, and an optional driver session that binds the call to a running
//! transaction. Contexts are cheap to clone.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use tokio::time::{Instant, timeout_at};

use crate::{
    driver::DriverSession,
    error::{MgoError, MgoResult},
};

/// Cancellation and session scope for a single operation.
#[derive(Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    session: Option<Arc<dyn DriverSession>>,
}

impl Context {
    /// An empty context: no deadline and no session.
    pub fn background() -> Self {
        Self::default()
    }

    /// Returns a copy of this context that expires after `timeout`.
    ///
    /// An existing, earlier deadline is kept.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };

        Self {
            deadline: Some(deadline),
            session: self.session.clone(),
        }
    }

    pub(crate) fn with_session(&self, session: Arc<dyn DriverSession>) -> Self {
        Self {
            deadline: self.deadline,
            session: Some(session),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The session this context is bound to, if it was handed out by a transaction.
    pub fn session(&self) -> Option<&Arc<dyn DriverSession>> {
        self.session.as_ref()
    }

    /// Runs `fut` under this context's deadline.
    ///
    /// # Errors
    ///
    /// Returns [`MgoError::Timeout`] if the deadline passes before `fut` completes.
    pub async fn bound<T, F>(&self, fut: F) -> MgoResult<T>
    where
        F: Future<Output = MgoResult<T>>,
    {
        match self.deadline {
            Some(deadline) => timeout_at(deadline, fut)
                .await
                .map_err(|_| MgoError::Timeout)?,
            None => fut.await,
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.deadline)
            .field("in_session", &self.session.is_some())
            .finish()
    }
}
