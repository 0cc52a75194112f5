//! Client connections.

use std::{cmp::Ordering, future::Future, sync::Arc, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    config::Config,
    context::Context,
    database::Database,
    driver::Driver,
    error::{MgoError, MgoResult},
    options::{SessionOptions, TransactionOptions, resolve},
    registry::HookRegistry,
    session::Session,
};

/// How long [`Client::connect`] waits for the initial ping.
pub const CONNECT_PING_TIMEOUT: Duration = Duration::from_secs(15);

/// Oldest server version able to run multi-document transactions.
pub const MIN_TRANSACTION_VERSION: &str = "4.0";

/// Compares two dotted version strings numerically.
///
/// Only the leading digits of each component count, so `"4.4.6-rc0"` reads as `4.4.6`.
/// Missing components are zero. Returns `None` if either version is empty or has a component
/// with no leading digits.
pub fn compare_versions(a: &str, b: &str) -> Option<Ordering> {
    fn parse(version: &str) -> Option<Vec<u64>> {
        if version.trim().is_empty() {
            return None;
        }
        version
            .trim()
            .split('.')
            .map(|part| {
                let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
                digits.parse().ok()
            })
            .collect()
    }

    let a = parse(a)?;
    let b = parse(b)?;
    let len = a.len().max(b.len());
    let component = |v: &[u64], i: usize| v.get(i).copied().unwrap_or(0);

    Some(
        (0..len)
            .map(|i| component(&a[..], i).cmp(&component(&b[..], i)))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal),
    )
}

/// A connected client.
///
/// # Examples
///
/// ```ignore
/// let mut registry = HookRegistry::new();
/// registry.on_opened(&config.uri, "app", "warm-cache", |db| Ok(()));
///
/// let driver = MongoDriverBuilder::new(config.clone()).build().await?;
/// let client = Client::connect(driver, config, Arc::new(registry)).await?;
/// let users = client.database("app").collection("users");
/// ```
#[derive(Debug)]
pub struct Client<D> {
    driver: Arc<D>,
    config: Config,
    registry: Arc<HookRegistry<D>>,
}

impl<D> Clone for Client<D> {
    fn clone(&self) -> Self {
        Self {
            driver: self.driver.clone(),
            config: self.config.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<D: Driver> Client<D> {
    /// Wraps `driver`, checks the connection and runs the on-connected callbacks for
    /// `config.uri`.
    ///
    /// # Errors
    ///
    /// Fails if the configured credential is invalid or the server does not answer a ping
    /// within [`CONNECT_PING_TIMEOUT`]. Callback failures are logged, not returned.
    pub async fn connect(
        driver: D,
        config: Config,
        registry: Arc<HookRegistry<D>>,
    ) -> MgoResult<Self> {
        if let Some(auth) = &config.auth {
            auth.resolve()?;
        }

        let client = Self {
            driver: Arc::new(driver),
            config,
            registry,
        };
        client.ping(CONNECT_PING_TIMEOUT).await?;
        info!(uri = %client.config.uri, "connected");

        client.registry.run_connected(&client.config.uri, &client);
        Ok(client)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    /// Opens database `name` and runs its on-opened callbacks.
    pub fn database(&self, name: impl Into<String>) -> Database<D> {
        let database = Database::new(self.driver.clone(), name);
        self.registry.run_opened(&self.config.uri, &database);
        database
    }

    pub async fn ping(&self, timeout: Duration) -> MgoResult<()> {
        let ctx = Context::background().with_timeout(timeout);
        ctx.bound(self.driver.ping(&ctx)).await
    }

    pub async fn session(&self, options: Option<SessionOptions>) -> MgoResult<Session> {
        let settings = resolve(options).settings;
        let ctx = Context::background();
        let inner = ctx.bound(self.driver.start_session(&ctx, settings)).await?;
        Ok(Session::new(inner))
    }

    /// The server's reported version, `None` if it reports none.
    pub async fn server_version(&self, ctx: &Context) -> MgoResult<Option<String>> {
        ctx.bound(self.driver.server_version(ctx)).await
    }

    async fn transaction_allowed(&self, ctx: &Context) -> bool {
        let version = match self.server_version(ctx).await {
            Ok(Some(version)) => version,
            Ok(None) => {
                warn!("server reported no version, transactions disabled");
                return false;
            }
            Err(err) => {
                warn!(error = %err, "could not read server version, transactions disabled");
                return false;
            }
        };

        match compare_versions(MIN_TRANSACTION_VERSION, &version) {
            Some(Ordering::Less | Ordering::Equal) => true,
            _ => {
                warn!(
                    server_version = %version,
                    required = MIN_TRANSACTION_VERSION,
                    "transactions are not supported by this server"
                );
                false
            }
        }
    }

    /// Runs `callback` in a transaction on a fresh session, ending the session afterwards.
    ///
    /// See [`Session::start_transaction`] for retry behavior.
    ///
    /// # Errors
    ///
    /// Returns [`MgoError::TransactionNotSupported`] without opening a session when the server
    /// is older than [`MIN_TRANSACTION_VERSION`] or its version cannot be determined.
    pub async fn do_transaction<R, F, Fut>(
        &self,
        ctx: &Context,
        callback: F,
        options: Option<TransactionOptions>,
    ) -> MgoResult<R>
    where
        F: FnMut(Context) -> Fut,
        Fut: Future<Output = MgoResult<R>>,
    {
        if !self.transaction_allowed(ctx).await {
            return Err(MgoError::TransactionNotSupported);
        }

        let session = self.session(None).await?;
        let result = session.start_transaction(ctx, callback, options).await;
        if let Err(err) = session.end_session().await {
            debug!(error = %err, "ending transaction session failed");
        }

        result
    }

    /// Disconnects, releasing every pooled connection.
    pub async fn close(&self) -> MgoResult<()> {
        self.driver.shutdown().await?;
        info!(uri = %self.config.uri, "closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering() {
        assert_eq!(compare_versions("4.0", "4.0.0"), Some(Ordering::Equal));
        assert_eq!(compare_versions("4.0", "3.6.23"), Some(Ordering::Greater));
        assert_eq!(compare_versions("4.0", "4.4.6-rc0"), Some(Ordering::Less));
        assert_eq!(compare_versions("4.0", "10.0"), Some(Ordering::Less));
    }

    #[test]
    fn unreadable_versions_do_not_compare() {
        assert_eq!(compare_versions("4.0", ""), None);
        assert_eq!(compare_versions("4.0", "v4"), None);
    }
}
