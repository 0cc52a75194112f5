//! Connection lifecycle callbacks.
//!
//! A [`HookRegistry`] holds named callbacks that run when a client connects to a given
//! address, and when a database is opened on that address. Callbacks are registered at
//! startup, before the registry is shared with clients, and are never removed.
//!
//! Unlike Before hooks, lifecycle callbacks do not abort anything: a failing callback is
//! logged and the remaining callbacks still run.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::{client::Client, database::Database, error::MgoResult};

type ConnectedFn<D> = Box<dyn Fn(&Client<D>) -> MgoResult<()> + Send + Sync>;
type OpenedFn<D> = Box<dyn Fn(&Database<D>) -> MgoResult<()> + Send + Sync>;

struct Named<F> {
    name: String,
    callback: F,
}

/// On-connected and on-database-opened callbacks, keyed by connection address.
pub struct HookRegistry<D> {
    connected: HashMap<String, Vec<Named<ConnectedFn<D>>>>,
    opened: HashMap<(String, String), Vec<Named<OpenedFn<D>>>>,
}

impl<D> Default for HookRegistry<D> {
    fn default() -> Self {
        Self {
            connected: HashMap::new(),
            opened: HashMap::new(),
        }
    }
}

impl<D> std::fmt::Debug for HookRegistry<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("connected", &self.connected.keys().collect::<Vec<_>>())
            .field("opened", &self.opened.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<D> HookRegistry<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` to run after a client connects to `uri`.
    pub fn on_connected<F>(
        &mut self,
        uri: impl Into<String>,
        name: impl Into<String>,
        callback: F,
    ) -> &mut Self
    where
        F: Fn(&Client<D>) -> MgoResult<()> + Send + Sync + 'static,
    {
        self.connected.entry(uri.into()).or_default().push(Named {
            name: name.into(),
            callback: Box::new(callback),
        });
        self
    }

    /// Registers `callback` to run when database `db` is opened on a client connected to `uri`.
    pub fn on_opened<F>(
        &mut self,
        uri: impl Into<String>,
        db: impl Into<String>,
        name: impl Into<String>,
        callback: F,
    ) -> &mut Self
    where
        F: Fn(&Database<D>) -> MgoResult<()> + Send + Sync + 'static,
    {
        self.opened
            .entry((uri.into(), db.into()))
            .or_default()
            .push(Named {
                name: name.into(),
                callback: Box::new(callback),
            });
        self
    }

    pub(crate) fn run_connected(&self, uri: &str, client: &Client<D>) {
        let Some(callbacks) = self.connected.get(uri) else {
            return;
        };

        for named in callbacks {
            debug!(uri, callback = %named.name, "running on-connected callback");
            if let Err(err) = (named.callback)(client) {
                warn!(uri, callback = %named.name, error = %err, "on-connected callback failed");
            }
        }
    }

    pub(crate) fn run_opened(&self, uri: &str, database: &Database<D>) {
        let key = (uri.to_owned(), database.name().to_owned());
        let Some(callbacks) = self.opened.get(&key) else {
            return;
        };

        for named in callbacks {
            debug!(uri, db = database.name(), callback = %named.name, "running on-opened callback");
            if let Err(err) = (named.callback)(database) {
                warn!(
                    uri,
                    db = database.name(),
                    callback = %named.name,
                    error = %err,
                    "on-opened callback failed"
                );
            }
        }
    }
}
