use std::sync::Arc;

use bson::Document;
use tracing::debug;

use crate::{
    collection::Collection,
    context::Context,
    driver::{Driver, Namespace},
    error::MgoResult,
    model::Model,
};

/// A handle to one database.
#[derive(Debug)]
pub struct Database<D> {
    driver: Arc<D>,
    name: String,
}

impl<D> Clone for Database<D> {
    fn clone(&self) -> Self {
        Self {
            driver: self.driver.clone(),
            name: self.name.clone(),
        }
    }
}

impl<D> Database<D> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<D: Driver> Database<D> {
    pub(crate) fn new(driver: Arc<D>, name: impl Into<String>) -> Self {
        Self {
            driver,
            name: name.into(),
        }
    }

    pub fn collection(&self, name: impl Into<String>) -> Collection<D> {
        Collection::new(self.driver.clone(), Namespace::new(self.name.clone(), name))
    }

    /// The collection `M` is stored in.
    pub fn model_collection<M: Model>(&self) -> Collection<D> {
        self.collection(M::collection_name())
    }

    pub async fn drop(&self, ctx: &Context) -> MgoResult<()> {
        debug!(db = %self.name, "drop database");
        ctx.bound(self.driver.drop_database(ctx, &self.name)).await
    }

    /// Runs a database command and returns the server's reply.
    pub async fn run_command(&self, ctx: &Context, command: Document) -> MgoResult<Document> {
        debug!(db = %self.name, "run command");
        ctx.bound(self.driver.run_command(ctx, &self.name, command))
            .await
    }
}
