//! Batched writes submitted in one round trip.

use bson::{Bson, Document};
use tracing::debug;

use crate::{
    collection::{Collection, id_filter},
    context::Context,
    driver::{Driver, WriteOperation},
    error::MgoResult,
    results::BulkResult,
};

/// A queue of heterogeneous write operations against one collection.
///
/// Operations run in the order they were queued. After a successful [`Bulk::run`] the queue
/// is empty and the batch can be reused. After a failed run the queue is left exactly as it
/// was, so the same batch can be submitted again.
///
/// # Examples
///
/// ```ignore
/// let mut bulk = users.bulk();
/// bulk.insert_one(doc! { "name": "Ann" })
///     .update_id(id, doc! { "$set": { "active": false } })
///     .remove_all(doc! { "expired": true });
/// let result = bulk.run().await?;
/// ```
#[derive(Debug)]
pub struct Bulk<'c, D> {
    collection: &'c Collection<D>,
    queue: Vec<WriteOperation>,
    ordered: Option<bool>,
}

impl<'c, D: Driver> Bulk<'c, D> {
    pub(crate) fn new(collection: &'c Collection<D>) -> Self {
        Self {
            collection,
            queue: Vec::new(),
            ordered: None,
        }
    }

    /// Chooses ordered (stop at first failure) or unordered execution.
    ///
    /// When never called, the driver's default applies, which is ordered.
    pub fn set_ordered(&mut self, ordered: bool) -> &mut Self {
        self.ordered = Some(ordered);
        self
    }

    pub fn insert_one(&mut self, document: Document) -> &mut Self {
        self.queue.push(WriteOperation::InsertOne { document });
        self
    }

    /// Queues deletion of the first document matching `filter`.
    pub fn remove(&mut self, filter: Document) -> &mut Self {
        self.queue.push(WriteOperation::DeleteOne { filter });
        self
    }

    pub fn remove_id(&mut self, id: impl Into<Bson>) -> &mut Self {
        self.remove(id_filter(id))
    }

    pub fn remove_all(&mut self, filter: Document) -> &mut Self {
        self.queue.push(WriteOperation::DeleteMany { filter });
        self
    }

    /// Queues a replace-with-upsert of the first document matching `filter`.
    pub fn upsert(&mut self, filter: Document, replacement: Document) -> &mut Self {
        self.queue
            .push(WriteOperation::ReplaceOneUpsert { filter, replacement });
        self
    }

    pub fn upsert_id(&mut self, id: impl Into<Bson>, replacement: Document) -> &mut Self {
        self.upsert(id_filter(id), replacement)
    }

    pub fn update_one(&mut self, filter: Document, update: Document) -> &mut Self {
        self.queue.push(WriteOperation::UpdateOne { filter, update });
        self
    }

    pub fn update_id(&mut self, id: impl Into<Bson>, update: Document) -> &mut Self {
        self.update_one(id_filter(id), update)
    }

    pub fn update_all(&mut self, filter: Document, update: Document) -> &mut Self {
        self.queue.push(WriteOperation::UpdateMany { filter, update });
        self
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// The queued operations, in submission order.
    pub fn operations(&self) -> &[WriteOperation] {
        &self.queue
    }

    pub async fn run(&mut self) -> MgoResult<BulkResult> {
        self.run_with_ctx(&Context::background()).await
    }

    /// Submits the whole queue in one round trip.
    ///
    /// # Errors
    ///
    /// Returns the driver's error, leaving the queue untouched. An empty queue is rejected by
    /// the driver.
    pub async fn run_with_ctx(&mut self, ctx: &Context) -> MgoResult<BulkResult> {
        let ns = self.collection.namespace();
        debug!(
            collection = %ns,
            operations = self.queue.len(),
            ordered = ?self.ordered,
            "bulk write"
        );

        let result = ctx
            .bound(self.collection.driver().bulk_write(
                ctx,
                ns,
                self.queue.clone(),
                self.ordered,
            ))
            .await?;

        self.queue.clear();
        Ok(result)
    }
}
