//! Collection-level CRUD operations.
//!
//! Every write follows the same shape: resolve the caller's options, run the Before hooks,
//! make the driver call, run the After hooks. A Before hook failure skips the driver call.
//! An After hook failure is returned to the caller, but the write it follows has already
//! been applied and is not undone.

use std::sync::Arc;

use bson::{Bson, Document, doc, ser::serialize_to_document};
use serde::Serialize;
use tracing::debug;

use crate::{
    aggregate::Aggregate,
    bulk::Bulk,
    context::Context,
    driver::{Driver, Namespace},
    error::{MgoError, MgoResult},
    hooks::{HookPhase, Hooks},
    options::{
        AggregateOptions, FindOptions, InsertManyOptions, InsertOneOptions, RemoveOptions,
        ReplaceOptions, UpdateOptions, UpsertOptions, resolve, resolve_upsert,
    },
    query::Query,
    results::{DeleteResult, InsertManyResult, InsertOneResult, UpdateResult},
};

/// Builds the identifier filter `{ "_id": id }`.
pub fn id_filter(id: impl Into<Bson>) -> Document {
    doc! { "_id": id.into() }
}

fn to_document<T: Serialize>(value: &T) -> MgoResult<Document> {
    Ok(serialize_to_document(value)?)
}

/// A handle to one collection.
#[derive(Debug)]
pub struct Collection<D> {
    driver: Arc<D>,
    namespace: Namespace,
}

impl<D> Clone for Collection<D> {
    fn clone(&self) -> Self {
        Self {
            driver: self.driver.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

impl<D: Driver> Collection<D> {
    pub(crate) fn new(driver: Arc<D>, namespace: Namespace) -> Self {
        Self { driver, namespace }
    }

    pub fn name(&self) -> &str {
        &self.namespace.coll
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    /// Starts a query over the documents matching `filter`.
    ///
    /// Query hooks run only when `options` supplies a `query_hook`.
    pub fn find<'c, 'h>(
        &'c self,
        ctx: &Context,
        filter: Document,
        options: Option<FindOptions<'h>>,
    ) -> Query<'c, 'h, D> {
        let hook = options.and_then(|options| options.query_hook);
        Query::new(self, ctx.clone(), filter, hook)
    }

    /// Inserts one document.
    ///
    /// Before/AfterInsert run on `options.insert_hook` when given, otherwise on `document`.
    /// The document is serialized after BeforeInsert, so changes made by the hook are stored.
    pub async fn insert_one<T>(
        &self,
        ctx: &Context,
        document: &mut T,
        options: Option<InsertOneOptions<'_>>,
    ) -> MgoResult<InsertOneResult>
    where
        T: Serialize + Hooks,
    {
        let mut options = resolve(options);
        options.dispatch_with(ctx, document, HookPhase::BeforeInsert)?;

        let encoded = to_document(document)?;
        debug!(collection = %self.namespace, operation = "insertOne", "dispatching");
        let result = ctx
            .bound(
                self.driver
                    .insert_one(ctx, &self.namespace, encoded, options.settings.clone()),
            )
            .await?;

        options.dispatch_with(ctx, document, HookPhase::AfterInsert)?;
        Ok(result)
    }

    /// Inserts several documents.
    ///
    /// BeforeInsert runs on every element (or on the alternate payload) before the input is
    /// checked for emptiness.
    ///
    /// # Errors
    ///
    /// Returns [`MgoError::NotValidSliceToInsert`] if `documents` is empty.
    pub async fn insert_many<T>(
        &self,
        ctx: &Context,
        documents: &mut Vec<T>,
        options: Option<InsertManyOptions<'_>>,
    ) -> MgoResult<InsertManyResult>
    where
        T: Serialize + Hooks,
    {
        let mut options = resolve(options);
        options.dispatch_with(ctx, documents, HookPhase::BeforeInsert)?;

        if documents.is_empty() {
            return Err(MgoError::NotValidSliceToInsert);
        }

        let encoded = documents
            .iter()
            .map(to_document)
            .collect::<MgoResult<Vec<_>>>()?;
        debug!(
            collection = %self.namespace,
            operation = "insertMany",
            count = encoded.len(),
            "dispatching"
        );
        let result = ctx
            .bound(
                self.driver
                    .insert_many(ctx, &self.namespace, encoded, options.settings.clone()),
            )
            .await?;

        options.dispatch_with(ctx, documents, HookPhase::AfterInsert)?;
        Ok(result)
    }

    /// Deletes the first document matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`MgoError::NoSuchDocuments`] if nothing was deleted.
    pub async fn remove(
        &self,
        ctx: &Context,
        filter: Document,
        options: Option<RemoveOptions<'_>>,
    ) -> MgoResult<()> {
        let mut options = resolve(options);
        options.dispatch(ctx, HookPhase::BeforeRemove)?;

        debug!(collection = %self.namespace, operation = "deleteOne", "dispatching");
        let result = ctx
            .bound(self.driver.delete(
                ctx,
                &self.namespace,
                filter,
                false,
                options.settings.clone(),
            ))
            .await?;
        if result.deleted_count == 0 {
            return Err(MgoError::NoSuchDocuments);
        }

        options.dispatch(ctx, HookPhase::AfterRemove)
    }

    /// Deletes the document with the given identifier.
    ///
    /// # Errors
    ///
    /// Returns [`MgoError::NoSuchDocuments`] if nothing was deleted.
    pub async fn remove_by_id(
        &self,
        ctx: &Context,
        id: impl Into<Bson>,
        options: Option<RemoveOptions<'_>>,
    ) -> MgoResult<()> {
        self.remove(ctx, id_filter(id), options).await
    }

    /// Deletes every document matching `filter`. Deleting nothing is not an error.
    pub async fn remove_all(
        &self,
        ctx: &Context,
        filter: Document,
        options: Option<RemoveOptions<'_>>,
    ) -> MgoResult<DeleteResult> {
        let mut options = resolve(options);
        options.dispatch(ctx, HookPhase::BeforeRemove)?;

        debug!(collection = %self.namespace, operation = "deleteMany", "dispatching");
        let result = ctx
            .bound(self.driver.delete(
                ctx,
                &self.namespace,
                filter,
                true,
                options.settings.clone(),
            ))
            .await?;

        options.dispatch(ctx, HookPhase::AfterRemove)?;
        Ok(result)
    }

    /// Applies `update` to the first document matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`MgoError::NoSuchDocuments`] if nothing matched, unless upsert was requested
    /// in `options`.
    pub async fn update_one(
        &self,
        ctx: &Context,
        filter: Document,
        update: Document,
        options: Option<UpdateOptions<'_>>,
    ) -> MgoResult<UpdateResult> {
        let mut options = resolve(options);
        options.dispatch(ctx, HookPhase::BeforeUpdate)?;

        debug!(collection = %self.namespace, operation = "updateOne", "dispatching");
        let result = ctx
            .bound(self.driver.update(
                ctx,
                &self.namespace,
                filter,
                update,
                false,
                options.settings.clone(),
            ))
            .await?;
        if result.matched_count == 0 && options.settings.upsert != Some(true) {
            return Err(MgoError::NoSuchDocuments);
        }

        options.dispatch(ctx, HookPhase::AfterUpdate)?;
        Ok(result)
    }

    /// Applies `update` to the document with the given identifier.
    ///
    /// # Errors
    ///
    /// Returns [`MgoError::NoSuchDocuments`] if nothing matched, even when upsert was
    /// requested and a document was inserted.
    pub async fn update_by_id(
        &self,
        ctx: &Context,
        id: impl Into<Bson>,
        update: Document,
        options: Option<UpdateOptions<'_>>,
    ) -> MgoResult<()> {
        let mut options = resolve(options);
        options.dispatch(ctx, HookPhase::BeforeUpdate)?;

        debug!(collection = %self.namespace, operation = "updateOne", "dispatching");
        let result = ctx
            .bound(self.driver.update(
                ctx,
                &self.namespace,
                id_filter(id),
                update,
                false,
                options.settings.clone(),
            ))
            .await?;
        if result.matched_count == 0 {
            return Err(MgoError::NoSuchDocuments);
        }

        options.dispatch(ctx, HookPhase::AfterUpdate)
    }

    /// Applies `update` to every document matching `filter`. Matching nothing is not an error.
    pub async fn update_all(
        &self,
        ctx: &Context,
        filter: Document,
        update: Document,
        options: Option<UpdateOptions<'_>>,
    ) -> MgoResult<UpdateResult> {
        let mut options = resolve(options);
        options.dispatch(ctx, HookPhase::BeforeUpdate)?;

        debug!(collection = %self.namespace, operation = "updateMany", "dispatching");
        let result = ctx
            .bound(self.driver.update(
                ctx,
                &self.namespace,
                filter,
                update,
                true,
                options.settings.clone(),
            ))
            .await?;

        options.dispatch(ctx, HookPhase::AfterUpdate)?;
        Ok(result)
    }

    /// Replaces the first document matching `filter`, inserting `replacement` if none does.
    ///
    /// Before/AfterUpsert run on `options.upsert_hook` when given, otherwise on `replacement`.
    pub async fn upsert<T>(
        &self,
        ctx: &Context,
        filter: Document,
        replacement: &mut T,
        options: Option<UpsertOptions<'_>>,
    ) -> MgoResult<UpdateResult>
    where
        T: Serialize + Hooks,
    {
        let mut options = resolve_upsert(options);
        options.dispatch_with(ctx, replacement, HookPhase::BeforeUpsert)?;

        let encoded = to_document(replacement)?;
        debug!(collection = %self.namespace, operation = "replaceOne", upsert = true, "dispatching");
        let result = ctx
            .bound(self.driver.replace_one(
                ctx,
                &self.namespace,
                filter,
                encoded,
                options.settings.clone(),
            ))
            .await?;

        options.dispatch_with(ctx, replacement, HookPhase::AfterUpsert)?;
        Ok(result)
    }

    pub async fn upsert_by_id<T>(
        &self,
        ctx: &Context,
        id: impl Into<Bson>,
        replacement: &mut T,
        options: Option<UpsertOptions<'_>>,
    ) -> MgoResult<UpdateResult>
    where
        T: Serialize + Hooks,
    {
        self.upsert(ctx, id_filter(id), replacement, options).await
    }

    /// Replaces the first document matching `filter`.
    ///
    /// Before/AfterReplace run on `options.update_hook` when given, otherwise on `document`.
    /// These phases invoke the update capabilities.
    ///
    /// # Errors
    ///
    /// Returns [`MgoError::NoSuchDocuments`] if nothing matched.
    pub async fn replace_one<T>(
        &self,
        ctx: &Context,
        filter: Document,
        document: &mut T,
        options: Option<ReplaceOptions<'_>>,
    ) -> MgoResult<UpdateResult>
    where
        T: Serialize + Hooks,
    {
        let mut options = resolve(options);
        options.dispatch_with(ctx, document, HookPhase::BeforeReplace)?;

        let encoded = to_document(document)?;
        debug!(collection = %self.namespace, operation = "replaceOne", "dispatching");
        let result = ctx
            .bound(self.driver.replace_one(
                ctx,
                &self.namespace,
                filter,
                encoded,
                options.settings.clone(),
            ))
            .await?;
        if result.matched_count == 0 {
            return Err(MgoError::NoSuchDocuments);
        }

        options.dispatch_with(ctx, document, HookPhase::AfterReplace)?;
        Ok(result)
    }

    /// Prepares an aggregation pipeline. Nothing is sent until a terminal method is called.
    pub fn aggregate(
        &self,
        ctx: &Context,
        pipeline: Vec<Document>,
        options: Option<AggregateOptions>,
    ) -> Aggregate<'_, D> {
        let settings = resolve(options).settings;
        Aggregate::new(self, ctx.clone(), pipeline, settings)
    }

    pub fn bulk(&self) -> Bulk<'_, D> {
        Bulk::new(self)
    }

    pub async fn drop(&self, ctx: &Context) -> MgoResult<()> {
        debug!(collection = %self.namespace, operation = "drop", "dispatching");
        ctx.bound(self.driver.drop_collection(ctx, &self.namespace))
            .await
    }
}
