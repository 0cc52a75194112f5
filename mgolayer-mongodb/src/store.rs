//! MongoDB driver implementation.

use std::{future::IntoFuture, sync::Arc, time::Duration};

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use mongodb::{
    Client as MongoClient, Collection as MongoCollection,
    error::Result as MongoResult,
    options::{
        DeleteManyModel, DeleteOneModel, FindOneAndDeleteOptions, FindOneAndReplaceOptions,
        FindOneAndUpdateOptions, InsertOneModel, ReplaceOneModel, ReturnDocument,
        SessionOptions, UpdateManyModel, UpdateOneModel, WriteModel,
    },
};
use tracing::{debug, trace};

use mgolayer_core::{
    config::Config,
    context::Context,
    driver::{
        AggregateSettings, CountSettings, DeleteSettings, Driver, DriverBuilder, DriverCursor,
        DriverSession, FindAndModify, FindSettings, InsertSettings, Modification, Namespace,
        ReplaceSettings, SessionSettings, UpdateSettings, WriteOperation,
    },
    error::{MgoError, MgoResult},
    results::{BulkResult, DeleteResult, InsertManyResult, InsertOneResult, UpdateResult},
};

use crate::{
    error::convert_error,
    options::{
        aggregate_options, client_options, count_options, delete_options, find_one_options,
        find_options, insert_many_options, insert_one_options, replace_options, update_options,
    },
    session::{BufferedCursor, MongoCursor, MongoSession},
};

/// Runs a `mongodb` action, inside the context's session when it carries one.
macro_rules! run {
    ($driver:expr, $ctx:expr, $action:expr) => {
        match MongoDriver::session($ctx)? {
            Some(session) => {
                let mut guard = session.lock().await;
                $driver.timed($action.session(&mut *guard)).await
            }
            None => $driver.timed($action).await,
        }
    };
}

/// Driver backed by the official `mongodb` client.
///
/// Every call is bounded by the configured socket timeout in addition to the caller's
/// deadline.
#[derive(Debug, Clone)]
pub struct MongoDriver {
    client: MongoClient,
    socket_timeout: Duration,
}

impl MongoDriver {
    pub fn new(client: MongoClient, socket_timeout: Duration) -> Self {
        Self {
            client,
            socket_timeout,
        }
    }

    pub fn builder(config: Config) -> MongoDriverBuilder {
        MongoDriverBuilder::new(config)
    }

    /// The wrapped `mongodb` client.
    pub fn client(&self) -> &MongoClient {
        &self.client
    }

    fn collection(&self, ns: &Namespace) -> MongoCollection<Document> {
        self.client.database(&ns.db).collection(&ns.coll)
    }

    fn session(ctx: &Context) -> MgoResult<Option<&MongoSession>> {
        match ctx.session() {
            None => Ok(None),
            Some(session) => session
                .as_any()
                .downcast_ref::<MongoSession>()
                .map(Some)
                .ok_or_else(|| {
                    MgoError::Initialization("session was not started by this driver".to_string())
                }),
        }
    }

    async fn timed<F, T>(&self, action: F) -> MgoResult<T>
    where
        F: IntoFuture<Output = MongoResult<T>>,
    {
        match tokio::time::timeout(self.socket_timeout, action).await {
            Ok(result) => result.map_err(convert_error),
            Err(_) => Err(MgoError::Timeout),
        }
    }

    fn write_model(&self, ns: &Namespace, operation: WriteOperation) -> WriteModel {
        let namespace = self.collection(ns).namespace();
        match operation {
            WriteOperation::InsertOne { document } => WriteModel::InsertOne(
                InsertOneModel::builder()
                    .namespace(namespace)
                    .document(document)
                    .build(),
            ),
            WriteOperation::DeleteOne { filter } => WriteModel::DeleteOne(
                DeleteOneModel::builder()
                    .namespace(namespace)
                    .filter(filter)
                    .build(),
            ),
            WriteOperation::DeleteMany { filter } => WriteModel::DeleteMany(
                DeleteManyModel::builder()
                    .namespace(namespace)
                    .filter(filter)
                    .build(),
            ),
            WriteOperation::ReplaceOneUpsert {
                filter,
                replacement,
            } => WriteModel::ReplaceOne(
                ReplaceOneModel::builder()
                    .namespace(namespace)
                    .filter(filter)
                    .replacement(replacement)
                    .upsert(true)
                    .build(),
            ),
            WriteOperation::UpdateOne { filter, update } => WriteModel::UpdateOne(
                UpdateOneModel::builder()
                    .namespace(namespace)
                    .filter(filter)
                    .update(update)
                    .build(),
            ),
            WriteOperation::UpdateMany { filter, update } => WriteModel::UpdateMany(
                UpdateManyModel::builder()
                    .namespace(namespace)
                    .filter(filter)
                    .update(update)
                    .build(),
            ),
        }
    }
}

fn update_result(result: mongodb::results::UpdateResult) -> UpdateResult {
    UpdateResult {
        matched_count: result.matched_count,
        modified_count: result.modified_count,
        upserted_count: result.upserted_id.is_some() as u64,
        upserted_id: result.upserted_id,
    }
}

fn return_document(return_new: bool) -> ReturnDocument {
    if return_new {
        ReturnDocument::After
    } else {
        ReturnDocument::Before
    }
}

#[async_trait]
impl Driver for MongoDriver {
    async fn find(
        &self,
        ctx: &Context,
        ns: &Namespace,
        filter: Document,
        settings: FindSettings,
    ) -> MgoResult<Box<dyn DriverCursor>> {
        trace!(%ns, ?filter, "find");
        let collection = self.collection(ns);
        let action = collection
            .find(filter)
            .with_options(find_options(settings));

        match Self::session(ctx)? {
            Some(session) => {
                let mut guard = session.lock().await;
                let mut cursor = self.timed(action.session(&mut *guard).into_future()).await?;
                let mut documents = Vec::new();
                while let Some(document) = cursor.next(&mut guard).await {
                    documents.push(document.map_err(convert_error)?);
                }
                Ok(Box::new(BufferedCursor::new(documents)))
            }
            None => {
                let cursor = self.timed(action).await?;
                Ok(Box::new(MongoCursor::new(cursor)))
            }
        }
    }

    async fn find_one(
        &self,
        ctx: &Context,
        ns: &Namespace,
        filter: Document,
        settings: FindSettings,
    ) -> MgoResult<Option<Document>> {
        let collection = self.collection(ns);
        run!(
            self,
            ctx,
            collection
                .find_one(filter)
                .with_options(find_one_options(settings))
        )
    }

    async fn count_documents(
        &self,
        ctx: &Context,
        ns: &Namespace,
        filter: Document,
        settings: CountSettings,
    ) -> MgoResult<u64> {
        let collection = self.collection(ns);
        run!(
            self,
            ctx,
            collection
                .count_documents(filter)
                .with_options(count_options(settings))
        )
    }

    async fn distinct(
        &self,
        ctx: &Context,
        ns: &Namespace,
        key: &str,
        filter: Document,
    ) -> MgoResult<Vec<Bson>> {
        let collection = self.collection(ns);
        run!(self, ctx, collection.distinct(key, filter))
    }

    async fn insert_one(
        &self,
        ctx: &Context,
        ns: &Namespace,
        document: Document,
        settings: InsertSettings,
    ) -> MgoResult<InsertOneResult> {
        let collection = self.collection(ns);
        let result = run!(
            self,
            ctx,
            collection
                .insert_one(document)
                .with_options(insert_one_options(settings))
        )?;
        debug!(%ns, id = %result.inserted_id, "inserted");
        Ok(InsertOneResult {
            inserted_id: result.inserted_id,
        })
    }

    async fn insert_many(
        &self,
        ctx: &Context,
        ns: &Namespace,
        documents: Vec<Document>,
        settings: InsertSettings,
    ) -> MgoResult<InsertManyResult> {
        let collection = self.collection(ns);
        let result = run!(
            self,
            ctx,
            collection
                .insert_many(documents)
                .with_options(insert_many_options(settings))
        )?;

        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);
        Ok(InsertManyResult {
            inserted_ids: ids.into_iter().map(|(_, id)| id).collect(),
        })
    }

    async fn update(
        &self,
        ctx: &Context,
        ns: &Namespace,
        filter: Document,
        update: Document,
        multi: bool,
        settings: UpdateSettings,
    ) -> MgoResult<UpdateResult> {
        let collection = self.collection(ns);
        let options = update_options(settings);
        let result = if multi {
            run!(
                self,
                ctx,
                collection.update_many(filter, update).with_options(options)
            )?
        } else {
            run!(
                self,
                ctx,
                collection.update_one(filter, update).with_options(options)
            )?
        };
        Ok(update_result(result))
    }

    async fn replace_one(
        &self,
        ctx: &Context,
        ns: &Namespace,
        filter: Document,
        replacement: Document,
        settings: ReplaceSettings,
    ) -> MgoResult<UpdateResult> {
        let collection = self.collection(ns);
        let result = run!(
            self,
            ctx,
            collection
                .replace_one(filter, replacement)
                .with_options(replace_options(settings))
        )?;
        Ok(update_result(result))
    }

    async fn delete(
        &self,
        ctx: &Context,
        ns: &Namespace,
        filter: Document,
        multi: bool,
        settings: DeleteSettings,
    ) -> MgoResult<DeleteResult> {
        let collection = self.collection(ns);
        let options = delete_options(settings);
        let result = if multi {
            run!(self, ctx, collection.delete_many(filter).with_options(options))?
        } else {
            run!(self, ctx, collection.delete_one(filter).with_options(options))?
        };
        Ok(DeleteResult {
            deleted_count: result.deleted_count,
        })
    }

    async fn find_one_and_modify(
        &self,
        ctx: &Context,
        ns: &Namespace,
        filter: Document,
        request: FindAndModify,
    ) -> MgoResult<Option<Document>> {
        let collection = self.collection(ns);

        match request.modification {
            Modification::Delete => {
                let mut options = FindOneAndDeleteOptions::default();
                options.sort = request.sort;
                options.projection = request.projection;
                run!(
                    self,
                    ctx,
                    collection.find_one_and_delete(filter).with_options(options)
                )
            }
            Modification::Replace(replacement) => {
                let mut options = FindOneAndReplaceOptions::default();
                options.sort = request.sort;
                options.projection = request.projection;
                options.upsert = Some(request.upsert);
                options.return_document = Some(return_document(request.return_new));
                run!(
                    self,
                    ctx,
                    collection
                        .find_one_and_replace(filter, replacement)
                        .with_options(options)
                )
            }
            Modification::Update(update) => {
                let mut options = FindOneAndUpdateOptions::default();
                options.sort = request.sort;
                options.projection = request.projection;
                options.upsert = Some(request.upsert);
                options.return_document = Some(return_document(request.return_new));
                run!(
                    self,
                    ctx,
                    collection
                        .find_one_and_update(filter, update)
                        .with_options(options)
                )
            }
        }
    }

    async fn bulk_write(
        &self,
        ctx: &Context,
        ns: &Namespace,
        operations: Vec<WriteOperation>,
        ordered: Option<bool>,
    ) -> MgoResult<BulkResult> {
        let models: Vec<WriteModel> = operations
            .into_iter()
            .map(|operation| self.write_model(ns, operation))
            .collect();
        debug!(%ns, operations = models.len(), ?ordered, "bulk write");

        let result = run!(
            self,
            ctx,
            self.client
                .bulk_write(models)
                .ordered(ordered.unwrap_or(true))
                .verbose_results()
        )?;

        let summary = result.summary;
        Ok(BulkResult {
            inserted_count: summary.inserted_count as u64,
            matched_count: summary.matched_count as u64,
            modified_count: summary.modified_count as u64,
            deleted_count: summary.deleted_count as u64,
            upserted_count: summary.upserted_count as u64,
            upserted_ids: result
                .update_results
                .into_iter()
                .filter_map(|(index, update)| update.upserted_id.map(|id| (index, id)))
                .collect(),
        })
    }

    async fn aggregate(
        &self,
        ctx: &Context,
        ns: &Namespace,
        pipeline: Vec<Document>,
        settings: AggregateSettings,
    ) -> MgoResult<Box<dyn DriverCursor>> {
        let collection = self.collection(ns);
        let action = collection
            .aggregate(pipeline)
            .with_options(aggregate_options(settings));

        match Self::session(ctx)? {
            Some(session) => {
                let mut guard = session.lock().await;
                let mut cursor = self.timed(action.session(&mut *guard).into_future()).await?;
                let mut documents = Vec::new();
                while let Some(document) = cursor.next(&mut guard).await {
                    documents.push(document.map_err(convert_error)?);
                }
                Ok(Box::new(BufferedCursor::new(documents)))
            }
            None => {
                let cursor = self.timed(action).await?;
                Ok(Box::new(MongoCursor::new(cursor)))
            }
        }
    }

    async fn run_command(&self, ctx: &Context, db: &str, command: Document) -> MgoResult<Document> {
        let database = self.client.database(db);
        run!(self, ctx, database.run_command(command))
    }

    async fn drop_collection(&self, ctx: &Context, ns: &Namespace) -> MgoResult<()> {
        let collection = self.collection(ns);
        run!(self, ctx, collection.drop())
    }

    async fn drop_database(&self, ctx: &Context, db: &str) -> MgoResult<()> {
        let database = self.client.database(db);
        run!(self, ctx, database.drop())
    }

    async fn ping(&self, ctx: &Context) -> MgoResult<()> {
        self.run_command(ctx, "admin", doc! { "ping": 1 }).await?;
        Ok(())
    }

    async fn start_session(
        &self,
        _ctx: &Context,
        settings: SessionSettings,
    ) -> MgoResult<Arc<dyn DriverSession>> {
        let mut options = SessionOptions::default();
        options.causal_consistency = settings.causal_consistency;

        let session = self
            .timed(self.client.start_session().with_options(options))
            .await?;
        Ok(Arc::new(MongoSession::new(session)))
    }

    async fn shutdown(&self) -> MgoResult<()> {
        self.client.clone().shutdown().await;
        Ok(())
    }
}

/// Builder for creating [`MongoDriver`] instances from a [`Config`].
#[derive(Debug, Clone)]
pub struct MongoDriverBuilder {
    config: Config,
}

impl MongoDriverBuilder {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DriverBuilder for MongoDriverBuilder {
    type Driver = MongoDriver;

    async fn build(self) -> MgoResult<MongoDriver> {
        let options = client_options(&self.config).await?;
        let client =
            MongoClient::with_options(options).map_err(|e| MgoError::Initialization(e.to_string()))?;
        debug!(uri = %self.config.uri, "mongodb client created");

        Ok(MongoDriver::new(client, self.config.socket_timeout()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Building a client does not contact the server.
    async fn driver() -> MongoDriver {
        MongoDriverBuilder::new(Config::new("mongodb://localhost:27017"))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn bulk_upserts_become_upserting_replace_models() {
        let driver = driver().await;
        let ns = Namespace::new("app", "users");

        let model = driver.write_model(
            &ns,
            WriteOperation::ReplaceOneUpsert {
                filter: doc! { "_id": 1 },
                replacement: doc! { "name": "Ann" },
            },
        );

        let WriteModel::ReplaceOne(replace) = model else {
            panic!("expected a replace model");
        };
        assert_eq!(replace.namespace.db, "app");
        assert_eq!(replace.namespace.coll, "users");
        assert_eq!(replace.upsert, Some(true));
        assert_eq!(replace.replacement, doc! { "name": "Ann" });
    }

    #[tokio::test]
    async fn contexts_without_session_run_standalone() {
        let driver = driver().await;
        assert!(MongoDriver::session(&Context::background()).unwrap().is_none());
        assert_eq!(driver.socket_timeout, Config::new("").socket_timeout());
    }

    #[test]
    fn return_document_follows_return_new() {
        assert!(matches!(return_document(true), ReturnDocument::After));
        assert!(matches!(return_document(false), ReturnDocument::Before));
    }
}
