//! In-memory driver implementation.
//!
//! Documents live in per-namespace vectors behind an async-aware read-write lock, in
//! insertion order. Every query is a full scan.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use mea::rwlock::RwLock;
use tracing::{debug, trace};

use mgolayer_core::{
    context::Context,
    driver::{
        AggregateSettings, CountSettings, DeleteSettings, Driver, DriverBuilder, DriverCursor,
        DriverSession, FindAndModify, FindSettings, InsertSettings, Modification, Namespace,
        ReplaceSettings, SessionSettings, UpdateSettings, WriteOperation,
    },
    error::{DriverError, MgoError, MgoResult},
    results::{BulkResult, DeleteResult, InsertManyResult, InsertOneResult, UpdateResult},
};

use crate::{
    evaluator::{BAD_VALUE, FilterEvaluator, lookup, project, sort_documents},
    session::{MemoryCursor, MemorySession},
    update::{IMMUTABLE_FIELD, apply_update, upsert_seed, validate_replacement, with_id},
};

pub(crate) type StoreMap = HashMap<Namespace, Vec<Document>>;

/// Version reported by `buildInfo` unless configured otherwise.
pub const DEFAULT_SERVER_VERSION: &str = "7.0.0";

/// Server error code for unique index violations.
pub const DUPLICATE_KEY: i32 = 11000;

const COMMAND_NOT_FOUND: i32 = 59;
const UNRECOGNIZED_STAGE: i32 = 40324;

fn duplicate_key(ns: &Namespace, id: &Bson) -> MgoError {
    DriverError::new(format!(
        "E11000 duplicate key error collection: {ns} index: _id_ dup key: {{ _id: {id} }}"
    ))
    .with_code(DUPLICATE_KEY)
    .into()
}

fn matching_indexes(documents: &[Document], filter: &Document) -> MgoResult<Vec<usize>> {
    let mut indexes = Vec::new();
    for (index, document) in documents.iter().enumerate() {
        if FilterEvaluator::new(document).matches(filter)? {
            indexes.push(index);
        }
    }
    Ok(indexes)
}

fn matching(documents: &[Document], filter: &Document) -> MgoResult<Vec<Document>> {
    Ok(matching_indexes(documents, filter)?
        .into_iter()
        .map(|index| documents[index].clone())
        .collect())
}

/// Index of the first match under `sort`, or in natural order without one.
fn first_match(
    documents: &[Document],
    filter: &Document,
    sort: Option<&Document>,
) -> MgoResult<Option<usize>> {
    let mut indexes = matching_indexes(documents, filter)?;
    if let Some(sort) = sort {
        let mut keyed: Vec<Document> = indexes
            .iter()
            .map(|&index| {
                let mut keyed = documents[index].clone();
                keyed.insert("__position", index as i64);
                keyed
            })
            .collect();
        sort_documents(&mut keyed, sort);
        indexes = keyed
            .iter()
            .filter_map(|doc| doc.get_i64("__position").ok())
            .map(|index| index as usize)
            .collect();
    }
    Ok(indexes.first().copied())
}

fn page(mut documents: Vec<Document>, skip: Option<u64>, limit: Option<u64>) -> Vec<Document> {
    let skip = skip.unwrap_or(0) as usize;
    documents.drain(..skip.min(documents.len()));
    if let Some(limit) = limit.filter(|limit| *limit > 0) {
        documents.truncate(limit as usize);
    }
    documents
}

/// Write primitives over one collection's documents, shared by single writes and bulk batches.
struct Writer<'s> {
    ns: &'s Namespace,
    documents: &'s mut Vec<Document>,
}

impl<'s> Writer<'s> {
    fn insert(&mut self, document: Document) -> MgoResult<Bson> {
        let document = with_id(document);
        let id = document.get("_id").cloned().unwrap_or(Bson::Null);
        if self
            .documents
            .iter()
            .any(|existing| existing.get("_id") == Some(&id))
        {
            return Err(duplicate_key(self.ns, &id));
        }
        self.documents.push(document);
        Ok(id)
    }

    fn update(
        &mut self,
        filter: &Document,
        update: &Document,
        multi: bool,
        upsert: bool,
    ) -> MgoResult<UpdateResult> {
        let mut indexes = matching_indexes(self.documents, filter)?;
        if !multi {
            indexes.truncate(1);
        }

        if indexes.is_empty() {
            if !upsert {
                return Ok(UpdateResult::default());
            }
            let mut seed = upsert_seed(filter)?;
            apply_update(&mut seed, update, true)?;
            let id = self.insert(seed)?;
            return Ok(UpdateResult {
                upserted_count: 1,
                upserted_id: Some(id),
                ..Default::default()
            });
        }

        let mut result = UpdateResult {
            matched_count: indexes.len() as u64,
            ..Default::default()
        };
        for index in indexes {
            if apply_update(&mut self.documents[index], update, false)? {
                result.modified_count += 1;
            }
        }
        Ok(result)
    }

    fn replace(
        &mut self,
        filter: &Document,
        replacement: &Document,
        upsert: bool,
    ) -> MgoResult<UpdateResult> {
        validate_replacement(replacement)?;

        let Some(index) = first_match(self.documents, filter, None)? else {
            if !upsert {
                return Ok(UpdateResult::default());
            }
            let mut document = upsert_seed(filter)?
                .get("_id")
                .map(|id| doc! { "_id": id.clone() })
                .unwrap_or_default();
            document.extend(replacement.clone());
            let id = self.insert(document)?;
            return Ok(UpdateResult {
                upserted_count: 1,
                upserted_id: Some(id),
                ..Default::default()
            });
        };

        let existing = &self.documents[index];
        let id = existing.get("_id").cloned().unwrap_or(Bson::Null);
        if let Some(new_id) = replacement.get("_id")
            && *new_id != id
        {
            return Err(DriverError::new(
                "the _id field cannot be changed by a replacement",
            )
            .with_code(IMMUTABLE_FIELD)
            .into());
        }

        let mut replaced = doc! { "_id": id };
        replaced.extend(replacement.clone());
        let modified = replaced != *existing;
        self.documents[index] = with_id(replaced);

        Ok(UpdateResult {
            matched_count: 1,
            modified_count: modified as u64,
            ..Default::default()
        })
    }

    fn delete(&mut self, filter: &Document, multi: bool) -> MgoResult<u64> {
        let mut indexes = matching_indexes(self.documents, filter)?;
        if !multi {
            indexes.truncate(1);
        }
        for index in indexes.iter().rev() {
            self.documents.remove(*index);
        }
        Ok(indexes.len() as u64)
    }

    fn apply(&mut self, operation: &WriteOperation, index: usize, result: &mut BulkResult) -> MgoResult<()> {
        match operation {
            WriteOperation::InsertOne { document } => {
                self.insert(document.clone())?;
                result.inserted_count += 1;
            }
            WriteOperation::DeleteOne { filter } => {
                result.deleted_count += self.delete(filter, false)?;
            }
            WriteOperation::DeleteMany { filter } => {
                result.deleted_count += self.delete(filter, true)?;
            }
            WriteOperation::ReplaceOneUpsert {
                filter,
                replacement,
            } => {
                let outcome = self.replace(filter, replacement, true)?;
                result.absorb(index, outcome);
            }
            WriteOperation::UpdateOne { filter, update } => {
                let outcome = self.update(filter, update, false, false)?;
                result.absorb(index, outcome);
            }
            WriteOperation::UpdateMany { filter, update } => {
                let outcome = self.update(filter, update, true, false)?;
                result.absorb(index, outcome);
            }
        }
        Ok(())
    }
}

trait Absorb {
    fn absorb(&mut self, index: usize, outcome: UpdateResult);
}

impl Absorb for BulkResult {
    fn absorb(&mut self, index: usize, outcome: UpdateResult) {
        self.matched_count += outcome.matched_count;
        self.modified_count += outcome.modified_count;
        self.upserted_count += outcome.upserted_count;
        if let Some(id) = outcome.upserted_id {
            self.upserted_ids.insert(index, id);
        }
    }
}

/// Thread-safe in-memory driver.
///
/// Implements the [`Driver`] trait entirely in memory. It understands the filter operators
/// listed in the [`evaluator`](crate::evaluator) module, the update operators listed in the
/// [`update`](crate::update) module, and aggregation pipelines made of `$match`, `$sort`,
/// `$skip`, `$limit`, `$project` and `$count` stages.
///
/// # Thread Safety
///
/// `InMemoryDriver` is cloneable and every clone shares the same data.
///
/// # Example
///
/// ```ignore
/// use mgolayer_memory::InMemoryDriver;
///
/// let driver = InMemoryDriver::builder().server_version("4.4.6").build().await?;
/// let client = Client::connect(driver, Config::new("mem://local"), Default::default()).await?;
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryDriver {
    store: Arc<RwLock<StoreMap>>,
    server_version: Option<String>,
}

impl Default for InMemoryDriver {
    fn default() -> Self {
        Self {
            store: Arc::default(),
            server_version: Some(DEFAULT_SERVER_VERSION.to_string()),
        }
    }
}

impl InMemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> InMemoryDriverBuilder {
        InMemoryDriverBuilder::default()
    }

    /// Number of documents currently stored in `ns`.
    pub async fn len(&self, ns: &Namespace) -> usize {
        self.store.read().await.get(ns).map_or(0, Vec::len)
    }

    /// Returns `true` when no namespace holds any document.
    pub async fn is_empty(&self) -> bool {
        self.store.read().await.values().all(Vec::is_empty)
    }

    async fn write<R>(
        &self,
        ns: &Namespace,
        f: impl FnOnce(&mut Writer<'_>) -> MgoResult<R>,
    ) -> MgoResult<R> {
        let mut store = self.store.write().await;
        let documents = store.entry(ns.clone()).or_default();
        f(&mut Writer { ns, documents })
    }

    async fn read<R>(&self, ns: &Namespace, f: impl FnOnce(&[Document]) -> MgoResult<R>) -> MgoResult<R> {
        let store = self.store.read().await;
        f(store.get(ns).map(Vec::as_slice).unwrap_or_default())
    }

    fn select(documents: &[Document], filter: &Document, settings: &FindSettings) -> MgoResult<Vec<Document>> {
        let mut selected = matching(documents, filter)?;
        if let Some(sort) = &settings.sort {
            sort_documents(&mut selected, sort);
        }
        let selected = page(selected, settings.skip, settings.limit.map(i64::unsigned_abs));
        Ok(match &settings.projection {
            Some(projection) => selected.iter().map(|doc| project(doc, projection)).collect(),
            None => selected,
        })
    }

    fn run_pipeline(mut documents: Vec<Document>, pipeline: &[Document]) -> MgoResult<Vec<Document>> {
        for stage in pipeline {
            let Some((name, spec)) = stage.iter().next() else {
                return Err(DriverError::new("a pipeline stage must not be empty")
                    .with_code(BAD_VALUE)
                    .into());
            };

            let as_document = |spec: &Bson| -> MgoResult<Document> {
                match spec {
                    Bson::Document(doc) => Ok(doc.clone()),
                    _ => Err(DriverError::new(format!("the {name} stage takes an object"))
                        .with_code(BAD_VALUE)
                        .into()),
                }
            };
            let as_count = |spec: &Bson| -> MgoResult<u64> {
                match spec {
                    Bson::Int32(n) if *n >= 0 => Ok(*n as u64),
                    Bson::Int64(n) if *n >= 0 => Ok(*n as u64),
                    _ => Err(DriverError::new(format!("the {name} stage takes a non-negative integer"))
                        .with_code(BAD_VALUE)
                        .into()),
                }
            };

            documents = match name.as_str() {
                "$match" => matching(&documents, &as_document(spec)?)?,
                "$sort" => {
                    sort_documents(&mut documents, &as_document(spec)?);
                    documents
                }
                "$skip" => page(documents, Some(as_count(spec)?), None),
                "$limit" => page(documents, None, Some(as_count(spec)?)),
                "$project" => {
                    let projection = as_document(spec)?;
                    documents.iter().map(|doc| project(doc, &projection)).collect()
                }
                "$count" => match spec {
                    Bson::String(field) => {
                        let mut counted = Document::new();
                        counted.insert(field.clone(), documents.len() as i32);
                        vec![counted]
                    }
                    _ => {
                        return Err(DriverError::new("the $count stage takes a field name")
                            .with_code(BAD_VALUE)
                            .into());
                    }
                },
                other => {
                    return Err(DriverError::new(format!(
                        "unrecognized pipeline stage name: '{other}'"
                    ))
                    .with_code(UNRECOGNIZED_STAGE)
                    .into());
                }
            };
        }

        Ok(documents)
    }
}

#[async_trait]
impl Driver for InMemoryDriver {
    async fn find(
        &self,
        _ctx: &Context,
        ns: &Namespace,
        filter: Document,
        settings: FindSettings,
    ) -> MgoResult<Box<dyn DriverCursor>> {
        trace!(%ns, ?filter, "find");
        let documents = self
            .read(ns, |documents| Self::select(documents, &filter, &settings))
            .await?;
        Ok(Box::new(MemoryCursor::new(documents)))
    }

    async fn find_one(
        &self,
        _ctx: &Context,
        ns: &Namespace,
        filter: Document,
        settings: FindSettings,
    ) -> MgoResult<Option<Document>> {
        let settings = FindSettings {
            limit: Some(1),
            ..settings
        };
        let documents = self
            .read(ns, |documents| Self::select(documents, &filter, &settings))
            .await?;
        Ok(documents.into_iter().next())
    }

    async fn count_documents(
        &self,
        _ctx: &Context,
        ns: &Namespace,
        filter: Document,
        settings: CountSettings,
    ) -> MgoResult<u64> {
        self.read(ns, |documents| {
            let selected = page(matching(documents, &filter)?, settings.skip, settings.limit);
            Ok(selected.len() as u64)
        })
        .await
    }

    async fn distinct(
        &self,
        _ctx: &Context,
        ns: &Namespace,
        key: &str,
        filter: Document,
    ) -> MgoResult<Vec<Bson>> {
        self.read(ns, |documents| {
            let mut values: Vec<Bson> = Vec::new();
            for document in matching(documents, &filter)? {
                let found = match lookup(&document, key) {
                    Some(Bson::Array(items)) => items.clone(),
                    Some(value) => vec![value.clone()],
                    None => continue,
                };
                for value in found {
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
            }
            Ok(values)
        })
        .await
    }

    async fn insert_one(
        &self,
        _ctx: &Context,
        ns: &Namespace,
        document: Document,
        _settings: InsertSettings,
    ) -> MgoResult<InsertOneResult> {
        let inserted_id = self.write(ns, |writer| writer.insert(document)).await?;
        debug!(%ns, id = %inserted_id, "inserted");
        Ok(InsertOneResult { inserted_id })
    }

    async fn insert_many(
        &self,
        _ctx: &Context,
        ns: &Namespace,
        documents: Vec<Document>,
        settings: InsertSettings,
    ) -> MgoResult<InsertManyResult> {
        if documents.is_empty() {
            return Err(DriverError::new("must provide at least one document")
                .with_code(BAD_VALUE)
                .into());
        }
        let ordered = settings.ordered.unwrap_or(true);

        self.write(ns, |writer| {
            let mut inserted_ids = Vec::with_capacity(documents.len());
            let mut first_error = None;
            for document in documents {
                match writer.insert(document) {
                    Ok(id) => inserted_ids.push(id),
                    Err(err) if ordered => return Err(err),
                    Err(err) => {
                        first_error.get_or_insert(err);
                    }
                }
            }
            match first_error {
                Some(err) => Err(err),
                None => Ok(InsertManyResult { inserted_ids }),
            }
        })
        .await
    }

    async fn update(
        &self,
        _ctx: &Context,
        ns: &Namespace,
        filter: Document,
        update: Document,
        multi: bool,
        settings: UpdateSettings,
    ) -> MgoResult<UpdateResult> {
        let upsert = settings.upsert.unwrap_or(false);
        self.write(ns, |writer| writer.update(&filter, &update, multi, upsert))
            .await
    }

    async fn replace_one(
        &self,
        _ctx: &Context,
        ns: &Namespace,
        filter: Document,
        replacement: Document,
        settings: ReplaceSettings,
    ) -> MgoResult<UpdateResult> {
        let upsert = settings.upsert.unwrap_or(false);
        self.write(ns, |writer| writer.replace(&filter, &replacement, upsert))
            .await
    }

    async fn delete(
        &self,
        _ctx: &Context,
        ns: &Namespace,
        filter: Document,
        multi: bool,
        _settings: DeleteSettings,
    ) -> MgoResult<DeleteResult> {
        let deleted_count = self.write(ns, |writer| writer.delete(&filter, multi)).await?;
        Ok(DeleteResult { deleted_count })
    }

    async fn find_one_and_modify(
        &self,
        _ctx: &Context,
        ns: &Namespace,
        filter: Document,
        request: FindAndModify,
    ) -> MgoResult<Option<Document>> {
        let FindAndModify {
            modification,
            sort,
            projection,
            upsert,
            return_new,
        } = request;
        let shape = |document: Document| match &projection {
            Some(projection) => project(&document, projection),
            None => document,
        };

        self.write(ns, |writer| {
            let Some(index) = first_match(writer.documents, &filter, sort.as_ref())? else {
                if !upsert || modification == Modification::Delete {
                    return Ok(None);
                }
                let outcome = match &modification {
                    Modification::Replace(replacement) => writer.replace(&filter, replacement, true)?,
                    Modification::Update(update) => writer.update(&filter, update, false, true)?,
                    Modification::Delete => return Ok(None),
                };
                if !return_new {
                    return Ok(None);
                }
                let created = outcome.upserted_id.and_then(|id| {
                    writer
                        .documents
                        .iter()
                        .find(|doc| doc.get("_id") == Some(&id))
                        .cloned()
                });
                return Ok(created.map(shape));
            };

            let before = writer.documents[index].clone();
            let id_filter = doc! { "_id": before.get("_id").cloned().unwrap_or(Bson::Null) };
            match &modification {
                Modification::Delete => {
                    writer.documents.remove(index);
                    return Ok(Some(shape(before)));
                }
                Modification::Replace(replacement) => {
                    writer.replace(&id_filter, replacement, false)?;
                }
                Modification::Update(update) => {
                    apply_update(&mut writer.documents[index], update, false)?;
                }
            }

            if return_new {
                Ok(Some(shape(writer.documents[index].clone())))
            } else {
                Ok(Some(shape(before)))
            }
        })
        .await
    }

    async fn bulk_write(
        &self,
        _ctx: &Context,
        ns: &Namespace,
        operations: Vec<WriteOperation>,
        ordered: Option<bool>,
    ) -> MgoResult<BulkResult> {
        if operations.is_empty() {
            return Err(DriverError::new("bulk write requires at least one operation")
                .with_code(BAD_VALUE)
                .into());
        }
        let ordered = ordered.unwrap_or(true);
        debug!(%ns, operations = operations.len(), ordered, "bulk write");

        self.write(ns, |writer| {
            let mut result = BulkResult::default();
            let mut first_error = None;
            for (index, operation) in operations.iter().enumerate() {
                if let Err(err) = writer.apply(operation, index, &mut result) {
                    debug!(index, operation = operation.name(), error = %err, "bulk operation failed");
                    if ordered {
                        return Err(err);
                    }
                    first_error.get_or_insert(err);
                }
            }
            match first_error {
                Some(err) => Err(err),
                None => Ok(result),
            }
        })
        .await
    }

    async fn aggregate(
        &self,
        _ctx: &Context,
        ns: &Namespace,
        pipeline: Vec<Document>,
        _settings: AggregateSettings,
    ) -> MgoResult<Box<dyn DriverCursor>> {
        let documents = self
            .read(ns, |documents| Self::run_pipeline(documents.to_vec(), &pipeline))
            .await?;
        Ok(Box::new(MemoryCursor::new(documents)))
    }

    async fn run_command(&self, _ctx: &Context, db: &str, command: Document) -> MgoResult<Document> {
        let Some(name) = command.keys().next() else {
            return Err(DriverError::new("empty command").with_code(BAD_VALUE).into());
        };

        match name.as_str() {
            "ping" => Ok(doc! { "ok": 1.0 }),
            "buildInfo" | "buildinfo" => match &self.server_version {
                Some(version) => Ok(doc! { "version": version.as_str(), "ok": 1.0 }),
                None => Ok(doc! { "ok": 1.0 }),
            },
            "dropDatabase" => {
                self.store.write().await.retain(|ns, _| ns.db != db);
                Ok(doc! { "ok": 1.0 })
            }
            other => Err(DriverError::new(format!("no such command: '{other}'"))
                .with_code(COMMAND_NOT_FOUND)
                .into()),
        }
    }

    async fn drop_collection(&self, _ctx: &Context, ns: &Namespace) -> MgoResult<()> {
        self.store.write().await.remove(ns);
        Ok(())
    }

    async fn drop_database(&self, _ctx: &Context, db: &str) -> MgoResult<()> {
        self.store.write().await.retain(|ns, _| ns.db != db);
        Ok(())
    }

    async fn ping(&self, _ctx: &Context) -> MgoResult<()> {
        Ok(())
    }

    async fn start_session(
        &self,
        _ctx: &Context,
        _settings: SessionSettings,
    ) -> MgoResult<Arc<dyn DriverSession>> {
        Ok(Arc::new(MemorySession::new(self.store.clone())))
    }
}

/// Builder for creating [`InMemoryDriver`] instances.
#[derive(Debug, Clone)]
pub struct InMemoryDriverBuilder {
    server_version: Option<String>,
}

impl Default for InMemoryDriverBuilder {
    fn default() -> Self {
        Self {
            server_version: Some(DEFAULT_SERVER_VERSION.to_string()),
        }
    }
}

impl InMemoryDriverBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the version reported by `buildInfo`.
    pub fn server_version(mut self, version: impl Into<String>) -> Self {
        self.server_version = Some(version.into());
        self
    }

    /// Makes `buildInfo` report no version at all.
    pub fn without_server_version(mut self) -> Self {
        self.server_version = None;
        self
    }
}

#[async_trait]
impl DriverBuilder for InMemoryDriverBuilder {
    type Driver = InMemoryDriver;

    async fn build(self) -> MgoResult<InMemoryDriver> {
        Ok(InMemoryDriver {
            store: Arc::default(),
            server_version: self.server_version,
        })
    }
}
