//! Fluent query building and terminal read/modify operations.
//!
//! A [`Query`] is obtained from [`Collection::find`](crate::collection::Collection::find). Its
//! constraints live in a [`QuerySpec`], an immutable value: every builder call produces a new
//! spec and leaves the previous one untouched. Terminal operations (`one`, `all`, `count`,
//! `exists`, `distinct`, `cursor`, `apply`) consume the query.
//!
//! # Sort syntax
//!
//! Sort fields are plain field names. A leading `-` sorts descending, a leading `+` or no
//! prefix sorts ascending. An empty field name is a caller defect and panics.
//!
//! # Examples
//!
//! ```ignore
//! let adults: Vec<User> = users
//!     .find(&ctx, doc! { "age": { "$gte": 18 } }, None)
//!     .sort(["-age", "name"])
//!     .skip(20)
//!     .limit(10)
//!     .all()
//!     .await?;
//! ```

use bson::{
    Bson, Document,
    de::{deserialize_from_bson, deserialize_from_document},
};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{
    collection::Collection,
    context::Context,
    cursor::Cursor,
    driver::{CountSettings, Driver, FindAndModify, FindSettings, Modification},
    error::{MgoError, MgoResult},
    hooks::{HookPhase, Hooks, dispatch},
};

/// Splits a sort field into its name and direction (`1` ascending, `-1` descending).
///
/// # Panics
///
/// Panics if the field name is empty, including a bare `-` or `+`.
pub fn parse_sort_field(field: &str) -> (&str, i32) {
    let (name, direction) = if let Some(name) = field.strip_prefix('-') {
        (name, -1)
    } else if let Some(name) = field.strip_prefix('+') {
        (name, 1)
    } else {
        (field, 1)
    };

    assert!(!name.is_empty(), "sort field name must not be empty");
    (name, direction)
}

/// The constraints of a query.
///
/// Builder methods take `&self` and return a new, independent spec.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    filter: Document,
    sort: Vec<(String, i32)>,
    projection: Option<Document>,
    skip: Option<u64>,
    limit: Option<i64>,
    hint: Option<Bson>,
}

impl QuerySpec {
    pub fn new(filter: Document) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    /// Replaces the sort order. An empty list of fields leaves the current order in place.
    ///
    /// # Panics
    ///
    /// Panics if any field name is empty.
    pub fn sort<I, S>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let sort: Vec<(String, i32)> = fields
            .into_iter()
            .map(|field| {
                let (name, direction) = parse_sort_field(field.as_ref());
                (name.to_owned(), direction)
            })
            .collect();

        if sort.is_empty() {
            return self.clone();
        }

        Self {
            sort,
            ..self.clone()
        }
    }

    pub fn select(&self, projection: Document) -> Self {
        Self {
            projection: Some(projection),
            ..self.clone()
        }
    }

    pub fn skip(&self, n: u64) -> Self {
        Self {
            skip: Some(n),
            ..self.clone()
        }
    }

    pub fn limit(&self, n: i64) -> Self {
        Self {
            limit: Some(n),
            ..self.clone()
        }
    }

    /// Sets the index hint, either an index name or a key pattern document.
    pub fn hint(&self, hint: impl Into<Bson>) -> Self {
        Self {
            hint: Some(hint.into()),
            ..self.clone()
        }
    }

    pub fn filter(&self) -> &Document {
        &self.filter
    }

    pub fn sort_fields(&self) -> &[(String, i32)] {
        &self.sort
    }

    pub fn projection(&self) -> Option<&Document> {
        self.projection.as_ref()
    }

    pub fn skip_value(&self) -> Option<u64> {
        self.skip
    }

    pub fn limit_value(&self) -> Option<i64> {
        self.limit
    }

    pub fn hint_value(&self) -> Option<&Bson> {
        self.hint.as_ref()
    }

    /// The sort order as a driver sort document, `None` when unsorted.
    pub fn sort_document(&self) -> Option<Document> {
        if self.sort.is_empty() {
            return None;
        }

        Some(
            self.sort
                .iter()
                .map(|(name, direction)| (name.clone(), Bson::Int32(*direction)))
                .collect(),
        )
    }

    /// Settings for a multi-document find.
    pub fn find_settings(&self) -> FindSettings {
        FindSettings {
            sort: self.sort_document(),
            projection: self.projection.clone(),
            skip: self.skip,
            limit: self.limit,
            hint: self.hint.clone(),
        }
    }

    /// Settings for a single-document find. The limit does not apply.
    pub fn find_one_settings(&self) -> FindSettings {
        FindSettings {
            limit: None,
            ..self.find_settings()
        }
    }

    pub fn count_settings(&self) -> CountSettings {
        CountSettings {
            skip: self.skip,
            limit: self.limit.map(i64::unsigned_abs),
        }
    }
}

/// Describes the modification performed by [`Query::apply`].
///
/// `remove` takes priority over `replace`, which takes priority over an update.
/// `upsert` and `return_new` only apply when `remove` is false.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Change {
    /// The update document, or the replacement when `replace` is set.
    pub update: Document,
    pub replace: bool,
    pub remove: bool,
    pub upsert: bool,
    pub return_new: bool,
}

/// Decides the outcome of a find-and-modify from the document the driver returned.
///
/// An upsert that asked for the pre-image gets nothing back when it inserted; that is a
/// success with no document. Every other empty answer means nothing matched.
fn settle_modified<T: DeserializeOwned>(
    change: &Change,
    found: Option<Document>,
) -> MgoResult<Option<T>> {
    match found {
        Some(document) => Ok(Some(deserialize_from_document(document)?)),
        None if !change.remove && change.upsert && !change.return_new => Ok(None),
        None => Err(MgoError::NoSuchDocuments),
    }
}

/// A query against one collection.
pub struct Query<'c, 'h, D> {
    collection: &'c Collection<D>,
    ctx: Context,
    spec: QuerySpec,
    query_hook: Option<&'h mut dyn Hooks>,
}

impl<'c, 'h, D: Driver> Query<'c, 'h, D> {
    pub(crate) fn new(
        collection: &'c Collection<D>,
        ctx: Context,
        filter: Document,
        query_hook: Option<&'h mut dyn Hooks>,
    ) -> Self {
        Self {
            collection,
            ctx,
            spec: QuerySpec::new(filter),
            query_hook,
        }
    }

    fn with_spec(self, spec: QuerySpec) -> Self {
        Self { spec, ..self }
    }

    /// # Panics
    ///
    /// Panics if any field name is empty.
    pub fn sort<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let spec = self.spec.sort(fields);
        self.with_spec(spec)
    }

    pub fn select(self, projection: Document) -> Self {
        let spec = self.spec.select(projection);
        self.with_spec(spec)
    }

    pub fn skip(self, n: u64) -> Self {
        let spec = self.spec.skip(n);
        self.with_spec(spec)
    }

    pub fn limit(self, n: i64) -> Self {
        let spec = self.spec.limit(n);
        self.with_spec(spec)
    }

    pub fn hint(self, hint: impl Into<Bson>) -> Self {
        let spec = self.spec.hint(hint);
        self.with_spec(spec)
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    fn run_hook(&mut self, phase: HookPhase) -> MgoResult<()> {
        match self.query_hook.as_deref_mut() {
            Some(hook) => dispatch(&self.ctx, hook, phase),
            None => Ok(()),
        }
    }

    /// Fetches the first matching document, honoring sort, projection, skip and hint.
    ///
    /// # Errors
    ///
    /// Returns [`MgoError::NoSuchDocuments`] when nothing matches.
    pub async fn one<T: DeserializeOwned>(mut self) -> MgoResult<T> {
        self.run_hook(HookPhase::BeforeQuery)?;

        let ns = self.collection.namespace();
        debug!(collection = %ns, "find one");
        let found = self
            .ctx
            .bound(self.collection.driver().find_one(
                &self.ctx,
                ns,
                self.spec.filter.clone(),
                self.spec.find_one_settings(),
            ))
            .await?;
        let document = found.ok_or(MgoError::NoSuchDocuments)?;
        let value = deserialize_from_document(document)?;

        self.run_hook(HookPhase::AfterQuery)?;
        Ok(value)
    }

    /// Fetches every matching document, honoring all constraints.
    pub async fn all<T: DeserializeOwned>(mut self) -> MgoResult<Vec<T>> {
        self.run_hook(HookPhase::BeforeQuery)?;

        let mut cursor = self.open_cursor().await;
        let values = cursor.all().await?;

        self.run_hook(HookPhase::AfterQuery)?;
        Ok(values)
    }

    /// Counts matching documents, honoring skip and limit.
    pub async fn count(self) -> MgoResult<u64> {
        let ns = self.collection.namespace();
        debug!(collection = %ns, "count documents");
        self.ctx
            .bound(self.collection.driver().count_documents(
                &self.ctx,
                ns,
                self.spec.filter.clone(),
                self.spec.count_settings(),
            ))
            .await
    }

    pub async fn exists(self) -> MgoResult<bool> {
        Ok(self.count().await? > 0)
    }

    /// Collects the distinct values of `key` across matching documents into `T`.
    ///
    /// `T` must be sequence shaped (`Vec<_>`, `HashSet<_>`, ...) or a catch-all such as
    /// [`Bson`].
    ///
    /// # Errors
    ///
    /// - [`MgoError::QueryNotSlicePointer`] if `T` cannot hold a sequence. The driver is not
    ///   called in that case.
    /// - [`MgoError::QueryResultTypeInconsistent`] if the values do not decode into `T`'s
    ///   elements.
    pub async fn distinct<T: DeserializeOwned>(self, key: &str) -> MgoResult<T> {
        if deserialize_from_bson::<T>(Bson::Array(Vec::new())).is_err() {
            return Err(MgoError::QueryNotSlicePointer);
        }

        let ns = self.collection.namespace();
        debug!(collection = %ns, key, "distinct");
        let values = self
            .ctx
            .bound(self.collection.driver().distinct(
                &self.ctx,
                ns,
                key,
                self.spec.filter.clone(),
            ))
            .await?;

        deserialize_from_bson(Bson::Array(values)).map_err(|err| {
            debug!(collection = %ns, key, error = %err, "distinct values do not fit destination");
            MgoError::QueryResultTypeInconsistent
        })
    }

    /// Opens a cursor with the same constraints as [`Query::all`].
    ///
    /// A failure to open the cursor is kept inside the returned [`Cursor`].
    pub async fn cursor(self) -> Cursor {
        self.open_cursor().await
    }

    async fn open_cursor(&self) -> Cursor {
        let ns = self.collection.namespace();
        debug!(collection = %ns, "find");
        let opened = self
            .ctx
            .bound(self.collection.driver().find(
                &self.ctx,
                ns,
                self.spec.filter.clone(),
                self.spec.find_settings(),
            ))
            .await;

        Cursor::new(self.ctx.clone(), opened)
    }

    /// Atomically finds the first matching document and deletes, replaces or updates it.
    ///
    /// Returns the document before modification, or after when `change.return_new` is set.
    /// An upsert that inserted a document while the pre-image was requested returns
    /// `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`MgoError::NoSuchDocuments`] when nothing matched and the call was not such
    /// an upsert.
    pub async fn apply<T: DeserializeOwned>(self, change: Change) -> MgoResult<Option<T>> {
        let modification = if change.remove {
            Modification::Delete
        } else if change.replace {
            Modification::Replace(change.update.clone())
        } else {
            Modification::Update(change.update.clone())
        };
        let request = FindAndModify {
            modification,
            sort: self.spec.sort_document(),
            projection: self.spec.projection.clone(),
            upsert: !change.remove && change.upsert,
            return_new: !change.remove && change.return_new,
        };

        let ns = self.collection.namespace();
        debug!(collection = %ns, "find and modify");
        let found = self
            .ctx
            .bound(self.collection.driver().find_one_and_modify(
                &self.ctx,
                ns,
                self.spec.filter.clone(),
                request,
            ))
            .await?;

        settle_modified(&change, found)
    }
}
