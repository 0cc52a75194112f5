//! Filter evaluation, sorting and projection over in-memory documents.
//!
//! Supports the subset of the query language the in-memory driver needs: implicit and `$eq`
//! equality (matching array elements too), `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`,
//! `$exists`, and the `$and`, `$or`, `$nor` combinators. Field names may be dotted paths.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};

use mgolayer_core::error::{DriverError, MgoResult};

/// Server error code for malformed queries.
pub(crate) const BAD_VALUE: i32 = 2;

fn bad_value(message: impl Into<String>) -> DriverError {
    DriverError::new(message).with_code(BAD_VALUE)
}

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            other => Comparable::Other(other),
        }
    }
}

impl<'a> Comparable<'a> {
    /// Rank of the value's type in the cross-type sort order.
    fn type_rank(&self) -> u8 {
        match self {
            Comparable::Null => 1,
            Comparable::Number(_) => 2,
            Comparable::String(_) => 3,
            Comparable::Map(_) => 4,
            Comparable::Array(_) => 5,
            Comparable::ObjectId(_) => 7,
            Comparable::Bool(_) => 8,
            Comparable::DateTime(_) => 9,
            Comparable::Other(_) => 10,
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    /// Orders values of the same type class; values of different classes do not compare.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.bytes().partial_cmp(&b.bytes()),
            _ => None,
        }
    }
}

/// Total order used for sorting: type class first, then value.
pub(crate) fn sort_order(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let left = left.map(Comparable::from).unwrap_or(Comparable::Null);
    let right = right.map(Comparable::from).unwrap_or(Comparable::Null);

    left.type_rank()
        .cmp(&right.type_rank())
        .then_with(|| left.partial_cmp(&right).unwrap_or(Ordering::Equal))
}

/// Resolves a dotted path such as `"address.city"` or `"tags.0"`.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;

    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            Bson::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

fn is_operator_document(value: &Bson) -> bool {
    match value {
        Bson::Document(doc) => doc.keys().next().is_some_and(|key| key.starts_with('$')),
        _ => false,
    }
}

fn values_equal(field: Option<&Bson>, expected: &Bson) -> bool {
    let expected_cmp = Comparable::from(expected);
    match field {
        None => matches!(expected_cmp, Comparable::Null),
        Some(value) => {
            let value_cmp = Comparable::from(value);
            if value_cmp == expected_cmp {
                return true;
            }
            match value_cmp {
                Comparable::Array(items) => items.iter().any(|item| *item == expected_cmp),
                _ => false,
            }
        }
    }
}

fn values_order(field: Option<&Bson>, expected: &Bson, accept: fn(Ordering) -> bool) -> bool {
    let Some(value) = field else {
        return false;
    };
    let expected = Comparable::from(expected);
    let check = |candidate: &Comparable| candidate.partial_cmp(&expected).is_some_and(accept);

    match Comparable::from(value) {
        Comparable::Array(items) => items.iter().any(check),
        single => check(&single),
    }
}

fn as_array<'a>(operator: &str, value: &'a Bson) -> MgoResult<&'a Vec<Bson>> {
    match value {
        Bson::Array(items) => Ok(items),
        _ => Err(bad_value(format!("{operator} needs an array")).into()),
    }
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        Bson::Null | Bson::Undefined => false,
        _ => true,
    }
}

/// Evaluates a filter document against one stored document.
pub(crate) struct FilterEvaluator<'a> {
    document: &'a Document,
}

impl<'a> FilterEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn matches(&self, filter: &Document) -> MgoResult<bool> {
        for (key, value) in filter {
            let matched = match key.as_str() {
                "$and" => self.all_of(as_array("$and", value)?)?,
                "$or" => self.any_of(as_array("$or", value)?)?,
                "$nor" => !self.any_of(as_array("$nor", value)?)?,
                operator if operator.starts_with('$') => {
                    return Err(bad_value(format!("unknown top level operator: {operator}")).into());
                }
                field => self.field_matches(field, value)?,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn clauses(clauses: &[Bson]) -> MgoResult<impl Iterator<Item = &Document>> {
        if clauses.is_empty() {
            return Err(bad_value("$and/$or/$nor must be a nonempty array").into());
        }
        clauses
            .iter()
            .map(|clause| match clause {
                Bson::Document(doc) => Ok(doc),
                _ => Err(bad_value("$and/$or/$nor entries need to be full objects").into()),
            })
            .collect::<MgoResult<Vec<_>>>()
            .map(Vec::into_iter)
    }

    fn all_of(&self, clauses: &[Bson]) -> MgoResult<bool> {
        for clause in Self::clauses(clauses)? {
            if !self.matches(clause)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn any_of(&self, clauses: &[Bson]) -> MgoResult<bool> {
        for clause in Self::clauses(clauses)? {
            if self.matches(clause)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn field_matches(&self, field: &str, condition: &Bson) -> MgoResult<bool> {
        let value = lookup(self.document, field);

        let Bson::Document(operators) = condition else {
            return Ok(values_equal(value, condition));
        };
        if !is_operator_document(condition) {
            return Ok(values_equal(value, condition));
        }

        for (operator, operand) in operators {
            let matched = match operator.as_str() {
                "$eq" => values_equal(value, operand),
                "$ne" => !values_equal(value, operand),
                "$gt" => values_order(value, operand, |o| o == Ordering::Greater),
                "$gte" => values_order(value, operand, |o| o != Ordering::Less),
                "$lt" => values_order(value, operand, |o| o == Ordering::Less),
                "$lte" => values_order(value, operand, |o| o != Ordering::Greater),
                "$in" => as_array("$in", operand)?
                    .iter()
                    .any(|candidate| values_equal(value, candidate)),
                "$nin" => !as_array("$nin", operand)?
                    .iter()
                    .any(|candidate| values_equal(value, candidate)),
                "$exists" => value.is_some() == truthy(operand),
                other => return Err(bad_value(format!("unknown operator: {other}")).into()),
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

/// Sorts documents in place by a sort specification such as `{ "age": -1, "name": 1 }`.
pub(crate) fn sort_documents(documents: &mut [Document], sort: &Document) {
    let keys: Vec<(&str, bool)> = sort
        .iter()
        .map(|(key, direction)| {
            let descending = matches!(Comparable::from(direction), Comparable::Number(n) if n < 0.0);
            (key.as_str(), descending)
        })
        .collect();

    documents.sort_by(|a, b| {
        keys.iter()
            .map(|(key, descending)| {
                let ordering = sort_order(lookup(a, key), lookup(b, key));
                if *descending { ordering.reverse() } else { ordering }
            })
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

/// Applies a top-level projection.
///
/// A projection is inclusive when any field other than `_id` is set to a truthy value;
/// `_id` is kept unless excluded explicitly.
pub(crate) fn project(document: &Document, projection: &Document) -> Document {
    let inclusive = projection
        .iter()
        .any(|(key, value)| key != "_id" && truthy(value));
    let keep_id = projection.get("_id").is_none_or(truthy);

    let mut projected = Document::new();
    for (key, value) in document {
        let keep = if key == "_id" {
            keep_id
        } else if inclusive {
            projection.get(key).is_some_and(truthy)
        } else {
            projection.get(key).is_none_or(truthy)
        };

        if keep {
            projected.insert(key.clone(), value.clone());
        }
    }

    projected
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    fn matches(document: &Document, filter: Document) -> bool {
        FilterEvaluator::new(document).matches(&filter).unwrap()
    }

    #[test]
    fn equality_reaches_into_arrays_and_paths() {
        let document = doc! { "tags": ["a", "b"], "address": { "city": "Oslo" }, "n": 3 };

        assert!(matches(&document, doc! { "tags": "b" }));
        assert!(matches(&document, doc! { "address.city": "Oslo" }));
        assert!(matches(&document, doc! { "n": 3.0 }));
        assert!(!matches(&document, doc! { "missing": 1 }));
        assert!(matches(&document, doc! { "missing": null }));
    }

    #[test]
    fn comparison_operators() {
        let document = doc! { "age": 30, "name": "Ann" };

        assert!(matches(&document, doc! { "age": { "$gt": 18, "$lte": 30 } }));
        assert!(!matches(&document, doc! { "age": { "$lt": 30 } }));
        assert!(!matches(&document, doc! { "name": { "$gt": 5 } }));
        assert!(matches(&document, doc! { "name": { "$in": ["Bob", "Ann"] } }));
        assert!(matches(&document, doc! { "name": { "$nin": ["Bob"] } }));
        assert!(matches(&document, doc! { "email": { "$exists": false } }));
    }

    #[test]
    fn combinators() {
        let document = doc! { "a": 1, "b": 2 };

        assert!(matches(&document, doc! { "$or": [{ "a": 5 }, { "b": 2 }] }));
        assert!(!matches(&document, doc! { "$and": [{ "a": 1 }, { "b": 3 }] }));
        assert!(matches(&document, doc! { "$nor": [{ "a": 5 }] }));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let document = doc! { "a": 1 };
        let err = FilterEvaluator::new(&document)
            .matches(&doc! { "a": { "$regex": "x" } })
            .unwrap_err();
        assert!(err.to_string().contains("$regex"));
    }

    #[test]
    fn object_ids_compare_by_value() {
        let id = ObjectId::new();
        let document = doc! { "_id": id };

        assert!(matches(&document, doc! { "_id": id }));
        assert!(!matches(&document, doc! { "_id": ObjectId::new() }));
    }

    #[test]
    fn sort_by_multiple_keys() {
        let mut documents = vec![
            doc! { "n": 1, "s": "b" },
            doc! { "n": 2, "s": "a" },
            doc! { "n": 1, "s": "a" },
        ];

        sort_documents(&mut documents, &doc! { "n": -1, "s": 1 });

        assert_eq!(
            documents,
            vec![
                doc! { "n": 2, "s": "a" },
                doc! { "n": 1, "s": "a" },
                doc! { "n": 1, "s": "b" },
            ]
        );
    }

    #[test]
    fn projection_modes() {
        let document = doc! { "_id": 1, "a": 1, "b": 2 };

        assert_eq!(project(&document, &doc! { "a": 1 }), doc! { "_id": 1, "a": 1 });
        assert_eq!(project(&document, &doc! { "a": 1, "_id": 0 }), doc! { "a": 1 });
        assert_eq!(project(&document, &doc! { "b": 0 }), doc! { "_id": 1, "a": 1 });
    }
}
