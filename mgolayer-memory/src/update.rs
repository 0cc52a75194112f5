//! Update document application.
//!
//! Supports `$set`, `$unset`, `$inc` and `$setOnInsert`, with dotted paths creating
//! intermediate documents as needed.

use bson::{Bson, Document, oid::ObjectId};

use mgolayer_core::error::{DriverError, MgoResult};

use crate::evaluator::Comparable;

/// Server error code for invalid update documents.
pub(crate) const FAILED_TO_PARSE: i32 = 9;
/// Server error code for arithmetic on non-numeric fields.
pub(crate) const TYPE_MISMATCH: i32 = 14;
/// Server error code for attempts to change `_id`.
pub(crate) const IMMUTABLE_FIELD: i32 = 66;

fn set_path(document: &mut Document, path: &str, value: Bson) -> MgoResult<()> {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !document.contains_key(head) {
                document.insert(head, Document::new());
            }
            match document.get_mut(head) {
                Some(Bson::Document(inner)) => set_path(inner, rest, value),
                _ => Err(DriverError::new(format!(
                    "cannot create field '{rest}' in element {{{head}: ...}}"
                ))
                .with_code(FAILED_TO_PARSE)
                .into()),
            }
        }
    }
}

fn unset_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                unset_path(inner, rest);
            }
        }
    }
}

fn increment(current: Option<&Bson>, by: &Bson, path: &str) -> MgoResult<Bson> {
    let mismatch = || {
        DriverError::new(format!("cannot apply $inc to field '{path}' with a non-numeric value"))
            .with_code(TYPE_MISMATCH)
    };

    let result = match (current.unwrap_or(&Bson::Int32(0)), by) {
        (Bson::Int32(a), Bson::Int32(b)) => a
            .checked_add(*b)
            .map(Bson::Int32)
            .unwrap_or(Bson::Int64(*a as i64 + *b as i64)),
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(*a as i64 + b),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a + *b as i64),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a + b),
        (a, b) => match (Comparable::from(a), Comparable::from(b)) {
            (Comparable::Number(a), Comparable::Number(b)) => Bson::Double(a + b),
            _ => return Err(mismatch().into()),
        },
    };

    Ok(result)
}

fn operand<'a>(operator: &str, value: &'a Bson) -> MgoResult<&'a Document> {
    match value {
        Bson::Document(fields) => Ok(fields),
        _ => Err(DriverError::new(format!("modifiers for {operator} must be an object"))
            .with_code(FAILED_TO_PARSE)
            .into()),
    }
}

/// Applies `update` to `document`.
///
/// `inserting` is set when `document` is being created by an upsert, which activates
/// `$setOnInsert`. Returns whether the document changed.
///
/// # Errors
///
/// Fails if `update` is empty or contains plain fields or unknown operators, or if it tries
/// to change `_id`.
pub(crate) fn apply_update(
    document: &mut Document,
    update: &Document,
    inserting: bool,
) -> MgoResult<bool> {
    if update.is_empty() {
        return Err(DriverError::new("update document must not be empty")
            .with_code(FAILED_TO_PARSE)
            .into());
    }

    let before = document.clone();
    let mut working = document.clone();

    for (operator, fields) in update {
        match operator.as_str() {
            "$set" => {
                for (path, value) in operand(operator, fields)? {
                    set_path(&mut working, path, value.clone())?;
                }
            }
            "$setOnInsert" => {
                let fields = operand(operator, fields)?;
                if inserting {
                    for (path, value) in fields {
                        set_path(&mut working, path, value.clone())?;
                    }
                }
            }
            "$unset" => {
                for (path, _) in operand(operator, fields)? {
                    unset_path(&mut working, path);
                }
            }
            "$inc" => {
                for (path, by) in operand(operator, fields)? {
                    let current = crate::evaluator::lookup(&working, path).cloned();
                    let next = increment(current.as_ref(), by, path)?;
                    set_path(&mut working, path, next)?;
                }
            }
            other if other.starts_with('$') => {
                return Err(DriverError::new(format!("unknown modifier: {other}"))
                    .with_code(FAILED_TO_PARSE)
                    .into());
            }
            field => {
                return Err(DriverError::new(format!(
                    "update document requires atomic operators, found field '{field}'"
                ))
                .with_code(FAILED_TO_PARSE)
                .into());
            }
        }
    }

    if !inserting && before.get("_id") != working.get("_id") {
        return Err(DriverError::new("performing an update would modify the immutable field '_id'")
            .with_code(IMMUTABLE_FIELD)
            .into());
    }

    let changed = working != before;
    *document = working;
    Ok(changed)
}

/// Rejects replacement documents carrying update operators.
pub(crate) fn validate_replacement(replacement: &Document) -> MgoResult<()> {
    match replacement.keys().find(|key| key.starts_with('$')) {
        Some(key) => Err(DriverError::new(format!(
            "replacement document must not contain update operators, found '{key}'"
        ))
        .with_code(FAILED_TO_PARSE)
        .into()),
        None => Ok(()),
    }
}

/// Builds the starting document for an upsert from the equality clauses of `filter`.
pub(crate) fn upsert_seed(filter: &Document) -> MgoResult<Document> {
    let mut seed = Document::new();

    for (key, value) in filter {
        if key.starts_with('$') {
            if key == "$and"
                && let Bson::Array(clauses) = value
            {
                for clause in clauses {
                    if let Bson::Document(clause) = clause {
                        for (path, value) in upsert_seed(clause)? {
                            set_path(&mut seed, &path, value)?;
                        }
                    }
                }
            }
            continue;
        }

        match value {
            Bson::Document(operators) if operators.keys().any(|k| k.starts_with('$')) => {
                if let Some(eq) = operators.get("$eq") {
                    set_path(&mut seed, key, eq.clone())?;
                }
            }
            other => set_path(&mut seed, key, other.clone())?,
        }
    }

    Ok(seed)
}

/// Returns `document` with an `_id` as its first field, generating one if absent.
pub(crate) fn with_id(document: Document) -> Document {
    if document.get("_id").is_some() && document.keys().next().map(String::as_str) == Some("_id")
    {
        return document;
    }

    let id = document
        .get("_id")
        .cloned()
        .unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));
    let mut ordered = Document::new();
    ordered.insert("_id", id);
    for (key, value) in document {
        if key != "_id" {
            ordered.insert(key, value);
        }
    }

    ordered
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;
    use mgolayer_core::error::MgoError;

    fn code(err: MgoError) -> Option<i32> {
        match err {
            MgoError::Driver(err) => err.code,
            _ => None,
        }
    }

    #[test]
    fn set_unset_and_inc() {
        let mut document = doc! { "_id": 1, "n": 1, "gone": true };

        let changed = apply_update(
            &mut document,
            &doc! {
                "$set": { "a.b": "x" },
                "$unset": { "gone": "" },
                "$inc": { "n": 2, "fresh": 1.5 },
            },
            false,
        )
        .unwrap();

        assert!(changed);
        assert_eq!(
            document,
            doc! { "_id": 1, "n": 3, "a": { "b": "x" }, "fresh": 1.5 }
        );
    }

    #[test]
    fn unchanged_update_reports_no_modification() {
        let mut document = doc! { "_id": 1, "n": 1 };
        assert!(!apply_update(&mut document, &doc! { "$set": { "n": 1 } }, false).unwrap());
    }

    #[test]
    fn set_on_insert_only_applies_when_inserting() {
        let mut existing = doc! { "_id": 1 };
        apply_update(&mut existing, &doc! { "$setOnInsert": { "created": 1 } }, false).unwrap();
        assert_eq!(existing, doc! { "_id": 1 });

        let mut inserted = doc! { "_id": 1 };
        apply_update(&mut inserted, &doc! { "$setOnInsert": { "created": 1 } }, true).unwrap();
        assert_eq!(inserted, doc! { "_id": 1, "created": 1 });
    }

    #[test]
    fn plain_fields_and_id_changes_are_rejected() {
        let mut document = doc! { "_id": 1 };

        let err = apply_update(&mut document, &doc! { "name": "x" }, false).unwrap_err();
        assert_eq!(code(err), Some(FAILED_TO_PARSE));

        let err = apply_update(&mut document, &doc! { "$set": { "_id": 2 } }, false).unwrap_err();
        assert_eq!(code(err), Some(IMMUTABLE_FIELD));

        let err = apply_update(&mut doc! { "s": "x" }, &doc! { "$inc": { "s": 1 } }, false)
            .unwrap_err();
        assert_eq!(code(err), Some(TYPE_MISMATCH));
    }

    #[test]
    fn seed_keeps_equality_clauses() {
        let seed = upsert_seed(&doc! {
            "name": "Ann",
            "age": { "$gt": 3 },
            "tag": { "$eq": "x" },
            "$and": [{ "team": "blue" }],
        })
        .unwrap();

        assert_eq!(seed, doc! { "name": "Ann", "tag": "x", "team": "blue" });
    }

    #[test]
    fn id_is_moved_to_front() {
        let document = with_id(doc! { "a": 1, "_id": 7 });
        assert_eq!(document.keys().next().map(String::as_str), Some("_id"));
        assert_eq!(document.get_i32("_id").unwrap(), 7);

        let generated = with_id(doc! { "a": 1 });
        assert!(generated.get_object_id("_id").is_ok());
    }
}
