//! Filter, projection, sort and update evaluation for in-memory documents.
//!
//! This module interprets the MongoDB filter dialect produced by the query builder:
//!
//! - field conditions: `$eq $ne $gt $gte $lt $lte $in $nin $regex $options $exists $not $size`
//! - logical operators: `$and $or $nor`
//! - dotted paths into nested documents and arrays
//! - array fields match when any element matches
//!
//! Unsupported operators are reported as [`OdmError::Query`] instead of silently matching.

use bson::{Bson, DateTime, Document, oid::ObjectId};
use regex::{Regex, RegexBuilder};
use std::{cmp::Ordering, collections::HashMap};

use docrecord_core::{
    error::{OdmError, OdmResult},
    filter::is_operator_document,
};

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to `f64` so that `1`, `1i64` and `1.0` compare equal.
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
    /// Values without a meaningful comparison, such as binaries or regular expressions.
    Opaque(&'a Bson),
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
            Bson::Array(arr) => Comparable::Array(
                arr.iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>(),
            ),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>(),
            ),
            other => Comparable::Opaque(other),
        }
    }
}

impl Comparable<'_> {
    /// Position in the cross-type sort order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 1,
            Comparable::Number(_) => 2,
            Comparable::String(_) => 3,
            Comparable::Map(_) => 4,
            Comparable::Array(_) => 5,
            Comparable::ObjectId(_) => 7,
            Comparable::Bool(_) => 8,
            Comparable::DateTime(_) => 9,
            Comparable::Opaque(_) => 10,
        }
    }

    /// Total order used for sorting: values of different types order by type.
    fn sort_cmp(&self, other: &Self) -> Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| {
                self.partial_cmp(other)
                    .unwrap_or(Ordering::Equal)
            })
    }
}

impl PartialEq for Comparable<'_> {
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
            (Comparable::Opaque(a), Comparable::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            _ => None,
        }
    }
}

/// Evaluates filter documents against one document.
pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Whether the document matches every condition of `filter`.
    pub fn matches(&self, filter: &Document) -> OdmResult<bool> {
        for (key, condition) in filter {
            let matched = match key.as_str() {
                "$and" => self.branches(key, condition)?.iter().all(|m| *m),
                "$or" => self.branches(key, condition)?.iter().any(|m| *m),
                "$nor" => !self.branches(key, condition)?.iter().any(|m| *m),
                op if op.starts_with('$') => {
                    return Err(OdmError::Query(format!("unsupported top-level operator {op}")));
                }
                path => self.matches_field(path, condition)?,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Returns clones of every document matching `filter`, in order.
    pub fn filter_documents(
        documents: impl IntoIterator<Item = &'a Document>,
        filter: &Document,
    ) -> OdmResult<Vec<Document>> {
        let mut matched = Vec::new();

        for document in documents {
            if DocumentEvaluator::new(document).matches(filter)? {
                matched.push(document.clone());
            }
        }

        Ok(matched)
    }

    fn branches(&self, op: &str, condition: &Bson) -> OdmResult<Vec<bool>> {
        let Bson::Array(branches) = condition else {
            return Err(OdmError::Query(format!("{op} requires an array")));
        };

        branches
            .iter()
            .map(|branch| match branch {
                Bson::Document(branch) => self.matches(branch),
                _ => Err(OdmError::Query(format!("{op} requires an array of documents"))),
            })
            .collect()
    }

    fn matches_field(&self, path: &str, condition: &Bson) -> OdmResult<bool> {
        let value = resolve(self.document, path);
        let value = value.as_ref();

        match condition {
            Bson::Document(operators) if is_operator_document(operators) => {
                apply_operators(value, operators)
            }
            Bson::RegularExpression(regex) => {
                matches_regex(value, regex.pattern.as_str(), regex.options.as_str())
            }
            expected => Ok(equals(value, expected)),
        }
    }
}

fn apply_operators(value: Option<&Bson>, operators: &Document) -> OdmResult<bool> {
    let options = operators.get_str("$options").unwrap_or("");

    for (op, argument) in operators {
        let matched = match op.as_str() {
            "$eq" => equals(value, argument),
            "$ne" => !equals(value, argument),
            "$gt" => compare(value, argument, |ordering| ordering == Ordering::Greater),
            "$gte" => compare(value, argument, |ordering| ordering != Ordering::Less),
            "$lt" => compare(value, argument, |ordering| ordering == Ordering::Less),
            "$lte" => compare(value, argument, |ordering| ordering != Ordering::Greater),
            "$in" => in_list(value, argument)?,
            "$nin" => !in_list(value, argument)?,
            "$exists" => value.is_some() == truthy(argument),
            "$regex" => match argument {
                Bson::String(pattern) => matches_regex(value, pattern, options)?,
                Bson::RegularExpression(regex) => {
                    let flags = match options.is_empty() {
                        true => regex.options.as_str(),
                        false => options,
                    };
                    matches_regex(value, regex.pattern.as_str(), flags)?
                }
                _ => return Err(OdmError::Query("$regex requires a string pattern".to_string())),
            },
            "$options" => true,
            "$not" => !match argument {
                Bson::Document(inner) => apply_operators(value, inner)?,
                Bson::RegularExpression(regex) => {
                    matches_regex(value, regex.pattern.as_str(), regex.options.as_str())?
                }
                _ => return Err(OdmError::Query("$not requires an operator document".to_string())),
            },
            "$size" => match (value, as_i64(argument)) {
                (Some(Bson::Array(items)), Some(size)) => items.len() as i64 == size,
                (_, None) => return Err(OdmError::Query("$size requires a number".to_string())),
                _ => false,
            },
            other => return Err(OdmError::Query(format!("unsupported operator {other}"))),
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Equality with null matching missing fields and arrays matching on any element.
fn equals(value: Option<&Bson>, expected: &Bson) -> bool {
    let expected = Comparable::from(expected);

    match value {
        None => expected == Comparable::Null,
        Some(whole @ Bson::Array(items)) => {
            Comparable::from(whole) == expected
                || items
                    .iter()
                    .any(|item| Comparable::from(item) == expected)
        }
        Some(value) => Comparable::from(value) == expected,
    }
}

/// Range comparison between values of the same type; arrays match on any element.
fn compare(value: Option<&Bson>, argument: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let argument = Comparable::from(argument);

    match value {
        None => false,
        Some(Bson::Array(items)) => items.iter().any(|item| {
            Comparable::from(item)
                .partial_cmp(&argument)
                .is_some_and(&accept)
        }),
        Some(value) => Comparable::from(value)
            .partial_cmp(&argument)
            .is_some_and(&accept),
    }
}

fn in_list(value: Option<&Bson>, argument: &Bson) -> OdmResult<bool> {
    let Bson::Array(candidates) = argument else {
        return Err(OdmError::Query("$in and $nin require an array".to_string()));
    };

    for candidate in candidates {
        let matched = match candidate {
            Bson::RegularExpression(regex) => {
                matches_regex(value, regex.pattern.as_str(), regex.options.as_str())?
            }
            candidate => equals(value, candidate),
        };

        if matched {
            return Ok(true);
        }
    }

    Ok(false)
}

fn matches_regex(value: Option<&Bson>, pattern: &str, options: &str) -> OdmResult<bool> {
    let regex = compile(pattern, options)?;

    Ok(match value {
        Some(Bson::String(text)) => regex.is_match(text),
        Some(Bson::Array(items)) => items.iter().any(|item| match item {
            Bson::String(text) => regex.is_match(text),
            _ => false,
        }),
        _ => false,
    })
}

/// Compiles a pattern with MongoDB option flags `i`, `m`, `s` and `x`.
pub(crate) fn compile(pattern: &str, options: &str) -> OdmResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|err| OdmError::Query(format!("invalid regular expression {pattern}: {err}")))
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(value) => *value,
        Bson::Null | Bson::Undefined => false,
        other => as_i64(other).is_none_or(|number| number != 0),
    }
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(value) => Some(i64::from(*value)),
        Bson::Int64(value) => Some(*value),
        Bson::Double(value) if value.fract() == 0.0 => Some(*value as i64),
        _ => None,
    }
}

/// Resolves a dotted path. Arrays in the middle of a path are indexed by number or mapped
/// over their document elements.
pub(crate) fn resolve(document: &Document, path: &str) -> Option<Bson> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let value = document.get(head)?;

    match rest {
        None => Some(value.clone()),
        Some(rest) => resolve_value(value, rest),
    }
}

fn resolve_value(value: &Bson, path: &str) -> Option<Bson> {
    match value {
        Bson::Document(inner) => resolve(inner, path),
        Bson::Array(items) => {
            let (head, rest) = match path.split_once('.') {
                Some((head, rest)) => (head, Some(rest)),
                None => (path, None),
            };

            if let Ok(index) = head.parse::<usize>() {
                let item = items.get(index)?;
                return match rest {
                    None => Some(item.clone()),
                    Some(rest) => resolve_value(item, rest),
                };
            }

            let values: Vec<Bson> = items
                .iter()
                .filter_map(|item| match item {
                    Bson::Document(inner) => resolve(inner, path),
                    _ => None,
                })
                .collect();

            (!values.is_empty()).then_some(Bson::Array(values))
        }
        _ => None,
    }
}

/// Orders two documents by a sort specification of `{ field: 1 | -1 }` entries.
pub(crate) fn compare_documents(a: &Document, b: &Document, sort: &Document) -> Ordering {
    for (field, direction) in sort {
        let left = resolve(a, field);
        let right = resolve(b, field);

        let ordering = Comparable::from(left.as_ref().unwrap_or(&Bson::Null))
            .sort_cmp(&Comparable::from(right.as_ref().unwrap_or(&Bson::Null)));

        let ordering = match as_i64(direction) {
            Some(direction) if direction < 0 => ordering.reverse(),
            _ => ordering,
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

/// Applies an inclusion or exclusion projection. `_id` is kept unless excluded.
pub(crate) fn project(document: &Document, projection: &Document) -> Document {
    let inclusive = projection
        .iter()
        .any(|(field, flag)| field != "_id" && truthy(flag));

    if !inclusive {
        let mut projected = document.clone();
        for (field, _) in projection.iter().filter(|(_, flag)| !truthy(flag)) {
            remove_path(&mut projected, field);
        }
        return projected;
    }

    let mut projected = Document::new();

    if projection.get("_id").is_none_or(truthy) {
        if let Some(id) = document.get("_id") {
            projected.insert("_id", id.clone());
        }
    }

    for (field, flag) in projection {
        if field == "_id" || !truthy(flag) {
            continue;
        }
        if let Some(value) = resolve(document, field) {
            set_path(&mut projected, field, value);
        }
    }

    projected
}

/// Applies `$set`, `$unset` and `$inc` to a document. Returns whether it changed.
pub(crate) fn apply_update(document: &mut Document, update: &Document) -> OdmResult<bool> {
    let before = document.clone();

    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(OdmError::Query(format!("{op} requires a document")));
        };

        match op.as_str() {
            "$set" => {
                for (path, value) in fields {
                    set_path(document, path, value.clone());
                }
            }
            "$unset" => {
                for (path, _) in fields {
                    remove_path(document, path);
                }
            }
            "$inc" => {
                for (path, amount) in fields {
                    let current = resolve(document, path).unwrap_or(Bson::Int32(0));
                    set_path(document, path, increment(&current, amount, path)?);
                }
            }
            other if other.starts_with('$') => {
                return Err(OdmError::Query(format!("unsupported update operator {other}")));
            }
            _ => {
                return Err(OdmError::Query(
                    "update documents must only contain update operators".to_string(),
                ));
            }
        }
    }

    Ok(*document != before)
}

fn increment(current: &Bson, amount: &Bson, path: &str) -> OdmResult<Bson> {
    Ok(match (current, amount) {
        (Bson::Int32(a), Bson::Int32(b)) => match a.checked_add(*b) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(i64::from(*a) + i64::from(*b)),
        },
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(i64::from(*a).saturating_add(*b)),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a.saturating_add(i64::from(*b))),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a.saturating_add(*b)),
        (Bson::Double(a), Bson::Double(b)) => Bson::Double(a + b),
        (Bson::Double(a), Bson::Int32(b)) => Bson::Double(a + f64::from(*b)),
        (Bson::Double(a), Bson::Int64(b)) => Bson::Double(a + *b as f64),
        (Bson::Int32(a), Bson::Double(b)) => Bson::Double(f64::from(*a) + b),
        (Bson::Int64(a), Bson::Double(b)) => Bson::Double(*a as f64 + b),
        _ => {
            return Err(OdmError::Query(format!(
                "cannot apply $inc to non-numeric field {path}"
            )));
        }
    })
}

fn set_path(document: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, Document::new());
            }
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                set_path(inner, rest, value);
            }
        }
    }
}

fn remove_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}
