//! Translation of fluent predicates into MongoDB filter documents.
//!
//! A [`Filter`] accumulates one canonical filter document. Predicates are added through the
//! [`Filtered`] trait, which both [`Filter`] and the query builders implement, so the same
//! fluent calls work everywhere:
//!
//! ```ignore
//! use docrecord::prelude::*;
//!
//! let filter = Filter::new()
//!     .where_op("age", ">", 18)
//!     .where_op("age", "<", 65)
//!     .or_where_eq("role", "admin");
//!
//! // { "age": { "$gt": 18, "$lt": 65 }, "$or": [{ "role": "admin" }] }
//! ```
//!
//! # Operators
//!
//! | operator  | filter                                   |
//! |-----------|------------------------------------------|
//! | `=`       | `{ key: value }`                         |
//! | `!=`      | `{ key: { "$ne": value } }`              |
//! | `>` `>=`  | `{ key: { "$gt" / "$gte": value } }`     |
//! | `<` `<=`  | `{ key: { "$lt" / "$lte": value } }`     |
//! | `like`    | `{ key: { "$regex": value, "$options": "i" } }` |
//! | `in`      | `{ key: { "$in": value } }`              |
//! | `not in`  | `{ key: { "$nin": value } }`             |
//!
//! Any other operator is passed through as a literal operator key, so `"size"` and `"$size"`
//! both produce `{ key: { "$size": value } }`.
//!
//! # Merging
//!
//! Operators on the same key accumulate into one operator document. An equality always
//! replaces the whole key, so the last `=` wins.
//!
//! # Regular expressions
//!
//! Native `Bson::RegularExpression` values found in field position, inside nested documents,
//! or inside `$and`/`$or`/`$nor` arrays are rewritten to `{ "$regex": pattern, "$options":
//! flags }`, so a native pattern and the operator syntax match the same documents. The same
//! rewrite runs on `$match` stages of aggregation pipelines through [`normalize_pipeline`].

use bson::{Bson, Document, doc};
use std::fmt;

const LOGICAL_OPERATORS: [&str; 3] = ["$and", "$or", "$nor"];

/// A comparison operator accepted by [`Filtered::where_op`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
    NotIn,
    /// A literal store operator, always stored with a leading `$`.
    Other(String),
}

impl Operator {
    /// Parses an operator string. Unknown strings become [`Operator::Other`].
    pub fn parse(op: &str) -> Self {
        match op.trim().to_ascii_lowercase().as_str() {
            "=" | "==" => Operator::Eq,
            "!=" | "<>" => Operator::Ne,
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            "like" => Operator::Like,
            "in" => Operator::In,
            "not in" => Operator::NotIn,
            other => Operator::Other(match other.starts_with('$') {
                true => other.to_string(),
                false => format!("${other}"),
            }),
        }
    }

    /// The operator key in the filter document, `None` for equality.
    pub fn key(&self) -> Option<&str> {
        match self {
            Operator::Eq => None,
            Operator::Ne => Some("$ne"),
            Operator::Gt => Some("$gt"),
            Operator::Gte => Some("$gte"),
            Operator::Lt => Some("$lt"),
            Operator::Lte => Some("$lte"),
            Operator::Like => Some("$regex"),
            Operator::In => Some("$in"),
            Operator::NotIn => Some("$nin"),
            Operator::Other(key) => Some(key),
        }
    }

    /// Builds the operator document for `value`, or `None` for equality.
    fn condition(&self, value: Bson) -> Option<Document> {
        match self {
            Operator::Eq => None,
            Operator::Like => Some(match value {
                Bson::RegularExpression(regex) => doc! {
                    "$regex": regex.pattern.as_str(),
                    "$options": regex.options.as_str(),
                },
                other => doc! {
                    "$regex": match other {
                        Bson::String(pattern) => pattern,
                        other => other.to_string(),
                    },
                    "$options": "i",
                },
            }),
            op => {
                let mut condition = Document::new();
                condition.insert(op.key().unwrap_or_default(), value);
                Some(condition)
            }
        }
    }
}

impl From<&str> for Operator {
    fn from(op: &str) -> Self {
        Operator::parse(op)
    }
}

impl From<String> for Operator {
    fn from(op: String) -> Self {
        Operator::parse(&op)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Eq => f.write_str("="),
            Operator::Like => f.write_str("like"),
            Operator::In => f.write_str("in"),
            Operator::NotIn => f.write_str("not in"),
            op => f.write_str(op.key().unwrap_or_default()),
        }
    }
}

/// An accumulated filter document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    document: Document,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a filter from a raw document, normalizing regular expressions.
    pub fn from_document(document: Document) -> Self {
        Self { document: normalize_document(document) }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn into_document(self) -> Document {
        self.document
    }

    pub fn is_empty(&self) -> bool {
        self.document.is_empty()
    }

    /// Adds a `key op value` predicate following the merge rule.
    pub fn push(&mut self, key: &str, op: Operator, value: Bson) {
        if op == Operator::Eq {
            self.document.insert(key, normalize_value(value));
            return;
        }

        let Some(condition) = op.condition(value) else {
            return;
        };

        let merge = matches!(
            self.document.get(key),
            Some(Bson::Document(existing)) if is_operator_document(existing)
        );

        match self.document.get_mut(key) {
            Some(Bson::Document(existing)) if merge => existing.extend(condition),
            _ => {
                self.document.insert(key, condition);
            }
        }
    }

    /// Merges a raw filter document.
    ///
    /// Logical arrays are appended to, operator documents on an existing key are merged, and
    /// any other value replaces the key.
    pub fn push_document(&mut self, document: Document) {
        for (key, value) in normalize_document(document) {
            let logical = LOGICAL_OPERATORS.contains(&key.as_str());
            let operators = matches!(
                (self.document.get(&key), &value),
                (Some(Bson::Document(existing)), Bson::Document(more))
                    if is_operator_document(existing) && is_operator_document(more)
            );

            let value = match (self.document.get_mut(&key), value) {
                (Some(Bson::Array(existing)), Bson::Array(more)) if logical => {
                    existing.extend(more);
                    continue;
                }
                (Some(Bson::Document(existing)), Bson::Document(more)) if operators => {
                    existing.extend(more);
                    continue;
                }
                (_, value) => value,
            };

            self.document.insert(key, value);
        }
    }

    /// Appends an alternative to the `$or` array, creating it on first use.
    pub fn push_or(&mut self, alternative: Filter) {
        let alternative = Bson::Document(alternative.into_document());

        match self.document.get_mut("$or") {
            Some(Bson::Array(alternatives)) => alternatives.push(alternative),
            _ => {
                self.document.insert("$or", vec![alternative]);
            }
        }
    }
}

impl From<Document> for Filter {
    fn from(document: Document) -> Self {
        Filter::from_document(document)
    }
}

impl From<Filter> for Document {
    fn from(filter: Filter) -> Self {
        filter.into_document()
    }
}

/// Fluent predicate methods shared by [`Filter`] and the query builders.
///
/// Every method consumes and returns `Self` so calls chain.
pub trait Filtered: Sized {
    fn filter_mut(&mut self) -> &mut Filter;

    /// `{ key: value }`; replaces any earlier condition on `key`.
    fn where_eq(mut self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.filter_mut()
            .push(&key.into(), Operator::Eq, value.into());
        self
    }

    /// `{ key: { op: value } }`, merged with earlier operators on `key`.
    fn where_op(
        mut self,
        key: impl Into<String>,
        op: impl Into<Operator>,
        value: impl Into<Bson>,
    ) -> Self {
        self.filter_mut()
            .push(&key.into(), op.into(), value.into());
        self
    }

    /// Merges a raw filter document.
    fn where_doc(mut self, document: Document) -> Self {
        self.filter_mut().push_document(document);
        self
    }

    /// Appends `{ key: value }` as an `$or` alternative.
    fn or_where_eq(self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.or_where_group(|filter| filter.where_eq(key, value))
    }

    /// Appends `{ key: { op: value } }` as an `$or` alternative.
    fn or_where_op(
        self,
        key: impl Into<String>,
        op: impl Into<Operator>,
        value: impl Into<Bson>,
    ) -> Self {
        self.or_where_group(|filter| filter.where_op(key, op, value))
    }

    /// Appends a raw document as an `$or` alternative.
    fn or_where_doc(self, document: Document) -> Self {
        self.or_where_group(|filter| filter.where_doc(document))
    }

    /// Builds an alternative on a fresh filter and appends it to `$or`.
    fn or_where_group<F>(mut self, group: F) -> Self
    where
        F: FnOnce(Filter) -> Filter,
    {
        let alternative = group(Filter::new());

        if !alternative.is_empty() {
            self.filter_mut().push_or(alternative);
        }

        self
    }

    fn where_in<I, V>(self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.where_op(key, Operator::In, into_array(values))
    }

    fn where_not_in<I, V>(self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        self.where_op(key, Operator::NotIn, into_array(values))
    }

    /// Case-insensitive pattern match.
    fn where_like(self, key: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.where_op(key, Operator::Like, pattern.into())
    }

    fn where_exists(self, key: impl Into<String>) -> Self {
        self.where_op(key, "$exists", true)
    }

    fn where_not_exists(self, key: impl Into<String>) -> Self {
        self.where_op(key, "$exists", false)
    }

    /// `{ key: null }`: matches documents where `key` is null or missing.
    fn where_null(self, key: impl Into<String>) -> Self {
        self.where_eq(key, Bson::Null)
    }

    /// `{ key: { "$ne": null } }`: the exact complement of [`Filtered::where_null`].
    fn where_not_null(self, key: impl Into<String>) -> Self {
        self.where_op(key, Operator::Ne, Bson::Null)
    }
}

impl Filtered for Filter {
    fn filter_mut(&mut self) -> &mut Filter {
        self
    }
}

fn into_array<I, V>(values: I) -> Bson
where
    I: IntoIterator<Item = V>,
    V: Into<Bson>,
{
    Bson::Array(
        values
            .into_iter()
            .map(Into::into)
            .collect(),
    )
}

/// Whether every key of a non-empty document is an operator (`$`-prefixed).
pub fn is_operator_document(document: &Document) -> bool {
    !document.is_empty() && document.keys().all(|key| key.starts_with('$'))
}

/// Rewrites native regular expressions of a filter document into `$regex`/`$options` pairs.
pub fn normalize_document(document: Document) -> Document {
    document
        .into_iter()
        .map(|(key, value)| {
            let value = match (key.as_str(), value) {
                (logical, Bson::Array(branches)) if LOGICAL_OPERATORS.contains(&logical) => {
                    Bson::Array(
                        branches
                            .into_iter()
                            .map(|branch| match branch {
                                Bson::Document(branch) => Bson::Document(normalize_document(branch)),
                                other => other,
                            })
                            .collect(),
                    )
                }
                // Operator arguments such as `$in` lists and `$not` keep native patterns.
                (operator, value) if operator.starts_with('$') => value,
                (_, value) => normalize_value(value),
            };

            (key, value)
        })
        .collect()
}

/// Normalizes a value sitting in field position.
pub fn normalize_value(value: Bson) -> Bson {
    match value {
        Bson::RegularExpression(regex) => Bson::Document(doc! {
            "$regex": regex.pattern.as_str(),
            "$options": regex.options.as_str(),
        }),
        Bson::Document(document) => Bson::Document(normalize_document(document)),
        other => other,
    }
}

/// Normalizes the `$match` stages of a pipeline, including `$lookup` and `$facet` sub-pipelines.
pub fn normalize_pipeline(stages: Vec<Document>) -> Vec<Document> {
    stages
        .into_iter()
        .map(normalize_stage)
        .collect()
}

fn normalize_stage(stage: Document) -> Document {
    stage
        .into_iter()
        .map(|(name, body)| {
            let body = match (name.as_str(), body) {
                ("$match", Bson::Document(filter)) => Bson::Document(normalize_document(filter)),
                ("$lookup", Bson::Document(mut lookup)) => {
                    if let Some(Bson::Array(pipeline)) = lookup.remove("pipeline") {
                        lookup.insert("pipeline", normalize_sub_pipeline(pipeline));
                    }
                    Bson::Document(lookup)
                }
                ("$facet", Bson::Document(facets)) => Bson::Document(
                    facets
                        .into_iter()
                        .map(|(facet, pipeline)| match pipeline {
                            Bson::Array(pipeline) => (facet, normalize_sub_pipeline(pipeline)),
                            other => (facet, other),
                        })
                        .collect(),
                ),
                (_, body) => body,
            };

            (name, body)
        })
        .collect()
}

fn normalize_sub_pipeline(pipeline: Vec<Bson>) -> Bson {
    Bson::Array(
        pipeline
            .into_iter()
            .map(|stage| match stage {
                Bson::Document(stage) => Bson::Document(normalize_stage(stage)),
                other => other,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::Regex;

    #[test]
    fn test_operator_parse() {
        assert_eq!(Operator::parse("="), Operator::Eq);
        assert_eq!(Operator::parse(" >= "), Operator::Gte);
        assert_eq!(Operator::parse("LIKE"), Operator::Like);
        assert_eq!(Operator::parse("Not In"), Operator::NotIn);
        assert_eq!(Operator::parse("size"), Operator::Other("$size".to_string()));
        assert_eq!(Operator::parse("$exists"), Operator::Other("$exists".to_string()));
    }

    #[test]
    fn test_operators_on_same_key_merge() {
        let filter = Filter::new()
            .where_op("age", ">", 18)
            .where_op("age", "<", 65);

        assert_eq!(
            filter.into_document(),
            doc! { "age": { "$gt": 18, "$lt": 65 } }
        );
    }

    #[test]
    fn test_equality_replaces_key() {
        let filter = Filter::new()
            .where_op("age", ">", 18)
            .where_eq("age", 30)
            .where_eq("name", "a")
            .where_eq("name", "b");

        assert_eq!(filter.into_document(), doc! { "age": 30, "name": "b" });
    }

    #[test]
    fn test_operator_after_equality_replaces_value() {
        let filter = Filter::new()
            .where_eq("age", 30)
            .where_op("age", "!=", 40);

        assert_eq!(filter.into_document(), doc! { "age": { "$ne": 40 } });
    }

    #[test]
    fn test_like_is_case_insensitive_regex() {
        let filter = Filter::new().where_like("name", "^jo");

        assert_eq!(
            filter.into_document(),
            doc! { "name": { "$regex": "^jo", "$options": "i" } }
        );
    }

    #[test]
    fn test_or_where_accumulates() {
        let filter = Filter::new()
            .where_eq("active", true)
            .or_where_eq("role", "admin")
            .or_where_op("age", ">=", 65)
            .or_where_group(|group| group.where_eq("a", 1).where_eq("b", 2));

        assert_eq!(
            filter.into_document(),
            doc! {
                "active": true,
                "$or": [
                    { "role": "admin" },
                    { "age": { "$gte": 65 } },
                    { "a": 1, "b": 2 },
                ],
            }
        );
    }

    #[test]
    fn test_empty_or_group_is_ignored() {
        let filter = Filter::new().or_where_group(|group| group);

        assert!(filter.is_empty());
    }

    #[test]
    fn test_where_doc_extends_logical_arrays() {
        let filter = Filter::new()
            .or_where_eq("a", 1)
            .where_doc(doc! { "$or": [{ "b": 2 }] })
            .where_doc(doc! { "age": { "$gt": 1 } })
            .where_doc(doc! { "age": { "$lt": 9 } });

        assert_eq!(
            filter.into_document(),
            doc! {
                "$or": [{ "a": 1 }, { "b": 2 }],
                "age": { "$gt": 1, "$lt": 9 },
            }
        );
    }

    #[test]
    fn test_in_and_null_helpers() {
        let filter = Filter::new()
            .where_in("tag", ["a", "b"])
            .where_not_in("status", [1, 2])
            .where_null("deleted_at")
            .where_not_null("email")
            .where_exists("name");

        assert_eq!(
            filter.into_document(),
            doc! {
                "tag": { "$in": ["a", "b"] },
                "status": { "$nin": [1, 2] },
                "deleted_at": null,
                "email": { "$ne": null },
                "name": { "$exists": true },
            }
        );
    }

    #[test]
    fn test_native_regex_is_normalized() {
        let regex = Regex {
            pattern: "^foo$".try_into().unwrap(),
            options: "i".try_into().unwrap(),
        };
        let filter = Filter::new()
            .where_eq("name", Bson::RegularExpression(regex.clone()))
            .where_doc(doc! {
                "$or": [{ "alias": Bson::RegularExpression(regex.clone()) }],
                "tags": { "$in": [Bson::RegularExpression(regex.clone())] },
            });

        let document = filter.into_document();

        assert_eq!(
            document.get_document("name").ok(),
            Some(&doc! { "$regex": "^foo$", "$options": "i" })
        );
        assert_eq!(
            document.get_array("$or").ok(),
            Some(&vec![Bson::Document(doc! {
                "alias": { "$regex": "^foo$", "$options": "i" }
            })])
        );
        assert_eq!(
            document.get_document("tags").ok(),
            Some(&doc! { "$in": [Bson::RegularExpression(regex)] })
        );
    }

    #[test]
    fn test_normalize_pipeline_reaches_sub_pipelines() {
        let regex = Bson::RegularExpression(Regex {
            pattern: "x".try_into().unwrap(),
            options: "".try_into().unwrap(),
        });
        let normalized = normalize_pipeline(vec![
            doc! { "$match": { "a": regex.clone() } },
            doc! { "$lookup": { "from": "b", "as": "bs", "pipeline": [{ "$match": { "b": regex.clone() } }] } },
            doc! { "$facet": { "f": [{ "$match": { "c": regex.clone() } }] } },
            doc! { "$project": { "d": regex.clone() } },
        ]);

        let expected = doc! { "$regex": "x", "$options": "" };

        assert_eq!(normalized[0], doc! { "$match": { "a": expected.clone() } });
        assert_eq!(
            normalized[1],
            doc! { "$lookup": { "from": "b", "as": "bs", "pipeline": [{ "$match": { "b": expected.clone() } }] } }
        );
        assert_eq!(normalized[2], doc! { "$facet": { "f": [{ "$match": { "c": expected } }] } });
        assert_eq!(normalized[3], doc! { "$project": { "d": regex } });
    }
}
