//! Error types for GraphQL execution.

use std::cmp::Ordering;

use displaydoc::Display;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::json_ext::Object;
use crate::json_ext::Path;

/// A [GraphQL error](https://spec.graphql.org/October2021/#sec-Errors)
/// as it appears in the `errors` list of a response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLError {
    /// The error message.
    pub message: String,

    /// The locations of the error in the query, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,

    /// The path of the response field that raised the error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,

    /// The optional GraphQL extensions for this error.
    #[serde(default, skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

/// A (line, column) location in the request document, 1-indexed.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl GraphQLError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Total order used to sort the `errors` list of a response:
    /// locations first, then path, then message.
    pub(crate) fn compare(&self, other: &Self) -> Ordering {
        self.locations
            .cmp(&other.locations)
            .then_with(|| self.path.cmp(&other.path))
            .then_with(|| self.message.cmp(&other.message))
    }
}

/// Errors raised while preparing a request, before any field executes.
///
/// These become a response with `errors` and no `data`.
#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum RequestError {
    /// Unknown operation named "{0}"
    UnknownOperation(String),

    /// Must provide operation name if query contains multiple operations.
    AmbiguousOperation,

    /// Must provide an operation.
    NoOperation,

    /// Schema is not configured for {0}s.
    UnsupportedOperation(&'static str),

    /// Subscriptions must have a single root field.
    MultipleSubscriptionRoots,
}

impl From<RequestError> for GraphQLError {
    fn from(error: RequestError) -> Self {
        GraphQLError::new(error.to_string())
    }
}

/// Errors raised while loading a schema.
#[derive(Debug, Display, Error)]
pub enum SchemaError {
    /// GraphQL parser or validation error(s): {0}
    Parse(String),
}

/// Marker returned by input coercion when a value does not match its type.
///
/// The caller is responsible for recording a located error.
#[derive(Debug)]
pub(crate) struct InvalidValue;
