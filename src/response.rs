//! Response shapes, including the incremental-delivery payloads.

use std::pin::Pin;

use futures::Stream;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::Value;

use crate::error::GraphQLError;
use crate::json_ext::Object;
use crate::json_ext::Path;

/// A GraphQL response, either a complete result or the initial payload of an
/// incremental-delivery response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// The response data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// The list of errors that occurred during execution, sorted by
    /// (locations, path, message).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,

    /// Deferred fragments and streams whose results will follow, in
    /// parent-before-child order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<PendingResult>,

    /// `Some(true)` when subsequent payloads follow this one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_next: Option<bool>,

    /// Host-defined entries, outside the scope of execution itself.
    #[serde(default, skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

impl Response {
    /// A response carrying only request-level errors, with no `data` member.
    pub fn from_errors(errors: Vec<GraphQLError>) -> Self {
        Self {
            errors: sorted(errors),
            ..Default::default()
        }
    }

    pub(crate) fn from_data(data: Value, errors: Vec<GraphQLError>) -> Self {
        Self {
            data: Some(data),
            errors: sorted(errors),
            ..Default::default()
        }
    }
}

/// A payload delivered after the initial response of an incremental-delivery
/// response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubsequentResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<PendingResult>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub incremental: Vec<IncrementalResult>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub completed: Vec<CompletedResult>,

    pub has_next: bool,

    #[serde(default, skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

/// Announces a deferred fragment or a stream whose data will be delivered in
/// later payloads.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingResult {
    /// Identifier referenced by later `incremental` and `completed` entries.
    pub id: String,

    /// Where in the response data the pending results will be merged.
    pub path: Path,

    /// The `label` argument of the `@defer` or `@stream` directive, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A batch of incremental data for one pending result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IncrementalResult {
    Defer(IncrementalDeferResult),
    Stream(IncrementalStreamResult),
}

/// Data for a deferred fragment, merged at the pending path plus `sub_path`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalDeferResult {
    pub data: Value,

    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<Path>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

/// A batch of stream items, appended at the pending path.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalStreamResult {
    pub items: Vec<Value>,

    pub id: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

/// Marks a pending result as done. With `errors`, the branch failed and its
/// data was discarded.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedResult {
    pub id: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

/// The stream of payloads following the initial response.
pub type SubsequentStream = Pin<Box<dyn Stream<Item = SubsequentResponse> + Send>>;

/// The stream of responses produced by a subscription.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Response> + Send>>;

/// The outcome of [`execute`][crate::execute]: a single complete response, or
/// an initial response followed by incremental payloads.
pub enum ExecutionResponse {
    Single(Response),
    Incremental {
        initial: Response,
        subsequent: SubsequentStream,
    },
}

impl ExecutionResponse {
    /// The initial (or only) response.
    pub fn initial(&self) -> &Response {
        match self {
            Self::Single(response) => response,
            Self::Incremental { initial, .. } => initial,
        }
    }
}

pub(crate) fn sorted(mut errors: Vec<GraphQLError>) -> Vec<GraphQLError> {
    errors.sort_by(GraphQLError::compare);
    errors
}
