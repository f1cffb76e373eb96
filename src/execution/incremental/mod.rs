//! Incremental delivery: bookkeeping for `@defer` fragments and `@stream`
//! continuations, and the publisher that turns their progress into
//! subsequent payloads.

use futures::future::BoxFuture;
use serde_json_bytes::Value as JsonValue;

use crate::error::GraphQLError;
use crate::json_ext::Object as JsonMap;

pub(crate) mod graph;
pub(crate) mod publisher;

/// A unit of deferred work: a deferred grouped field set executing, or one
/// step of a streamed list.
pub(crate) type IncrementalFuture = BoxFuture<'static, TaskEvent>;

pub(crate) enum TaskEvent {
    /// A deferred grouped field set finished executing. `Err` carries the
    /// errors of a failed (null-propagated-to-the-root) branch.
    GfsCompleted {
        gfs: usize,
        result: Result<(JsonMap, Vec<GraphQLError>), Vec<GraphQLError>>,
    },
    /// One step of a streamed list. `next` re-arms the continuation when the
    /// source has more items.
    StreamItem {
        stream: usize,
        event: StreamEvent,
        next: Option<IncrementalFuture>,
    },
}

pub(crate) enum StreamEvent {
    /// A completed item, possibly null with its field errors attached.
    Item {
        value: JsonValue,
        errors: Vec<GraphQLError>,
    },
    /// The stream failed: a source error, or an item error on a non-null
    /// item type.
    Fatal { errors: Vec<GraphQLError> },
    /// The source is exhausted.
    Done,
}
