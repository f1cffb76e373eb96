//! A GraphQL execution engine over [`apollo_compiler`] documents.
//!
//! The engine takes a validated schema and operation document, a tree of
//! [`Resolver`]s for the underlying data, and produces JSON responses:
//! complete ones, or an initial response followed by incremental payloads
//! when the operation uses `@defer` or `@stream`.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use apollo_compiler::ExecutableDocument;
//! use graphql_executor::JsonResolver;
//! use graphql_executor::ObjectValue;
//! use graphql_executor::Request;
//! use graphql_executor::Schema;
//! use graphql_executor::execute;
//! use serde_json_bytes::json;
//!
//! # #[tokio::main] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let schema = Arc::new(Schema::parse("type Query { hello: String }")?);
//! let document = Arc::new(ExecutableDocument::parse_and_validate(
//!     schema.definitions(),
//!     "{ hello }",
//!     "query.graphql",
//! ).map_err(|invalid| invalid.errors.to_string())?);
//! let root: Arc<ObjectValue> = Arc::new(JsonResolver::new(
//!     "Query",
//!     json!({"hello": "world"}).as_object().unwrap().clone(),
//! ));
//! let response = execute(&schema, &document, &root, Request::default()).await;
//! println!("{}", serde_json::to_string(response.initial())?);
//! # Ok(()) }
//! ```

pub mod error;
pub mod execution;
pub mod json_ext;
pub mod request;
pub mod response;
pub mod schema;

pub use crate::error::GraphQLError;
pub use crate::error::Location;
pub use crate::error::RequestError;
pub use crate::error::SchemaError;
pub use crate::execution::JsonResolver;
pub use crate::execution::ObjectValue;
pub use crate::execution::ResolveFuture;
pub use crate::execution::ResolvedValue;
pub use crate::execution::Resolver;
pub use crate::execution::ResolverError;
pub use crate::execution::SourceEventStream;
pub use crate::execution::SubscribeFuture;
pub use crate::execution::execute;
pub use crate::execution::subscribe;
pub use crate::json_ext::Object;
pub use crate::json_ext::Path;
pub use crate::json_ext::PathElement;
pub use crate::request::ExecutionConfig;
pub use crate::request::Request;
pub use crate::response::CompletedResult;
pub use crate::response::ExecutionResponse;
pub use crate::response::IncrementalDeferResult;
pub use crate::response::IncrementalResult;
pub use crate::response::IncrementalStreamResult;
pub use crate::response::PendingResult;
pub use crate::response::Response;
pub use crate::response::ResponseStream;
pub use crate::response::SubsequentResponse;
pub use crate::response::SubsequentStream;
pub use crate::schema::Schema;
