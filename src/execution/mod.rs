//! Execution of GraphQL operations against resolver-backed data.

pub(crate) mod collect;
pub(crate) mod engine;
pub(crate) mod incremental;
pub(crate) mod input_coercion;
pub(crate) mod plan;
pub(crate) mod resolver;
pub(crate) mod result_coercion;
pub(crate) mod subscription;

pub use engine::execute;
pub use resolver::JsonResolver;
pub use resolver::ObjectValue;
pub use resolver::ResolveFuture;
pub use resolver::ResolvedValue;
pub use resolver::Resolver;
pub use resolver::ResolverError;
pub use resolver::SourceEventStream;
pub use resolver::SubscribeFuture;
pub use subscription::subscribe;
