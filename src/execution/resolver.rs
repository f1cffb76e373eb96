//! The resolver contract between the engine and host data sources.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json_bytes::Value as JsonValue;

use crate::json_ext::Object as JsonMap;

/// A GraphQL object whose fields can be resolved during execution.
pub type ObjectValue = dyn Resolver;

/// The stream of source events backing a subscription root field.
pub type SourceEventStream = BoxStream<'static, Result<Arc<ObjectValue>, ResolverError>>;

/// Future type returned by [`Resolver`] methods.
///
/// Spelled out as an alias so that [`impl_resolver!`][crate::impl_resolver]
/// can name it without reaching into `futures` from the caller's crate.
pub type ResolveFuture<'a> = BoxFuture<'a, Result<ResolvedValue, ResolverError>>;

pub type SubscribeFuture<'a> = BoxFuture<'a, Result<SourceEventStream, ResolverError>>;

/// Abstraction for implementing field resolvers. Used through [`ObjectValue`].
///
/// Use the [`impl_resolver!`][crate::impl_resolver] macro to implement this
/// trait with reduced boilerplate.
pub trait Resolver: Send + Sync {
    /// Returns the name of the concrete object type this resolver represents
    ///
    /// That name is expected to be that of an object type defined in the schema.
    /// This is called when the schema indicates an abstract (interface or union) type.
    fn type_name(&self) -> &str;

    /// Resolves a field of this object with the given arguments
    ///
    /// The resolved value is expected to match the type of the corresponding
    /// field definition in the schema.
    fn resolve_field<'a>(&'a self, field_name: &'a str, arguments: &'a JsonMap)
    -> ResolveFuture<'a>;

    /// Resolves the source event stream for a subscription root field.
    ///
    /// Each event is the root object against which the subscription's
    /// selection set executes.
    fn subscribe<'a>(&'a self, field_name: &'a str, _arguments: &'a JsonMap) -> SubscribeFuture<'a> {
        Box::pin(async move {
            Err(ResolverError::from(format!(
                "field {field_name} in type {} does not support subscriptions",
                self.type_name()
            )))
        })
    }
}

/// An error returned by a resolver, turned into a field error at the
/// requesting field's location and path.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub struct ResolverError {
    pub message: String,
}

impl From<String> for ResolverError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for ResolverError {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_owned(),
        }
    }
}

/// Implements the [`Resolver`] trait with reduced boilerplate
///
/// Define:
///
/// * The implementing Rust type
/// * The __typename string
/// * One pseudo-method per field. Types are omitted in the signature for brevity.
///   - Takes two optional arguments: `&self` (which must be spelled something else because macros)
///     and `args` for the coerced field arguments.
///   - The body is an async block returning `Result<ResolvedValue, ResolverError>`,
///     `Err` is turned into a field error.
#[macro_export]
macro_rules! impl_resolver {
    (
        for $ty: ty:
        __typename = $type_name: expr;
        $(
            fn $field_name: ident(
                $( &$self_: ident $(, $( $args: ident $(,)? )? )? )?
            ) $block: block
        )*

    ) => {
        impl $crate::Resolver for $ty {
            fn type_name(&self) -> &str {
                $type_name
            }

            fn resolve_field<'a>(
                &'a self,
                field_name: &'a str,
                arguments: &'a $crate::Object,
            ) -> $crate::ResolveFuture<'a> {
                let _allow_unused = arguments;
                ::std::boxed::Box::pin(async move {
                    match field_name {
                        $(
                            stringify!($field_name) => {
                                $(
                                    let $self_ = self;
                                    $($(
                                        let $args = arguments;
                                    )?)?
                                )?
                                return $block
                            },
                        )*
                        _ => Err($crate::ResolverError::from(format!(
                            "unexpected field name: {field_name} in type {}",
                            $crate::Resolver::type_name(self),
                        ))),
                    }
                })
            }
        }
    };
}

/// The value of a resolved field
pub enum ResolvedValue {
    /// * JSON null represents GraphQL null
    /// * A GraphQL enum value is represented as a JSON string
    /// * GraphQL built-in scalars are coerced according to their respective *Result Coercion* spec
    /// * For custom scalars, any JSON value is passed through as-is (including array or object)
    Leaf(JsonValue),

    /// Expected where the GraphQL type is an object, interface, or union type
    Object(Arc<ObjectValue>),

    /// Expected for GraphQL list types
    List(Vec<ResolvedValue>),

    /// An asynchronous list source, consumed item by item.
    ///
    /// Fields of list type resolved to a stream can be the target of
    /// `@stream`; without the directive the stream is drained before the
    /// field completes.
    Stream(BoxStream<'static, Result<ResolvedValue, ResolverError>>),
}

impl std::fmt::Debug for ResolvedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leaf(value) => f.debug_tuple("Leaf").field(value).finish(),
            Self::Object(resolver) => f.debug_tuple("Object").field(&resolver.type_name()).finish(),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
            Self::Stream(_) => f.debug_tuple("Stream").finish_non_exhaustive(),
        }
    }
}

impl ResolvedValue {
    /// Construct a null leaf resolved value
    pub fn null() -> Self {
        Self::Leaf(JsonValue::Null)
    }

    /// Construct a leaf resolved value from something that is convertible to JSON
    pub fn leaf(json: impl Into<JsonValue>) -> Self {
        Self::Leaf(json.into())
    }

    /// Construct an object resolved value from the resolver for that object
    pub fn object(resolver: impl Resolver + 'static) -> Self {
        Self::Object(Arc::new(resolver))
    }

    /// Construct an object resolved value or null, from an optional resolver
    pub fn opt_object(opt_resolver: Option<impl Resolver + 'static>) -> Self {
        match opt_resolver {
            Some(resolver) => Self::Object(Arc::new(resolver)),
            None => Self::null(),
        }
    }

    /// Construct a list resolved value from an iterator
    pub fn list<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        Self::List(iter.into_iter().collect())
    }

    /// Construct a streamed list resolved value from an asynchronous source
    pub fn stream(
        stream: impl futures::Stream<Item = Result<ResolvedValue, ResolverError>> + Send + 'static,
    ) -> Self {
        Self::Stream(Box::pin(stream))
    }
}

/// Resolver over plain JSON data: each field resolves by key lookup in an
/// object, and the concrete type of an abstract value is read from its
/// `__typename` member.
pub struct JsonResolver {
    type_name: String,
    fields: JsonMap,
}

impl JsonResolver {
    pub fn new(type_name: impl Into<String>, fields: JsonMap) -> Self {
        Self {
            type_name: type_name.into(),
            fields,
        }
    }

    /// Wraps a JSON object with no statically-known type name. Completing it
    /// against an abstract type requires a `__typename` member.
    pub(crate) fn untyped(fields: JsonMap) -> Self {
        Self::new(String::new(), fields)
    }
}

impl Resolver for JsonResolver {
    fn type_name(&self) -> &str {
        self.fields
            .get("__typename")
            .and_then(JsonValue::as_str)
            .unwrap_or(&self.type_name)
    }

    fn resolve_field<'a>(
        &'a self,
        field_name: &'a str,
        _arguments: &'a JsonMap,
    ) -> ResolveFuture<'a> {
        // Nested objects and arrays stay leaves here: value completion
        // re-wraps them based on the field's schema type, so that custom
        // scalar results pass through untouched.
        let value = self.fields.get(field_name).cloned().unwrap_or(JsonValue::Null);
        Box::pin(async move { Ok(ResolvedValue::Leaf(value)) })
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    struct QueryResolver {
        world: String,
    }

    impl_resolver! {
        for QueryResolver:

        __typename = "Query";

        fn null() {
            Ok(ResolvedValue::null())
        }

        fn hello(&self_) {
            Ok(ResolvedValue::list([
                ResolvedValue::leaf(format!("Hello {}!", self_.world)),
                ResolvedValue::leaf(format!("Hello {}!", self_.world)),
            ]))
        }

        fn echo(&_self, args) {
            Ok(ResolvedValue::leaf(args["value"].clone()))
        }
    }

    #[tokio::test]
    async fn macro_resolver_dispatches_fields() {
        let resolver = QueryResolver {
            world: "world".to_owned(),
        };
        let args = JsonMap::new();
        match resolver.resolve_field("hello", &args).await.unwrap() {
            ResolvedValue::List(items) => assert_eq!(items.len(), 2),
            _ => panic!("expected a list"),
        }
        let error = resolver.resolve_field("nope", &args).await.unwrap_err();
        assert!(error.message.contains("unexpected field name"));
    }

    #[tokio::test]
    async fn json_resolver_reads_typename() {
        let resolver = JsonResolver::untyped(
            json!({"__typename": "Cat", "name": "Whiskers"})
                .as_object()
                .unwrap()
                .clone(),
        );
        assert_eq!(resolver.type_name(), "Cat");
        let args = JsonMap::new();
        match resolver.resolve_field("name", &args).await.unwrap() {
            ResolvedValue::Leaf(value) => assert_eq!(value, json!("Whiskers")),
            _ => panic!("expected a leaf"),
        }
    }
}
