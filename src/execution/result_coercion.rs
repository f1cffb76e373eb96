//! Value completion: coercing a resolved value to the field's schema type,
//! recursing into lists and objects, registering `@stream` continuations.

use std::sync::Arc;

use apollo_compiler::ast::Type;
use apollo_compiler::schema::ExtendedType;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::future::join_all;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use serde_json_bytes::Value as JsonValue;

use super::collect::FieldGroup;
use super::collect::stream_usage;
use super::engine::ExecScope;
use super::engine::ExecutionContext;
use super::engine::ExecutionMode;
use super::engine::LinkedPath;
use super::engine::LinkedPathElement;
use super::engine::PropagateNull;
use super::engine::execute_collected;
use super::engine::field_error;
use super::engine::materialize_path;
use super::engine::node_locations;
use super::engine::try_nullify;
use super::incremental::IncrementalFuture;
use super::incremental::StreamEvent;
use super::incremental::TaskEvent;
use super::resolver::JsonResolver;
use super::resolver::ResolvedValue;
use super::resolver::ResolverError;
use crate::json_ext::Path;
use crate::json_ext::PathElement;

/// Completes a resolved value against the field's type.
///
/// The `Err` case signals null propagation towards the enclosing nullable
/// position; the error itself is already in the scope's sink.
#[allow(clippy::too_many_arguments)]
pub(crate) fn complete_value<'a>(
    ctx: &'a Arc<ExecutionContext>,
    scope: &'a ExecScope,
    parent_type: &'a str,
    ty: &'a Type,
    resolved: ResolvedValue,
    group: &'a FieldGroup,
    base: &'a Path,
    path: LinkedPath<'a>,
    depth: usize,
) -> BoxFuture<'a, Result<JsonValue, PropagateNull>> {
    Box::pin(async move {
        let field = &group.fields[0].field;
        macro_rules! fail {
            ($($message: tt)+) => {{
                scope.record(field_error(
                    format!($($message)+),
                    materialize_path(base, path),
                    node_locations(field, ctx.sources()),
                ));
                return Err(PropagateNull);
            }};
        }
        if depth >= ctx.config.recursion_limit {
            fail!(
                "Maximum value completion depth of {} exceeded",
                ctx.config.recursion_limit
            );
        }
        if let ResolvedValue::Leaf(JsonValue::Null) = resolved {
            if ty.is_non_null() {
                fail!(
                    "Cannot return null for non-nullable field {parent_type}.{}.",
                    field.name
                );
            }
            return Ok(JsonValue::Null);
        }
        let type_name = match ty {
            Type::List(inner) | Type::NonNullList(inner) => {
                return match resolved {
                    ResolvedValue::Stream(stream) => {
                        complete_stream(
                            ctx,
                            scope,
                            parent_type,
                            ty,
                            inner,
                            stream,
                            group,
                            base,
                            path,
                            depth,
                        )
                        .await
                    }
                    ResolvedValue::List(items) => {
                        complete_list(ctx, scope, parent_type, ty, inner, items, group, base, path, depth)
                            .await
                    }
                    ResolvedValue::Leaf(JsonValue::Array(items)) => {
                        // Plain JSON data: items become leaves and completion
                        // re-wraps each per the inner type.
                        let items = items.into_iter().map(ResolvedValue::Leaf).collect();
                        complete_list(ctx, scope, parent_type, ty, inner, items, group, base, path, depth)
                            .await
                    }
                    _ => fail!("Fields of list type {ty} must be resolved to a list"),
                };
            }
            Type::Named(name) | Type::NonNullNamed(name) => name,
        };
        let Some(type_def) = ctx.schema.get_type(type_name) else {
            fail!("Undefined type {type_name}");
        };
        let object = match resolved {
            ResolvedValue::List(_) => {
                fail!("Resolver returned a list where type {type_name} was expected")
            }
            ResolvedValue::Stream(_) => {
                fail!("Resolver returned a stream where type {type_name} was expected")
            }
            ResolvedValue::Leaf(json_value) => match type_def {
                ExtendedType::Object(_) | ExtendedType::Interface(_) | ExtendedType::Union(_) => {
                    // Plain JSON data for a composite type.
                    if let JsonValue::Object(fields) = json_value {
                        Arc::new(JsonResolver::untyped(fields)) as Arc<super::resolver::ObjectValue>
                    } else {
                        fail!(
                            "Resolver returned a leaf value where an object of type {type_name} \
                             was expected"
                        );
                    }
                }
                ExtendedType::InputObject(_) => {
                    fail!("Field with input object type {type_name}");
                }
                ExtendedType::Enum(enum_def) => {
                    return if json_value
                        .as_str()
                        .is_some_and(|name| enum_def.values.contains_key(name))
                    {
                        Ok(json_value)
                    } else {
                        fail!("Enum {type_name} cannot represent value: {json_value}");
                    };
                }
                ExtendedType::Scalar(_) => {
                    let valid = match type_name.as_str() {
                        "Int" => json_value
                            .as_i64()
                            .is_some_and(|int| i32::try_from(int).is_ok()),
                        "Float" => json_value.is_f64() || json_value.is_i64(),
                        "String" => json_value.is_string(),
                        "Boolean" => json_value.is_boolean(),
                        "ID" => json_value.is_string() || json_value.is_i64(),
                        // Custom scalar: any JSON value passes through.
                        _ => true,
                    };
                    return if valid {
                        Ok(json_value)
                    } else {
                        fail!("Scalar {type_name} cannot represent value: {json_value}");
                    };
                }
            },
            ResolvedValue::Object(object) => match type_def {
                ExtendedType::Enum(_) | ExtendedType::Scalar(_) => {
                    fail!("Resolver returned an object where a {type_name} value was expected")
                }
                _ => object,
            },
        };
        let object_type_name = match type_def {
            ExtendedType::Interface(_) | ExtendedType::Union(_) => {
                let name = object.type_name();
                if name.is_empty() {
                    fail!(
                        "Abstract type {type_name} must resolve to an object type, \
                         but no concrete type name was provided"
                    );
                }
                if ctx.schema.get_object(name).is_none() {
                    fail!("Resolver returned unknown object type '{name}'");
                }
                if !ctx.schema.is_subtype(type_name, name) {
                    fail!(
                        "Runtime object type '{name}' is not a possible type \
                         for abstract type '{type_name}'"
                    );
                }
                name.to_owned()
            }
            _ => type_name.as_str().to_owned(),
        };
        let collected = ctx.collect_subfields(&object_type_name, group);
        execute_collected(
            ctx,
            scope,
            ExecutionMode::Normal,
            &object_type_name,
            &object,
            &collected,
            base,
            path,
            depth + 1,
        )
        .await
        .map(JsonValue::Object)
    })
}

/// Completes the items of a materialized list concurrently, bubbling an item
/// error to the list position when the inner type is non-null.
#[allow(clippy::too_many_arguments)]
async fn complete_list(
    ctx: &Arc<ExecutionContext>,
    scope: &ExecScope,
    parent_type: &str,
    list_ty: &Type,
    inner: &Type,
    items: Vec<ResolvedValue>,
    group: &FieldGroup,
    base: &Path,
    path: LinkedPath<'_>,
    depth: usize,
) -> Result<JsonValue, PropagateNull> {
    let branches = items.into_iter().enumerate().map(|(index, item)| async move {
        let element = LinkedPathElement {
            element: PathElement::Index(index),
            next: path,
        };
        complete_value(
            ctx,
            scope,
            parent_type,
            inner,
            item,
            group,
            base,
            Some(&element),
            depth + 1,
        )
        .await
    });
    let results = join_all(branches).await;
    let mut completed = Vec::with_capacity(results.len());
    for result in results {
        match try_nullify(inner, result) {
            Ok(value) => completed.push(value),
            Err(PropagateNull) => return try_nullify(list_ty, Err(PropagateNull)),
        }
    }
    Ok(JsonValue::Array(completed))
}

/// Completes a streamed list: items up to `initialCount` inline, the rest as
/// a continuation task in the incremental graph. Without an active `@stream`
/// the source is drained entirely.
#[allow(clippy::too_many_arguments)]
async fn complete_stream(
    ctx: &Arc<ExecutionContext>,
    scope: &ExecScope,
    parent_type: &str,
    list_ty: &Type,
    inner: &Type,
    mut stream: BoxStream<'static, Result<ResolvedValue, ResolverError>>,
    group: &FieldGroup,
    base: &Path,
    path: LinkedPath<'_>,
    depth: usize,
) -> Result<JsonValue, PropagateNull> {
    let field = &group.fields[0].field;
    let usage = stream_usage(group, &ctx.variables, ctx.incremental);
    let inline_count = usage.as_ref().map(|usage| usage.initial_count);
    let mut completed = Vec::new();
    let mut index = 0usize;
    let mut exhausted = false;
    while inline_count.map_or(true, |count| index < count) {
        match stream.next().await {
            None => {
                exhausted = true;
                break;
            }
            Some(Err(error)) => {
                let element = LinkedPathElement {
                    element: PathElement::Index(index),
                    next: path,
                };
                scope.record(field_error(
                    format!("resolver error: {}", error.message),
                    materialize_path(base, Some(&element)),
                    node_locations(field, ctx.sources()),
                ));
                return try_nullify(list_ty, Err(PropagateNull));
            }
            Some(Ok(item)) => {
                let element = LinkedPathElement {
                    element: PathElement::Index(index),
                    next: path,
                };
                let result = complete_value(
                    ctx,
                    scope,
                    parent_type,
                    inner,
                    item,
                    group,
                    base,
                    Some(&element),
                    depth + 1,
                )
                .await;
                match try_nullify(inner, result) {
                    Ok(value) => completed.push(value),
                    Err(PropagateNull) => return try_nullify(list_ty, Err(PropagateNull)),
                }
                index += 1;
            }
        }
    }
    if !exhausted {
        if let Some(usage) = usage {
            let stream_path = materialize_path(base, path);
            let item_scope = ExecScope {
                errors: Arc::new(Mutex::new(Vec::new())),
                defer_usage_set: scope.defer_usage_set.clone(),
                defer_map: scope.defer_map.clone(),
                parent_fragment: scope.parent_fragment,
            };
            let mut graph = ctx.graph.lock();
            let slot = graph.register_stream(stream_path.clone(), usage.label, scope.parent_fragment);
            graph.push_task(stream_item_task(
                ctx.clone(),
                item_scope,
                parent_type.to_owned(),
                inner.clone(),
                group.clone(),
                stream_path,
                index,
                stream,
                slot,
            ));
        }
    }
    Ok(JsonValue::Array(completed))
}

/// One step of a streamed list's continuation: pull the next source item,
/// complete it, and re-arm for the following index.
#[allow(clippy::too_many_arguments)]
pub(crate) fn stream_item_task(
    ctx: Arc<ExecutionContext>,
    scope: ExecScope,
    parent_type: String,
    inner: Type,
    group: FieldGroup,
    list_path: Path,
    index: usize,
    mut stream: BoxStream<'static, Result<ResolvedValue, ResolverError>>,
    slot: usize,
) -> IncrementalFuture {
    Box::pin(async move {
        match stream.next().await {
            None => TaskEvent::StreamItem {
                stream: slot,
                event: StreamEvent::Done,
                next: None,
            },
            Some(Err(error)) => {
                let path = list_path.child(PathElement::Index(index));
                let error = field_error(
                    format!("resolver error: {}", error.message),
                    path,
                    node_locations(&group.fields[0].field, ctx.sources()),
                );
                TaskEvent::StreamItem {
                    stream: slot,
                    event: StreamEvent::Fatal {
                        errors: vec![error],
                    },
                    next: None,
                }
            }
            Some(Ok(item)) => {
                let item_scope = ExecScope {
                    errors: Arc::new(Mutex::new(Vec::new())),
                    ..scope.clone()
                };
                let element = LinkedPathElement {
                    element: PathElement::Index(index),
                    next: None,
                };
                let result = complete_value(
                    &ctx,
                    &item_scope,
                    &parent_type,
                    &inner,
                    item,
                    &group,
                    &list_path,
                    Some(&element),
                    0,
                )
                .await;
                let errors = item_scope.take_errors();
                match try_nullify(&inner, result) {
                    Ok(value) => {
                        // Yield between items so a fast source cannot starve
                        // other incremental work.
                        tokio::task::yield_now().await;
                        let next = stream_item_task(
                            ctx,
                            scope,
                            parent_type,
                            inner,
                            group,
                            list_path,
                            index + 1,
                            stream,
                            slot,
                        );
                        TaskEvent::StreamItem {
                            stream: slot,
                            event: StreamEvent::Item { value, errors },
                            next: Some(next),
                        }
                    }
                    Err(PropagateNull) => TaskEvent::StreamItem {
                        stream: slot,
                        event: StreamEvent::Fatal { errors },
                        next: None,
                    },
                }
            }
        }
    })
}
