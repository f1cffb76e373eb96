//! Subscriptions: resolving the source event stream and re-executing the
//! selection set for every event.

use std::sync::Arc;

use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::executable::ExecutableDocument;
use apollo_compiler::executable::Operation;
use apollo_compiler::validation::Valid;
use futures::StreamExt;
use futures::stream;
use serde_json_bytes::Value as JsonValue;

use super::collect::FieldCollector;
use super::engine::ExecScope;
use super::engine::ExecutionContext;
use super::engine::ExecutionMode;
use super::engine::LinkedPathElement;
use super::engine::PropagateNull;
use super::engine::execute_collected;
use super::engine::field_error;
use super::engine::node_locations;
use super::engine::operation_kind_name;
use super::engine::select_operation;
use super::input_coercion::coerce_argument_values;
use super::input_coercion::coerce_variable_values;
use super::resolver::ObjectValue;
use crate::error::GraphQLError;
use crate::error::RequestError;
use crate::json_ext::Object as JsonMap;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::request::ExecutionConfig;
use crate::request::Request;
use crate::response::Response;
use crate::response::ResponseStream;
use crate::schema::Schema;

fn single(response: Response) -> ResponseStream {
    Box::pin(stream::once(async move { response }))
}

/// Subscribes to a subscription operation of a validated document.
///
/// The root resolver's [`subscribe`][super::resolver::Resolver::subscribe]
/// provides the source event stream; the operation's selection set executes
/// against each event, with incremental delivery disabled. Failures while
/// setting up the source stream yield a single error response.
pub async fn subscribe(
    schema: &Arc<Schema>,
    document: &Arc<Valid<ExecutableDocument>>,
    root: &Arc<ObjectValue>,
    request: Request,
) -> ResponseStream {
    let operation = match select_operation(document, request.operation_name.as_deref()) {
        Ok(operation) => operation.clone(),
        Err(error) => return single(Response::from_errors(vec![error.into()])),
    };
    let kind = operation.operation_type;
    if kind != ast::OperationType::Subscription {
        return single(Response::from_errors(vec![GraphQLError::new(format!(
            "Cannot subscribe to a {} operation.",
            operation_kind_name(kind)
        ))]));
    }
    let variables =
        match coerce_variable_values(schema, &operation, &request.variables, &document.sources) {
            Ok(variables) => variables,
            Err(errors) => return single(Response::from_errors(errors)),
        };
    let Some(root_type) = schema.root_operation(kind) else {
        return single(Response::from_errors(vec![
            RequestError::UnsupportedOperation("subscription").into(),
        ]));
    };
    let root_type = root_type.to_string();

    // The source event stream comes from the single root field.
    let collector = FieldCollector {
        schema,
        document,
        variables: &variables,
        incremental: false,
    };
    let collected = collector.collect_root(&root_type, &operation.selection_set);
    if collected.grouped.len() != 1 {
        return single(Response::from_errors(vec![
            RequestError::MultipleSubscriptionRoots.into(),
        ]));
    }
    let Some((key, group)) = collected.grouped.first() else {
        return single(Response::from_errors(vec![
            RequestError::MultipleSubscriptionRoots.into(),
        ]));
    };
    let field = &group.fields[0].field;
    let field_name = field.name.as_str();
    let field_path = Path::empty().child(PathElement::Key(key.as_str().to_owned()));
    let Some(field_def) = schema.type_field(&root_type, field_name) else {
        return single(Response::from_errors(vec![field_error(
            format!("Subscription root field '{field_name}' is not defined"),
            field_path,
            node_locations(field, &document.sources),
        )]));
    };
    let base = Path::empty();
    let element = LinkedPathElement {
        element: PathElement::Key(key.as_str().to_owned()),
        next: None,
    };
    let mut argument_errors = Vec::new();
    let arguments = coerce_argument_values(
        schema,
        &document.sources,
        &variables,
        &mut argument_errors,
        &base,
        Some(&element),
        field_def,
        field,
    );
    let arguments = match arguments {
        Ok(arguments) => arguments,
        Err(PropagateNull) => return single(Response::from_errors(argument_errors)),
    };
    let source_stream = match root.subscribe(field_name, &arguments).await {
        Ok(source_stream) => source_stream,
        Err(error) => {
            return single(Response::from_errors(vec![field_error(
                format!("resolver error: {}", error.message),
                field_path,
                node_locations(field, &document.sources),
            )]));
        }
    };

    let schema = schema.clone();
    let document = document.clone();
    let config = request.config;
    let root_type = Arc::new(root_type);
    Box::pin(source_stream.then(move |event| {
        let schema = schema.clone();
        let document = document.clone();
        let variables = variables.clone();
        let root_type = root_type.clone();
        let operation = operation.clone();
        async move {
            match event {
                Ok(event_root) => {
                    execute_event(
                        schema, document, variables, config, &root_type, &operation, &event_root,
                    )
                    .await
                }
                Err(error) => Response::from_errors(vec![GraphQLError::new(format!(
                    "resolver error: {}",
                    error.message
                ))]),
            }
        }
    }))
}

/// Executes the subscription selection set against one source event.
async fn execute_event(
    schema: Arc<Schema>,
    document: Arc<Valid<ExecutableDocument>>,
    variables: JsonMap,
    config: ExecutionConfig,
    root_type: &str,
    operation: &Node<Operation>,
    root: &Arc<ObjectValue>,
) -> Response {
    let ctx = Arc::new(ExecutionContext::new(
        schema, document, variables, config, false,
    ));
    let scope = ExecScope::root();
    let collector = FieldCollector {
        schema: &ctx.schema,
        document: &ctx.document,
        variables: &ctx.variables,
        incremental: false,
    };
    let collected = collector.collect_root(root_type, &operation.selection_set);
    let base = Path::empty();
    let result = execute_collected(
        &ctx,
        &scope,
        ExecutionMode::Normal,
        root_type,
        root,
        &collected,
        &base,
        None,
        0,
    )
    .await;
    let data = match result {
        Ok(map) => JsonValue::Object(map),
        Err(PropagateNull) => JsonValue::Null,
    };
    Response::from_data(data, scope.take_errors())
}
