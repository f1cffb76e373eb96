//! The evaluator: operation dispatch, field execution, and the shared
//! execution state.

use std::collections::HashMap;
use std::sync::Arc;

use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::executable::ExecutableDocument;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Operation;
use apollo_compiler::parser::SourceMap;
use apollo_compiler::validation::Valid;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json_bytes::ByteString;
use serde_json_bytes::Value as JsonValue;

use super::collect::CollectedFields;
use super::collect::DeferUsage;
use super::collect::FieldCollector;
use super::collect::FieldGroup;
use super::collect::GroupedFieldSet;
use super::collect::TYPENAME;
use super::incremental::TaskEvent;
use super::incremental::graph::IncrementalGraph;
use super::incremental::publisher;
use super::input_coercion::coerce_argument_values;
use super::input_coercion::coerce_variable_values;
use super::plan::DeferUsageSet;
use super::plan::build_field_plan;
use super::result_coercion::complete_value;
use crate::error::GraphQLError;
use crate::error::Location;
use crate::error::RequestError;
use crate::json_ext::Object as JsonMap;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::request::ExecutionConfig;
use crate::request::Request;
use crate::response::ExecutionResponse;
use crate::response::Response;
use crate::schema::Schema;

use super::resolver::ObjectValue;

/// Marker for a field error that is being propagated to the nearest nullable
/// ancestor. The error itself was already recorded at the deepest site.
#[derive(Debug)]
pub(crate) struct PropagateNull;

/// Linked-list response path, cheap to extend per field or list item and
/// materialized into a [`Path`] only when an error or incremental record
/// needs it.
pub(crate) type LinkedPath<'a> = Option<&'a LinkedPathElement<'a>>;

pub(crate) struct LinkedPathElement<'a> {
    pub(crate) element: PathElement,
    pub(crate) next: LinkedPath<'a>,
}

/// The full response path: the owned prefix a branch execution started from,
/// plus the linked suffix built while walking it.
pub(crate) fn materialize_path(base: &Path, linked: LinkedPath<'_>) -> Path {
    let mut suffix = Vec::new();
    let mut current = linked;
    while let Some(element) = current {
        suffix.push(element.element.clone());
        current = element.next;
    }
    suffix.reverse();
    let mut segments = base.0.clone();
    segments.extend(suffix);
    Path(segments)
}

pub(crate) fn field_error(
    message: impl Into<String>,
    path: Path,
    locations: Vec<Location>,
) -> GraphQLError {
    GraphQLError {
        message: message.into(),
        locations,
        path: Some(path),
        extensions: Default::default(),
    }
}

pub(crate) fn node_locations<T>(node: &Node<T>, sources: &SourceMap) -> Vec<Location> {
    node.line_column_range(sources)
        .map(|range| Location {
            line: range.start.line as u32,
            column: range.start.column as u32,
        })
        .into_iter()
        .collect()
}

/// Nullifies a propagating error at the first nullable type, per the
/// non-null bubbling rule.
pub(crate) fn try_nullify(
    ty: &ast::Type,
    result: Result<JsonValue, PropagateNull>,
) -> Result<JsonValue, PropagateNull> {
    match result {
        Ok(value) => Ok(value),
        Err(PropagateNull) => {
            if ty.is_non_null() {
                Err(PropagateNull)
            } else {
                Ok(JsonValue::Null)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ExecutionMode {
    /// Independently resolve sibling fields, reassembling in declaration
    /// order.
    Normal,
    /// Top-level mutation fields: one completes fully before the next starts.
    Sequential,
}

/// Per-request execution state shared by every branch.
pub(crate) struct ExecutionContext {
    pub(crate) schema: Arc<Schema>,
    pub(crate) document: Arc<Valid<ExecutableDocument>>,
    pub(crate) variables: JsonMap,
    pub(crate) config: ExecutionConfig,
    /// Whether `@defer`/`@stream` are honored for this request.
    pub(crate) incremental: bool,
    pub(crate) graph: Mutex<IncrementalGraph>,
    subfields_cache: DashMap<SubfieldsKey, Arc<CollectedFields>>,
}

/// Memo key: runtime type plus the identity of the field-node list (and its
/// defer tags), stable for the lifetime of the request's document.
type SubfieldsKey = (String, Vec<(usize, usize)>);

fn usage_key(usage: &Arc<DeferUsage>) -> usize {
    Arc::as_ptr(usage) as usize
}

impl ExecutionContext {
    pub(crate) fn new(
        schema: Arc<Schema>,
        document: Arc<Valid<ExecutableDocument>>,
        variables: JsonMap,
        config: ExecutionConfig,
        incremental: bool,
    ) -> Self {
        Self {
            schema,
            document,
            variables,
            config,
            incremental,
            graph: Mutex::new(IncrementalGraph::default()),
            subfields_cache: DashMap::new(),
        }
    }

    pub(crate) fn sources(&self) -> &SourceMap {
        &self.document.sources
    }

    pub(crate) fn collect_subfields(
        &self,
        runtime_type: &str,
        group: &FieldGroup,
    ) -> Arc<CollectedFields> {
        let key: SubfieldsKey = (
            runtime_type.to_owned(),
            group
                .fields
                .iter()
                .map(|occurrence| {
                    let node: &Field = &occurrence.field;
                    (
                        node as *const Field as usize,
                        occurrence.defer_usage.as_ref().map(usage_key).unwrap_or(0),
                    )
                })
                .collect(),
        );
        if let Some(hit) = self.subfields_cache.get(&key) {
            return hit.clone();
        }
        let collector = FieldCollector {
            schema: &self.schema,
            document: &self.document,
            variables: &self.variables,
            incremental: self.incremental,
        };
        let collected = Arc::new(collector.collect_subfields(runtime_type, group));
        self.subfields_cache.insert(key, collected.clone());
        collected
    }
}

/// Per-branch execution state: the error sink and the defer boundary the
/// branch runs under.
#[derive(Clone)]
pub(crate) struct ExecScope {
    pub(crate) errors: Arc<Mutex<Vec<GraphQLError>>>,
    /// The boundary the current field plan is built against: empty for the
    /// initial result, a bucket's key set inside a deferred execution.
    pub(crate) defer_usage_set: DeferUsageSet,
    /// Defer usage identity to fragment-slot handle, extended at each object
    /// boundary that opens new usages.
    pub(crate) defer_map: HashMap<usize, usize>,
    /// The fragment slot gating streams (and orphan usages) begun in this
    /// branch, `None` at the root.
    pub(crate) parent_fragment: Option<usize>,
}

impl ExecScope {
    pub(crate) fn root() -> Self {
        Self {
            errors: Arc::new(Mutex::new(Vec::new())),
            defer_usage_set: Vec::new(),
            defer_map: HashMap::new(),
            parent_fragment: None,
        }
    }

    pub(crate) fn record(&self, error: GraphQLError) {
        self.errors.lock().push(error);
    }

    pub(crate) fn record_all(&self, errors: Vec<GraphQLError>) {
        if !errors.is_empty() {
            self.errors.lock().extend(errors);
        }
    }

    pub(crate) fn take_errors(&self) -> Vec<GraphQLError> {
        std::mem::take(&mut *self.errors.lock())
    }
}

/// Selects the operation to run, honoring an explicit name.
pub(crate) fn select_operation<'doc>(
    document: &'doc ExecutableDocument,
    name: Option<&str>,
) -> Result<&'doc Node<Operation>, RequestError> {
    let operations = &document.operations;
    match name {
        Some(name) => operations
            .named
            .get(name)
            .ok_or_else(|| RequestError::UnknownOperation(name.to_owned())),
        None => {
            let mut named = operations.named.values();
            match (&operations.anonymous, named.next(), named.next()) {
                (Some(anonymous), None, _) => Ok(anonymous),
                (None, Some(single), None) => Ok(single),
                (None, None, _) => Err(RequestError::NoOperation),
                _ => Err(RequestError::AmbiguousOperation),
            }
        }
    }
}

pub(crate) fn operation_kind_name(kind: ast::OperationType) -> &'static str {
    match kind {
        ast::OperationType::Query => "query",
        ast::OperationType::Mutation => "mutation",
        ast::OperationType::Subscription => "subscription",
    }
}

/// Executes one operation of a validated document against a root object,
/// producing either a complete response or an initial response followed by
/// incremental payloads.
pub async fn execute(
    schema: &Arc<Schema>,
    document: &Arc<Valid<ExecutableDocument>>,
    root: &Arc<ObjectValue>,
    request: Request,
) -> ExecutionResponse {
    let operation = match select_operation(document, request.operation_name.as_deref()) {
        Ok(operation) => operation.clone(),
        Err(error) => return ExecutionResponse::Single(Response::from_errors(vec![error.into()])),
    };
    let variables =
        match coerce_variable_values(schema, &operation, &request.variables, &document.sources) {
            Ok(variables) => variables,
            Err(errors) => return ExecutionResponse::Single(Response::from_errors(errors)),
        };
    let kind = operation.operation_type;
    let Some(root_type) = schema.root_operation(kind) else {
        return ExecutionResponse::Single(Response::from_errors(vec![
            RequestError::UnsupportedOperation(operation_kind_name(kind)).into(),
        ]));
    };
    let root_type = root_type.to_string();
    let incremental =
        request.config.incremental_delivery && kind != ast::OperationType::Subscription;
    let ctx = Arc::new(ExecutionContext::new(
        schema.clone(),
        document.clone(),
        variables,
        request.config,
        incremental,
    ));
    let mode = if kind == ast::OperationType::Mutation {
        ExecutionMode::Sequential
    } else {
        ExecutionMode::Normal
    };
    tracing::trace!(
        operation = operation.name.as_ref().map(|name| name.as_str()),
        kind = operation_kind_name(kind),
        incremental,
        "executing operation"
    );
    let scope = ExecScope::root();
    let collector = FieldCollector {
        schema: &ctx.schema,
        document: &ctx.document,
        variables: &ctx.variables,
        incremental,
    };
    let collected = collector.collect_root(&root_type, &operation.selection_set);
    let base = Path::empty();
    let result = execute_collected(&ctx, &scope, mode, &root_type, root, &collected, &base, None, 0)
        .await;
    let data = match result {
        Ok(map) => JsonValue::Object(map),
        Err(PropagateNull) => JsonValue::Null,
    };
    let errors = scope.take_errors();

    let initial_tick = ctx.graph.lock().release_roots();
    if initial_tick.pending.is_empty() {
        return ExecutionResponse::Single(Response::from_data(data, errors));
    }
    let mut initial = Response::from_data(data, errors);
    initial.pending = initial_tick.pending;
    initial.has_next = Some(true);
    ExecutionResponse::Incremental {
        initial,
        subsequent: publisher::subsequent_stream(ctx),
    }
}

/// Plans and executes one collected selection at an object boundary:
/// deferred buckets are registered with the incremental graph, the immediate
/// grouped field set executes in place.
#[allow(clippy::too_many_arguments)]
pub(crate) fn execute_collected<'a>(
    ctx: &'a Arc<ExecutionContext>,
    scope: &'a ExecScope,
    mode: ExecutionMode,
    runtime_type: &'a str,
    source: &'a Arc<ObjectValue>,
    collected: &'a CollectedFields,
    base: &'a Path,
    path: LinkedPath<'a>,
    depth: usize,
) -> BoxFuture<'a, Result<JsonMap, PropagateNull>> {
    Box::pin(async move {
        let plan = build_field_plan(collected.grouped.clone(), &scope.defer_usage_set);
        let scope = register_deferred(
            ctx,
            scope,
            runtime_type,
            source,
            &collected.new_defer_usages,
            plan.new_grouped_field_sets,
            base,
            path,
            depth,
        );
        execute_grouped_field_set(
            ctx,
            &scope,
            mode,
            runtime_type,
            source,
            &plan.grouped_field_set,
            base,
            path,
            depth,
        )
        .await
    })
}

/// Registers this boundary's new defer usages as fragment records and its
/// deferred buckets as grouped-field-set tasks, extending the branch's defer
/// map for the immediate execution.
#[allow(clippy::too_many_arguments)]
fn register_deferred(
    ctx: &Arc<ExecutionContext>,
    scope: &ExecScope,
    runtime_type: &str,
    source: &Arc<ObjectValue>,
    new_usages: &[Arc<DeferUsage>],
    buckets: Vec<(DeferUsageSet, GroupedFieldSet)>,
    base: &Path,
    path: LinkedPath<'_>,
    depth: usize,
) -> ExecScope {
    if new_usages.is_empty() && buckets.is_empty() {
        return scope.clone();
    }
    let mut scope = scope.clone();
    let boundary_path = materialize_path(base, path);
    let mut graph = ctx.graph.lock();
    for usage in new_usages {
        let parent = usage
            .parent
            .as_ref()
            .and_then(|parent| scope.defer_map.get(&usage_key(parent)).copied())
            .or(scope.parent_fragment);
        let slot = graph.register_fragment(boundary_path.clone(), usage.label.clone(), parent);
        scope.defer_map.insert(usage_key(usage), slot);
    }
    for (set, bucket) in buckets {
        let fragments: Vec<usize> = set
            .iter()
            .filter_map(|usage| scope.defer_map.get(&usage_key(usage)).copied())
            .collect();
        let deepest = set
            .iter()
            .max_by_key(|usage| usage.ancestors().len())
            .and_then(|usage| scope.defer_map.get(&usage_key(usage)).copied());
        let slot = graph.register_gfs(boundary_path.clone(), fragments);
        let child_scope = ExecScope {
            errors: Arc::new(Mutex::new(Vec::new())),
            defer_usage_set: set,
            defer_map: scope.defer_map.clone(),
            parent_fragment: deepest,
        };
        let task_ctx = ctx.clone();
        let task_type = runtime_type.to_owned();
        let task_source = source.clone();
        let task_base = boundary_path.clone();
        graph.push_task(Box::pin(async move {
            let result = execute_grouped_field_set(
                &task_ctx,
                &child_scope,
                ExecutionMode::Normal,
                &task_type,
                &task_source,
                &bucket,
                &task_base,
                None,
                depth,
            )
            .await;
            let errors = child_scope.take_errors();
            let result = match result {
                Ok(data) => Ok((data, errors)),
                Err(PropagateNull) => Err(errors),
            };
            TaskEvent::GfsCompleted { gfs: slot, result }
        }));
    }
    scope
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn execute_grouped_field_set<'a>(
    ctx: &'a Arc<ExecutionContext>,
    scope: &'a ExecScope,
    mode: ExecutionMode,
    runtime_type: &'a str,
    source: &'a Arc<ObjectValue>,
    grouped: &'a GroupedFieldSet,
    base: &'a Path,
    path: LinkedPath<'a>,
    depth: usize,
) -> BoxFuture<'a, Result<JsonMap, PropagateNull>> {
    Box::pin(async move {
        let mut response = JsonMap::with_capacity(grouped.len());
        match mode {
            ExecutionMode::Sequential => {
                for (key, group) in grouped {
                    if let Some((key, value)) = execute_field(
                        ctx,
                        scope,
                        runtime_type,
                        source,
                        key,
                        group,
                        base,
                        path,
                        depth,
                    )
                    .await?
                    {
                        response.insert(key, value);
                    }
                }
            }
            ExecutionMode::Normal => {
                let branches = grouped.iter().map(|(key, group)| {
                    execute_field(ctx, scope, runtime_type, source, key, group, base, path, depth)
                });
                // Reassembled in declaration order regardless of which
                // branch finished first.
                for resolved in join_all(branches).await {
                    if let Some((key, value)) = resolved? {
                        response.insert(key, value);
                    }
                }
            }
        }
        Ok(response)
    })
}

#[allow(clippy::too_many_arguments)]
async fn execute_field(
    ctx: &Arc<ExecutionContext>,
    scope: &ExecScope,
    runtime_type: &str,
    source: &Arc<ObjectValue>,
    key: &ByteString,
    group: &FieldGroup,
    base: &Path,
    path: LinkedPath<'_>,
    depth: usize,
) -> Result<Option<(ByteString, JsonValue)>, PropagateNull> {
    let field = &group.fields[0].field;
    let field_name = field.name.as_str();
    if field_name == TYPENAME {
        return Ok(Some((key.clone(), runtime_type.into())));
    }
    let Some(field_def) = ctx.schema.type_field(runtime_type, field_name) else {
        // Validation would have rejected this; an unvalidated document's
        // unknown field contributes no entry.
        tracing::debug!(
            parent = runtime_type,
            field = field_name,
            "skipping undefined field"
        );
        return Ok(None);
    };
    let element = LinkedPathElement {
        element: PathElement::Key(key.as_str().to_owned()),
        next: path,
    };
    let field_path = Some(&element);

    let mut argument_errors = Vec::new();
    let arguments = coerce_argument_values(
        &ctx.schema,
        ctx.sources(),
        &ctx.variables,
        &mut argument_errors,
        base,
        field_path,
        field_def,
        field,
    );
    scope.record_all(argument_errors);
    let arguments = match arguments {
        Ok(arguments) => arguments,
        Err(PropagateNull) => {
            return try_nullify(&field_def.ty, Err(PropagateNull))
                .map(|value| Some((key.clone(), value)));
        }
    };

    let completed = match source.resolve_field(field_name, &arguments).await {
        Ok(resolved) => {
            complete_value(
                ctx,
                scope,
                runtime_type,
                &field_def.ty,
                resolved,
                group,
                base,
                field_path,
                depth,
            )
            .await
        }
        Err(error) => {
            scope.record(field_error(
                format!("resolver error: {}", error.message),
                materialize_path(base, field_path),
                node_locations(field, ctx.sources()),
            ));
            Err(PropagateNull)
        }
    };
    try_nullify(&field_def.ty, completed).map(|value| Some((key.clone(), value)))
}
