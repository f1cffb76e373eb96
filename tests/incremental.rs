use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::validation::Valid;
use futures::StreamExt;
use graphql_executor::ExecutionConfig;
use graphql_executor::ExecutionResponse;
use graphql_executor::IncrementalResult;
use graphql_executor::JsonResolver;
use graphql_executor::ObjectValue;
use graphql_executor::Request;
use graphql_executor::ResolvedValue;
use graphql_executor::Response;
use graphql_executor::Schema;
use graphql_executor::SubsequentResponse;
use graphql_executor::execute;
use graphql_executor::impl_resolver;
use pretty_assertions::assert_eq;
use serde_json_bytes::json;

const SDL: &str = r#"
    directive @defer(label: String, if: Boolean! = true) on FRAGMENT_SPREAD | INLINE_FRAGMENT
    directive @stream(label: String, if: Boolean! = true, initialCount: Int = 0) on FIELD

    type Query {
        fast: String
        slow: String
        slower: String
        strict: String!
        numbers: [Int]
        strictNumbers: [Int!]
        things: [Thing]
    }

    type Thing {
        a: String
        b: String
    }
"#;

fn schema() -> Arc<Schema> {
    Arc::new(Schema::parse(SDL).expect("schema should parse"))
}

fn document(schema: &Schema, query: &str) -> Arc<Valid<ExecutableDocument>> {
    Arc::new(
        ExecutableDocument::parse_and_validate(schema.definitions(), query, "query.graphql")
            .expect("document should validate"),
    )
}

fn json_root(value: serde_json_bytes::Value) -> Arc<ObjectValue> {
    Arc::new(JsonResolver::new(
        "Query",
        value.as_object().expect("object").clone(),
    ))
}

async fn run_incremental(
    schema: &Arc<Schema>,
    query: &str,
    root: &Arc<ObjectValue>,
    request: Request,
) -> (Response, Vec<SubsequentResponse>) {
    let document = document(schema, query);
    match execute(schema, &document, root, request).await {
        ExecutionResponse::Single(response) => (response, Vec::new()),
        ExecutionResponse::Incremental {
            initial,
            subsequent,
        } => {
            let payloads = subsequent.collect().await;
            (initial, payloads)
        }
    }
}

#[tokio::test]
async fn deferred_fragment_arrives_in_a_subsequent_payload() {
    let schema = schema();
    let root = json_root(json!({"fast": "a", "slow": "b"}));
    let (initial, payloads) = run_incremental(
        &schema,
        r#"{ fast ... @defer(label: "rest") { slow } }"#,
        &root,
        Request::default(),
    )
    .await;
    assert_eq!(
        serde_json::to_value(&initial).unwrap(),
        serde_json::json!({
            "data": {"fast": "a"},
            "pending": [{"id": "0", "path": [], "label": "rest"}],
            "hasNext": true,
        })
    );
    assert_eq!(
        serde_json::to_value(&payloads).unwrap(),
        serde_json::json!([{
            "incremental": [{"data": {"slow": "b"}, "id": "0"}],
            "completed": [{"id": "0"}],
            "hasNext": false,
        }])
    );
}

#[tokio::test]
async fn defer_disabled_by_config_executes_inline() {
    let schema = schema();
    let root = json_root(json!({"fast": "a", "slow": "b"}));
    let (initial, payloads) = run_incremental(
        &schema,
        "{ fast ... @defer { slow } }",
        &root,
        Request::default().config(ExecutionConfig {
            incremental_delivery: false,
            ..Default::default()
        }),
    )
    .await;
    assert!(payloads.is_empty());
    assert_eq!(
        serde_json::to_value(&initial).unwrap(),
        serde_json::json!({"data": {"fast": "a", "slow": "b"}})
    );
}

#[tokio::test]
async fn nested_defer_announces_the_inner_boundary_later() {
    let schema = schema();
    let root = json_root(json!({"fast": "a", "slow": "b", "slower": "c"}));
    let (initial, payloads) = run_incremental(
        &schema,
        "{ fast ... @defer { slow ... @defer { slower } } }",
        &root,
        Request::default(),
    )
    .await;
    // Only the outer boundary is pending initially.
    assert_eq!(
        serde_json::to_value(&initial).unwrap(),
        serde_json::json!({
            "data": {"fast": "a"},
            "pending": [{"id": "0", "path": []}],
            "hasNext": true,
        })
    );

    let mut announced = Vec::new();
    let mut completed = Vec::new();
    let mut data = Vec::new();
    for payload in &payloads {
        announced.extend(payload.pending.iter().map(|pending| pending.id.clone()));
        completed.extend(payload.completed.iter().map(|entry| entry.id.clone()));
        for entry in &payload.incremental {
            match entry {
                IncrementalResult::Defer(defer) => data.push(defer.data.clone()),
                IncrementalResult::Stream(_) => panic!("no streams in this operation"),
            }
        }
    }
    assert_eq!(announced, vec!["1".to_owned()]);
    let mut completed_sorted = completed;
    completed_sorted.sort();
    assert_eq!(completed_sorted, vec!["0".to_owned(), "1".to_owned()]);
    assert!(data.contains(&json!({"slow": "b"})));
    assert!(data.contains(&json!({"slower": "c"})));
    assert_eq!(payloads.last().map(|payload| payload.has_next), Some(false));
}

#[tokio::test]
async fn failed_deferred_branch_completes_with_errors() {
    let schema = schema();
    let root = json_root(json!({"fast": "ok", "strict": null}));
    let (initial, payloads) = run_incremental(
        &schema,
        "{ fast ... @defer { strict } }",
        &root,
        Request::default(),
    )
    .await;
    assert_eq!(initial.data, Some(json!({"fast": "ok"})));
    assert_eq!(
        serde_json::to_value(&payloads).unwrap(),
        serde_json::json!([{
            "completed": [{
                "id": "0",
                "errors": [{
                    "message": "Cannot return null for non-nullable field Query.strict.",
                    "locations": [{"line": 1, "column": 21}],
                    "path": ["strict"],
                }],
            }],
            "hasNext": false,
        }])
    );
}

struct StreamRoot;

impl_resolver! {
    for StreamRoot:

    __typename = "Query";

    fn numbers() {
        Ok(ResolvedValue::stream(futures::stream::iter(
            (1..=4).map(|n| Ok(ResolvedValue::leaf(n))),
        )))
    }

    fn strictNumbers() {
        Ok(ResolvedValue::stream(futures::stream::iter([
            Ok(ResolvedValue::leaf(1)),
            Ok(ResolvedValue::null()),
        ])))
    }

    fn things() {
        Ok(ResolvedValue::stream(futures::stream::iter([Ok(
            ResolvedValue::leaf(json!({"a": "A", "b": "B"})),
        )])))
    }
}

#[tokio::test]
async fn streamed_list_delivers_items_after_initial_count() {
    let schema = schema();
    let root: Arc<ObjectValue> = Arc::new(StreamRoot);
    let (initial, payloads) = run_incremental(
        &schema,
        r#"{ numbers @stream(initialCount: 2, label: "nums") }"#,
        &root,
        Request::default(),
    )
    .await;
    assert_eq!(
        serde_json::to_value(&initial).unwrap(),
        serde_json::json!({
            "data": {"numbers": [1, 2]},
            "pending": [{"id": "0", "path": ["numbers"], "label": "nums"}],
            "hasNext": true,
        })
    );
    assert_eq!(
        serde_json::to_value(&payloads).unwrap(),
        serde_json::json!([
            {"incremental": [{"items": [3], "id": "0"}], "hasNext": true},
            {"incremental": [{"items": [4], "id": "0"}], "hasNext": true},
            {"completed": [{"id": "0"}], "hasNext": false},
        ])
    );
}

#[tokio::test]
async fn deferred_fragment_inside_a_streamed_item_is_delivered() {
    let schema = schema();
    let root: Arc<ObjectValue> = Arc::new(StreamRoot);
    let (initial, payloads) = run_incremental(
        &schema,
        r#"{ things @stream(initialCount: 0) { a ... @defer(label: "late") { b } } }"#,
        &root,
        Request::default(),
    )
    .await;
    assert_eq!(
        serde_json::to_value(&initial).unwrap(),
        serde_json::json!({
            "data": {"things": []},
            "pending": [{"id": "0", "path": ["things"]}],
            "hasNext": true,
        })
    );

    let mut announced = Vec::new();
    let mut completed = Vec::new();
    let mut stream_items = Vec::new();
    let mut defer_data = Vec::new();
    for payload in &payloads {
        announced.extend(payload.pending.iter().cloned());
        completed.extend(payload.completed.iter().map(|entry| entry.id.clone()));
        for entry in &payload.incremental {
            match entry {
                IncrementalResult::Stream(stream) => stream_items.extend(stream.items.clone()),
                IncrementalResult::Defer(defer) => {
                    defer_data.push((defer.id.clone(), defer.data.clone()))
                }
            }
        }
    }
    // The boundary discovered inside the item is announced before its data.
    assert_eq!(announced.len(), 1);
    assert_eq!(announced[0].id, "1");
    assert_eq!(
        serde_json::to_value(&announced[0].path).unwrap(),
        serde_json::json!(["things", 0])
    );
    assert_eq!(announced[0].label.as_deref(), Some("late"));
    assert_eq!(stream_items, vec![json!({"a": "A"})]);
    assert_eq!(defer_data, vec![("1".to_owned(), json!({"b": "B"}))]);
    let mut completed_sorted = completed;
    completed_sorted.sort();
    assert_eq!(completed_sorted, vec!["0".to_owned(), "1".to_owned()]);
    assert_eq!(payloads.last().map(|payload| payload.has_next), Some(false));
}

#[tokio::test]
async fn stream_without_directive_drains_the_source() {
    let schema = schema();
    let root: Arc<ObjectValue> = Arc::new(StreamRoot);
    let (initial, payloads) = run_incremental(&schema, "{ numbers }", &root, Request::default()).await;
    assert!(payloads.is_empty());
    assert_eq!(
        serde_json::to_value(&initial).unwrap(),
        serde_json::json!({"data": {"numbers": [1, 2, 3, 4]}})
    );
}

#[tokio::test]
async fn null_stream_item_of_non_null_type_terminates_the_stream() {
    let schema = schema();
    let root: Arc<ObjectValue> = Arc::new(StreamRoot);
    let (initial, payloads) = run_incremental(
        &schema,
        "{ strictNumbers @stream(initialCount: 1) }",
        &root,
        Request::default(),
    )
    .await;
    assert_eq!(initial.data, Some(json!({"strictNumbers": [1]})));
    assert_eq!(payloads.len(), 1);
    let payload = &payloads[0];
    assert!(payload.incremental.is_empty());
    assert_eq!(payload.completed.len(), 1);
    assert_eq!(
        payload.completed[0].errors[0].message,
        "Cannot return null for non-nullable field Query.strictNumbers."
    );
    assert!(!payload.has_next);
}
