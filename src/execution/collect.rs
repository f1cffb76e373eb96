//! Field collection: walking a selection set against a concrete runtime type,
//! merging same-response-key fields, expanding fragments, applying
//! `@skip`/`@include` and partitioning `@defer` boundaries.

use std::collections::HashSet;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::executable::Directive;
use apollo_compiler::executable::DirectiveList;
use apollo_compiler::executable::ExecutableDocument;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use indexmap::IndexMap;
use serde_json_bytes::ByteString;
use serde_json_bytes::Value;

use crate::json_ext::Object;
use crate::schema::Schema;

pub(crate) const TYPENAME: &str = "__typename";
const SKIP: &str = "skip";
const INCLUDE: &str = "include";
const DEFER: &str = "defer";
const STREAM: &str = "stream";

/// One `@defer` application site, created during collection.
///
/// Compared and hashed by `Arc` pointer identity: two applications are
/// distinct usages even when structurally identical.
#[derive(Debug)]
pub(crate) struct DeferUsage {
    pub(crate) label: Option<String>,
    pub(crate) parent: Option<Arc<DeferUsage>>,
}

impl DeferUsage {
    /// The chain of enclosing defer usages, outermost last.
    pub(crate) fn ancestors(self: &Arc<Self>) -> Vec<Arc<DeferUsage>> {
        let mut ancestors = Vec::new();
        let mut current = self.parent.clone();
        while let Some(usage) = current {
            current = usage.parent.clone();
            ancestors.push(usage);
        }
        ancestors
    }
}

/// One field occurrence in a grouped field set, tagged with the defer usage
/// it was collected under (if any).
#[derive(Clone, Debug)]
pub(crate) struct CollectedField {
    pub(crate) field: Node<Field>,
    pub(crate) defer_usage: Option<Arc<DeferUsage>>,
}

/// All occurrences sharing one response key, in document order.
#[derive(Clone, Debug, Default)]
pub(crate) struct FieldGroup {
    pub(crate) fields: Vec<CollectedField>,
}

/// Ordered mapping from response key to field group. Insertion order follows
/// first occurrence in the selection set.
pub(crate) type GroupedFieldSet = IndexMap<ByteString, FieldGroup>;

#[derive(Debug, Default)]
pub(crate) struct CollectedFields {
    pub(crate) grouped: GroupedFieldSet,
    /// Defer usages first encountered during this collection, in the order
    /// they appeared.
    pub(crate) new_defer_usages: Vec<Arc<DeferUsage>>,
}

/// The `@stream` arguments of a field, when the directive is active.
#[derive(Clone, Debug)]
pub(crate) struct StreamUsage {
    pub(crate) label: Option<String>,
    pub(crate) initial_count: usize,
}

pub(crate) struct FieldCollector<'a> {
    pub(crate) schema: &'a Schema,
    pub(crate) document: &'a ExecutableDocument,
    pub(crate) variables: &'a Object,
    /// When false, `@defer` and `@stream` are ignored entirely.
    pub(crate) incremental: bool,
}

impl FieldCollector<'_> {
    /// Collects the fields of an operation or fragment selection set against
    /// the given concrete runtime type.
    pub(crate) fn collect_root(
        &self,
        runtime_type: &str,
        selection_set: &SelectionSet,
    ) -> CollectedFields {
        let mut acc = CollectedFields::default();
        let mut visited = HashSet::new();
        self.walk(
            runtime_type,
            &selection_set.selections,
            &None,
            &mut visited,
            &mut acc,
        );
        acc
    }

    /// Collects the merged subfields of every occurrence in a field group.
    ///
    /// Each occurrence's sub-selections are walked under that occurrence's
    /// own defer usage, so deferred fields keep their boundary across
    /// object recursion.
    pub(crate) fn collect_subfields(
        &self,
        runtime_type: &str,
        group: &FieldGroup,
    ) -> CollectedFields {
        let mut acc = CollectedFields::default();
        for occurrence in &group.fields {
            let mut visited = HashSet::new();
            self.walk(
                runtime_type,
                &occurrence.field.selection_set.selections,
                &occurrence.defer_usage,
                &mut visited,
                &mut acc,
            );
        }
        acc
    }

    fn walk(
        &self,
        runtime_type: &str,
        selections: &[Selection],
        defer_usage: &Option<Arc<DeferUsage>>,
        visited: &mut HashSet<Name>,
        acc: &mut CollectedFields,
    ) {
        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    if IncludeSkip::parse(&field.directives).should_skip(self.variables) {
                        continue;
                    }
                    let key = ByteString::from(field.response_key().as_str());
                    acc.grouped
                        .entry(key)
                        .or_default()
                        .fields
                        .push(CollectedField {
                            field: field.clone(),
                            defer_usage: defer_usage.clone(),
                        });
                }
                Selection::InlineFragment(inline) => {
                    if IncludeSkip::parse(&inline.directives).should_skip(self.variables) {
                        continue;
                    }
                    if let Some(condition) = &inline.type_condition {
                        if !self.type_applies(condition, runtime_type) {
                            continue;
                        }
                    }
                    let new_usage = self.defer_usage(&inline.directives, defer_usage, acc);
                    let scope = new_usage.clone().or_else(|| defer_usage.clone());
                    self.walk(
                        runtime_type,
                        &inline.selection_set.selections,
                        &scope,
                        visited,
                        acc,
                    );
                }
                Selection::FragmentSpread(spread) => {
                    if IncludeSkip::parse(&spread.directives).should_skip(self.variables) {
                        continue;
                    }
                    let Some(fragment) = self.document.fragments.get(&spread.fragment_name) else {
                        tracing::debug!(
                            fragment = spread.fragment_name.as_str(),
                            "spread of an unknown fragment, skipping"
                        );
                        continue;
                    };
                    if !self.type_applies(fragment.type_condition(), runtime_type) {
                        continue;
                    }
                    // @defer is only evaluated once the spread is known to
                    // apply, so a dropped fragment opens no boundary.
                    let new_usage = self.defer_usage(&spread.directives, defer_usage, acc);
                    // A fragment already expanded in this boundary is not
                    // re-expanded, but a new @defer application opens a new
                    // boundary and must expand it again.
                    if new_usage.is_none() {
                        if visited.contains(&spread.fragment_name) {
                            continue;
                        }
                        visited.insert(spread.fragment_name.clone());
                    }
                    let scope = new_usage.clone().or_else(|| defer_usage.clone());
                    self.walk(
                        runtime_type,
                        &fragment.selection_set.selections,
                        &scope,
                        visited,
                        acc,
                    );
                }
            }
        }
    }

    /// A fragment applies when its type condition is the runtime type itself
    /// or an abstract type the runtime type belongs to.
    fn type_applies(&self, condition: &str, runtime_type: &str) -> bool {
        condition == runtime_type || self.schema.is_subtype(condition, runtime_type)
    }

    /// Evaluates `@defer` on a fragment, registering a new usage when active.
    fn defer_usage(
        &self,
        directives: &DirectiveList,
        parent: &Option<Arc<DeferUsage>>,
        acc: &mut CollectedFields,
    ) -> Option<Arc<DeferUsage>> {
        if !self.incremental {
            return None;
        }
        let directive = directives.get(DEFER)?;
        if !directive_condition(directive).eval(self.variables).unwrap_or(true) {
            return None;
        }
        let usage = Arc::new(DeferUsage {
            label: directive_label(directive),
            parent: parent.clone(),
        });
        acc.new_defer_usages.push(usage.clone());
        Some(usage)
    }

}

/// Evaluates `@stream` on a collected field group. The directive is read
/// from the first occurrence; merged occurrences carry identical stream
/// arguments by validation.
pub(crate) fn stream_usage(
    group: &FieldGroup,
    variables: &Object,
    incremental: bool,
) -> Option<StreamUsage> {
    if !incremental {
        return None;
    }
    let directive = group.fields.first()?.field.directives.get(STREAM)?;
    if !directive_condition(directive).eval(variables).unwrap_or(true) {
        return None;
    }
    let initial_count = directive
        .specified_argument_by_name("initialCount")
        .and_then(|value| match value.as_ref() {
            ast::Value::Int(int) => int.try_to_i32().ok(),
            _ => None,
        })
        .unwrap_or(0)
        .max(0) as usize;
    Some(StreamUsage {
        label: directive_label(directive),
        initial_count,
    })
}

fn directive_label(directive: &Node<Directive>) -> Option<String> {
    directive
        .specified_argument_by_name("label")
        .and_then(|value| value.as_str())
        .map(str::to_owned)
}

fn directive_condition(directive: &Node<Directive>) -> Condition {
    directive
        .specified_argument_by_name("if")
        .and_then(Condition::parse)
        .unwrap_or(Condition::Yes)
}

/// The `@skip`/`@include` state of one selection.
pub(crate) struct IncludeSkip {
    include: Condition,
    skip: Condition,
}

impl IncludeSkip {
    pub(crate) fn parse(directives: &DirectiveList) -> Self {
        let mut include = Condition::Yes;
        let mut skip = Condition::No;
        if let Some(directive) = directives.get(INCLUDE) {
            if let Some(condition) = directive
                .specified_argument_by_name("if")
                .and_then(Condition::parse)
            {
                include = condition;
            }
        }
        if let Some(directive) = directives.get(SKIP) {
            if let Some(condition) = directive
                .specified_argument_by_name("if")
                .and_then(Condition::parse)
            {
                skip = condition;
            }
        }
        Self { include, skip }
    }

    /// Skip takes precedence over include when both are present.
    pub(crate) fn should_skip(&self, variables: &Object) -> bool {
        self.skip.eval(variables).unwrap_or(false)
            || !self.include.eval(variables).unwrap_or(true)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Condition {
    Yes,
    No,
    Variable(String),
}

impl Condition {
    pub(crate) fn parse(value: &Node<ast::Value>) -> Option<Self> {
        match value.as_ref() {
            ast::Value::Boolean(true) => Some(Condition::Yes),
            ast::Value::Boolean(false) => Some(Condition::No),
            ast::Value::Variable(name) => Some(Condition::Variable(name.to_string())),
            _ => None,
        }
    }

    pub(crate) fn eval(&self, variables: &Object) -> Option<bool> {
        match self {
            Condition::Yes => Some(true),
            Condition::No => Some(false),
            Condition::Variable(name) => variables.get(name.as_str()).and_then(Value::as_bool),
        }
    }
}
