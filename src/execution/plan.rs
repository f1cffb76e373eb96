//! Field plan building: partitioning a grouped field set into the fields
//! that execute immediately and the buckets gated by `@defer` boundaries.

use std::sync::Arc;

use super::collect::DeferUsage;
use super::collect::FieldGroup;
use super::collect::GroupedFieldSet;

/// A set of defer usages, compared by membership (pointer identity of the
/// members, no ordering). Small enough that a `Vec` beats a hash set.
pub(crate) type DeferUsageSet = Vec<Arc<DeferUsage>>;

pub(crate) fn set_contains(set: &[Arc<DeferUsage>], usage: &Arc<DeferUsage>) -> bool {
    set.iter().any(|member| Arc::ptr_eq(member, usage))
}

pub(crate) fn set_equals(a: &[Arc<DeferUsage>], b: &[Arc<DeferUsage>]) -> bool {
    a.len() == b.len() && a.iter().all(|usage| set_contains(b, usage))
}

#[derive(Debug, Default)]
pub(crate) struct FieldPlan {
    /// Fields executed as part of the current result.
    pub(crate) grouped_field_set: GroupedFieldSet,
    /// Deferred buckets, keyed by the exact defer-usage set gating them.
    pub(crate) new_grouped_field_sets: Vec<(DeferUsageSet, GroupedFieldSet)>,
}

/// Partitions `grouped` against the boundary the plan is being built under:
/// the empty set for the initial result, or the bucket's own key set inside
/// a deferred execution.
///
/// Recomputed at every object boundary; defer-usage sets differ per
/// selection-set nesting level.
pub(crate) fn build_field_plan(
    grouped: GroupedFieldSet,
    parent_defer_usages: &[Arc<DeferUsage>],
) -> FieldPlan {
    let mut plan = FieldPlan::default();
    for (response_key, group) in grouped {
        let usage_set = filtered_defer_usage_set(&group);
        if set_equals(&usage_set, parent_defer_usages) {
            plan.grouped_field_set.insert(response_key, group);
        } else if let Some((_, bucket)) = plan
            .new_grouped_field_sets
            .iter_mut()
            .find(|(key, _)| set_equals(key, &usage_set))
        {
            bucket.insert(response_key, group);
        } else {
            let mut bucket = GroupedFieldSet::new();
            bucket.insert(response_key, group);
            plan.new_grouped_field_sets.push((usage_set, bucket));
        }
    }
    plan
}

/// The defer-usage set gating one response key.
///
/// Any occurrence outside every `@defer` puts the key in the base result.
/// Otherwise the direct tags are reduced (a usage is redundant when one of
/// its ancestors also directly tags the key) and then closed over ancestors,
/// so a bucket's key names every boundary that must release before its data
/// is complete.
fn filtered_defer_usage_set(group: &FieldGroup) -> DeferUsageSet {
    let mut direct: DeferUsageSet = Vec::new();
    for occurrence in &group.fields {
        let Some(usage) = &occurrence.defer_usage else {
            return Vec::new();
        };
        if !set_contains(&direct, usage) {
            direct.push(usage.clone());
        }
    }
    let reduced: DeferUsageSet = direct
        .iter()
        .filter(|usage| {
            !usage
                .ancestors()
                .iter()
                .any(|ancestor| set_contains(&direct, ancestor))
        })
        .cloned()
        .collect();
    let mut closed = reduced.clone();
    for usage in &reduced {
        for ancestor in usage.ancestors() {
            if !set_contains(&closed, &ancestor) {
                closed.push(ancestor);
            }
        }
    }
    closed
}

#[cfg(test)]
mod tests {
    use apollo_compiler::Node;
    use apollo_compiler::ast;
    use apollo_compiler::executable::Field;
    use apollo_compiler::name;
    use serde_json_bytes::ByteString;

    use super::*;
    use crate::execution::collect::CollectedField;

    fn synthetic_field(name: &str) -> Node<Field> {
        Node::new(Field {
            definition: Node::new(ast::FieldDefinition {
                description: None,
                name: name!("synthetic"),
                arguments: Vec::new(),
                ty: ast::Type::Named(name!("String")),
                directives: Default::default(),
            }),
            alias: None,
            name: apollo_compiler::Name::new(name).unwrap(),
            arguments: Vec::new(),
            directives: Default::default(),
            selection_set: apollo_compiler::executable::SelectionSet::new(name!("Query")),
        })
    }

    fn group(field: &str, usages: &[Option<Arc<DeferUsage>>]) -> (ByteString, FieldGroup) {
        let fields = usages
            .iter()
            .map(|usage| CollectedField {
                field: synthetic_field(field),
                defer_usage: usage.clone(),
            })
            .collect();
        (ByteString::from(field), FieldGroup { fields })
    }

    #[test]
    fn base_occurrence_always_wins() {
        let outer = Arc::new(DeferUsage {
            label: None,
            parent: None,
        });
        let mut grouped = GroupedFieldSet::new();
        let (key, fields) = group("a", &[None, Some(outer)]);
        grouped.insert(key, fields);
        let plan = build_field_plan(grouped, &[]);
        assert_eq!(plan.grouped_field_set.len(), 1);
        assert!(plan.new_grouped_field_sets.is_empty());
    }

    #[test]
    fn nested_defer_buckets_keep_the_ancestor_chain() {
        let a = Arc::new(DeferUsage {
            label: Some("A".to_owned()),
            parent: None,
        });
        let b = Arc::new(DeferUsage {
            label: Some("B".to_owned()),
            parent: Some(a.clone()),
        });
        let mut grouped = GroupedFieldSet::new();
        let (key, fields) = group("base", &[None]);
        grouped.insert(key, fields);
        let (key, fields) = group("onlyA", &[Some(a.clone())]);
        grouped.insert(key, fields);
        let (key, fields) = group("onlyB", &[Some(b.clone())]);
        grouped.insert(key, fields);
        let plan = build_field_plan(grouped, &[]);

        assert_eq!(plan.grouped_field_set.len(), 1);
        assert!(plan.grouped_field_set.contains_key("base"));
        assert_eq!(plan.new_grouped_field_sets.len(), 2);
        let (key_a, bucket_a) = &plan.new_grouped_field_sets[0];
        assert!(set_equals(key_a, &[a.clone()]));
        assert!(bucket_a.contains_key("onlyA"));
        // The inner bucket is gated by both boundaries, not collapsed to {B}.
        let (key_b, bucket_b) = &plan.new_grouped_field_sets[1];
        assert!(set_equals(key_b, &[a.clone(), b.clone()]));
        assert!(bucket_b.contains_key("onlyB"));
    }

    #[test]
    fn direct_tag_in_an_outer_boundary_reduces_the_inner_one() {
        let a = Arc::new(DeferUsage {
            label: None,
            parent: None,
        });
        let b = Arc::new(DeferUsage {
            label: None,
            parent: Some(a.clone()),
        });
        // The key appears directly in A and again inside B: completing A is
        // enough to deliver it.
        let mut grouped = GroupedFieldSet::new();
        let (key, fields) = group("shared", &[Some(a.clone()), Some(b.clone())]);
        grouped.insert(key, fields);
        let plan = build_field_plan(grouped, &[]);
        assert_eq!(plan.new_grouped_field_sets.len(), 1);
        assert!(set_equals(&plan.new_grouped_field_sets[0].0, &[a.clone()]));
    }

    #[test]
    fn bucket_key_matching_the_parent_boundary_is_immediate() {
        let a = Arc::new(DeferUsage {
            label: None,
            parent: None,
        });
        let b = Arc::new(DeferUsage {
            label: None,
            parent: Some(a.clone()),
        });
        // Inside the {A,B} bucket's own execution, subfields tagged B stay
        // immediate.
        let mut grouped = GroupedFieldSet::new();
        let (key, fields) = group("inner", &[Some(b.clone())]);
        grouped.insert(key, fields);
        let plan = build_field_plan(grouped, &[a.clone(), b.clone()]);
        assert_eq!(plan.grouped_field_set.len(), 1);
        assert!(plan.new_grouped_field_sets.is_empty());
    }
}
