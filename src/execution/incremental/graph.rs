//! The graph of pending incremental results.
//!
//! Fragment records track `@defer` boundaries, stream records track `@stream`
//! continuations, and grouped-field-set records hold deferred data until
//! every boundary gating it has released. A record releases (appears in a
//! `pending` entry) when its parent fragment completes; roots release with
//! the initial response.

use serde_json_bytes::Value as JsonValue;

use super::IncrementalFuture;
use super::StreamEvent;
use super::TaskEvent;
use crate::error::GraphQLError;
use crate::json_ext::Object as JsonMap;
use crate::json_ext::Path;
use crate::response::CompletedResult;
use crate::response::IncrementalDeferResult;
use crate::response::IncrementalResult;
use crate::response::IncrementalStreamResult;
use crate::response::PendingResult;
use crate::response::sorted;

/// The wire-visible consequences of one state change: entries for the next
/// subsequent payload.
#[derive(Default)]
pub(crate) struct Tick {
    pub(crate) pending: Vec<PendingResult>,
    pub(crate) incremental: Vec<IncrementalResult>,
    pub(crate) completed: Vec<CompletedResult>,
}

impl Tick {
    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.incremental.is_empty() && self.completed.is_empty()
    }
}

struct FragmentSlot {
    path: Path,
    label: Option<String>,
    /// Present once released; this is the wire identifier.
    id: Option<String>,
    child_fragments: Vec<usize>,
    child_streams: Vec<usize>,
    /// Grouped field sets gated (in part) by this boundary.
    gfs: Vec<usize>,
    done: bool,
    failed: bool,
}

struct StreamSlot {
    path: Path,
    label: Option<String>,
    id: Option<String>,
    /// Events observed before release.
    buffered: Vec<StreamEvent>,
    terminated: bool,
}

struct GfsSlot {
    path: Path,
    /// Every fragment in the defer-usage set keying this record.
    fragments: Vec<usize>,
    reconciled: bool,
    payload: Option<(JsonMap, Vec<GraphQLError>)>,
    sent: bool,
}

#[derive(Default)]
pub(crate) struct IncrementalGraph {
    fragments: Vec<FragmentSlot>,
    streams: Vec<StreamSlot>,
    gfs: Vec<GfsSlot>,
    /// Tasks staged by executions, drained by the publisher.
    tasks: Vec<IncrementalFuture>,
    next_id: usize,
    roots_released: bool,
}

impl IncrementalGraph {
    pub(crate) fn register_fragment(
        &mut self,
        path: Path,
        label: Option<String>,
        parent: Option<usize>,
    ) -> usize {
        let slot = self.fragments.len();
        self.fragments.push(FragmentSlot {
            path,
            label,
            id: None,
            child_fragments: Vec::new(),
            child_streams: Vec::new(),
            gfs: Vec::new(),
            done: false,
            failed: parent.is_some_and(|parent| self.fragments[parent].failed),
        });
        if let Some(parent) = parent {
            if self.fragments[parent].failed {
                self.fragments[slot].done = true;
            } else {
                self.fragments[parent].child_fragments.push(slot);
            }
        }
        slot
    }

    pub(crate) fn register_stream(
        &mut self,
        path: Path,
        label: Option<String>,
        parent: Option<usize>,
    ) -> usize {
        let slot = self.streams.len();
        self.streams.push(StreamSlot {
            path,
            label,
            id: None,
            buffered: Vec::new(),
            terminated: false,
        });
        if let Some(parent) = parent {
            if self.fragments[parent].failed {
                self.streams[slot].terminated = true;
            } else {
                self.fragments[parent].child_streams.push(slot);
            }
        }
        slot
    }

    pub(crate) fn register_gfs(&mut self, path: Path, fragments: Vec<usize>) -> usize {
        let slot = self.gfs.len();
        for &fragment in &fragments {
            self.fragments[fragment].gfs.push(slot);
        }
        self.gfs.push(GfsSlot {
            path,
            fragments,
            reconciled: false,
            payload: None,
            sent: false,
        });
        slot
    }

    pub(crate) fn push_task(&mut self, task: IncrementalFuture) {
        self.tasks.push(task);
    }

    pub(crate) fn take_tasks(&mut self) -> Vec<IncrementalFuture> {
        std::mem::take(&mut self.tasks)
    }

    pub(crate) fn stream_live(&self, slot: usize) -> bool {
        !self.streams[slot].terminated
    }

    /// True while any payload remains to be delivered.
    pub(crate) fn has_outstanding(&self) -> bool {
        self.fragments.iter().any(|fragment| !fragment.done)
            || self.streams.iter().any(|stream| !stream.terminated)
    }

    /// Releases every root record, producing the initial response's `pending`
    /// list. Completion of already-satisfied fragments is left to the first
    /// publisher sweep so their entries land in a subsequent payload.
    pub(crate) fn release_roots(&mut self) -> Tick {
        let mut tick = Tick::default();
        self.roots_released = true;
        self.release_parentless(&mut tick);
        tick
    }

    /// Releases records gated on no parent fragment. Records registered
    /// after the initial release (a `@defer` discovered while completing a
    /// root-level stream item) release here on the tick that registered them.
    fn release_parentless(&mut self, tick: &mut Tick) {
        let roots: Vec<usize> = (0..self.fragments.len())
            .filter(|&slot| {
                self.fragments
                    .iter()
                    .all(|fragment| !fragment.child_fragments.contains(&slot))
            })
            .collect();
        for slot in roots {
            self.release_fragment(slot, tick);
        }
        let stream_roots: Vec<usize> = (0..self.streams.len())
            .filter(|&slot| {
                self.fragments
                    .iter()
                    .all(|fragment| !fragment.child_streams.contains(&slot))
            })
            .collect();
        for slot in stream_roots {
            self.release_stream(slot, tick);
        }
    }

    /// Completes released fragments whose every grouped field set has already
    /// reconciled, including fragments with no grouped field set at all.
    pub(crate) fn sweep(&mut self) -> Tick {
        let mut tick = Tick::default();
        for slot in 0..self.fragments.len() {
            self.check_complete(slot, &mut tick);
        }
        tick
    }

    /// Applies one task event. The returned future, if any, is the stream's
    /// re-armed continuation.
    pub(crate) fn apply(&mut self, event: TaskEvent) -> (Tick, Option<IncrementalFuture>) {
        let mut tick = Tick::default();
        let next = match event {
            TaskEvent::GfsCompleted { gfs, result } => {
                match result {
                    Ok((data, errors)) => {
                        self.gfs[gfs].reconciled = true;
                        self.gfs[gfs].payload = Some((data, errors));
                        for fragment in self.gfs[gfs].fragments.clone() {
                            self.check_complete(fragment, &mut tick);
                        }
                    }
                    Err(errors) => {
                        self.gfs[gfs].sent = true;
                        for fragment in self.gfs[gfs].fragments.clone() {
                            self.fail_fragment(fragment, &errors, &mut tick);
                        }
                    }
                }
                None
            }
            TaskEvent::StreamItem {
                stream,
                event,
                next,
            } => {
                if self.streams[stream].terminated {
                    // The branch was discarded; drop the source.
                    None
                } else {
                    if self.streams[stream].id.is_some() {
                        self.emit_stream_event(stream, event, &mut tick);
                    } else {
                        self.streams[stream].buffered.push(event);
                    }
                    next.filter(|_| self.stream_live(stream))
                }
            }
        };
        // The event's execution may have registered records with no gating
        // fragment, which nothing else would ever announce.
        if self.roots_released {
            self.release_parentless(&mut tick);
        }
        (tick, next)
    }

    fn release_fragment(&mut self, slot: usize, tick: &mut Tick) {
        let fragment = &mut self.fragments[slot];
        if fragment.id.is_some() || fragment.done {
            return;
        }
        let id = self.next_id.to_string();
        self.next_id += 1;
        fragment.id = Some(id.clone());
        tick.pending.push(PendingResult {
            id,
            path: fragment.path.clone(),
            label: fragment.label.clone(),
        });
    }

    fn release_stream(&mut self, slot: usize, tick: &mut Tick) {
        if self.streams[slot].id.is_some() || self.streams[slot].terminated {
            return;
        }
        let id = self.next_id.to_string();
        self.next_id += 1;
        self.streams[slot].id = Some(id.clone());
        tick.pending.push(PendingResult {
            id,
            path: self.streams[slot].path.clone(),
            label: self.streams[slot].label.clone(),
        });
        for event in std::mem::take(&mut self.streams[slot].buffered) {
            self.emit_stream_event(slot, event, tick);
        }
    }

    fn emit_stream_event(&mut self, slot: usize, event: StreamEvent, tick: &mut Tick) {
        let id = self.streams[slot].id.clone().unwrap_or_default();
        match event {
            StreamEvent::Item { value, errors } => {
                tick.incremental
                    .push(IncrementalResult::Stream(IncrementalStreamResult {
                        items: vec![value],
                        id,
                        errors: sorted(errors),
                    }));
            }
            StreamEvent::Fatal { errors } => {
                self.streams[slot].terminated = true;
                tick.completed.push(CompletedResult {
                    id,
                    errors: sorted(errors),
                });
            }
            StreamEvent::Done => {
                self.streams[slot].terminated = true;
                tick.completed.push(CompletedResult {
                    id,
                    errors: Vec::new(),
                });
            }
        }
    }

    fn check_complete(&mut self, slot: usize, tick: &mut Tick) {
        let fragment = &self.fragments[slot];
        if fragment.done || fragment.id.is_none() {
            return;
        }
        if fragment.gfs.iter().any(|&gfs| !self.gfs[gfs].reconciled) {
            return;
        }
        self.fragments[slot].done = true;
        for gfs in self.fragments[slot].gfs.clone() {
            if self.gfs[gfs].sent {
                continue;
            }
            self.gfs[gfs].sent = true;
            let (data, errors) = self.gfs[gfs].payload.take().unwrap_or_default();
            let (id, sub_path) = self.best_target(gfs);
            tick.incremental
                .push(IncrementalResult::Defer(IncrementalDeferResult {
                    data: JsonValue::Object(data),
                    id,
                    sub_path,
                    errors: sorted(errors),
                }));
        }
        if let Some(id) = self.fragments[slot].id.clone() {
            tick.completed.push(CompletedResult {
                id,
                errors: Vec::new(),
            });
        }
        for child in self.fragments[slot].child_fragments.clone() {
            self.release_fragment(child, tick);
            self.check_complete(child, tick);
        }
        for child in self.fragments[slot].child_streams.clone() {
            self.release_stream(child, tick);
        }
    }

    /// The deepest released fragment of a record's set: its identifier plus
    /// the remaining path from that fragment down to the record.
    fn best_target(&self, gfs: usize) -> (String, Option<Path>) {
        let record = &self.gfs[gfs];
        let mut best: Option<&FragmentSlot> = None;
        for &slot in &record.fragments {
            let fragment = &self.fragments[slot];
            if fragment.id.is_none() || fragment.failed {
                continue;
            }
            if best.map_or(true, |current| fragment.path.len() > current.path.len()) {
                best = Some(fragment);
            }
        }
        match best {
            Some(fragment) => (
                fragment.id.clone().unwrap_or_default(),
                record.path.slice_from(&fragment.path),
            ),
            None => (String::new(), None),
        }
    }

    /// A failed branch discards its data: the released fragment completes
    /// with errors, unreleased descendants are dropped silently.
    fn fail_fragment(&mut self, slot: usize, errors: &[GraphQLError], tick: &mut Tick) {
        if self.fragments[slot].done {
            return;
        }
        self.fragments[slot].done = true;
        self.fragments[slot].failed = true;
        if let Some(id) = self.fragments[slot].id.clone() {
            tick.completed.push(CompletedResult {
                id,
                errors: sorted(errors.to_vec()),
            });
        }
        for child in self.fragments[slot].child_fragments.clone() {
            self.fail_fragment(child, &[], tick);
        }
        for child in self.fragments[slot].child_streams.clone() {
            self.streams[child].terminated = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    fn data(value: JsonValue) -> JsonMap {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn root_fragment_lifecycle() {
        let mut graph = IncrementalGraph::default();
        let fragment = graph.register_fragment(Path::empty(), Some("slow".to_owned()), None);
        let gfs = graph.register_gfs(Path::empty(), vec![fragment]);

        let tick = graph.release_roots();
        assert_eq!(tick.pending.len(), 1);
        assert_eq!(tick.pending[0].id, "0");
        assert_eq!(tick.pending[0].label.as_deref(), Some("slow"));
        assert!(graph.has_outstanding());

        let (tick, _) = graph.apply(TaskEvent::GfsCompleted {
            gfs,
            result: Ok((data(json!({"a": 1})), Vec::new())),
        });
        assert_eq!(tick.incremental.len(), 1);
        assert_eq!(tick.completed.len(), 1);
        assert!(!graph.has_outstanding());
    }

    #[test]
    fn nested_fragment_releases_after_parent_completes() {
        let mut graph = IncrementalGraph::default();
        let outer = graph.register_fragment(Path::empty(), None, None);
        let inner = graph.register_fragment(Path::empty(), None, Some(outer));
        let outer_gfs = graph.register_gfs(Path::empty(), vec![outer]);
        let inner_gfs = graph.register_gfs(Path::empty(), vec![outer, inner]);

        let tick = graph.release_roots();
        // Only the outer boundary is announced initially.
        assert_eq!(tick.pending.len(), 1);

        // The inner record reconciling early completes nothing.
        let (tick, _) = graph.apply(TaskEvent::GfsCompleted {
            gfs: inner_gfs,
            result: Ok((data(json!({"inner": true})), Vec::new())),
        });
        assert!(tick.is_empty());

        let (tick, _) = graph.apply(TaskEvent::GfsCompleted {
            gfs: outer_gfs,
            result: Ok((data(json!({"outer": true})), Vec::new())),
        });
        // Outer data, outer completed, inner announced... and since the
        // inner record already reconciled, inner data and completed too.
        assert_eq!(tick.incremental.len(), 2);
        assert_eq!(tick.completed.len(), 2);
        assert_eq!(tick.pending.len(), 1);
        assert!(!graph.has_outstanding());
    }

    #[test]
    fn failed_branch_discards_descendants() {
        let mut graph = IncrementalGraph::default();
        let outer = graph.register_fragment(Path::empty(), None, None);
        let inner = graph.register_fragment(Path::empty(), None, Some(outer));
        let outer_gfs = graph.register_gfs(Path::empty(), vec![outer]);
        let _inner_gfs = graph.register_gfs(Path::empty(), vec![outer, inner]);
        graph.release_roots();

        let error = GraphQLError::new("boom");
        let (tick, _) = graph.apply(TaskEvent::GfsCompleted {
            gfs: outer_gfs,
            result: Err(vec![error]),
        });
        assert_eq!(tick.completed.len(), 1);
        assert_eq!(tick.completed[0].errors.len(), 1);
        // The unreleased inner fragment never reaches the wire.
        assert!(tick.pending.is_empty());
        assert!(!graph.has_outstanding());
    }

    #[test]
    fn parentless_fragment_registered_late_still_releases() {
        let mut graph = IncrementalGraph::default();
        let stream = graph.register_stream(
            Path::empty().child(crate::json_ext::PathElement::Key("items".to_owned())),
            None,
            None,
        );
        let tick = graph.release_roots();
        assert_eq!(tick.pending.len(), 1);

        // A @defer discovered while completing a stream item at the root.
        let fragment = graph.register_fragment(Path::empty(), Some("late".to_owned()), None);
        let gfs = graph.register_gfs(Path::empty(), vec![fragment]);

        let (tick, _) = graph.apply(TaskEvent::StreamItem {
            stream,
            event: StreamEvent::Item {
                value: json!(1),
                errors: Vec::new(),
            },
            next: None,
        });
        assert_eq!(tick.incremental.len(), 1);
        assert_eq!(tick.pending.len(), 1);
        assert_eq!(tick.pending[0].id, "1");
        assert_eq!(tick.pending[0].label.as_deref(), Some("late"));

        let (tick, _) = graph.apply(TaskEvent::GfsCompleted {
            gfs,
            result: Ok((data(json!({"b": 2})), Vec::new())),
        });
        assert_eq!(tick.incremental.len(), 1);
        assert_eq!(tick.completed.len(), 1);
    }

    #[test]
    fn stream_items_buffer_until_release() {
        let mut graph = IncrementalGraph::default();
        let fragment = graph.register_fragment(Path::empty(), None, None);
        let gfs = graph.register_gfs(Path::empty(), vec![fragment]);
        let stream = graph.register_stream(
            Path::empty().child(crate::json_ext::PathElement::Key("items".to_owned())),
            None,
            Some(fragment),
        );
        graph.release_roots();

        let (tick, _) = graph.apply(TaskEvent::StreamItem {
            stream,
            event: StreamEvent::Item {
                value: json!(1),
                errors: Vec::new(),
            },
            next: None,
        });
        // Not yet announced: nothing reaches the wire.
        assert!(tick.is_empty());

        let (tick, _) = graph.apply(TaskEvent::GfsCompleted {
            gfs,
            result: Ok((JsonMap::new(), Vec::new())),
        });
        // The stream is announced and its buffered item flushes.
        assert_eq!(tick.pending.len(), 1);
        assert_eq!(tick.incremental.len(), 2);

        let (tick, _) = graph.apply(TaskEvent::StreamItem {
            stream,
            event: StreamEvent::Done,
            next: None,
        });
        assert_eq!(tick.completed.len(), 1);
        assert!(!graph.has_outstanding());
    }
}
