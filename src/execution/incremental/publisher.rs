//! The publisher drives deferred work to completion and folds the graph's
//! ticks into subsequent payloads.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use futures::stream::FuturesUnordered;

use super::IncrementalFuture;
use super::graph::Tick;
use crate::execution::engine::ExecutionContext;
use crate::response::SubsequentResponse;
use crate::response::SubsequentStream;

struct PublisherState {
    ctx: Arc<ExecutionContext>,
    tasks: FuturesUnordered<IncrementalFuture>,
    swept: bool,
    done: bool,
}

/// The stream of payloads following an initial response. Work only advances
/// while the consumer polls; dropping the stream cancels every deferred
/// branch and stream source.
pub(crate) fn subsequent_stream(ctx: Arc<ExecutionContext>) -> SubsequentStream {
    let tasks = FuturesUnordered::new();
    for task in ctx.graph.lock().take_tasks() {
        tasks.push(task);
    }
    let state = PublisherState {
        ctx,
        tasks,
        swept: false,
        done: false,
    };
    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }
            let tick = if !state.swept {
                // Fragments with no deferred data of their own (every field
                // merged into the initial result) complete on the spot.
                state.swept = true;
                state.ctx.graph.lock().sweep()
            } else {
                let Some(event) = state.tasks.next().await else {
                    // All work finished without the graph noticing the end;
                    // close the stream rather than hang.
                    tracing::debug!("incremental task set drained early");
                    state.done = true;
                    return Some((
                        SubsequentResponse {
                            has_next: false,
                            ..Default::default()
                        },
                        state,
                    ));
                };
                let mut graph = state.ctx.graph.lock();
                let (tick, rearmed) = graph.apply(event);
                if let Some(task) = rearmed {
                    state.tasks.push(task);
                }
                // Deferred executions can register nested work of their own.
                for task in graph.take_tasks() {
                    state.tasks.push(task);
                }
                tick
            };
            let has_next =
                state.ctx.graph.lock().has_outstanding() || !state.tasks.is_empty();
            if tick.is_empty() && has_next {
                continue;
            }
            state.done = !has_next;
            return Some((payload(tick, has_next), state));
        }
    }))
}

fn payload(tick: Tick, has_next: bool) -> SubsequentResponse {
    SubsequentResponse {
        pending: tick.pending,
        incremental: tick.incremental,
        completed: tick.completed,
        has_next,
        ..Default::default()
    }
}
