//! Progress streaming: observe a running graph node-by-node instead of only
//! waiting for its final result.
//!
//! [`stream_workflow`] drives a [`CompiledGraph`] the same way
//! [`CompiledGraph::invoke`] does, but yields a [`ProgressDelta`] after every
//! node instead of returning once at the end. It is built on `async-stream`
//! rather than the heavier protobuf-based streaming transport used elsewhere
//! in the wider ecosystem this engine is drawn from — this is a lazy,
//! in-process `Stream`, not a cross-process telemetry export.

use crate::error::{Error, Result};
use crate::graph::{CompiledGraph, GraphResult, END};
use crate::state::GraphState;
use async_stream::stream;
use futures::Stream;

/// One increment of progress from a streamed workflow run.
#[derive(Debug, Clone)]
pub enum ProgressDelta<S: GraphState> {
    /// A node finished executing; `state` reflects its output.
    Progress {
        /// Name of the node that just finished.
        node: String,
        /// State immediately after this node ran.
        state: S,
    },
    /// Execution paused at an interrupt boundary.
    Interrupted {
        /// The node execution paused at.
        node: String,
        /// State at the point of interruption.
        state: S,
    },
    /// The run reached [`END`](crate::graph::END). Always the last item a
    /// well-formed stream yields.
    Complete {
        /// The final state.
        state: S,
        /// Every node executed over the whole run, in order.
        nodes_executed: Vec<String>,
    },
    /// A node failed and the run cannot continue. Always the last item,
    /// paired with no further deltas.
    Error {
        /// Description of the failure.
        message: String,
    },
}

/// Run `graph` from `initial_state`, yielding a [`ProgressDelta`] after each
/// node executes. The stream always ends with exactly one terminal delta:
/// [`ProgressDelta::Complete`], [`ProgressDelta::Interrupted`], or
/// [`ProgressDelta::Error`].
///
/// Internally this re-invokes the graph one node at a time using
/// `interrupt_after` semantics under the hood, so the same checkpointing
/// machinery backs both `invoke` and streamed runs.
pub fn stream_workflow<S>(
    graph: CompiledGraph<S>,
    initial_state: S,
) -> impl Stream<Item = ProgressDelta<S>>
where
    S: GraphState,
{
    stream! {
        let mut state = initial_state;
        let mut cursor = StepCursor::Start;

        loop {
            let step_result = match &cursor {
                StepCursor::Start => graph.invoke(state.clone()).await,
                StepCursor::Resuming => graph.resume().await,
            };

            match step_result {
                Ok(GraphResult {
                    final_state,
                    nodes_executed,
                    interrupted_at,
                    ..
                }) => {
                    state = final_state.clone();
                    for node in &nodes_executed {
                        yield ProgressDelta::Progress {
                            node: node.clone(),
                            state: final_state.clone(),
                        };
                    }
                    match interrupted_at {
                        Some(node) => {
                            yield ProgressDelta::Interrupted {
                                node,
                                state: final_state,
                            };
                            cursor = StepCursor::Resuming;
                        }
                        None => {
                            yield ProgressDelta::Complete {
                                state: final_state,
                                nodes_executed,
                            };
                            break;
                        }
                    }
                }
                Err(err) => {
                    yield ProgressDelta::Error {
                        message: err.to_string(),
                    };
                    break;
                }
            }
        }
    }
}

enum StepCursor {
    Start,
    Resuming,
}

/// Drain a [`stream_workflow`] stream down to its terminal delta, discarding
/// intermediate progress. Equivalent to [`CompiledGraph::invoke`] but built on
/// the same machinery as streaming, useful where both code paths should agree
/// on error classification.
pub async fn run_to_completion<S>(graph: CompiledGraph<S>, initial_state: S) -> Result<S>
where
    S: GraphState,
{
    use futures::StreamExt;
    let mut stream = Box::pin(stream_workflow(graph, initial_state));
    let mut last_state: Option<S> = None;
    while let Some(delta) = stream.next().await {
        match delta {
            ProgressDelta::Progress { state, .. } => last_state = Some(state),
            ProgressDelta::Interrupted { state, .. } => return Ok(state),
            ProgressDelta::Complete { state, .. } => return Ok(state),
            ProgressDelta::Error { message } => return Err(Error::Generic(message)),
        }
    }
    last_state.ok_or_else(|| Error::Generic("stream ended without producing any state".to_string()))
}
