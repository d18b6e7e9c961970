//! The state-graph workflow engine: nodes, edges, compilation, and execution.
//!
//! A [`StateGraph`] is built up with [`StateGraph::add_node_from_fn`] and
//! [`StateGraph::add_edge`]/[`StateGraph::add_conditional_edges`], then
//! [`StateGraph::compile`]d into a [`CompiledGraph`] that can be [`invoke`]d
//! repeatedly. Every compiled graph carries a default in-memory checkpointer
//! so interrupt/resume works out of the box; call
//! [`CompiledGraph::without_checkpointing`] to opt out, or
//! [`CompiledGraph::with_checkpointer`] to swap in a durable one.
//!
//! [`invoke`]: CompiledGraph::invoke
//!
//! ```rust
//! use insightql_core::graph::{StateGraph, END};
//!
//! #[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
//! struct Counter {
//!     value: i32,
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> insightql_core::Result<()> {
//! let mut graph: StateGraph<Counter> = StateGraph::new();
//! graph.add_node_from_fn("increment", |mut s| {
//!     Box::pin(async move {
//!         s.value += 1;
//!         Ok(s)
//!     })
//! });
//! graph.set_entry_point("increment");
//! graph.add_edge("increment", END);
//!
//! let app = graph.compile()?;
//! let result = app.invoke(Counter { value: 0 }).await?;
//! assert_eq!(result.final_state.value, 1);
//! # Ok(())
//! # }
//! ```

use crate::checkpoint::{Checkpoint, Checkpointer, MemoryCheckpointer};
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::state::GraphState;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Sentinel target name marking the end of a graph's execution path.
pub const END: &str = "__end__";

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A node's implementation: consumes the current state, returns the updated one.
type NodeFn<S> = Arc<dyn Fn(S) -> BoxFuture<'static, Result<S>> + Send + Sync>;

/// A routing function used by [`StateGraph::add_conditional_edges`]: inspects the
/// state after a node runs and returns a route key, looked up in that edge's
/// route table to find the next node.
type RouterFn<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;

enum Edge<S: GraphState> {
    Direct(String),
    Conditional {
        router: RouterFn<S>,
        routes: HashMap<String, String>,
    },
}

/// Per-node execution policy: how many times to retry a failing node, and how
/// long to let it run before treating it as timed out.
///
/// This retry budget is blunt — it retries on *any* node error, unlike the
/// error-discriminating [`crate::retry::with_retry`] a node body can use
/// internally to retry only transient failures of its own underlying call.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeConfig {
    /// Retry policy applied when the node function returns `Err`.
    pub retry_policy: RetryPolicy,
    /// Wall-clock budget for a single attempt; `None` means unbounded.
    pub timeout: Option<Duration>,
}

/// Result of [`GraphValidation`]'s structural analysis of a compiled graph.
///
/// Unreachable nodes fail [`StateGraph::compile`] outright (almost always a
/// builder typo); dead ends and missing paths to [`END`] are reported as
/// warnings so a graph under construction can still be compiled and inspected.
#[derive(Debug, Clone, Default)]
pub struct GraphValidation {
    unreachable_nodes: Vec<String>,
    dead_end_nodes: Vec<String>,
    no_path_to_end: bool,
}

impl GraphValidation {
    /// `true` if there are no unreachable nodes, no dead ends, and a path to
    /// [`END`] exists from the entry point.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.unreachable_nodes.is_empty() && self.dead_end_nodes.is_empty() && !self.no_path_to_end
    }

    /// Total number of distinct issues found.
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.unreachable_nodes.len() + self.dead_end_nodes.len() + usize::from(self.no_path_to_end)
    }

    /// `true` if any node is never reachable from the entry point.
    #[must_use]
    pub fn has_unreachable_nodes(&self) -> bool {
        !self.unreachable_nodes.is_empty()
    }

    /// Names of nodes that cannot be reached from the entry point.
    #[must_use]
    pub fn unreachable_nodes(&self) -> Vec<&str> {
        self.unreachable_nodes.iter().map(String::as_str).collect()
    }

    /// `true` if any reachable node has no outgoing edge at all.
    #[must_use]
    pub fn has_dead_end_nodes(&self) -> bool {
        !self.dead_end_nodes.is_empty()
    }

    /// Names of reachable nodes with no outgoing edge.
    #[must_use]
    pub fn dead_end_nodes(&self) -> Vec<&str> {
        self.dead_end_nodes.iter().map(String::as_str).collect()
    }

    /// `true` if no path from the entry point reaches [`END`].
    #[must_use]
    pub fn has_no_path_to_end(&self) -> bool {
        self.no_path_to_end
    }
}

fn compute_validation<S: GraphState>(
    nodes: &HashMap<String, NodeFn<S>>,
    edges: &HashMap<String, Edge<S>>,
    entry_point: &str,
) -> GraphValidation {
    let mut reachable: HashSet<String> = HashSet::new();
    let mut reaches_end = false;
    let mut queue = vec![entry_point.to_string()];

    while let Some(node) = queue.pop() {
        if node == END {
            reaches_end = true;
            continue;
        }
        if !reachable.insert(node.clone()) {
            continue;
        }
        match edges.get(&node) {
            Some(Edge::Direct(target)) => queue.push(target.clone()),
            Some(Edge::Conditional { routes, .. }) => {
                for target in routes.values() {
                    queue.push(target.clone());
                }
            }
            None => {}
        }
    }

    let unreachable_nodes: Vec<String> = nodes
        .keys()
        .filter(|name| !reachable.contains(*name))
        .cloned()
        .collect();

    let dead_end_nodes: Vec<String> = reachable
        .iter()
        .filter(|name| !edges.contains_key(*name))
        .cloned()
        .collect();

    GraphValidation {
        unreachable_nodes,
        dead_end_nodes,
        no_path_to_end: !reaches_end,
    }
}

/// Builder for a workflow graph: register nodes, wire edges, pick an entry
/// point, then [`compile`](StateGraph::compile) into a runnable
/// [`CompiledGraph`].
pub struct StateGraph<S: GraphState> {
    nodes: HashMap<String, NodeFn<S>>,
    edges: HashMap<String, Edge<S>>,
    entry_point: Option<String>,
    node_configs: HashMap<String, NodeConfig>,
}

impl<S: GraphState> Default for StateGraph<S> {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            entry_point: None,
            node_configs: HashMap::new(),
        }
    }
}

impl<S: GraphState> StateGraph<S> {
    /// Start building an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node under `name`, implemented by an async function from
    /// state to state.
    pub fn add_node_from_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S>> + Send + 'static,
    {
        self.nodes
            .insert(name.into(), Arc::new(move |s| Box::pin(f(s))));
        self
    }

    /// Wire an unconditional edge: after `from` runs, execution continues at `to`
    /// (or ends, if `to` is [`END`]).
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.insert(from.into(), Edge::Direct(to.into()));
        self
    }

    /// Wire a conditional edge: after `from` runs, `router` inspects the
    /// resulting state and returns a route key, looked up in `routes` to find
    /// the next node.
    pub fn add_conditional_edges<F>(
        &mut self,
        from: impl Into<String>,
        router: F,
        routes: HashMap<String, String>,
    ) -> &mut Self
    where
        F: Fn(&S) -> String + Send + Sync + 'static,
    {
        self.edges.insert(
            from.into(),
            Edge::Conditional {
                router: Arc::new(router),
                routes,
            },
        );
        self
    }

    /// Set the node execution starts at.
    pub fn set_entry_point(&mut self, name: impl Into<String>) -> &mut Self {
        self.entry_point = Some(name.into());
        self
    }

    /// Override the retry policy for a single node (default: no retries).
    pub fn with_node_retry(&mut self, name: impl Into<String>, policy: RetryPolicy) -> &mut Self {
        self.node_configs.entry(name.into()).or_default().retry_policy = policy;
        self
    }

    /// Bound how long a single attempt of a node may run before it is
    /// cancelled and treated as a failure (default: unbounded).
    pub fn with_node_timeout(&mut self, name: impl Into<String>, timeout: Duration) -> &mut Self {
        self.node_configs.entry(name.into()).or_default().timeout = Some(timeout);
        self
    }

    fn check_structure(&self, entry: &str) -> Result<()> {
        if !self.nodes.contains_key(entry) {
            return Err(Error::UnknownNode(entry.to_string()));
        }
        for (from, edge) in &self.edges {
            if !self.nodes.contains_key(from) {
                return Err(Error::UnknownNode(from.clone()));
            }
            let targets: Vec<&String> = match edge {
                Edge::Direct(to) => vec![to],
                Edge::Conditional { routes, .. } => routes.values().collect(),
            };
            for to in targets {
                if to != END && !self.nodes.contains_key(to) {
                    return Err(Error::UnknownNode(to.clone()));
                }
            }
        }
        Ok(())
    }

    fn into_compiled(self, entry_point: String) -> CompiledGraph<S> {
        CompiledGraph {
            nodes: Arc::new(self.nodes),
            edges: Arc::new(self.edges),
            entry_point,
            node_configs: Arc::new(self.node_configs),
            checkpointer: Some(Arc::new(MemoryCheckpointer::<S>::new())),
            thread_id: None,
            interrupt_before: Arc::new(HashSet::new()),
            interrupt_after: Arc::new(HashSet::new()),
        }
    }

    /// Compile the graph, rejecting it if any registered node is unreachable
    /// from the entry point. Dead ends and a missing path to [`END`] are left
    /// as warnings, inspectable via [`CompiledGraph::validate`].
    pub fn compile(self) -> Result<CompiledGraph<S>> {
        let entry = self.entry_point.clone().ok_or(Error::NoEntryPoint)?;
        self.check_structure(&entry)?;
        let validation = compute_validation(&self.nodes, &self.edges, &entry);
        if validation.has_unreachable_nodes() {
            return Err(Error::InvalidGraph(format!(
                "unreachable nodes: {:?}",
                validation.unreachable_nodes()
            )));
        }
        Ok(self.into_compiled(entry))
    }

    /// Compile the graph without rejecting unreachable nodes, so a graph under
    /// construction can still be inspected with [`CompiledGraph::validate`].
    pub fn compile_without_validation(self) -> Result<CompiledGraph<S>> {
        let entry = self.entry_point.clone().ok_or(Error::NoEntryPoint)?;
        self.check_structure(&entry)?;
        Ok(self.into_compiled(entry))
    }
}

/// Outcome of a single [`CompiledGraph::invoke`] or [`CompiledGraph::resume`]
/// call.
#[derive(Debug, Clone)]
pub struct GraphResult<S: GraphState> {
    /// The state after the last node that ran (or the state at the interrupt
    /// point, if execution paused).
    pub final_state: S,
    /// Names of nodes executed during this call, in order.
    pub nodes_executed: Vec<String>,
    /// `Some(node)` if execution paused at an `interrupt_before`/`interrupt_after`
    /// boundary; `None` if it ran to [`END`].
    pub interrupted_at: Option<String>,
    /// Nodes that would run next if resumed; empty once [`END`] is reached.
    pub next_nodes: Vec<String>,
}

/// A compiled, runnable workflow graph.
pub struct CompiledGraph<S: GraphState> {
    nodes: Arc<HashMap<String, NodeFn<S>>>,
    edges: Arc<HashMap<String, Edge<S>>>,
    entry_point: String,
    node_configs: Arc<HashMap<String, NodeConfig>>,
    checkpointer: Option<Arc<dyn Checkpointer<S>>>,
    thread_id: Option<String>,
    interrupt_before: Arc<HashSet<String>>,
    interrupt_after: Arc<HashSet<String>>,
}

impl<S: GraphState> CompiledGraph<S> {
    /// Attach (or replace) the checkpointer backing interrupt/resume.
    #[must_use]
    pub fn with_checkpointer<C: Checkpointer<S> + 'static>(mut self, checkpointer: C) -> Self {
        self.checkpointer = Some(Arc::new(checkpointer));
        self
    }

    /// Remove the checkpointer compiled in by default; interrupts become
    /// unusable until one is attached again.
    #[must_use]
    pub fn without_checkpointing(mut self) -> Self {
        self.checkpointer = None;
        self
    }

    /// Set the conversation/thread id checkpoints are keyed under.
    #[must_use]
    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Pause execution just before each named node runs, checkpointing the
    /// state so [`resume`](Self::resume) can continue from there.
    #[must_use]
    pub fn with_interrupt_before(mut self, nodes: Vec<&str>) -> Self {
        self.interrupt_before = Arc::new(nodes.into_iter().map(String::from).collect());
        self
    }

    /// Pause execution just after each named node runs.
    #[must_use]
    pub fn with_interrupt_after(mut self, nodes: Vec<&str>) -> Self {
        self.interrupt_after = Arc::new(nodes.into_iter().map(String::from).collect());
        self
    }

    /// Re-run the same structural analysis [`StateGraph::compile`] performs,
    /// for graphs compiled with [`StateGraph::compile_without_validation`].
    #[must_use]
    pub fn validate(&self) -> GraphValidation {
        compute_validation(&self.nodes, &self.edges, &self.entry_point)
    }

    /// Run the graph to completion (or to the first interrupt boundary),
    /// starting from `initial_state` at the entry point.
    pub async fn invoke(&self, initial_state: S) -> Result<GraphResult<S>> {
        self.run(initial_state, self.entry_point.clone()).await
    }

    /// Continue a previously interrupted run from its last checkpoint.
    pub async fn resume(&self) -> Result<GraphResult<S>> {
        let checkpointer = self
            .checkpointer
            .as_ref()
            .ok_or(Error::ResumeWithoutCheckpointer)?;
        let thread_id = self.thread_id.as_ref().ok_or(Error::ResumeWithoutThreadId)?;
        let checkpoint = checkpointer
            .get_latest(thread_id)
            .await?
            .ok_or_else(|| Error::NoCheckpointToResume(thread_id.clone()))?;
        self.run(checkpoint.state, checkpoint.node).await
    }

    /// Load the state of the last checkpoint for the configured thread,
    /// without resuming execution.
    pub async fn get_current_state(&self) -> Result<S> {
        let checkpointer = self
            .checkpointer
            .as_ref()
            .ok_or(Error::ResumeWithoutCheckpointer)?;
        let thread_id = self.thread_id.as_ref().ok_or(Error::ResumeWithoutThreadId)?;
        let checkpoint = checkpointer
            .get_latest(thread_id)
            .await?
            .ok_or_else(|| Error::NoCheckpointToResume(thread_id.clone()))?;
        Ok(checkpoint.state)
    }

    async fn save_checkpoint(&self, interrupt_node: &str, resume_node: &str, state: &S) -> Result<()> {
        let checkpointer = self
            .checkpointer
            .as_ref()
            .ok_or_else(|| Error::InterruptWithoutCheckpointer(interrupt_node.to_string()))?;
        let thread_id = self
            .thread_id
            .as_ref()
            .ok_or_else(|| Error::InterruptWithoutThreadId(interrupt_node.to_string()))?;
        checkpointer
            .save(Checkpoint::new(thread_id.clone(), resume_node.to_string(), state.clone()))
            .await?;
        Ok(())
    }

    fn next_node(&self, current: &str, state: &S) -> Result<String> {
        match self.edges.get(current) {
            Some(Edge::Direct(target)) => Ok(target.clone()),
            Some(Edge::Conditional { router, routes }) => {
                let key = router(state);
                routes.get(&key).cloned().ok_or_else(|| {
                    Error::InvalidGraph(format!(
                        "conditional router at node '{current}' returned unmapped route key '{key}'"
                    ))
                })
            }
            None => Err(Error::InvalidGraph(format!(
                "node '{current}' has no outgoing edge"
            ))),
        }
    }

    async fn execute_node(&self, name: &str, state: S) -> Result<S> {
        let node_fn = self
            .nodes
            .get(name)
            .ok_or_else(|| Error::UnknownNode(name.to_string()))?
            .clone();
        let config = self.node_configs.get(name).copied().unwrap_or_default();
        let max_attempts = config.retry_policy.max_attempts();

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let attempt_state = state.clone();
            let outcome = match config.timeout {
                Some(timeout) => match tokio::time::timeout(timeout, node_fn(attempt_state)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::NodeTimeout {
                        node: name.to_string(),
                        elapsed_ms: timeout.as_millis() as u64,
                    }),
                },
                None => node_fn(attempt_state).await,
            };

            match outcome {
                Ok(next_state) => return Ok(next_state),
                Err(err) => {
                    if attempt >= max_attempts {
                        return Err(Error::NodeFailed {
                            node: name.to_string(),
                            attempts: attempt,
                            source: Box::new(err),
                        });
                    }
                    let delay = config.retry_policy.delay_for_attempt(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    async fn run(&self, mut state: S, start_node: String) -> Result<GraphResult<S>> {
        let mut current = start_node;
        let mut nodes_executed = Vec::new();

        loop {
            if current == END {
                return Ok(GraphResult {
                    final_state: state,
                    nodes_executed,
                    interrupted_at: None,
                    next_nodes: Vec::new(),
                });
            }

            if !self.nodes.contains_key(&current) {
                return Err(Error::UnknownNode(current));
            }

            if self.interrupt_before.contains(&current) {
                self.save_checkpoint(&current, &current, &state).await?;
                return Ok(GraphResult {
                    final_state: state,
                    nodes_executed,
                    interrupted_at: Some(current.clone()),
                    next_nodes: vec![current],
                });
            }

            state = self.execute_node(&current, state).await?;
            nodes_executed.push(current.clone());

            let next = self.next_node(&current, &state)?;

            if self.interrupt_after.contains(&current) {
                self.save_checkpoint(&current, &next, &state).await?;
                let next_nodes = if next == END { Vec::new() } else { vec![next] };
                return Ok(GraphResult {
                    final_state: state,
                    nodes_executed,
                    interrupted_at: Some(current),
                    next_nodes,
                });
            }

            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointer;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, Default)]
    struct DemoState {
        value: i32,
        route: String,
        attempts: u32,
    }

    // ===== Compilation and validation =====

    #[test]
    fn compile_rejects_unreachable_node() {
        let mut graph: StateGraph<DemoState> = StateGraph::new();
        graph.add_node_from_fn("entry", |s| Box::pin(async move { Ok(s) }));
        graph.add_node_from_fn("unreachable", |s| Box::pin(async move { Ok(s) }));
        graph.add_edge("entry", END);
        graph.set_entry_point("entry");

        assert!(graph.compile().is_err());
    }

    #[test]
    fn compile_without_validation_allows_unreachable_node_for_inspection() {
        let mut graph: StateGraph<DemoState> = StateGraph::new();
        graph.add_node_from_fn("entry", |s| Box::pin(async move { Ok(s) }));
        graph.add_node_from_fn("unreachable", |s| Box::pin(async move { Ok(s) }));
        graph.add_edge("entry", END);
        graph.set_entry_point("entry");

        let app = graph.compile_without_validation().unwrap();
        let validation = app.validate();
        assert!(!validation.is_valid());
        assert!(validation.unreachable_nodes().contains(&"unreachable"));
    }

    #[test]
    fn validate_reports_dead_end_without_failing_compile() {
        let mut graph: StateGraph<DemoState> = StateGraph::new();
        graph.add_node_from_fn("entry", |s| Box::pin(async move { Ok(s) }));
        graph.add_node_from_fn("dead_end", |s| Box::pin(async move { Ok(s) }));
        graph.add_edge("entry", "dead_end");
        graph.set_entry_point("entry");

        let app = graph.compile().unwrap();
        let validation = app.validate();
        assert!(!validation.is_valid());
        assert!(validation.dead_end_nodes().contains(&"dead_end"));
        assert!(validation.has_no_path_to_end());
    }

    #[test]
    fn validate_reports_no_path_to_end_on_a_cycle() {
        let mut graph: StateGraph<DemoState> = StateGraph::new();
        graph.add_node_from_fn("a", |s| Box::pin(async move { Ok(s) }));
        graph.add_node_from_fn("b", |s| Box::pin(async move { Ok(s) }));
        graph.add_edge("a", "b");
        graph.add_edge("b", "a");
        graph.set_entry_point("a");

        let app = graph.compile().unwrap();
        assert!(app.validate().has_no_path_to_end());
    }

    // ===== Execution =====

    #[tokio::test]
    async fn invoke_runs_linear_graph_to_end() {
        let mut graph: StateGraph<DemoState> = StateGraph::new();
        graph.add_node_from_fn("increment", |mut s| {
            Box::pin(async move {
                s.value += 1;
                Ok(s)
            })
        });
        graph.set_entry_point("increment");
        graph.add_edge("increment", END);

        let app = graph.compile().unwrap();
        let result = app.invoke(DemoState::default()).await.unwrap();
        assert_eq!(result.final_state.value, 1);
        assert_eq!(result.nodes_executed, vec!["increment".to_string()]);
        assert!(result.interrupted_at.is_none());
    }

    #[tokio::test]
    async fn conditional_edges_route_based_on_state() {
        let mut graph: StateGraph<DemoState> = StateGraph::new();
        graph.add_node_from_fn("classify", |mut s| {
            Box::pin(async move {
                s.route = if s.value % 2 == 0 { "even" } else { "odd" }.to_string();
                Ok(s)
            })
        });
        graph.add_node_from_fn("handle_even", |mut s| {
            Box::pin(async move {
                s.route = "handled_even".to_string();
                Ok(s)
            })
        });
        graph.add_node_from_fn("handle_odd", |mut s| {
            Box::pin(async move {
                s.route = "handled_odd".to_string();
                Ok(s)
            })
        });
        graph.set_entry_point("classify");
        let mut routes = HashMap::new();
        routes.insert("even".to_string(), "handle_even".to_string());
        routes.insert("odd".to_string(), "handle_odd".to_string());
        graph.add_conditional_edges("classify", |s: &DemoState| s.route.clone(), routes);
        graph.add_edge("handle_even", END);
        graph.add_edge("handle_odd", END);

        let app = graph.compile().unwrap();
        let result = app
            .invoke(DemoState {
                value: 4,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(result.final_state.route, "handled_even");
    }

    // ===== Interrupt / resume =====

    #[tokio::test]
    async fn interrupt_before_without_checkpointer_errors() {
        let mut graph: StateGraph<DemoState> = StateGraph::new();
        graph.add_node_from_fn("node1", |s| Box::pin(async move { Ok(s) }));
        graph.set_entry_point("node1");
        graph.add_edge("node1", END);

        let app = graph
            .compile()
            .unwrap()
            .without_checkpointing()
            .with_interrupt_before(vec!["node1"]);

        let result = app.invoke(DemoState::default()).await;
        assert!(matches!(result, Err(Error::InterruptWithoutCheckpointer(_))));
    }

    #[tokio::test]
    async fn interrupt_before_pauses_and_resume_continues() {
        let mut graph: StateGraph<DemoState> = StateGraph::new();
        graph.add_node_from_fn("node1", |mut s| {
            Box::pin(async move {
                s.value += 1;
                Ok(s)
            })
        });
        graph.add_node_from_fn("node2", |mut s| {
            Box::pin(async move {
                s.value += 10;
                Ok(s)
            })
        });
        graph.set_entry_point("node1");
        graph.add_edge("node1", "node2");
        graph.add_edge("node2", END);

        let checkpointer = MemoryCheckpointer::new();
        let app = graph
            .compile()
            .unwrap()
            .with_checkpointer(checkpointer)
            .with_thread_id("thread-1")
            .with_interrupt_before(vec!["node2"]);

        let paused = app.invoke(DemoState::default()).await.unwrap();
        assert_eq!(paused.interrupted_at, Some("node2".to_string()));
        assert_eq!(paused.final_state.value, 1);

        let resumed = app.resume().await.unwrap();
        assert!(resumed.interrupted_at.is_none());
        assert_eq!(resumed.final_state.value, 11);
        assert_eq!(resumed.nodes_executed, vec!["node2".to_string()]);
    }

    #[tokio::test]
    async fn interrupt_after_reports_next_nodes() {
        let mut graph: StateGraph<DemoState> = StateGraph::new();
        graph.add_node_from_fn("node1", |mut s| {
            Box::pin(async move {
                s.value += 1;
                Ok(s)
            })
        });
        graph.add_node_from_fn("node2", |mut s| {
            Box::pin(async move {
                s.value += 10;
                Ok(s)
            })
        });
        graph.set_entry_point("node1");
        graph.add_edge("node1", "node2");
        graph.add_edge("node2", END);

        let app = graph
            .compile()
            .unwrap()
            .with_checkpointer(MemoryCheckpointer::new())
            .with_thread_id("thread-2")
            .with_interrupt_after(vec!["node1"]);

        let paused = app.invoke(DemoState::default()).await.unwrap();
        assert_eq!(paused.interrupted_at, Some("node1".to_string()));
        assert_eq!(paused.next_nodes, vec!["node2".to_string()]);

        let resumed = app.resume().await.unwrap();
        assert_eq!(resumed.final_state.value, 11);
        assert!(resumed.interrupted_at.is_none());
    }

    #[tokio::test]
    async fn resume_without_checkpointer_errors() {
        let mut graph: StateGraph<DemoState> = StateGraph::new();
        graph.add_node_from_fn("node1", |s| Box::pin(async move { Ok(s) }));
        graph.set_entry_point("node1");
        graph.add_edge("node1", END);

        let app = graph.compile().unwrap().without_checkpointing();
        assert!(matches!(app.resume().await, Err(Error::ResumeWithoutCheckpointer)));
    }

    #[tokio::test]
    async fn resume_without_thread_id_errors() {
        let mut graph: StateGraph<DemoState> = StateGraph::new();
        graph.add_node_from_fn("node1", |s| Box::pin(async move { Ok(s) }));
        graph.set_entry_point("node1");
        graph.add_edge("node1", END);

        let app = graph.compile().unwrap().with_checkpointer(MemoryCheckpointer::new());
        assert!(matches!(app.resume().await, Err(Error::ResumeWithoutThreadId)));
    }

    #[tokio::test]
    async fn resume_with_no_checkpoint_errors() {
        let mut graph: StateGraph<DemoState> = StateGraph::new();
        graph.add_node_from_fn("node1", |s| Box::pin(async move { Ok(s) }));
        graph.set_entry_point("node1");
        graph.add_edge("node1", END);

        let app = graph
            .compile()
            .unwrap()
            .with_checkpointer(MemoryCheckpointer::new())
            .with_thread_id("nonexistent-thread");

        assert!(matches!(app.resume().await, Err(Error::NoCheckpointToResume(_))));
    }

    // ===== Retry and timeout =====

    #[tokio::test]
    async fn node_retry_exhausts_budget_then_fails() {
        let mut graph: StateGraph<DemoState> = StateGraph::new();
        graph.add_node_from_fn("flaky", |mut s| {
            Box::pin(async move {
                s.attempts += 1;
                Err(Error::Generic("boom".to_string()))
            })
        });
        graph.set_entry_point("flaky");
        graph.add_edge("flaky", END);
        graph.with_node_retry("flaky", RetryPolicy::fixed(3, 1));

        let app = graph.compile().unwrap();
        let result = app.invoke(DemoState::default()).await;
        assert!(matches!(
            result,
            Err(Error::NodeFailed { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn node_timeout_triggers_node_failure() {
        let mut graph: StateGraph<DemoState> = StateGraph::new();
        graph.add_node_from_fn("slow", |s| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(s)
            })
        });
        graph.set_entry_point("slow");
        graph.add_edge("slow", END);
        graph.with_node_timeout("slow", Duration::from_millis(5));

        let app = graph.compile().unwrap();
        let result = app.invoke(DemoState::default()).await;
        assert!(matches!(result, Err(Error::NodeFailed { .. })));
    }
}
