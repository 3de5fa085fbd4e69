//! Petgraph-based DAG execution engine
//!
//! Turns a flow into an `ExecutionPlan` (action nodes only, cycle-checked with
//! petgraph) and walks it depth-first on a spawned task per run, dispatching
//! every node to the `HandlerRegistry` and appending results to the tracker.

use crate::config::EngineConfig;
use crate::error::{FlowError, Result};
use crate::runtime::executor::{ActionContext, HandlerRegistry};
use crate::runtime::history::ExecutionRecordStore;
use crate::runtime::tracker::{Execution, ExecutionStatus, ExecutionTracker};
use crate::workflow::types::{Flow, Node};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};
use tokio_util::sync::CancellationToken;

/// What a failed node does to its downstream nodes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and keep releasing successors
    #[default]
    Continue,
    /// Record the failure and release nothing downstream of the failed node
    HaltBranch,
}

/// When a node with several predecessors becomes ready
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicy {
    /// Wait until every predecessor has released it
    #[default]
    All,
    /// Fire on the first predecessor that releases it
    Any,
}

impl FromStr for FailurePolicy {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(Self::Continue),
            "halt_branch" | "halt-branch" => Ok(Self::HaltBranch),
            other => Err(FlowError::invalid_flow(format!("unknown failure policy '{}'", other))),
        }
    }
}

impl FromStr for JoinPolicy {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "any" => Ok(Self::Any),
            other => Err(FlowError::invalid_flow(format!("unknown join policy '{}'", other))),
        }
    }
}

impl fmt::Display for JoinPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::All => "all",
            Self::Any => "any",
        })
    }
}

/// Traversal plan of one flow: its action nodes, their edges and entry points
///
/// Step indices follow node declaration order, and each successor list
/// follows edge declaration order, so a traversal is deterministic.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    flow_id: String,
    flow_name: Option<String>,
    steps: Vec<Node>,
    successors: Vec<Vec<usize>>,
    in_degree: Vec<usize>,
    roots: Vec<usize>,
}

impl ExecutionPlan {
    /// Validate a flow and build its plan
    ///
    /// Trigger nodes and every edge touching them are left out. Duplicate node
    /// ids, dangling edges and cycles are `InvalidFlow`.
    pub fn build(flow: &Flow) -> Result<Self> {
        flow.validate()?;
        tracing::debug!(
            "📊 Building execution plan for '{}' with {} nodes and {} edges",
            flow.id,
            flow.nodes.len(),
            flow.edges.len()
        );

        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let mut index_of: HashMap<&str, NodeIndex> = HashMap::new();
        let mut steps = Vec::new();

        for node in flow.nodes.iter().filter(|node| !node.is_trigger()) {
            let index = graph.add_node(steps.len());
            index_of.insert(node.id.as_str(), index);
            steps.push(node.clone());
        }

        let mut successors = vec![Vec::new(); steps.len()];
        let mut in_degree = vec![0; steps.len()];
        for edge in &flow.edges {
            let (Some(&from), Some(&to)) = (
                index_of.get(edge.source.as_str()),
                index_of.get(edge.target.as_str()),
            ) else {
                // one endpoint is a trigger node
                continue;
            };
            graph.add_edge(from, to, ());
            successors[graph[from]].push(graph[to]);
            in_degree[graph[to]] += 1;
        }

        if let Err(cycle) = toposort(&graph, None) {
            let node_id = &steps[graph[cycle.node_id()]].id;
            tracing::error!("❌ Flow '{}' contains a cycle through '{}'", flow.id, node_id);
            return Err(FlowError::invalid_flow(format!(
                "flow contains a cycle through node '{}'",
                node_id
            )));
        }

        let roots = (0..steps.len()).filter(|&i| in_degree[i] == 0).collect();

        Ok(Self {
            flow_id: flow.id.clone(),
            flow_name: Some(flow.name.clone()).filter(|name| !name.is_empty()),
            steps,
            successors,
            in_degree,
            roots,
        })
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    /// Number of executable steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Ids of the zero in-degree nodes, in declaration order
    pub fn roots(&self) -> Vec<&str> {
        self.roots.iter().map(|&i| self.steps[i].id.as_str()).collect()
    }

    /// Ids of a node's direct successors, in edge declaration order
    pub fn successors(&self, node_id: &str) -> Vec<&str> {
        self.steps
            .iter()
            .position(|node| node.id == node_id)
            .map(|i| {
                self.successors[i]
                    .iter()
                    .map(|&j| self.steps[j].id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Per-run inputs moved into the spawned run task
struct RunContext {
    run_id: String,
    plan: ExecutionPlan,
    cancel: CancellationToken,
    tracker: Arc<ExecutionTracker>,
    handlers: Arc<HandlerRegistry>,
    failure_policy: FailurePolicy,
    join_policy: JoinPolicy,
}

impl RunContext {
    /// Depth-first walk from the roots
    ///
    /// Cancellation is checked before every dispatch. A dispatched handler is
    /// never preempted; if the run went terminal meanwhile its result is
    /// dropped by the tracker and the walk stops.
    async fn walk(&self) {
        let plan = &self.plan;
        let mut remaining = plan.in_degree.clone();
        let mut released = vec![false; plan.len()];
        let mut stack: Vec<usize> = plan.roots.iter().rev().copied().collect();
        for &root in &plan.roots {
            released[root] = true;
        }

        while let Some(step) = stack.pop() {
            if self.cancel.is_cancelled() {
                tracing::warn!("⏸️ Run {} cancelled, {} released nodes skipped", self.run_id, stack.len() + 1);
                return;
            }

            let node = &plan.steps[step];
            let ctx = ActionContext {
                flow_id: &plan.flow_id,
                execution_id: &self.run_id,
                node,
            };
            let result = self.handlers.dispatch(ctx).await;
            let failed = result.status == ExecutionStatus::Error;

            if !self.tracker.append_result(&self.run_id, result).await {
                tracing::debug!("🛑 Run {} already terminal, dropping result of '{}'", self.run_id, node.id);
                return;
            }

            if failed && self.failure_policy == FailurePolicy::HaltBranch {
                tracing::debug!("⛔ Halting branch below failed node '{}'", node.id);
                continue;
            }

            // pushed in reverse so the first declared successor runs first
            for &next in plan.successors[step].iter().rev() {
                let ready = match self.join_policy {
                    JoinPolicy::All => {
                        remaining[next] = remaining[next].saturating_sub(1);
                        remaining[next] == 0 && !released[next]
                    }
                    JoinPolicy::Any => !released[next],
                };
                if ready {
                    released[next] = true;
                    stack.push(next);
                }
            }
        }
    }
}

/// Flow execution engine
///
/// Every `run` is an independent tokio task; the engine itself holds no
/// per-run state beyond what the tracker owns.
pub struct FlowEngine {
    tracker: Arc<ExecutionTracker>,
    handlers: Arc<HandlerRegistry>,
    config: EngineConfig,
    records: Option<Arc<dyn ExecutionRecordStore>>,
}

impl FlowEngine {
    pub fn new(handlers: Arc<HandlerRegistry>, config: EngineConfig) -> Self {
        Self {
            tracker: Arc::new(ExecutionTracker::new()),
            handlers,
            config,
            records: None,
        }
    }

    /// Persist every run's terminal snapshot into `records`
    ///
    /// A persisted run is dropped from memory; `get` reads it back from `records`.
    pub fn with_records(mut self, records: Arc<dyn ExecutionRecordStore>) -> Self {
        self.records = Some(records);
        self
    }

    /// Parse a flow definition and run it
    pub async fn run_json(&self, definition: &str) -> Result<String> {
        self.run(Flow::from_json(definition)?).await
    }

    /// Start a run and return its id without waiting for it
    ///
    /// The flow is planned first, so an invalid flow creates no state.
    pub async fn run(&self, flow: Flow) -> Result<String> {
        let plan = ExecutionPlan::build(&flow)?;
        let execution = Execution::start(plan.flow_id.clone(), plan.flow_name.clone());
        let run_id = execution.id.clone();
        let cancel = CancellationToken::new();
        self.tracker.register(execution, cancel.clone()).await;

        tracing::info!(
            "🚀 Starting run {} of flow '{}' ({} steps)",
            run_id,
            plan.flow_id,
            plan.len()
        );

        let watchdog = self.spawn_watchdog(&run_id, &cancel);
        let records = self.records.clone();
        let run = RunContext {
            run_id: run_id.clone(),
            plan,
            cancel,
            tracker: Arc::clone(&self.tracker),
            handlers: Arc::clone(&self.handlers),
            failure_policy: self.config.failure_policy,
            join_policy: self.config.join_policy,
        };

        tokio::spawn(async move {
            let start_time = std::time::Instant::now();
            run.walk().await;
            if let Some(watchdog) = watchdog {
                watchdog.abort();
            }

            if run
                .tracker
                .mark_terminal(&run.run_id, ExecutionStatus::Success, None)
                .await
            {
                tracing::info!("🎉 Run {} completed in {:?}", run.run_id, start_time.elapsed());
            } else {
                tracing::warn!("🛑 Run {} ended early after {:?}", run.run_id, start_time.elapsed());
            }

            if let Some(records) = records {
                if let Some(snapshot) = run.tracker.get(&run.run_id).await {
                    match records.save(&snapshot).await {
                        Ok(()) => {
                            run.tracker.remove_finished(&run.run_id).await;
                        }
                        Err(e) => tracing::error!("❌ Failed to persist run {}: {}", run.run_id, e),
                    }
                }
            }
        });

        Ok(run_id)
    }

    /// Cancel the run when its wall-clock budget runs out; a zero budget disables it
    fn spawn_watchdog(
        &self,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if self.config.run_timeout_secs == 0 {
            return None;
        }
        let budget = self.config.run_timeout();
        let seconds = self.config.run_timeout_secs;
        let tracker = Arc::clone(&self.tracker);
        let cancel = cancel.clone();
        let run_id = run_id.to_string();

        Some(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(budget) => {
                    tracing::warn!("⏰ Run {} exceeded its {}s budget", run_id, seconds);
                    let reason = FlowError::Timeout { seconds }.to_string();
                    if let Err(e) = tracker.cancel(&run_id, reason).await {
                        tracing::debug!("Run {} finished before its timeout: {}", run_id, e);
                    }
                }
            }
        }))
    }

    /// Cooperatively stop an in-flight run; `NotFound` unless it is active
    pub async fn stop(&self, run_id: &str) -> Result<()> {
        self.tracker.cancel(run_id, "execution stopped").await?;
        tracing::info!("🛑 Stop requested for run {}", run_id);
        Ok(())
    }

    /// Snapshot of one run, from memory or else from the attached records
    pub async fn get(&self, run_id: &str) -> Result<Execution> {
        if let Some(execution) = self.tracker.get(run_id).await {
            return Ok(execution);
        }
        match &self.records {
            Some(records) => records.get(run_id).await.map_err(|e| {
                if e.is_not_found() {
                    FlowError::not_found("execution", run_id)
                } else {
                    e
                }
            }),
            None => Err(FlowError::not_found("execution", run_id)),
        }
    }

    /// Snapshot of every run held in memory (in flight, or finished and not
    /// persisted), unordered
    pub async fn list(&self) -> Vec<Execution> {
        self.tracker.list().await
    }
}
