//! Built-in demonstration engine: a `graph_flow` pipeline that plans research units,
//! delegates them to a sub-agent in bounded rounds and synthesizes a markdown report.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::future::join_all;
use graph_flow::{
    Context, ExecutionStatus, FlowRunner, GraphBuilder, GraphError, InMemorySessionStorage,
    NextAction, Session, SessionStorage, Task, TaskResult,
};
use serde_json::json;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::{EngineOutcome, EngineParams, ResearchEngine, SignalSink};
use crate::error::EngineError;
use crate::normalize::EngineSignal;
use crate::report::ReportStore;
use crate::request::SubAgentSpec;

const DEFAULT_SUB_AGENT: &str = "research-agent";
const SEARCH_TOOL: &str = "tavily_search";
const THINK_TOOL: &str = "think_tool";

/// Sub-agents the built-in engine can delegate to.
pub fn builtin_sub_agents() -> Vec<SubAgentSpec> {
    let tools = [SEARCH_TOOL, THINK_TOOL];
    vec![
        SubAgentSpec::new(
            DEFAULT_SUB_AGENT,
            "General-purpose researcher that searches the web and summarizes findings",
        )
        .with_tools(tools),
        SubAgentSpec::new(
            "news-researcher",
            "Focuses on recent news coverage and current events",
        )
        .with_tools(tools),
        SubAgentSpec::new(
            "technical-docs-researcher",
            "Reads technical documentation, specifications and API references",
        )
        .with_tools(tools),
        SubAgentSpec::new(
            "code-analyst",
            "Investigates source repositories and implementation details",
        )
        .with_tools(tools),
    ]
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Simulated latency of one search call.
    pub step_delay: Duration,
    /// Directory prefix for report references.
    pub report_prefix: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_millis(150),
            report_prefix: "reports".to_string(),
        }
    }
}

impl PipelineSettings {
    pub fn with_step_delay(mut self, step_delay: Duration) -> Self {
        self.step_delay = step_delay;
        self
    }
}

pub struct PipelineEngine {
    reports: Arc<dyn ReportStore>,
    settings: PipelineSettings,
}

impl PipelineEngine {
    pub fn new(reports: Arc<dyn ReportStore>, settings: PipelineSettings) -> Self {
        Self { reports, settings }
    }
}

/// Everything a task needs that cannot travel through the serializable graph context.
struct RunScope {
    params: EngineParams,
    signals: SignalSink,
    cancel: CancellationToken,
    reports: Arc<dyn ReportStore>,
    settings: PipelineSettings,
}

impl RunScope {
    fn sub_agent(&self) -> &str {
        self.params.sub_agent.as_deref().unwrap_or(DEFAULT_SUB_AGENT)
    }

    fn ensure_live(&self) -> graph_flow::Result<()> {
        if self.cancel.is_cancelled() {
            return Err(GraphError::TaskExecutionFailed("cancelled".into()));
        }
        Ok(())
    }

    /// Emit a signal; a closed sink means the executor gave up on this run.
    async fn emit(&self, signal: EngineSignal) -> graph_flow::Result<()> {
        if self.signals.emit(signal).await {
            Ok(())
        } else {
            Err(GraphError::TaskExecutionFailed("cancelled".into()))
        }
    }

    async fn pause(&self) -> graph_flow::Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(GraphError::TaskExecutionFailed("cancelled".into())),
            _ = tokio::time::sleep(self.settings.step_delay) => Ok(()),
        }
    }
}

struct PlanTask {
    scope: Arc<RunScope>,
}

#[async_trait]
impl Task for PlanTask {
    fn id(&self) -> &str {
        "planner"
    }

    #[instrument(name = "task.plan", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let scope = &self.scope;
        scope.ensure_live()?;

        let query = scope.params.query.clone();
        let angles = [
            "background and definitions",
            "recent developments",
            "practical applications",
            "open problems and criticism",
            "key organizations and people",
        ];
        let topics: Vec<String> = angles
            .iter()
            .take(scope.params.max_concurrent_units.max(1))
            .map(|angle| format!("{query}: {angle}"))
            .collect();

        let reflection = format!(
            "Split \"{query}\" into {} research units for {}",
            topics.len(),
            scope.sub_agent()
        );
        scope
            .emit(EngineSignal::ToolStarted {
                name: THINK_TOOL.into(),
                arguments: json!({ "reflection": reflection }),
            })
            .await?;
        scope
            .emit(EngineSignal::ToolFinished {
                name: THINK_TOOL.into(),
                output: format!("Reflection recorded: {reflection}"),
            })
            .await?;

        context.set("plan.topics", &topics).await;
        debug!(units = topics.len(), "research plan ready");

        Ok(TaskResult::new(
            Some(format!("Planned {} research units", topics.len())),
            NextAction::ContinueAndExecute,
        ))
    }
}

struct DelegateTask {
    scope: Arc<RunScope>,
}

impl DelegateTask {
    async fn research_unit(
        &self,
        permits: &Semaphore,
        round: usize,
        index: usize,
        topic: &str,
    ) -> graph_flow::Result<String> {
        let scope = &self.scope;
        let _permit = permits
            .acquire()
            .await
            .map_err(|err| GraphError::TaskExecutionFailed(err.to_string()))?;
        scope.ensure_live()?;

        let delegation_id = format!("{}-r{round}-u{index}", scope.params.request_id);
        scope
            .emit(EngineSignal::Delegated {
                delegation_id: delegation_id.clone(),
                sub_agent: scope.sub_agent().to_string(),
                task: format!("Research {topic}"),
            })
            .await?;
        scope
            .emit(EngineSignal::ToolStarted {
                name: SEARCH_TOOL.into(),
                arguments: json!({ "query": topic, "max_results": 3 }),
            })
            .await?;

        scope.pause().await?;

        let finding = format!(
            "Round {round}: sources on {topic} agree on the main points and disagree on timelines"
        );
        scope
            .emit(EngineSignal::ToolFinished {
                name: SEARCH_TOOL.into(),
                output: finding.clone(),
            })
            .await?;
        scope
            .emit(EngineSignal::DelegationFinished {
                delegation_id,
                summary: format!("Summarized findings on {topic}"),
            })
            .await?;
        Ok(finding)
    }
}

#[async_trait]
impl Task for DelegateTask {
    fn id(&self) -> &str {
        "delegator"
    }

    #[instrument(name = "task.delegate", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let scope = &self.scope;
        let topics: Vec<String> = context.get("plan.topics").await.unwrap_or_default();
        let permits = Semaphore::new(scope.params.max_concurrent_units.max(1));
        let mut findings = Vec::new();

        for round in 1..=scope.params.max_iterations.max(1) {
            scope.ensure_live()?;
            scope
                .emit(EngineSignal::Progress {
                    message: format!(
                        "Round {round} of {}: delegating {} units",
                        scope.params.max_iterations,
                        topics.len()
                    ),
                })
                .await?;

            let units = topics
                .iter()
                .enumerate()
                .map(|(index, topic)| self.research_unit(&permits, round, index + 1, topic));
            for result in join_all(units).await {
                findings.push(result?);
            }
        }

        context.set("research.findings", &findings).await;
        info!(findings = findings.len(), "research units finished");

        Ok(TaskResult::new(
            Some(format!("Collected {} findings", findings.len())),
            NextAction::ContinueAndExecute,
        ))
    }
}

struct SynthesizeTask {
    scope: Arc<RunScope>,
}

#[async_trait]
impl Task for SynthesizeTask {
    fn id(&self) -> &str {
        "synthesizer"
    }

    #[instrument(name = "task.synthesize", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let scope = &self.scope;
        scope.ensure_live()?;

        let findings: Vec<String> = context.get("research.findings").await.unwrap_or_default();
        scope
            .emit(EngineSignal::Progress {
                message: format!("Synthesizing report from {} findings", findings.len()),
            })
            .await?;

        let mut report = format!("# {}\n\n## Findings\n\n", scope.params.query);
        for finding in &findings {
            report.push_str("- ");
            report.push_str(finding);
            report.push('\n');
        }
        report.push_str(&format!(
            "\n_Prepared by {} across {} rounds._\n",
            scope.sub_agent(),
            scope.params.max_iterations
        ));

        let report_ref = format!(
            "{}/{}.md",
            scope.settings.report_prefix, scope.params.request_id
        );
        scope
            .reports
            .store(&report_ref, report)
            .await
            .map_err(|err| GraphError::TaskExecutionFailed(err.to_string()))?;
        scope
            .emit(EngineSignal::ReportWritten {
                report_ref: report_ref.clone(),
            })
            .await?;

        context.set("report.ref", report_ref.clone()).await;
        Ok(TaskResult::new(Some(report_ref), NextAction::End))
    }
}

#[async_trait]
impl ResearchEngine for PipelineEngine {
    fn sub_agents(&self) -> Vec<SubAgentSpec> {
        builtin_sub_agents()
    }

    async fn run(
        &self,
        params: EngineParams,
        signals: SignalSink,
        cancel: CancellationToken,
    ) -> Result<EngineOutcome, EngineError> {
        let session_id = format!("research-{}", params.request_id);
        let scope = Arc::new(RunScope {
            params,
            signals,
            cancel: cancel.clone(),
            reports: self.reports.clone(),
            settings: self.settings.clone(),
        });

        let result = run_graph(scope, &session_id).await;
        match result {
            Err(_) if cancel.is_cancelled() => Err(EngineError::new("cancelled")),
            Err(err) => Err(EngineError::new(err.to_string())),
            Ok(report_ref) => Ok(EngineOutcome::Report { report_ref }),
        }
    }
}

async fn run_graph(scope: Arc<RunScope>, session_id: &str) -> anyhow::Result<String> {
    let plan = Arc::new(PlanTask {
        scope: scope.clone(),
    });
    let delegate = Arc::new(DelegateTask {
        scope: scope.clone(),
    });
    let synthesize = Arc::new(SynthesizeTask { scope });

    let graph = Arc::new(
        GraphBuilder::new("research_pipeline")
            .add_task(plan.clone())
            .add_task(delegate.clone())
            .add_task(synthesize.clone())
            .add_edge(plan.id(), delegate.id())
            .add_edge(delegate.id(), synthesize.id())
            .set_start_task(plan.id())
            .build(),
    );

    let storage = Arc::new(InMemorySessionStorage::new());
    let runner = FlowRunner::new(graph, storage.clone());
    storage
        .save(Session::new_from_task(session_id.to_string(), plan.id()))
        .await
        .map_err(|err| anyhow!("failed to persist session: {err}"))?;

    loop {
        let result = runner
            .run(session_id)
            .await
            .map_err(|err| anyhow!("research pipeline failed: {err}"))?;

        match result.status {
            ExecutionStatus::Completed => break,
            ExecutionStatus::WaitingForInput => continue,
            ExecutionStatus::Error(message) => return Err(anyhow!(message)),
        }
    }

    let session = storage
        .get(session_id)
        .await
        .map_err(|err| anyhow!("failed to reload session: {err}"))?
        .ok_or_else(|| anyhow!("session missing after execution"))?;

    session
        .context
        .get::<String>("report.ref")
        .await
        .ok_or_else(|| anyhow!("pipeline finished without writing a report"))
}
