//! Pipeline execution.
//!
//! [`PipelineExecutor`] runs the templates of a validated pipeline in
//! dependency order. Templates whose inputs are all produced are scheduled as
//! soon as a slot is free, never more than
//! [`ExecutorOptions::max_parallel_count`] at a time. Each template is retried
//! up to [`ExecutorOptions::max_execution_attempts`] times with the same
//! rendered prompt; a terminal failure skips everything that depends on it
//! while independent branches continue, unless the run is in crash-on-error
//! mode, in which case nothing new is scheduled and late results are discarded.
//!
//! # Example
//!
//! ```ignore
//! use promptforge::executor::{ExecutorOptions, ExecutorTools, PipelineExecutor};
//!
//! let executor = PipelineExecutor::new(pipeline, ExecutorTools::new(tools), ExecutorOptions::default())?;
//! let report = executor.execute(&inputs).await?;
//! for template in &report.templates {
//!     println!("{}: {}", template.name, template.status);
//! }
//! ```

pub mod dialog;
pub mod parameters;
pub mod progress;
pub mod report;
pub mod script;
mod template;

use std::collections::VecDeque;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

pub use dialog::{DialogRequest, StdinUserInterface, UserInterfaceTools};
pub use parameters::{knowledge_for, reserved_parameters};
pub use progress::{ProgressSink, TaskProgress};
pub use report::{ExecutionReport, PromptExecution, TemplateReport, TemplateStatus};
pub use script::{ProcessScriptTools, ScriptExecutionTools, ScriptRequest};

use template::TemplateRunner;

use crate::collection::PipelineCollection;
use crate::error::{PipelineExecutionError, PipelineLogicError};
use crate::llm::SharedExecutionTools;
use crate::metrics::MetricsCollector;
use crate::pipeline::{validate_pipeline, DependencyGraph, Pipeline};
use crate::preparation::{is_pipeline_prepared, prepare_pipeline, HttpFetcher, KnowledgeFetcher, PrepareOptions};
use crate::template::Parameters;

pub const DEFAULT_MAX_PARALLEL_COUNT: usize = 5;
pub const DEFAULT_MAX_EXECUTION_ATTEMPTS: usize = 3;

/// Scheduling and retry policy of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorOptions {
    pub max_parallel_count: usize,
    pub max_execution_attempts: usize,
    /// Abort the whole run on the first terminal template failure.
    pub is_crashed_on_error: bool,
    /// Used when the pipeline has to be prepared before running.
    pub prepare: PrepareOptions,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_parallel_count: DEFAULT_MAX_PARALLEL_COUNT,
            max_execution_attempts: DEFAULT_MAX_EXECUTION_ATTEMPTS,
            is_crashed_on_error: false,
            prepare: PrepareOptions::default(),
        }
    }
}

impl ExecutorOptions {
    pub fn with_max_parallel_count(mut self, count: usize) -> Self {
        self.max_parallel_count = count;
        self
    }

    pub fn with_max_execution_attempts(mut self, attempts: usize) -> Self {
        self.max_execution_attempts = attempts;
        self
    }

    pub fn with_crash_on_error(mut self, is_crashed_on_error: bool) -> Self {
        self.is_crashed_on_error = is_crashed_on_error;
        self
    }

    pub fn with_prepare_options(mut self, prepare: PrepareOptions) -> Self {
        self.prepare = prepare;
        self
    }
}

/// Everything templates may call out to.
#[derive(Clone)]
pub struct ExecutorTools {
    pub llm: SharedExecutionTools,
    pub script: Option<Arc<dyn ScriptExecutionTools>>,
    pub user_interface: Option<Arc<dyn UserInterfaceTools>>,
    /// Resolves joker pipelines by URL.
    pub collection: Option<Arc<dyn PipelineCollection>>,
    /// Reads URL knowledge sources during preparation.
    pub fetcher: Arc<dyn KnowledgeFetcher>,
}

impl ExecutorTools {
    pub fn new(llm: SharedExecutionTools) -> Self {
        Self {
            llm,
            script: None,
            user_interface: None,
            collection: None,
            fetcher: Arc::new(HttpFetcher::default()),
        }
    }

    pub fn with_script(mut self, script: Arc<dyn ScriptExecutionTools>) -> Self {
        self.script = Some(script);
        self
    }

    pub fn with_user_interface(mut self, user_interface: Arc<dyn UserInterfaceTools>) -> Self {
        self.user_interface = Some(user_interface);
        self
    }

    pub fn with_collection(mut self, collection: Arc<dyn PipelineCollection>) -> Self {
        self.collection = Some(collection);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn KnowledgeFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TemplateState {
    Pending,
    Ready,
    Running,
    Done,
}

/// Runs one validated pipeline, preparing it first when needed.
pub struct PipelineExecutor {
    pipeline: Pipeline,
    graph: DependencyGraph,
    tools: ExecutorTools,
    options: ExecutorOptions,
    prepared: OnceCell<Pipeline>,
    /// URLs of the pipelines that delegated to this one through jokers.
    joker_chain: Vec<String>,
}

impl PipelineExecutor {
    /// Validate `pipeline` and build its dependency graph.
    pub fn new(pipeline: Pipeline, tools: ExecutorTools, options: ExecutorOptions) -> Result<Self, PipelineLogicError> {
        validate_pipeline(&pipeline)?;
        let graph = DependencyGraph::build(&pipeline)?;
        Ok(Self {
            pipeline,
            graph,
            tools,
            options,
            prepared: OnceCell::new(),
            joker_chain: Vec::new(),
        })
    }

    pub(crate) fn with_joker_chain(mut self, joker_chain: Vec<String>) -> Self {
        self.joker_chain = joker_chain;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// The pipeline as it runs: prepared once, then reused by every execution.
    pub async fn prepared_pipeline(&self) -> Result<&Pipeline, PipelineExecutionError> {
        self.prepared
            .get_or_try_init(|| async {
                if is_pipeline_prepared(&self.pipeline) {
                    return Ok(self.pipeline.clone());
                }
                prepare_pipeline(
                    &self.pipeline,
                    self.tools.llm.as_ref(),
                    self.tools.fetcher.as_ref(),
                    &self.options.prepare,
                )
                .await
                .map_err(|e| PipelineExecutionError::Preparation(e.to_string()))
            })
            .await
    }

    /// Run the pipeline and report on every template.
    ///
    /// Fails only when the run cannot start: a missing input parameter or a
    /// failed preparation. Template failures are recorded in the report.
    pub async fn execute(&self, inputs: &Parameters) -> Result<ExecutionReport, PipelineExecutionError> {
        self.execute_with_progress(inputs, ProgressSink::none()).await
    }

    /// Run the pipeline and return its outputs, or the first template failure.
    pub async fn execute_or_fail(&self, inputs: &Parameters) -> Result<Parameters, PipelineExecutionError> {
        self.execute(inputs).await?.into_outputs()
    }

    /// Boxed so that joker pipelines can run nested executions.
    pub(crate) fn execute_nested<'a>(
        &'a self,
        inputs: &'a Parameters,
        progress: ProgressSink,
    ) -> BoxFuture<'a, Result<ExecutionReport, PipelineExecutionError>> {
        Box::pin(self.execute_with_progress(inputs, progress))
    }

    /// Like [`execute`](Self::execute), sending [`TaskProgress`] events to `progress`.
    pub async fn execute_with_progress(
        &self,
        inputs: &Parameters,
        progress: ProgressSink,
    ) -> Result<ExecutionReport, PipelineExecutionError> {
        for parameter in self.pipeline.input_parameters() {
            if !inputs.contains_key(&parameter.name) {
                return Err(PipelineExecutionError::MissingInput(parameter.name.clone()));
            }
        }

        let pipeline = self.prepared_pipeline().await?;
        let runner = TemplateRunner {
            pipeline,
            tools: &self.tools,
            options: &self.options,
            progress: &progress,
            joker_chain: &self.joker_chain,
        };
        let max_parallel = self.options.max_parallel_count.max(1);
        let count = pipeline.templates.len();

        info!(pipeline = %pipeline.title, templates = count, "Executing pipeline");

        let mut values = inputs.clone();
        let mut states = vec![TemplateState::Pending; count];
        let mut reports: Vec<Option<TemplateReport>> = vec![None; count];
        let mut report = ExecutionReport {
            pipeline_title: pipeline.title.clone(),
            pipeline_url: pipeline.pipeline_url.clone(),
            ..Default::default()
        };

        let mut ready: VecDeque<usize> = VecDeque::new();
        for &index in self.graph.order() {
            if self.graph.dependencies(index).is_empty() {
                states[index] = TemplateState::Ready;
                ready.push_back(index);
            }
        }

        let mut running = FuturesUnordered::new();
        let mut is_aborted = false;

        loop {
            while !is_aborted && running.len() < max_parallel {
                let Some(index) = ready.pop_front() else {
                    break;
                };
                states[index] = TemplateState::Running;
                let template = &pipeline.templates[index];
                info!(template = %template.name, "Template running");

                let available = values.clone();
                let runner = &runner;
                running.push(async move { (index, runner.run(template, &available).await) });
            }

            let Some((index, outcome)) = running.next().await else {
                break;
            };
            let template = &pipeline.templates[index];
            states[index] = TemplateState::Done;
            report.usage += &outcome.usage;
            report.executions.extend(outcome.executions);

            if is_aborted {
                reports[index] = Some(TemplateReport::skipped(
                    &template.name,
                    &template.title,
                    "result discarded, the run was aborted",
                ));
                continue;
            }

            match outcome.result {
                Ok(value) => {
                    info!(template = %template.name, attempts = outcome.attempts, "Template succeeded");
                    values.insert(template.resulting_parameter_name.clone(), value.clone());
                    reports[index] = Some(TemplateReport::succeeded(
                        &template.name,
                        &template.title,
                        outcome.attempts,
                        value,
                    ));

                    for &dependent in self.graph.dependents(index) {
                        let is_unblocked = self
                            .graph
                            .dependencies(dependent)
                            .iter()
                            .all(|&dependency| {
                                reports[dependency]
                                    .as_ref()
                                    .is_some_and(|r| r.status == TemplateStatus::Succeeded)
                            });
                        if states[dependent] == TemplateState::Pending && is_unblocked {
                            states[dependent] = TemplateState::Ready;
                            ready.push_back(dependent);
                        }
                    }
                }
                Err(failure) => {
                    error!(template = %template.name, attempts = outcome.attempts, error = %failure, "Template failed");
                    for dependent in self.graph.transitive_dependents(index) {
                        if states[dependent] == TemplateState::Pending {
                            states[dependent] = TemplateState::Done;
                            reports[dependent] = Some(TemplateReport::skipped(
                                &pipeline.templates[dependent].name,
                                &pipeline.templates[dependent].title,
                                format!("depends on failed template '{}'", template.name),
                            ));
                        }
                    }
                    reports[index] = Some(TemplateReport::failed(
                        &template.name,
                        &template.title,
                        outcome.attempts,
                        failure,
                    ));

                    if self.options.is_crashed_on_error {
                        warn!(pipeline = %pipeline.title, template = %template.name, "Aborting run after terminal failure");
                        is_aborted = true;
                    }
                }
            }
        }

        for (index, slot) in reports.iter_mut().enumerate() {
            if slot.is_none() {
                let template = &pipeline.templates[index];
                *slot = Some(TemplateReport::skipped(&template.name, &template.title, "the run was aborted"));
            }
        }

        let metrics = MetricsCollector::new();
        report.templates = reports.into_iter().flatten().collect();
        for template in &report.templates {
            metrics.record_template_outcome(&template.status.to_string());
        }

        report.is_aborted = is_aborted;
        if !is_aborted {
            report.outputs = pipeline
                .output_parameters()
                .filter_map(|p| values.get(&p.name).map(|value| (p.name.clone(), value.clone())))
                .collect();
        }

        info!(
            pipeline = %pipeline.title,
            succeeded = report.count(TemplateStatus::Succeeded),
            failed = report.count(TemplateStatus::Failed),
            skipped = report.count(TemplateStatus::Skipped),
            "Pipeline execution finished"
        );
        Ok(report)
    }
}
