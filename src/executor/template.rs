//! Running one template: rendering, dispatch by kind, retries and checks.

use tracing::{debug, info, warn};

use super::dialog::{DialogRequest, UserInterfaceTools};
use super::parameters::template_parameters;
use super::progress::{ProgressSink, TaskProgress};
use super::report::PromptExecution;
use super::script::{ScriptExecutionTools, ScriptRequest};
use super::{ExecutorOptions, ExecutorTools, PipelineExecutor};
use crate::error::PipelineExecutionError;
use crate::llm::{call_model, ModelCallResult, Prompt, Usage};
use crate::metrics::MetricsCollector;
use crate::pipeline::{is_reserved_parameter_name, Persona, Pipeline, Template, TemplateKind};
use crate::template::{render_template, Parameters};
use crate::utils::{apply_postprocessing, check_expectations, check_format, is_passing_expectations};

/// What running a template produced, whether or not it succeeded.
#[derive(Debug)]
pub(crate) struct TemplateOutcome {
    pub attempts: usize,
    pub executions: Vec<PromptExecution>,
    pub usage: Usage,
    pub result: Result<String, PipelineExecutionError>,
}

/// How one attempt of a retried template is made.
enum Attempt<'r> {
    Prompt(&'r Prompt),
    Script(&'r dyn ScriptExecutionTools, &'r ScriptRequest),
    Dialog(&'r dyn UserInterfaceTools, &'r DialogRequest),
}

#[derive(Debug, Default)]
struct Trace {
    attempts: usize,
    executions: Vec<PromptExecution>,
    usage: Usage,
}

pub(crate) struct TemplateRunner<'a> {
    pub pipeline: &'a Pipeline,
    pub tools: &'a ExecutorTools,
    pub options: &'a ExecutorOptions,
    pub progress: &'a ProgressSink,
    pub joker_chain: &'a [String],
}

impl TemplateRunner<'_> {
    pub async fn run(&self, template: &Template, available: &Parameters) -> TemplateOutcome {
        let started = TaskProgress::started(
            &template.name,
            &template.title,
            template.kind.as_str(),
            &template.resulting_parameter_name,
        );
        self.progress.emit(started.clone());

        let mut trace = Trace::default();
        let result = self.execute(template, available, &mut trace).await;

        self.progress.emit(started.finished(result.as_ref().ok().cloned()));
        TemplateOutcome {
            attempts: trace.attempts,
            executions: trace.executions,
            usage: trace.usage,
            result,
        }
    }

    async fn execute(
        &self,
        template: &Template,
        available: &Parameters,
        trace: &mut Trace,
    ) -> Result<String, PipelineExecutionError> {
        let parameters = template_parameters(self.pipeline, template, available)?;

        for name in &template.joker_parameter_names {
            if let Some(value) = parameters.get(name) {
                if is_passing_expectations(&template.expectations, template.format, value) {
                    info!(template = %template.name, joker = %name, "Joker value accepted");
                    return Ok(value.clone());
                }
            }
        }

        if let Some(url) = &template.joker_pipeline_url {
            return self.run_joker_pipeline(template, url, available, trace).await;
        }

        match template.kind {
            TemplateKind::Simple => {
                trace.attempts = 1;
                MetricsCollector::new().record_template_attempt(template.kind.as_str());
                let rendered = render_template(&template.content, &parameters)?;
                finish(template, &rendered)
            }
            TemplateKind::Prompt => {
                trace.attempts = 1;
                let rendered = render_template(&template.content, &parameters)?;
                let prompt = self.build_prompt(template, rendered, &parameters)?;
                self.retry(template, Attempt::Prompt(&prompt), trace).await
            }
            TemplateKind::Script => {
                let script = self
                    .tools
                    .script
                    .as_deref()
                    .ok_or_else(|| PipelineExecutionError::MissingTools("script execution tools".into()))?;
                let request = ScriptRequest {
                    language: template.content_language.clone(),
                    script: template.content.clone(),
                    parameters: dependency_values(&parameters),
                };
                self.retry(template, Attempt::Script(script, &request), trace).await
            }
            TemplateKind::Dialog => {
                trace.attempts = 1;
                let interface = self
                    .tools
                    .user_interface
                    .as_deref()
                    .ok_or_else(|| PipelineExecutionError::MissingTools("user interface tools".into()))?;
                let request = DialogRequest {
                    title: template.title.clone(),
                    prompt: render_template(&template.content, &parameters)?,
                    default_value: None,
                };
                self.retry(template, Attempt::Dialog(interface, &request), trace).await
            }
        }
    }

    /// Repeat `attempt` until its postprocessed result passes the expectations.
    ///
    /// Backend errors and violated expectations are both retried, up to the
    /// configured attempt count; the last error is returned.
    async fn retry(
        &self,
        template: &Template,
        attempt: Attempt<'_>,
        trace: &mut Trace,
    ) -> Result<String, PipelineExecutionError> {
        let max_attempts = self.options.max_execution_attempts.max(1);
        let mut last_error = None;

        for number in 1..=max_attempts {
            trace.attempts = number;
            MetricsCollector::new().record_template_attempt(template.kind.as_str());

            let result = match &attempt {
                Attempt::Prompt(prompt) => self.attempt_prompt(template, prompt, trace).await,
                Attempt::Script(script, request) => script.execute(request).await.map_err(PipelineExecutionError::from),
                Attempt::Dialog(interface, request) => interface
                    .prompt_dialog(request)
                    .await
                    .map_err(PipelineExecutionError::from),
            };
            let checked = result.and_then(|raw| finish(template, &raw));
            if let Some(execution) = trace.executions.last_mut() {
                if execution.attempt == number && execution.template_name == template.name {
                    execution.error = checked.as_ref().err().map(ToString::to_string);
                }
            }

            match checked {
                Ok(value) => {
                    debug!(template = %template.name, attempt = number, "Template attempt succeeded");
                    return Ok(value);
                }
                Err(error) => {
                    if number < max_attempts {
                        warn!(template = %template.name, attempt = number, error = %error, "Template attempt failed, retrying");
                    }
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| PipelineExecutionError::Aborted(format!("{} never ran", template.name))))
    }

    /// One backend call, recorded as a [`PromptExecution`].
    async fn attempt_prompt(
        &self,
        template: &Template,
        prompt: &Prompt,
        trace: &mut Trace,
    ) -> Result<String, PipelineExecutionError> {
        let (text, result) = match call_model(self.tools.llm.as_ref(), prompt).await {
            Ok(ModelCallResult::Text(result)) => {
                trace.usage += &result.usage;
                (Ok(result.content.clone()), Some(result))
            }
            Ok(ModelCallResult::Embedding(result)) => {
                trace.usage += &result.usage;
                let text = serde_json::to_string(&result.embedding)
                    .map_err(|e| PipelineExecutionError::Aborted(format!("cannot serialize embedding: {e}")));
                (text, None)
            }
            Err(error) => (Err(PipelineExecutionError::from(error)), None),
        };
        trace.executions.push(PromptExecution {
            template_name: template.name.clone(),
            attempt: trace.attempts,
            prompt: prompt.clone(),
            result,
            error: text.as_ref().err().map(ToString::to_string),
        });
        text
    }

    fn build_prompt(
        &self,
        template: &Template,
        content: String,
        parameters: &Parameters,
    ) -> Result<Prompt, PipelineExecutionError> {
        let mut requirements = self.pipeline.effective_model_requirements(template);
        if let Some(name) = &template.persona_name {
            match self.pipeline.persona(name) {
                Some(Persona::Prepared(persona)) => {
                    requirements = persona.model_requirements.merged_with(&requirements);
                }
                _ => return Err(PipelineExecutionError::UnpreparedPersona(name.clone())),
            }
        }

        let mut prompt = Prompt::new(template.title.as_str(), content, requirements)
            .with_parameters(dependency_values(parameters))
            .with_pipeline_url(self.pipeline.pipeline_url.clone());
        prompt.postprocessing_function_names = template.postprocessing_function_names.clone();
        prompt.expectations = (!template.expectations.is_empty()).then(|| template.expectations.clone());
        prompt.format = template.format;
        Ok(prompt)
    }

    async fn run_joker_pipeline(
        &self,
        template: &Template,
        url: &str,
        available: &Parameters,
        trace: &mut Trace,
    ) -> Result<String, PipelineExecutionError> {
        let joker_error = |message: String| PipelineExecutionError::JokerPipeline {
            url: url.to_string(),
            message,
        };

        trace.attempts = 1;
        let own_url = self.pipeline.pipeline_url.as_deref();
        if own_url == Some(url) || self.joker_chain.iter().any(|visited| visited == url) {
            return Err(joker_error("recursive joker pipeline".to_string()));
        }

        let collection = self
            .tools
            .collection
            .as_ref()
            .ok_or_else(|| PipelineExecutionError::MissingTools("pipeline collection".into()))?;
        let pipeline = collection
            .get_pipeline_by_url(url)
            .await
            .map_err(|e| joker_error(e.to_string()))?;

        info!(template = %template.name, pipeline = %url, "Delegating to joker pipeline");
        let mut chain = self.joker_chain.to_vec();
        chain.extend(own_url.map(str::to_string));
        chain.push(url.to_string());
        let executor = PipelineExecutor::new(pipeline, self.tools.clone(), self.options.clone())
            .map_err(|e| joker_error(e.to_string()))?
            .with_joker_chain(chain);
        let inputs: Parameters = executor
            .pipeline()
            .input_parameters()
            .filter_map(|p| available.get(&p.name).map(|value| (p.name.clone(), value.clone())))
            .collect();

        let report = executor
            .execute_nested(&inputs, self.progress.clone())
            .await
            .map_err(|e| joker_error(e.to_string()))?;
        trace.usage += &report.usage;

        let outputs = report.into_outputs().map_err(|e| joker_error(e.to_string()))?;
        let value = outputs
            .get(&template.resulting_parameter_name)
            .ok_or_else(|| joker_error(format!("no output named '{}'", template.resulting_parameter_name)))?;
        finish(template, value)
    }
}

/// Postprocess in declared order, then check expectations and format.
fn finish(template: &Template, raw: &str) -> Result<String, PipelineExecutionError> {
    let processed = apply_postprocessing(&template.postprocessing_function_names, raw)?;
    check_expectations(&template.expectations, &processed)?;
    check_format(template.format, &processed)?;
    Ok(processed)
}

fn dependency_values(parameters: &Parameters) -> Parameters {
    parameters
        .iter()
        .filter(|(name, _)| !is_reserved_parameter_name(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
