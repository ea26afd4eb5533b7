//! Results of one pipeline run.

use serde::Serialize;

use crate::error::PipelineExecutionError;
use crate::llm::{Prompt, PromptResult, Usage};
use crate::template::Parameters;

/// Final state of a template after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl std::fmt::Display for TemplateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateStatus::Succeeded => write!(f, "succeeded"),
            TemplateStatus::Failed => write!(f, "failed"),
            TemplateStatus::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateReport {
    pub name: String,
    pub title: String,
    pub status: TemplateStatus,
    /// Attempts made; zero for skipped templates and joker shortcuts.
    pub attempts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip)]
    pub failure: Option<PipelineExecutionError>,
}

impl TemplateReport {
    pub fn succeeded(name: &str, title: &str, attempts: usize, result: String) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            status: TemplateStatus::Succeeded,
            attempts,
            error: None,
            result: Some(result),
            failure: None,
        }
    }

    pub fn failed(name: &str, title: &str, attempts: usize, error: PipelineExecutionError) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            status: TemplateStatus::Failed,
            attempts,
            error: Some(error.to_string()),
            result: None,
            failure: Some(error),
        }
    }

    pub fn skipped(name: &str, title: &str, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            status: TemplateStatus::Skipped,
            attempts: 0,
            error: Some(reason.into()),
            result: None,
            failure: None,
        }
    }
}

/// One attempt at a prompt template, successful or not.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptExecution {
    pub template_name: String,
    pub attempt: usize,
    pub prompt: Prompt,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<PromptResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything a run produced: per-template outcome, prompt traces, usage and outputs.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub pipeline_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_url: Option<String>,
    /// In pipeline declaration order.
    pub templates: Vec<TemplateReport>,
    pub executions: Vec<PromptExecution>,
    pub usage: Usage,
    /// Output parameters that were produced; empty after an aborted run.
    pub outputs: Parameters,
    pub is_aborted: bool,
}

impl ExecutionReport {
    pub fn is_successful(&self) -> bool {
        !self.is_aborted && self.templates.iter().all(|t| t.status == TemplateStatus::Succeeded)
    }

    pub fn template(&self, name: &str) -> Option<&TemplateReport> {
        self.templates.iter().find(|t| t.name == name)
    }

    pub fn count(&self, status: TemplateStatus) -> usize {
        self.templates.iter().filter(|t| t.status == status).count()
    }

    /// The first terminal failure, wrapped with its template and attempt count.
    pub fn first_failure(&self) -> Option<PipelineExecutionError> {
        self.templates
            .iter()
            .find(|t| t.status == TemplateStatus::Failed)
            .map(|t| PipelineExecutionError::TemplateFailed {
                template: t.name.clone(),
                attempts: t.attempts,
                source: Box::new(
                    t.failure
                        .clone()
                        .unwrap_or_else(|| PipelineExecutionError::Aborted(t.error.clone().unwrap_or_default())),
                ),
            })
    }

    /// Outputs of a successful run, or the error explaining why there are none.
    pub fn into_outputs(self) -> Result<Parameters, PipelineExecutionError> {
        if self.is_successful() {
            return Ok(self.outputs);
        }
        Err(self.first_failure().unwrap_or_else(|| {
            let skipped = self.count(TemplateStatus::Skipped);
            PipelineExecutionError::Aborted(format!("{skipped} template(s) did not run"))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutionToolsError;

    #[test]
    fn test_successful_report_yields_outputs() {
        let mut report = ExecutionReport::default();
        report.templates.push(TemplateReport::succeeded("a", "A", 1, "x".into()));
        report.outputs.insert("a".into(), "x".into());
        assert!(report.is_successful());
        assert_eq!(report.into_outputs().unwrap().get("a").map(String::as_str), Some("x"));
    }

    #[test]
    fn test_first_failure_is_wrapped() {
        let mut report = ExecutionReport::default();
        report.templates.push(TemplateReport::failed(
            "draft",
            "Draft",
            3,
            ExecutionToolsError::RequestFailed("down".into()).into(),
        ));
        report.templates.push(TemplateReport::skipped("polish", "Polish", "depends on draft"));

        assert_eq!(report.count(TemplateStatus::Skipped), 1);
        let err = report.into_outputs().unwrap_err();
        assert!(matches!(
            err,
            PipelineExecutionError::TemplateFailed { ref template, attempts: 3, .. } if template == "draft"
        ));
    }

    #[test]
    fn test_serialized_report_omits_typed_failure() {
        let report = TemplateReport::failed("a", "A", 1, PipelineExecutionError::MissingTools("script".into()));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "failed");
        assert!(json.get("failure").is_none());
        assert!(json["error"].as_str().unwrap().contains("script"));
    }
}
