//! Parameter values a template runs with.

use std::collections::HashSet;

use chrono::{SecondsFormat, Utc};

use crate::error::PipelineExecutionError;
use crate::pipeline::{Pipeline, Template};
use crate::template::Parameters;

/// Contents of the knowledge pieces visible to `template`.
///
/// A piece is visible when one of its sources was declared in the pipeline
/// head or in this template.
pub fn knowledge_for(pipeline: &Pipeline, template: &Template) -> String {
    let visible: HashSet<&str> = pipeline
        .knowledge_sources
        .iter()
        .filter(|source| match &source.template_name {
            None => true,
            Some(name) => name == &template.name,
        })
        .map(|source| source.name.as_str())
        .collect();

    pipeline
        .knowledge_pieces
        .iter()
        .filter(|piece| piece.source_names().any(|name| visible.contains(name)))
        .map(|piece| piece.content.trim())
        .filter(|content| !content.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Values of the reserved parameters for `template`.
pub fn reserved_parameters(pipeline: &Pipeline, template: &Template) -> Parameters {
    let requirements = pipeline.effective_model_requirements(template);
    let mut values = Parameters::new();
    values.insert("content".to_string(), String::new());
    values.insert("context".to_string(), String::new());
    values.insert("samples".to_string(), String::new());
    values.insert("knowledge".to_string(), knowledge_for(pipeline, template));
    values.insert("modelName".to_string(), requirements.model_name.unwrap_or_default());
    values.insert(
        "currentDate".to_string(),
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    );
    values
}

/// Reserved values plus every parameter the template depends on.
pub fn template_parameters(
    pipeline: &Pipeline,
    template: &Template,
    available: &Parameters,
) -> Result<Parameters, PipelineExecutionError> {
    let mut values = reserved_parameters(pipeline, template);
    for name in &template.dependent_parameter_names {
        let value = available
            .get(name)
            .ok_or_else(|| PipelineExecutionError::MissingParameterValue(name.clone()))?;
        values.insert(name.clone(), value.clone());
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{KnowledgePiece, KnowledgePieceSource, KnowledgeSource};

    fn source(name: &str, template: Option<&str>) -> KnowledgeSource {
        KnowledgeSource {
            name: name.into(),
            source_content: "inline".into(),
            template_name: template.map(str::to_string),
        }
    }

    fn piece(name: &str, source: &str, content: &str) -> KnowledgePiece {
        KnowledgePiece {
            name: name.into(),
            title: None,
            content: content.into(),
            sources: vec![KnowledgePieceSource {
                name: source.into(),
                origin: "inline".into(),
                line: None,
                column: None,
            }],
            keywords: Vec::new(),
            index: Vec::new(),
            preparation_ids: Vec::new(),
        }
    }

    #[test]
    fn test_knowledge_scoped_to_template() {
        let mut pipeline = Pipeline::new("P");
        pipeline.knowledge_sources = vec![
            source("source-1", None),
            source("source-2", Some("answer")),
            source("source-3", Some("other")),
        ];
        pipeline.knowledge_pieces = vec![
            piece("a", "source-1", "Shared fact."),
            piece("b", "source-2", "Answer fact."),
            piece("c", "source-3", "Other fact."),
        ];

        let answer = Template::new("answer", "Answer");
        assert_eq!(knowledge_for(&pipeline, &answer), "Shared fact.\n\nAnswer fact.");
    }

    #[test]
    fn test_reserved_values_present() {
        let pipeline = Pipeline::new("P");
        let values = reserved_parameters(&pipeline, &Template::new("t", "T"));
        for name in crate::pipeline::RESERVED_PARAMETER_NAMES {
            assert!(values.contains_key(*name), "missing {name}");
        }
        assert_eq!(values["content"], "");
        assert!(chrono::DateTime::parse_from_rfc3339(&values["currentDate"]).is_ok());
    }

    #[test]
    fn test_missing_dependency_value() {
        let pipeline = Pipeline::new("P");
        let mut template = Template::new("t", "T");
        template.dependent_parameter_names = vec!["topic".into()];
        let err = template_parameters(&pipeline, &template, &Parameters::new()).unwrap_err();
        assert_eq!(err, PipelineExecutionError::MissingParameterValue("topic".into()));
    }
}
