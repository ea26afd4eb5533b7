//! Structural checks on a built pipeline.

use std::collections::HashSet;

use super::graph::DependencyGraph;
use super::types::{is_reserved_parameter_name, persona_allowed_for, Pipeline};
use crate::error::PipelineLogicError;
use crate::template::is_valid_parameter_name;

/// Check every structural invariant of `pipeline`.
///
/// This is a pure check: on success the same pipeline is handed back untouched.
///
/// # Errors
///
/// The first violated invariant, in this order: parameter declarations,
/// template names, knowledge sources, personas, jokers, then the dependency
/// graph (dangling references, cycles, double producers, unproduced outputs).
pub fn validate_pipeline(pipeline: &Pipeline) -> Result<&Pipeline, PipelineLogicError> {
    let mut parameter_names = HashSet::new();
    for parameter in &pipeline.parameters {
        if is_reserved_parameter_name(&parameter.name) {
            return Err(PipelineLogicError::ReservedParameterName(parameter.name.clone()));
        }
        if !is_valid_parameter_name(&parameter.name) {
            return Err(PipelineLogicError::InvalidParameterName(parameter.name.clone()));
        }
        if !parameter_names.insert(parameter.name.as_str()) {
            return Err(PipelineLogicError::DuplicateParameter(parameter.name.clone()));
        }
    }

    let mut template_names = HashSet::new();
    for template in &pipeline.templates {
        if !template_names.insert(template.name.as_str()) {
            return Err(PipelineLogicError::DuplicateTemplateName(template.name.clone()));
        }
        if is_reserved_parameter_name(&template.resulting_parameter_name) {
            return Err(PipelineLogicError::ReservedParameterName(
                template.resulting_parameter_name.clone(),
            ));
        }
    }

    for source in &pipeline.knowledge_sources {
        if source.source_content.trim().is_empty() {
            return Err(PipelineLogicError::EmptyKnowledgeSource(source.name.clone()));
        }
    }

    for template in &pipeline.templates {
        if let Some(persona) = &template.persona_name {
            if pipeline.persona(persona).is_none() {
                return Err(PipelineLogicError::UnknownPersona {
                    template: template.name.clone(),
                    persona: persona.clone(),
                });
            }
            let variant = pipeline.effective_model_requirements(template).model_variant;
            if !persona_allowed_for(variant) {
                return Err(PipelineLogicError::PersonaRequiresChat {
                    template: template.name.clone(),
                    persona: persona.clone(),
                    variant: variant.to_string(),
                });
            }
        }

        for joker in &template.joker_parameter_names {
            if !parameter_names.contains(joker.as_str()) {
                return Err(PipelineLogicError::UnknownJoker {
                    template: template.name.clone(),
                    parameter: joker.clone(),
                });
            }
        }
    }

    DependencyGraph::build(pipeline)?;
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::build_pipeline;

    fn check(source: &str) -> Result<(), PipelineLogicError> {
        let pipeline = build_pipeline(source).unwrap();
        validate_pipeline(&pipeline).map(|_| ())
    }

    #[test]
    fn test_accepts_declared_inputs_and_upstream_outputs() {
        let source = "# T\n\n- INPUT PARAMETER {topic}\n- OUTPUT PARAMETER {article}\n\n## Draft\n\n```\nAbout {topic}\n```\n\n-> {draft}\n\n## Polish\n\n```\n{draft}\n```\n\n-> {article}\n";
        assert_eq!(check(source), Ok(()));
    }

    #[test]
    fn test_rejects_dangling_reference() {
        let source = "# T\n\n## Draft\n\n```\nAbout {topic}\n```\n\n-> {draft}\n";
        assert_eq!(
            check(source),
            Err(PipelineLogicError::MissingParameter {
                template: "draft".into(),
                parameter: "topic".into()
            })
        );
    }

    #[test]
    fn test_rejects_reserved_declaration() {
        let source = "# T\n\n- INPUT PARAMETER {content}\n";
        assert_eq!(
            check(source),
            Err(PipelineLogicError::ReservedParameterName("content".into()))
        );
    }

    #[test]
    fn test_rejects_persona_on_completion_model() {
        let source = "# T\n\n## Draft\n\n- PERSONA Jane, an editor\n- MODEL VARIANT Completion\n\n```\nHi\n```\n\n-> {draft}\n";
        assert!(matches!(
            check(source),
            Err(PipelineLogicError::PersonaRequiresChat { .. })
        ));
    }

    #[test]
    fn test_rejects_undeclared_joker() {
        let source = "# T\n\n## Draft\n\n- JOKER {spare}\n\n```\nHi\n```\n\n-> {draft}\n";
        assert!(matches!(
            check(source),
            Err(PipelineLogicError::UnknownJoker { .. })
        ));
    }

    #[test]
    fn test_rejects_unproduced_output() {
        let source = "# T\n\n- OUTPUT PARAMETER {article}\n";
        assert_eq!(
            check(source),
            Err(PipelineLogicError::OutputNotProduced("article".into()))
        );
    }
}
