//! Edits that produce a new pipeline from an existing one.

use regex::{Captures, Regex};

use super::types::{is_reserved_parameter_name, Pipeline, TemplateKind};
use crate::error::PipelineLogicError;
use crate::template::is_valid_parameter_name;

/// Rename parameter `old` to `new` everywhere it is referenced.
///
/// Placeholders, resulting names, joker names, dependency lists and the
/// declaration itself are rewritten. Script templates have their identifier
/// mentions rewritten as well, since that is how they consume parameters.
pub fn rename_parameter(pipeline: &Pipeline, old: &str, new: &str) -> Result<Pipeline, PipelineLogicError> {
    if pipeline.parameter(old).is_none() {
        return Err(PipelineLogicError::UnknownParameter(old.to_string()));
    }
    if is_reserved_parameter_name(new) {
        return Err(PipelineLogicError::ReservedParameterName(new.to_string()));
    }
    if !is_valid_parameter_name(new) {
        return Err(PipelineLogicError::InvalidParameterName(new.to_string()));
    }
    if pipeline.parameter(new).is_some() {
        return Err(PipelineLogicError::DuplicateParameter(new.to_string()));
    }

    let escaped = regex::escape(old);
    let placeholder = Regex::new(&format!(r"\{{(\s*){escaped}(\s*)\}}"))
        .map_err(|_| PipelineLogicError::InvalidParameterName(old.to_string()))?;
    let identifier = Regex::new(&format!(r"\b{escaped}\b"))
        .map_err(|_| PipelineLogicError::InvalidParameterName(old.to_string()))?;

    let rename = |name: &mut String| {
        if name == old {
            *name = new.to_string();
        }
    };

    let mut renamed = pipeline.clone();
    renamed.parameters.iter_mut().for_each(|p| rename(&mut p.name));

    for template in &mut renamed.templates {
        template.content = match template.kind {
            TemplateKind::Script => identifier.replace_all(&template.content, new).into_owned(),
            _ => placeholder
                .replace_all(&template.content, |captures: &Captures<'_>| {
                    format!("{{{}{new}{}}}", &captures[1], &captures[2])
                })
                .into_owned(),
        };
        rename(&mut template.resulting_parameter_name);
        template.dependent_parameter_names.iter_mut().for_each(rename);
        template.joker_parameter_names.iter_mut().for_each(rename);
        template.dependent_parameter_names.sort();
    }

    Ok(renamed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::build_pipeline;
    use crate::template::{render_template, Parameters};

    const SOURCE: &str = "# Rename\n\n- INPUT PARAMETER {topic}\n- INPUT PARAMETER {tone}\n\n## Draft\n\n- JOKER {topic}\n\n```\nWrite about { topic } in a {tone} tone. {topic}!\n```\n\n-> {draft}\n";

    #[test]
    fn test_rename_to_used_name_fails() {
        let pipeline = build_pipeline(SOURCE).unwrap();
        assert_eq!(
            rename_parameter(&pipeline, "topic", "tone").unwrap_err(),
            PipelineLogicError::DuplicateParameter("tone".into())
        );
        assert_eq!(
            rename_parameter(&pipeline, "topic", "draft").unwrap_err(),
            PipelineLogicError::DuplicateParameter("draft".into())
        );
        assert_eq!(
            rename_parameter(&pipeline, "topic", "knowledge").unwrap_err(),
            PipelineLogicError::ReservedParameterName("knowledge".into())
        );
        assert_eq!(
            rename_parameter(&pipeline, "missing", "x").unwrap_err(),
            PipelineLogicError::UnknownParameter("missing".into())
        );
    }

    #[test]
    fn test_rename_preserves_rendered_output() {
        let pipeline = build_pipeline(SOURCE).unwrap();
        let renamed = rename_parameter(&pipeline, "topic", "subject").unwrap();

        let before: Parameters = [("topic", "rust"), ("tone", "dry")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let after: Parameters = [("subject", "rust"), ("tone", "dry")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let original = &pipeline.template("draft").unwrap().content;
        let rewritten = &renamed.template("draft").unwrap().content;
        assert_eq!(rewritten, "Write about { subject } in a {tone} tone. {subject}!");
        assert_eq!(
            render_template(original, &before).unwrap(),
            render_template(rewritten, &after).unwrap()
        );

        let draft = renamed.template("draft").unwrap();
        assert_eq!(draft.dependent_parameter_names, vec!["subject", "tone"]);
        assert_eq!(draft.joker_parameter_names, vec!["subject"]);
        assert!(renamed.parameter("subject").unwrap().is_input);
        assert!(renamed.parameter("topic").is_none());
    }
}
