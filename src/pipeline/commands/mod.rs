//! Commands of the pipeline language.
//!
//! A command is one list item such as `- INPUT PARAMETER {topic}`. Parsing is
//! pure: [`parse_command`] turns a line into a typed [`Command`], and
//! [`Command::apply`] is the only place a command touches a pipeline draft.

mod parsers;
pub mod registry;

use std::fmt;

use crate::error::ParsingError;
use crate::llm::{ModelRequirements, ModelVariant};
use crate::pipeline::types::{KnowledgeSource, Parameter, Persona, Pipeline, Template, TemplateKind};
use crate::utils::{ExpectFormat, ExpectationUnit};

pub use registry::{
    looks_like_command, normalize_command_name, standard_registry, CommandDefinition,
    CommandInput, CommandRegistry,
};

/// Where in a document a command appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsagePlace {
    /// Before the first template section.
    PipelineHead,
    /// Inside a template section.
    Template,
}

impl fmt::Display for UsagePlace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsagePlace::PipelineHead => write!(f, "the pipeline head"),
            UsagePlace::Template => write!(f, "a template section"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterRole {
    Input,
    Output,
    Intermediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectSign {
    Minimum,
    Maximum,
    Exactly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectCommand {
    Amount {
        sign: ExpectSign,
        amount: usize,
        unit: ExpectationUnit,
    },
    Format(ExpectFormat),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JokerTarget {
    Parameter(String),
    Pipeline(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelCommand {
    Variant(ModelVariant),
    Name(String),
}

/// One parsed directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Url(String),
    BookVersion(String),
    Parameter {
        name: String,
        description: Option<String>,
        role: ParameterRole,
    },
    Persona {
        name: String,
        description: String,
    },
    Knowledge {
        source: String,
    },
    Expect(ExpectCommand),
    Joker(JokerTarget),
    Postprocess {
        function_name: String,
    },
    Model(ModelCommand),
    Instrument {
        name: String,
    },
    TemplateKind(TemplateKind),
}

/// Parse `line` with the built-in command set.
pub fn parse_command(line: &str, place: UsagePlace) -> Result<Command, ParsingError> {
    standard_registry().parse(line, place)
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Url(_) => "URL",
            Command::BookVersion(_) => "BOOK_VERSION",
            Command::Parameter { .. } => "PARAMETER",
            Command::Persona { .. } => "PERSONA",
            Command::Knowledge { .. } => "KNOWLEDGE",
            Command::Expect(_) => "EXPECT",
            Command::Joker(_) => "JOKER",
            Command::Postprocess { .. } => "POSTPROCESS",
            Command::Model(_) => "MODEL",
            Command::Instrument { .. } => "INSTRUMENT",
            Command::TemplateKind(_) => "TEMPLATE",
        }
    }

    /// Fold this command into a pipeline draft and, inside a section, the template draft.
    pub fn apply(
        &self,
        pipeline: &mut Pipeline,
        template: Option<&mut Template>,
    ) -> Result<(), ParsingError> {
        match self {
            Command::Url(url) => {
                pipeline.pipeline_url = Some(url.clone());
            }
            Command::BookVersion(version) => {
                pipeline.book_version = version.clone();
            }
            Command::Parameter {
                name,
                description,
                role,
            } => declare_parameter(pipeline, name, description.as_deref(), *role)?,
            Command::Persona { name, description } => {
                declare_persona(pipeline, name, description)?;
                if let Some(template) = template {
                    template.persona_name = Some(name.clone());
                }
            }
            Command::Knowledge { source } => {
                let name = format!("source-{}", pipeline.knowledge_sources.len() + 1);
                pipeline.knowledge_sources.push(KnowledgeSource {
                    name,
                    source_content: source.clone(),
                    template_name: template.map(|t| t.name.clone()),
                });
            }
            Command::Expect(expect) => {
                let template = self.require_template(template)?;
                apply_expectation(template, expect)?;
            }
            Command::Joker(target) => {
                let template = self.require_template(template)?;
                match target {
                    JokerTarget::Parameter(name) => {
                        if !template.joker_parameter_names.contains(name) {
                            template.joker_parameter_names.push(name.clone());
                        }
                    }
                    JokerTarget::Pipeline(url) => {
                        if let Some(existing) = &template.joker_pipeline_url {
                            if existing != url {
                                return Err(ParsingError::invalid(
                                    "JOKER",
                                    "a template can delegate to only one pipeline",
                                ));
                            }
                        }
                        template.joker_pipeline_url = Some(url.clone());
                    }
                }
            }
            Command::Postprocess { function_name } => {
                let template = self.require_template(template)?;
                template
                    .postprocessing_function_names
                    .push(function_name.clone());
            }
            Command::Model(model) => {
                let requirements = match template {
                    Some(template) => {
                        let defaults = pipeline.default_model_requirements.clone();
                        template
                            .model_requirements
                            .get_or_insert_with(|| defaults.unwrap_or_default())
                    }
                    None => pipeline
                        .default_model_requirements
                        .get_or_insert_with(ModelRequirements::default),
                };
                match model {
                    ModelCommand::Variant(variant) => requirements.model_variant = *variant,
                    ModelCommand::Name(name) => requirements.model_name = Some(name.clone()),
                }
            }
            Command::Instrument { name } => match template {
                Some(template) => template.instruments.push(name.clone()),
                None => pipeline.instruments.push(name.clone()),
            },
            Command::TemplateKind(kind) => {
                let template = self.require_template(template)?;
                template.kind = *kind;
            }
        }
        Ok(())
    }

    fn require_template<'t>(
        &self,
        template: Option<&'t mut Template>,
    ) -> Result<&'t mut Template, ParsingError> {
        template.ok_or_else(|| ParsingError::UnsupportedUsagePlace {
            command: self.name().to_string(),
            place: UsagePlace::PipelineHead.to_string(),
        })
    }
}

fn declare_parameter(
    pipeline: &mut Pipeline,
    name: &str,
    description: Option<&str>,
    role: ParameterRole,
) -> Result<(), ParsingError> {
    let index = match pipeline.parameters.iter().position(|p| p.name == name) {
        Some(index) => index,
        None => {
            pipeline.parameters.push(Parameter::intermediate(name));
            pipeline.parameters.len() - 1
        }
    };
    let parameter = &mut pipeline.parameters[index];

    match (&parameter.description, description) {
        (Some(existing), Some(new)) if existing != new => {
            return Err(ParsingError::invalid(
                "PARAMETER",
                format!("parameter {{{name}}} is described twice with different descriptions"),
            ));
        }
        (None, Some(new)) => parameter.description = Some(new.to_string()),
        _ => {}
    }

    match role {
        ParameterRole::Input => parameter.is_input = true,
        ParameterRole::Output => parameter.is_output = true,
        ParameterRole::Intermediate => {}
    }
    Ok(())
}

fn declare_persona(pipeline: &mut Pipeline, name: &str, description: &str) -> Result<(), ParsingError> {
    let Some(index) = pipeline.personas.iter().position(|p| p.name() == name) else {
        pipeline.personas.push(Persona::raw(name, description));
        return Ok(());
    };

    let current = pipeline.personas[index].description();
    if description.is_empty() || current == description {
        Ok(())
    } else if current.is_empty() {
        pipeline.personas[index] = Persona::raw(name, description);
        Ok(())
    } else {
        Err(ParsingError::invalid(
            "PERSONA",
            format!("persona '{name}' is described twice with different descriptions"),
        ))
    }
}

fn apply_expectation(template: &mut Template, expect: &ExpectCommand) -> Result<(), ParsingError> {
    match expect {
        ExpectCommand::Format(format) => template.format = Some(*format),
        ExpectCommand::Amount { sign, amount, unit } => {
            let bounds = template.expectations.bounds_mut(*unit);
            match sign {
                ExpectSign::Minimum => bounds.min = Some(*amount),
                ExpectSign::Maximum => bounds.max = Some(*amount),
                ExpectSign::Exactly => {
                    bounds.min = Some(*amount);
                    bounds.max = Some(*amount);
                }
            }
            if let (Some(min), Some(max)) = (bounds.min, bounds.max) {
                if min > max {
                    return Err(ParsingError::invalid(
                        "EXPECT",
                        format!("minimum {min} {unit} exceeds maximum {max} {unit}"),
                    ));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply_all(lines: &[&str]) -> Result<(Pipeline, Template), ParsingError> {
        let mut pipeline = Pipeline::new("Test");
        let mut template = Template::new("write", "Write");
        for line in lines {
            parse_command(line, UsagePlace::Template)?.apply(&mut pipeline, Some(&mut template))?;
        }
        Ok((pipeline, template))
    }

    #[test]
    fn test_parameter_flags_merge() {
        let (pipeline, _) = apply_all(&["PARAMETER {x} The x", "OUTPUT PARAMETER {x}"]).unwrap();
        assert_eq!(pipeline.parameters.len(), 1);
        let x = &pipeline.parameters[0];
        assert!(x.is_output);
        assert!(!x.is_input);
        assert_eq!(x.description.as_deref(), Some("The x"));
    }

    #[test]
    fn test_conflicting_descriptions_fail() {
        let err = apply_all(&["PARAMETER {x} One", "PARAMETER {x} Two"]).unwrap_err();
        assert!(matches!(err, ParsingError::InvalidArgument { .. }));
    }

    #[test]
    fn test_expectations_accumulate() {
        let (_, template) = apply_all(&["EXPECT min 2 words", "EXPECT max 5 words"]).unwrap();
        let bounds = template.expectations.get(ExpectationUnit::Words).unwrap();
        assert_eq!((bounds.min, bounds.max), (Some(2), Some(5)));

        assert!(apply_all(&["EXPECT min 5 words", "EXPECT max 2 words"]).is_err());
    }

    #[test]
    fn test_knowledge_scoped_to_template() {
        let (pipeline, _) = apply_all(&["KNOWLEDGE Rust is a systems language."]).unwrap();
        assert_eq!(pipeline.knowledge_sources.len(), 1);
        assert_eq!(pipeline.knowledge_sources[0].template_name.as_deref(), Some("write"));
    }

    #[test]
    fn test_persona_assigned_to_template() {
        let (pipeline, template) = apply_all(&["PERSONA Jane, an editor"]).unwrap();
        assert_eq!(template.persona_name.as_deref(), Some("Jane"));
        assert_eq!(pipeline.personas, vec![Persona::raw("Jane", "an editor")]);
    }

    #[test]
    fn test_model_in_template_starts_from_pipeline_defaults() {
        let mut pipeline = Pipeline::new("Test");
        parse_command("MODEL NAME base-model", UsagePlace::PipelineHead)
            .unwrap()
            .apply(&mut pipeline, None)
            .unwrap();
        let mut template = Template::new("t", "T");
        parse_command("MODEL VARIANT Completion", UsagePlace::Template)
            .unwrap()
            .apply(&mut pipeline, Some(&mut template))
            .unwrap();
        let requirements = template.model_requirements.unwrap();
        assert_eq!(requirements.model_variant, ModelVariant::Completion);
        assert_eq!(requirements.model_name.as_deref(), Some("base-model"));
    }
}
