//! Building a [`Pipeline`] from markdown source.
//!
//! The document is split into a head and template sections, every command is
//! parsed for the place it appears in and folded into a pipeline draft with
//! [`Command::apply`]. The finished draft is returned by value and not touched
//! again.

use std::collections::BTreeSet;

use regex::Regex;
use tracing::debug;

use super::commands::{looks_like_command, standard_registry, Command, CommandRegistry, UsagePlace};
use super::markdown::{split_document, Section};
use super::types::{is_reserved_parameter_name, Parameter, Pipeline, Template, TemplateKind};
use crate::error::ParsingError;
use crate::template::extract_parameter_names;
use crate::utils::normalize_to_kebab_case;

const UNTITLED: &str = "Untitled pipeline";

/// A template section after markdown splitting and command parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSection {
    pub title: String,
    pub line: usize,
    pub description: Option<String>,
    pub commands: Vec<(usize, Command)>,
    pub content: Option<(Option<String>, String)>,
    pub result_parameter: Option<String>,
}

/// Folds parsed commands into pipelines.
pub struct PipelineBuilder<'r> {
    registry: &'r CommandRegistry,
}

impl Default for PipelineBuilder<'static> {
    fn default() -> Self {
        Self::new(standard_registry())
    }
}

impl<'r> PipelineBuilder<'r> {
    pub fn new(registry: &'r CommandRegistry) -> Self {
        Self { registry }
    }

    /// Parse markdown `source` into a pipeline. Does not validate.
    pub fn build(&self, source: &str) -> Result<Pipeline, ParsingError> {
        let document = split_document(source)?;

        let head_commands = self.parse_commands(&document.head, UsagePlace::PipelineHead)?;
        let sections = document
            .sections
            .iter()
            .map(|section| self.parse_section(section))
            .collect::<Result<Vec<_>, _>>()?;

        let head_description = join_paragraphs(&document.head.paragraphs);
        let pipeline = self.fold(
            document.title.unwrap_or_else(|| UNTITLED.to_string()),
            head_description,
            head_commands,
            sections,
        )?;

        debug!(
            title = %pipeline.title,
            templates = pipeline.templates.len(),
            parameters = pipeline.parameters.len(),
            "Built pipeline"
        );
        Ok(pipeline)
    }

    /// Fold head commands and sections into a pipeline.
    pub fn fold(
        &self,
        title: String,
        description: Option<String>,
        head_commands: Vec<(usize, Command)>,
        sections: Vec<ParsedSection>,
    ) -> Result<Pipeline, ParsingError> {
        let mut pipeline = Pipeline::new(title);
        pipeline.description = description;

        for (line, command) in &head_commands {
            command
                .apply(&mut pipeline, None)
                .map_err(|e| e.at_line(*line))?;
        }

        for section in sections {
            let template = self.fold_section(&mut pipeline, section)?;
            pipeline.templates.push(template);
        }

        resolve_script_dependencies(&mut pipeline);
        Ok(pipeline)
    }

    fn parse_commands(
        &self,
        section: &Section,
        place: UsagePlace,
    ) -> Result<Vec<(usize, Command)>, ParsingError> {
        section
            .list_items
            .iter()
            .filter(|(_, item)| looks_like_command(item))
            .map(|(line, item)| {
                self.registry
                    .parse(item, place)
                    .map(|command| (*line, command))
                    .map_err(|e| e.at_line(*line))
            })
            .collect()
    }

    fn parse_section(&self, section: &Section) -> Result<ParsedSection, ParsingError> {
        let commands = self.parse_commands(section, UsagePlace::Template)?;

        let mut description_parts = section.paragraphs.clone();
        description_parts.extend(
            section
                .list_items
                .iter()
                .filter(|(_, item)| !looks_like_command(item))
                .map(|(_, item)| format!("- {item}")),
        );

        if section.code_blocks.len() > 1 {
            return Err(ParsingError::Structure(format!(
                "section '{}' has more than one code block",
                section.title.as_deref().unwrap_or_default()
            ))
            .at_line(section.code_blocks[1].line));
        }

        Ok(ParsedSection {
            title: section.title.clone().unwrap_or_default(),
            line: section.line,
            description: join_paragraphs(&description_parts),
            commands,
            content: section
                .code_blocks
                .first()
                .map(|block| (block.language.clone(), block.content.clone())),
            result_parameter: section.result_parameter.as_ref().map(|(_, name)| name.clone()),
        })
    }

    fn fold_section(&self, pipeline: &mut Pipeline, section: ParsedSection) -> Result<Template, ParsingError> {
        let name = normalize_to_kebab_case(&section.title);
        if name.is_empty() {
            return Err(ParsingError::Structure("template section needs a title".to_string())
                .at_line(section.line));
        }

        let mut template = Template::new(name, section.title.clone());
        template.description = section.description;

        for (line, command) in &section.commands {
            command
                .apply(pipeline, Some(&mut template))
                .map_err(|e| e.at_line(*line))?;
        }

        let (language, content) = section.content.ok_or_else(|| {
            ParsingError::Structure(format!("template '{}' has no content block", section.title))
                .at_line(section.line)
        })?;
        template.content = content;
        template.content_language = language;

        template.resulting_parameter_name = section.result_parameter.ok_or_else(|| {
            ParsingError::Structure(format!(
                "template '{}' does not name its result with `-> {{name}}`",
                section.title
            ))
            .at_line(section.line)
        })?;

        if template.kind != TemplateKind::Script {
            let placeholders = extract_parameter_names(&template.content).map_err(|source| {
                ParsingError::MalformedTemplate {
                    template: template.title.clone(),
                    source,
                }
                .at_line(section.line)
            })?;
            template.dependent_parameter_names = dependencies(placeholders, &template);
        }

        if pipeline.parameter(&template.resulting_parameter_name).is_none() {
            pipeline
                .parameters
                .push(Parameter::intermediate(template.resulting_parameter_name.clone()));
        }

        Ok(template)
    }
}

fn dependencies(mut names: BTreeSet<String>, template: &Template) -> Vec<String> {
    names.extend(template.joker_parameter_names.iter().cloned());
    names
        .into_iter()
        .filter(|name| !is_reserved_parameter_name(name))
        .collect()
}

/// Script bodies are code, not placeholder text; they depend on every declared
/// parameter whose name they mention as an identifier.
fn resolve_script_dependencies(pipeline: &mut Pipeline) {
    let names: Vec<String> = pipeline.parameters.iter().map(|p| p.name.clone()).collect();
    for template in pipeline
        .templates
        .iter_mut()
        .filter(|t| t.kind == TemplateKind::Script)
    {
        let mut mentioned: BTreeSet<String> = names
            .iter()
            .filter(|name| **name != template.resulting_parameter_name)
            .filter(|name| mentions_identifier(&template.content, name))
            .cloned()
            .collect();
        mentioned.extend(template.joker_parameter_names.iter().cloned());
        template.dependent_parameter_names = mentioned.into_iter().collect();
    }
}

fn mentions_identifier(code: &str, name: &str) -> bool {
    Regex::new(&format!(r"\b{}\b", regex::escape(name)))
        .map(|pattern| pattern.is_match(code))
        .unwrap_or(false)
}

fn join_paragraphs(paragraphs: &[String]) -> Option<String> {
    let joined = paragraphs.join("\n\n");
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Parse markdown `source` with the built-in commands.
pub fn build_pipeline(source: &str) -> Result<Pipeline, ParsingError> {
    PipelineBuilder::default().build(source)
}
