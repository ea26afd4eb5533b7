//! Argument parsers, one per command.

use regex::Regex;
use std::sync::OnceLock;

use super::registry::CommandInput;
use super::{Command, ExpectCommand, ExpectSign, JokerTarget, ModelCommand, ParameterRole};
use crate::error::ParsingError;
use crate::llm::ModelVariant;
use crate::pipeline::TemplateKind;
use crate::template::is_valid_parameter_name;
use crate::utils::postprocessing::{canonical_postprocessing_name, postprocessing_function_names};
use crate::utils::{ExpectFormat, ExpectationUnit};

fn placeholder_declaration() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\{\s*([^{}\s]+)\s*\}\s*[-:]?\s*(.*)$")
            .expect("Invalid regex for parameter declarations")
    })
}

fn amount_expectation() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?i)(min|minimum|max|maximum|exact|exactly)\s+(\d+)\s+([a-z]+)$")
            .expect("Invalid regex for expectations")
    })
}

fn is_http_url(value: &str) -> bool {
    (value.starts_with("https://") || value.starts_with("http://"))
        && !value.contains(char::is_whitespace)
        && value.split("://").nth(1).is_some_and(|rest| !rest.is_empty())
}

/// `{name} optional description`
fn parse_placeholder_declaration(input: &CommandInput<'_>) -> Result<(String, Option<String>), ParsingError> {
    let captures = placeholder_declaration()
        .captures(input.rest)
        .ok_or_else(|| ParsingError::invalid(input.name, "expected `{name}` followed by an optional description"))?;
    let name = captures[1].to_string();
    if !is_valid_parameter_name(&name) {
        return Err(ParsingError::invalid(
            input.name,
            format!("'{name}' is not a valid parameter name"),
        ));
    }
    let description = captures[2].trim();
    let description = (!description.is_empty()).then(|| description.to_string());
    Ok((name, description))
}

pub fn parse_url(input: &CommandInput<'_>) -> Result<Command, ParsingError> {
    let url = input.rest;
    if !is_http_url(url) {
        return Err(ParsingError::invalid(input.name, format!("'{url}' is not an http(s) URL")));
    }
    if url.contains('?') || url.contains('#') {
        return Err(ParsingError::invalid(
            input.name,
            "pipeline URL must not contain a query or fragment",
        ));
    }
    Ok(Command::Url(url.to_string()))
}

pub fn parse_book_version(input: &CommandInput<'_>) -> Result<Command, ParsingError> {
    let version = semver::Version::parse(input.rest)
        .map_err(|e| ParsingError::invalid(input.name, format!("'{}': {e}", input.rest)))?;
    Ok(Command::BookVersion(version.to_string()))
}

pub fn parse_parameter(input: &CommandInput<'_>) -> Result<Command, ParsingError> {
    let (name, description) = parse_placeholder_declaration(input)?;
    let role = match input.name {
        "INPUT_PARAMETER" => ParameterRole::Input,
        "OUTPUT_PARAMETER" => ParameterRole::Output,
        _ => ParameterRole::Intermediate,
    };
    Ok(Command::Parameter {
        name,
        description,
        role,
    })
}

pub fn parse_persona(input: &CommandInput<'_>) -> Result<Command, ParsingError> {
    let (name, description) = match input.rest.split_once(',') {
        Some((name, description)) => (name.trim(), description.trim()),
        None => (input.rest, ""),
    };
    if name.is_empty() {
        return Err(ParsingError::invalid(input.name, "persona needs a name"));
    }
    Ok(Command::Persona {
        name: name.to_string(),
        description: description.to_string(),
    })
}

pub fn parse_knowledge(input: &CommandInput<'_>) -> Result<Command, ParsingError> {
    if input.rest.is_empty() {
        return Err(ParsingError::invalid(input.name, "knowledge source is empty"));
    }
    Ok(Command::Knowledge {
        source: input.rest.to_string(),
    })
}

pub fn parse_expect(input: &CommandInput<'_>) -> Result<Command, ParsingError> {
    if input.rest.eq_ignore_ascii_case("json") {
        return Ok(Command::Expect(ExpectCommand::Format(ExpectFormat::Json)));
    }

    let captures = amount_expectation().captures(input.rest).ok_or_else(|| {
        ParsingError::invalid(
            input.name,
            format!("'{}' is not `min|max|exactly <n> <unit>` or `JSON`", input.rest),
        )
    })?;
    let sign = match captures[1].to_lowercase().as_str() {
        "min" | "minimum" => ExpectSign::Minimum,
        "max" | "maximum" => ExpectSign::Maximum,
        _ => ExpectSign::Exactly,
    };
    let amount: usize = captures[2]
        .parse()
        .map_err(|e| ParsingError::invalid(input.name, format!("invalid amount: {e}")))?;
    let unit: ExpectationUnit = captures[3]
        .parse()
        .map_err(|e: String| ParsingError::invalid(input.name, e))?;

    Ok(Command::Expect(ExpectCommand::Amount { sign, amount, unit }))
}

pub fn parse_joker(input: &CommandInput<'_>) -> Result<Command, ParsingError> {
    if is_http_url(input.rest) {
        return Ok(Command::Joker(JokerTarget::Pipeline(input.rest.to_string())));
    }
    let (name, _) = parse_placeholder_declaration(input)?;
    Ok(Command::Joker(JokerTarget::Parameter(name)))
}

pub fn parse_postprocess(input: &CommandInput<'_>) -> Result<Command, ParsingError> {
    let name = canonical_postprocessing_name(input.rest).ok_or_else(|| {
        ParsingError::invalid(
            input.name,
            format!(
                "unknown function '{}', expected one of: {}",
                input.rest,
                postprocessing_function_names().collect::<Vec<_>>().join(", ")
            ),
        )
    })?;
    Ok(Command::Postprocess {
        function_name: name.to_string(),
    })
}

pub fn parse_model(input: &CommandInput<'_>) -> Result<Command, ParsingError> {
    let (key, value) = input
        .rest
        .split_once(char::is_whitespace)
        .map(|(key, value)| (key, value.trim()))
        .ok_or_else(|| ParsingError::invalid(input.name, "expected `VARIANT <variant>` or `NAME <model>`"))?;

    match key.to_uppercase().as_str() {
        "VARIANT" => {
            let variant: ModelVariant = value
                .parse()
                .map_err(|e: String| ParsingError::invalid(input.name, e))?;
            Ok(Command::Model(ModelCommand::Variant(variant)))
        }
        "NAME" => Ok(Command::Model(ModelCommand::Name(value.to_string()))),
        other => Err(ParsingError::invalid(
            input.name,
            format!("unknown model requirement '{other}'"),
        )),
    }
}

pub fn parse_instrument(input: &CommandInput<'_>) -> Result<Command, ParsingError> {
    if input.rest.is_empty() {
        return Err(ParsingError::invalid(input.name, "instrument needs a name"));
    }
    Ok(Command::Instrument {
        name: input.rest.to_string(),
    })
}

pub fn parse_template_kind(input: &CommandInput<'_>) -> Result<Command, ParsingError> {
    if !input.rest.is_empty() {
        return Err(ParsingError::invalid(
            input.name,
            format!("unexpected arguments '{}'", input.rest),
        ));
    }
    let kind = match input.name {
        "SIMPLE_TEMPLATE" => TemplateKind::Simple,
        "SCRIPT_TEMPLATE" => TemplateKind::Script,
        "DIALOG_TEMPLATE" => TemplateKind::Dialog,
        _ => TemplateKind::Prompt,
    };
    Ok(Command::TemplateKind(kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::commands::{parse_command, UsagePlace};

    fn template(line: &str) -> Result<Command, ParsingError> {
        parse_command(line, UsagePlace::Template)
    }

    #[test]
    fn test_parse_parameter_roles() {
        assert_eq!(
            template("INPUT PARAMETER {topic} The topic to write about").unwrap(),
            Command::Parameter {
                name: "topic".into(),
                description: Some("The topic to write about".into()),
                role: ParameterRole::Input,
            }
        );
        assert_eq!(
            template("output param { article }").unwrap(),
            Command::Parameter {
                name: "article".into(),
                description: None,
                role: ParameterRole::Output,
            }
        );
        assert!(template("PARAMETER topic").is_err());
        assert!(template("PARAMETER {not-valid}").is_err());
    }

    #[test]
    fn test_parse_url_and_version() {
        assert_eq!(
            parse_command("URL https://example.com/books/write.book.md", UsagePlace::PipelineHead)
                .unwrap(),
            Command::Url("https://example.com/books/write.book.md".into())
        );
        assert!(parse_command("URL ftp://example.com", UsagePlace::PipelineHead).is_err());
        assert!(parse_command("URL https://example.com/?q=1", UsagePlace::PipelineHead).is_err());
        assert_eq!(
            parse_command("BOOK_VERSION 1.0.0", UsagePlace::PipelineHead).unwrap(),
            Command::BookVersion("1.0.0".into())
        );
        assert!(parse_command("BOOK VERSION one", UsagePlace::PipelineHead).is_err());
    }

    #[test]
    fn test_parse_expect() {
        assert_eq!(
            template("EXPECT min 3 words").unwrap(),
            Command::Expect(ExpectCommand::Amount {
                sign: ExpectSign::Minimum,
                amount: 3,
                unit: ExpectationUnit::Words,
            })
        );
        assert_eq!(
            template("Expect exactly 1 sentence").unwrap(),
            Command::Expect(ExpectCommand::Amount {
                sign: ExpectSign::Exactly,
                amount: 1,
                unit: ExpectationUnit::Sentences,
            })
        );
        assert_eq!(
            template("EXPECT JSON").unwrap(),
            Command::Expect(ExpectCommand::Format(ExpectFormat::Json))
        );
        assert!(template("EXPECT many words").is_err());
        assert!(template("EXPECT max 3 furlongs").is_err());
    }

    #[test]
    fn test_parse_joker() {
        assert_eq!(
            template("JOKER {draft}").unwrap(),
            Command::Joker(JokerTarget::Parameter("draft".into()))
        );
        assert_eq!(
            template("JOKER https://example.com/other.book.md").unwrap(),
            Command::Joker(JokerTarget::Pipeline("https://example.com/other.book.md".into()))
        );
    }

    #[test]
    fn test_parse_postprocess_checks_known_functions() {
        assert_eq!(
            template("POSTPROCESS space-trim").unwrap(),
            Command::Postprocess {
                function_name: "spaceTrim".into()
            }
        );
        assert!(template("POSTPROCESS launchRockets").is_err());
    }

    #[test]
    fn test_parse_model_and_persona() {
        assert_eq!(
            template("MODEL VARIANT Completion").unwrap(),
            Command::Model(ModelCommand::Variant(ModelVariant::Completion))
        );
        assert_eq!(
            template("MODEL NAME gpt-4o-mini").unwrap(),
            Command::Model(ModelCommand::Name("gpt-4o-mini".into()))
        );
        assert!(template("MODEL TEMPERATURE 2").is_err());
        assert_eq!(
            template("PERSONA Jane, a careful copy editor").unwrap(),
            Command::Persona {
                name: "Jane".into(),
                description: "a careful copy editor".into(),
            }
        );
    }

    #[test]
    fn test_parse_template_kind() {
        assert_eq!(
            template("SIMPLE TEMPLATE").unwrap(),
            Command::TemplateKind(TemplateKind::Simple)
        );
        assert_eq!(
            template("EXECUTE PROMPT TEMPLATE").unwrap(),
            Command::TemplateKind(TemplateKind::Prompt)
        );
        assert!(template("SCRIPT TEMPLATE now").is_err());
    }
}
