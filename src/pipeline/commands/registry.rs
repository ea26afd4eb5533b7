//! The table of known commands and name-based dispatch.

use std::collections::HashMap;
use std::sync::OnceLock;

use tracing::warn;

use super::parsers;
use super::{Command, UsagePlace};
use crate::error::ParsingError;

/// Longest command name, in words.
const MAX_NAME_WORDS: usize = 3;

/// Arguments handed to a command parser.
#[derive(Debug, Clone, Copy)]
pub struct CommandInput<'a> {
    /// Canonical name of the matched command.
    pub name: &'static str,
    /// Everything after the command name, trimmed.
    pub rest: &'a str,
    /// The whole line as written.
    pub raw: &'a str,
}

pub type CommandParser = fn(&CommandInput<'_>) -> Result<Command, ParsingError>;

/// One registered command.
#[derive(Clone, Copy)]
pub struct CommandDefinition {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub deprecated_names: &'static [&'static str],
    pub usage_places: &'static [UsagePlace],
    pub parse: CommandParser,
}

const HEAD: &[UsagePlace] = &[UsagePlace::PipelineHead];
const TEMPLATE: &[UsagePlace] = &[UsagePlace::Template];
const ANYWHERE: &[UsagePlace] = &[UsagePlace::PipelineHead, UsagePlace::Template];

const STANDARD_COMMANDS: &[CommandDefinition] = &[
    CommandDefinition {
        name: "URL",
        aliases: &["PIPELINE_URL"],
        deprecated_names: &["BOOK_URL"],
        usage_places: HEAD,
        parse: parsers::parse_url,
    },
    CommandDefinition {
        name: "BOOK_VERSION",
        aliases: &["PIPELINE_VERSION"],
        deprecated_names: &["PROMPTBOOK_VERSION"],
        usage_places: HEAD,
        parse: parsers::parse_book_version,
    },
    CommandDefinition {
        name: "PARAMETER",
        aliases: &["PARAM"],
        deprecated_names: &["VARIABLE"],
        usage_places: ANYWHERE,
        parse: parsers::parse_parameter,
    },
    CommandDefinition {
        name: "INPUT_PARAMETER",
        aliases: &["INPUT", "INPUT_PARAM"],
        deprecated_names: &[],
        usage_places: ANYWHERE,
        parse: parsers::parse_parameter,
    },
    CommandDefinition {
        name: "OUTPUT_PARAMETER",
        aliases: &["OUTPUT", "OUTPUT_PARAM"],
        deprecated_names: &[],
        usage_places: ANYWHERE,
        parse: parsers::parse_parameter,
    },
    CommandDefinition {
        name: "PERSONA",
        aliases: &[],
        deprecated_names: &["PERSONALITY"],
        usage_places: ANYWHERE,
        parse: parsers::parse_persona,
    },
    CommandDefinition {
        name: "KNOWLEDGE",
        aliases: &[],
        deprecated_names: &[],
        usage_places: ANYWHERE,
        parse: parsers::parse_knowledge,
    },
    CommandDefinition {
        name: "EXPECT",
        aliases: &["EXPECTATION"],
        deprecated_names: &[],
        usage_places: TEMPLATE,
        parse: parsers::parse_expect,
    },
    CommandDefinition {
        name: "JOKER",
        aliases: &[],
        deprecated_names: &[],
        usage_places: TEMPLATE,
        parse: parsers::parse_joker,
    },
    CommandDefinition {
        name: "POSTPROCESS",
        aliases: &["POSTPROCESSING"],
        deprecated_names: &[],
        usage_places: TEMPLATE,
        parse: parsers::parse_postprocess,
    },
    CommandDefinition {
        name: "MODEL",
        aliases: &[],
        deprecated_names: &[],
        usage_places: ANYWHERE,
        parse: parsers::parse_model,
    },
    CommandDefinition {
        name: "INSTRUMENT",
        aliases: &[],
        deprecated_names: &[],
        usage_places: ANYWHERE,
        parse: parsers::parse_instrument,
    },
    CommandDefinition {
        name: "PROMPT_TEMPLATE",
        aliases: &["PROMPT_BLOCK"],
        deprecated_names: &["EXECUTE_PROMPT_TEMPLATE"],
        usage_places: TEMPLATE,
        parse: parsers::parse_template_kind,
    },
    CommandDefinition {
        name: "SIMPLE_TEMPLATE",
        aliases: &["SIMPLE_BLOCK"],
        deprecated_names: &[],
        usage_places: TEMPLATE,
        parse: parsers::parse_template_kind,
    },
    CommandDefinition {
        name: "SCRIPT_TEMPLATE",
        aliases: &["SCRIPT_BLOCK"],
        deprecated_names: &[],
        usage_places: TEMPLATE,
        parse: parsers::parse_template_kind,
    },
    CommandDefinition {
        name: "DIALOG_TEMPLATE",
        aliases: &["DIALOG_BLOCK"],
        deprecated_names: &[],
        usage_places: TEMPLATE,
        parse: parsers::parse_template_kind,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameKind {
    Canonical,
    Alias,
    Deprecated,
}

/// Lookup table from every normalized command name to its definition.
pub struct CommandRegistry {
    definitions: Vec<CommandDefinition>,
    by_name: HashMap<String, (usize, NameKind)>,
}

impl CommandRegistry {
    /// Build a registry from definitions.
    ///
    /// # Panics
    ///
    /// Panics if two definitions share a name, alias or deprecated name.
    pub fn new(definitions: Vec<CommandDefinition>) -> Self {
        let mut by_name = HashMap::new();
        for (index, definition) in definitions.iter().enumerate() {
            let names = std::iter::once((definition.name, NameKind::Canonical))
                .chain(definition.aliases.iter().map(|a| (*a, NameKind::Alias)))
                .chain(
                    definition
                        .deprecated_names
                        .iter()
                        .map(|d| (*d, NameKind::Deprecated)),
                );
            for (name, kind) in names {
                let previous = by_name.insert(normalize_command_name(name), (index, kind));
                assert!(previous.is_none(), "command name {name} is registered twice");
            }
        }
        Self {
            definitions,
            by_name,
        }
    }

    /// The built-in command set.
    pub fn standard() -> Self {
        Self::new(STANDARD_COMMANDS.to_vec())
    }

    pub fn definitions(&self) -> &[CommandDefinition] {
        &self.definitions
    }

    /// Find the definition a line starts with, by the longest matching word prefix.
    ///
    /// Returns the definition and the byte offset where its arguments start.
    pub fn lookup<'a>(&self, line: &'a str) -> Option<(&CommandDefinition, &'a str)> {
        let words: Vec<_> = word_spans(line)
            .into_iter()
            .take_while(|(start, end)| is_name_word(&line[*start..*end]))
            .collect();
        for count in (1..=words.len().min(MAX_NAME_WORDS)).rev() {
            let candidate = words[..count]
                .iter()
                .map(|(start, end)| normalize_command_name(&line[*start..*end]))
                .collect::<Vec<_>>()
                .join("_");
            if let Some((index, kind)) = self.by_name.get(&candidate) {
                let definition = &self.definitions[*index];
                if *kind == NameKind::Deprecated {
                    warn!(
                        command = definition.name,
                        written = %candidate,
                        "Deprecated command name, use the canonical name instead"
                    );
                }
                let rest = &line[words[count - 1].1..];
                return Some((definition, rest.trim()));
            }
        }
        None
    }

    /// Parse one command line written at `place`.
    pub fn parse(&self, line: &str, place: UsagePlace) -> Result<Command, ParsingError> {
        let line = line.trim();
        let (definition, rest) = self.lookup(line).ok_or_else(|| {
            let first = line.split_whitespace().next().unwrap_or_default();
            ParsingError::UnknownCommand(normalize_command_name(first))
        })?;

        if !definition.usage_places.contains(&place) {
            return Err(ParsingError::UnsupportedUsagePlace {
                command: definition.name.to_string(),
                place: place.to_string(),
            });
        }

        let input = CommandInput {
            name: definition.name,
            rest,
            raw: line,
        };
        (definition.parse)(&input)
    }
}

/// Shared registry with the built-in commands, built on first use.
pub fn standard_registry() -> &'static CommandRegistry {
    static REGISTRY: OnceLock<CommandRegistry> = OnceLock::new();
    REGISTRY.get_or_init(CommandRegistry::standard)
}

/// Upper-case a name, keep alphanumerics and turn separators into `_`.
pub fn normalize_command_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_alphanumeric() {
            normalized.extend(c.to_uppercase());
        } else if (c == '_' || c == '-' || c.is_whitespace()) && !normalized.ends_with('_') {
            normalized.push('_');
        }
    }
    normalized.trim_matches('_').to_string()
}

/// A word that may be part of a command name. Placeholders like `{name}` and
/// URLs are arguments and end the name.
fn is_name_word(word: &str) -> bool {
    let word = word.strip_suffix(':').unwrap_or(word);
    !word.is_empty() && word.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

fn word_spans(line: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (index, c) in line.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                spans.push((s, index));
                start = None;
            }
            (false, None) => start = Some(index),
            _ => {}
        }
        if spans.len() >= MAX_NAME_WORDS {
            break;
        }
    }
    if let (Some(s), true) = (start, spans.len() < MAX_NAME_WORDS) {
        spans.push((s, line.len()));
    }
    spans
}

/// Whether a list item should be read as a command rather than content.
///
/// Commands start with a SCREAMING_CASE word of at least two characters.
pub fn looks_like_command(item: &str) -> bool {
    let Some(first) = item.split_whitespace().next() else {
        return false;
    };
    let letters = first.chars().filter(|c| c.is_alphabetic()).count();
    letters >= 2
        && first
            .chars()
            .all(|c| c.is_uppercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_command_name() {
        assert_eq!(normalize_command_name("input parameter"), "INPUT_PARAMETER");
        assert_eq!(normalize_command_name("Book-Version"), "BOOK_VERSION");
        assert_eq!(normalize_command_name("  expect:"), "EXPECT");
    }

    #[test]
    fn test_standard_registry_names_are_unique() {
        let registry = CommandRegistry::standard();
        assert_eq!(registry.definitions().len(), STANDARD_COMMANDS.len());
    }

    #[test]
    fn test_lookup_prefers_longest_prefix() {
        let registry = CommandRegistry::standard();
        let (definition, rest) = registry.lookup("INPUT PARAMETER {topic} The topic").unwrap();
        assert_eq!(definition.name, "INPUT_PARAMETER");
        assert_eq!(rest, "{topic} The topic");

        let (definition, rest) = registry.lookup("INPUT {topic}").unwrap();
        assert_eq!(definition.name, "INPUT_PARAMETER");
        assert_eq!(rest, "{topic}");
    }

    #[test]
    fn test_placeholder_never_joins_command_name() {
        let registry = CommandRegistry::standard();
        let (definition, rest) = registry.lookup("INPUT {param} The param").unwrap();
        assert_eq!(definition.name, "INPUT_PARAMETER");
        assert_eq!(rest, "{param} The param");

        for (line, expected) in [
            ("INPUT {param} The param", "param"),
            ("OUTPUT {parameter}", "parameter"),
            ("OUTPUT {param}", "param"),
        ] {
            let command = registry.parse(line, UsagePlace::PipelineHead);
            assert!(
                matches!(command, Ok(Command::Parameter { ref name, .. }) if name == expected),
                "{line} parsed as {command:?}"
            );
        }
    }

    #[test]
    fn test_lookup_case_insensitive_and_deprecated() {
        let registry = CommandRegistry::standard();
        let (definition, _) = registry.lookup("personality Ada, nerd").unwrap();
        assert_eq!(definition.name, "PERSONA");
        let (definition, _) = registry.lookup("Prompt Template").unwrap();
        assert_eq!(definition.name, "PROMPT_TEMPLATE");
    }

    #[test]
    fn test_unknown_command() {
        let err = CommandRegistry::standard()
            .parse("FROBNICATE now", UsagePlace::Template)
            .unwrap_err();
        assert_eq!(err, ParsingError::UnknownCommand("FROBNICATE".into()));
    }

    #[test]
    fn test_usage_place_is_enforced() {
        let err = CommandRegistry::standard()
            .parse("EXPECT min 1 word", UsagePlace::PipelineHead)
            .unwrap_err();
        assert!(matches!(err, ParsingError::UnsupportedUsagePlace { ref command, .. } if command == "EXPECT"));

        let err = CommandRegistry::standard()
            .parse("URL https://example.com/book.md", UsagePlace::Template)
            .unwrap_err();
        assert!(matches!(err, ParsingError::UnsupportedUsagePlace { .. }));
    }

    #[test]
    fn test_looks_like_command() {
        assert!(looks_like_command("KNOWLEDGE https://example.com"));
        assert!(looks_like_command("INPUT PARAMETER {x}"));
        assert!(!looks_like_command("A simple list item"));
        assert!(!looks_like_command("Just prose"));
        assert!(!looks_like_command("{x} is a placeholder"));
    }
}
