//! Named postprocessing functions applied to template results.
//!
//! Templates list functions by name with `POSTPROCESS`. Names compare
//! case-insensitively and ignore `-` and `_`, so `spaceTrim`, `space-trim`
//! and `SPACE_TRIM` are the same function.

use regex::Regex;
use std::sync::OnceLock;

use super::json_extraction::{extract_json, JsonExtraction};
use crate::error::PipelineExecutionError;

type Transform = fn(&str) -> Result<String, String>;

/// One entry of the postprocessing table.
#[derive(Clone, Copy)]
pub struct PostprocessingFunction {
    pub name: &'static str,
    transform: Transform,
}

impl PostprocessingFunction {
    pub fn apply(&self, text: &str) -> Result<String, String> {
        (self.transform)(text)
    }
}

static FUNCTIONS: &[PostprocessingFunction] = &[
    PostprocessingFunction { name: "trim", transform: |t| Ok(t.trim().to_string()) },
    PostprocessingFunction { name: "spaceTrim", transform: |t| Ok(space_trim(t)) },
    PostprocessingFunction { name: "removeQuotes", transform: |t| Ok(remove_quotes(t)) },
    PostprocessingFunction { name: "unwrapResult", transform: |t| Ok(unwrap_result(t)) },
    PostprocessingFunction { name: "trimCodeBlock", transform: |t| Ok(trim_code_block(t)) },
    PostprocessingFunction {
        name: "trimEndOfCodeBlock",
        transform: |t| Ok(trim_end_of_code_block(t)),
    },
    PostprocessingFunction { name: "extractJsonBlock", transform: extract_json_block },
    PostprocessingFunction {
        name: "removeMarkdownFormatting",
        transform: |t| Ok(remove_markdown_formatting(t)),
    },
    PostprocessingFunction { name: "capitalize", transform: |t| Ok(capitalize(t)) },
    PostprocessingFunction { name: "decapitalize", transform: |t| Ok(decapitalize(t)) },
    PostprocessingFunction { name: "uppercase", transform: |t| Ok(t.to_uppercase()) },
    PostprocessingFunction { name: "lowercase", transform: |t| Ok(t.to_lowercase()) },
    PostprocessingFunction {
        name: "normalizeToKebabCase",
        transform: |t| Ok(normalize_to_kebab_case(t)),
    },
];

fn normalize_function_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '-' && *c != '_' && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn find_postprocessing_function(name: &str) -> Option<&'static PostprocessingFunction> {
    let wanted = normalize_function_name(name);
    FUNCTIONS
        .iter()
        .find(|function| normalize_function_name(function.name) == wanted)
}

/// Canonical name of a known function, `None` for unknown names.
pub fn canonical_postprocessing_name(name: &str) -> Option<&'static str> {
    find_postprocessing_function(name).map(|function| function.name)
}

pub fn postprocessing_function_names() -> impl Iterator<Item = &'static str> {
    FUNCTIONS.iter().map(|function| function.name)
}

/// Run `names` over `text` in order.
pub fn apply_postprocessing(names: &[String], text: &str) -> Result<String, PipelineExecutionError> {
    let mut value = text.to_string();
    for name in names {
        let function = find_postprocessing_function(name).ok_or_else(|| {
            PipelineExecutionError::Postprocessing {
                function: name.clone(),
                message: "unknown function".to_string(),
            }
        })?;
        value = function
            .apply(&value)
            .map_err(|message| PipelineExecutionError::Postprocessing {
                function: function.name.to_string(),
                message,
            })?;
    }
    Ok(value)
}

/// Trim surrounding blank lines and remove the indentation shared by every line.
pub fn space_trim(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let first = lines.iter().position(|line| !line.trim().is_empty());
    let last = lines.iter().rposition(|line| !line.trim().is_empty());
    let (Some(first), Some(last)) = (first, last) else {
        return String::new();
    };
    let lines = &lines[first..=last];

    let indent = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);

    lines
        .iter()
        .map(|line| line.get(indent..).unwrap_or("").trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

const QUOTE_PAIRS: &[(char, char)] = &[
    ('"', '"'),
    ('\'', '\''),
    ('`', '`'),
    ('\u{201C}', '\u{201D}'),
    ('\u{2018}', '\u{2019}'),
    ('\u{00AB}', '\u{00BB}'),
    ('\u{201E}', '\u{201C}'),
];

pub fn remove_quotes(text: &str) -> String {
    let trimmed = text.trim();
    for (open, close) in QUOTE_PAIRS {
        if let Some(inner) = trimmed
            .strip_prefix(*open)
            .and_then(|rest| rest.strip_suffix(*close))
        {
            return inner.to_string();
        }
    }
    trimmed.to_string()
}

fn result_label() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?i)(?:the\s+)?(?:result|answer|output|response)[^:\n]{0,40}:\s*")
            .expect("Invalid regex for result labels")
    })
}

/// Strip a leading "Result:"-style label and surrounding quotes from a one-shot answer.
pub fn unwrap_result(text: &str) -> String {
    let trimmed = text.trim();
    let unlabeled = match result_label().find(trimmed) {
        Some(label) => &trimmed[label.end()..],
        None => trimmed,
    };
    remove_quotes(unlabeled)
}

pub fn trim_code_block(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") || !trimmed.ends_with("```") || trimmed.len() < 6 {
        return trimmed.to_string();
    }
    let without_end = &trimmed[..trimmed.len() - 3];
    let body = match without_end.find('\n') {
        Some(newline) => &without_end[newline + 1..],
        None => &without_end[3..],
    };
    body.trim().to_string()
}

pub fn trim_end_of_code_block(text: &str) -> String {
    let trimmed = text.trim_end();
    trimmed
        .strip_suffix("```")
        .unwrap_or(trimmed)
        .trim_end()
        .to_string()
}

fn extract_json_block(text: &str) -> Result<String, String> {
    match extract_json(text) {
        JsonExtraction::Found(json) => Ok(json),
        JsonExtraction::Truncated {
            unclosed_braces,
            unclosed_brackets,
        } => Err(format!(
            "JSON is truncated ({unclosed_braces} unclosed braces, {unclosed_brackets} unclosed brackets)"
        )),
        JsonExtraction::NotFound => Err("no JSON found".to_string()),
    }
}

fn markdown_markers() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"(?m)^#{1,6}\s+", ""),
            (r"\*\*(.+?)\*\*", "$1"),
            (r"__(.+?)__", "$1"),
            (r"\*(.+?)\*", "$1"),
            (r"\b_(.+?)_\b", "$1"),
            (r"`([^`]+)`", "$1"),
            (r"\[([^\]]+)\]\([^)]+\)", "$1"),
        ]
        .into_iter()
        .map(|(pattern, replacement)| {
            (
                Regex::new(pattern).expect("Invalid regex for markdown markers"),
                replacement,
            )
        })
        .collect()
    })
}

pub fn remove_markdown_formatting(text: &str) -> String {
    markdown_markers()
        .iter()
        .fold(text.to_string(), |value, (pattern, replacement)| {
            pattern.replace_all(&value, *replacement).into_owned()
        })
}

pub fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn decapitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `"Hello, World!"` becomes `"hello-world"`.
pub fn normalize_to_kebab_case(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !normalized.is_empty() {
                normalized.push('-');
            }
            pending_dash = false;
            normalized.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_names_are_normalized() {
        assert_eq!(canonical_postprocessing_name("space_trim"), Some("spaceTrim"));
        assert_eq!(canonical_postprocessing_name("TRIM"), Some("trim"));
        assert_eq!(canonical_postprocessing_name("explode"), None);
    }

    #[test]
    fn test_apply_in_declared_order() {
        let names = vec!["trim".to_string(), "uppercase".to_string(), "removeQuotes".to_string()];
        assert_eq!(apply_postprocessing(&names, "  \"hi\" ").unwrap(), "HI");
    }

    #[test]
    fn test_apply_reports_failing_function() {
        let names = vec!["extractJsonBlock".to_string()];
        let err = apply_postprocessing(&names, "no json here").unwrap_err();
        assert!(matches!(
            err,
            PipelineExecutionError::Postprocessing { ref function, .. } if function == "extractJsonBlock"
        ));
    }

    #[test]
    fn test_space_trim() {
        assert_eq!(space_trim("\n    a\n      b\n    c\n\n"), "a\n  b\nc");
        assert_eq!(space_trim("   \n  "), "");
    }

    #[test]
    fn test_unwrap_result() {
        assert_eq!(unwrap_result("Result: \"Paris\""), "Paris");
        assert_eq!(unwrap_result("The answer is: 42"), "42");
        assert_eq!(unwrap_result("plain"), "plain");
    }

    #[test]
    fn test_code_block_trimming() {
        assert_eq!(trim_code_block("```rust\nfn main() {}\n```"), "fn main() {}");
        assert_eq!(trim_end_of_code_block("let x = 1;\n```"), "let x = 1;");
    }

    #[test]
    fn test_remove_markdown_formatting() {
        assert_eq!(
            remove_markdown_formatting("## Title\n**bold** and *it* with `code` and [link](http://x)"),
            "Title\nbold and it with code and link"
        );
    }

    #[test]
    fn test_case_helpers() {
        assert_eq!(capitalize("hello"), "Hello");
        assert_eq!(decapitalize("Hello"), "hello");
        assert_eq!(normalize_to_kebab_case("Hello, World!  2"), "hello-world-2");
        assert_eq!(normalize_to_kebab_case("--Already-kebab--"), "already-kebab");
    }
}
