//! Placeholder tokenizer for template bodies.
//!
//! A template body is literal text interleaved with `{name}` placeholders.
//! Whitespace inside the braces is ignored, names must be identifiers.

use std::collections::BTreeSet;

use thiserror::Error;

use super::{CHARACTER_LOOP_LIMIT, LOOP_LIMIT};

/// Malformed placeholder syntax. Positions are character offsets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateSyntaxError {
    #[error("'{{' at position {position} is never closed")]
    UnclosedPlaceholder { position: usize },

    #[error("'}}' at position {position} has no matching '{{'")]
    UnmatchedClosingBrace { position: usize },

    #[error("'{name}' at position {position} is not a valid parameter name")]
    InvalidParameterName { name: String, position: usize },

    #[error("Template exceeds the limit of {limit} iterations")]
    LoopLimitExceeded { limit: usize },
}

/// One piece of a tokenized template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Placeholder(&'a str),
}

/// Split a template body into literal text and placeholders in one left-to-right pass.
pub fn tokenize(template: &str) -> Result<Vec<Segment<'_>>, TemplateSyntaxError> {
    let mut segments = Vec::new();
    let mut text_start = 0;
    let mut open: Option<(usize, usize)> = None;

    for (char_position, (byte_index, ch)) in template.char_indices().enumerate() {
        if char_position >= CHARACTER_LOOP_LIMIT {
            return Err(TemplateSyntaxError::LoopLimitExceeded {
                limit: CHARACTER_LOOP_LIMIT,
            });
        }

        match (ch, open) {
            ('{', Some((_, position))) => {
                return Err(TemplateSyntaxError::UnclosedPlaceholder { position });
            }
            ('{', None) => {
                if byte_index > text_start {
                    segments.push(Segment::Text(&template[text_start..byte_index]));
                }
                open = Some((byte_index, char_position));
            }
            ('}', Some((open_index, position))) => {
                let name = template[open_index + 1..byte_index].trim();
                if !is_valid_parameter_name(name) {
                    return Err(TemplateSyntaxError::InvalidParameterName {
                        name: name.to_string(),
                        position,
                    });
                }
                segments.push(Segment::Placeholder(name));
                if segments.len() > LOOP_LIMIT {
                    return Err(TemplateSyntaxError::LoopLimitExceeded { limit: LOOP_LIMIT });
                }
                open = None;
                text_start = byte_index + 1;
            }
            ('}', None) => {
                return Err(TemplateSyntaxError::UnmatchedClosingBrace {
                    position: char_position,
                });
            }
            _ => {}
        }
    }

    if let Some((_, position)) = open {
        return Err(TemplateSyntaxError::UnclosedPlaceholder { position });
    }
    if text_start < template.len() {
        segments.push(Segment::Text(&template[text_start..]));
    }

    Ok(segments)
}

/// Names of every placeholder in a template body, sorted and deduplicated.
pub fn extract_parameter_names(template: &str) -> Result<BTreeSet<String>, TemplateSyntaxError> {
    Ok(tokenize(template)?
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Placeholder(name) => Some(name.to_string()),
            Segment::Text(_) => None,
        })
        .collect())
}

/// Whether `name` can be used as a parameter name.
pub fn is_valid_parameter_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {
            chars.all(|c| c.is_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
