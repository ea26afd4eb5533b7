//! Locating a JSON document inside free-form model output.
//!
//! Models often wrap JSON in a markdown fence or surround it with prose.
//! Candidates are tried in order and the first one that parses wins:
//! 1. A fenced block tagged `json`
//! 2. Any other fenced block
//! 3. The whole text when it already starts with `{` or `[`
//! 4. The first balanced object, then the first balanced array, found anywhere
//!
//! When nothing parses but an opened object or array is never closed, the
//! output is reported as truncated instead of missing.

use serde_json::Value;

/// Outcome of searching a text for JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonExtraction {
    /// A complete JSON document, already validated by `serde_json`.
    Found(String),
    /// JSON starts but is never closed.
    Truncated { unclosed_braces: usize, unclosed_brackets: usize },
    NotFound,
}

impl JsonExtraction {
    pub fn into_json(self) -> Option<String> {
        match self {
            JsonExtraction::Found(json) => Some(json),
            _ => None,
        }
    }
}

/// Search `content` for a JSON object or array.
pub fn extract_json(content: &str) -> JsonExtraction {
    let trimmed = content.trim();

    let fenced = [
        fenced_block(trimmed, Some("json")),
        fenced_block(trimmed, None),
    ];
    for candidate in fenced.into_iter().flatten() {
        if parses(&candidate) {
            return JsonExtraction::Found(candidate);
        }
    }

    if (trimmed.starts_with('{') || trimmed.starts_with('[')) && parses(trimmed) {
        return JsonExtraction::Found(trimmed.to_string());
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let Some(start) = trimmed.find(open) {
            let tail = &trimmed[start..];
            if let Some(end) = find_matching_delimiter(tail, open, close) {
                let candidate = &tail[..=end];
                if parses(candidate) {
                    return JsonExtraction::Found(candidate.to_string());
                }
            }
        }
    }

    let start = match trimmed.find(|c: char| c == '{' || c == '[') {
        Some(start) => start,
        None => return JsonExtraction::NotFound,
    };
    let (unclosed_braces, unclosed_brackets) = unclosed_delimiters(&trimmed[start..]);
    if unclosed_braces > 0 || unclosed_brackets > 0 {
        JsonExtraction::Truncated {
            unclosed_braces,
            unclosed_brackets,
        }
    } else {
        JsonExtraction::NotFound
    }
}

fn parses(candidate: &str) -> bool {
    serde_json::from_str::<Value>(candidate).is_ok()
}

/// Body of the first fenced code block, optionally requiring a language tag.
fn fenced_block(content: &str, language: Option<&str>) -> Option<String> {
    let mut lines = content.lines();
    while let Some(line) = lines.next() {
        let Some(info) = line.trim_start().strip_prefix("```") else {
            continue;
        };
        let info = info.trim();
        let matches = match language {
            Some(language) => info.eq_ignore_ascii_case(language),
            None => true,
        };

        let mut body = Vec::new();
        for inner in lines.by_ref() {
            if inner.trim_start().starts_with("```") {
                break;
            }
            body.push(inner);
        }
        if matches {
            return Some(body.join("\n").trim().to_string());
        }
    }
    None
}

/// Byte index of the delimiter closing the one `s` starts with.
///
/// Delimiters inside string literals and escaped quotes are ignored.
pub fn find_matching_delimiter(s: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn unclosed_delimiters(s: &str) -> (usize, usize) {
    let mut braces = 0usize;
    let mut brackets = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => braces += 1,
            '}' if !in_string => braces = braces.saturating_sub(1),
            '[' if !in_string => brackets += 1,
            ']' if !in_string => brackets = brackets.saturating_sub(1),
            _ => {}
        }
    }
    (braces, brackets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_from_json_fence() {
        let content = "Sure!\n```json\n{\"a\": 1}\n```\nDone.";
        assert_eq!(extract_json(content), JsonExtraction::Found("{\"a\": 1}".into()));
    }

    #[test]
    fn test_extract_prefers_tagged_fence() {
        let content = "```text\nnot json\n```\n```json\n[1, 2]\n```";
        assert_eq!(extract_json(content), JsonExtraction::Found("[1, 2]".into()));
    }

    #[test]
    fn test_extract_embedded_object_with_braces_in_strings() {
        let content = r#"The answer is {"text": "a } b", "n": {"m": 2}} as requested"#;
        assert_eq!(
            extract_json(content),
            JsonExtraction::Found(r#"{"text": "a } b", "n": {"m": 2}}"#.into())
        );
    }

    #[test]
    fn test_extract_truncated() {
        let content = "{\"items\": [1, 2";
        assert_eq!(
            extract_json(content),
            JsonExtraction::Truncated {
                unclosed_braces: 1,
                unclosed_brackets: 1
            }
        );
    }

    #[test]
    fn test_extract_not_found() {
        assert_eq!(extract_json("just words"), JsonExtraction::NotFound);
    }
}
