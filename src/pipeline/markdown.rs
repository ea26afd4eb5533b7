//! Splitting markdown source into a pipeline head and template sections.
//!
//! Only the structure the pipeline language relies on is recognised: `#` and
//! `##` headings, list items, fenced code blocks, `-> {name}` result lines and
//! plain paragraphs. Headings and list items inside fences are content.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::ParsingError;

/// A fenced code block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub language: Option<String>,
    pub content: String,
    pub line: usize,
}

/// The head or one `##` section of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    /// Heading text; `None` for the head.
    pub title: Option<String>,
    pub line: usize,
    pub paragraphs: Vec<String>,
    /// List items with their 1-based line numbers.
    pub list_items: Vec<(usize, String)>,
    pub code_blocks: Vec<CodeBlock>,
    /// Parameter named by a `-> {name}` line.
    pub result_parameter: Option<(usize, String)>,
}

/// A document cut into its parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkdownDocument {
    pub title: Option<String>,
    pub head: Section,
    pub sections: Vec<Section>,
}

fn result_line() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^`?\s*->\s*\{\s*([^{}\s]+)\s*\}\s*`?$").expect("Invalid regex for result lines")
    })
}

fn heading(line: &str) -> Option<(usize, &str)> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    Some((hashes, rest.trim().trim_end_matches('#').trim()))
}

fn list_item(line: &str) -> Option<&str> {
    let indented = line.len() - line.trim_start().len();
    if indented > 3 {
        return None;
    }
    let trimmed = line.trim_start();
    ["- ", "* ", "> "]
        .iter()
        .find_map(|marker| trimmed.strip_prefix(marker))
        .map(str::trim)
}

fn fence(line: &str) -> Option<(&'static str, &str)> {
    let trimmed = line.trim_start();
    ["```", "~~~"]
        .into_iter()
        .find_map(|marker| trimmed.strip_prefix(marker).map(|info| (marker, info.trim())))
}

struct OpenFence {
    marker: &'static str,
    language: Option<String>,
    line: usize,
    lines: Vec<String>,
}

/// Cut `source` into head and sections.
pub fn split_document(source: &str) -> Result<MarkdownDocument, ParsingError> {
    let mut document = MarkdownDocument::default();
    let mut current = Section {
        line: 1,
        ..Section::default()
    };
    let mut paragraph: Vec<String> = Vec::new();
    let mut open_fence: Option<OpenFence> = None;

    fn flush(paragraph: &mut Vec<String>, section: &mut Section) {
        if !paragraph.is_empty() {
            section.paragraphs.push(paragraph.join("\n"));
            paragraph.clear();
        }
    }

    for (index, raw_line) in source.lines().enumerate() {
        let line_number = index + 1;

        if let Some(open) = open_fence.as_mut() {
            if raw_line.trim_start().starts_with(open.marker) && raw_line.trim() == open.marker {
                let finished = open_fence.take().map(|open| CodeBlock {
                    language: open.language,
                    content: open.lines.join("\n"),
                    line: open.line,
                });
                current.code_blocks.extend(finished);
            } else {
                open.lines.push(raw_line.to_string());
            }
            continue;
        }

        if let Some((marker, info)) = fence(raw_line) {
            flush(&mut paragraph, &mut current);
            open_fence = Some(OpenFence {
                marker,
                language: info
                    .split_whitespace()
                    .next()
                    .map(|language| language.to_string()),
                line: line_number,
                lines: Vec::new(),
            });
            continue;
        }

        if let Some((level, text)) = heading(raw_line) {
            flush(&mut paragraph, &mut current);
            match level {
                1 if document.title.is_none() && document.sections.is_empty() && current.title.is_none() => {
                    document.title = Some(text.to_string());
                    continue;
                }
                2 => {
                    let finished = std::mem::replace(
                        &mut current,
                        Section {
                            title: Some(text.to_string()),
                            line: line_number,
                            ..Section::default()
                        },
                    );
                    push_section(&mut document, finished);
                    continue;
                }
                _ => {
                    paragraph.push(raw_line.trim().to_string());
                    continue;
                }
            }
        }

        let trimmed = raw_line.trim();
        if trimmed.is_empty() {
            flush(&mut paragraph, &mut current);
        } else if let Some(captures) = result_line().captures(trimmed) {
            flush(&mut paragraph, &mut current);
            if current.result_parameter.is_some() {
                return Err(ParsingError::Structure(
                    "a section can name only one resulting parameter".to_string(),
                )
                .at_line(line_number));
            }
            current.result_parameter = Some((line_number, captures[1].to_string()));
        } else if let Some(item) = list_item(raw_line) {
            flush(&mut paragraph, &mut current);
            current.list_items.push((line_number, item.to_string()));
        } else {
            paragraph.push(trimmed.to_string());
        }
    }

    if let Some(open) = open_fence {
        return Err(ParsingError::Structure("code block is never closed".to_string()).at_line(open.line));
    }
    flush(&mut paragraph, &mut current);
    push_section(&mut document, current);

    Ok(document)
}

fn push_section(document: &mut MarkdownDocument, section: Section) {
    if section.title.is_none() {
        document.head = section;
    } else {
        document.sections.push(section);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "# Write an article\n\
\n\
Writes a short article.\n\
\n\
- INPUT PARAMETER {topic} Topic\n\
\n\
## Draft\n\
\n\
Make a first draft.\n\
\n\
- EXPECT min 1 word\n\
\n\
```markdown\n\
Write about {topic}.\n\
## not a heading\n\
- not a command\n\
```\n\
\n\
`-> {draft}`\n";

    #[test]
    fn test_split_head_and_sections() {
        let document = split_document(SOURCE).unwrap();
        assert_eq!(document.title.as_deref(), Some("Write an article"));
        assert_eq!(document.head.paragraphs, vec!["Writes a short article."]);
        assert_eq!(
            document.head.list_items,
            vec![(5, "INPUT PARAMETER {topic} Topic".to_string())]
        );

        assert_eq!(document.sections.len(), 1);
        let draft = &document.sections[0];
        assert_eq!(draft.title.as_deref(), Some("Draft"));
        assert_eq!(draft.paragraphs, vec!["Make a first draft."]);
        assert_eq!(draft.list_items, vec![(11, "EXPECT min 1 word".to_string())]);
        assert_eq!(draft.code_blocks.len(), 1);
        assert_eq!(draft.code_blocks[0].language.as_deref(), Some("markdown"));
        assert_eq!(
            draft.code_blocks[0].content,
            "Write about {topic}.\n## not a heading\n- not a command"
        );
        assert_eq!(draft.result_parameter, Some((19, "draft".to_string())));
    }

    #[test]
    fn test_unclosed_fence_is_an_error() {
        let err = split_document("## A\n```\nno end").unwrap_err();
        assert!(err.to_string().starts_with("Line 2:"));
    }

    #[test]
    fn test_result_line_forms() {
        assert!(result_line().is_match("-> {x}"));
        assert!(result_line().is_match("`-> { x }`"));
        assert!(!result_line().is_match("-> x"));
    }
}
