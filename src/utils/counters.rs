//! Text measurements used by expectations and usage accounting.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};
use std::sync::OnceLock;

/// Lines per page when counting pages.
pub const LINES_PER_PAGE: usize = 44;

fn sentence_terminator() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[.!?]+").expect("Invalid regex for sentence terminators"))
}

fn paragraph_separator() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\n[ \t]*\n").expect("Invalid regex for paragraph breaks"))
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n")
}

pub fn count_characters(text: &str) -> usize {
    text.chars().filter(|c| !matches!(c, '\u{200B}' | '\u{FEFF}')).count()
}

pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn count_sentences(text: &str) -> usize {
    sentence_terminator()
        .split(text)
        .filter(|sentence| !sentence.trim().is_empty())
        .count()
}

/// Number of lines; a single trailing newline does not open a new line.
pub fn count_lines(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let text = normalize_newlines(text);
    let text = text.strip_suffix('\n').unwrap_or(&text);
    text.split('\n').count()
}

pub fn count_paragraphs(text: &str) -> usize {
    let text = normalize_newlines(text);
    paragraph_separator()
        .split(&text)
        .filter(|paragraph| !paragraph.trim().is_empty())
        .count()
}

pub fn count_pages(text: &str) -> usize {
    count_lines(text).div_ceil(LINES_PER_PAGE)
}

/// Every measurement of one text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounts {
    pub characters: usize,
    pub words: usize,
    pub sentences: usize,
    pub lines: usize,
    pub paragraphs: usize,
    pub pages: usize,
}

impl UsageCounts {
    pub fn of(text: &str) -> Self {
        Self {
            characters: count_characters(text),
            words: count_words(text),
            sentences: count_sentences(text),
            lines: count_lines(text),
            paragraphs: count_paragraphs(text),
            pages: count_pages(text),
        }
    }
}

impl Add for UsageCounts {
    type Output = UsageCounts;

    fn add(self, other: UsageCounts) -> UsageCounts {
        UsageCounts {
            characters: self.characters + other.characters,
            words: self.words + other.words,
            sentences: self.sentences + other.sentences,
            lines: self.lines + other.lines,
            paragraphs: self.paragraphs + other.paragraphs,
            pages: self.pages + other.pages,
        }
    }
}

impl AddAssign for UsageCounts {
    fn add_assign(&mut self, other: UsageCounts) {
        *self = *self + other;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_words() {
        assert_eq!(count_words("a b  c"), 3);
        assert_eq!(count_words("   "), 0);
    }

    #[test]
    fn test_count_sentences() {
        assert_eq!(count_sentences("A. B! C?"), 3);
        assert_eq!(count_sentences("No terminator"), 1);
        assert_eq!(count_sentences("Wait... what?!"), 2);
    }

    #[test]
    fn test_count_lines() {
        assert_eq!(count_lines("a\nb\n"), 2);
        assert_eq!(count_lines("a\nb"), 2);
        assert_eq!(count_lines("a\r\nb\r\n"), 2);
        assert_eq!(count_lines(""), 0);
        assert_eq!(count_lines("a\n\n"), 2);
    }

    #[test]
    fn test_count_paragraphs_and_pages() {
        assert_eq!(count_paragraphs("one\n\ntwo\n  \nthree"), 3);
        assert_eq!(count_pages(""), 0);
        assert_eq!(count_pages("x"), 1);
        assert_eq!(count_pages(&"line\n".repeat(45)), 2);
    }

    #[test]
    fn test_count_characters_ignores_zero_width() {
        assert_eq!(count_characters("a\u{200B}b"), 2);
    }

    #[test]
    fn test_usage_counts_add() {
        let total = UsageCounts::of("a b.") + UsageCounts::of("c");
        assert_eq!(total.words, 3);
        assert_eq!(total.lines, 2);
    }
}
