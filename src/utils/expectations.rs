//! Measurable expectations on generated text.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::counters::{
    count_characters, count_lines, count_pages, count_paragraphs, count_sentences, count_words,
};
use super::json_extraction::{extract_json, JsonExtraction};

/// What an expectation counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectationUnit {
    Characters,
    Words,
    Sentences,
    Lines,
    Paragraphs,
    Pages,
}

impl ExpectationUnit {
    pub const ALL: [ExpectationUnit; 6] = [
        ExpectationUnit::Characters,
        ExpectationUnit::Words,
        ExpectationUnit::Sentences,
        ExpectationUnit::Lines,
        ExpectationUnit::Paragraphs,
        ExpectationUnit::Pages,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExpectationUnit::Characters => "characters",
            ExpectationUnit::Words => "words",
            ExpectationUnit::Sentences => "sentences",
            ExpectationUnit::Lines => "lines",
            ExpectationUnit::Paragraphs => "paragraphs",
            ExpectationUnit::Pages => "pages",
        }
    }

    pub fn count(&self, text: &str) -> usize {
        match self {
            ExpectationUnit::Characters => count_characters(text),
            ExpectationUnit::Words => count_words(text),
            ExpectationUnit::Sentences => count_sentences(text),
            ExpectationUnit::Lines => count_lines(text),
            ExpectationUnit::Paragraphs => count_paragraphs(text),
            ExpectationUnit::Pages => count_pages(text),
        }
    }
}

impl fmt::Display for ExpectationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExpectationUnit {
    type Err = String;

    /// Accepts singular and plural forms in any case, plus `chars`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let singular = lower.strip_suffix('s').unwrap_or(&lower);
        match singular {
            "character" | "char" => Ok(ExpectationUnit::Characters),
            "word" => Ok(ExpectationUnit::Words),
            "sentence" => Ok(ExpectationUnit::Sentences),
            "line" => Ok(ExpectationUnit::Lines),
            "paragraph" => Ok(ExpectationUnit::Paragraphs),
            "page" => Ok(ExpectationUnit::Pages),
            _ => Err(format!("unknown unit '{}'", s.trim())),
        }
    }
}

/// Inclusive bounds on one unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,
}

/// Per-unit bounds declared on a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characters: Option<Bounds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Bounds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentences: Option<Bounds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<Bounds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paragraphs: Option<Bounds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<Bounds>,
}

impl Expectations {
    pub fn get(&self, unit: ExpectationUnit) -> Option<Bounds> {
        match unit {
            ExpectationUnit::Characters => self.characters,
            ExpectationUnit::Words => self.words,
            ExpectationUnit::Sentences => self.sentences,
            ExpectationUnit::Lines => self.lines,
            ExpectationUnit::Paragraphs => self.paragraphs,
            ExpectationUnit::Pages => self.pages,
        }
    }

    pub fn bounds_mut(&mut self, unit: ExpectationUnit) -> &mut Bounds {
        let slot = match unit {
            ExpectationUnit::Characters => &mut self.characters,
            ExpectationUnit::Words => &mut self.words,
            ExpectationUnit::Sentences => &mut self.sentences,
            ExpectationUnit::Lines => &mut self.lines,
            ExpectationUnit::Paragraphs => &mut self.paragraphs,
            ExpectationUnit::Pages => &mut self.pages,
        };
        slot.get_or_insert_with(Bounds::default)
    }

    pub fn is_empty(&self) -> bool {
        ExpectationUnit::ALL
            .iter()
            .all(|unit| self.get(*unit).is_none())
    }
}

/// Structural format a result must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExpectFormat {
    Json,
}

/// A result that does not meet its template's expectations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpectationError {
    #[error("expected at least {min} {unit}, got {actual}")]
    TooFew {
        unit: ExpectationUnit,
        min: usize,
        actual: usize,
    },

    #[error("expected at most {max} {unit}, got {actual}")]
    TooMany {
        unit: ExpectationUnit,
        max: usize,
        actual: usize,
    },

    #[error("expected valid JSON")]
    NotJson,
}

/// Check `text` against every declared bound.
pub fn check_expectations(expectations: &Expectations, text: &str) -> Result<(), ExpectationError> {
    for unit in ExpectationUnit::ALL {
        let Some(bounds) = expectations.get(unit) else {
            continue;
        };
        let actual = unit.count(text);
        if let Some(min) = bounds.min {
            if actual < min {
                return Err(ExpectationError::TooFew { unit, min, actual });
            }
        }
        if let Some(max) = bounds.max {
            if actual > max {
                return Err(ExpectationError::TooMany { unit, max, actual });
            }
        }
    }
    Ok(())
}

pub fn check_format(format: Option<ExpectFormat>, text: &str) -> Result<(), ExpectationError> {
    match format {
        None => Ok(()),
        Some(ExpectFormat::Json) => {
            if serde_json::from_str::<serde_json::Value>(text.trim()).is_ok() {
                return Ok(());
            }
            match extract_json(text) {
                JsonExtraction::Found(_) => Ok(()),
                _ => Err(ExpectationError::NotJson),
            }
        }
    }
}

pub fn is_passing_expectations(
    expectations: &Expectations,
    format: Option<ExpectFormat>,
    text: &str,
) -> bool {
    check_expectations(expectations, text).is_ok() && check_format(format, text).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_parsing() {
        assert_eq!("Words".parse::<ExpectationUnit>(), Ok(ExpectationUnit::Words));
        assert_eq!("word".parse::<ExpectationUnit>(), Ok(ExpectationUnit::Words));
        assert_eq!("CHARS".parse::<ExpectationUnit>(), Ok(ExpectationUnit::Characters));
        assert!("furlongs".parse::<ExpectationUnit>().is_err());
    }

    #[test]
    fn test_check_bounds() {
        let mut expectations = Expectations::default();
        expectations.bounds_mut(ExpectationUnit::Words).min = Some(2);
        expectations.bounds_mut(ExpectationUnit::Words).max = Some(3);

        assert!(check_expectations(&expectations, "one two").is_ok());
        assert_eq!(
            check_expectations(&expectations, "one"),
            Err(ExpectationError::TooFew {
                unit: ExpectationUnit::Words,
                min: 2,
                actual: 1
            })
        );
        assert!(matches!(
            check_expectations(&expectations, "a b c d"),
            Err(ExpectationError::TooMany { actual: 4, .. })
        ));
    }

    #[test]
    fn test_check_json_format() {
        assert!(check_format(Some(ExpectFormat::Json), "{\"a\": 1}").is_ok());
        assert!(check_format(Some(ExpectFormat::Json), "```json\n[1]\n```").is_ok());
        assert_eq!(
            check_format(Some(ExpectFormat::Json), "nope"),
            Err(ExpectationError::NotJson)
        );
    }

    #[test]
    fn test_empty_expectations_pass() {
        assert!(Expectations::default().is_empty());
        assert!(is_passing_expectations(&Expectations::default(), None, ""));
    }
}
