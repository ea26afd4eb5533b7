//! Pure text utilities consumed by the executor: counters, expectations,
//! postprocessing and JSON extraction.

pub mod counters;
pub mod expectations;
pub mod json_extraction;
pub mod postprocessing;

pub use counters::{
    count_characters, count_lines, count_pages, count_paragraphs, count_sentences, count_words,
    UsageCounts,
};
pub use expectations::{
    check_expectations, check_format, is_passing_expectations, Bounds, ExpectFormat,
    ExpectationError, ExpectationUnit, Expectations,
};
pub use json_extraction::{extract_json, JsonExtraction};
pub use postprocessing::{
    apply_postprocessing, canonical_postprocessing_name, find_postprocessing_function,
    normalize_to_kebab_case,
};
