//! Keyword extraction for knowledge pieces.

use std::collections::HashMap;

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been", "but", "by", "can",
    "could", "did", "do", "does", "for", "from", "had", "has", "have", "he", "her", "his", "how", "if", "in", "into",
    "is", "it", "its", "just", "may", "more", "most", "no", "not", "of", "on", "one", "or", "other", "our", "out",
    "over", "she", "should", "so", "some", "such", "than", "that", "the", "their", "them", "then", "there", "these",
    "they", "this", "those", "through", "to", "up", "use", "used", "was", "we", "were", "what", "when", "where",
    "which", "while", "who", "will", "with", "would", "you", "your",
];

const MIN_KEYWORD_LENGTH: usize = 3;

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.binary_search(&word).is_ok()
}

/// The `count` most frequent non-stop-words of `text`, lower-cased.
///
/// Ties are broken alphabetically so the result is deterministic.
pub fn extract_keywords(text: &str, count: usize) -> Vec<String> {
    let mut frequencies: HashMap<String, usize> = HashMap::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(|word| word.trim_matches('-').to_lowercase())
        .filter(|word| word.chars().count() >= MIN_KEYWORD_LENGTH)
        .filter(|word| !word.chars().all(|c| c.is_ascii_digit()))
        .filter(|word| !is_stop_word(word))
    {
        *frequencies.entry(word).or_insert(0) += 1;
    }

    let mut ranked: Vec<(String, usize)> = frequencies.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(count).map(|(word, _)| word).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_words_are_sorted() {
        let mut sorted = STOP_WORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STOP_WORDS);
    }

    #[test]
    fn test_most_frequent_first() {
        let text = "Rust is fast. Rust is safe. The borrow checker keeps Rust safe; cargo builds it.";
        let keywords = extract_keywords(text, 3);
        assert_eq!(keywords, vec!["rust", "safe", "borrow"]);
    }

    #[test]
    fn test_numbers_and_short_words_skipped() {
        assert!(extract_keywords("42 is an ok 2024 go", 5).is_empty());
    }
}
