//! Keyword concept extraction.
//!
//! Deterministic and bounded: lower-cased text, punctuation removed, tokens
//! of four or more characters that are not stop words, at most
//! [`MAX_CONCEPTS_PER_ITEM`] per item.

use crate::models::Item;

pub const MAX_CONCEPTS_PER_ITEM: usize = 5;
const MIN_TOKEN_CHARS: usize = 4;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "her", "was", "one",
    "our", "out", "his", "has", "had", "how", "its", "who", "about", "above", "after", "again",
    "also", "been", "before", "being", "below", "between", "both", "because", "could", "does",
    "doing", "down", "during", "each", "from", "further", "have", "having", "here", "into",
    "just", "more", "most", "much", "must", "only", "other", "over", "same", "should", "some",
    "such", "than", "that", "their", "them", "then", "there", "these", "they", "this", "those",
    "through", "under", "until", "very", "were", "what", "when", "where", "which", "while",
    "will", "with", "would", "your", "yours",
];

fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect()
}

fn matches_hint(concept: &str, hints: &[String]) -> bool {
    hints
        .iter()
        .any(|hint| !hint.is_empty() && (concept.contains(hint.as_str()) || hint.contains(concept)))
}

/// Concepts for one item, hint matches first, duplicates dropped.
pub fn extract_concepts(front_text: &str, back_text: &str, domain_hints: &[&str]) -> Vec<String> {
    let text = normalize(&format!("{front_text} {back_text}"));

    let mut concepts: Vec<String> = Vec::new();
    for token in text.split_whitespace() {
        if token.chars().count() < MIN_TOKEN_CHARS || is_stop_word(token) {
            continue;
        }
        if !concepts.iter().any(|c| c == token) {
            concepts.push(token.to_string());
        }
    }

    if !domain_hints.is_empty() {
        let hints: Vec<String> = domain_hints.iter().map(|h| h.to_lowercase()).collect();
        // stable: original order kept within each group
        concepts.sort_by_key(|c| !matches_hint(c, &hints));
    }

    concepts.truncate(MAX_CONCEPTS_PER_ITEM);
    concepts
}

pub fn item_concepts(item: &Item, domain_hints: &[&str]) -> Vec<String> {
    extract_concepts(&item.front_text, &item.back_text, domain_hints)
}
