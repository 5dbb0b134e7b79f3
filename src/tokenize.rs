//! Text preprocessing for indexing (spec §4.4).
//!
//! Grounded directly in
//! `original_source/backend/indexer_service/indexer.py`'s
//! `TextPreprocessor`: lowercase, split on non-alphabetic characters, drop
//! tokens under 3 characters or in the stopword list, then Porter-stem what
//! remains. `rust-stemmers` replaces the Python `nltk`/`PorterStemmer`
//! dependency with the idiomatic Rust equivalent already present in this
//! pack's stack.

use rust_stemmers::{Algorithm, Stemmer};

// Matches the stopword list size/register `original_source`'s
// `TextPreprocessor.STOPWORDS` ships (a fixed English function-word list,
// not a generated one).
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it",
    "its", "of", "on", "that", "the", "to", "was", "were", "will", "with", "this", "but", "they",
    "have", "had", "what", "when", "where", "who", "which", "why", "how", "all", "each", "every",
    "both", "few", "more", "most", "other", "some", "such", "no", "nor", "not", "only", "own",
    "same", "so", "than", "too", "very", "can", "just", "should", "now", "then", "there", "their",
    "them", "these", "those", "you", "your", "i", "we", "our", "my", "me", "his", "her", "she",
    "him", "been", "being", "do", "does", "did", "doing", "would", "could", "shall", "must",
];

fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

/// Splits `text` into lowercase alphabetic tokens, dropping anything
/// shorter than 3 characters or in the stopword list.
fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| w.len() >= 3 && !is_stopword(w))
        .map(|w| w.to_string())
        .collect()
}

/// Tokenizes, drops stopwords/short tokens, and Porter-stems what's left,
/// rejoining into a single space-separated string ready for the full-text
/// store's analyzed fields.
pub fn preprocess(text: &str) -> String {
    let stemmer = Stemmer::create(Algorithm::English);
    tokens(text)
        .iter()
        .map(|w| stemmer.stem(w).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Word count of `text` after tokenization and stopword/short-word removal
/// (matching `TextPreprocessor.get_word_count`) — spec §3's `content_length`
/// field is a word count, not a byte length, and not a raw whitespace split.
pub fn word_count(text: &str) -> usize {
    tokens(text).len()
}
