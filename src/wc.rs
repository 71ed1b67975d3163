//! Word-count tokenization.
//!
//! Every character that is neither a word character (alphanumeric or `_`)
//! nor whitespace is treated as a separator; tokens are the remaining
//! whitespace-delimited runs. Case is preserved, so `The` and `the` are
//! distinct words.

use std::collections::BTreeMap;

#[inline]
fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Iterates over the tokens of `text`.
pub fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !is_word_char(c))
        .filter(|token| !token.is_empty())
}

/// Counts occurrences of each token in `text`.
pub fn count_words(text: &str) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for word in tokenize(text) {
        *counts.entry(word.to_string()).or_insert(0) += 1;
    }
    counts
}
