//! Word validity heuristics
//!
//! Decides whether a token reads as a plausible whole word, so sub-word
//! fragments like "ing" or "tion" are never offered as decoys. This is a
//! whitelist heuristic, not a dictionary: false positives and negatives are
//! expected.

/// Two-letter words accepted as decoys
const TWO_LETTER_WORDS: &[&str] = &[
    "am", "an", "as", "at", "be", "by", "do", "go", "he", "hi", "if", "in", "is", "it", "me",
    "my", "no", "of", "oh", "ok", "on", "or", "so", "to", "up", "us", "we",
];

/// Three-letter words accepted as decoys
const THREE_LETTER_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "day", "get", "has", "him", "his", "how", "man", "new", "now", "old",
    "see", "two", "way", "who", "boy", "did", "its", "let", "put", "say", "she", "too", "use",
    "yes", "yet", "ago", "air", "arm", "art", "ask", "bad", "bag", "bed", "big", "bit", "box",
    "bus", "buy", "car", "cat", "cup", "cut", "dog", "ear", "eat", "end", "eye", "far", "few",
    "fly", "fun", "got", "guy", "hat", "hot", "ice", "job", "key", "kid", "lay", "leg", "lie",
    "lot", "low", "map", "may", "nor", "odd", "off", "oil", "own", "pay", "pen", "ran", "red",
    "run", "sad", "sat", "sea", "set", "sit", "sky", "son", "sun", "ten", "top", "try", "war",
    "wet", "why", "win", "won",
];

/// Bare affixes that tokenizers emit as standalone pieces
const FRAGMENTS: &[&str] = &[
    "ing", "ed", "ly", "er", "est", "un", "dis", "pre", "re", "ous", "tion", "sion", "ment",
    "ness", "ible", "ical", "ally", "ings", "ation", "ities", "izing", "ized", "ious", "ence",
    "ance", "ular", "ship", "ful",
];

const VOWELS: &[char] = &['a', 'e', 'i', 'o', 'u', 'y'];

/// Predicate deciding whether a token can be shown as a decoy option
pub trait WordValidator {
    fn is_valid(&self, token: &str) -> bool;
}

impl<F> WordValidator for F
where
    F: Fn(&str) -> bool,
{
    fn is_valid(&self, token: &str) -> bool {
        self(token)
    }
}

/// Default whitelist-based validator
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicWordValidator;

impl WordValidator for HeuristicWordValidator {
    fn is_valid(&self, token: &str) -> bool {
        is_valid_word(token)
    }
}

/// True when the trimmed token has no alphanumeric character at all.
///
/// Empty tokens count as punctuation.
pub fn is_pure_punctuation(token: &str) -> bool {
    !token.trim().chars().any(char::is_alphanumeric)
}

/// Heuristic whole-word test
pub fn is_valid_word(token: &str) -> bool {
    let trimmed = token.trim();
    if trimmed.is_empty() || is_pure_punctuation(trimmed) {
        return false;
    }

    match trimmed.chars().next() {
        Some(c) if !c.is_alphanumeric() && c != '\'' => return false,
        _ => {}
    }

    let word = trimmed.to_lowercase();
    if FRAGMENTS.contains(&word.as_str()) {
        return false;
    }

    match word.chars().count() {
        1 => word == "a" || word == "i",
        2 => TWO_LETTER_WORDS.contains(&word.as_str()),
        3 => THREE_LETTER_WORDS.contains(&word.as_str()),
        _ => word.contains(VOWELS),
    }
}
