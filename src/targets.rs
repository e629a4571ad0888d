//! Hidden target concepts for the steering game

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Built-in targets with hand-authored synonyms
pub const KNOWN_TARGETS: &[(&str, &[&str])] = &[
    ("accident", &["crash", "collision", "mishap"]),
    ("dragon", &["wyrm", "drake", "serpent"]),
    ("treasure", &["gold", "fortune", "riches"]),
    ("storm", &["thunder", "tempest", "lightning"]),
    ("ghost", &["spirit", "phantom", "specter"]),
    ("explosion", &["blast", "detonation", "boom"]),
    ("rain", &["drizzle", "downpour", "shower"]),
    ("fire", &["flame", "blaze", "inferno"]),
    ("wedding", &["marriage", "bride", "groom"]),
    ("robot", &["android", "machine", "automaton"]),
    ("secret", &["mystery", "hidden", "confidential"]),
    ("cat", &["kitten", "feline", "kitty"]),
];

/// Story openings used when the player does not supply one
pub const OPENING_LINES: &[&str] = &[
    "The old house at the end of the street had been empty for years.",
    "Maria packed her bag and walked to the train station.",
    "The morning started like any other in the small village.",
    "Nobody noticed when the lights in the laboratory flickered.",
    "The captain looked out over the calm sea and frowned.",
];

/// Inflectional suffixes appended to the target word
const SUFFIXES: &[&str] = &["s", "ed", "ing", "ly"];

/// A hidden target word and the surface forms that count as hitting it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConcept {
    pub word: String,
    pub synonyms: Vec<String>,
}

impl TargetConcept {
    /// Target with synonyms from the built-in catalogue, if it is listed
    pub fn new(word: &str) -> Self {
        let word = word.trim().to_lowercase();
        let synonyms = KNOWN_TARGETS
            .iter()
            .find(|(w, _)| *w == word)
            .map(|(_, syns)| syns.iter().map(|s| s.to_string()).collect())
            .unwrap_or_default();
        Self { word, synonyms }
    }

    pub fn with_synonyms(word: &str, synonyms: &[&str]) -> Self {
        Self {
            word: word.trim().to_lowercase(),
            synonyms: synonyms.iter().map(|s| s.trim().to_lowercase()).collect(),
        }
    }

    /// Random target from the built-in catalogue
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let (word, _) = KNOWN_TARGETS
            .choose(rng)
            .copied()
            .unwrap_or(KNOWN_TARGETS[0]);
        Self::new(word)
    }

    /// Lowercase surface forms: the word, its suffixed forms, then synonyms
    pub fn variations(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(1 + SUFFIXES.len() + self.synonyms.len());
        if self.word.is_empty() {
            return out;
        }
        out.push(self.word.clone());
        out.extend(SUFFIXES.iter().map(|s| format!("{}{}", self.word, s)));
        for syn in &self.synonyms {
            if !out.contains(syn) {
                out.push(syn.clone());
            }
        }
        out
    }

    /// Whether a token realizes this concept: its trimmed lowercase text
    /// equals or contains one of the variations.
    pub fn matches_token(&self, token: &str, variations: &[String]) -> bool {
        let t = token.trim().to_lowercase();
        !t.is_empty() && variations.iter().any(|v| t == *v || t.contains(v.as_str()))
    }
}

/// Random opening line
pub fn random_opening<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    OPENING_LINES.choose(rng).copied().unwrap_or(OPENING_LINES[0])
}
