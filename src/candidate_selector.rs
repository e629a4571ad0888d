//! Candidate selector
//!
//! Picks the four answer options for a guessing round: the model's chosen
//! token plus one decoy from each of the mid, low and very-low rank bands.
//!
//! ```text
//! rank  1 │ top        (the chosen token usually lives here)
//!     2-5 │ mid        plausible decoy
//!    6-15 │ low        less plausible decoy
//!   20-50 │ very low   implausible decoy
//! ```

use crate::token_distribution::{TokenCandidate, TokenDistribution};
use crate::word_filter::{is_pure_punctuation, HeuristicWordValidator, WordValidator};
use crate::{LabError, Result};
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Number of options offered per round
pub const OPTION_COUNT: usize = 4;

/// Inclusive range of ranks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankBand {
    pub min: usize,
    pub max: usize,
}

impl RankBand {
    pub const fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn contains(&self, rank: usize) -> bool {
        rank >= self.min && rank <= self.max
    }
}

/// Rank bands decoys are drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankBands {
    pub top: RankBand,
    pub mid: RankBand,
    pub low: RankBand,
    pub very_low: RankBand,
}

impl Default for RankBands {
    fn default() -> Self {
        Self {
            top: RankBand::new(1, 1),
            mid: RankBand::new(2, 5),
            low: RankBand::new(6, 15),
            very_low: RankBand::new(20, 50),
        }
    }
}

impl RankBands {
    /// Decoy bands in the order they are filled
    pub fn decoy_bands(&self) -> [RankBand; 3] {
        [self.mid, self.low, self.very_low]
    }
}

/// Four shuffled answer options. Position carries no meaning.
#[derive(Debug, Clone, Serialize)]
pub struct RoundOptions {
    options: SmallVec<[TokenCandidate; OPTION_COUNT]>,
}

impl RoundOptions {
    pub fn options(&self) -> &[TokenCandidate] {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Index of the model's chosen token within the shuffled options
    pub fn correct_index(&self) -> Option<usize> {
        self.options.iter().position(|c| c.is_chosen)
    }

    pub fn contains_text(&self, text: &str) -> bool {
        self.options.iter().any(|c| c.same_text(text))
    }

    /// Display texts in presentation order
    pub fn labels(&self) -> Vec<&str> {
        self.options.iter().map(|c| c.text.as_str()).collect()
    }
}

/// Draws answer options from a normalized distribution
pub struct CandidateSelector<R = StdRng, V = HeuristicWordValidator> {
    bands: RankBands,
    validator: V,
    rng: R,
}

impl CandidateSelector {
    /// Selector with default bands, heuristic validator and entropy-seeded rng
    pub fn new() -> Self {
        Self::with_parts(RankBands::default(), HeuristicWordValidator, StdRng::from_entropy())
    }

    /// Deterministic selector for replays and tests
    pub fn seeded(seed: u64) -> Self {
        Self::with_parts(
            RankBands::default(),
            HeuristicWordValidator,
            StdRng::seed_from_u64(seed),
        )
    }
}

impl Default for CandidateSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng, V: WordValidator> CandidateSelector<R, V> {
    pub fn with_parts(bands: RankBands, validator: V, rng: R) -> Self {
        Self {
            bands,
            validator,
            rng,
        }
    }

    pub fn bands(&self) -> &RankBands {
        &self.bands
    }

    pub fn set_bands(&mut self, bands: RankBands) {
        self.bands = bands;
    }

    /// Select four shuffled options.
    ///
    /// Fails with `InsufficientCandidates` when the distribution cannot
    /// supply four non-punctuation entries; the caller should re-query.
    pub fn select(&mut self, dist: &TokenDistribution) -> Result<RoundOptions> {
        let mut selected: SmallVec<[TokenCandidate; OPTION_COUNT]> = SmallVec::new();
        selected.push(dist.chosen().clone());

        let mut pool: Vec<&TokenCandidate> = dist
            .iter()
            .filter(|c| !c.is_chosen && self.validator.is_valid(&c.raw_text))
            .collect();

        for band in self.bands.decoy_bands() {
            if selected.len() >= OPTION_COUNT {
                break;
            }
            let in_band: Vec<usize> = pool
                .iter()
                .enumerate()
                .filter(|(_, c)| band.contains(c.rank))
                .map(|(i, _)| i)
                .collect();
            if let Some(&idx) = in_band.choose(&mut self.rng) {
                selected.push(pool.remove(idx).clone());
            } else {
                debug!("rank band {}-{} empty", band.min, band.max);
            }
        }

        // Relaxation 1: any remaining valid word, best rank first
        if selected.len() < OPTION_COUNT {
            for candidate in pool.iter() {
                if selected.len() >= OPTION_COUNT {
                    break;
                }
                selected.push((*candidate).clone());
            }
        }

        // Relaxation 2: drop the word test, keep anything not pure punctuation
        if selected.len() < OPTION_COUNT {
            debug!("relaxing word filter for {} remaining slots", OPTION_COUNT - selected.len());
            for candidate in dist.iter() {
                if selected.len() >= OPTION_COUNT {
                    break;
                }
                let taken = selected.iter().any(|s| s.text == candidate.text);
                if !taken && !is_pure_punctuation(&candidate.text) {
                    selected.push(candidate.clone());
                }
            }
        }

        if selected.len() < OPTION_COUNT {
            warn!(
                "only {} options available from {} candidates",
                selected.len(),
                dist.len()
            );
            return Err(LabError::InsufficientCandidates {
                found: selected.len(),
                required: OPTION_COUNT,
            });
        }

        selected.shuffle(&mut self.rng);
        Ok(RoundOptions { options: selected })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_query::TopLogprob;
    use std::collections::HashSet;

    fn ranked(tokens: &[&str], chosen: &str) -> TokenDistribution {
        let entries: Vec<TopLogprob> = tokens
            .iter()
            .enumerate()
            .map(|(i, t)| TopLogprob::new(*t, -0.1 - i as f64 * 0.2))
            .collect();
        TokenDistribution::normalize(&entries, chosen, None)
    }

    fn word_list(n: usize) -> Vec<String> {
        // Valid long words with distinct texts
        (0..n).map(|i| format!(" word{}a", i)).collect()
    }

    #[test]
    fn test_rank_band_contains() {
        let band = RankBand::new(6, 15);
        assert!(band.contains(6));
        assert!(band.contains(15));
        assert!(!band.contains(5));
        assert!(!band.contains(16));
    }

    #[test]
    fn test_default_bands() {
        let bands = RankBands::default();
        assert_eq!(bands.top, RankBand::new(1, 1));
        assert_eq!(bands.mid, RankBand::new(2, 5));
        assert_eq!(bands.low, RankBand::new(6, 15));
        assert_eq!(bands.very_low, RankBand::new(20, 50));
    }

    #[test]
    fn test_full_distribution_uses_each_band() {
        let words = word_list(40);
        let tokens: Vec<&str> = words.iter().map(|s| s.as_str()).collect();
        let dist = ranked(&tokens, tokens[0]);

        for seed in 0..20 {
            let mut selector = CandidateSelector::seeded(seed);
            let round = selector.select(&dist).unwrap();
            assert_eq!(round.len(), OPTION_COUNT);

            let mut ranks: Vec<usize> = round.options().iter().map(|c| c.rank).collect();
            ranks.sort_unstable();
            assert_eq!(ranks[0], 1);
            assert!(RankBand::new(2, 5).contains(ranks[1]));
            assert!(RankBand::new(6, 15).contains(ranks[2]));
            assert!(RankBand::new(20, 50).contains(ranks[3]));
        }
    }

    #[test]
    fn test_options_distinct_and_include_chosen() {
        let words = word_list(12);
        let tokens: Vec<&str> = words.iter().map(|s| s.as_str()).collect();
        let dist = ranked(&tokens, tokens[3]);

        let mut selector = CandidateSelector::seeded(7);
        let round = selector.select(&dist).unwrap();

        let texts: HashSet<&str> = round.labels().into_iter().collect();
        assert_eq!(texts.len(), OPTION_COUNT);
        assert_eq!(round.options().iter().filter(|c| c.is_chosen).count(), 1);
        assert!(round.contains_text(&words[3]));
        let idx = round.correct_index().unwrap();
        assert!(round.options()[idx].is_chosen);
    }

    #[test]
    fn test_sparse_bands_fill_from_pool() {
        // Only 6 entries: the very-low band is empty
        let dist = ranked(
            &[" door", " window", " floor", " table", " chair", " lamp"],
            " door",
        );
        let mut selector = CandidateSelector::seeded(1);
        let round = selector.select(&dist).unwrap();
        assert_eq!(round.len(), OPTION_COUNT);
        assert!(round.contains_text("door"));
    }

    fn fixed_bands(mid: usize, low: usize) -> RankBands {
        RankBands {
            top: RankBand::new(1, 1),
            mid: RankBand::new(mid, mid),
            low: RankBand::new(low, low),
            very_low: RankBand::new(40, 50),
        }
    }

    fn sorted_ranks(round: &RoundOptions) -> Vec<usize> {
        let mut ranks: Vec<usize> = round.options().iter().map(|c| c.rank).collect();
        ranks.sort_unstable();
        ranks
    }

    #[test]
    fn test_relaxation_fills_valid_words_in_rank_order() {
        let dist = ranked(
            &[" the", "ing", " house", " garden", " road", ",", " river", " field"],
            " the",
        );
        for seed in 0..10 {
            let mut selector = CandidateSelector::with_parts(
                fixed_bands(3, 7),
                HeuristicWordValidator,
                StdRng::seed_from_u64(seed),
            );
            let round = selector.select(&dist).unwrap();
            // bands give 3 and 7; the empty very-low slot goes to the best
            // remaining word (4), skipping the fragment at 2
            assert_eq!(sorted_ranks(&round), vec![1, 3, 4, 7]);
        }
    }

    #[test]
    fn test_word_filter_relaxed_only_after_valid_pool_exhausted() {
        let dist = ranked(
            &[" the", "ing", " house", "tion", ",", "ly", " garden"],
            " the",
        );
        for seed in 0..10 {
            let mut selector = CandidateSelector::with_parts(
                fixed_bands(3, 30),
                HeuristicWordValidator,
                StdRng::seed_from_u64(seed),
            );
            let round = selector.select(&dist).unwrap();
            // garden (7) is taken before any fragment; then the best-ranked
            // fragment (2) fills the last slot
            assert_eq!(sorted_ranks(&round), vec![1, 2, 3, 7]);
            assert!(!round.contains_text("tion"));
        }
    }

    #[test]
    fn test_fragments_never_offered_when_words_exist() {
        let dist = ranked(
            &[" the", "ing", " a", "tion", " house", " garden", " road"],
            " the",
        );
        for seed in 0..10 {
            let mut selector = CandidateSelector::seeded(seed);
            let round = selector.select(&dist).unwrap();
            assert!(!round.contains_text("ing"));
            assert!(!round.contains_text("tion"));
        }
    }

    #[test]
    fn test_relaxation_accepts_fragments_but_not_punctuation() {
        let dist = ranked(&[" the", "ing", ",", "tion", " house", "."], " the");
        let mut selector = CandidateSelector::seeded(3);
        let round = selector.select(&dist).unwrap();

        assert_eq!(round.len(), OPTION_COUNT);
        assert!(round.contains_text("house"));
        assert!(round.contains_text("ing"));
        assert!(round.contains_text("tion"));
        assert!(!round.contains_text(","));
        assert!(!round.contains_text("."));
    }

    #[test]
    fn test_insufficient_candidates() {
        let dist = ranked(&[" the", ",", " house", "."], " the");
        let mut selector = CandidateSelector::seeded(0);
        match selector.select(&dist) {
            Err(LabError::InsufficientCandidates { found, required }) => {
                assert_eq!(found, 2);
                assert_eq!(required, OPTION_COUNT);
            }
            other => panic!("expected InsufficientCandidates, got {other:?}"),
        }
    }

    #[test]
    fn test_chosen_exempt_from_word_filter() {
        let dist = ranked(&["ing", " door", " window", " floor", " roof"], "ing");
        let mut selector = CandidateSelector::seeded(5);
        let round = selector.select(&dist).unwrap();
        assert!(round.contains_text("ing"));
        assert_eq!(round.options()[round.correct_index().unwrap()].text, "ing");
    }

    #[test]
    fn test_shuffle_moves_correct_answer() {
        let words = word_list(30);
        let tokens: Vec<&str> = words.iter().map(|s| s.as_str()).collect();
        let dist = ranked(&tokens, tokens[0]);

        let mut positions = HashSet::new();
        let mut selector = CandidateSelector::seeded(42);
        for _ in 0..50 {
            let round = selector.select(&dist).unwrap();
            positions.insert(round.correct_index().unwrap());
        }
        assert!(positions.len() > 1);
    }

    #[test]
    fn test_custom_validator() {
        let dist = ranked(&[" the", " cat", " dog", " sun", " sea"], " the");
        let only_animals = |t: &str| matches!(t.trim(), "cat" | "dog");
        let mut selector = CandidateSelector::with_parts(
            RankBands::default(),
            only_animals,
            StdRng::seed_from_u64(9),
        );
        let round = selector.select(&dist).unwrap();
        assert!(round.contains_text("cat"));
        assert!(round.contains_text("dog"));
        assert_eq!(round.len(), OPTION_COUNT);
    }
}
