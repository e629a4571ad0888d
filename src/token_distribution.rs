//! Token distribution normalizer
//!
//! Turns a raw top-k log-probability list for one output position into a
//! deduplicated, densely ranked distribution that always contains the token
//! the model actually chose.

use crate::candidate_selector::RankBand;
use crate::model_query::{ModelResponse, TopLogprob};
use crate::{LabError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One ranked next-token candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenCandidate {
    /// Trimmed display form, also the identity used for equality
    pub text: String,
    /// Original form as emitted by the model (keeps leading space)
    pub raw_text: String,
    pub log_probability: f64,
    pub probability: f64,
    /// Dense rank, 1-based
    pub rank: usize,
    pub is_chosen: bool,
}

impl TokenCandidate {
    fn from_logprob(raw: &str, logprob: f64) -> Self {
        // Provider rounding occasionally reports logprobs just above 0
        let logprob = logprob.min(0.0);
        Self {
            text: raw.trim().to_string(),
            raw_text: raw.to_string(),
            log_probability: logprob,
            probability: logprob.exp(),
            rank: 0,
            is_chosen: false,
        }
    }

    /// Probability as a percentage (0-100)
    pub fn percent(&self) -> f64 {
        self.probability * 100.0
    }

    /// Whether `other` names the same token, ignoring surrounding whitespace
    pub fn same_text(&self, other: &str) -> bool {
        self.text == other.trim()
    }
}

/// Deduplicated, ranked distribution for a single next-token position.
///
/// Invariants: ranks are exactly `1..=len()`, no two candidates share a
/// trimmed text, and exactly one candidate is the chosen token.
#[derive(Debug, Clone, Serialize)]
pub struct TokenDistribution {
    candidates: Vec<TokenCandidate>,
    chosen_index: usize,
}

impl TokenDistribution {
    /// Normalize raw top-k entries around the model's chosen token.
    ///
    /// `chosen_logprob` is only used when the chosen token has to be
    /// synthesized because it is missing from `entries`.
    pub fn normalize(
        entries: &[TopLogprob],
        chosen_token: &str,
        chosen_logprob: Option<f64>,
    ) -> Self {
        let mut converted: Vec<TokenCandidate> = entries
            .iter()
            .filter(|e| !e.logprob.is_nan() && e.logprob != f64::INFINITY)
            .map(|e| TokenCandidate::from_logprob(&e.token, e.logprob))
            .collect();

        // Provider order is not trusted; stable sort keeps first-seen order on ties
        converted.sort_by(|a, b| b.probability.total_cmp(&a.probability));

        let mut seen: HashSet<String> = HashSet::with_capacity(converted.len());
        let mut candidates: Vec<TokenCandidate> = converted
            .into_iter()
            .filter(|c| !c.text.is_empty())
            .filter(|c| seen.insert(c.text.clone()))
            .collect();

        let chosen_text = chosen_token.trim();
        let chosen_index = match candidates.iter().position(|c| c.text == chosen_text) {
            Some(idx) => idx,
            None => {
                debug!(
                    "chosen token {:?} missing from top-{}, synthesizing",
                    chosen_token,
                    entries.len()
                );
                let synthesized = match chosen_logprob {
                    Some(lp) if lp.is_finite() => TokenCandidate::from_logprob(chosen_token, lp),
                    _ => TokenCandidate {
                        probability: 0.0,
                        ..TokenCandidate::from_logprob(chosen_token, f64::NEG_INFINITY)
                    },
                };
                candidates.insert(0, synthesized);
                0
            }
        };

        for (i, candidate) in candidates.iter_mut().enumerate() {
            candidate.rank = i + 1;
            candidate.is_chosen = i == chosen_index;
        }

        Self {
            candidates,
            chosen_index,
        }
    }

    /// Normalize the first output position of a model response.
    ///
    /// Fails with `DataUnavailable` when the response has no log-probability
    /// payload, or when the chosen token is pure whitespace and would leave
    /// an empty option; no default distribution is substituted.
    pub fn from_response(response: &ModelResponse) -> Result<Self> {
        let position = response.first_position()?;
        if position.token.trim().is_empty() {
            return Err(LabError::DataUnavailable(format!(
                "chosen token {:?} has no visible text",
                position.token
            )));
        }
        Ok(Self::normalize(
            &position.top_logprobs,
            &position.token,
            Some(position.logprob),
        ))
    }

    pub fn candidates(&self) -> &[TokenCandidate] {
        &self.candidates
    }

    pub fn iter(&self) -> impl Iterator<Item = &TokenCandidate> {
        self.candidates.iter()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// The token the model actually produced
    pub fn chosen(&self) -> &TokenCandidate {
        &self.candidates[self.chosen_index]
    }

    /// Trimmed chosen token, for display and comparison
    pub fn chosen_text(&self) -> &str {
        &self.chosen().text
    }

    /// Raw chosen token, for appending to running text
    pub fn chosen_raw(&self) -> &str {
        &self.chosen().raw_text
    }

    pub fn get_by_rank(&self, rank: usize) -> Option<&TokenCandidate> {
        rank.checked_sub(1).and_then(|i| self.candidates.get(i))
    }

    pub fn find(&self, text: &str) -> Option<&TokenCandidate> {
        self.candidates.iter().find(|c| c.same_text(text))
    }

    /// Candidates whose rank falls inside `band`
    pub fn in_band(&self, band: RankBand) -> impl Iterator<Item = &TokenCandidate> {
        self.candidates.iter().filter(move |c| band.contains(c.rank))
    }

    /// Sum of linear probabilities across the distribution
    pub fn total_probability(&self) -> f64 {
        self.candidates.iter().map(|c| c.probability).sum()
    }

    /// Rows for a probability table: (rank, text, percent, is_chosen)
    pub fn probability_table(&self, limit: usize) -> Vec<(usize, &str, f64, bool)> {
        self.candidates
            .iter()
            .take(limit)
            .map(|c| (c.rank, c.text.as_str(), c.percent(), c.is_chosen))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_query::TokenLogprob;
    use crate::LabError;

    fn entries(raw: &[(&str, f64)]) -> Vec<TopLogprob> {
        raw.iter().map(|&(t, lp)| TopLogprob::new(t, lp)).collect()
    }

    fn assert_invariants(dist: &TokenDistribution) {
        let ranks: Vec<usize> = dist.iter().map(|c| c.rank).collect();
        let expected: Vec<usize> = (1..=dist.len()).collect();
        assert_eq!(ranks, expected);

        let texts: HashSet<&str> = dist.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts.len(), dist.len());

        assert_eq!(dist.iter().filter(|c| c.is_chosen).count(), 1);
    }

    #[test]
    fn test_whitespace_variants_collapse() {
        let raw = entries(&[
            (" and", -0.1),
            ("and", -0.1),
            (" but", -2.0),
            (" slowly", -3.5),
            (" quietly", -5.0),
        ]);
        let dist = TokenDistribution::normalize(&raw, " and", Some(-0.1));

        assert_eq!(dist.len(), 4);
        assert_invariants(&dist);
        assert_eq!(dist.chosen().text, "and");
        assert_eq!(dist.chosen().raw_text, " and");
        assert_eq!(dist.chosen().rank, 1);
        assert_eq!(dist.get_by_rank(4).unwrap().text, "quietly");
    }

    #[test]
    fn test_dedup_keeps_higher_probability_variant() {
        let raw = entries(&[("hidden", -3.0), (" hidden", -0.5), (" open", -1.0)]);
        let dist = TokenDistribution::normalize(&raw, " open", None);

        assert_eq!(dist.len(), 2);
        let hidden = dist.find("hidden").unwrap();
        assert_eq!(hidden.raw_text, " hidden");
        assert!((hidden.log_probability - -0.5).abs() < 1e-12);
        assert_eq!(hidden.rank, 1);
        assert_eq!(dist.chosen().rank, 2);
    }

    #[test]
    fn test_unsorted_input_is_sorted() {
        let raw = entries(&[(" c", -4.0), (" a", -0.2), (" b", -1.5)]);
        let dist = TokenDistribution::normalize(&raw, " a", None);

        let texts: Vec<&str> = dist.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
        assert!(dist
            .candidates()
            .windows(2)
            .all(|w| w[0].probability >= w[1].probability));
    }

    #[test]
    fn test_probability_is_exp_of_logprob() {
        let raw = entries(&[(" x", (0.25f64).ln())]);
        let dist = TokenDistribution::normalize(&raw, " x", None);
        assert!((dist.chosen().probability - 0.25).abs() < 1e-12);
        assert!((dist.chosen().percent() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_trimmed_entries_rejected() {
        let raw = entries(&[(" ", -0.1), ("\n", -0.3), (" the", -1.0)]);
        let dist = TokenDistribution::normalize(&raw, " the", None);
        assert_eq!(dist.len(), 1);
        assert_invariants(&dist);
    }

    #[test]
    fn test_missing_chosen_is_synthesized_at_rank_one() {
        let raw = entries(&[(" cat", -0.5), (" dog", -1.0)]);
        let dist = TokenDistribution::normalize(&raw, " ferret", Some(-6.0));

        assert_eq!(dist.len(), 3);
        assert_invariants(&dist);
        assert_eq!(dist.chosen().text, "ferret");
        assert_eq!(dist.chosen().rank, 1);
        assert!((dist.chosen().log_probability - -6.0).abs() < 1e-12);
        assert_eq!(dist.get_by_rank(2).unwrap().text, "cat");
    }

    #[test]
    fn test_synthesized_without_logprob_has_zero_probability() {
        let dist = TokenDistribution::normalize(&[], " ferret", None);
        assert_eq!(dist.len(), 1);
        assert_eq!(dist.chosen().probability, 0.0);
        assert!(dist.chosen().is_chosen);
    }

    #[test]
    fn test_nan_logprobs_dropped() {
        let raw = entries(&[(" a", f64::NAN), (" b", -1.0)]);
        let dist = TokenDistribution::normalize(&raw, " b", None);
        assert_eq!(dist.len(), 1);
        assert_eq!(dist.chosen().text, "b");
    }

    #[test]
    fn test_from_response_requires_payload() {
        let response = ModelResponse::text(" and");
        assert!(matches!(
            TokenDistribution::from_response(&response),
            Err(LabError::DataUnavailable(_))
        ));
    }

    #[test]
    fn test_positive_logprob_capped_at_certainty() {
        let raw = entries(&[(" and", 0.0003), (" but", -2.0)]);
        let dist = TokenDistribution::normalize(&raw, " and", None);
        assert_eq!(dist.chosen().probability, 1.0);
        assert_eq!(dist.chosen().log_probability, 0.0);
        assert!(dist.iter().all(|c| c.probability <= 1.0));
    }

    #[test]
    fn test_whitespace_chosen_token_unavailable() {
        let response = ModelResponse::with_logprobs(
            "\n",
            vec![TokenLogprob {
                token: "\n".to_string(),
                logprob: -0.2,
                top_logprobs: entries(&[("\n", -0.2), (" and", -1.5), (" but", -2.5)]),
            }],
        );
        assert!(matches!(
            TokenDistribution::from_response(&response),
            Err(LabError::DataUnavailable(_))
        ));
    }

    #[test]
    fn test_from_response_uses_first_position() {
        let response = ModelResponse::with_logprobs(
            " but",
            vec![TokenLogprob {
                token: " but".to_string(),
                logprob: -0.7,
                top_logprobs: entries(&[(" and", -0.6), (" but", -0.7), ("but", -2.0)]),
            }],
        );
        let dist = TokenDistribution::from_response(&response).unwrap();
        assert_eq!(dist.len(), 2);
        assert_eq!(dist.chosen_text(), "but");
        assert_eq!(dist.chosen_raw(), " but");
        assert_eq!(dist.chosen().rank, 2);
    }

    #[test]
    fn test_in_band_and_table() {
        let raw: Vec<TopLogprob> = (0..10)
            .map(|i| TopLogprob::new(format!(" w{i}"), -(i as f64) - 1.0))
            .collect();
        let dist = TokenDistribution::normalize(&raw, " w0", None);

        let mid: Vec<usize> = dist.in_band(RankBand::new(2, 5)).map(|c| c.rank).collect();
        assert_eq!(mid, vec![2, 3, 4, 5]);

        let table = dist.probability_table(3);
        assert_eq!(table.len(), 3);
        assert_eq!(table[0].1, "w0");
        assert!(table[0].3);
        assert!(dist.total_probability() < 1.0);
    }
}
