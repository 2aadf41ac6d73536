//! Weighted mime-relevance ranking.
//!
//! Probe actions disagree: siegfried may report `fmt/43`'s `image/jpeg`
//! while a generic extractor says `application/octet-stream`. The ranker
//! resolves the candidate set with an ordered list of `(regex, weight)`
//! rules. A mime's weight comes from the FIRST rule that matches it; a mime
//! no rule matches gets [`DEFAULT_WEIGHT`]. Rules are authored from most- to
//! least-generic, which keeps intent composable without weight arithmetic.

use crate::core::config::MimeWeightRule;
use crate::error::{MerkmalError, Result};
use regex::Regex;

/// Weight assigned to a mime that no rule matches.
pub const DEFAULT_WEIGHT: i64 = 50;

#[derive(Debug)]
struct MimeWeight {
    regexp: Regex,
    weight: i64,
}

/// Compiled, ordered relevance rules.
#[derive(Debug, Default)]
pub struct MimeRelevance {
    rules: Vec<MimeWeight>,
}

impl MimeRelevance {
    /// Compile an ordered rule list. A malformed pattern fails construction;
    /// the dispatcher is never built with half a rule set.
    pub fn new(rules: &[MimeWeightRule]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let regexp = Regex::new(&rule.regexp).map_err(|e| {
                MerkmalError::validation_with_source(
                    format!("invalid mime relevance pattern '{}'", rule.regexp),
                    e,
                )
            })?;
            compiled.push(MimeWeight {
                regexp,
                weight: rule.weight,
            });
        }
        Ok(Self { rules: compiled })
    }

    /// Weight of a single mime under the first-match policy.
    pub fn weight_of(&self, mimetype: &str) -> i64 {
        self.rules
            .iter()
            .find(|rule| rule.regexp.is_match(mimetype))
            .map(|rule| rule.weight)
            .unwrap_or(DEFAULT_WEIGHT)
    }

    /// Stable-sort candidates by descending weight. Ties keep their prior
    /// insertion order, which is the documented tiebreak.
    pub fn rank(&self, mimetypes: &mut [String]) {
        mimetypes.sort_by_key(|m| std::cmp::Reverse(self.weight_of(m)));
    }

    /// The elected mime: head of the ranked list, or empty for no candidates.
    pub fn elect(&self, mimetypes: &mut Vec<String>) -> String {
        self.rank(mimetypes);
        mimetypes.first().cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(pairs: &[(&str, i64)]) -> MimeRelevance {
        let rules: Vec<MimeWeightRule> = pairs
            .iter()
            .map(|(regexp, weight)| MimeWeightRule {
                regexp: regexp.to_string(),
                weight: *weight,
            })
            .collect();
        MimeRelevance::new(&rules).unwrap()
    }

    #[test]
    fn test_default_weight_for_unmatched() {
        let relevance = rules(&[("^image/", 100)]);
        assert_eq!(relevance.weight_of("application/pdf"), DEFAULT_WEIGHT);
        assert_eq!(relevance.weight_of("image/png"), 100);
    }

    #[test]
    fn test_first_match_wins() {
        let relevance = rules(&[("^application/octet-stream$", 1), ("^application/", 80)]);
        // the earlier, more specific rule decides even though a later rule
        // also matches
        assert_eq!(relevance.weight_of("application/octet-stream"), 1);
        assert_eq!(relevance.weight_of("application/pdf"), 80);
    }

    #[test]
    fn test_rank_descending_stable() {
        let relevance = rules(&[("^application/octet-stream$", 1), ("mods", 90)]);
        let mut candidates = vec![
            "application/octet-stream".to_string(),
            "text/xml".to_string(),
            "application/mods+xml".to_string(),
            "text/plain".to_string(),
        ];
        relevance.rank(&mut candidates);
        assert_eq!(candidates[0], "application/mods+xml");
        // the two default-weight entries keep their insertion order
        assert_eq!(candidates[1], "text/xml");
        assert_eq!(candidates[2], "text/plain");
        assert_eq!(candidates[3], "application/octet-stream");
    }

    #[test]
    fn test_elect_empty_set() {
        let relevance = rules(&[]);
        let mut empty: Vec<String> = vec![];
        assert_eq!(relevance.elect(&mut empty), "");
    }

    #[test]
    fn test_elect_head() {
        let relevance = rules(&[("jpeg", 70)]);
        let mut candidates = vec!["text/plain".to_string(), "image/jpeg".to_string()];
        assert_eq!(relevance.elect(&mut candidates), "image/jpeg");
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let bad = vec![MimeWeightRule {
            regexp: "(".to_string(),
            weight: 10,
        }];
        assert!(MimeRelevance::new(&bad).is_err());
    }
}
