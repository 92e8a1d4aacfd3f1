//! Best-match scan of the roster with a configured acceptance threshold.

use crate::embedding::Embedding;
use crate::roster::Roster;

/// Result of matching a live embedding against the roster.
///
/// The best-scoring name is always reported, even below the threshold, so
/// operators can tune the threshold from rejected attempts. Only
/// `accepted` matches count as a recognition.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub name: Option<String>,
    /// Cosine similarity of the best match, 0.0 for an empty roster.
    pub similarity: f32,
    pub accepted: bool,
}

/// Cosine-similarity matcher over the full roster snapshot.
///
/// The threshold is configuration, not a universal constant: its meaning
/// is tied to the embedding model the roster was built with.
#[derive(Debug, Clone, Copy)]
pub struct RosterMatcher {
    threshold: f32,
}

impl RosterMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Scan every roster entry and keep the maximum similarity.
    ///
    /// Ties resolve to the first-seen entry (strict `>`), which is
    /// deterministic given the roster's stable snapshot order.
    pub fn best_match(&self, probe: &Embedding, roster: &Roster) -> MatchResult {
        let mut best_similarity = f32::NEG_INFINITY;
        let mut best_name: Option<&str> = None;

        for entry in roster.entries() {
            let similarity = probe.similarity(&entry.embedding);
            if similarity > best_similarity {
                best_similarity = similarity;
                best_name = Some(&entry.name);
            }
        }

        match best_name {
            Some(name) => MatchResult {
                name: Some(name.to_string()),
                similarity: best_similarity,
                accepted: best_similarity >= self.threshold,
            },
            None => MatchResult {
                name: None,
                similarity: 0.0,
                accepted: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::parse_snapshot;

    fn roster(json: &str) -> Roster {
        parse_snapshot(json.as_bytes()).unwrap().0
    }

    #[test]
    fn test_best_match_above_threshold_is_accepted() {
        let roster = roster(
            r#"[{"name":"ana","embedding":[1.0,0.0]},{"name":"budi","embedding":[0.0,1.0]}]"#,
        );
        let probe = Embedding::new(vec![0.9, 0.1]);

        let result = RosterMatcher::new(0.55).best_match(&probe, &roster);
        assert_eq!(result.name.as_deref(), Some("ana"));
        assert!(result.accepted);
        assert!(result.similarity > 0.9);
    }

    #[test]
    fn test_below_threshold_still_reports_best_name() {
        let roster = roster(r#"[{"name":"ana","embedding":[1.0,0.0]}]"#);
        // cos(angle) ≈ 0.4 against ana
        let probe = Embedding::new(vec![0.4, f32::sqrt(1.0 - 0.16)]);

        let result = RosterMatcher::new(0.55).best_match(&probe, &roster);
        assert_eq!(result.name.as_deref(), Some("ana"));
        assert!(!result.accepted);
        assert!((result.similarity - 0.4).abs() < 1e-3);
    }

    #[test]
    fn test_ties_resolve_to_first_seen() {
        let roster = roster(
            r#"[{"name":"first","embedding":[1.0,0.0]},{"name":"second","embedding":[1.0,0.0]}]"#,
        );
        let probe = Embedding::new(vec![1.0, 0.0]);

        let result = RosterMatcher::new(0.5).best_match(&probe, &roster);
        assert_eq!(result.name.as_deref(), Some("first"));
    }

    #[test]
    fn test_all_entries_are_scanned() {
        let roster = roster(
            r#"[
                {"name":"decoy1","embedding":[0.0,1.0,0.0]},
                {"name":"decoy2","embedding":[0.0,0.0,1.0]},
                {"name":"match","embedding":[1.0,0.0,0.0]}
            ]"#,
        );
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);

        let result = RosterMatcher::new(0.5).best_match(&probe, &roster);
        assert_eq!(result.name.as_deref(), Some("match"));
        assert!((result.similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_roster_matches_nothing() {
        let result = RosterMatcher::new(0.5).best_match(&Embedding::new(vec![1.0]), &Roster::default());
        assert_eq!(result.name, None);
        assert_eq!(result.similarity, 0.0);
        assert!(!result.accepted);
    }

    #[test]
    fn test_accepted_scenario_ana() {
        // Live embedding matches "Ana" at ~0.62 against a 0.55 threshold.
        let roster = roster(r#"[{"name":"Ana","embedding":[1.0,0.0]}]"#);
        let probe = Embedding::new(vec![0.62, f32::sqrt(1.0 - 0.62 * 0.62)]);

        let result = RosterMatcher::new(0.55).best_match(&probe, &roster);
        assert_eq!(result.name.as_deref(), Some("Ana"));
        assert!(result.accepted);
        assert!((result.similarity - 0.62).abs() < 1e-3);
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        let roster = roster(r#"[{"name":"ana","embedding":[1.0,0.0]}]"#);
        let probe = Embedding::new(vec![1.0, 0.0]);

        let result = RosterMatcher::new(1.0).best_match(&probe, &roster);
        assert!(result.accepted);
    }
}
