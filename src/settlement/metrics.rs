//! Metric catalog: canonical stat keys, board-label mapping, and the
//! derived metrics settlement can compute from stored components.

use std::collections::HashMap;

use crate::identity::normalize_token;

/// Direct metrics a box score feed records. A bet on one of these with a
/// participating player settles even when the row is absent: absence of a
/// standard category in a complete box score means zero, not unknown.
const DIRECT_METRICS: &[&str] = &[
    "at_bats",
    "doubles",
    "earned_runs",
    "hits",
    "hits_allowed",
    "home_runs",
    "pitcher_strikeouts",
    "pitching_outs",
    "rbi",
    "runs",
    "stolen_bases",
    "strikeouts",
    "triples",
    "walks",
    "walks_allowed",
];

/// Board stat-type labels mapped to canonical keys. Labels are compared in
/// normalized form, so "Hits+Runs+RBIs" and "hits runs rbis" both match.
const METRIC_LABELS: &[(&str, &str)] = &[
    ("doubles", "doubles"),
    ("earned runs allowed", "earned_runs"),
    ("hits", "hits"),
    ("hits allowed", "hits_allowed"),
    ("hits runs rbis", "hits_runs_rbis"),
    ("hitter strikeouts", "strikeouts"),
    ("home runs", "home_runs"),
    ("pitcher strikeouts", "pitcher_strikeouts"),
    ("pitching outs", "pitching_outs"),
    ("rbis", "rbi"),
    ("runs", "runs"),
    ("singles", "singles"),
    ("stolen bases", "stolen_bases"),
    ("total bases", "total_bases"),
    ("walks", "walks"),
    ("walks allowed", "walks_allowed"),
];

/// Metrics computed from stored components as a weighted sum. Total bases
/// folds the singles expansion into coefficients over recorded categories:
/// singles + 2*2B + 3*3B + 4*HR = hits + 2B + 2*3B + 3*HR.
const DERIVED_METRICS: &[(&str, &[(&str, f64)])] = &[
    (
        "hits_runs_rbis",
        &[("hits", 1.0), ("runs", 1.0), ("rbi", 1.0)],
    ),
    (
        "singles",
        &[("hits", 1.0), ("doubles", -1.0), ("triples", -1.0), ("home_runs", -1.0)],
    ),
    (
        "total_bases",
        &[("hits", 1.0), ("doubles", 1.0), ("triples", 2.0), ("home_runs", 3.0)],
    ),
];

/// Map a board label onto the canonical metric key. Unknown labels pass
/// through slugified; settlement counts them as unsupported rather than
/// guessing here.
pub fn canonical_metric_key(label: &str) -> String {
    let norm = normalize_token(label);
    METRIC_LABELS
        .iter()
        .find(|(l, _)| *l == norm)
        .map(|(_, key)| (*key).to_string())
        .unwrap_or_else(|| norm.replace(' ', "_"))
}

/// Resolve a bet's actual value from a player's per-metric totals.
///
/// Returns None only for metrics settlement does not know how to produce.
/// Missing components default to zero; callers must already have proven
/// participation (a non-empty totals map), otherwise absence means Void,
/// not zero.
pub fn resolve_actual(metric: &str, totals: &HashMap<String, f64>) -> Option<f64> {
    if let Some(value) = totals.get(metric) {
        return Some(*value);
    }
    if let Some((_, terms)) = DERIVED_METRICS.iter().find(|(key, _)| *key == metric) {
        let value = terms
            .iter()
            .map(|(component, coeff)| totals.get(*component).copied().unwrap_or(0.0) * coeff)
            .sum::<f64>();
        // A derived count can never be negative; clamp-to-zero here is
        // arithmetic on complete data, not silent repair of bad input.
        return Some(value.max(0.0));
    }
    if DIRECT_METRICS.contains(&metric) {
        return Some(0.0);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn totals(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_label_mapping() {
        assert_eq!(canonical_metric_key("Hits"), "hits");
        assert_eq!(canonical_metric_key("Hits+Runs+RBIs"), "hits_runs_rbis");
        assert_eq!(canonical_metric_key("Total Bases"), "total_bases");
        assert_eq!(canonical_metric_key("Earned Runs Allowed"), "earned_runs");
        // Unknown labels slug through untouched.
        assert_eq!(canonical_metric_key("Fantasy Score"), "fantasy_score");
    }

    #[test]
    fn test_direct_metric_reads_straight_from_totals() {
        let t = totals(&[("hits", 2.0), ("runs", 1.0)]);
        assert_eq!(resolve_actual("hits", &t), Some(2.0));
    }

    #[test]
    fn test_total_bases_derivation() {
        // 2 hits where one is a double and one a homer: bases = 2 + 4 = 6,
        // and no singles remain.
        let t = totals(&[("hits", 2.0), ("doubles", 1.0), ("home_runs", 1.0)]);
        assert_eq!(resolve_actual("total_bases", &t), Some(6.0));
        assert_eq!(resolve_actual("singles", &t), Some(0.0));
    }

    #[test]
    fn test_combo_metric_with_missing_component() {
        // No rbi row recorded: treated as zero once participation is proven.
        let t = totals(&[("hits", 1.0), ("runs", 2.0)]);
        assert_eq!(resolve_actual("hits_runs_rbis", &t), Some(3.0));
    }

    #[test]
    fn test_known_direct_metric_absent_is_zero() {
        let t = totals(&[("at_bats", 4.0)]);
        assert_eq!(resolve_actual("home_runs", &t), Some(0.0));
    }

    #[test]
    fn test_unknown_metric_is_unsupported() {
        let t = totals(&[("hits", 1.0)]);
        assert_eq!(resolve_actual("fantasy_score", &t), None);
    }
}
