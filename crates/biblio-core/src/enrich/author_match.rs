//! Author-list fuzzy matching used to score enrichment candidates (§4.6).

use strsim::{jaro_winkler, normalized_levenshtein};

use crate::normalize::normalize_author_name;

const LAST_NAME_THRESHOLD: f64 = 0.90;
const FIRST_NAME_PARTIAL_THRESHOLD: f64 = 0.70;

/// True when `reference_author` and `candidate_author` refer to the same
/// person under the rule in §4.6: last names fuzzy-match at ≥90, and either
/// the initials agree, the initials string matches verbatim, or the given
/// names are fuzzy-similar at ≥70.
#[must_use]
pub fn authors_match(reference_author: &str, candidate_author: &str) -> bool {
    let (ref_last, ref_initials) = normalize_author_name(reference_author);
    let (cand_last, cand_initials) = normalize_author_name(candidate_author);

    if ref_last.is_empty() || cand_last.is_empty() {
        return false;
    }

    let last_name_score = jaro_winkler(&ref_last, &cand_last) * 100.0;
    if last_name_score < LAST_NAME_THRESHOLD * 100.0 {
        return false;
    }

    if ref_initials == cand_initials {
        return true;
    }

    if !ref_initials.is_empty() && !cand_initials.is_empty() {
        let shorter_matches_prefix = ref_initials.starts_with(&cand_initials)
            || cand_initials.starts_with(&ref_initials);
        if shorter_matches_prefix {
            return true;
        }
    }

    let given_similarity = normalized_levenshtein(&ref_initials, &cand_initials) * 100.0;
    given_similarity >= FIRST_NAME_PARTIAL_THRESHOLD * 100.0
}

/// Score = matched author count / max(reference person count, candidate
/// author count) (§4.6). `reference_people` may include editors — any
/// reference person may match any candidate author position.
#[must_use]
pub fn score_authors(reference_people: &[String], candidate_authors: &[String]) -> f64 {
    if reference_people.is_empty() || candidate_authors.is_empty() {
        return 0.0;
    }

    let mut matched_candidates = vec![false; candidate_authors.len()];
    let mut matched_count = 0usize;

    for ref_person in reference_people {
        if let Some(slot) = candidate_authors
            .iter()
            .enumerate()
            .find(|(i, cand)| !matched_candidates[*i] && authors_match(ref_person, cand))
        {
            matched_candidates[slot.0] = true;
            matched_count += 1;
        }
    }

    let denominator = reference_people.len().max(candidate_authors.len()) as f64;
    matched_count as f64 / denominator
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn matches_identical_names() {
        assert!(authors_match("Ronald H. Coase", "Ronald H. Coase"));
    }

    #[test]
    fn matches_initials_only_variant() {
        assert!(authors_match("R. H. Coase", "Ronald H. Coase"));
    }

    #[test]
    fn rejects_different_last_names() {
        assert!(!authors_match("Ronald Coase", "Ronald Williamson"));
    }

    #[test]
    fn score_is_fraction_of_max_person_count() {
        let reference = vec!["Ronald H. Coase".to_string()];
        let candidates = vec!["R. H. Coase".to_string(), "Oliver Williamson".to_string()];
        let score = score_authors(&reference, &candidates);
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn score_is_zero_with_no_matches() {
        let reference = vec!["Ronald Coase".to_string()];
        let candidates = vec!["Oliver Williamson".to_string()];
        assert_eq!(score_authors(&reference, &candidates), 0.0);
    }
}
