//! C1 — Normalizer: produces the comparison keys the dedup resolver matches on.
//!
//! Normalized values are derived, never authoritative — the original fields
//! are always stored alongside them so a row can be re-normalized if the
//! rules change.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

#[allow(clippy::expect_used)]
static DOI_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:https?://(?:dx\.)?doi\.org/|doi:\s*)").expect("DOI prefix regex is valid")
});

#[allow(clippy::expect_used)]
static OPENALEX_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(W\d+)").expect("OpenAlex id regex is valid"));

#[allow(clippy::expect_used)]
static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("alphanumeric-strip regex is valid"));

/// Strips the `https://doi.org/` / `doi:` prefix, trims, and lowercases the
/// suffix, then stores it uppercased so `normalized_doi` comparisons are
/// case-insensitive regardless of how either DOI was originally written.
#[must_use]
pub fn normalize_doi(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let stripped = DOI_PREFIX.replace(trimmed, "");
    let cleaned = stripped.trim().to_lowercase();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_uppercase())
    }
}

/// Extracts the `W<digits>` token from a raw OpenAlex id or full URL and
/// uppercases it.
#[must_use]
pub fn normalize_openalex_id(raw: &str) -> Option<String> {
    OPENALEX_ID
        .captures(raw)
        .map(|caps| caps[1].to_uppercase())
}

/// Lowercases, strips all non-alphanumerics, and collapses whitespace to
/// nothing — two titles differing only by punctuation/case/spacing normalize
/// to the same key.
#[must_use]
pub fn normalize_title(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    if lowered.is_empty() {
        return None;
    }
    let stripped = NON_ALPHANUMERIC.replace_all(&lowered, "").to_string();
    if stripped.is_empty() {
        None
    } else {
        Some(stripped)
    }
}

/// Serializes the ordered author list as canonical (sorted-key, but
/// order-preserving list) JSON, then applies the title-normalization rule to
/// that serialization, collapsing punctuation/case variance between e.g.
/// `"R. H. Coase"` and `"R.H. Coase"`.
#[must_use]
pub fn normalize_authors(authors: &[String]) -> Option<String> {
    if authors.is_empty() {
        return None;
    }
    let value = Value::Array(authors.iter().cloned().map(Value::String).collect());
    let canonical = serde_json::to_string(&value).ok()?;
    normalize_title(&canonical)
}

/// Author-name normalization used only during enrichment matching (§4.1),
/// never persisted. Handles `"Last, First"` and `"First ... Last"` forms,
/// returns `(last_name_lower, given_initials)`.
#[must_use]
pub fn normalize_author_name(raw: &str) -> (String, String) {
    let raw = raw.trim();
    let (last, given) = if let Some((last, given)) = raw.split_once(',') {
        (last.trim(), given.trim())
    } else {
        match raw.rsplit_once(' ') {
            Some((given, last)) => (last.trim(), given.trim()),
            None => (raw, ""),
        }
    };

    let last_lower = last.to_lowercase();
    let initials: String = given
        .split(|c: char| c.is_whitespace() || c == '.' || c == '-')
        .filter_map(|part| part.chars().find(char::is_ascii_alphabetic))
        .map(|c| c.to_ascii_lowercase())
        .collect();

    (last_lower, initials)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn doi_prefix_and_case_fold() {
        let a = normalize_doi("https://doi.org/10.1017/CBO9780511613807.002").unwrap();
        let b = normalize_doi("10.1017/cbo9780511613807.002").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "10.1017/CBO9780511613807.002".to_uppercase());
    }

    #[test]
    fn doi_prefix_handles_doi_colon_form() {
        let a = normalize_doi("doi:10.1234/x").unwrap();
        assert_eq!(a, "10.1234/X");
    }

    #[test]
    fn empty_doi_normalizes_to_none() {
        assert_eq!(normalize_doi("  "), None);
    }

    #[test]
    fn openalex_id_extraction() {
        assert_eq!(
            normalize_openalex_id("https://openalex.org/W2015930340"),
            Some("W2015930340".to_string())
        );
        assert_eq!(normalize_openalex_id("w42"), Some("W42".to_string()));
        assert_eq!(normalize_openalex_id("not an id"), None);
    }

    #[test]
    fn title_normalization_collapses_punctuation_and_case() {
        let a = normalize_title("The Nature of the Firm").unwrap();
        let b = normalize_title("the nature of the firm!!").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn author_list_normalization_is_order_sensitive_but_format_tolerant() {
        let a = normalize_authors(&["R. H. Coase".to_string()]).unwrap();
        let b = normalize_authors(&["R.H. Coase".to_string()]).unwrap();
        assert_eq!(a, b);

        let reordered = normalize_authors(&["A. Author".to_string(), "B. Author".to_string()]);
        let original = normalize_authors(&["B. Author".to_string(), "A. Author".to_string()]);
        assert_ne!(reordered, original);
    }

    #[test]
    fn author_name_parses_last_first_and_first_last() {
        assert_eq!(normalize_author_name("Coase, Ronald H."), ("coase".to_string(), "rh".to_string()));
        assert_eq!(normalize_author_name("Ronald H. Coase"), ("coase".to_string(), "rh".to_string()));
    }
}
