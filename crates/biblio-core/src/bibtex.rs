//! BibTeX ingestion: turns a `.bib` file's text into [`NewReference`]
//! candidates for `Store::insert_raw` (§4.1 `ingest-bibtex`, §6 command
//! surface). Segmentation is brace-balance aware so a value containing
//! nested `{}` or a quoted `,` doesn't split an entry early.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::NewReference;

#[allow(clippy::expect_used)]
static AUTHOR_SPLIT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+and\s+").expect("bibtex author-split regex is valid"));

#[allow(clippy::expect_used)]
static DOI_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"10\.\d{4,9}/\S+").expect("bibtex doi regex is valid"));

/// One `@type{key, ...}` block that failed to parse, with a reason suitable
/// for surfacing to the CLI caller.
#[derive(Debug, Clone)]
pub struct SkippedEntry {
    pub raw: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct BibtexParseResult {
    pub references: Vec<NewReference>,
    pub skipped: Vec<SkippedEntry>,
}

/// Parses every `@...{...}` block in `input`. Unsupported or malformed
/// entries are recorded in `skipped` rather than aborting the whole file —
/// one bad entry in a thousand-entry export shouldn't block the other 999.
#[must_use]
pub fn parse_bibtex(input: &str, ingest_source: &str, corpus_id: Option<i64>) -> BibtexParseResult {
    let mut result = BibtexParseResult::default();

    for segment in segment_entries(input) {
        match parse_entry(&segment) {
            Ok(reference) => {
                let mut reference = reference;
                reference.ingest_source = Some(ingest_source.to_string());
                reference.corpus_id = corpus_id;
                reference.bibtex_entry_json = Some(segment.clone());
                result.references.push(reference);
            }
            Err(reason) => result.skipped.push(SkippedEntry { raw: segment, reason }),
        }
    }

    result
}

/// Splits `input` into balanced `@type{...}` segments, tolerating nested
/// braces and quoted values.
fn segment_entries(input: &str) -> Vec<String> {
    let chars: Vec<char> = input.chars().collect();
    let mut entries = Vec::new();
    let mut i = 0usize;

    while i < chars.len() {
        if chars[i] != '@' {
            i += 1;
            continue;
        }

        let mut j = i + 1;
        while j < chars.len() && chars[j].is_ascii_alphabetic() {
            j += 1;
        }
        while j < chars.len() && chars[j].is_whitespace() {
            j += 1;
        }
        if j >= chars.len() || chars[j] != '{' {
            i += 1;
            continue;
        }

        let mut depth = 0usize;
        let mut in_quotes = false;
        let mut end = None;
        for (k, ch) in chars.iter().enumerate().skip(j) {
            match ch {
                '"' => in_quotes = !in_quotes,
                '{' if !in_quotes => depth += 1,
                '}' if !in_quotes => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(k);
                        break;
                    }
                }
                _ => {}
            }
        }

        match end {
            Some(end) => {
                entries.push(chars[i..=end].iter().collect::<String>());
                i = end + 1;
            }
            None => {
                entries.push(chars[i..].iter().collect::<String>());
                break;
            }
        }
    }

    entries
}

fn parse_entry(segment: &str) -> Result<NewReference, String> {
    let trimmed = segment.trim();
    let after_at = trimmed.strip_prefix('@').ok_or("entry does not start with '@'")?;
    let brace_pos = after_at.find('{').ok_or("missing opening '{' after entry type")?;
    let entry_type = after_at[..brace_pos].trim().to_ascii_lowercase();

    if matches!(entry_type.as_str(), "comment" | "preamble" | "string") {
        return Err(format!("ignored block type @{entry_type}"));
    }
    if !trimmed.ends_with('}') {
        return Err("unbalanced braces: entry never closed".to_string());
    }

    let body = &after_at[brace_pos + 1..after_at.len() - 1];
    let (key, fields_raw) = body.split_once(',').ok_or("missing citation key or field list")?;
    if key.trim().is_empty() {
        return Err("empty citation key".to_string());
    }

    let fields = parse_fields(fields_raw)?;
    let title = fields.get("title").cloned().filter(|v| !v.is_empty());
    let authors = fields
        .get("author")
        .map(|v| AUTHOR_SPLIT_PATTERN.split(v).map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();
    let year = fields.get("year").and_then(|v| v.trim().parse::<i64>().ok());
    let doi = fields.get("doi").and_then(|v| DOI_PATTERN.find(v).map(|m| m.as_str().to_string()));

    if title.is_none() && doi.is_none() {
        return Err("entry has neither a title nor a doi".to_string());
    }

    Ok(NewReference {
        title,
        authors,
        year,
        doi,
        entry_type: Some(entry_type),
        source: fields.get("journal").or_else(|| fields.get("booktitle")).cloned(),
        volume: fields.get("volume").cloned(),
        issue: fields.get("number").cloned(),
        pages: fields.get("pages").cloned(),
        publisher: fields.get("publisher").cloned(),
        url: fields.get("url").cloned(),
        isbn: fields.get("isbn").cloned(),
        issn: fields.get("issn").cloned(),
        abstract_text: fields.get("abstract").cloned(),
        language: fields.get("language").cloned(),
        ..Default::default()
    })
}

/// Splits a field list on top-level commas (not inside `{}` or `"..."`),
/// then each `name = value` pair on its first `=`.
fn parse_fields(input: &str) -> Result<HashMap<String, String>, String> {
    let mut pairs = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_quotes = false;

    for ch in input.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '{' if !in_quotes => {
                depth += 1;
                current.push(ch);
            }
            '}' if !in_quotes => {
                if depth == 0 {
                    return Err("closing brace without matching opening brace".to_string());
                }
                depth -= 1;
                current.push(ch);
            }
            ',' if !in_quotes && depth == 0 => {
                let segment = current.trim();
                if !segment.is_empty() {
                    pairs.push(segment.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if depth != 0 {
        return Err("unbalanced braces in field values".to_string());
    }
    let tail = current.trim();
    if !tail.is_empty() {
        pairs.push(tail.to_string());
    }

    let mut fields = HashMap::new();
    for pair in pairs {
        let (name, value) = pair.split_once('=').ok_or_else(|| format!("missing '=' in field `{pair}`"))?;
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err("empty field name".to_string());
        }
        fields.entry(name).or_insert_with(|| strip_value(value.trim()));
    }
    Ok(fields)
}

fn strip_value(value: &str) -> String {
    let trimmed = value.trim().trim_end_matches(',').trim();
    if trimmed.len() >= 2 && trimmed.starts_with('{') && trimmed.ends_with('}') {
        return trimmed[1..trimmed.len() - 1].trim().to_string();
    }
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        return trimmed[1..trimmed.len() - 1].replace("\\\"", "\"").trim().to_string();
    }
    trimmed.to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
@article{coase1937,
  title = {The Nature of the Firm},
  author = {Coase, Ronald H.},
  year = {1937},
  journal = {Economica},
  doi = {10.1111/j.1468-0335.1937.tb00002.x}
}

@comment{this whole block should be ignored}

@misc{broken,
  title =
}
"#;

    #[test]
    fn parses_one_entry_and_skips_the_rest() {
        let result = parse_bibtex(SAMPLE, "bibtex-import", Some(7));
        assert_eq!(result.references.len(), 1);
        let reference = &result.references[0];
        assert_eq!(reference.title.as_deref(), Some("The Nature of the Firm"));
        assert_eq!(reference.authors, vec!["Coase, Ronald H.".to_string()]);
        assert_eq!(reference.year, Some(1937));
        assert_eq!(reference.doi.as_deref(), Some("10.1111/j.1468-0335.1937.tb00002.x"));
        assert_eq!(reference.corpus_id, Some(7));
        assert!(!result.skipped.is_empty());
    }

    #[test]
    fn entry_without_title_or_doi_is_skipped() {
        let result = parse_bibtex("@article{x, author = {Nobody}}", "bibtex-import", None);
        assert!(result.references.is_empty());
        assert_eq!(result.skipped.len(), 1);
    }
}
