//! Fuzzy matching of suggestions against catalog search results

use crate::types::{CatalogItem, Suggestion};

/// Minimum Jaro-Winkler similarity for titles and authors
pub const MATCH_THRESHOLD: f64 = 0.85;

/// Lowercase, drop bracketed qualifiers and featured-artist credits
///
/// "Song (Remastered 2011) [Live] feat. Someone" becomes "song".
pub fn normalize(text: &str) -> String {
    let lower = text.to_lowercase();

    let mut stripped = String::with_capacity(lower.len());
    let mut depth = 0usize;
    for c in lower.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => stripped.push(c),
            _ => {}
        }
    }

    let cut = [" feat. ", " feat ", " ft. ", " featuring "]
        .iter()
        .filter_map(|marker| format!("{} ", stripped).find(marker))
        .min();
    if let Some(at) = cut {
        stripped.truncate(at);
    }

    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Free-text query used to look a suggestion up in the catalog
pub fn search_query(suggestion: &Suggestion) -> String {
    let author = suggestion.author.split(',').next().unwrap_or_default();
    format!("{} {}", normalize(author), normalize(&suggestion.title))
        .trim()
        .to_string()
}

pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::jaro_winkler(&normalize(a), &normalize(b))
}

fn author_matches(wanted: &str, authors: &[String]) -> bool {
    let wanted = normalize(wanted.split(',').next().unwrap_or_default());
    if wanted.is_empty() {
        return false;
    }
    authors.iter().map(|a| normalize(a)).any(|candidate| {
        !candidate.is_empty()
            && (candidate.contains(&wanted)
                || wanted.contains(&candidate)
                || strsim::jaro_winkler(&wanted, &candidate) >= MATCH_THRESHOLD)
    })
}

/// Best search result for `suggestion`, if any is close enough
///
/// The result must credit a similar author; among those, the highest title
/// similarity at or above [`MATCH_THRESHOLD`] wins.
pub fn best_match<'a>(suggestion: &Suggestion, results: &'a [CatalogItem]) -> Option<&'a CatalogItem> {
    results
        .iter()
        .filter(|item| author_matches(&suggestion.author, &item.authors))
        .map(|item| (similarity(&suggestion.title, &item.title), item))
        .filter(|(score, _)| *score >= MATCH_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, item)| item)
}
