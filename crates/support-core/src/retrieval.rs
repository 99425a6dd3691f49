//! Keyword and category retrieval over the knowledge snapshot.
//!
//! Scoring per entry, against the normalised query tokens:
//!
//! | Match | Points |
//! |---|---|
//! | keyword equals a token (or a run of tokens for multi-word keywords) | 2 |
//! | otherwise: a token contains the keyword or is contained in it, both 3+ chars | 1 |
//! | category words appear as a token run | 1 |
//!
//! Entries scoring zero are dropped. Ties are broken by most recent update,
//! then technology name, then id, so the result is fully deterministic.

use std::cmp::Ordering;

use support_models::KnowledgeEntry;

/// Default number of entries attached to a question.
pub const DEFAULT_MAX_SNIPPETS: usize = 3;

/// Shortest token or keyword that may take part in a partial match.
const MIN_PARTIAL_LEN: usize = 3;

/// Lowercases `text` and splits it on every non-alphanumeric character.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_run(tokens: &[String], run: &[String]) -> bool {
    !run.is_empty() && tokens.windows(run.len()).any(|w| w == run)
}

/// Relevance of `entry` for an already tokenised query.
pub fn score(tokens: &[String], entry: &KnowledgeEntry) -> u32 {
    let mut total = 0;

    for keyword in &entry.keywords {
        let parts = tokenize(keyword);
        if parts.is_empty() {
            continue;
        }

        if contains_run(tokens, &parts) {
            total += 2;
            continue;
        }

        let joined = parts.join(" ");
        if joined.chars().count() < MIN_PARTIAL_LEN {
            continue;
        }
        let partial = tokens.iter().any(|t| {
            t.chars().count() >= MIN_PARTIAL_LEN
                && (t.contains(joined.as_str()) || joined.contains(t.as_str()))
        });
        if partial {
            total += 1;
        }
    }

    if contains_run(tokens, &tokenize(&entry.category.words())) {
        total += 1;
    }

    total
}

/// Picks at most `max` entries relevant to `query`, best first.
///
/// Returns an empty vector when nothing matches.
pub fn select<'a>(query: &str, entries: &'a [KnowledgeEntry], max: usize) -> Vec<&'a KnowledgeEntry> {
    let tokens = tokenize(query);
    if tokens.is_empty() || max == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(u32, &KnowledgeEntry)> = entries
        .iter()
        .map(|e| (score(&tokens, e), e))
        .filter(|(s, _)| *s > 0)
        .collect();

    scored.sort_by(|(sa, a), (sb, b)| rank(*sa, a, *sb, b));
    scored.truncate(max);
    scored.into_iter().map(|(_, e)| e).collect()
}

fn rank(sa: u32, a: &KnowledgeEntry, sb: u32, b: &KnowledgeEntry) -> Ordering {
    sb.cmp(&sa)
        .then_with(|| b.updated_at.cmp(&a.updated_at))
        .then_with(|| a.technology_name.cmp(&b.technology_name))
        .then_with(|| a.id.cmp(&b.id))
}
