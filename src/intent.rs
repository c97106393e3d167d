//! Voice command intent resolution.
//!
//! Inspects accepted user messages for navigation commands before they reach
//! the reply backend, so "go to physics" jumps straight to the physics page
//! instead of spending a network round trip. Matching is pure and
//! synchronous.
//!
//! # Command shape
//!
//! | Phrase pattern | Resolution |
//! |----------------|------------|
//! | "go to {place}" / "open {place}" / "take me to {place}" | `Navigate` if `{place}` fuzzy-matches the catalog |
//! | "cholo {place}" / "kholo {place}" / "চলো {place}" / "খোলো {place}" | same, Bengali |
//! | anything else | `Answer` |
//!
//! `{place}` matching is tolerant of recognizer misspellings: the best
//! alias across the whole catalog wins, scored by Levenshtein distance
//! normalized by the longer string, rejected above [`MATCH_CUTOFF`].

/// What the engine should do with an accepted user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Jump to a destination in the embedding app; the router collaborator
    /// performs the transition.
    Navigate {
        /// Route of the matched catalog entry (e.g. "/physics").
        target: String,
    },
    /// Treat the message as a question for the reply backend.
    Answer,
}

/// One navigable destination and the spoken names that reach it.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// Route handed to the embedding router.
    pub route: String,
    /// Normalized spoken names, including transliterations.
    pub aliases: Vec<String>,
}

impl CatalogEntry {
    /// Build an entry; aliases are stored normalized.
    pub fn new(route: &str, aliases: &[&str]) -> Self {
        Self {
            route: route.to_owned(),
            aliases: aliases.iter().map(|a| normalize(a)).collect(),
        }
    }
}

/// Normalized-distance scores above this never navigate.
const MATCH_CUTOFF: f32 = 0.5;

/// Command phrases that introduce a navigation target, longest first so
/// "take me to" wins over a shorter overlapping phrase.
const COMMAND_PHRASES: &[&str] = &[
    "take me to",
    "go to",
    "show me",
    "open",
    "dekhao",
    "cholo",
    "kholo",
    "jao",
    "দেখাও",
    "চলো",
    "খোলো",
    "খোল",
    "যাও",
];

/// Resolves accepted user messages against a navigation catalog.
#[derive(Debug, Clone)]
pub struct IntentResolver {
    catalog: Vec<CatalogEntry>,
}

impl Default for IntentResolver {
    fn default() -> Self {
        Self::new(default_catalog())
    }
}

impl IntentResolver {
    /// Resolver over a caller-supplied catalog.
    pub fn new(catalog: Vec<CatalogEntry>) -> Self {
        Self { catalog }
    }

    /// Classify one user message. Never fails; anything that is not a
    /// confident navigation command is an `Answer`.
    pub fn resolve(&self, text: &str) -> Intent {
        let normalized = normalize(text);
        let Some(place) = strip_command_phrase(&normalized) else {
            return Intent::Answer;
        };
        if place.is_empty() {
            return Intent::Answer;
        }

        let mut best: Option<(f32, &str)> = None;
        for entry in &self.catalog {
            for alias in &entry.aliases {
                let score = alias_score(place, alias);
                if best.is_none_or(|(s, _)| score < s) {
                    best = Some((score, entry.route.as_str()));
                }
            }
        }

        match best {
            Some((score, route)) if score <= MATCH_CUTOFF => Intent::Navigate {
                target: route.to_owned(),
            },
            _ => Intent::Answer,
        }
    }
}

/// Default subject catalog shipped with the crate.
pub fn default_catalog() -> Vec<CatalogEntry> {
    vec![
        CatalogEntry::new(
            "/physics",
            &["physics", "পদার্থবিজ্ঞান", "podartho biggan", "fiziks"],
        ),
        CatalogEntry::new("/chemistry", &["chemistry", "রসায়ন", "roshayon", "kemistri"]),
        CatalogEntry::new(
            "/math",
            &["math", "maths", "mathematics", "গণিত", "gonit", "অঙ্ক", "onko"],
        ),
        CatalogEntry::new(
            "/biology",
            &["biology", "জীববিজ্ঞান", "jib biggan", "bayoloji"],
        ),
        CatalogEntry::new("/", &["home", "হোম", "বাড়ি", "bari", "shuru"]),
    ]
}

/// Lowercase, drop punctuation, collapse whitespace. Bengali letters are
/// alphanumeric to `char`, so script text passes through intact while the
/// danda and other stops fall away.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// If the text opens with a command phrase, return the remainder naming the
/// target. Both language sets are always active; speakers mix freely.
fn strip_command_phrase(normalized: &str) -> Option<&str> {
    for phrase in COMMAND_PHRASES {
        if let Some(rest) = normalized.strip_prefix(phrase) {
            if rest.is_empty() {
                return Some("");
            }
            if let Some(target) = rest.strip_prefix(' ') {
                return Some(target.trim());
            }
        }
    }
    None
}

/// Levenshtein distance normalized by the longer string, in `[0, 1]`.
fn alias_score(candidate: &str, alias: &str) -> f32 {
    let max_len = candidate.chars().count().max(alias.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    // Distances past half the length cannot pass the cutoff, so the DP may
    // bail out early.
    let bound = max_len / 2;
    let dist = bounded_levenshtein(candidate, alias, bound);
    dist as f32 / max_len as f32
}

/// Two-row Levenshtein over chars with an early exit once every cell in a
/// row exceeds `max_distance` (returns `max_distance + 1` in that case).
fn bounded_levenshtein(a: &str, b: &str, max_distance: usize) -> usize {
    if a == b {
        return 0;
    }
    let a_len = a.chars().count();
    let b_len = b.chars().count();
    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }
    if a_len.abs_diff(b_len) > max_distance {
        return max_distance + 1;
    }

    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0usize; b_chars.len() + 1];
    for (i, a_ch) in a.chars().enumerate() {
        curr[0] = i + 1;
        let mut row_min = curr[0];
        for (j, b_ch) in b_chars.iter().enumerate() {
            let substitution = prev[j] + usize::from(a_ch != *b_ch);
            let insertion = curr[j] + 1;
            let deletion = prev[j + 1] + 1;
            let distance = substitution.min(insertion).min(deletion);
            curr[j + 1] = distance;
            row_min = row_min.min(distance);
        }
        if row_min > max_distance {
            return max_distance + 1;
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}
