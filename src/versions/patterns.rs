//! Filename version markers.
//!
//! A fixed, ordered pattern list: the first match wins, so numeric
//! versions beat dates and dates beat status words when a name carries
//! several markers.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    VersionNumber,
    RevisionNumber,
    CopyNumber,
    Date,
    DateCompact,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMarker {
    pub kind: MarkerKind,
    /// Captured value: the number, date, or status word.
    pub value: String,
    /// The full matched marker text, e.g. `_v2` or ` (3)`.
    pub marker: String,
}

fn patterns() -> &'static [(Regex, MarkerKind)] {
    static PATTERNS: OnceLock<Vec<(Regex, MarkerKind)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (
                Regex::new(r"(?i)_v(\d+)").unwrap(),
                MarkerKind::VersionNumber,
            ),
            (
                Regex::new(r"(?i)_rev(\d+)").unwrap(),
                MarkerKind::RevisionNumber,
            ),
            (
                Regex::new(r"(?i)_version(\d+)").unwrap(),
                MarkerKind::VersionNumber,
            ),
            (Regex::new(r"\s*\((\d+)\)").unwrap(), MarkerKind::CopyNumber),
            (
                Regex::new(r"_(\d{4}-\d{2}-\d{2})").unwrap(),
                MarkerKind::Date,
            ),
            (Regex::new(r"_(\d{8})").unwrap(), MarkerKind::DateCompact),
            (
                Regex::new(r"(?i)_(draft|final|approved|review|wip)").unwrap(),
                MarkerKind::Status,
            ),
        ]
    })
}

/// Rank used when ordering by status marker; lower is older.
pub fn status_rank(status: &str) -> i64 {
    match status.to_lowercase().as_str() {
        "draft" => 1,
        "wip" => 2,
        "review" => 3,
        "approved" => 4,
        "final" => 5,
        _ => 99,
    }
}

/// Extract a version marker from a file stem (name without extension).
/// Returns the stem with the marker removed plus the marker itself.
pub fn extract_marker(stem: &str) -> (String, Option<VersionMarker>) {
    for (pattern, kind) in patterns() {
        if let Some(captures) = pattern.captures(stem) {
            let whole = captures.get(0).unwrap();
            let value = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            let base = format!("{}{}", &stem[..whole.start()], &stem[whole.end()..]);
            let base = base.trim_matches(['_', '-', ' ']).to_string();
            return (
                base,
                Some(VersionMarker {
                    kind: *kind,
                    value: value.to_string(),
                    marker: whole.as_str().to_string(),
                }),
            );
        }
    }
    (stem.to_string(), None)
}

/// Strip version markers and parenthetical suffixes to get a base name
/// for a similarity group.
pub fn base_name(stem: &str) -> String {
    let (base, marker) = extract_marker(stem);
    if marker.is_some() && base.len() >= 3 {
        return base;
    }
    let no_parens = Regex::new(r"[_\-\s]*\([^)]*\)$")
        .unwrap()
        .replace(stem, "")
        .to_string();
    no_parens.trim_matches(['_', '-', ' ']).to_string()
}

/// Longest common prefix of several stems, cleaned of trailing
/// punctuation. Used to name similarity-detected chains.
pub fn common_base_name(stems: &[&str]) -> String {
    let Some(first) = stems.first() else {
        return "document".to_string();
    };
    if stems.len() == 1 {
        return first.to_string();
    }

    let mut common = first.to_string();
    for stem in &stems[1..] {
        let mut next = String::new();
        for (a, b) in common.chars().zip(stem.chars()) {
            if a.eq_ignore_ascii_case(&b) {
                next.push(a);
            } else {
                break;
            }
        }
        common = next;
    }

    let cleaned = common.trim_matches(['_', '-', ' ', '(', ')']).to_string();
    if cleaned.len() >= 3 {
        cleaned
    } else {
        let fallback = base_name(first);
        if fallback.is_empty() {
            "document".to_string()
        } else {
            fallback
        }
    }
}
