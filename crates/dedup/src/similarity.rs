use similar::{Algorithm, TextDiff};

/// Score for byte-identical fingerprints.
pub const EXACT_MATCH: f64 = 1.0;
/// Score when either side exceeds the comparable length.
pub const NOT_COMPARABLE: f64 = -1.0;

/// Similarity of two fingerprints in `[0, 1]`, or [`NOT_COMPARABLE`].
///
/// The ratio is `2 * M / (|a| + |b|)` over characters, where `M` counts the
/// characters a Myers diff keeps in common.
#[must_use]
pub fn similarity(a: &str, b: &str, max_comparable_length: usize) -> f64 {
    if a == b {
        return EXACT_MATCH;
    }
    if a.chars().count() > max_comparable_length || b.chars().count() > max_comparable_length {
        return NOT_COMPARABLE;
    }
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_chars(a, b);
    f64::from(diff.ratio())
}
