//! Monetary-amount parsing shared by the extractors.
//!
//! Statements print amounts as `$1,234.56`, `- $14.05`, `(50.00)`, or a
//! bare `50.93`; model responses additionally hand back JSON numbers or
//! numeric strings.

/// Parse a statement amount string. Handles `$`, thousands separators,
/// leading `-`, and the parenthesis-negative convention.
///
/// Returns `None` for non-numeric input.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let parenthesized = s.starts_with('(') && s.ends_with(')');
    let s = s.trim_start_matches('(').trim_end_matches(')');
    let negative = parenthesized || s.trim_start().starts_with('-');

    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let magnitude: f64 = cleaned.parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}
