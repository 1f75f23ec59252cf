//! Tariff code and quantity normalization.

use std::sync::LazyLock;

use regex::Regex;

/// Groups of exactly three digits separated by dots, with a short leading
/// group: `1.234`, `12.345.678`.
static DOT_GROUPED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{1,3}(?:\.\d{3})+$").expect("failed to compile regex")
});

/// Normalize a tariff code to the canonical `NNNN.NNNNNN` form.
///
/// Accepts bare (`8479903000`), single-separator (`8479.903000`) and
/// two-separator (`8479.90.3000`) layouts, with stray brackets or pipes from
/// OCR. Returns `None` if the token does not contain exactly ten digits.
pub fn normalize_tariff_code(raw: &str) -> Option<String> {
    let stripped = raw
        .trim()
        .trim_matches(|c: char| matches!(c, '[' | ']' | '(' | ')' | '{' | '}' | '|'));
    if stripped.is_empty()
        || !stripped
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | ' '))
    {
        return None;
    }
    let digits = stripped
        .chars()
        .filter(char::is_ascii_digit)
        .collect::<String>();
    if digits.len() != 10 {
        return None;
    }
    Some(format!("{}.{}", &digits[..4], &digits[4..]))
}

/// Normalize an item code for comparison.
pub fn normalize_item_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Parse a quantity written in either decimal-comma or decimal-dot style.
///
/// The rules, in order:
///
/// 1. Both `.` and `,` present: dots group thousands, the comma is the decimal
///    point (`3.150,0000` is 3150).
/// 2. Only dots, with four or more digits after the last one: the dot is a
///    decimal point (`1.0000` is 1).
/// 3. Only dots, every group after the first exactly three digits long: dots
///    group thousands (`1.234` is 1234, not 1.234).
/// 4. Otherwise a single comma is the decimal point (`470,0000` is 470), and
///    anything else is parsed as a plain decimal number.
///
/// Returns `None` for negative or unparsable values.
pub fn parse_quantity(raw: &str) -> Option<f64> {
    let s = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>();
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return None;
    }

    let has_dot = s.contains('.');
    let has_comma = s.contains(',');
    let canonical = if has_dot && has_comma {
        s.replace('.', "").replace(',', ".")
    } else if has_dot {
        let after_last_dot = s.rsplit('.').next().unwrap_or_default();
        if after_last_dot.len() >= 4 && s.matches('.').count() == 1 {
            s
        } else if DOT_GROUPED_RE.is_match(&s) {
            s.replace('.', "")
        } else {
            s
        }
    } else if has_comma {
        if s.matches(',').count() == 1 {
            s.replace(',', ".")
        } else {
            return None;
        }
    } else {
        s
    };

    canonical
        .parse::<f64>()
        .ok()
        .filter(|q| q.is_finite() && *q >= 0.0)
}

/// Format a quantity for human-readable messages, without trailing zeros.
pub fn format_quantity(quantity: f64) -> String {
    if quantity.fract() == 0.0 && quantity.abs() < 1e15 {
        format!("{}", quantity as i64)
    } else {
        let s = format!("{:.4}", quantity);
        s.trim_end_matches('0').trim_end_matches('.').to_owned()
    }
}
