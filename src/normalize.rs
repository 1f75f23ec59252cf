//! Post-processing for OCR output.
//!
//! [`normalize_text`] is a deterministic, idempotent `&str -> String`
//! transform. It runs in a fixed order:
//!
//! 1. Line endings are unified.
//! 2. Known misrecognized domain phrases are repaired.
//! 3. Letters that look like digits are repaired, but only inside tokens that
//!    are already numeric. A global `O -> 0` replacement would turn `GOODS`
//!    into `G00DS` and break every label match downstream.
//! 4. Whitespace is collapsed.

use std::{borrow::Cow, sync::LazyLock};

use regex::{Captures, Regex};

use crate::extract::is_noise_char;

/// Ordered table of `(pattern, replacement)` repairs for phrases that OCR
/// routinely gets wrong on declaration forms.
static PHRASE_CORRECTIONS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"(?i)\bS[I1l|]NGLE[ \t]+ADM[I1l|]N[I1l|]STRAT[I1l|]VE[ \t]+D[O0]CUMENT\b",
            "SINGLE ADMINISTRATIVE DOCUMENT",
        ),
        (r"(?i)\bG[O0]{2}DS[ \t]+[I1l|]TEM\b", "Goods item"),
        (r"(?i)\b[I1l|]TEM[ \t]+[O0]F[ \t]+G[O0]{2}DS\b", "Item of goods"),
        (r"(?i)\bTAR[I1l|]FF[ \t]+C[O0]DE\b", "Tariff code"),
        (r"(?i)\bC[O0]MM[O0]D[I1l|]TY[ \t]+C[O0]DE\b", "Commodity code"),
        (r"(?i)\bC[O0]DE[ \t]*[:;]", "Code:"),
        (r"(?i)\bDESCR[I1l|]PT[I1l|][O0]N\b", "Description"),
        (r"(?i)\bQUANT[I1l|]TY\b", "Quantity"),
        (
            r"(?i)\bC[O0]UNTRY[ \t]+[O0]F[ \t]+[O0]R[I1l|]G[I1l|]N\b",
            "Country of origin",
        ),
        (r"(?i)\bGR[O0]SS[ \t]+MASS\b", "Gross mass"),
        (
            r"(?i)\bSUPPLEMENTARY[ \t]+UN[I1l|]TS\b",
            "Supplementary units",
        ),
    ]
    .into_iter()
    .map(|(pattern, replacement)| {
        (
            Regex::new(pattern).expect("failed to compile phrase correction"),
            replacement,
        )
    })
    .collect()
});

/// Any run of non-whitespace characters.
static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\S+").expect("failed to compile regex"));

/// Two or more horizontal whitespace characters.
static SPACE_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]{2,}").expect("failed to compile regex"));

/// Four or more newlines.
static NEWLINE_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{4,}").expect("failed to compile regex"));

/// Normalize OCR text.
pub fn normalize_text(text: &str) -> String {
    let text = unify_line_endings(text);
    let text = correct_phrases(&text);
    let text = repair_numeric_tokens(&text);
    collapse_whitespace(&text)
}

fn unify_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace(['\r', '\x0C'], "\n")
}

/// Apply [`PHRASE_CORRECTIONS`] in order.
pub fn correct_phrases(text: &str) -> String {
    let mut text = text.to_owned();
    for (regex, replacement) in PHRASE_CORRECTIONS.iter() {
        if let Cow::Owned(replaced) = regex.replace_all(&text, *replacement) {
            text = replaced;
        }
    }
    text
}

/// Map a letter that OCR confuses with a digit to that digit.
fn confusable_digit(c: char) -> Option<char> {
    match c {
        'O' | 'o' => Some('0'),
        'l' | 'I' => Some('1'),
        _ => None,
    }
}

/// Does this token look like a number with a few misread digits?
fn is_numeric_looking(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit())
        && token
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.' || c == ',' || confusable_digit(c).is_some())
}

/// Replace digit look-alikes inside numeric-looking tokens only.
///
/// Table borders and brackets stuck to either end of a token (`[8479.9O3000`,
/// `3.l50,OOOO|`) are kept as-is, and only the part between them is checked
/// and repaired.
pub fn repair_numeric_tokens(text: &str) -> String {
    TOKEN_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let token = &caps[0];
            let rest = token.trim_start_matches(is_noise_char);
            let (prefix, rest) = token.split_at(token.len() - rest.len());
            let core = rest.trim_end_matches(is_noise_char);
            let suffix = &rest[core.len()..];
            if is_numeric_looking(core) {
                let repaired = core
                    .chars()
                    .map(|c| confusable_digit(c).unwrap_or(c))
                    .collect::<String>();
                format!("{prefix}{repaired}{suffix}")
            } else {
                token.to_owned()
            }
        })
        .into_owned()
}

/// Collapse spaces, trim lines, and limit blank-line runs.
pub fn collapse_whitespace(text: &str) -> String {
    let collapsed = SPACE_RUN_RE.replace_all(text, " ");
    let trimmed = collapsed
        .split('\n')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    NEWLINE_RUN_RE.replace_all(&trimmed, "\n\n\n").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repairs_known_phrases() {
        assert_eq!(
            normalize_text("S1NGLE ADM|NISTRATIVE D0CUMENT"),
            "SINGLE ADMINISTRATIVE DOCUMENT"
        );
        assert_eq!(normalize_text("3 G00DS  ltem"), "3 Goods item");
        assert_eq!(normalize_text("C0de; 8479.903000"), "Code: 8479.903000");
    }

    #[test]
    fn digit_repair_is_scoped_to_numeric_tokens() {
        assert_eq!(normalize_text("Qty 1O.5OO KG"), "Qty 10.500 KG");
        assert_eq!(normalize_text("3l5O,OOOO"), "3150,0000");
        // Words without digits must survive untouched.
        assert_eq!(normalize_text("GOODS ON HOLD Item"), "GOODS ON HOLD Item");
        assert_eq!(normalize_text("Oil lOO"), "Oil lOO");
    }

    #[test]
    fn digit_repair_looks_past_table_borders() {
        assert_eq!(normalize_text("[8479.9O3000"), "[8479.903000");
        assert_eq!(normalize_text("|3.l50,OOOO"), "|3.150,0000");
        assert_eq!(normalize_text("(1O.5OO)|"), "(10.500)|");
        assert_eq!(normalize_text("| 1 |1O| PCS"), "| 1 |10| PCS");
        // Borders alone, or around words, are left alone.
        assert_eq!(normalize_text("|| [GOODS] |"), "|| [GOODS] |");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(
            normalize_text("  a   b \t c  \n\n\n\n\n\n  d  "),
            "a b c\n\n\nd"
        );
        assert_eq!(normalize_text("a\r\nb\x0Cc"), "a\nb\nc");
    }

    #[test]
    fn is_idempotent() {
        let samples = [
            "",
            "   ",
            "| 1 [8479.903000 Parts of machines   3.l50,OOOO PCS\n\n\n\n\nG00DS ITEM",
            "S I N G L E\t\tADMlNISTRATIVE DOCUMENT\r\n\r\n\r\n\r\n\r\n1 Goods item",
            "Code;8479 90 3000\n - 1.OOOO\n - PCS \n\x0C\n\n\n2 goods |tem",
            "O1 lI IO 0l\t\t \n \n \n \n x",
        ];
        for sample in samples {
            let once = normalize_text(sample);
            let twice = normalize_text(&once);
            assert_eq!(once, twice, "not idempotent for {sample:?}");
        }
    }
}
