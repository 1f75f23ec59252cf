//! String similarity for item codes.

use std::collections::HashMap;

/// Sørensen-Dice coefficient over character bigrams, in `[0, 1]`.
///
/// Strings too short to have bigrams score 1.0 if equal and 0.0 otherwise.
pub fn dice_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let a_bigrams = bigrams(a);
    let b_bigrams = bigrams(b);
    if a_bigrams.is_empty() || b_bigrams.is_empty() {
        return 0.0;
    }

    let mut counts = HashMap::<(char, char), usize>::new();
    for bigram in &a_bigrams {
        *counts.entry(*bigram).or_default() += 1;
    }
    let mut shared = 0;
    for bigram in &b_bigrams {
        if let Some(count) = counts.get_mut(bigram)
            && *count > 0
        {
            *count -= 1;
            shared += 1;
        }
    }
    (2 * shared) as f64 / (a_bigrams.len() + b_bigrams.len()) as f64
}

fn bigrams(s: &str) -> Vec<(char, char)> {
    let chars = s.chars().collect::<Vec<_>>();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}
