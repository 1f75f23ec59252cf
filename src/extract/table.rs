//! Items in OCRed declaration tables.
//!
//! After OCR, the item table of a scanned form usually looks something like
//! this, with stray rule lines turned into brackets and pipes:
//!
//! ```text
//! | 1 [8479.903000 | Parts of machines 3.150,0000 PCS
//! Parts of machines for the food industry
//! Gross mass 120,5
//! ```
//!
//! Every item starts on a line with an item number followed by a tariff code.

use std::{ops::Range, sync::LazyLock};

use regex::Regex;

use crate::errors::PipelineError;

use super::{
    ExtractedLineItem, ExtractionStrategy, StrategyOutput, is_noise_char,
    numbers::{normalize_tariff_code, parse_quantity},
};

/// Maximum lines in one item block, including the item line.
const MAX_BLOCK_LINES: usize = 10;

/// Unit codes we recognize after a quantity.
const KNOWN_UNITS: &[&str] = &[
    "PCS", "PC", "KOM", "KG", "KGM", "GRM", "TNE", "NAR", "PAR", "PR", "SET", "LTR", "L",
    "MTR", "M2", "M3", "MTK", "MTQ", "C62", "H87", "NIU", "PK", "CT", "BOX", "ROL",
];

/// An item line: noise, item number, noise, tariff code.
static ITEM_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[\s\[\]|(){}!:]*(\d{1,4})[\s\[\]|(){}!:]+(\d{4}\.\d{2,3}\.?\d{3,4}|\d{10})\b(.*)$",
    )
    .expect("failed to compile regex")
});

/// `<number> <unit>`, with the number starting a token.
static QUANTITY_UNIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    let mut units = KNOWN_UNITS.to_vec();
    // Longest first, so that `KGM` wins over `KG`.
    units.sort_by_key(|unit| std::cmp::Reverse(unit.len()));
    Regex::new(&format!(
        r"(?i)(?:^|[^\w.,])(\d[\d.,]*)[ \t]*({})\b",
        units.join("|")
    ))
    .expect("failed to compile regex")
});

/// Lines that describe packaging, taxes and the like, rather than goods.
static METADATA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:packag|pkg|tax|vat|duty|duties|rate|gross|net\b|net\s+mass|origin|country|preference|procedure|supplementary|statistical|value)",
    )
    .expect("failed to compile regex")
});

/// Noisy item table rows.
pub struct TableStrategy;

impl ExtractionStrategy for TableStrategy {
    fn name(&self) -> &'static str {
        "table"
    }

    fn extract(&self, text: &str) -> StrategyOutput {
        let lines = text.lines().collect::<Vec<_>>();
        let starts = lines
            .iter()
            .enumerate()
            .filter_map(|(idx, line)| {
                let caps = ITEM_LINE_RE.captures(line)?;
                // Serials start at 1.
                let serial = caps[1].parse::<u32>().ok().filter(|&serial| serial > 0)?;
                let rest_of_line = caps.get(3).map_or("", |m| m.as_str());
                let item_line = ItemLine {
                    serial,
                    tariff: caps.get(2)?.as_str(),
                    rest_of_line,
                };
                Some((idx, item_line))
            })
            .collect::<Vec<_>>();

        let mut output = StrategyOutput::default();
        for (pos, (start, item_line)) in starts.iter().enumerate() {
            let next = starts.get(pos + 1).map_or(lines.len(), |(next, _)| *next);
            let end = next.min(start + MAX_BLOCK_LINES);
            match parse_block(item_line, &lines[start + 1..end]) {
                Ok(item) => output.items.push(item),
                Err(err) => output.failures.push(err),
            }
        }
        output
    }
}

/// The parts of an item line.
struct ItemLine<'a> {
    serial: u32,
    tariff: &'a str,
    /// Everything after the tariff code.
    rest_of_line: &'a str,
}

fn parse_block(
    item_line: &ItemLine<'_>,
    following: &[&str],
) -> Result<ExtractedLineItem, PipelineError> {
    let serial = item_line.serial;
    let failure = |message: String| PipelineError::Extraction { serial, message };

    let tariff_code = normalize_tariff_code(item_line.tariff)
        .ok_or_else(|| failure(format!("malformed tariff code {:?}", item_line.tariff)))?;

    // Quantity and unit come after the tariff code, possibly on later lines.
    let search_text = std::iter::once(item_line.rest_of_line)
        .chain(following.iter().copied())
        .collect::<Vec<_>>()
        .join("\n");
    let (quantity, unit, span) = QUANTITY_UNIT_RE
        .captures_iter(&search_text)
        .find_map(|caps| {
            let number = caps.get(1)?;
            let unit = caps.get(2)?;
            let quantity = parse_quantity(number.as_str())?;
            Some((quantity, unit.as_str().to_uppercase(), number.start()..unit.end()))
        })
        .ok_or_else(|| failure("no quantity with a known unit".to_owned()))?;

    let description = following
        .iter()
        .map(|line| strip_noise(line))
        .filter(|line| !line.is_empty() && !METADATA_RE.is_match(line))
        .find(|line| line.chars().any(char::is_alphabetic))
        .map(str::to_owned)
        .unwrap_or_else(|| description_from_item_line(item_line.rest_of_line, span));

    Ok(ExtractedLineItem {
        serial,
        tariff_code,
        description,
        quantity,
        unit,
    })
}

fn strip_noise(line: &str) -> &str {
    line.trim_matches(is_noise_char)
}

/// What's left of the item line once the quantity is removed. `quantity`
/// indexes into the item line only if the quantity was found there.
fn description_from_item_line(rest_of_line: &str, quantity: Range<usize>) -> String {
    let without_quantity = if quantity.end <= rest_of_line.len() {
        format!(
            "{} {}",
            &rest_of_line[..quantity.start],
            &rest_of_line[quantity.end..]
        )
    } else {
        rest_of_line.to_owned()
    };
    without_quantity
        .split(is_noise_char)
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_all_tariff_layouts() {
        let text = "\
| 1 [8479.903000 | widget 1.0000 PCS
2 8479.90.3000 widget 2 PCS
{3} 8479903000 widget 3 KG
";
        let output = TableStrategy.extract(text);
        assert!(output.failures.is_empty(), "{:?}", output.failures);
        let codes = output
            .items
            .iter()
            .map(|item| (item.serial, item.tariff_code.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            codes,
            vec![(1, "8479.903000"), (2, "8479.903000"), (3, "8479.903000")]
        );
    }

    #[test]
    fn description_skips_metadata_lines() {
        let text = "\
| 1 | 8479.903000 | 3.150,0000 PCS
| VAT 18%
Gross mass 120,5
| Parts of machines for the food industry |
";
        let output = TableStrategy.extract(text);
        assert_eq!(output.items.len(), 1);
        let item = &output.items[0];
        assert_eq!(item.description, "Parts of machines for the food industry");
        assert_eq!(item.quantity, 3150.0);
        assert_eq!(item.unit, "PCS");
    }

    #[test]
    fn description_falls_back_to_item_line() {
        let output = TableStrategy.extract("7 7318158900 | Steel bolts | 470,0000 kgm");
        assert_eq!(output.items.len(), 1);
        let item = &output.items[0];
        assert_eq!(item.description, "Steel bolts");
        assert_eq!(item.quantity, 470.0);
        assert_eq!(item.unit, "KGM");
    }

    #[test]
    fn quantity_may_follow_on_later_lines() {
        let text = "\
4 8479.903000 Parts
Parts of machines
12 SET
";
        let output = TableStrategy.extract(text);
        assert_eq!(output.items[0].quantity, 12.0);
        assert_eq!(output.items[0].unit, "SET");
    }

    #[test]
    fn serial_zero_is_not_an_item() {
        let text = "\
0 8479.903000 widget 1 PCS
| 00 | 7318158900 | bolts 4 KG
2 8479.903000 widget 2 PCS
";
        let output = TableStrategy.extract(text);
        assert!(output.failures.is_empty(), "{:?}", output.failures);
        assert_eq!(output.items.len(), 1);
        assert_eq!(output.items[0].serial, 2);
        assert_eq!(output.items[0].quantity, 2.0);
    }

    #[test]
    fn blocks_are_capped() {
        let mut text = "5 8479.903000 Parts\n".to_owned();
        for _ in 0..MAX_BLOCK_LINES {
            text.push_str("filler\n");
        }
        text.push_str("9 PCS\n");
        let output = TableStrategy.extract(&text);
        assert!(output.items.is_empty());
        assert_eq!(
            output.failures[0].to_string(),
            "item 5: no quantity with a known unit"
        );
    }
}
