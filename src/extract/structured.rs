//! Items in digitally produced declarations.
//!
//! These have one block per item:
//!
//! ```text
//! 1 Goods item
//! Code: 8479.90.3000 Parts of machines
//! Country of origin: DE
//! - 3.150,0000
//! - PCS
//! ```

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::PipelineError;

use super::{
    ExtractedLineItem, ExtractionStrategy, StrategyOutput,
    numbers::{normalize_tariff_code, parse_quantity},
};

/// `<n> Goods item` or `<n> Item of goods`.
static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(\d{1,4})\s+(?:goods\s+item|item\s+of\s+goods)\b")
        .expect("failed to compile regex")
});

static CODE_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bcode\s*:\s*").expect("failed to compile regex")
});

/// A tariff code directly after the `Code:` label, in any common layout.
static CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\[|(]*\s*(\d{4}(?:[. ]\d{2}[. ]\d{4}|\.?\d{6}))\b[\]|)]*")
        .expect("failed to compile regex")
});

static DESCRIPTION_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^description\s*:?\s*").expect("failed to compile regex")
});

/// Labels that end a description.
static END_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:-|country\s+of\s+origin|gross\s+mass|net\s+mass|quantity|supplementary\s+units|packages|procedure|preference|value)",
    )
    .expect("failed to compile regex")
});

static DASH_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-\s*(\d[\d.,]*(?:\s\d[\d.,]*)*)$").expect("failed to compile regex")
});

static DASH_UNIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-\s*([A-Za-z][A-Za-z0-9]{0,4})$").expect("failed to compile regex")
});

static QUANTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bquantity\s*:?\s*(\d[\d.,]*)(?:[ \t]+([A-Za-z][A-Za-z0-9]{0,4})\b)?")
        .expect("failed to compile regex")
});

/// Labeled item blocks.
pub struct StructuredStrategy;

impl ExtractionStrategy for StructuredStrategy {
    fn name(&self) -> &'static str {
        "structured"
    }

    fn extract(&self, text: &str) -> StrategyOutput {
        let lines = text.lines().map(str::trim).collect::<Vec<_>>();
        let markers = lines
            .iter()
            .enumerate()
            .filter_map(|(idx, line)| {
                let caps = MARKER_RE.captures(line)?;
                let serial = caps[1].parse::<u32>().ok().filter(|&serial| serial > 0)?;
                Some((idx, serial))
            })
            .collect::<Vec<_>>();

        let mut output = StrategyOutput::default();
        for (pos, &(start, serial)) in markers.iter().enumerate() {
            let end = markers
                .get(pos + 1)
                .map(|&(next, _)| next)
                .unwrap_or(lines.len());
            match parse_block(serial, &lines[start + 1..end]) {
                Ok(item) => output.items.push(item),
                Err(err) => output.failures.push(err),
            }
        }
        output
    }
}

fn parse_block(serial: u32, block: &[&str]) -> Result<ExtractedLineItem, PipelineError> {
    let failure = |message: &str| PipelineError::Extraction {
        serial,
        message: message.to_owned(),
    };

    let (code_line, after_label) = block
        .iter()
        .enumerate()
        .find_map(|(idx, line)| {
            let label = CODE_LABEL_RE.find(line)?;
            Some((idx, &line[label.end()..]))
        })
        .ok_or_else(|| failure("no `Code:` label"))?;
    let code_match = CODE_RE
        .captures(after_label)
        .ok_or_else(|| failure("malformed tariff code"))?;
    let tariff_code =
        normalize_tariff_code(&code_match[1]).ok_or_else(|| failure("malformed tariff code"))?;
    let after_code = &after_label[code_match.get(0).map_or(0, |m| m.end())..];

    let description = description_after_code(after_code, &block[code_line + 1..])
        .or_else(|| labeled_description(block))
        .unwrap_or_default();

    let (quantity, unit) = dashed_quantity(block)
        .or_else(|| labeled_quantity(block))
        .ok_or_else(|| failure("no quantity"))?;

    Ok(ExtractedLineItem {
        serial,
        tariff_code,
        description,
        quantity,
        unit,
    })
}

/// Text from the code up to the next label.
fn description_after_code(rest_of_line: &str, following: &[&str]) -> Option<String> {
    let mut parts = vec![];
    for piece in std::iter::once(rest_of_line.trim()).chain(following.iter().copied()) {
        if END_LABEL_RE.is_match(piece) {
            break;
        }
        let piece = DESCRIPTION_LABEL_RE.replace(piece, "");
        if !piece.is_empty() {
            parts.push(piece.into_owned());
        }
    }
    let description = parts.join(" ");
    (!description.is_empty()).then_some(description)
}

/// A standalone `Description:` line anywhere in the block.
fn labeled_description(block: &[&str]) -> Option<String> {
    block.iter().find_map(|line| {
        let label = DESCRIPTION_LABEL_RE.find(line)?;
        let description = line[label.end()..].trim();
        (!description.is_empty()).then(|| description.to_owned())
    })
}

/// `- <number>` directly followed by `- <unit>`.
fn dashed_quantity(block: &[&str]) -> Option<(f64, String)> {
    let lines = block
        .iter()
        .copied()
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>();
    lines.windows(2).find_map(|pair| {
        let number = DASH_NUMBER_RE.captures(pair[0])?;
        let unit = DASH_UNIT_RE.captures(pair[1])?;
        let quantity = parse_quantity(&number[1])?;
        Some((quantity, unit[1].to_uppercase()))
    })
}

/// `Quantity: <number> [<unit>]`.
fn labeled_quantity(block: &[&str]) -> Option<(f64, String)> {
    block.iter().find_map(|line| {
        let caps = QUANTITY_RE.captures(line)?;
        let quantity = parse_quantity(&caps[1])?;
        let unit = caps
            .get(2)
            .map(|unit| unit.as_str().to_uppercase())
            .unwrap_or_default();
        Some((quantity, unit))
    })
}
