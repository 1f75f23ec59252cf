//! Finding line items in declaration text.
//!
//! Declarations come in two very different shapes. Digitally produced PDFs
//! have clean, labeled blocks ("1 Goods item", "Code: ..."), while scanned
//! forms come back from OCR as a noisy table. Each shape has its own
//! [`ExtractionStrategy`], and [`extract_items`] tries them in order until one
//! finds something.

use std::collections::BTreeSet;

use schemars::JsonSchema;

use crate::{context::DocContext, errors::PipelineError, prelude::*};

pub mod numbers;
mod structured;
mod table;

pub use self::{structured::StructuredStrategy, table::TableStrategy};

/// A line item found in a declaration.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ExtractedLineItem {
    /// Item number on the declaration. Reference rows are matched on this.
    pub serial: u32,
    /// Tariff code in `NNNN.NNNNNN` form.
    pub tariff_code: String,
    /// Goods description, possibly empty.
    pub description: String,
    /// Declared quantity.
    pub quantity: f64,
    /// Unit code such as `PCS` or `KG`. Empty if the document states none.
    pub unit: String,
}

/// What a single strategy found.
#[derive(Debug, Default)]
pub struct StrategyOutput {
    pub items: Vec<ExtractedLineItem>,
    /// Candidate blocks that were skipped.
    pub failures: Vec<PipelineError>,
}

/// One way of finding items in text.
pub trait ExtractionStrategy: Send + Sync {
    /// Short name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Find items in `text`. Must not fail as a whole; bad blocks go into
    /// [`StrategyOutput::failures`].
    fn extract(&self, text: &str) -> StrategyOutput;
}

/// The default strategies, in the order they are tried.
pub static DEFAULT_STRATEGIES: &[&dyn ExtractionStrategy] =
    &[&StructuredStrategy, &TableStrategy];

/// The result of extraction.
#[derive(Clone, Debug, Default, JsonSchema, Serialize)]
pub struct Extraction {
    /// Items sorted by serial, without duplicates.
    pub items: Vec<ExtractedLineItem>,
    /// The strategy that produced `items`, if any produced anything.
    pub strategy: Option<String>,
    /// Skipped blocks and other anomalies.
    pub warnings: Vec<String>,
}

/// Extract items with [`DEFAULT_STRATEGIES`].
pub fn extract_items(text: &str, ctx: &DocContext) -> Extraction {
    extract_items_with(DEFAULT_STRATEGIES, text, ctx)
}

/// Extract items, trying `strategies` in order. The first strategy that finds
/// at least one item wins.
pub fn extract_items_with(
    strategies: &[&dyn ExtractionStrategy],
    text: &str,
    ctx: &DocContext,
) -> Extraction {
    ctx.in_scope(|| {
        let mut all_failures = vec![];
        for strategy in strategies {
            let output = strategy.extract(text);
            debug!(
                strategy = strategy.name(),
                items = output.items.len(),
                failures = output.failures.len(),
                "Ran extraction strategy"
            );
            if output.items.is_empty() {
                all_failures.extend(output.failures);
                continue;
            }

            let mut warnings = output
                .failures
                .iter()
                .map(|failure| ctx.warning(failure.to_string()))
                .collect::<Vec<_>>();
            let items = dedup_by_serial(output.items, &mut warnings, ctx);
            info!(
                strategy = strategy.name(),
                items = items.len(),
                "Extracted line items"
            );
            return Extraction {
                items,
                strategy: Some(strategy.name().to_owned()),
                warnings,
            };
        }

        let mut warnings = all_failures
            .iter()
            .map(|failure| ctx.warning(failure.to_string()))
            .collect::<Vec<_>>();
        warnings.push(ctx.warning("no line items found in document"));
        Extraction {
            items: vec![],
            strategy: None,
            warnings,
        }
    })
}

/// Sort by serial, keeping the first occurrence of each serial.
fn dedup_by_serial(
    mut items: Vec<ExtractedLineItem>,
    warnings: &mut Vec<String>,
    ctx: &DocContext,
) -> Vec<ExtractedLineItem> {
    // Stable, so "first" still means first in the document.
    items.sort_by_key(|item| item.serial);
    let mut seen = BTreeSet::new();
    items.retain(|item| {
        if seen.insert(item.serial) {
            true
        } else {
            warnings.push(ctx.warning(format!(
                "duplicate item {} in document; keeping the first occurrence",
                item.serial
            )));
            false
        }
    });
    items
}

/// Characters OCR sprinkles around table cells.
pub(crate) fn is_noise_char(c: char) -> bool {
    c.is_whitespace() || matches!(c, '[' | ']' | '|' | '(' | ')' | '{' | '}' | '!' | ':')
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The same two items, laid out as a scanned table. The structured
    /// strategy finds nothing here.
    const OCR_TABLE: &str = "\
SINGLE ADMINISTRATIVE DOCUMENT
| 1 [8479.903000 | Parts of machines 3.150,0000 PCS
Parts of machines for the food industry
Gross mass 120,5
| 2 | 7318158900 bolts 470,0000 KG
Steel bolts
";

    #[test]
    fn falls_back_to_table_strategy() {
        let ctx = DocContext::quiet("test");
        let extraction = extract_items(OCR_TABLE, &ctx);
        assert_eq!(extraction.strategy.as_deref(), Some("table"));
        assert_eq!(extraction.items.len(), 2);
        assert_eq!(extraction.items[0].serial, 1);
        assert_eq!(extraction.items[0].tariff_code, "8479.903000");
        assert_eq!(extraction.items[0].quantity, 3150.0);
        assert_eq!(extraction.items[0].unit, "PCS");
        assert_eq!(extraction.items[1].tariff_code, "7318.158900");
        assert_eq!(extraction.items[1].quantity, 470.0);
    }

    #[test]
    fn structured_text_uses_structured_strategy() {
        let text = "\
1 Goods item
Code: 8479.90.3000 Parts of machines
- 3.150,0000
- PCS
";
        let ctx = DocContext::quiet("test");
        let extraction = extract_items(text, &ctx);
        assert_eq!(extraction.strategy.as_deref(), Some("structured"));
        assert_eq!(extraction.items.len(), 1);
    }

    #[test]
    fn duplicate_serials_keep_first() {
        struct Fixed;
        impl ExtractionStrategy for Fixed {
            fn name(&self) -> &'static str {
                "fixed"
            }
            fn extract(&self, _text: &str) -> StrategyOutput {
                let item = |serial, quantity| ExtractedLineItem {
                    serial,
                    tariff_code: "8479.903000".to_owned(),
                    description: String::new(),
                    quantity,
                    unit: "PCS".to_owned(),
                };
                StrategyOutput {
                    items: vec![item(2, 1.0), item(1, 5.0), item(2, 9.0)],
                    failures: vec![],
                }
            }
        }

        let ctx = DocContext::quiet("test");
        let extraction = extract_items_with(&[&Fixed], "", &ctx);
        let serials = extraction.items.iter().map(|i| i.serial).collect::<Vec<_>>();
        assert_eq!(serials, vec![1, 2]);
        assert_eq!(extraction.items[1].quantity, 1.0);
        assert_eq!(extraction.warnings.len(), 1);
        assert!(extraction.warnings[0].contains("duplicate item 2"));
    }

    #[test]
    fn nothing_found_is_a_warning_not_an_error() {
        let ctx = DocContext::quiet("test");
        let extraction = extract_items("nothing to see here", &ctx);
        assert!(extraction.items.is_empty());
        assert_eq!(extraction.strategy, None);
        assert!(!extraction.warnings.is_empty());
    }
}
