//! Checking reference line items against what the document declares.
//!
//! Every reference row gets exactly one [`ValidationResult`], in reference
//! order. Rows are matched to document items by serial number. Reference rows
//! sharing a group and serial are a split shipment: their quantities are summed
//! and every member is checked against the total.

use std::collections::{BTreeMap, HashMap};

use crate::{
    config::ReconciliationConfig,
    context::DocContext,
    errors::PipelineError,
    extract::{
        ExtractedLineItem,
        numbers::{format_quantity, normalize_item_code},
    },
    prelude::*,
    reference::ReferenceLineItem,
};

pub mod model;
pub mod similarity;

pub use self::model::{
    CodeStatus, DuplicateGroup, OverallStatus, QuantityStatus, ReconciliationReport, Summary,
    ValidationResult,
};
use self::similarity::dice_similarity;

/// Slack for floating point sums of quantities.
const QUANTITY_EPSILON: f64 = 1e-9;

/// Key for grouping split shipments.
type GroupKey = (String, u32);

/// The reference quantity a group of rows is compared with.
#[derive(Clone, Debug)]
struct GroupQuantity {
    size: usize,
    /// `None` if any member's quantity did not parse.
    total: Option<f64>,
}

/// Reconcile reference rows against extracted items.
pub fn reconcile(
    reference: &[ReferenceLineItem],
    extracted: &[ExtractedLineItem],
    config: &ReconciliationConfig,
    ctx: &DocContext,
) -> ReconciliationReport {
    ctx.in_scope(|| {
        let items_by_serial = extracted
            .iter()
            .map(|item| (item.serial, item))
            .collect::<HashMap<_, _>>();

        // Parse serials once. Rows with bad serials become per-row errors.
        let serials = reference
            .iter()
            .map(parse_serial)
            .collect::<Vec<_>>();
        let groups = group_quantities(reference, &serials);

        let results = reference
            .iter()
            .zip(&serials)
            .map(|(row, serial)| match serial {
                Ok(serial) => {
                    let key = (row.group_id.trim().to_owned(), *serial);
                    let group = groups.get(&key).cloned().unwrap_or_else(|| GroupQuantity {
                        size: 1,
                        total: row.parsed_quantity(),
                    });
                    validate_row(
                        row,
                        *serial,
                        &group,
                        items_by_serial.get(serial).copied(),
                        config,
                    )
                }
                Err(err) => {
                    let issue = ctx.warning(err.to_string());
                    ValidationResult::error(
                        row.row,
                        &row.group_id,
                        &row.serial,
                        &row.item_code,
                        issue,
                    )
                }
            })
            .collect::<Vec<_>>();

        let summary = Summary::from_results(&results);
        info!(
            total = summary.total,
            ok = summary.ok,
            warning = summary.warning,
            error = summary.error,
            "Reconciled reference rows"
        );
        ReconciliationReport { results, summary }
    })
}

/// Parse a serial like `3`, ` 3 ` or `3.0` into a positive integer.
fn parse_serial(row: &ReferenceLineItem) -> Result<u32, PipelineError> {
    let raw = row.serial.trim();
    let bad = || PipelineError::Reconciliation {
        row: row.row,
        message: format!("unreadable serial {:?}", row.serial),
    };
    let serial = match raw.parse::<u32>() {
        Ok(serial) => serial,
        Err(_) => {
            let float = raw.parse::<f64>().map_err(|_| bad())?;
            if float.fract() != 0.0 || !(0.0..=u32::MAX as f64).contains(&float) {
                return Err(bad());
            }
            float as u32
        }
    };
    if serial == 0 {
        return Err(bad());
    }
    Ok(serial)
}

/// Sum quantities for every (group, serial) key.
fn group_quantities(
    reference: &[ReferenceLineItem],
    serials: &[Result<u32, PipelineError>],
) -> BTreeMap<GroupKey, GroupQuantity> {
    let mut groups = BTreeMap::<GroupKey, GroupQuantity>::new();
    for (row, serial) in reference.iter().zip(serials) {
        let Ok(serial) = serial else {
            continue;
        };
        let quantity = row.parsed_quantity();
        groups
            .entry((row.group_id.trim().to_owned(), *serial))
            .and_modify(|group| {
                group.size += 1;
                group.total = group.total.zip(quantity).map(|(a, b)| a + b);
            })
            .or_insert(GroupQuantity {
                size: 1,
                total: quantity,
            });
    }
    groups
}

fn validate_row(
    row: &ReferenceLineItem,
    serial: u32,
    group: &GroupQuantity,
    item: Option<&ExtractedLineItem>,
    config: &ReconciliationConfig,
) -> ValidationResult {
    let duplicate_group = (group.size > 1).then(|| DuplicateGroup {
        size: group.size,
        total: group.total,
    });

    let Some(item) = item else {
        let mut result = ValidationResult::error(
            row.row,
            &row.group_id,
            &row.serial,
            &row.item_code,
            format!("serial {serial} not found in document"),
        );
        result.compared_quantity = group.total;
        result.duplicate_group = duplicate_group;
        return result;
    };

    let mut issues = vec![];

    // Item codes.
    let reference_code = normalize_item_code(&row.item_code);
    let document_code = normalize_item_code(&item.tariff_code);
    let (code_status, code_similarity) = if reference_code == document_code {
        (CodeStatus::Ok, 1.0)
    } else {
        let similarity = dice_similarity(&reference_code, &document_code);
        let percent = similarity * 100.0;
        if similarity >= config.similarity_threshold {
            issues.push(format!(
                "item code {reference_code} accepted as {document_code} ({percent:.0}% similar)"
            ));
            (CodeStatus::Ok, similarity)
        } else {
            issues.push(format!(
                "item code mismatch: reference {reference_code}, document {document_code} ({percent:.0}% similar)"
            ));
            (CodeStatus::NotMatch, similarity)
        }
    };

    // Quantities.
    let quantity_status = match group.total {
        None => {
            issues.push("invalid quantity".to_owned());
            QuantityStatus::Error
        }
        Some(reference_quantity) if reference_quantity <= item.quantity + QUANTITY_EPSILON => {
            QuantityStatus::Ok
        }
        Some(reference_quantity) => {
            let what = if group.size > 1 {
                format!("reference total of {} rows", group.size)
            } else {
                "reference".to_owned()
            };
            let mut issue = format!(
                "quantity over limit: {what} {}, document {}",
                format_quantity(reference_quantity),
                format_quantity(item.quantity),
            );
            if !item.unit.is_empty() {
                issue.push(' ');
                issue.push_str(&item.unit);
            }
            issues.push(issue);
            QuantityStatus::OverLimit
        }
    };

    ValidationResult {
        row: row.row,
        group_id: row.group_id.clone(),
        serial: row.serial.clone(),
        reference_code: row.item_code.clone(),
        matched_item: Some(item.clone()),
        code_status,
        quantity_status,
        overall_status: OverallStatus::from_fields(code_status, quantity_status),
        code_similarity: Some(code_similarity),
        compared_quantity: group.total,
        duplicate_group,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_row(
        row: usize,
        group: &str,
        serial: &str,
        code: &str,
        qty: &str,
    ) -> ReferenceLineItem {
        ReferenceLineItem {
            row,
            group_id: group.to_owned(),
            serial: serial.to_owned(),
            item_code: code.to_owned(),
            item_name: String::new(),
            quantity: qty.to_owned(),
            numeric_quantity: None,
        }
    }

    fn item(serial: u32, code: &str, quantity: f64, unit: &str) -> ExtractedLineItem {
        ExtractedLineItem {
            serial,
            tariff_code: code.to_owned(),
            description: String::new(),
            quantity,
            unit: unit.to_owned(),
        }
    }

    fn config(threshold: f64) -> ReconciliationConfig {
        ReconciliationConfig {
            similarity_threshold: threshold,
        }
    }

    fn run(
        reference: &[ReferenceLineItem],
        extracted: &[ExtractedLineItem],
        threshold: f64,
    ) -> ReconciliationReport {
        reconcile(reference, extracted, &config(threshold), &DocContext::quiet("test"))
    }

    #[test]
    fn numeric_spreadsheet_quantities_keep_their_decimals() {
        let reference = ReferenceLineItem {
            quantity: "2.125".to_owned(),
            numeric_quantity: Some(2.125),
            ..reference_row(2, "G1", "1", "AB12345", "")
        };
        let report = run(&[reference], &[item(1, "AB12345", 2.5, "KG")], 0.75);
        let result = &report.results[0];
        assert_eq!(result.quantity_status, QuantityStatus::Ok);
        assert_eq!(result.compared_quantity, Some(2.125));
        assert!(result.issues.is_empty(), "{:?}", result.issues);
    }

    #[test]
    fn exact_match_within_limit_is_ok() {
        let report = run(
            &[reference_row(2, "G1", "1", "AB12345", "3000")],
            &[item(1, "AB12345", 3150.0, "PCS")],
            0.75,
        );
        let result = &report.results[0];
        assert_eq!(result.code_status, CodeStatus::Ok);
        assert_eq!(result.quantity_status, QuantityStatus::Ok);
        assert_eq!(result.overall_status, OverallStatus::Ok);
        assert!(result.issues.is_empty());
        assert_eq!(report.summary.success_rate, 100.0);
    }

    #[test]
    fn similar_code_depends_on_threshold() {
        let reference = [reference_row(3, "G1", "2", "CD6789", "500")];
        let extracted = [item(2, "CD67890", 470.0, "KG")];

        let report = run(&reference, &extracted, 0.75);
        let result = &report.results[0];
        assert_eq!(result.code_status, CodeStatus::Ok);
        assert!(result.issues[0].contains("91% similar"), "{:?}", result.issues);
        assert_eq!(result.quantity_status, QuantityStatus::OverLimit);
        assert_eq!(result.overall_status, OverallStatus::Warning);

        let report = run(&reference, &extracted, 0.95);
        let result = &report.results[0];
        assert_eq!(result.code_status, CodeStatus::NotMatch);
        assert_eq!(result.quantity_status, QuantityStatus::OverLimit);
        assert_eq!(result.overall_status, OverallStatus::Warning);
        assert!(
            result
                .issues
                .iter()
                .any(|i| i.contains("CD6789") && i.contains("CD67890"))
        );
        assert!(
            result
                .issues
                .iter()
                .any(|i| i == "quantity over limit: reference 500, document 470 KG")
        );
    }

    #[test]
    fn missing_serial_is_an_error() {
        let report = run(
            &[reference_row(2, "G1", "9", "AB12345", "1")],
            &[item(1, "AB12345", 1.0, "PCS")],
            0.75,
        );
        let result = &report.results[0];
        assert_eq!(result.code_status, CodeStatus::Error);
        assert_eq!(result.quantity_status, QuantityStatus::Error);
        assert_eq!(result.overall_status, OverallStatus::Error);
        assert_eq!(result.issues, vec!["serial 9 not found in document"]);
        assert!(result.matched_item.is_none());
    }

    #[test]
    fn split_shipments_compare_the_total() {
        let report = run(
            &[
                reference_row(2, "G1", "1", "AB12345", "2"),
                reference_row(3, "G1", "1", "AB12345", "3"),
                reference_row(4, "G2", "1", "AB12345", "3"),
            ],
            &[item(1, "AB12345", 4.0, "PCS")],
            0.75,
        );
        for result in &report.results[..2] {
            assert_eq!(result.quantity_status, QuantityStatus::OverLimit);
            assert_eq!(result.compared_quantity, Some(5.0));
            assert_eq!(
                result.duplicate_group,
                Some(DuplicateGroup {
                    size: 2,
                    total: Some(5.0)
                })
            );
        }
        // A different group with the same serial is not part of the split.
        assert_eq!(report.results[2].quantity_status, QuantityStatus::Ok);
        assert_eq!(report.results[2].duplicate_group, None);
        assert_eq!(report.summary.duplicate_rows, 2);
    }

    #[test]
    fn one_bad_quantity_spoils_the_group() {
        let report = run(
            &[
                reference_row(2, "G1", "1", "AB12345", "2"),
                reference_row(3, "G1", "1", "AB12345", "lots"),
            ],
            &[item(1, "AB12345", 40.0, "PCS")],
            0.75,
        );
        for result in &report.results {
            assert_eq!(result.quantity_status, QuantityStatus::Error);
            assert_eq!(result.overall_status, OverallStatus::Error);
            assert!(result.issues.contains(&"invalid quantity".to_owned()));
        }
    }

    #[test]
    fn bad_serial_only_affects_its_row() {
        let report = run(
            &[
                reference_row(2, "G1", "one", "AB12345", "1"),
                reference_row(3, "G1", "1.0", "AB12345", "1"),
            ],
            &[item(1, "AB12345", 1.0, "PCS")],
            0.75,
        );
        assert_eq!(report.results[0].overall_status, OverallStatus::Error);
        assert!(report.results[0].issues[0].contains("unreadable serial"));
        assert_eq!(report.results[1].overall_status, OverallStatus::Ok);
        assert_eq!(report.summary.error, 1);
        assert_eq!(report.summary.ok, 1);
        assert_eq!(report.summary.success_rate, 50.0);
    }

    #[test]
    fn runs_are_deterministic() {
        let reference = [
            reference_row(2, "G1", "2", "CD6789", "500"),
            reference_row(3, "G1", "1", "AB12345", "3000"),
            reference_row(4, "G1", "2", "CD6789", "1"),
            reference_row(5, "G1", "7", "ZZ", "1"),
        ];
        let extracted = [
            item(1, "AB12345", 3150.0, "PCS"),
            item(2, "CD67890", 470.0, "KG"),
        ];
        let first = serde_json::to_string(&run(&reference, &extracted, 0.75)).unwrap();
        for _ in 0..5 {
            let again = serde_json::to_string(&run(&reference, &extracted, 0.75)).unwrap();
            assert_eq!(first, again);
        }
        let rows = run(&reference, &extracted, 0.75)
            .results
            .iter()
            .map(|r| r.row)
            .collect::<Vec<_>>();
        assert_eq!(rows, vec![2, 3, 4, 5]);
    }
}
