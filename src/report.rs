//! Flat, one-line-per-row output records.

use schemars::JsonSchema;

use crate::{
    extract::numbers::format_quantity,
    prelude::*,
    recon::{CodeStatus, OverallStatus, QuantityStatus, ValidationResult},
};

/// Separator between issues in [`ResultRow::issues`].
pub const ISSUE_SEPARATOR: &str = "; ";

/// A reconciliation result in a shape that fits in a CSV file.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
pub struct ResultRow {
    pub row: usize,
    pub group: String,
    pub serial: String,
    pub item_code_status: CodeStatus,
    pub quantity_status: QuantityStatus,
    pub overall_status: OverallStatus,
    pub document_code: String,
    pub document_quantity: String,
    pub document_unit: String,
    pub issues: String,
}

impl From<&ValidationResult> for ResultRow {
    fn from(result: &ValidationResult) -> Self {
        let item = result.matched_item.as_ref();
        Self {
            row: result.row,
            group: result.group_id.clone(),
            serial: result.serial.clone(),
            item_code_status: result.code_status,
            quantity_status: result.quantity_status,
            overall_status: result.overall_status,
            document_code: item.map(|i| i.tariff_code.clone()).unwrap_or_default(),
            document_quantity: item
                .map(|i| format_quantity(i.quantity))
                .unwrap_or_default(),
            document_unit: item.map(|i| i.unit.clone()).unwrap_or_default(),
            issues: result.issues.join(ISSUE_SEPARATOR),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::ReconciliationConfig, context::DocContext, extract::ExtractedLineItem,
        recon::reconcile, reference::ReferenceLineItem,
    };

    use super::*;

    #[test]
    fn flattens_results() {
        let reference = [
            ReferenceLineItem {
                row: 2,
                group_id: "G1".to_owned(),
                serial: "2".to_owned(),
                item_code: "CD6789".to_owned(),
                item_name: "Bolt".to_owned(),
                quantity: "500".to_owned(),
                numeric_quantity: None,
            },
            ReferenceLineItem {
                row: 3,
                group_id: "G1".to_owned(),
                serial: "5".to_owned(),
                item_code: "XY1".to_owned(),
                item_name: "Nut".to_owned(),
                quantity: "1".to_owned(),
                numeric_quantity: None,
            },
        ];
        let extracted = [ExtractedLineItem {
            serial: 2,
            tariff_code: "CD67890".to_owned(),
            description: "Bolts".to_owned(),
            quantity: 470.0,
            unit: "KG".to_owned(),
        }];
        let report = reconcile(
            &reference,
            &extracted,
            &ReconciliationConfig::default(),
            &DocContext::quiet("test"),
        );
        let rows = report.results.iter().map(ResultRow::from).collect::<Vec<_>>();

        assert_eq!(rows[0].document_code, "CD67890");
        assert_eq!(rows[0].document_quantity, "470");
        assert_eq!(rows[0].document_unit, "KG");
        assert_eq!(rows[0].overall_status, OverallStatus::Warning);
        assert_eq!(
            rows[0].issues,
            "item code CD6789 accepted as CD67890 (91% similar); \
             quantity over limit: reference 500, document 470 KG"
        );

        assert_eq!(rows[1].document_code, "");
        assert_eq!(rows[1].overall_status, OverallStatus::Error);
        assert_eq!(rows[1].issues, "serial 5 not found in document");

        let json = serde_json::to_value(&rows[1]).unwrap();
        assert_eq!(json["item_code_status"], "ERROR");
    }
}
