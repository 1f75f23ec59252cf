use std::fmt;

use schemars::JsonSchema;

use crate::{extract::ExtractedLineItem, prelude::*};

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Result of comparing item codes.
#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CodeStatus {
    Ok,
    NotMatch,
    Error,
}

/// Result of comparing quantities.
#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuantityStatus {
    Ok,
    OverLimit,
    Error,
}

/// Verdict for a whole reference row.
#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    Ok,
    Warning,
    Error,
}

impl OverallStatus {
    /// `OK` iff both fields are OK, `ERROR` if either is an error, and
    /// `WARNING` otherwise.
    pub fn from_fields(code: CodeStatus, quantity: QuantityStatus) -> Self {
        match (code, quantity) {
            (CodeStatus::Ok, QuantityStatus::Ok) => Self::Ok,
            (CodeStatus::Error, _) | (_, QuantityStatus::Error) => Self::Error,
            _ => Self::Warning,
        }
    }
}

impl fmt::Display for CodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::NotMatch => write!(f, "NOT_MATCH"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

impl fmt::Display for QuantityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::OverLimit => write!(f, "OVER_LIMIT"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Reference rows sharing a group and serial (a split shipment).
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
pub struct DuplicateGroup {
    /// Number of rows in the group.
    pub size: usize,
    /// Sum of the group's quantities, if all of them parsed.
    pub total: Option<f64>,
}

/// The verdict for one reference row.
#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct ValidationResult {
    /// Spreadsheet row, 1-based.
    pub row: usize,
    pub group_id: String,
    /// Serial as written in the reference data.
    pub serial: String,
    pub reference_code: String,
    pub matched_item: Option<ExtractedLineItem>,
    pub code_status: CodeStatus,
    pub quantity_status: QuantityStatus,
    pub overall_status: OverallStatus,
    /// Code similarity (0.0-1.0) when the codes were compared.
    pub code_similarity: Option<f64>,
    /// The reference quantity compared against the document. For split
    /// shipments this is the group total.
    pub compared_quantity: Option<f64>,
    pub duplicate_group: Option<DuplicateGroup>,
    pub issues: Vec<String>,
}

impl ValidationResult {
    /// A row we could not validate at all.
    pub(crate) fn error(
        row: usize,
        group_id: &str,
        serial: &str,
        reference_code: &str,
        issue: String,
    ) -> Self {
        Self {
            row,
            group_id: group_id.to_owned(),
            serial: serial.to_owned(),
            reference_code: reference_code.to_owned(),
            matched_item: None,
            code_status: CodeStatus::Error,
            quantity_status: QuantityStatus::Error,
            overall_status: OverallStatus::Error,
            code_similarity: None,
            compared_quantity: None,
            duplicate_group: None,
            issues: vec![issue],
        }
    }
}

/// Totals for a reconciliation run.
#[derive(Clone, Debug, Default, JsonSchema, PartialEq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub ok: usize,
    pub warning: usize,
    pub error: usize,
    /// Percentage of rows that are OK. 0 when there are no rows.
    pub success_rate: f64,
    /// Rows whose item code is not OK.
    pub code_issues: usize,
    /// Rows whose quantity is not OK.
    pub quantity_issues: usize,
    /// Rows belonging to a split shipment.
    pub duplicate_rows: usize,
}

impl Summary {
    pub fn from_results(results: &[ValidationResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            match result.overall_status {
                OverallStatus::Ok => summary.ok += 1,
                OverallStatus::Warning => summary.warning += 1,
                OverallStatus::Error => summary.error += 1,
            }
            if result.code_status != CodeStatus::Ok {
                summary.code_issues += 1;
            }
            if result.quantity_status != QuantityStatus::Ok {
                summary.quantity_issues += 1;
            }
            if result.duplicate_group.is_some() {
                summary.duplicate_rows += 1;
            }
        }
        if summary.total > 0 {
            summary.success_rate = summary.ok as f64 / summary.total as f64 * 100.0;
        }
        summary
    }

    /// Fraction (0.0-1.0) of rows with an `ERROR` verdict.
    pub fn error_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.error as f64 / self.total as f64
        }
    }
}

/// Everything produced by one reconciliation run.
#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct ReconciliationReport {
    /// One result per reference row, in reference order.
    pub results: Vec<ValidationResult>,
    pub summary: Summary,
}
