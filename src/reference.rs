//! Reading reference line items from a spreadsheet.
//!
//! The reference data is what the shipment is *supposed* to contain. We read
//! Excel and OpenDocument workbooks with `calamine`, and plain CSV exports with
//! `csv`. Either way, the cell layout comes from [`ReferenceLayout`].

use calamine::{Data, Reader as _, open_workbook_auto};
use schemars::JsonSchema;

use crate::{
    async_utils::{io::is_csv, spawn_blocking_propagating_panics},
    config::{ReferenceLayout, column_index},
    extract::numbers::parse_quantity,
    prelude::*,
};

/// One row of reference data. Values are kept as written; parsing happens
/// during reconciliation so that bad cells become per-row errors.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ReferenceLineItem {
    /// Spreadsheet row, 1-based.
    pub row: usize,
    pub group_id: String,
    pub serial: String,
    pub item_code: String,
    pub item_name: String,
    pub quantity: String,
    /// The quantity as stored, when the cell holds a number rather than
    /// text. Typed numbers are exact, so they skip locale guessing.
    #[serde(default)]
    pub numeric_quantity: Option<f64>,
}

impl ReferenceLineItem {
    /// The reference quantity, or `None` if it is missing, negative or
    /// unreadable.
    pub fn parsed_quantity(&self) -> Option<f64> {
        match self.numeric_quantity {
            Some(quantity) => (quantity.is_finite() && quantity >= 0.0).then_some(quantity),
            None => parse_quantity(&self.quantity),
        }
    }
}

/// Zero-based column indices for a [`ReferenceLayout`].
#[derive(Clone, Copy, Debug)]
struct Columns {
    group: usize,
    serial: usize,
    code: usize,
    name: usize,
    quantity: usize,
}

impl Columns {
    fn from_layout(layout: &ReferenceLayout) -> Result<Self> {
        Ok(Self {
            group: column_index(&layout.group_column)?,
            serial: column_index(&layout.serial_column)?,
            code: column_index(&layout.code_column)?,
            name: column_index(&layout.name_column)?,
            quantity: column_index(&layout.quantity_column)?,
        })
    }
}

/// Read reference line items from a workbook or CSV file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn read_reference(
    path: &Path,
    layout: &ReferenceLayout,
) -> Result<Vec<ReferenceLineItem>> {
    let path = path.to_owned();
    let layout = layout.clone();
    let items = spawn_blocking_propagating_panics(move || {
        if is_csv(&path) {
            read_csv(&path, &layout)
        } else {
            read_workbook(&path, &layout)
        }
    })
    .await?;
    debug!(rows = items.len(), "Read reference rows");
    Ok(items)
}

fn read_csv(path: &Path, layout: &ReferenceLayout) -> Result<Vec<ReferenceLineItem>> {
    let columns = Columns::from_layout(layout)?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open reference CSV {:?}", path.display()))?;

    let mut rows = vec![];
    for record in rdr.records() {
        let record = record
            .with_context(|| format!("failed to read reference CSV {:?}", path.display()))?;
        // Blank lines are skipped by the reader, so use its line numbers.
        let row = record
            .position()
            .map(|pos| pos.line() as usize)
            .unwrap_or(rows.len() + 1);
        let cells = record
            .iter()
            .map(|cell| Data::String(cell.trim().to_owned()))
            .collect();
        rows.push((row, cells));
    }
    Ok(collect_items(rows, columns, layout))
}

fn read_workbook(path: &Path, layout: &ReferenceLayout) -> Result<Vec<ReferenceLineItem>> {
    let columns = Columns::from_layout(layout)?;
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("failed to open reference workbook {:?}", path.display()))?;
    let sheet_name = match &layout.sheet {
        Some(name) => name.clone(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| anyhow!("workbook {:?} has no sheets", path.display()))?,
    };
    let range = workbook
        .worksheet_range(&sheet_name)
        .with_context(|| format!("failed to read sheet {:?}", sheet_name))?;

    let Some((last_row, _)) = range.end() else {
        return Ok(vec![]);
    };
    let max_column = [
        columns.group,
        columns.serial,
        columns.code,
        columns.name,
        columns.quantity,
    ]
    .into_iter()
    .max()
    .unwrap_or_default();

    // `get_value` takes absolute positions, so rows line up with the sheet
    // even when the used range does not start at A1.
    let rows = (layout.first_data_row.saturating_sub(1) as u32..=last_row).map(|row| {
        let cells = (0..=max_column as u32)
            .map(|col| range.get_value((row, col)).cloned().unwrap_or(Data::Empty))
            .collect::<Vec<_>>();
        (row as usize + 1, cells)
    });
    Ok(collect_items(rows, columns, layout))
}

/// Render a cell as the text a user would see.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_owned(),
        // Serials and quantities are usually stored as floats.
        Data::Float(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
        other => other.to_string().trim().to_owned(),
    }
}

/// The value of a numeric cell.
fn cell_number(cell: &Data) -> Option<f64> {
    match cell {
        Data::Float(n) => Some(*n),
        Data::Int(n) => Some(*n as f64),
        _ => None,
    }
}

/// Turn `(row, cells)` pairs into items, starting at the first data row and
/// stopping after too many consecutive rows without an item code.
fn collect_items(
    rows: impl IntoIterator<Item = (usize, Vec<Data>)>,
    columns: Columns,
    layout: &ReferenceLayout,
) -> Vec<ReferenceLineItem> {
    let cell = |cells: &[Data], idx: usize| cells.get(idx).map(cell_text).unwrap_or_default();

    let mut items = vec![];
    let mut empty_run = 0;
    for (row, cells) in rows {
        if row < layout.first_data_row {
            continue;
        }
        let item_code = cell(&cells, columns.code);
        if item_code.is_empty() {
            empty_run += 1;
            if empty_run >= layout.max_empty_code_run {
                trace!(row, "Stopping at run of empty item codes");
                break;
            }
            continue;
        }
        empty_run = 0;
        items.push(ReferenceLineItem {
            row,
            group_id: cell(&cells, columns.group),
            serial: cell(&cells, columns.serial),
            item_code,
            item_name: cell(&cells, columns.name),
            quantity: cell(&cells, columns.quantity),
            numeric_quantity: cells.get(columns.quantity).and_then(cell_number),
        });
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_csv_text(text: &str, layout: &ReferenceLayout) -> Result<Vec<ReferenceLineItem>> {
        let dir = tempfile::TempDir::with_prefix("reference-test")?;
        let path = dir.path().join("reference.csv");
        std::fs::write(&path, text)?;
        read_reference(&path, layout).await
    }

    #[tokio::test]
    async fn reads_csv_with_default_layout() -> Result<()> {
        let text = "\
group,serial,code,name,quantity
G1,1,AB12345,Widget,3000
G1,2,CD6789,Bolt,\"500\"
";
        let items = read_csv_text(text, &ReferenceLayout::default()).await?;
        assert_eq!(
            items,
            vec![
                ReferenceLineItem {
                    row: 2,
                    group_id: "G1".to_owned(),
                    serial: "1".to_owned(),
                    item_code: "AB12345".to_owned(),
                    item_name: "Widget".to_owned(),
                    quantity: "3000".to_owned(),
                    numeric_quantity: None,
                },
                ReferenceLineItem {
                    row: 3,
                    group_id: "G1".to_owned(),
                    serial: "2".to_owned(),
                    item_code: "CD6789".to_owned(),
                    item_name: "Bolt".to_owned(),
                    quantity: "500".to_owned(),
                    numeric_quantity: None,
                },
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn stops_after_run_of_empty_codes() -> Result<()> {
        let text = "\
header
G1,1,AAA,,1
G1,2,,,1
G1,3,BBB,,1
G1,4,,,1
G1,5,,,1
G1,6,,,1
G1,7,CCC,,1
";
        let items = read_csv_text(text, &ReferenceLayout::default()).await?;
        let codes = items.iter().map(|i| i.item_code.as_str()).collect::<Vec<_>>();
        assert_eq!(codes, vec!["AAA", "BBB"]);
        assert_eq!(items[1].row, 4);
        Ok(())
    }

    #[tokio::test]
    async fn honours_custom_columns() -> Result<()> {
        let layout = ReferenceLayout {
            group_column: "E".to_owned(),
            serial_column: "D".to_owned(),
            code_column: "A".to_owned(),
            name_column: "B".to_owned(),
            quantity_column: "C".to_owned(),
            first_data_row: 1,
            ..ReferenceLayout::default()
        };
        let items = read_csv_text("X1,Name,7,3,G9\n", &layout).await?;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_code, "X1");
        assert_eq!(items[0].serial, "3");
        assert_eq!(items[0].group_id, "G9");
        assert_eq!(items[0].quantity, "7");
        Ok(())
    }

    #[test]
    fn float_cells_render_without_decimals() {
        assert_eq!(cell_text(&Data::Float(3.0)), "3");
        assert_eq!(cell_text(&Data::Float(2.5)), "2.5");
        assert_eq!(cell_text(&Data::String(" AB1 ".to_owned())), "AB1");
        assert_eq!(cell_text(&Data::Empty), "");
    }

    #[test]
    fn numeric_quantities_are_taken_as_stored() {
        let rows = vec![
            (
                2,
                vec![
                    Data::String("G1".to_owned()),
                    Data::Float(1.0),
                    Data::String("AB12345".to_owned()),
                    Data::String("Wire".to_owned()),
                    Data::Float(2.125),
                ],
            ),
            (
                3,
                vec![
                    Data::String("G1".to_owned()),
                    Data::Int(2),
                    Data::String("CD6789".to_owned()),
                    Data::Empty,
                    Data::String("1.234".to_owned()),
                ],
            ),
        ];
        let layout = ReferenceLayout::default();
        let items = collect_items(rows, Columns::from_layout(&layout).unwrap(), &layout);

        assert_eq!(items[0].serial, "1");
        assert_eq!(items[0].quantity, "2.125");
        assert_eq!(items[0].numeric_quantity, Some(2.125));
        assert_eq!(items[0].parsed_quantity(), Some(2.125));
        // Text cells still use the declaration rules.
        assert_eq!(items[1].serial, "2");
        assert_eq!(items[1].numeric_quantity, None);
        assert_eq!(items[1].parsed_quantity(), Some(1234.0));
    }

    #[test]
    fn negative_numeric_quantities_are_invalid() {
        let item = ReferenceLineItem {
            quantity: "-3".to_owned(),
            numeric_quantity: Some(-3.0),
            ..ReferenceLineItem::default()
        };
        assert_eq!(item.parsed_quantity(), None);
    }
}
