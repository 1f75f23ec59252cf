//! The `reconcile` subcommand.

use clap::Args;
use futures::{StreamExt as _, stream};

use crate::{
    async_utils::io::{write_json_pretty, write_records},
    config::ConfigOpts,
    prelude::*,
    recon::reconcile,
    reference::read_reference,
    report::ResultRow,
    ui::Ui,
};

/// Reconcile command line arguments.
#[derive(Debug, Args)]
pub struct ReconcileOpts {
    /// Reference spreadsheet (XLSX, XLS, ODS or CSV).
    #[clap(long = "reference", value_name = "SHEET")]
    pub reference_path: PathBuf,

    /// The declaration to check: a PDF, an image, or a `.txt` file.
    #[clap(value_name = "DOCUMENT")]
    pub document_path: PathBuf,

    /// Worksheet to read. Defaults to the configured sheet, or the first one.
    #[clap(long)]
    pub sheet: Option<String>,

    /// Only check reference rows with this group ID.
    #[clap(long)]
    pub group: Option<String>,

    /// Where to write one result per reference row. Written as CSV if the
    /// name ends in `.csv`, and as JSONL otherwise. Defaults to stdout.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    /// Also write the full report, with summary, as JSON.
    #[clap(long = "report", value_name = "PATH")]
    pub report_path: Option<PathBuf>,

    /// What portion of rows may be ERROR before we exit with an error?
    /// Specified as a number between 0.0 and 1.0.
    #[clap(long, default_value = "1.0")]
    pub allowed_error_rate: f64,

    #[clap(flatten)]
    pub config_opts: ConfigOpts,
}

/// The `reconcile` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_reconcile(ui: Ui, opts: &ReconcileOpts) -> Result<()> {
    let mut config = opts.config_opts.resolve().await?;
    if let Some(sheet) = &opts.sheet {
        config.reference.sheet = Some(sheet.clone());
    }

    let mut reference = read_reference(&opts.reference_path, &config.reference)
        .await
        .with_context(|| {
            format!(
                "failed to read reference data from {:?}",
                opts.reference_path.display()
            )
        })?;
    if let Some(group) = &opts.group {
        reference.retain(|item| item.group_id.trim() == group.trim());
        if reference.is_empty() {
            warn!(group = %group, "No reference rows in group");
        }
    }

    let (_document, extraction, ctx) =
        super::acquire_and_extract(&ui, &opts.document_path, &config).await?;
    let report = reconcile(&reference, &extraction.items, &config.reconciliation, &ctx);

    let rows = report
        .results
        .iter()
        .map(|result| Ok(ResultRow::from(result)))
        .collect::<Vec<Result<_>>>();
    write_records(opts.output_path.as_deref(), stream::iter(rows).boxed()).await?;
    if let Some(report_path) = &opts.report_path {
        write_json_pretty(Some(report_path), &report).await?;
    }

    let summary = &report.summary;
    ui.display_message(
        "📊",
        &format!(
            "{} rows: {} OK, {} WARNING, {} ERROR ({:.1}% OK)",
            summary.total, summary.ok, summary.warning, summary.error, summary.success_rate
        ),
    );
    if summary.duplicate_rows > 0 {
        ui.display_message(
            "🧩",
            &format!("{} rows belong to split shipments", summary.duplicate_rows),
        );
    }

    let error_rate = summary.error_rate();
    if error_rate > opts.allowed_error_rate {
        Err(anyhow!(
            "{}/{} ({:.2}%) of rows were errors, but only {:.2}% were allowed",
            summary.error,
            summary.total,
            error_rate * 100.0,
            opts.allowed_error_rate * 100.0
        ))
    } else {
        Ok(())
    }
}
