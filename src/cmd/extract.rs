//! The `extract` subcommand.

use clap::Args;
use schemars::JsonSchema;

use crate::{
    async_utils::io::write_json_pretty, config::ConfigOpts, extract::ExtractedLineItem,
    prelude::*, ui::Ui,
};

/// Extract command line arguments.
#[derive(Debug, Args)]
pub struct ExtractOpts {
    /// The declaration to read: a PDF, an image, or a `.txt` file.
    #[clap(value_name = "DOCUMENT")]
    pub document_path: PathBuf,

    /// Include the full document text in the output.
    #[clap(long)]
    pub include_text: bool,

    /// Where to write the JSON output. Defaults to stdout.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub config_opts: ConfigOpts,
}

/// What `extract` prints for a document.
#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct ExtractionOutput {
    pub path: PathBuf,
    pub byte_len: u64,
    pub page_count: usize,
    /// Was the document OCRed?
    pub scanned: bool,
    /// Average OCR confidence per page. Empty unless `scanned`.
    pub page_confidences: Vec<Option<f32>>,
    /// The strategy that found `items`.
    pub strategy: Option<String>,
    pub items: Vec<ExtractedLineItem>,
    /// Problems with acquisition and extraction, in that order.
    pub warnings: Vec<String>,
    /// Full document text, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// The `extract` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_extract(ui: Ui, opts: &ExtractOpts) -> Result<()> {
    let config = opts.config_opts.resolve().await?;
    let (document, extraction, _ctx) =
        super::acquire_and_extract(&ui, &opts.document_path, &config).await?;

    let mut warnings = document.warnings;
    warnings.extend(extraction.warnings);
    let output = ExtractionOutput {
        path: document.path,
        byte_len: document.byte_len,
        page_count: document.page_count,
        scanned: document.scanned,
        page_confidences: document.page_confidences,
        strategy: extraction.strategy,
        items: extraction.items,
        warnings,
        text: opts.include_text.then_some(document.text),
    };

    ui.display_message(
        "📄",
        &format!(
            "Found {} line items ({} warnings)",
            output.items.len(),
            output.warnings.len()
        ),
    );
    write_json_pretty(opts.output_path.as_deref(), &output).await
}
