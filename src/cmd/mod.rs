//! Command-line entry points.

use crate::{
    config::PipelineConfig,
    context::DocContext,
    document::{SourceDocument, TextAcquisition},
    extract::{Extraction, extract_items},
    prelude::*,
    ui::Ui,
};

pub mod extract;
pub mod reconcile;
pub mod schema;

/// Read a document and find its line items. Shared by `extract` and
/// `reconcile`.
async fn acquire_and_extract(
    ui: &Ui,
    path: &Path,
    config: &PipelineConfig,
) -> Result<(SourceDocument, Extraction, DocContext)> {
    let ctx = DocContext::for_path(path, ui.clone());
    let acquisition = TextAcquisition::with_external_tools(config);
    let document = acquisition.acquire(path, &ctx).await?;
    let extraction = extract_items(&document.text, &ctx);
    if document.scanned {
        ui.display_message(
            "🔍",
            &format!("{}: scanned, OCRed {} pages", ctx.doc_id(), document.page_count),
        );
    }
    Ok((document, extraction, ctx))
}
