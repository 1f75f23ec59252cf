//! OCR for scanned documents.
//!
//! The [`OcrOrchestrator`] rasterizes a document, then recognizes its pages in
//! fixed-size batches. Pages within a batch run concurrently, but batches run
//! one after another, which keeps the number of page images on disk (and
//! `tesseract` processes) bounded. A page that fails to recognize becomes an
//! empty fragment with a warning. Failing to rasterize the document at all is
//! fatal, and reported as [`PipelineError::Rasterization`].

use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use schemars::JsonSchema;

use crate::{
    async_utils::spawn_blocking_propagating_panics, config::OcrConfig, context::DocContext,
    errors::PipelineError, prelude::*, ui::ProgressConfig,
};

pub mod engine;
pub mod preprocess;
pub mod rasterize;
pub mod tesseract;

use self::{
    engine::{RecognitionEngine, RecognitionInput},
    rasterize::Rasterizer,
};

/// OCR results for one page.
#[derive(Clone, Debug, Default, JsonSchema, PartialEq, Serialize)]
pub struct OcrPage {
    /// Zero-based page index.
    pub index: usize,
    /// Recognized text, after dropping low-confidence words.
    pub text: String,
    /// Average word confidence reported by the engine.
    pub confidence: Option<f32>,
    /// Why this page came back empty, if it failed.
    pub warning: Option<String>,
}

/// OCR results for a whole document.
#[derive(Clone, Debug, Default)]
pub struct OcrOutput {
    /// Page texts in page order, separated by blank lines.
    pub text: String,
    pub pages: Vec<OcrPage>,
    /// Non-fatal problems, including failed pages.
    pub warnings: Vec<String>,
}

/// Runs OCR over whole documents.
#[derive(Clone)]
pub struct OcrOrchestrator {
    rasterizer: Arc<dyn Rasterizer>,
    engine: Arc<dyn RecognitionEngine>,
    config: OcrConfig,
}

impl OcrOrchestrator {
    pub fn new(
        rasterizer: Arc<dyn Rasterizer>,
        engine: Arc<dyn RecognitionEngine>,
        config: OcrConfig,
    ) -> Self {
        Self {
            rasterizer,
            engine,
            config,
        }
    }

    /// OCR the document at `path`.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn run(&self, path: &Path, ctx: &DocContext) -> Result<OcrOutput> {
        ctx.instrument(self.run_inner(path, ctx)).await
    }

    async fn run_inner(&self, path: &Path, ctx: &DocContext) -> Result<OcrOutput> {
        let rasterized = self
            .rasterizer
            .rasterize(path, self.config.scale)
            .await
            .map_err(|err| PipelineError::rasterization(path, err))?;
        if rasterized.pages().is_empty() {
            return Err(
                PipelineError::rasterization(path, anyhow!("document has no pages")).into(),
            );
        }
        let page_count = rasterized.pages().len();
        debug!(page_count, dpi = self.config.dpi(), "Rasterized document");

        let workdir = tempfile::TempDir::with_prefix("ocr")
            .context("failed to create OCR working directory")?;

        let pb = ctx.ui().new_progress_bar(
            &ProgressConfig {
                emoji: "🔍",
                msg: "OCRing pages",
                done_msg: "OCRed pages",
            },
            page_count as u64,
        );

        // Each page writes only its own slot, so completion order does not
        // matter.
        let mut pages = (0..page_count)
            .map(|index| OcrPage {
                index,
                ..OcrPage::default()
            })
            .collect::<Vec<_>>();
        let indices = (0..page_count).collect::<Vec<_>>();
        for batch in indices.chunks(self.config.batch_size.max(1)) {
            let futures = batch.iter().map(|&index| {
                self.process_page(
                    index,
                    &rasterized.pages()[index],
                    rasterized.is_disposable(),
                    workdir.path(),
                    ctx,
                )
            });
            for page in join_all(futures).await {
                let index = page.index;
                pages[index] = page;
                pb.inc(1);
            }
        }
        pb.finish_using_style();

        let workdir_path = workdir.path().to_owned();
        if let Err(err) = workdir.close() {
            error!(
                directory = ?workdir_path.display(),
                "failed to delete temporary directory: {}",
                err
            );
        }

        let mut warnings = rasterized.warnings().to_vec();
        warnings.extend(pages.iter().filter_map(|page| page.warning.clone()));
        let text = pages
            .iter()
            .map(|page| page.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(OcrOutput {
            text,
            pages,
            warnings,
        })
    }

    /// Recognize one page. Never fails: errors become an empty page with a
    /// warning.
    async fn process_page(
        &self,
        index: usize,
        raster: &Path,
        disposable: bool,
        workdir: &Path,
        ctx: &DocContext,
    ) -> OcrPage {
        let recognition = self.recognize_page(index, raster, workdir);
        let result = match self.config.page_timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), recognition)
                .await
                .unwrap_or_else(|_| Err(anyhow!("timed out after {secs}s"))),
            None => recognition.await,
        };

        // Free disk space as we go. The working directory is removed at the
        // end either way.
        if disposable && let Err(err) = tokio::fs::remove_file(raster).await {
            warn!(page = index, "failed to delete page image: {}", err);
        }

        match result {
            Ok(recognition) => {
                let text = recognition.filtered_text(self.config.min_word_confidence);
                trace!(
                    page = index,
                    confidence = ?recognition.overall_confidence,
                    chars = text.len(),
                    "Recognized page"
                );
                OcrPage {
                    index,
                    text,
                    confidence: recognition.overall_confidence,
                    warning: None,
                }
            }
            Err(err) => {
                let err = PipelineError::Recognition {
                    page: index + 1,
                    message: format!("{err:#}"),
                };
                OcrPage {
                    index,
                    text: String::new(),
                    confidence: None,
                    warning: Some(ctx.warning(err.to_string())),
                }
            }
        }
    }

    async fn recognize_page(
        &self,
        index: usize,
        raster: &Path,
        workdir: &Path,
    ) -> Result<engine::Recognition> {
        let prepared = workdir.join(format!("page-{:05}.png", index + 1));
        let input = raster.to_owned();
        let output = prepared.clone();
        let threshold = self.config.binarize_threshold;
        spawn_blocking_propagating_panics(move || {
            preprocess::preprocess_file(&input, &output, threshold)
        })
        .await?;

        let recognition = self
            .engine
            .recognize(RecognitionInput {
                page_index: index,
                image_path: prepared.clone(),
                languages: self.config.tesseract_languages(),
            })
            .await;
        if let Err(err) = tokio::fs::remove_file(&prepared).await {
            debug!(page = index, "failed to delete preprocessed image: {}", err);
        }
        recognition
    }
}
