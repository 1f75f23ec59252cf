//! Getting text out of a declaration.
//!
//! We prefer the document's own text layer. If it has too little text to be
//! useful, the document is treated as scanned: we OCR it and normalize the
//! result.

use std::sync::Arc;

use schemars::JsonSchema;

use crate::{
    config::{AcquisitionConfig, PipelineConfig},
    context::DocContext,
    errors::PipelineError,
    normalize::normalize_text,
    ocr::{OcrOrchestrator, rasterize::PopplerRasterizer, tesseract::TesseractEngine},
    poppler::{get_pdf_page_count, pdf_to_text},
    prelude::*,
};

/// Image types we can OCR directly.
const SUPPORTED_IMAGE_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/webp",
    "image/gif",
    "image/tiff",
];

/// The kinds of input we understand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image,
    /// Plain text, usually a previous extraction saved as `.txt`.
    Text,
}

impl DocumentKind {
    /// Detect the kind of a file from its extension and contents.
    pub fn detect(path: &Path) -> Result<Self> {
        if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"))
        {
            return Ok(Self::Text);
        }
        let mime_type = get_mime_type(path)?;
        if mime_type == "application/pdf" {
            Ok(Self::Pdf)
        } else if SUPPORTED_IMAGE_TYPES.contains(&mime_type.as_str()) {
            Ok(Self::Image)
        } else {
            Err(anyhow!(
                "unsupported MIME type {} for {:?} (supported: PDF, PNG, JPEG, WebP, GIF, TIFF, TXT)",
                mime_type,
                path.display()
            ))
        }
    }
}

/// Get the MIME type of a file.
fn get_mime_type(path: &Path) -> Result<String> {
    Ok(infer::get_from_path(path)
        .with_context(|| format!("failed to get MIME type for {:?}", path.display()))?
        .ok_or_else(|| anyhow!("unknown MIME type for {:?}", path.display()))?
        .mime_type()
        .to_string())
}

/// A document's native text layer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NativeText {
    pub text: String,
    pub page_count: usize,
}

/// Reads the text a document already contains.
#[async_trait]
pub trait TextExtractor: Send + Sync + 'static {
    async fn extract(&self, path: &Path, kind: DocumentKind) -> Result<NativeText>;
}

/// Uses `pdftotext` and `pdfinfo` for PDFs. Images have no text layer, and
/// text files are their own text layer.
#[non_exhaustive]
pub struct PopplerTextExtractor {}

impl PopplerTextExtractor {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for PopplerTextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextExtractor for PopplerTextExtractor {
    async fn extract(&self, path: &Path, kind: DocumentKind) -> Result<NativeText> {
        match kind {
            DocumentKind::Pdf => {
                let page_count = get_pdf_page_count(path).await?;
                let text = pdf_to_text(path).await?;
                Ok(NativeText { text, page_count })
            }
            DocumentKind::Image => Ok(NativeText {
                text: String::new(),
                page_count: 1,
            }),
            DocumentKind::Text => {
                let text = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("failed to read {:?}", path.display()))?;
                Ok(NativeText {
                    text,
                    page_count: 1,
                })
            }
        }
    }
}

/// A document and its text.
#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub byte_len: u64,
    pub page_count: usize,
    /// Full text: the native text layer, or normalized OCR output.
    pub text: String,
    /// Did we have to OCR this document?
    pub scanned: bool,
    /// Average OCR confidence per page. Empty unless `scanned`.
    pub page_confidences: Vec<Option<f32>>,
    pub warnings: Vec<String>,
}

/// Produces a [`SourceDocument`] for each input file.
#[derive(Clone)]
pub struct TextAcquisition {
    extractor: Arc<dyn TextExtractor>,
    ocr: OcrOrchestrator,
    config: AcquisitionConfig,
}

impl TextAcquisition {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        ocr: OcrOrchestrator,
        config: AcquisitionConfig,
    ) -> Self {
        Self {
            extractor,
            ocr,
            config,
        }
    }

    /// The standard setup, using Poppler and Tesseract.
    pub fn with_external_tools(config: &PipelineConfig) -> Self {
        let ocr = OcrOrchestrator::new(
            Arc::new(PopplerRasterizer::new()),
            Arc::new(TesseractEngine::new()),
            config.ocr.clone(),
        );
        Self::new(
            Arc::new(PopplerTextExtractor::new()),
            ocr,
            config.acquisition.clone(),
        )
    }

    /// Read a document, running OCR if needed.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn acquire(&self, path: &Path, ctx: &DocContext) -> Result<SourceDocument> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|err| PipelineError::acquisition(path, err))?;
        let kind =
            DocumentKind::detect(path).map_err(|err| PipelineError::acquisition(path, err))?;
        let native = self
            .extractor
            .extract(path, kind)
            .await
            .map_err(|err| PipelineError::acquisition(path, err))?;

        let native_chars = native.text.trim().chars().count();
        let scanned = match kind {
            DocumentKind::Image => true,
            DocumentKind::Text => false,
            DocumentKind::Pdf => native_chars < self.config.min_text_chars,
        };
        ctx.in_scope(|| {
            debug!(?kind, native_chars, scanned, "Read native text layer");
        });

        if !scanned {
            return Ok(SourceDocument {
                path: path.to_owned(),
                byte_len: metadata.len(),
                page_count: native.page_count,
                text: native.text,
                scanned: false,
                page_confidences: vec![],
                warnings: vec![],
            });
        }

        ctx.in_scope(|| info!("Text layer too short, running OCR"));
        let ocr = self.ocr.run(path, ctx).await?;
        let text = ctx.in_scope(|| normalize_text(&ocr.text));
        Ok(SourceDocument {
            path: path.to_owned(),
            byte_len: metadata.len(),
            page_count: ocr.pages.len(),
            text,
            scanned: true,
            page_confidences: ocr.pages.iter().map(|page| page.confidence).collect(),
            warnings: ocr.warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::ocr::{
        engine::{Recognition, RecognitionEngine, RecognitionInput, RecognizedWord},
        rasterize::{RasterizedDocument, Rasterizer},
    };

    use super::*;

    /// Pretends every document is a one-page image with noisy OCR text.
    struct FakeRasterizer;

    #[async_trait]
    impl Rasterizer for FakeRasterizer {
        async fn rasterize(&self, path: &Path, _scale: f32) -> Result<RasterizedDocument> {
            Ok(RasterizedDocument::new(None, vec![path.to_owned()], false))
        }
    }

    struct FakeEngine;

    #[async_trait]
    impl RecognitionEngine for FakeEngine {
        async fn recognize(&self, _input: RecognitionInput) -> Result<Recognition> {
            let words = ["1", "G00DS", "ltem"]
                .into_iter()
                .map(|text| RecognizedWord {
                    text: text.to_owned(),
                    confidence: 80.0,
                    line: 0,
                })
                .collect();
            Ok(Recognition::from_words(words))
        }
    }

    fn acquisition() -> TextAcquisition {
        let config = PipelineConfig::default();
        let ocr = OcrOrchestrator::new(
            Arc::new(FakeRasterizer),
            Arc::new(FakeEngine),
            config.ocr.clone(),
        );
        TextAcquisition::new(
            Arc::new(PopplerTextExtractor::new()),
            ocr,
            config.acquisition,
        )
    }

    #[tokio::test]
    async fn text_files_are_used_as_is() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("document-test")?;
        let path = dir.path().join("declaration.txt");
        std::fs::write(&path, "1 G00DS ltem")?;
        let doc = acquisition()
            .acquire(&path, &DocContext::quiet("declaration.txt"))
            .await?;
        assert!(!doc.scanned);
        assert_eq!(doc.text, "1 G00DS ltem");
        assert_eq!(doc.byte_len, 12);
        assert_eq!(doc.page_count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn images_are_ocred_and_normalized() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("document-test")?;
        let path = dir.path().join("scan.png");
        image::GrayImage::from_pixel(8, 8, image::Luma([255])).save(&path)?;
        let doc = acquisition()
            .acquire(&path, &DocContext::quiet("scan.png"))
            .await?;
        assert!(doc.scanned);
        assert_eq!(doc.text, "1 Goods item");
        assert_eq!(doc.page_confidences, vec![Some(80.0)]);
        // The user's own image is never deleted.
        assert!(path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn missing_files_are_acquisition_errors() {
        let err = acquisition()
            .acquire(Path::new("/nonexistent/scan.pdf"), &DocContext::quiet("scan.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Acquisition { .. })
        ));
    }

    #[test]
    fn detects_kinds() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("document-test")?;
        let txt = dir.path().join("a.TXT");
        std::fs::write(&txt, "hello")?;
        assert_eq!(DocumentKind::detect(&txt)?, DocumentKind::Text);

        let pdf = dir.path().join("a.bin");
        std::fs::write(&pdf, b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n")?;
        assert_eq!(DocumentKind::detect(&pdf)?, DocumentKind::Pdf);

        let unknown = dir.path().join("a.dat");
        std::fs::write(&unknown, b"\x00\x01\x02\x03")?;
        assert!(DocumentKind::detect(&unknown).is_err());
        Ok(())
    }
}
