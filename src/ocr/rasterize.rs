//! Turning documents into page images.

use crate::{
    document::DocumentKind,
    poppler::{get_pdf_page_count, pdf_to_pngs},
    prelude::*,
};

/// Page images for one document.
pub struct RasterizedDocument {
    /// Holds the page files, if we created them. Released by [`Drop`].
    tmpdir: Option<tempfile::TempDir>,
    /// Page images in page order.
    pages: Vec<PathBuf>,
    /// Should page files be deleted once they have been recognized? Never true
    /// for the user's own files.
    disposable: bool,
    /// Anything worth reporting from rasterization.
    warnings: Vec<String>,
}

impl RasterizedDocument {
    /// Create a document from page files.
    pub fn new(tmpdir: Option<tempfile::TempDir>, pages: Vec<PathBuf>, disposable: bool) -> Self {
        Self {
            tmpdir,
            pages,
            disposable,
            warnings: vec![],
        }
    }

    /// Page images in page order.
    pub fn pages(&self) -> &[PathBuf] {
        &self.pages
    }

    /// May we delete page files after use?
    pub fn is_disposable(&self) -> bool {
        self.disposable
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

impl Drop for RasterizedDocument {
    fn drop(&mut self) {
        // Delete our temporary directory, if we have one.
        if let Some(tmpdir) = self.tmpdir.take() {
            let tmpdir_path = tmpdir.path().to_owned();
            if let Err(err) = tmpdir.close() {
                error!(
                    directory = ?tmpdir_path.display(),
                    "failed to delete temporary directory: {}",
                    err
                );
            }
        }
    }
}

/// Something that can turn a document into page images.
#[async_trait]
pub trait Rasterizer: Send + Sync + 'static {
    /// Rasterize `path` at `scale` times 72 DPI.
    async fn rasterize(&self, path: &Path, scale: f32) -> Result<RasterizedDocument>;
}

/// Rasterizes PDFs with `pdftocairo`, and passes images through unchanged.
#[non_exhaustive]
pub struct PopplerRasterizer {}

impl PopplerRasterizer {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for PopplerRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Rasterizer for PopplerRasterizer {
    #[instrument(level = "debug", skip_all, fields(path = %path.display(), scale))]
    async fn rasterize(&self, path: &Path, scale: f32) -> Result<RasterizedDocument> {
        match DocumentKind::detect(path)? {
            DocumentKind::Image => Ok(RasterizedDocument::new(
                None,
                vec![path.to_owned()],
                false,
            )),
            DocumentKind::Pdf => {
                let expected_pages = get_pdf_page_count(path).await?;
                let tmpdir = tempfile::TempDir::with_prefix("pages")?;
                let dpi = (72.0 * scale).round() as u32;
                let rendered = pdf_to_pngs(path, dpi, tmpdir.path()).await?;
                if rendered.pages.len() != expected_pages {
                    return Err(anyhow!(
                        "pdftocairo produced {} pages, but {:?} has {}",
                        rendered.pages.len(),
                        path.display(),
                        expected_pages
                    ));
                }
                let mut doc = RasterizedDocument::new(Some(tmpdir), rendered.pages, true);
                doc.warnings = rendered.warnings;
                Ok(doc)
            }
            DocumentKind::Text => Err(anyhow!(
                "cannot rasterize plain text file {:?}",
                path.display()
            )),
        }
    }
}
