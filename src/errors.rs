//! Typed errors for the document pipeline.
//!
//! Most of the program uses [`anyhow`], but callers sometimes need to tell
//! failures apart. In particular, "we could not rasterize this document" is a
//! very different outcome from "OCR ran, but found nothing". Fatal variants are
//! returned wrapped in an [`anyhow::Error`] and can be recovered with
//! `downcast_ref::<PipelineError>()`. Recoverable variants are never returned;
//! they are rendered into warning strings and logged.

use thiserror::Error;

use crate::prelude::*;

/// A boxed source error, so that we can carry [`anyhow::Error`] values.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the extraction and reconciliation pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The document could not be opened or parsed at all.
    #[error("cannot read document {}", path.display())]
    Acquisition {
        path: PathBuf,
        #[source]
        source: BoxedSource,
    },

    /// A scanned document could not be converted to page images.
    #[error("cannot rasterize {} for OCR", path.display())]
    Rasterization {
        path: PathBuf,
        #[source]
        source: BoxedSource,
    },

    /// A single page failed recognition.
    #[error("page {page} could not be recognized: {message}")]
    Recognition { page: usize, message: String },

    /// A candidate item block did not contain a required field.
    #[error("item {serial}: {message}")]
    Extraction { serial: u32, message: String },

    /// A reference row could not be validated.
    #[error("row {row}: {message}")]
    Reconciliation { row: usize, message: String },

    /// Invalid settings.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl PipelineError {
    /// Build an [`PipelineError::Acquisition`] from any error.
    pub fn acquisition(path: &Path, source: impl Into<anyhow::Error>) -> Self {
        let source: anyhow::Error = source.into();
        Self::Acquisition {
            path: path.to_owned(),
            source: source.into(),
        }
    }

    /// Build an [`PipelineError::Rasterization`] from any error.
    pub fn rasterization(path: &Path, source: impl Into<anyhow::Error>) -> Self {
        let source: anyhow::Error = source.into();
        Self::Rasterization {
            path: path.to_owned(),
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rasterization_error_survives_anyhow_round_trip() {
        let err: anyhow::Error =
            PipelineError::rasterization(Path::new("scan.pdf"), anyhow!("bad xref"))
                .into();
        let err = err.context("while OCRing scan.pdf");
        let inner = err
            .downcast_ref::<PipelineError>()
            .expect("should find PipelineError");
        assert!(matches!(inner, PipelineError::Rasterization { .. }));
        assert_eq!(inner.to_string(), "cannot rasterize scan.pdf for OCR");
    }

    #[test]
    fn recognition_errors_render_as_warnings() {
        let err = PipelineError::Recognition {
            page: 2,
            message: "tesseract crashed".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "page 2 could not be recognized: tesseract crashed"
        );
    }
}
