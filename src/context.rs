//! Per-document logging context.
//!
//! Every pipeline entry point takes a [`DocContext`] instead of reaching for
//! shared state. It carries the document's identifier, a `tracing` span that
//! all log output for the document is recorded under, and the UI used for
//! progress bars. Independent documents get independent contexts, so they can
//! be processed concurrently and tested in isolation.

use tracing::{Instrument as _, Span, instrument::Instrumented};

use crate::{prelude::*, ui::Ui};

/// Logging context for one document.
#[derive(Clone)]
pub struct DocContext {
    doc_id: String,
    span: Span,
    ui: Ui,
}

impl DocContext {
    /// Create a context for the document at `path`.
    pub fn for_path(path: &Path, ui: Ui) -> Self {
        let doc_id = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::new(doc_id, ui)
    }

    /// Create a context with an explicit document identifier.
    pub fn new(doc_id: impl Into<String>, ui: Ui) -> Self {
        let doc_id = doc_id.into();
        let span = tracing::info_span!("document", doc = %doc_id);
        Self { doc_id, span, ui }
    }

    /// A context that draws no progress bars, for unit tests.
    #[cfg(test)]
    pub fn quiet(doc_id: impl Into<String>) -> Self {
        Self::new(doc_id, Ui::hidden())
    }

    /// The document identifier used in logs and reports.
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// The UI for progress reporting.
    pub fn ui(&self) -> &Ui {
        &self.ui
    }

    /// Run a synchronous stage inside this document's span.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        self.span.in_scope(f)
    }

    /// Attach this document's span to a future.
    pub fn instrument<F: Future>(&self, future: F) -> Instrumented<F> {
        future.instrument(self.span.clone())
    }

    /// Log a recoverable problem and return it as a warning string.
    pub fn warning(&self, message: impl Into<String>) -> String {
        let message = message.into();
        self.in_scope(|| warn!("{}", message));
        message
    }
}
