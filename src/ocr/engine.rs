//! Interface to OCR engines.

use crate::prelude::*;

/// Input for [`RecognitionEngine::recognize`].
#[derive(Clone, Debug)]
pub struct RecognitionInput {
    /// Zero-based page index, for logging.
    pub page_index: usize,
    /// A preprocessed page image.
    pub image_path: PathBuf,
    /// Languages in `mkd+eng` form.
    pub languages: String,
}

/// A single recognized word.
#[derive(Clone, Debug, PartialEq)]
pub struct RecognizedWord {
    pub text: String,
    /// Engine confidence, 0-100.
    pub confidence: f32,
    /// Sequential line number on the page. Words on the same line share it.
    pub line: usize,
}

/// Everything an engine found on a page.
#[derive(Clone, Debug, Default)]
pub struct Recognition {
    /// Words in reading order.
    pub words: Vec<RecognizedWord>,
    /// Average word confidence, if the engine reported any words.
    pub overall_confidence: Option<f32>,
}

impl Recognition {
    /// Build from words, computing `overall_confidence`.
    pub fn from_words(words: Vec<RecognizedWord>) -> Self {
        let overall_confidence = (!words.is_empty()).then(|| {
            words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32
        });
        Self {
            words,
            overall_confidence,
        }
    }

    /// Text made only of words with at least `min_confidence`. Words are
    /// joined with spaces and lines with newlines.
    pub fn filtered_text(&self, min_confidence: f32) -> String {
        join_lines(
            self.words
                .iter()
                .filter(|word| word.confidence >= min_confidence),
        )
    }
}

fn join_lines<'a>(words: impl Iterator<Item = &'a RecognizedWord>) -> String {
    let mut text = String::new();
    let mut current_line = None;
    for word in words {
        match current_line {
            Some(line) if line == word.line => text.push(' '),
            Some(_) => text.push('\n'),
            None => {}
        }
        text.push_str(&word.text);
        current_line = Some(word.line);
    }
    text
}

/// An OCR engine.
#[async_trait]
pub trait RecognitionEngine: Send + Sync + 'static {
    /// Recognize the text on one page image.
    async fn recognize(&self, input: RecognitionInput) -> Result<Recognition>;
}
