//! Pipeline configuration.
//!
//! Every setting has a default, so an empty (or missing) configuration file is
//! valid. Settings can be loaded from TOML or JSON with
//! [`crate::async_utils::io::read_json_or_toml`], and the most common knobs can
//! be overridden on the command line.

use clap::Args;
use schemars::JsonSchema;

use crate::{errors::PipelineError, prelude::*};

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub acquisition: AcquisitionConfig,
    pub ocr: OcrConfig,
    pub reconciliation: ReconciliationConfig,
    pub reference: ReferenceLayout,
}

/// How we obtain document text.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AcquisitionConfig {
    /// If the native text layer has fewer non-whitespace-trimmed characters
    /// than this, treat the document as scanned and run OCR.
    pub min_text_chars: usize,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            min_text_chars: 100,
        }
    }
}

/// OCR settings.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OcrConfig {
    /// Rasterization multiplier relative to 72 DPI.
    pub scale: f32,

    /// Pages processed concurrently per batch.
    pub batch_size: usize,

    /// Words below this confidence (0-100) are discarded.
    pub min_word_confidence: f32,

    /// Recognition languages, most important first.
    pub languages: Vec<String>,

    /// Binarization threshold applied after sharpening (0-255).
    pub binarize_threshold: u8,

    /// Give up on a single page after this many seconds.
    pub page_timeout_secs: Option<u64>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            scale: 3.0,
            batch_size: 3,
            min_word_confidence: 30.0,
            languages: vec!["mkd".to_owned(), "eng".to_owned()],
            binarize_threshold: 128,
            page_timeout_secs: None,
        }
    }
}

impl OcrConfig {
    /// Rasterization resolution in DPI.
    pub fn dpi(&self) -> u32 {
        (72.0 * self.scale).round() as u32
    }

    /// Languages in the `eng+deu` form expected by tesseract.
    pub fn tesseract_languages(&self) -> String {
        self.languages.join("+")
    }
}

/// Matching settings.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconciliationConfig {
    /// Item codes at least this similar (0.0-1.0) count as a match.
    pub similarity_threshold: f64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.75,
        }
    }
}

/// Cell layout of the reference spreadsheet. Columns are spreadsheet letters.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReferenceLayout {
    /// Worksheet name. The first sheet is used when unset.
    pub sheet: Option<String>,
    pub group_column: String,
    pub serial_column: String,
    pub code_column: String,
    pub name_column: String,
    pub quantity_column: String,
    /// First data row, 1-based.
    pub first_data_row: usize,
    /// Stop after this many consecutive rows with an empty item code.
    pub max_empty_code_run: usize,
}

impl Default for ReferenceLayout {
    fn default() -> Self {
        Self {
            sheet: None,
            group_column: "A".to_owned(),
            serial_column: "B".to_owned(),
            code_column: "C".to_owned(),
            name_column: "D".to_owned(),
            quantity_column: "E".to_owned(),
            first_data_row: 2,
            max_empty_code_run: 3,
        }
    }
}

/// Convert a column name like `A` or `AB` to a zero-based index.
pub fn column_index(column: &str) -> Result<usize> {
    let column = column.trim();
    if column.is_empty() || !column.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(anyhow!("invalid column name {:?}", column));
    }
    let mut index = 0usize;
    for c in column.chars() {
        let digit = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        index = index
            .checked_mul(26)
            .and_then(|i| i.checked_add(digit))
            .ok_or_else(|| anyhow!("column name {:?} is too long", column))?;
    }
    Ok(index - 1)
}

impl PipelineConfig {
    /// Load a configuration file, or use defaults.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => crate::async_utils::io::read_json_or_toml::<Self>(path)
                .await
                .with_context(|| format!("failed to load config {:?}", path.display())),
            None => Ok(Self::default()),
        }
    }

    /// Check that all settings are usable.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let bad = |msg: String| Err(PipelineError::Configuration(msg));

        let ocr = &self.ocr;
        if !(ocr.scale.is_finite() && ocr.scale > 0.0) {
            return bad(format!("ocr.scale must be positive, got {}", ocr.scale));
        }
        if ocr.batch_size == 0 {
            return bad("ocr.batch_size must be at least 1".to_owned());
        }
        if !(0.0..=100.0).contains(&ocr.min_word_confidence) {
            return bad(format!(
                "ocr.min_word_confidence must be between 0 and 100, got {}",
                ocr.min_word_confidence
            ));
        }
        if ocr.languages.is_empty() || ocr.languages.iter().any(|l| l.trim().is_empty())
        {
            return bad("ocr.languages must list at least one language".to_owned());
        }
        if ocr.page_timeout_secs == Some(0) {
            return bad("ocr.page_timeout_secs must be at least 1".to_owned());
        }

        let threshold = self.reconciliation.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return bad(format!(
                "reconciliation.similarity_threshold must be between 0 and 1, got {threshold}"
            ));
        }

        let layout = &self.reference;
        for (name, column) in [
            ("group_column", &layout.group_column),
            ("serial_column", &layout.serial_column),
            ("code_column", &layout.code_column),
            ("name_column", &layout.name_column),
            ("quantity_column", &layout.quantity_column),
        ] {
            if let Err(err) = column_index(column) {
                return bad(format!("reference.{name}: {err}"));
            }
        }
        if layout.first_data_row == 0 {
            return bad("reference.first_data_row is 1-based and must be at least 1".to_owned());
        }
        if layout.max_empty_code_run == 0 {
            return bad("reference.max_empty_code_run must be at least 1".to_owned());
        }
        Ok(())
    }
}

/// Command-line overrides for [`PipelineConfig`].
#[derive(Args, Clone, Debug, Default)]
pub struct ConfigOpts {
    /// TOML or JSON configuration file.
    #[clap(long = "config", value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    /// Minimum native text length before falling back to OCR.
    #[clap(long)]
    pub min_text_chars: Option<usize>,

    /// Rasterization multiplier for OCR (relative to 72 DPI).
    #[clap(long)]
    pub ocr_scale: Option<f32>,

    /// Number of pages to OCR concurrently.
    #[clap(long)]
    pub ocr_batch_size: Option<usize>,

    /// Minimum word confidence (0-100) to keep OCRed words.
    #[clap(long)]
    pub min_word_confidence: Option<f32>,

    /// OCR languages, e.g. `mkd+eng`.
    #[clap(long, value_delimiter = '+')]
    pub ocr_languages: Option<Vec<String>>,

    /// Item code similarity threshold (0.0-1.0).
    #[clap(long)]
    pub similarity_threshold: Option<f64>,
}

impl ConfigOpts {
    /// Load the config file (if any), apply overrides, and validate.
    pub async fn resolve(&self) -> Result<PipelineConfig> {
        let mut config = PipelineConfig::load(self.config_path.as_deref()).await?;
        self.apply(&mut config);
        config.validate()?;
        debug!(?config, "Resolved configuration");
        Ok(config)
    }

    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(min_text_chars) = self.min_text_chars {
            config.acquisition.min_text_chars = min_text_chars;
        }
        if let Some(scale) = self.ocr_scale {
            config.ocr.scale = scale;
        }
        if let Some(batch_size) = self.ocr_batch_size {
            config.ocr.batch_size = batch_size;
        }
        if let Some(confidence) = self.min_word_confidence {
            config.ocr.min_word_confidence = confidence;
        }
        if let Some(languages) = &self.ocr_languages {
            config.ocr.languages = languages.clone();
        }
        if let Some(threshold) = self.similarity_threshold {
            config.reconciliation.similarity_threshold = threshold;
        }
    }
}
