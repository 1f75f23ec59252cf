//! Tesseract OCR engine.

use tokio::process::Command;

use crate::{
    async_utils::{check_for_command_failure, run_cpu_bound_command},
    prelude::*,
};

use super::engine::{Recognition, RecognitionEngine, RecognitionInput, RecognizedWord};

/// Tesseract's TSV "level" for individual words.
const WORD_LEVEL: u32 = 5;

/// OCR engine wrapping the `tesseract` CLI tool.
#[non_exhaustive]
pub struct TesseractEngine {}

impl TesseractEngine {
    /// Create a new `tesseract` engine.
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecognitionEngine for TesseractEngine {
    #[instrument(level = "debug", skip_all, fields(page = %input.page_index))]
    async fn recognize(&self, input: RecognitionInput) -> Result<Recognition> {
        // Ask for TSV on stdout, which includes per-word confidences.
        //
        // `tesseract` will use at least a full CPU per page.
        let mut command = Command::new("tesseract");
        command
            .arg(&input.image_path)
            .arg("stdout")
            .arg("-l")
            .arg(&input.languages)
            .arg("tsv");
        let output = run_cpu_bound_command(command, "tesseract").await?;
        check_for_command_failure("tesseract", &output, None)?;

        let tsv =
            String::from_utf8(output.stdout).context("tesseract output was not valid UTF-8")?;
        parse_tsv(&tsv)
    }
}

/// A row of tesseract TSV output.
#[derive(Debug, Deserialize)]
struct TsvRow {
    level: u32,
    block_num: u32,
    par_num: u32,
    line_num: u32,
    /// `-1` for non-word rows.
    conf: f32,
    #[serde(default)]
    text: String,
}

/// Parse tesseract's TSV output into words with sequential line numbers.
fn parse_tsv(tsv: &str) -> Result<Recognition> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .flexible(true)
        .from_reader(tsv.as_bytes());

    let mut words = vec![];
    let mut last_line_key = None;
    let mut line = 0;
    for row in rdr.deserialize::<TsvRow>() {
        let row = row.context("cannot parse tesseract TSV output")?;
        let text = row.text.trim();
        if row.level != WORD_LEVEL || text.is_empty() || row.conf < 0.0 {
            continue;
        }
        let line_key = (row.block_num, row.par_num, row.line_num);
        if let Some(last) = last_line_key
            && last != line_key
        {
            line += 1;
        }
        last_line_key = Some(line_key);
        words.push(RecognizedWord {
            text: text.to_owned(),
            confidence: row.conf,
            line,
        });
    }
    Ok(Recognition::from_words(words))
}
