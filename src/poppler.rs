//! Wrappers for the Poppler PDF tools.

use std::{collections::BTreeMap, sync::LazyLock};

use regex::Regex;
use tokio::process::Command;

use crate::{
    async_utils::{check_for_command_failure, run_cpu_bound_command},
    prelude::*,
};

/// A default error regex for checking command output.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

/// Errors Poppler reports for damaged but readable files.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line contain an error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// Get the number of pages in a PDF file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn get_pdf_page_count(path: &Path) -> Result<usize> {
    // Run pdfinfo to get the number of pages.
    let output = Command::new("pdfinfo")
        .arg(path)
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("failed to run pdfinfo on {:?}", path.display()))?;
    check_for_command_failure("pdfinfo", &output, None)?;

    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    parse_page_count(&output).with_context(|| {
        format!(
            "failed to parse page count for {:?} from pdfinfo output",
            path.display()
        )
    })
}

/// Find `Pages:` in `pdfinfo` output.
fn parse_page_count(pdfinfo_output: &str) -> Result<usize> {
    let properties = pdfinfo_output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect::<BTreeMap<_, _>>();
    let pages = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("failed to find page count in pdfinfo output"))?;
    Ok(pages.parse::<usize>()?)
}

/// Extract the text layer of a PDF with `pdftotext`.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn pdf_to_text(path: &Path) -> Result<String> {
    let mut command = Command::new("pdftotext");
    command.arg("-enc").arg("UTF-8").arg(path).arg("-");
    let output = run_cpu_bound_command(command, "pdftotext").await?;
    check_for_command_failure("pdftotext", &output, Some(&is_error_line))?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Rendered page images.
#[derive(Debug)]
pub struct RenderedPages {
    /// Page images in page order.
    pub pages: Vec<PathBuf>,
    /// Anything the tool printed.
    pub warnings: Vec<String>,
}

/// Render every page of a PDF to PNG files in `out_dir` with `pdftocairo`.
#[instrument(level = "debug", skip_all, fields(path = %path.display(), dpi))]
pub async fn pdf_to_pngs(path: &Path, dpi: u32, out_dir: &Path) -> Result<RenderedPages> {
    // pdftocairo adds zero-padded page numbers to this prefix, so the files
    // sort in page order.
    let out_prefix = out_dir.join("page");

    // `pdftocairo` will use _at least_ 100% of a CPU.
    let mut command = Command::new("pdftocairo");
    command
        .arg("-png")
        .arg("-r")
        .arg(dpi.to_string())
        .arg(path)
        .arg(&out_prefix);
    let output = run_cpu_bound_command(command, "pdftocairo").await?;
    check_for_command_failure("pdftocairo", &output, Some(&is_error_line))?;

    let mut pages = out_dir
        .read_dir()
        .with_context(|| format!("failed to read directory {:?}", out_dir.display()))?
        .map(|entry| {
            let entry = entry.with_context(|| {
                format!("failed to read entry in directory {:?}", out_dir.display())
            })?;
            Ok(entry.path())
        })
        .collect::<Result<Vec<_>>>()?;
    pages.retain(|page| page.extension().is_some_and(|ext| ext == "png"));
    pages.sort();

    // Keep whatever the tool printed, for diagnostics.
    let warnings = String::from_utf8_lossy(&output.stdout)
        .lines()
        .chain(String::from_utf8_lossy(&output.stderr).lines())
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect();
    Ok(RenderedPages { pages, warnings })
}
