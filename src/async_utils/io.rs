//! I/O utilities.
//!
//! This module reads JSON and TOML configuration files, and writes output
//! records as JSON, JSONL or CSV, to either a file or standard output. Output
//! records arrive as async streams, so that large reports never need to be
//! buffered in memory twice.

use futures::{pin_mut, stream::StreamExt as _};
use serde::de::DeserializeOwned;
use tokio::{
    fs::File,
    io::{AsyncWrite, AsyncWriteExt as _, BufWriter},
};

use crate::prelude::*;

use super::BoxedStream;

/// Is this path a JSON-like file, judging by its extension?
fn is_json_like(path: &Path) -> bool {
    let ext = path.extension().unwrap_or_default();
    ext == "json" || ext == "jsonl"
}

/// Is this path a CSV file, judging by its extension?
pub fn is_csv(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

/// Read TOML or JSON from a file.
pub async fn read_json_or_toml<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    // Read all at once because our parsing libraries don't do async I/O.
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read file at path: {:?}", path))?;
    if is_json_like(path) {
        serde_json::from_str(&data).with_context(|| {
            format!("Failed to parse JSON from file at path: {:?}", path)
        })
    } else {
        toml::from_str(&data).with_context(|| {
            format!("Failed to parse TOML from file at path: {:?}", path)
        })
    }
}

/// Create an [`AsyncWrite`] for a file or stdout.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("Failed to create file at path: {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Write a single value as pretty-printed JSON.
pub async fn write_json_pretty<T>(path: Option<&Path>, value: &T) -> Result<()>
where
    T: Serialize,
{
    let mut writer = create_writer(path).await?;
    let json =
        serde_json::to_string_pretty(value).context("Failed to serialize JSON output")?;
    writer
        .write_all(json.as_bytes())
        .await
        .context("Failed to write JSON to output")?;
    writer
        .write_all(b"\n")
        .await
        .context("Failed to write newline to output")?;
    writer.flush().await.context("Failed to flush output")?;
    Ok(())
}

/// Write a stream of records as JSONL to either standard output or a file.
pub async fn write_output<T>(path: Option<&Path>, stream: BoxedStream<Result<T>>) -> Result<()>
where
    T: Serialize,
{
    let mut writer = BufWriter::new(create_writer(path).await?);
    pin_mut!(stream);
    while let Some(record) = stream.next().await {
        let record = record?;
        let json = serde_json::to_string(&record).context("Failed to serialize JSON record")?;
        writer
            .write_all(json.as_bytes())
            .await
            .context("Failed to write JSON to output")?;
        writer
            .write_all(b"\n")
            .await
            .context("Failed to write newline to output")?;
    }
    writer.flush().await.context("Failed to flush output")?;
    Ok(())
}

/// Write a stream of flat records as CSV to either standard output or a file.
pub async fn write_output_csv<T>(
    path: Option<&Path>,
    stream: BoxedStream<Result<T>>,
) -> Result<()>
where
    T: Serialize,
{
    let writer = create_writer(path).await?;
    let mut wtr = csv_async::AsyncSerializer::from_writer(writer);
    pin_mut!(stream);
    while let Some(record) = stream.next().await {
        let record = record?;
        wtr.serialize(&record)
            .await
            .context("Failed to write CSV record")?;
    }
    wtr.flush().await.context("Failed to flush CSV output")?;
    Ok(())
}

/// Write records as CSV if `path` ends in `.csv`, and as JSONL otherwise.
pub async fn write_records<T>(path: Option<&Path>, stream: BoxedStream<Result<T>>) -> Result<()>
where
    T: Serialize,
{
    match path {
        Some(p) if is_csv(p) => write_output_csv(path, stream).await,
        _ => write_output(path, stream).await,
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    #[derive(Debug, Serialize)]
    struct Record {
        id: u32,
        name: String,
    }

    fn records() -> BoxedStream<Result<Record>> {
        stream::iter(vec![
            Ok(Record {
                id: 1,
                name: "bolts".to_owned(),
            }),
            Ok(Record {
                id: 2,
                name: "nuts, small".to_owned(),
            }),
        ])
        .boxed()
    }

    #[tokio::test]
    async fn writes_csv_by_extension() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("io-test")?;
        let path = dir.path().join("out.csv");
        write_records(Some(&path), records()).await?;
        let text = std::fs::read_to_string(&path)?;
        assert_eq!(text, "id,name\n1,bolts\n2,\"nuts, small\"\n");
        Ok(())
    }

    #[tokio::test]
    async fn writes_jsonl_otherwise() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("io-test")?;
        let path = dir.path().join("out.jsonl");
        write_records(Some(&path), records()).await?;
        let text = std::fs::read_to_string(&path)?;
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"id":1,"name":"bolts"}"#);
        Ok(())
    }

    #[tokio::test]
    async fn reads_toml_and_json() -> Result<()> {
        #[derive(Debug, Deserialize)]
        struct Settings {
            threshold: f64,
        }
        let dir = tempfile::TempDir::with_prefix("io-test")?;
        let toml_path = dir.path().join("settings.toml");
        std::fs::write(&toml_path, "threshold = 0.5\n")?;
        let json_path = dir.path().join("settings.json");
        std::fs::write(&json_path, r#"{"threshold": 0.25}"#)?;
        assert_eq!(read_json_or_toml::<Settings>(&toml_path).await?.threshold, 0.5);
        assert_eq!(read_json_or_toml::<Settings>(&json_path).await?.threshold, 0.25);
        Ok(())
    }
}
