//! I/O utilities.
//!
//! Config files may be TOML or JSON, and command output is JSON written either
//! to stdout or to a file.

use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncWrite, AsyncWriteExt as _};

use crate::prelude::*;

/// Read TOML or JSON from a file. Files ending in `.json` are parsed as JSON,
/// everything else as TOML.
pub async fn read_json_or_toml<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read file at path: {:?}", path))?;
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    if is_json {
        serde_json::from_str(&data).with_context(|| {
            format!("Failed to parse JSON from file at path: {:?}", path)
        })
    } else {
        toml::from_str(&data).with_context(|| {
            format!("Failed to parse TOML from file at path: {:?}", path)
        })
    }
}

/// Create a writer for either a file or stdout.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
    match path {
        Some(path) => {
            let file = tokio::fs::File::create(path).await.with_context(|| {
                format!("Failed to create file at path: {:?}", path)
            })?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Write a value as pretty-printed JSON, followed by a newline.
pub async fn write_json<T>(path: Option<&Path>, value: &T) -> Result<()>
where
    T: Serialize,
{
    let mut wtr = create_writer(path).await?;
    let mut json =
        serde_json::to_string_pretty(value).context("failed to serialize output")?;
    json.push('\n');
    wtr.write_all(json.as_bytes())
        .await
        .context("failed to write output")?;
    wtr.flush().await.context("failed to flush output")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        size: u32,
    }

    #[tokio::test]
    async fn reads_json_and_toml_by_extension() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("io")?;
        let json_path = dir.path().join("sample.json");
        let toml_path = dir.path().join("sample.toml");
        tokio::fs::write(&json_path, r#"{"name": "a", "size": 1}"#).await?;
        tokio::fs::write(&toml_path, "name = \"b\"\nsize = 2\n").await?;

        let from_json: Sample = read_json_or_toml(&json_path).await?;
        let from_toml: Sample = read_json_or_toml(&toml_path).await?;
        assert_eq!(from_json, Sample { name: "a".into(), size: 1 });
        assert_eq!(from_toml, Sample { name: "b".into(), size: 2 });
        Ok(())
    }

    #[tokio::test]
    async fn write_json_to_file() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("io")?;
        let path = dir.path().join("out.json");
        write_json(Some(&path), &serde_json::json!({ "ok": true })).await?;
        let text = tokio::fs::read_to_string(&path).await?;
        assert!(text.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(&text)?;
        assert_eq!(value["ok"], true);
        Ok(())
    }
}
