//! Tesseract OCR engine.

use async_trait::async_trait;
use image::{GrayImage, ImageFormat};
use tokio::process::Command;

use crate::{
    async_utils::{check_for_command_failure, spawn_blocking_propagating_panics},
    cpu_limit::with_cpu_semaphore,
    prelude::*,
};

use super::OcrEngine;

/// OCR engine wrapping the `tesseract` CLI tool.
#[non_exhaustive]
pub struct TesseractOcrEngine {
    /// The executable to run.
    command: String,
}

impl TesseractOcrEngine {
    /// Create a new `tesseract` engine.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcrEngine {
    #[instrument(level = "debug", skip_all, fields(width = image.width(), height = image.height()))]
    async fn recognize(&self, image: &GrayImage) -> Result<String> {
        // Write our input to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let input_path = tmpdir.path().join("input.png");
        let image = image.clone();
        let write_path = input_path.clone();
        spawn_blocking_propagating_panics(move || {
            image
                .save_with_format(&write_path, ImageFormat::Png)
                .context("cannot write tesseract input file")
        })
        .await?;

        // Run tesseract on the input file, sending the text to stdout.
        let output = with_cpu_semaphore(|| async {
            Command::new(&self.command)
                .arg(&input_path)
                .arg("stdout")
                .output()
                .await
                .with_context(|| format!("cannot run {}", self.command))
        })
        .await?;
        check_for_command_failure(&self.command, &output, None)?;

        String::from_utf8(output.stdout).context("tesseract output was not valid UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let engine = TesseractOcrEngine::new("definitely-not-tesseract-binary");
        let image = GrayImage::new(8, 8);
        assert!(engine.recognize(&image).await.is_err());
    }

    #[tokio::test]
    #[ignore = "Requires tesseract to be installed"]
    async fn blank_image_yields_no_digits() -> Result<()> {
        let engine = TesseractOcrEngine::new("tesseract");
        let image = GrayImage::from_pixel(200, 60, image::Luma([255]));
        let text = engine.recognize(&image).await?;
        assert!(!text.chars().any(|c| c.is_ascii_digit()));
        Ok(())
    }
}
