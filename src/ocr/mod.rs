//! OCR engine interface.

use async_trait::async_trait;
use image::GrayImage;

use crate::prelude::*;

pub mod tesseract;

pub use self::tesseract::TesseractOcrEngine;

/// Something that can read text out of an image.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize all the text in a grayscale image.
    async fn recognize(&self, image: &GrayImage) -> Result<String>;
}
