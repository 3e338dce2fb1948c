//! Pull identity fields out of the fixed-layout source PDF.
//!
//! Text fields come from fixed boxes on page 1. The two structured numbers
//! are found by pattern anywhere on page 1, and the ID number falls back to
//! OCR of one known embedded image when the text layer doesn't have it.

use std::sync::LazyLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::Serialize;

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    config::ExtractionConfig,
    degradation::Degradation,
    ocr::OcrEngine,
    photo::decode_image,
    prelude::*,
};

pub mod layout;
pub mod poppler;

use self::{
    layout::PageLayout,
    poppler::{ImageAsset, ImageOrigin},
};

/// Three groups of four digits: a national ID number (FIN).
static NATIONAL_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{4}\s\d{4}\s\d{4}\b").expect("failed to compile regex")
});

/// Four groups of four digits: a file number (FAN).
static FILE_NUMBER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{4}\s\d{4}\s\d{4}\s\d{4}\b").expect("failed to compile regex")
});

/// The fields we recover from one document. Every field always has a value;
/// anything we couldn't find holds the configured not-found text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, JsonSchema)]
pub struct ExtractedFieldRecord {
    /// Display lines of the full name.
    pub fullname: Vec<String>,
    /// `DD/MM/YYYY`, as printed in the document.
    pub date_of_birth: String,
    pub sex: String,
    pub nationality: String,
    /// May be empty.
    pub phone: String,
    pub region: Vec<String>,
    pub zone: Vec<String>,
    pub woreda: Vec<String>,
    /// 12 digits (FIN), or the not-found text.
    pub national_id_number: String,
    /// 16 digits (FAN), or the not-found text.
    pub file_number: String,
}

/// The result of running a [`FieldExtractor`].
#[derive(Debug)]
pub struct Extraction {
    pub record: ExtractedFieldRecord,
    pub degradations: Vec<Degradation>,
}

/// The national ID number from page text. When the page has several
/// candidates we take the *last* one: other digit runs appear above the real
/// ID in this layout.
pub fn last_national_id(text: &str) -> Option<String> {
    NATIONAL_ID_REGEX
        .find_iter(text)
        .last()
        .map(|m| digits_only(m.as_str()))
}

/// The first national ID number in `text`. Used for OCR output, where the
/// image holds nothing but the ID.
pub fn first_national_id(text: &str) -> Option<String> {
    NATIONAL_ID_REGEX
        .find(text)
        .map(|m| digits_only(m.as_str()))
}

/// The file number from page text. Unlike the ID number, we take the *first*
/// candidate.
pub fn first_file_number(text: &str) -> Option<String> {
    FILE_NUMBER_REGEX
        .find(text)
        .map(|m| digits_only(m.as_str()))
}

fn digits_only(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Split a field into display lines, starting a new line at each `marker`.
pub fn split_display_lines(raw: &str, marker: &str) -> Vec<String> {
    let text = if marker.is_empty() {
        raw.to_owned()
    } else {
        raw.replace(marker, "\n")
    };
    text.lines().map(str::to_owned).collect()
}

/// Recovers an [`ExtractedFieldRecord`] from page 1 of a document.
pub struct FieldExtractor<'a> {
    config: &'a ExtractionConfig,
    ocr: &'a dyn OcrEngine,
}

impl<'a> FieldExtractor<'a> {
    pub fn new(config: &'a ExtractionConfig, ocr: &'a dyn OcrEngine) -> Self {
        Self { config, ocr }
    }

    /// Extract all fields. This never fails: anything we can't recover is
    /// replaced by the not-found text and reported as a [`Degradation`].
    #[instrument(level = "debug", skip_all)]
    pub async fn extract(&self, page: &PageLayout, images: &[ImageAsset]) -> Extraction {
        let mut degradations = vec![];
        let full_text = page.text();

        let national_id_number = match last_national_id(&full_text) {
            Some(number) => number,
            None => {
                debug!("No ID number in page text, trying OCR");
                match self.national_id_from_ocr(images, &mut degradations).await {
                    Some(number) => number,
                    None => self.not_found("national_id_number", &mut degradations),
                }
            }
        };
        let file_number = match first_file_number(&full_text) {
            Some(number) => number,
            None => self.not_found("file_number", &mut degradations),
        };

        let regions = &self.config.regions;
        let mut line = |name: &str, raw: String| {
            if raw.is_empty() {
                self.not_found(name, &mut degradations)
            } else {
                raw
            }
        };
        let date_of_birth = line("date_of_birth", page.text_in(&regions.date_of_birth));
        let sex = line("sex", page.text_in(&regions.sex));
        let nationality = line("nationality", page.text_in(&regions.nationality));
        // A missing phone number is normal, so it stays empty.
        let phone = page.text_in(&regions.phone);

        let mut lines = |name: &str, raw: String| {
            let lines = split_display_lines(&raw, &self.config.line_break_marker);
            if lines.iter().all(|l| l.trim().is_empty()) {
                vec![self.not_found(name, &mut degradations)]
            } else {
                lines
            }
        };
        let fullname = lines("fullname", page.text_in(&regions.fullname));
        let region = lines("region", page.text_in(&regions.region));
        let zone = lines("zone", page.text_in(&regions.zone));
        let woreda = lines("woreda", page.text_in(&regions.woreda));

        Extraction {
            record: ExtractedFieldRecord {
                fullname,
                date_of_birth,
                sex,
                nationality,
                phone,
                region,
                zone,
                woreda,
                national_id_number,
                file_number,
            },
            degradations,
        }
    }

    /// Record a missing field and return the not-found text.
    fn not_found(&self, field: &str, degradations: &mut Vec<Degradation>) -> String {
        Degradation::FieldUnrecoverable {
            field: field.to_owned(),
        }
        .record(degradations);
        self.config.not_found_text.clone()
    }

    /// OCR the designated embedded image and look for an ID number in it.
    async fn national_id_from_ocr(
        &self,
        images: &[ImageAsset],
        degradations: &mut Vec<Degradation>,
    ) -> Option<String> {
        let wanted = self.config.ocr_source_image;
        let candidates = images.iter().filter(|asset| {
            asset.origin
                == ImageOrigin::Embedded {
                    page: wanted.page,
                    index: wanted.index,
                }
        });
        for asset in candidates {
            match self.ocr_image(&asset.path).await {
                Ok(text) => {
                    if let Some(number) = first_national_id(&text) {
                        info!(path = %asset.path.display(), "Recovered ID number with OCR");
                        return Some(number);
                    }
                    debug!(path = %asset.path.display(), "No ID number in OCR output");
                }
                Err(err) => Degradation::OcrUnavailable {
                    reason: format!("{err:#}"),
                }
                .record(degradations),
            }
        }
        None
    }

    async fn ocr_image(&self, path: &Path) -> Result<String> {
        let path = path.to_owned();
        let gray = spawn_blocking_propagating_panics(move || {
            decode_image(&path).map(|image| image.into_luma8())
        })
        .await?;
        self.ocr.recognize(&gray).await
    }
}
