//! Pipeline configuration.
//!
//! All coordinates and sizes in here were calibrated against one fixed
//! document layout and one card template. They live in a table instead of in
//! the extraction and compositing code so that recalibrating for a new
//! template revision only means editing a config file.

use clap::Args;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{async_utils::io::read_json_or_toml, prelude::*, storage::StorageDirs};

/// Default text drawn for any field we could not recover ("Not Found").
pub const DEFAULT_NOT_FOUND_TEXT: &str = "Hin Argamne";

/// Pixels whose red, green and blue channels all exceed this value are
/// treated as background and made transparent.
pub const DEFAULT_BACKGROUND_THRESHOLD: u8 = 220;

/// How long a card is valid for, in years.
pub const DEFAULT_VALIDITY_YEARS: u32 = 8;

/// Command-line options for loading a [`PipelineConfig`].
#[derive(Args, Clone, Debug)]
pub struct ConfigOpts {
    /// Path to a TOML or JSON config file. Missing keys use built-in defaults.
    #[clap(long = "config", value_name = "PATH")]
    pub config_path: Option<PathBuf>,
}

impl ConfigOpts {
    /// Load the configuration, or fall back to the defaults.
    pub async fn load(&self) -> Result<PipelineConfig> {
        match &self.config_path {
            Some(path) => PipelineConfig::load(path).await,
            None => Ok(PipelineConfig::default()),
        }
    }
}

/// Everything the pipeline needs to know that isn't part of a submission.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Where uploads, extracted images and finished cards are written.
    pub storage: StorageDirs,
    /// How fields are located in the source PDF.
    pub extraction: ExtractionConfig,
    /// External OCR settings.
    pub ocr: OcrConfig,
    /// How the card is drawn.
    pub card: CardConfig,
}

impl PipelineConfig {
    /// Load a config file, detecting TOML or JSON from the extension.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Self> {
        let config: Self = read_json_or_toml(path).await?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would only fail later, halfway through a run.
    pub fn validate(&self) -> Result<()> {
        let layout = &self.card.layout;
        for (name, stamp) in [
            ("issue_gregorian", &layout.issue_gregorian),
            ("issue_ethiopian", &layout.issue_ethiopian),
        ] {
            if stamp.rotation_degrees % 90 != 0 {
                return Err(anyhow!(
                    "card.layout.{name}.rotation_degrees must be a multiple of 90, got {}",
                    stamp.rotation_degrees
                ));
            }
        }
        for (name, region) in self.extraction.regions.iter() {
            if region.x1 <= region.x0 || region.y1 <= region.y0 {
                return Err(anyhow!("extraction region {name} is empty: {region:?}"));
            }
        }
        Ok(())
    }
}

/// A rectangle on a PDF page, in points, with the origin at the top left.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Region {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Region {
    pub const fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }
}

/// Where each text field sits on the first page of the source PDF.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct FieldRegions {
    pub fullname: Region,
    pub date_of_birth: Region,
    pub sex: Region,
    pub nationality: Region,
    pub phone: Region,
    pub region: Region,
    pub zone: Region,
    pub woreda: Region,
}

impl FieldRegions {
    /// Iterate over `(field name, region)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Region)> {
        [
            ("fullname", &self.fullname),
            ("date_of_birth", &self.date_of_birth),
            ("sex", &self.sex),
            ("nationality", &self.nationality),
            ("phone", &self.phone),
            ("region", &self.region),
            ("zone", &self.zone),
            ("woreda", &self.woreda),
        ]
        .into_iter()
    }
}

impl Default for FieldRegions {
    fn default() -> Self {
        Self {
            fullname: Region::new(50.0, 360.0, 300.0, 372.0),
            date_of_birth: Region::new(50.0, 430.0, 300.0, 435.0),
            sex: Region::new(50.0, 500.0, 300.0, 510.0),
            nationality: Region::new(50.0, 560.0, 300.0, 575.0),
            phone: Region::new(50.0, 600.0, 300.0, 625.0),
            region: Region::new(50.0, 400.0, 300.0, 410.0),
            zone: Region::new(50.0, 460.0, 400.0, 470.0),
            woreda: Region::new(50.0, 527.0, 300.0, 537.0),
        }
    }
}

/// Identifies one embedded image by its 1-based page number and its 0-based
/// index among the images on that page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct EmbeddedImageRef {
    pub page: usize,
    pub index: usize,
}

/// Settings for [`crate::extract`].
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractionConfig {
    /// Field bounding boxes on page 1.
    pub regions: FieldRegions,
    /// Separator the document uses between the two scripts of a bilingual
    /// field. Each occurrence starts a new display line.
    pub line_break_marker: String,
    /// The embedded image that holds the ID number when it isn't in the
    /// text layer.
    pub ocr_source_image: EmbeddedImageRef,
    /// Text used for any field we could not recover.
    pub not_found_text: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            regions: FieldRegions::default(),
            line_break_marker: "| ".to_owned(),
            ocr_source_image: EmbeddedImageRef { page: 1, index: 3 },
            not_found_text: DEFAULT_NOT_FOUND_TEXT.to_owned(),
        }
    }
}

/// Settings for the external OCR engine.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct OcrConfig {
    /// The `tesseract` executable to run.
    pub command: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            command: "tesseract".to_owned(),
        }
    }
}

/// Settings for [`crate::compose`].
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct CardConfig {
    /// The blank card image we draw onto.
    pub template_path: PathBuf,
    /// A TrueType font with Ethiopic coverage.
    pub font_path: PathBuf,
    /// Fonts to try, in order, if `font_path` can't be loaded.
    pub fallback_font_paths: Vec<PathBuf>,
    /// See [`DEFAULT_BACKGROUND_THRESHOLD`].
    pub background_threshold: u8,
    /// See [`DEFAULT_VALIDITY_YEARS`].
    pub validity_years: u32,
    /// RGBA color for all text.
    pub text_color: [u8; 4],
    /// Where everything goes.
    pub layout: CardLayout,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            template_path: PathBuf::from("static/id_card_template.png"),
            font_path: PathBuf::from("fonts/AbyssinicaSIL-Regular.ttf"),
            fallback_font_paths: [
                "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
                "/usr/share/fonts/dejavu/DejaVuSans.ttf",
                "/usr/share/fonts/TTF/DejaVuSans.ttf",
                "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
                "/System/Library/Fonts/Supplemental/Arial.ttf",
                "C:\\Windows\\Fonts\\arial.ttf",
            ]
            .into_iter()
            .map(PathBuf::from)
            .collect(),
            background_threshold: DEFAULT_BACKGROUND_THRESHOLD,
            validity_years: DEFAULT_VALIDITY_YEARS,
            text_color: [0, 0, 0, 255],
            layout: CardLayout::default(),
        }
    }
}

/// A box on the card that a photo is resized into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PhotoPlacement {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

/// Where a piece of text starts on the card, and how big it is.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TextPlacement {
    pub x: i32,
    pub y: i32,
    /// Em size in pixels.
    pub size: f32,
    /// Extra pixels between lines, for multi-line fields.
    #[serde(default)]
    pub line_spacing: f32,
}

impl TextPlacement {
    const fn new(x: i32, y: i32, size: f32) -> Self {
        Self {
            x,
            y,
            size,
            line_spacing: 0.0,
        }
    }

    const fn multiline(x: i32, y: i32, size: f32, line_spacing: f32) -> Self {
        Self {
            x,
            y,
            size,
            line_spacing,
        }
    }
}

/// Text drawn on its own surface and rotated before pasting.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RotatedTextPlacement {
    pub x: i64,
    pub y: i64,
    pub size: f32,
    /// Counter-clockwise rotation. Must be a multiple of 90.
    pub rotation_degrees: u32,
}

/// The fixed table of destinations on the card template.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct CardLayout {
    pub embedded_photo_large: PhotoPlacement,
    pub embedded_photo_small: PhotoPlacement,
    pub user_photo: PhotoPlacement,
    pub fullname: TextPlacement,
    pub date_of_birth: TextPlacement,
    pub sex: TextPlacement,
    pub nationality: TextPlacement,
    pub region: TextPlacement,
    pub zone: TextPlacement,
    pub woreda: TextPlacement,
    pub phone: TextPlacement,
    pub file_number: TextPlacement,
    pub expiry: TextPlacement,
    pub national_id: TextPlacement,
    pub serial_number: TextPlacement,
    pub issue_gregorian: RotatedTextPlacement,
    pub issue_ethiopian: RotatedTextPlacement,
}

impl Default for CardLayout {
    fn default() -> Self {
        Self {
            embedded_photo_large: PhotoPlacement {
                x: 65,
                y: 200,
                width: 310,
                height: 400,
            },
            embedded_photo_small: PhotoPlacement {
                x: 800,
                y: 450,
                width: 100,
                height: 135,
            },
            user_photo: PhotoPlacement {
                x: 1550,
                y: 30,
                width: 530,
                height: 550,
            },
            fullname: TextPlacement::multiline(405, 170, 37.0, 8.0),
            date_of_birth: TextPlacement::new(405, 305, 32.0),
            sex: TextPlacement::new(405, 375, 32.0),
            nationality: TextPlacement::new(1130, 165, 32.0),
            region: TextPlacement::multiline(1130, 235, 28.0, 5.0),
            zone: TextPlacement::multiline(1130, 315, 28.0, 5.0),
            woreda: TextPlacement::multiline(1130, 390, 28.0, 5.0),
            phone: TextPlacement::new(1130, 65, 32.0),
            file_number: TextPlacement::new(470, 500, 32.0),
            expiry: TextPlacement::new(405, 440, 32.0),
            national_id: TextPlacement::new(1265, 545, 25.0),
            serial_number: TextPlacement::new(1930, 595, 26.0),
            issue_gregorian: RotatedTextPlacement {
                x: 13,
                y: 120,
                size: 25.0,
                rotation_degrees: 90,
            },
            issue_ethiopian: RotatedTextPlacement {
                x: 13,
                y: 390,
                size: 25.0,
                rotation_degrees: 90,
            },
        }
    }
}
