//! Assembling the finished card image.

use chrono::NaiveDate;
use image::{ImageFormat, Rgba, RgbaImage};
use schemars::JsonSchema;
use serde::Serialize;

use crate::{
    calendar::CardValidity,
    config::{CardConfig, PhotoPlacement, RotatedTextPlacement, TextPlacement},
    degradation::{Degradation, PhotoSlot},
    extract::ExtractedFieldRecord,
    photo::load_normalized,
    prelude::*,
    storage::unique_path,
};

use self::{
    canvas::{Canvas, resize_premultiplied},
    fonts::CardFont,
};

pub mod canvas;
pub mod fonts;

/// The photos to place on a card. Either may be absent.
#[derive(Clone, Debug, Default)]
pub struct CardPhotos {
    /// The portrait found in the source PDF. Drawn twice.
    pub embedded_photo: Option<PathBuf>,
    /// The photo uploaded with the PDF.
    pub user_photo: Option<PathBuf>,
}

/// A card we wrote to disk.
#[derive(Clone, Debug, Serialize, JsonSchema)]
pub struct ComposedCard {
    pub path: PathBuf,
    /// Issue and expiry dates, as printed.
    pub validity: CardValidity,
    pub serial_number: u32,
    pub degradations: Vec<Degradation>,
}

/// Draws cards onto a template.
pub struct CardCompositor {
    card: CardConfig,
    cards_dir: PathBuf,
}

impl CardCompositor {
    pub fn new(card: CardConfig, cards_dir: PathBuf) -> Self {
        Self { card, cards_dir }
    }

    /// Compose and save a card. This blocks, so async callers should run it
    /// on a blocking thread.
    ///
    /// Only a missing or unreadable template is an error. Missing photos are
    /// recorded in the result and left off the card. Missing fonts are
    /// recorded and replaced by a fallback.
    #[instrument(level = "debug", skip_all, fields(national_id = %national_id))]
    pub fn compose(
        &self,
        record: &ExtractedFieldRecord,
        photos: &CardPhotos,
        national_id: &str,
        issued_on: NaiveDate,
    ) -> Result<ComposedCard> {
        let mut degradations = vec![];
        let layout = &self.card.layout;
        let validity = CardValidity::starting(issued_on, self.card.validity_years)?;
        let serial_number = random_serial_number();

        let mut canvas = Canvas::from_template(&self.card.template_path)?;

        if let Some(photo) = self.load_photo(
            PhotoSlot::Embedded,
            photos.embedded_photo.as_deref(),
            &mut degradations,
        ) {
            paste_resized(&mut canvas, &photo, &layout.embedded_photo_large);
            paste_resized(&mut canvas, &photo, &layout.embedded_photo_small);
        }
        if let Some(photo) = self.load_photo(
            PhotoSlot::User,
            photos.user_photo.as_deref(),
            &mut degradations,
        ) {
            paste_resized(&mut canvas, &photo, &layout.user_photo);
        }

        let font = CardFont::load_with_fallback(
            &self.card.font_path,
            &self.card.fallback_font_paths,
            &mut degradations,
        )?;
        let mut text = TextPen {
            canvas: &mut canvas,
            font: &font,
            color: Rgba(self.card.text_color),
        };
        text.lines(&layout.fullname, &record.fullname);
        text.line(&layout.date_of_birth, &record.date_of_birth);
        text.line(&layout.sex, &record.sex);
        text.line(&layout.nationality, &record.nationality);
        text.lines(&layout.region, &record.region);
        text.lines(&layout.zone, &record.zone);
        text.lines(&layout.woreda, &record.woreda);
        text.line(&layout.phone, &record.phone);
        text.line(&layout.file_number, &record.file_number);
        text.line(&layout.expiry, &validity.expires.combined_text());
        text.line(&layout.national_id, national_id);
        text.line(&layout.serial_number, &format!(" {serial_number}"));
        text.rotated(&layout.issue_gregorian, &validity.issued.gregorian_text())?;
        text.rotated(&layout.issue_ethiopian, &validity.issued.ethiopian_text())?;

        let path = unique_path(&self.cards_dir, "id", "png");
        canvas
            .into_opaque()
            .save_with_format(&path, ImageFormat::Png)
            .with_context(|| format!("cannot write card {:?}", path.display()))?;
        info!(path = %path.display(), degradations = degradations.len(), "Wrote card");
        Ok(ComposedCard {
            path,
            validity,
            serial_number,
            degradations,
        })
    }

    /// Load and normalize one photo slot, recording why if we can't.
    fn load_photo(
        &self,
        slot: PhotoSlot,
        path: Option<&Path>,
        degradations: &mut Vec<Degradation>,
    ) -> Option<RgbaImage> {
        let Some(path) = path else {
            Degradation::AssetMissing {
                slot,
                reason: "no photo available".to_owned(),
            }
            .record(degradations);
            return None;
        };
        match load_normalized(path, self.card.background_threshold) {
            Ok(photo) => Some(photo),
            Err(err) => {
                Degradation::AssetMissing {
                    slot,
                    reason: format!("{err:#}"),
                }
                .record(degradations);
                None
            }
        }
    }
}

/// Text drawing with a fixed font and color.
struct TextPen<'a> {
    canvas: &'a mut Canvas,
    font: &'a CardFont,
    color: Rgba<u8>,
}

impl TextPen<'_> {
    fn line(&mut self, at: &TextPlacement, text: &str) {
        self.canvas
            .draw_text(self.font, at.size, at.x, at.y, text, self.color);
    }

    fn lines(&mut self, at: &TextPlacement, lines: &[String]) {
        self.canvas.draw_lines(
            self.font,
            at.size,
            at.x,
            at.y,
            lines,
            at.line_spacing,
            self.color,
        );
    }

    fn rotated(&mut self, at: &RotatedTextPlacement, text: &str) -> Result<()> {
        self.canvas.draw_rotated_text(
            self.font,
            at.size,
            at.x,
            at.y,
            text,
            at.rotation_degrees,
            self.color,
        )
    }
}

fn paste_resized(canvas: &mut Canvas, photo: &RgbaImage, at: &PhotoPlacement) {
    let resized = resize_premultiplied(photo, at.width, at.height);
    canvas.paste_with_alpha(&resized, at.x, at.y);
}

/// A cosmetic 8-digit serial number. Not unique, and not stored anywhere.
pub fn random_serial_number() -> u32 {
    rand::random_range(10_000_000..=99_999_999)
}

#[cfg(test)]
mod tests {
    use image::RgbImage;

    use super::*;
    use crate::config::DEFAULT_NOT_FOUND_TEXT;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const RED: Rgba<u8> = Rgba([200, 0, 0, 255]);

    fn sentinel_record() -> ExtractedFieldRecord {
        let missing = DEFAULT_NOT_FOUND_TEXT.to_owned();
        ExtractedFieldRecord {
            fullname: vec![missing.clone()],
            date_of_birth: missing.clone(),
            sex: missing.clone(),
            nationality: missing.clone(),
            phone: String::new(),
            region: vec![missing.clone()],
            zone: vec![missing.clone()],
            woreda: vec![missing.clone()],
            national_id_number: missing.clone(),
            file_number: missing,
        }
    }

    /// A compositor with a blank template and only the bundled font.
    fn blank_template_compositor(dir: &Path) -> Result<CardCompositor> {
        let template = dir.join("template.png");
        RgbaImage::from_pixel(2100, 700, WHITE).save(&template)?;
        let cards_dir = dir.join("cards");
        std::fs::create_dir(&cards_dir)?;
        let card = CardConfig {
            template_path: template,
            font_path: dir.join("missing.ttf"),
            fallback_font_paths: vec![],
            ..CardConfig::default()
        };
        Ok(CardCompositor::new(card, cards_dir))
    }

    fn issue_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    #[test]
    fn serial_numbers_have_eight_digits() {
        for _ in 0..1000 {
            let serial = random_serial_number();
            assert!((10_000_000..=99_999_999).contains(&serial));
        }
    }

    #[test]
    fn sentinel_record_still_produces_a_card() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("compose")?;
        let compositor = blank_template_compositor(dir.path())?;
        let card = compositor.compose(
            &sentinel_record(),
            &CardPhotos::default(),
            "123456789012",
            issue_date(),
        )?;
        assert!(card.path.starts_with(dir.path().join("cards")));
        let name = card.path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("id_") && name.ends_with(".png"));

        let image = image::open(&card.path)?;
        assert_eq!((image.width(), image.height()), (2100, 700));
        assert_eq!(card.validity.expires.gregorian_text(), "15/01/2032");

        let slots = card
            .degradations
            .iter()
            .filter_map(|d| match d {
                Degradation::AssetMissing { slot, .. } => Some(*slot),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(slots, vec![PhotoSlot::Embedded, PhotoSlot::User]);
        assert!(card.degradations.iter().any(|d| matches!(
            d,
            Degradation::RenderResourceMissing { path: None, .. }
        )));
        Ok(())
    }

    #[test]
    fn photos_are_placed_with_backgrounds_removed() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("compose")?;
        let compositor = blank_template_compositor(dir.path())?;

        // A red square on a white background.
        let mut portrait = RgbaImage::from_pixel(100, 100, WHITE);
        for y in 25..75 {
            for x in 25..75 {
                portrait.put_pixel(x, y, RED);
            }
        }
        let portrait_path = dir.path().join("portrait.png");
        portrait.save(&portrait_path)?;

        // Paint the template so we can see that the white border doesn't
        // cover it.
        let mut template = RgbaImage::from_pixel(2100, 700, Rgba([0, 0, 255, 255]));
        template.put_pixel(0, 0, WHITE);
        template.save(dir.path().join("template.png"))?;

        let photos = CardPhotos {
            embedded_photo: Some(portrait_path.clone()),
            user_photo: Some(portrait_path),
        };
        let card = compositor.compose(&sentinel_record(), &photos, "123456789012", issue_date())?;
        assert!(
            !card
                .degradations
                .iter()
                .any(|d| matches!(d, Degradation::AssetMissing { .. }))
        );

        let image: RgbImage = image::open(&card.path)?.to_rgb8();
        let layout = &compositor.card.layout;
        let center = |at: &PhotoPlacement| {
            (
                (at.x + i64::from(at.width) / 2) as u32,
                (at.y + i64::from(at.height) / 2) as u32,
            )
        };
        for at in [
            &layout.embedded_photo_large,
            &layout.embedded_photo_small,
            &layout.user_photo,
        ] {
            let (cx, cy) = center(at);
            assert_eq!(image.get_pixel(cx, cy).0, [200, 0, 0]);
            // Corner of the photo box was white, so the template shows.
            let x = (at.x + i64::from(at.width)) as u32 - 2;
            let y = (at.y + i64::from(at.height)) as u32 - 2;
            assert_eq!(image.get_pixel(x, y).0, [0, 0, 255]);
        }
        Ok(())
    }

    #[test]
    fn unreadable_photo_is_skipped() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("compose")?;
        let compositor = blank_template_compositor(dir.path())?;
        let broken = dir.path().join("broken.png");
        std::fs::write(&broken, b"not really a png")?;
        let photos = CardPhotos {
            embedded_photo: None,
            user_photo: Some(broken),
        };
        let card = compositor.compose(&sentinel_record(), &photos, "123456789012", issue_date())?;
        assert!(card.degradations.iter().any(|d| matches!(
            d,
            Degradation::AssetMissing {
                slot: PhotoSlot::User,
                ..
            }
        )));
        assert!(card.path.exists());
        Ok(())
    }

    #[test]
    fn missing_template_is_an_error() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("compose")?;
        let compositor = CardCompositor::new(
            CardConfig {
                template_path: dir.path().join("nope.png"),
                ..CardConfig::default()
            },
            dir.path().to_owned(),
        );
        let result = compositor.compose(
            &sentinel_record(),
            &CardPhotos::default(),
            "123456789012",
            issue_date(),
        );
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn draws_text_without_any_font_files() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("compose")?;
        let mut compositor = blank_template_compositor(dir.path())?;
        compositor.card.fallback_font_paths = vec![dir.path().join("not-installed.ttf")];
        let record = ExtractedFieldRecord {
            fullname: vec!["ABEBE".to_owned(), "KEBEDE".to_owned()],
            date_of_birth: "01/01/1990".to_owned(),
            sex: "M".to_owned(),
            nationality: "Ethiopian".to_owned(),
            phone: "0911000000".to_owned(),
            region: vec!["Addis Ababa".to_owned()],
            zone: vec!["Bole".to_owned()],
            woreda: vec!["03".to_owned()],
            national_id_number: "1234 5678 9012".to_owned(),
            file_number: "1234 5678 9012 3456".to_owned(),
        };
        let card = compositor.compose(&record, &CardPhotos::default(), "123456789012", issue_date())?;
        assert!(card.degradations.iter().any(|d| matches!(
            d,
            Degradation::RenderResourceMissing { path: None, .. }
        )));

        let image = image::open(&card.path)?.to_rgb8();
        let dark_in = |x0: u32, y0: u32, x1: u32, y1: u32| {
            (y0..y1)
                .flat_map(|y| (x0..x1).map(move |x| (x, y)))
                .filter(|&(x, y)| image.get_pixel(x, y).0[0] < 128)
                .count()
        };
        let layout = &compositor.card.layout;
        // Full name.
        let at = layout.fullname;
        assert!(dark_in(at.x as u32, at.y as u32, at.x as u32 + 300, at.y as u32 + 90) > 0);
        // Serial number.
        let at = layout.serial_number;
        assert!(dark_in(at.x as u32, at.y as u32, 2100, 700) > 0);
        // Rotated issue date.
        let at = layout.issue_gregorian;
        assert!(dark_in(at.x as u32, at.y as u32, at.x as u32 + 40, at.y as u32 + 200) > 0);
        Ok(())
    }

    #[test]
    fn resized_photo_edges_keep_their_color() {
        let mut photo = RgbaImage::from_pixel(10, 10, Rgba([255, 255, 255, 0]));
        for y in 0..10 {
            for x in 0..5 {
                photo.put_pixel(x, y, RED);
            }
        }
        let image = resize_premultiplied(&photo, 20, 10);
        let edges = image
            .pixels()
            .filter(|p| p[3] > 0 && p[3] < 255)
            .collect::<Vec<_>>();
        assert!(!edges.is_empty());
        for pixel in edges {
            assert_eq!((pixel[1], pixel[2]), (0, 0), "{pixel:?}");
            if pixel[3] >= 32 {
                assert!(pixel[0] >= 150, "{pixel:?}");
            }
        }
    }
}
