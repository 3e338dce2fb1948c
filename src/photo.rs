//! Photo normalization: turn near-white backgrounds transparent so photos can
//! be pasted onto the card without covering the template.

use image::{DynamicImage, ImageFormat, ImageReader, Rgba, RgbaImage};

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    degradation::Degradation,
    prelude::*,
    storage::unique_path,
};

/// What a background pixel becomes.
const TRANSPARENT_WHITE: Rgba<u8> = Rgba([255, 255, 255, 0]);

/// Make every pixel whose red, green and blue channels all exceed `threshold`
/// fully transparent. Other pixels are left exactly as they were.
pub fn remove_background(image: &mut RgbaImage, threshold: u8) {
    for pixel in image.pixels_mut() {
        let [r, g, b, _] = pixel.0;
        if r > threshold && g > threshold && b > threshold {
            *pixel = TRANSPARENT_WHITE;
        }
    }
}

/// Convert any decoded image to RGBA and remove its background.
pub fn normalize(image: DynamicImage, threshold: u8) -> RgbaImage {
    let mut rgba = image.into_rgba8();
    remove_background(&mut rgba, threshold);
    rgba
}

/// Decode an image file, guessing the format from its contents.
pub fn decode_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .with_context(|| format!("cannot open image {:?}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("cannot read image {:?}", path.display()))?
        .decode()
        .with_context(|| format!("cannot decode image {:?}", path.display()))
}

/// Decode and normalize an image file.
pub fn load_normalized(path: &Path, threshold: u8) -> Result<RgbaImage> {
    Ok(normalize(decode_image(path)?, threshold))
}

/// A user photo, saved into our images directory.
#[derive(Debug)]
pub struct StoredPhoto {
    pub path: PathBuf,
    pub degradations: Vec<Degradation>,
}

/// Save the user's photo to `images_dir` as a normalized PNG.
///
/// Files that aren't images at all are a fatal error. Files that claim to be
/// images but won't decode are copied as-is, so the compositor can still
/// try them.
#[instrument(level = "debug", skip_all, fields(path = %source.display()))]
pub async fn store_user_photo(
    source: &Path,
    images_dir: &Path,
    threshold: u8,
) -> Result<StoredPhoto> {
    let kind = infer::get_from_path(source)
        .with_context(|| format!("cannot read photo {:?}", source.display()))?
        .ok_or_else(|| anyhow!("cannot identify photo {:?}", source.display()))?;
    if kind.matcher_type() != infer::MatcherType::Image {
        return Err(anyhow!(
            "photo {:?} is {}, not an image",
            source.display(),
            kind.mime_type()
        ));
    }

    let source_owned = source.to_owned();
    let normalized = spawn_blocking_propagating_panics(move || {
        load_normalized(&source_owned, threshold)
    })
    .await;

    let mut degradations = vec![];
    let path = match normalized {
        Ok(image) => {
            let path = unique_path(images_dir, "user_photo", "png");
            let image_path = path.clone();
            spawn_blocking_propagating_panics(move || {
                image
                    .save_with_format(&image_path, ImageFormat::Png)
                    .with_context(|| format!("cannot write {:?}", image_path.display()))
            })
            .await?;
            path
        }
        Err(err) => {
            Degradation::PhotoNotNormalized {
                reason: format!("{err:#}"),
            }
            .record(&mut degradations);
            let path = unique_path(images_dir, "user_photo", kind.extension());
            tokio::fs::copy(source, &path)
                .await
                .with_context(|| format!("cannot copy photo to {:?}", path.display()))?;
            path
        }
    };
    debug!(path = %path.display(), "Stored user photo");
    Ok(StoredPhoto { path, degradations })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RgbaImage {
        RgbaImage::from_fn(4, 2, |x, y| match (x, y) {
            (0, 0) => Rgba([255, 255, 255, 255]),
            (1, 0) => Rgba([221, 221, 221, 128]),
            (2, 0) => Rgba([220, 255, 255, 255]),
            (3, 0) => Rgba([255, 220, 230, 77]),
            (0, 1) => Rgba([10, 20, 30, 255]),
            (1, 1) => Rgba([255, 255, 220, 200]),
            (2, 1) => Rgba([0, 0, 0, 0]),
            _ => Rgba([240, 241, 242, 255]),
        })
    }

    #[test]
    fn bright_pixels_become_transparent() {
        let mut image = sample();
        remove_background(&mut image, 220);
        for (x, y) in [(0, 0), (1, 0), (3, 1)] {
            assert_eq!(image.get_pixel(x, y).0[3], 0, "pixel {x},{y}");
        }
    }

    #[test]
    fn other_pixels_are_untouched() {
        let original = sample();
        let mut image = original.clone();
        remove_background(&mut image, 220);
        for (x, y) in [(2, 0), (3, 0), (0, 1), (1, 1), (2, 1)] {
            assert_eq!(image.get_pixel(x, y), original.get_pixel(x, y), "pixel {x},{y}");
        }
    }

    #[test]
    fn normalize_is_deterministic_and_keeps_size() {
        let image = DynamicImage::ImageRgba8(sample());
        let a = normalize(image.clone(), 220);
        let b = normalize(image, 220);
        assert_eq!(a, b);
        assert_eq!(a.dimensions(), (4, 2));
    }

    #[test]
    fn rgb_input_gains_alpha() {
        let rgb = image::RgbImage::from_pixel(3, 3, image::Rgb([250, 250, 250]));
        let rgba = normalize(DynamicImage::ImageRgb8(rgb), 220);
        assert!(rgba.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn corrupt_image_is_a_decode_error() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("photo")?;
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"\x89PNG\r\n\x1a\nnot really")?;
        assert!(load_normalized(&path, 220).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn stores_normalized_png() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("photo")?;
        let source = dir.path().join("upload.png");
        sample().save(&source)?;
        let stored = store_user_photo(&source, dir.path(), 220).await?;
        assert!(stored.degradations.is_empty());
        assert_eq!(stored.path.extension().unwrap(), "png");
        let saved = image::open(&stored.path)?.into_rgba8();
        assert_eq!(saved.get_pixel(0, 0).0[3], 0);
        assert_eq!(saved.get_pixel(0, 1), &Rgba([10, 20, 30, 255]));
        Ok(())
    }

    #[tokio::test]
    async fn rejects_non_images() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("photo")?;
        let source = dir.path().join("notes.pdf");
        std::fs::write(&source, b"%PDF-1.4\n%%EOF\n")?;
        assert!(store_user_photo(&source, dir.path(), 220).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn undecodable_image_is_copied_as_is() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("photo")?;
        let source = dir.path().join("broken.png");
        std::fs::write(&source, b"\x89PNG\r\n\x1a\n\0\0\0\rIHDRbroken")?;
        let stored = store_user_photo(&source, dir.path(), 220).await?;
        assert_eq!(stored.degradations.len(), 1);
        assert_eq!(std::fs::read(&stored.path)?, std::fs::read(&source)?);
        Ok(())
    }
}
