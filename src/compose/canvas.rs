//! A drawing surface for card images.

use image::{Rgba, RgbaImage, RgbImage, imageops};
use rusttype::point;

use crate::{photo::decode_image, prelude::*};

use super::fonts::CardFont;

/// An RGBA image we paste photos and draw text onto.
pub struct Canvas {
    image: RgbaImage,
}

impl Canvas {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Load a template image as the starting canvas.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub fn from_template(path: &Path) -> Result<Self> {
        let image = decode_image(path)
            .with_context(|| format!("cannot load card template {:?}", path.display()))?;
        Ok(Self::new(image.into_rgba8()))
    }

    /// Paste `top` with its own alpha channel as the mask. Anything falling
    /// off the canvas is clipped.
    pub fn paste_with_alpha(&mut self, top: &RgbaImage, x: i64, y: i64) {
        imageops::overlay(&mut self.image, top, x, y);
    }

    /// Draw a single line of text with its top (the font's ascender line) at
    /// `y`.
    pub fn draw_text(
        &mut self,
        font: &CardFont,
        size: f32,
        x: i32,
        y: i32,
        text: &str,
        color: Rgba<u8>,
    ) {
        render_text(&mut self.image, font, size, x as f32, y as f32, text, color);
    }

    /// Draw several lines, each `spacing` pixels below the previous line's
    /// ascent.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_lines(
        &mut self,
        font: &CardFont,
        size: f32,
        x: i32,
        y: i32,
        lines: &[String],
        spacing: f32,
        color: Rgba<u8>,
    ) {
        let advance = font.font().v_metrics(font.scale(size)).ascent + spacing;
        for (i, line) in lines.iter().enumerate() {
            let line_y = y as f32 + advance * i as f32;
            render_text(&mut self.image, font, size, x as f32, line_y, line, color);
        }
    }

    /// Draw text on its own transparent surface, rotate that surface
    /// counter-clockwise by `degrees` and paste it with `(x, y)` as its top
    /// left corner.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_rotated_text(
        &mut self,
        font: &CardFont,
        size: f32,
        x: i64,
        y: i64,
        text: &str,
        degrees: u32,
        color: Rgba<u8>,
    ) -> Result<()> {
        let (width, height) = measure_text(font, size, text);
        if width == 0 || height == 0 {
            return Ok(());
        }
        let mut surface = RgbaImage::new(width, height);
        render_text(&mut surface, font, size, 0.0, 0.0, text, color);
        let rotated = rotate_counter_clockwise(&surface, degrees)?;
        self.paste_with_alpha(&rotated, x, y);
        Ok(())
    }

    /// Flatten to an opaque RGB image.
    pub fn into_opaque(self) -> RgbImage {
        image::DynamicImage::ImageRgba8(self.image).to_rgb8()
    }
}

/// The size of the box from the text origin to the far edge of its rendered
/// glyphs, drawn with the top of the text at the origin.
pub fn measure_text(font: &CardFont, size: f32, text: &str) -> (u32, u32) {
    let scale = font.scale(size);
    let ascent = font.font().v_metrics(scale).ascent;
    let (mut max_x, mut max_y) = (0, 0);
    for glyph in font.font().layout(text, scale, point(0.0, ascent)) {
        if let Some(bb) = glyph.pixel_bounding_box() {
            max_x = max_x.max(bb.max.x);
            max_y = max_y.max(bb.max.y);
        }
    }
    (max_x.max(0) as u32, max_y.max(0) as u32)
}

/// Rotate counter-clockwise by a multiple of 90 degrees.
pub fn rotate_counter_clockwise(image: &RgbaImage, degrees: u32) -> Result<RgbaImage> {
    // `imageops` rotates clockwise.
    match degrees % 360 {
        0 => Ok(image.clone()),
        90 => Ok(imageops::rotate270(image)),
        180 => Ok(imageops::rotate180(image)),
        270 => Ok(imageops::rotate90(image)),
        other => Err(anyhow!("cannot rotate text by {other} degrees")),
    }
}

/// Resize with color weighted by alpha, so fully transparent pixels don't
/// bleed their color into the edges of what remains.
pub fn resize_premultiplied(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let mut premultiplied = image.clone();
    for pixel in premultiplied.pixels_mut() {
        let alpha = u32::from(pixel[3]);
        for c in 0..3 {
            pixel[c] = ((u32::from(pixel[c]) * alpha + 127) / 255) as u8;
        }
    }
    let mut resized =
        imageops::resize(&premultiplied, width, height, imageops::FilterType::CatmullRom);
    for pixel in resized.pixels_mut() {
        let alpha = u32::from(pixel[3]);
        if alpha == 0 {
            *pixel = Rgba([0, 0, 0, 0]);
            continue;
        }
        for c in 0..3 {
            pixel[c] = ((u32::from(pixel[c]) * 255 + alpha / 2) / alpha).min(255) as u8;
        }
    }
    resized
}

fn render_text(
    target: &mut RgbaImage,
    font: &CardFont,
    size: f32,
    x: f32,
    y: f32,
    text: &str,
    color: Rgba<u8>,
) {
    let scale = font.scale(size);
    let ascent = font.font().v_metrics(scale).ascent;
    let (width, height) = (target.width() as i32, target.height() as i32);
    for glyph in font.font().layout(text, scale, point(x, y + ascent)) {
        let Some(bb) = glyph.pixel_bounding_box() else {
            continue;
        };
        glyph.draw(|gx, gy, coverage| {
            let px = bb.min.x + gx as i32;
            let py = bb.min.y + gy as i32;
            if px < 0 || py < 0 || px >= width || py >= height {
                return;
            }
            blend_over(target.get_pixel_mut(px as u32, py as u32), color, coverage);
        });
    }
}

/// Source-over compositing of `color` at partial `coverage`.
fn blend_over(dst: &mut Rgba<u8>, color: Rgba<u8>, coverage: f32) {
    let src_a = coverage.clamp(0.0, 1.0) * f32::from(color[3]) / 255.0;
    if src_a <= 0.0 {
        return;
    }
    let dst_a = f32::from(dst[3]) / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);
    for c in 0..3 {
        let src = f32::from(color[c]);
        let below = f32::from(dst[c]);
        let out = (src * src_a + below * dst_a * (1.0 - src_a)) / out_a;
        dst[c] = out.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    #[test]
    fn transparent_pixels_leave_the_canvas_alone() {
        let mut canvas = Canvas::new(RgbaImage::from_pixel(10, 10, WHITE));
        let mut photo = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0]));
        photo.put_pixel(1, 1, RED);
        canvas.paste_with_alpha(&photo, 2, 3);
        assert_eq!(*canvas.image.get_pixel(3, 4), RED);
        assert_eq!(*canvas.image.get_pixel(2, 3), WHITE);
    }

    #[test]
    fn pastes_are_clipped_at_the_edges() {
        let mut canvas = Canvas::new(RgbaImage::from_pixel(10, 10, WHITE));
        let photo = RgbaImage::from_pixel(4, 4, RED);
        canvas.paste_with_alpha(&photo, 8, -2);
        assert_eq!(*canvas.image.get_pixel(9, 0), RED);
        assert_eq!(*canvas.image.get_pixel(9, 2), WHITE);
        assert_eq!(canvas.image.width(), 10);
    }

    #[test]
    fn quarter_turn_is_counter_clockwise() {
        let mut image = RgbaImage::new(3, 2);
        // Top right corner.
        image.put_pixel(2, 0, RED);
        let rotated = rotate_counter_clockwise(&image, 90).unwrap();
        assert_eq!(rotated.dimensions(), (2, 3));
        assert_eq!(*rotated.get_pixel(0, 0), RED);
        assert!(rotate_counter_clockwise(&image, 45).is_err());
        assert_eq!(rotate_counter_clockwise(&image, 360).unwrap(), image);
    }

    #[test]
    fn blending_respects_coverage() {
        let mut pixel = WHITE;
        blend_over(&mut pixel, Rgba([0, 0, 0, 255]), 0.5);
        assert_eq!(pixel, Rgba([128, 128, 128, 255]));

        let mut clear = Rgba([0, 0, 0, 0]);
        blend_over(&mut clear, RED, 1.0);
        assert_eq!(clear, RED);

        let mut untouched = WHITE;
        blend_over(&mut untouched, RED, 0.0);
        assert_eq!(untouched, WHITE);
    }

    #[test]
    fn flattening_drops_alpha() {
        let canvas = Canvas::new(RgbaImage::from_pixel(2, 2, RED));
        let flat = canvas.into_opaque();
        assert_eq!(flat.get_pixel(0, 0).0, [255, 0, 0]);
    }

    #[test]
    fn opaque_images_resize_as_usual() {
        let image = RgbaImage::from_pixel(4, 4, RED);
        let resized = resize_premultiplied(&image, 8, 2);
        assert_eq!(resized.dimensions(), (8, 2));
        assert!(resized.pixels().all(|p| *p == RED));
    }

    #[test]
    fn draws_lines_one_below_another() -> Result<()> {
        let font = CardFont::bundled()?;
        let mut canvas = Canvas::new(RgbaImage::from_pixel(300, 200, WHITE));
        let lines = vec!["ABEBE".to_owned(), "KEBEDE".to_owned()];
        canvas.draw_lines(&font, 30.0, 10, 10, &lines, 8.0, Rgba([0, 0, 0, 255]));
        let dark_rows = |y0: u32, y1: u32| {
            (y0..y1).any(|y| (0..300).any(|x| canvas.image.get_pixel(x, y)[0] < 128))
        };
        let advance = font.font().v_metrics(font.scale(30.0)).ascent + 8.0;
        let second = 10 + advance.ceil() as u32;
        assert!(dark_rows(10, second));
        assert!(dark_rows(second, 200));
        assert!(!dark_rows(0, 10));
        Ok(())
    }

    #[test]
    fn draws_rotated_text() -> Result<()> {
        let font = CardFont::bundled()?;
        let (width, height) = measure_text(&font, 25.0, "15/01/2024");
        assert!(width > height);
        let mut canvas = Canvas::new(RgbaImage::from_pixel(200, 400, WHITE));
        canvas.draw_rotated_text(&font, 25.0, 13, 120, "15/01/2024", 90, Rgba([0, 0, 0, 255]))?;
        let dark = canvas
            .image
            .enumerate_pixels()
            .filter(|(_, _, p)| p[0] < 128)
            .map(|(x, y, _)| (x, y))
            .collect::<Vec<_>>();
        assert!(!dark.is_empty());
        // Rotated text runs down the page, within the rotated surface.
        assert!(dark.iter().all(|&(x, y)| {
            x >= 13 && x < 13 + height && y >= 120 && y < 120 + width
        }));
        Ok(())
    }
}
