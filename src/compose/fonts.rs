//! Loading TrueType fonts, with fallbacks.

use rusttype::{Font, Scale};

use crate::{degradation::Degradation, prelude::*};

/// DejaVu Sans, compiled in so there is always something to draw with. It has
/// no Ethiopic glyphs.
static BUNDLED_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");

/// A loaded font, and where it came from. `path` is `None` for the bundled
/// font.
pub struct CardFont {
    font: Font<'static>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for CardFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardFont").field("path", &self.path).finish()
    }
}

impl CardFont {
    /// Load a font file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("cannot read font {:?}", path.display()))?;
        let font = Font::try_from_vec(data)
            .ok_or_else(|| anyhow!("cannot parse font {:?}", path.display()))?;
        Ok(Self {
            font,
            path: Some(path.to_owned()),
        })
    }

    /// The font compiled into this binary.
    pub fn bundled() -> Result<Self> {
        let font = Font::try_from_bytes(BUNDLED_FONT)
            .ok_or_else(|| anyhow!("cannot parse bundled font"))?;
        Ok(Self { font, path: None })
    }

    /// Load `primary`, or else the first of `fallbacks` that works, or else
    /// the bundled font. Each failure is recorded.
    pub fn load_with_fallback(
        primary: &Path,
        fallbacks: &[PathBuf],
        degradations: &mut Vec<Degradation>,
    ) -> Result<Self> {
        match Self::load(primary) {
            Ok(font) => return Ok(font),
            Err(err) => Degradation::RenderResourceMissing {
                path: Some(primary.to_owned()),
                reason: format!("{err:#}"),
            }
            .record(degradations),
        }
        let fallback = fallbacks
            .iter()
            .find_map(|path| match Self::load(path) {
                Ok(font) => Some(font),
                Err(err) => {
                    trace!("skipping fallback font: {err:#}");
                    None
                }
            });
        if let Some(font) = fallback {
            info!(path = ?font.path, "Using fallback font");
            return Ok(font);
        }
        Degradation::RenderResourceMissing {
            path: None,
            reason: "no fallback font could be loaded, using the bundled font".to_owned(),
        }
        .record(degradations);
        Self::bundled()
    }

    pub fn font(&self) -> &Font<'static> {
        &self.font
    }

    /// The `rusttype` scale for an em size in pixels. `rusttype` scales by
    /// ascent-to-descent height, so we convert.
    pub fn scale(&self, em_size: f32) -> Scale {
        let units_per_em = f32::from(self.font.units_per_em());
        let v = self.font.v_metrics_unscaled();
        let height = v.ascent - v.descent;
        if units_per_em <= 0.0 || height <= 0.0 {
            return Scale::uniform(em_size);
        }
        Scale::uniform(em_size * height / units_per_em)
    }
}
