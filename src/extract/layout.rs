//! Positioned page text, as produced by `pdftotext -bbox-layout`.

use std::sync::LazyLock;

use regex::Regex;

use crate::{config::Region, prelude::*};

static PAGE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<page\b[^>]*>(.*?)</page>").expect("failed to compile regex")
});

static LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<line\b[^>]*>(.*?)</line>").expect("failed to compile regex")
});

static WORD_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)<word\s+xMin="(-?[\d.]+)"\s+yMin="(-?[\d.]+)"\s+xMax="(-?[\d.]+)"\s+yMax="(-?[\d.]+)"\s*>(.*?)</word>"#,
    )
    .expect("failed to compile regex")
});

/// A word and its bounding box, in points from the top left of the page.
#[derive(Clone, Debug, PartialEq)]
pub struct LayoutWord {
    pub text: String,
    pub bbox: Region,
}

impl LayoutWord {
    #[cfg(test)]
    pub fn new(text: impl Into<String>, bbox: Region) -> Self {
        Self {
            text: text.into(),
            bbox,
        }
    }

    /// Does the center of this word fall inside `region`?
    fn is_centered_in(&self, region: &Region) -> bool {
        let cx = (self.bbox.x0 + self.bbox.x1) / 2.0;
        let cy = (self.bbox.y0 + self.bbox.y1) / 2.0;
        cx >= region.x0 && cx <= region.x1 && cy >= region.y0 && cy <= region.y1
    }
}

/// One line of words, in reading order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayoutLine {
    pub words: Vec<LayoutWord>,
}

/// All the text on one page.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageLayout {
    pub lines: Vec<LayoutLine>,
}

impl PageLayout {
    /// Parse the XHTML written by `pdftotext -bbox-layout`, one layout per
    /// `<page>` element.
    pub fn parse_bbox_xhtml(xhtml: &str) -> Result<Vec<PageLayout>> {
        let mut pages = vec![];
        for page in PAGE_REGEX.captures_iter(xhtml) {
            let mut lines = vec![];
            for line in LINE_REGEX.captures_iter(&page[1]) {
                let words = WORD_REGEX
                    .captures_iter(&line[1])
                    .map(|word| {
                        let coord = |i: usize| -> Result<f32> {
                            word[i].parse::<f32>().with_context(|| {
                                format!("bad coordinate {:?} in pdftotext output", &word[i])
                            })
                        };
                        Ok(LayoutWord {
                            text: unescape_xml(&word[5]),
                            bbox: Region::new(coord(1)?, coord(2)?, coord(3)?, coord(4)?),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                if !words.is_empty() {
                    lines.push(LayoutLine { words });
                }
            }
            pages.push(PageLayout { lines });
        }
        if pages.is_empty() {
            return Err(anyhow!("no <page> elements in pdftotext output"));
        }
        Ok(pages)
    }

    /// The full text of the page, one line per row of text.
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|line| join_words(line.words.iter()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The text whose words are centered inside `region`, with surrounding
    /// whitespace trimmed.
    pub fn text_in(&self, region: &Region) -> String {
        self.lines
            .iter()
            .map(|line| join_words(line.words.iter().filter(|w| w.is_centered_in(region))))
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_owned()
    }
}

fn join_words<'a>(words: impl Iterator<Item = &'a LayoutWord>) -> String {
    words
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Undo the XML escaping `pdftotext` applies to word text.
fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<body>
<doc>
  <page width="595.276000" height="841.890000">
    <flow>
      <block xMin="50.0" yMin="360.0" xMax="200.0" yMax="372.0">
        <line xMin="50.0" yMin="360.0" xMax="200.0" yMax="372.0">
          <word xMin="50.000000" yMin="361.000000" xMax="90.000000" yMax="371.000000">ABEBE|</word>
          <word xMin="95.000000" yMin="361.000000" xMax="140.000000" yMax="371.000000">KEBEDE</word>
        </line>
        <line xMin="50.0" yMin="700.0" xMax="200.0" yMax="712.0">
          <word xMin="50.000000" yMin="700.000000" xMax="80.000000" yMax="712.000000">A&amp;B</word>
        </line>
      </block>
    </flow>
  </page>
</doc>
</body>
</html>
"#;

    #[test]
    fn parses_words_and_lines() {
        let pages = PageLayout::parse_bbox_xhtml(SAMPLE).unwrap();
        assert_eq!(pages.len(), 1);
        let page = &pages[0];
        assert_eq!(page.lines.len(), 2);
        assert_eq!(page.lines[0].words[1].text, "KEBEDE");
        assert_eq!(page.lines[0].words[1].bbox, Region::new(95.0, 361.0, 140.0, 371.0));
        assert_eq!(page.text(), "ABEBE| KEBEDE\nA&B");
    }

    #[test]
    fn region_text_uses_word_centers() {
        let page = &PageLayout::parse_bbox_xhtml(SAMPLE).unwrap()[0];
        assert_eq!(page.text_in(&Region::new(50.0, 360.0, 300.0, 372.0)), "ABEBE| KEBEDE");
        // Only the first word's center is inside this box.
        assert_eq!(page.text_in(&Region::new(40.0, 360.0, 80.0, 372.0)), "ABEBE|");
        assert_eq!(page.text_in(&Region::new(300.0, 0.0, 400.0, 10.0)), "");
    }

    #[test]
    fn rejects_output_without_pages() {
        assert!(PageLayout::parse_bbox_xhtml("<html></html>").is_err());
    }
}
