//! Reading PDFs with the command-line tools from `poppler-utils`.

use std::{collections::BTreeMap, fs};

use schemars::JsonSchema;
use serde::Serialize;
use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure, cpu_limit::with_cpu_semaphore, prelude::*,
    storage::unique_path,
};

use super::layout::PageLayout;

/// Where an image came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageOrigin {
    /// Pulled out of the source PDF. `page` is 1-based, `index` counts images
    /// on that page from 0.
    Embedded { page: usize, index: usize },
    /// Uploaded alongside the PDF.
    UserSubmitted,
}

/// An image file we wrote, and where it came from.
#[derive(Clone, Debug, PartialEq, Serialize, JsonSchema)]
pub struct ImageAsset {
    pub path: PathBuf,
    pub origin: ImageOrigin,
}

/// A PDF on disk that poppler could open.
#[derive(Debug)]
pub struct PopplerPdf {
    path: PathBuf,
    page_count: usize,
}

impl PopplerPdf {
    /// Open a PDF. This fails if poppler can't parse the file at all.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self> {
        let page_count = get_pdf_page_count(path)
            .await
            .with_context(|| format!("cannot read PDF {:?}", path.display()))?;
        if page_count == 0 {
            return Err(anyhow!("PDF {:?} has no pages", path.display()));
        }
        Ok(Self {
            path: path.to_owned(),
            page_count,
        })
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Get positioned text for a 1-based page number.
    #[instrument(level = "debug", skip(self))]
    pub async fn page_layout(&self, page: usize) -> Result<PageLayout> {
        let output = with_cpu_semaphore(|| async {
            Command::new("pdftotext")
                .arg("-f")
                .arg(page.to_string())
                .arg("-l")
                .arg(page.to_string())
                .arg("-bbox-layout")
                .arg("-enc")
                .arg("UTF-8")
                .arg(&self.path)
                .arg("-")
                .output()
                .await
                .with_context(|| format!("failed to run pdftotext on {:?}", self.path.display()))
        })
        .await?;
        check_for_command_failure("pdftotext", &output, None)?;
        let xhtml =
            String::from_utf8(output.stdout).context("pdftotext output was not valid UTF-8")?;
        PageLayout::parse_bbox_xhtml(&xhtml)?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("pdftotext returned no text layout for page {page}"))
    }

    /// Write every embedded raster image, in its native encoding, into
    /// `images_dir` as `page<P>_img<I>_<uuid>.<ext>`.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    pub async fn extract_images(&self, images_dir: &Path) -> Result<Vec<ImageAsset>> {
        let listing = self.list_images().await?;
        if listing.is_empty() {
            return Ok(vec![]);
        }

        // Dump everything into a scratch directory next to the final
        // location, so the moves below are renames.
        let tmpdir = tempfile::Builder::new()
            .prefix("pdfimages")
            .tempdir_in(images_dir)
            .with_context(|| {
                format!("cannot create scratch directory in {:?}", images_dir.display())
            })?;
        let prefix = tmpdir.path().join("img");
        let output = with_cpu_semaphore(|| async {
            Command::new("pdfimages")
                .arg("-all")
                .arg(&self.path)
                .arg(&prefix)
                .output()
                .await
                .with_context(|| format!("failed to run pdfimages on {:?}", self.path.display()))
        })
        .await?;
        check_for_command_failure("pdfimages", &output, None)?;

        let dumped = dumped_files_by_number(tmpdir.path())?;
        let mut assets = vec![];
        for entry in listing {
            let Some(source) = dumped.get(&entry.number) else {
                warn!(number = entry.number, "pdfimages listed an image it did not write");
                continue;
            };
            let ext = source
                .extension()
                .map(|ext| ext.to_string_lossy().into_owned())
                .unwrap_or_else(|| "bin".to_owned());
            let path = unique_path(
                images_dir,
                &format!("page{}_img{}", entry.page, entry.index),
                &ext,
            );
            fs::rename(source, &path)
                .with_context(|| format!("cannot move image to {:?}", path.display()))?;
            assets.push(ImageAsset {
                path,
                origin: ImageOrigin::Embedded {
                    page: entry.page,
                    index: entry.index,
                },
            });
        }
        debug!(count = assets.len(), "Extracted embedded images");
        Ok(assets)
    }

    /// Run `pdfimages -list` and keep the real images.
    async fn list_images(&self) -> Result<Vec<ListedImage>> {
        let output = Command::new("pdfimages")
            .arg("-list")
            .arg(&self.path)
            .output()
            .await
            .with_context(|| format!("failed to run pdfimages on {:?}", self.path.display()))?;
        check_for_command_failure("pdfimages", &output, None)?;
        let listing =
            String::from_utf8(output.stdout).context("pdfimages output was not valid UTF-8")?;
        parse_image_listing(&listing)
    }
}

/// One row of `pdfimages -list` that we care about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ListedImage {
    /// 1-based page number.
    page: usize,
    /// The number `pdfimages` uses in the dumped file name.
    number: usize,
    /// Position among the real images on this page.
    index: usize,
}

/// Parse `pdfimages -list` output.
///
/// Soft masks and stencil masks get their own rows (and their own dumped
/// files), but they aren't pictures, so they don't count towards a page's
/// image indexes.
fn parse_image_listing(listing: &str) -> Result<Vec<ListedImage>> {
    let mut per_page: BTreeMap<usize, usize> = BTreeMap::new();
    let mut images = vec![];
    let rows = listing
        .lines()
        .skip_while(|line| !line.starts_with("---"))
        .skip(1);
    for row in rows {
        let columns = row.split_whitespace().collect::<Vec<_>>();
        if columns.len() < 3 {
            continue;
        }
        let page = columns[0]
            .parse::<usize>()
            .with_context(|| format!("bad page number in pdfimages row {row:?}"))?;
        let number = columns[1]
            .parse::<usize>()
            .with_context(|| format!("bad image number in pdfimages row {row:?}"))?;
        if columns[2] != "image" {
            trace!(page, number, kind = columns[2], "Skipping non-image entry");
            continue;
        }
        let next = per_page.entry(page).or_default();
        images.push(ListedImage {
            page,
            number,
            index: *next,
        });
        *next += 1;
    }
    Ok(images)
}

/// Map the number in each `img-NNN.ext` file name to its path.
fn dumped_files_by_number(dir: &Path) -> Result<BTreeMap<usize, PathBuf>> {
    let mut files = BTreeMap::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {:?}", dir.display()))?
    {
        let path = entry
            .with_context(|| format!("failed to read entry in {:?}", dir.display()))?
            .path();
        let number = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.strip_prefix("img-"))
            .and_then(|digits| digits.parse::<usize>().ok());
        if let Some(number) = number {
            files.insert(number, path);
        }
    }
    Ok(files)
}

/// Get the number of pages in a PDF file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn get_pdf_page_count(path: &Path) -> Result<usize> {
    let output = Command::new("pdfinfo")
        .arg(path)
        .output()
        .await
        .with_context(|| format!("failed to run pdfinfo on {:?}", path.display()))?;
    check_for_command_failure("pdfinfo", &output, None)?;

    let output = String::from_utf8_lossy(&output.stdout);
    let page_count_str = output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim() == "Pages")
        .map(|(_, value)| value.trim())
        .ok_or_else(|| anyhow!("failed to find page count in pdfinfo output"))?;
    page_count_str.parse::<usize>().with_context(|| {
        format!(
            "failed to parse page count for {:?} from pdfinfo output",
            path.display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
page   num  type   width height color comp bpc  enc interp  object ID x-ppi y-ppi size ratio
--------------------------------------------------------------------------------------------
   1     0 image     300   400  rgb     3   8  jpeg   no        12  0    72    72 20.1K 5.7%
   1     1 smask     300   400  gray    1   8  image  no        12  0    72    72 1024B 0.9%
   1     2 image     120   160  rgb     3   8  image  no        13  0    72    72 5000B 8.7%
   2     3 image      80    80  gray    1   8  jpx    no        20  0    72    72 2000B 31%
   2     4 stencil    10    10  -       1   1  image  no        21  0    72    72   13B 100%
";

    #[test]
    fn listing_skips_masks_and_indexes_per_page() {
        let images = parse_image_listing(LISTING).unwrap();
        assert_eq!(
            images,
            vec![
                ListedImage { page: 1, number: 0, index: 0 },
                ListedImage { page: 1, number: 2, index: 1 },
                ListedImage { page: 2, number: 3, index: 0 },
            ]
        );
    }

    #[test]
    fn empty_listing_has_no_images() {
        let header = LISTING.lines().take(2).collect::<Vec<_>>().join("\n");
        assert!(parse_image_listing(&header).unwrap().is_empty());
    }

    #[test]
    fn dumped_files_are_keyed_by_number() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("dump")?;
        fs::write(dir.path().join("img-000.jpg"), b"a")?;
        fs::write(dir.path().join("img-012.png"), b"b")?;
        fs::write(dir.path().join("other.txt"), b"c")?;
        let files = dumped_files_by_number(dir.path())?;
        assert_eq!(files.len(), 2);
        assert!(files[&12].ends_with("img-012.png"));
        Ok(())
    }

    #[tokio::test]
    async fn garbage_is_not_a_pdf() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("pdf")?;
        let path = dir.path().join("bad.pdf");
        fs::write(&path, b"this is not a pdf")?;
        assert!(PopplerPdf::open(&path).await.is_err());
        Ok(())
    }
}
