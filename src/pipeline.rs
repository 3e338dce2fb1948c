//! Running one submission from uploaded files to a finished card.

use std::sync::Arc;

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::Serialize;

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    calendar::CardValidity,
    compose::{CardCompositor, CardPhotos, ComposedCard},
    config::PipelineConfig,
    degradation::Degradation,
    extract::{
        ExtractedFieldRecord, FieldExtractor,
        poppler::{ImageAsset, ImageOrigin, PopplerPdf},
    },
    ocr::{OcrEngine, TesseractOcrEngine},
    photo::store_user_photo,
    prelude::*,
    storage::StorageDirs,
};

/// The files and ID number for one card.
#[derive(Clone, Debug)]
pub struct Submission {
    pub pdf_path: PathBuf,
    pub photo_path: PathBuf,
    /// A 12-digit ID number, already validated by the caller.
    pub national_id: String,
}

impl Submission {
    /// Save uploaded bytes into the uploads directory and build a submission
    /// pointing at them.
    pub async fn stage(
        storage: &StorageDirs,
        pdf: &[u8],
        photo: &[u8],
        national_id: impl Into<String>,
    ) -> Result<Self> {
        storage.ensure().await?;
        let photo_ext = infer::get(photo)
            .map(|kind| kind.extension())
            .unwrap_or("bin");
        Ok(Self {
            pdf_path: storage.stage_upload("document", "pdf", pdf).await?,
            photo_path: storage.stage_upload("photo", photo_ext, photo).await?,
            national_id: national_id.into(),
        })
    }
}

/// Everything we pulled out of a PDF.
#[derive(Clone, Debug, Serialize, JsonSchema)]
pub struct DocumentExtraction {
    pub record: ExtractedFieldRecord,
    /// Embedded images, written to the images directory.
    pub images: Vec<ImageAsset>,
    pub degradations: Vec<Degradation>,
}

/// The result of a successful run.
#[derive(Clone, Debug, Serialize, JsonSchema)]
pub struct CardOutput {
    /// The finished PNG.
    pub card_path: PathBuf,
    pub record: ExtractedFieldRecord,
    /// The user's photo as stored, normalized when possible.
    pub user_photo: ImageAsset,
    pub validity: CardValidity,
    pub serial_number: u32,
    /// Everything that went wrong along the way without stopping us.
    pub degradations: Vec<Degradation>,
}

/// Extracts, normalizes and composes. Holds no per-submission state, so one
/// pipeline can run any number of submissions at once.
#[derive(Clone)]
pub struct CardPipeline {
    config: Arc<PipelineConfig>,
    ocr: Arc<dyn OcrEngine>,
}

impl CardPipeline {
    /// Create a pipeline using `tesseract` for OCR.
    pub fn new(config: PipelineConfig) -> Self {
        let ocr = Arc::new(TesseractOcrEngine::new(config.ocr.command.clone()));
        Self::with_ocr_engine(config, ocr)
    }

    pub fn with_ocr_engine(config: PipelineConfig, ocr: Arc<dyn OcrEngine>) -> Self {
        Self {
            config: Arc::new(config),
            ocr,
        }
    }

    /// Extract fields and embedded images from a PDF. Fails only if the PDF
    /// can't be read.
    #[instrument(level = "debug", skip_all, fields(path = %pdf_path.display()))]
    pub async fn extract(&self, pdf_path: &Path) -> Result<DocumentExtraction> {
        let storage = &self.config.storage;
        storage.ensure().await?;

        let pdf = PopplerPdf::open(pdf_path).await?;
        debug!(pages = pdf.page_count(), "Opened PDF");
        let images = pdf.extract_images(&storage.images_dir).await?;
        let page = removing_images_on_error(&images, pdf.page_layout(1).await).await?;

        let extraction = FieldExtractor::new(&self.config.extraction, self.ocr.as_ref())
            .extract(&page, &images)
            .await;
        Ok(DocumentExtraction {
            record: extraction.record,
            images,
            degradations: extraction.degradations,
        })
    }

    /// Run a submission, dating the card today.
    pub async fn run(&self, submission: &Submission) -> Result<CardOutput> {
        let today = chrono::Local::now().date_naive();
        self.run_on(submission, today).await
    }

    /// Run a submission, dating the card `issued_on`.
    #[instrument(level = "debug", skip_all, fields(pdf = %submission.pdf_path.display()))]
    pub async fn run_on(&self, submission: &Submission, issued_on: NaiveDate) -> Result<CardOutput> {
        let DocumentExtraction {
            record,
            images,
            mut degradations,
        } = self.extract(&submission.pdf_path).await?;

        let result = self
            .compose_with_images(submission, &record, &images, issued_on, &mut degradations)
            .await;
        remove_embedded_images(&images).await;
        let (card, user_photo) = result?;

        degradations.extend(card.degradations);
        info!(
            card = %card.path.display(),
            degradations = degradations.len(),
            "Finished submission"
        );
        Ok(CardOutput {
            card_path: card.path,
            record,
            user_photo,
            validity: card.validity,
            serial_number: card.serial_number,
            degradations,
        })
    }

    /// Store the user photo and draw the card.
    async fn compose_with_images(
        &self,
        submission: &Submission,
        record: &ExtractedFieldRecord,
        images: &[ImageAsset],
        issued_on: NaiveDate,
        degradations: &mut Vec<Degradation>,
    ) -> Result<(ComposedCard, ImageAsset)> {
        let storage = &self.config.storage;
        let stored = store_user_photo(
            &submission.photo_path,
            &storage.images_dir,
            self.config.card.background_threshold,
        )
        .await?;
        degradations.extend(stored.degradations);
        let user_photo = ImageAsset {
            path: stored.path,
            origin: ImageOrigin::UserSubmitted,
        };

        let photos = CardPhotos {
            embedded_photo: images
                .iter()
                .find(|asset| matches!(asset.origin, ImageOrigin::Embedded { .. }))
                .map(|asset| asset.path.clone()),
            user_photo: Some(user_photo.path.clone()),
        };

        let compositor = CardCompositor::new(self.config.card.clone(), storage.cards_dir.clone());
        let record = record.clone();
        let national_id = submission.national_id.clone();
        let card = spawn_blocking_propagating_panics(move || {
            compositor.compose(&record, &photos, &national_id, issued_on)
        })
        .await?;
        Ok((card, user_photo))
    }
}

/// Pass `result` through, removing `images` first if it's an error.
async fn removing_images_on_error<T>(images: &[ImageAsset], result: Result<T>) -> Result<T> {
    if result.is_err() {
        remove_embedded_images(images).await;
    }
    result
}

/// Embedded images only live for one run.
pub(crate) async fn remove_embedded_images(images: &[ImageAsset]) {
    for asset in images {
        if !matches!(asset.origin, ImageOrigin::Embedded { .. }) {
            continue;
        }
        if let Err(err) = tokio::fs::remove_file(&asset.path).await {
            warn!(path = %asset.path.display(), "cannot remove extracted image: {err}");
        }
    }
}
