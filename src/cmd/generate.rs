//! The `generate` subcommand.

use clap::Args;

use crate::{
    async_utils::io::write_json,
    config::ConfigOpts,
    pipeline::{CardPipeline, Submission},
    prelude::*,
    ui::{ProgressConfig, Ui},
};

/// Generate command line arguments.
#[derive(Debug, Args)]
pub struct GenerateOpts {
    /// The identity PDF.
    #[clap(value_name = "PDF")]
    pub pdf_path: PathBuf,

    /// The holder's photo.
    #[clap(value_name = "PHOTO")]
    pub photo_path: PathBuf,

    /// The 12-digit national ID number (FIN) to print on the card.
    #[clap(long = "fin", value_name = "DIGITS", value_parser = parse_national_id)]
    pub national_id: String,

    #[clap(flatten)]
    pub config: ConfigOpts,

    /// Also copy the finished card to this path.
    #[clap(long = "copy-to", value_name = "PNG")]
    pub copy_to: Option<PathBuf>,

    /// Write the JSON result here instead of to stdout.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// Accept exactly 12 ASCII digits.
fn parse_national_id(value: &str) -> Result<String> {
    if value.len() == 12 && value.bytes().all(|b| b.is_ascii_digit()) {
        Ok(value.to_owned())
    } else {
        Err(anyhow!("the ID number must be exactly 12 digits"))
    }
}

/// The `generate` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_generate(ui: &Ui, opts: &GenerateOpts) -> Result<()> {
    let config = opts.config.load().await?;
    let pdf = tokio::fs::read(&opts.pdf_path)
        .await
        .with_context(|| format!("cannot read {:?}", opts.pdf_path.display()))?;
    let photo = tokio::fs::read(&opts.photo_path)
        .await
        .with_context(|| format!("cannot read {:?}", opts.photo_path.display()))?;
    let submission =
        Submission::stage(&config.storage, &pdf, &photo, opts.national_id.clone()).await?;
    let pipeline = CardPipeline::new(config);

    let output = ui
        .with_spinner(
            &ProgressConfig {
                emoji: "🪪",
                msg: "Generating card",
                done_msg: "Generated card",
            },
            pipeline.run(&submission),
        )
        .await?;

    if let Some(copy_to) = &opts.copy_to {
        tokio::fs::copy(&output.card_path, copy_to)
            .await
            .with_context(|| format!("cannot copy card to {:?}", copy_to.display()))?;
    }
    write_json(opts.output_path.as_deref(), &output).await
}
