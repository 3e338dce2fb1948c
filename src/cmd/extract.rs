//! The `extract` subcommand.

use clap::Args;

use crate::{
    async_utils::io::write_json,
    config::ConfigOpts,
    pipeline::{CardPipeline, remove_embedded_images},
    prelude::*,
    ui::{ProgressConfig, Ui},
};

/// Extract command line arguments.
#[derive(Debug, Args)]
pub struct ExtractOpts {
    /// The identity PDF.
    #[clap(value_name = "PDF")]
    pub pdf_path: PathBuf,

    #[clap(flatten)]
    pub config: ConfigOpts,

    /// Leave the extracted images in the images directory.
    #[clap(long)]
    pub keep_images: bool,

    /// Write the JSON result here instead of to stdout.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// The `extract` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_extract(ui: &Ui, opts: &ExtractOpts) -> Result<()> {
    let config = opts.config.load().await?;
    let pipeline = CardPipeline::new(config);
    let extraction = ui
        .with_spinner(
            &ProgressConfig {
                emoji: "📄",
                msg: "Extracting fields",
                done_msg: "Extracted fields",
            },
            pipeline.extract(&opts.pdf_path),
        )
        .await?;
    if !opts.keep_images {
        remove_embedded_images(&extraction.images).await;
    }
    write_json(opts.output_path.as_deref(), &extraction).await
}
