//! The `normalize` subcommand.

use clap::Args;
use image::ImageFormat;

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    config::DEFAULT_BACKGROUND_THRESHOLD,
    photo::load_normalized,
    prelude::*,
};

/// Normalize command line arguments.
#[derive(Debug, Args)]
pub struct NormalizeOpts {
    /// The image to process.
    #[clap(value_name = "IMAGE")]
    pub input_path: PathBuf,

    /// Where to write the PNG with its background removed.
    #[clap(short = 'o', long = "out", value_name = "PNG")]
    pub output_path: PathBuf,

    /// Pixels with red, green and blue all above this become transparent.
    #[clap(long, default_value_t = DEFAULT_BACKGROUND_THRESHOLD)]
    pub threshold: u8,
}

/// The `normalize` subcommand.
#[instrument(level = "debug", skip_all, fields(input = %opts.input_path.display()))]
pub async fn cmd_normalize(opts: &NormalizeOpts) -> Result<()> {
    let input = opts.input_path.clone();
    let output = opts.output_path.clone();
    let threshold = opts.threshold;
    spawn_blocking_propagating_panics(move || {
        load_normalized(&input, threshold)?
            .save_with_format(&output, ImageFormat::Png)
            .with_context(|| format!("cannot write {:?}", output.display()))
    })
    .await?;
    info!(output = %opts.output_path.display(), "Wrote normalized image");
    Ok(())
}
