use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod async_utils;
mod calendar;
mod cmd;
mod compose;
mod config;
mod cpu_limit;
mod degradation;
mod extract;
mod ocr;
mod photo;
mod pipeline;
mod prelude;
mod storage;
mod ui;

/// Build printable ID cards from fixed-layout identity PDFs.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
External tools:
  - pdfinfo, pdftotext, pdfimages (from poppler-utils): Required.
  - tesseract: Used when the ID number is missing from the PDF text.

Environment Variables:
  - RUST_LOG (optional): Log filter, for example `fayda_card=debug`.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Generate a card from a PDF and a photo.
    Generate(cmd::generate::GenerateOpts),
    /// Extract fields and images from a PDF, without drawing a card.
    Extract(cmd::extract::ExtractOpts),
    /// Remove the near-white background from a photo.
    Normalize(cmd::normalize::NormalizeOpts),
    /// Show the issue and expiry dates for a card issued on a given day.
    Calendar(cmd::calendar::CalendarOpts),
    /// Delete old uploads, extracted images and cards.
    Clean(cmd::clean::CleanOpts),
    /// Print schemas for config and output formats.
    Schema(cmd::schema::SchemaOpts),
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            Cmd::Generate(opts) => opts.output_path.is_none(),
            Cmd::Extract(opts) => opts.output_path.is_none(),
            Cmd::Normalize(_) | Cmd::Clean(_) => false,
            Cmd::Calendar(_) => true,
            Cmd::Schema(opts) => opts.output_path.is_none(),
        }
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);

    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Hide spinners if we're using stdout for output.
    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    // Run the appropriate subcommand.
    match &opts.subcmd {
        Cmd::Generate(opts) => cmd::generate::cmd_generate(&ui, opts).await?,
        Cmd::Extract(opts) => cmd::extract::cmd_extract(&ui, opts).await?,
        Cmd::Normalize(opts) => cmd::normalize::cmd_normalize(opts).await?,
        Cmd::Calendar(opts) => cmd::calendar::cmd_calendar(opts).await?,
        Cmd::Clean(opts) => cmd::clean::cmd_clean(opts).await?,
        Cmd::Schema(opts) => cmd::schema::cmd_schema(opts).await?,
    }
    Ok(())
}
