//! The `calendar` subcommand.

use chrono::NaiveDate;
use clap::Args;

use crate::{
    calendar::{CardValidity, EthiopianDate},
    config::DEFAULT_VALIDITY_YEARS,
    prelude::*,
};

/// Calendar command line arguments.
#[derive(Debug, Args)]
pub struct CalendarOpts {
    /// Gregorian issue date as YYYY-MM-DD. Defaults to today.
    #[clap(value_name = "DATE", conflicts_with = "ethiopian")]
    pub date: Option<NaiveDate>,

    /// Give the issue date in the Ethiopian calendar instead, as DD/MM/YYYY.
    #[clap(long, value_name = "DATE")]
    pub ethiopian: Option<EthiopianDate>,

    /// How many years the card is valid for.
    #[clap(long, default_value_t = DEFAULT_VALIDITY_YEARS)]
    pub years: u32,
}

/// The `calendar` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_calendar(opts: &CalendarOpts) -> Result<()> {
    let date = match (opts.date, opts.ethiopian) {
        (Some(date), _) => date,
        (None, Some(ethiopian)) => ethiopian
            .to_gregorian()
            .ok_or_else(|| anyhow!("{ethiopian} is out of range"))?,
        (None, None) => chrono::Local::now().date_naive(),
    };
    let validity = CardValidity::starting(date, opts.years)?;
    println!("{}", render(&validity));
    Ok(())
}

/// The stamps as printed on the card.
fn render(validity: &CardValidity) -> String {
    format!(
        "issued (gregorian): {}\nissued (ethiopian): {}\nexpires: {}",
        validity.issued.gregorian_text(),
        validity.issued.ethiopian_text(),
        validity.expires.combined_text(),
    )
}
