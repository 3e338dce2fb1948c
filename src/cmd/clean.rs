//! The `clean` subcommand.

use std::time::Duration;

use clap::Args;

use crate::{async_utils::spawn_blocking_propagating_panics, config::ConfigOpts, prelude::*};

/// Clean command line arguments.
#[derive(Debug, Args)]
pub struct CleanOpts {
    #[clap(flatten)]
    pub config: ConfigOpts,

    /// Delete files last modified more than this many minutes ago.
    #[clap(long, default_value_t = 60)]
    pub max_age_minutes: u64,
}

/// The `clean` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_clean(opts: &CleanOpts) -> Result<()> {
    let max_age = minutes(opts.max_age_minutes)?;
    let storage = opts.config.load().await?.storage;
    let removed =
        spawn_blocking_propagating_panics(move || storage.remove_older_than(max_age)).await?;
    info!(removed, "Cleaned up old files");
    Ok(())
}

fn minutes(minutes: u64) -> Result<Duration> {
    minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow!("--max-age-minutes {minutes} is too large"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_minutes() {
        assert_eq!(minutes(0).unwrap(), Duration::ZERO);
        assert_eq!(minutes(60).unwrap(), Duration::from_secs(3600));
        assert!(minutes(u64::MAX).is_err());
    }
}
