use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde_json::json;

use crate::config::UpgradeConfig;
use crate::upgrade::version_check::is_newer;
use crate::upgrade::{HttpClient, SelfUpdater, UpdateContext, UpdateOutcome};

/// Command to update selfup to the latest release.
///
/// Without flags this runs one update attempt exactly like the startup hook
/// of a host application would: it honors the check interval, takes the
/// update lock, downloads and verifies the asset, and replaces the running
/// executable. Every outcome, including "nothing to do", exits with status 0.
///
/// # Examples
///
/// ```bash
/// # Update if the last check is older than the check interval
/// selfup upgrade
///
/// # Check now, and reinstall even if already on the latest release
/// selfup upgrade --force
///
/// # Only report whether a newer release exists
/// selfup upgrade --check
///
/// # Machine-readable outcome
/// selfup upgrade --json
/// ```
#[derive(Args, Debug, Default)]
pub struct UpgradeArgs {
    /// Bypass the check interval and reinstall even when already up to date.
    #[arg(short, long)]
    pub force: bool,

    /// Print the result as JSON on stdout.
    #[arg(long)]
    pub json: bool,

    /// Only check whether a newer release is available.
    ///
    /// Queries the release index directly. The check interval, the update
    /// lock and the last-check timestamp are left alone.
    #[arg(long, conflicts_with_all = ["status", "force"])]
    pub check: bool,

    /// Show the current version, platform, repository and last check time.
    ///
    /// Makes no network requests.
    #[arg(short, long, conflicts_with = "force")]
    pub status: bool,
}

/// Execute the upgrade command.
///
/// # Errors
///
/// Returns an error when configuration cannot be loaded, the running
/// executable cannot be located, or `--check` fails to reach the release
/// index. Update attempts themselves never fail; their outcome is printed.
pub async fn execute(args: UpgradeArgs, show_progress: bool) -> Result<()> {
    let config = UpgradeConfig::load().await.context("Failed to load upgrade configuration")?;
    let context = UpdateContext::detect(config).context("Failed to inspect the running executable")?;
    let updater = SelfUpdater::new(context)
        .context("Failed to initialize HTTP client")?
        .with_progress(show_progress && !args.json);

    if args.status {
        return show_status(&updater, args.json).await;
    }
    if args.check {
        return check_for_updates(&updater, args.json).await;
    }

    if !args.json {
        println!("{}", "Checking for updates...".cyan());
    }
    let outcome = updater.check_and_update(args.force).await;
    if args.json {
        println!("{}", serde_json::to_string(&outcome)?);
    } else {
        println!("{}", format_outcome(&outcome));
    }
    Ok(())
}

async fn show_status<C: HttpClient>(updater: &SelfUpdater<C>, json: bool) -> Result<()> {
    let context = updater.context();
    let state = updater.state().load().await;
    let platform = context.platform.map(|p| p.to_string());
    let repo = context.config.repo_slug().map(|r| r.to_string());
    let last_check = format_last_check(state.last_check_epoch_millis);

    if json {
        let status = json!({
            "version": context.current_version,
            "platform": platform,
            "packaged": context.packaged,
            "repo": repo,
            "lastCheck": last_check,
            "home": context.config.home_dir,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{} {}", "Version:   ".bold(), context.current_version);
    println!("{} {}", "Platform:  ".bold(), platform.as_deref().unwrap_or("unsupported"));
    println!("{} {}", "Packaged:  ".bold(), if context.packaged { "yes" } else { "no" });
    println!("{} {}", "Repository:".bold(), repo.as_deref().unwrap_or("not configured"));
    println!("{} {}", "Last check:".bold(), last_check.as_deref().unwrap_or("never"));
    println!("{} {}", "Home:      ".bold(), context.config.home_dir.display());
    Ok(())
}

async fn check_for_updates<C: HttpClient>(updater: &SelfUpdater<C>, json: bool) -> Result<()> {
    let current = &updater.context().current_version;
    if !json {
        println!("{}", "Checking for updates...".cyan());
    }

    let latest = match updater.latest_release().await {
        Ok(release) => release,
        Err(e) => bail!("Failed to check for updates: {e}"),
    };
    let available = is_newer(&latest.version, current);

    if json {
        let report = json!({
            "current": current,
            "latest": latest.version,
            "updateAvailable": available,
        });
        println!("{}", serde_json::to_string(&report)?);
    } else if available {
        println!("{}", format!("Update available: {} -> {}", current, latest.version).green());
        println!("Run `selfup upgrade` to install the latest version");
    } else {
        println!("{}", format!("You are on the latest version ({current})").green());
    }
    Ok(())
}

/// Human-readable line for an update outcome.
fn format_outcome(outcome: &UpdateOutcome) -> String {
    match (&outcome.reason, outcome.replaced) {
        (_, true) => "Update installed; restart to use the new version".green().to_string(),
        (Some(reason), false) => format!("No update applied: {reason}").yellow().to_string(),
        (None, false) => "No update applied".yellow().to_string(),
    }
}

/// RFC 3339 rendering of a last-check timestamp; `None` when never checked.
fn format_last_check(epoch_millis: i64) -> Option<String> {
    if epoch_millis <= 0 {
        return None;
    }
    DateTime::<Utc>::from_timestamp_millis(epoch_millis).map(|t| t.to_rfc3339())
}
