//! Artifact acquisition: find, debounce, and finalize a step's image.
//!
//! A driver either reports the capture path directly or the device uploads
//! it through the file-drop ingress, in which case the file appears in the
//! watched root some time after the step settles. There is no transfer-done
//! signal from the ingress, so a minimum file age (the settle window) is the
//! sole proxy for upload completion.
//!
//! The poll loop is an explicit loop with accumulated elapsed time: keep
//! files strictly newer than the step's dispatch timestamp, pick the newest,
//! defer while it is still inside the settle window, and give up without an
//! error once the wait budget expires with no candidate — a step may
//! legitimately produce no image.

pub mod codec;

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::{sleep, Duration};
use tracing::{debug, info};

use self::codec::ImageCodec;
use crate::error::{ErrorCode, RunError};
use crate::input::StepConfig;
use crate::report::StepResult;
use crate::runner::RunContext;

/// Minimum age before a file is considered fully transferred.
const SETTLE_WINDOW_MS: i64 = 1000;

/// Delay between poll attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Fixed grace added on top of the configured wait budget.
const WAIT_GRACE_MS: u64 = 100;

/// Companion overlay-graphic extension (same stem as the image).
const OVERLAY_EXTENSION: &str = "svg";

/// A discovered candidate file.
#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    modified: DateTime<Utc>,
}

/// Obtain the image for a settled step and finalize it into the result.
///
/// On success the result's `image` is the embedded encoding, or omitted when
/// the bytes were persisted to the configured destination, or `null` when
/// the step produced no image. Finalization failures null the image and
/// abort the run.
pub async fn acquire(
    ctx: &RunContext,
    step: &StepConfig,
    result: &mut StepResult,
) -> Result<(), RunError> {
    let reported = result.reported_image_path().map(PathBuf::from);
    result.clear_image();

    let ftp_root = ctx.config.ftp_root(&ctx.root);
    if ftp_root.is_none() && reported.is_none() {
        return Ok(());
    }

    // Dispatch stamps this before any driver runs; a step that reaches
    // acquisition always carries it.
    let started_at = step.started_at.unwrap_or_else(Utc::now);

    let Some(selected) = poll_for_artifact(
        reported.as_deref(),
        ftp_root.as_deref(),
        started_at,
        ctx.config.wait_for_files_ms() + WAIT_GRACE_MS,
    )
    .await
    else {
        return Ok(());
    };

    finalize(ctx, &selected, result).await
}

/// The time-budgeted poll loop. Returns the selected artifact path, or
/// `None` once the budget expires with no candidate in sight.
async fn poll_for_artifact(
    reported: Option<&Path>,
    ftp_root: Option<&Path>,
    started_at: DateTime<Utc>,
    wait_budget_ms: u64,
) -> Option<PathBuf> {
    let poll_started = Instant::now();
    let wait_budget = Duration::from_millis(wait_budget_ms);
    let settle_window = TimeDelta::milliseconds(SETTLE_WINDOW_MS);

    if reported.is_none() {
        info!("Waiting for image files...");
    }

    loop {
        let mut candidates = match (reported, ftp_root) {
            (Some(path), _) => stat_candidate(path).into_iter().collect(),
            (None, Some(root)) => list_candidates(root),
            (None, None) => Vec::new(),
        };

        // Leftovers from earlier runs are at or before the dispatch stamp.
        candidates.retain(|c| c.modified > started_at);
        candidates.sort_by(|a, b| b.modified.cmp(&a.modified));

        if candidates.is_empty() && poll_started.elapsed() >= wait_budget {
            info!("...waiting for image files expired.");
            return None;
        }

        if let Some(newest) = candidates.first() {
            if Utc::now() - newest.modified >= settle_window {
                if candidates.len() > 1 {
                    info!("Found {} files.", candidates.len());
                }
                info!("Using the latest file: {}", newest.path.display());
                return Some(newest.path.clone());
            }
            // Still inside the settle window — possibly mid-transfer.
            debug!("Newest candidate is still settling: {}", newest.path.display());
        }

        sleep(POLL_INTERVAL).await;
    }
}

fn stat_candidate(path: &Path) -> Option<Candidate> {
    let modified = std::fs::metadata(path).and_then(|meta| meta.modified()).ok()?;
    Some(Candidate {
        path: path.to_path_buf(),
        modified: modified.into(),
    })
}

/// Direct children of the watched root, files only.
fn list_candidates(root: &Path) -> Vec<Candidate> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| stat_candidate(&entry.path()))
        .collect()
}

/// Encode, optionally composite the companion overlay, then persist or
/// embed. Any failure resets `image` to `null` before propagating.
async fn finalize(
    ctx: &RunContext,
    image_path: &Path,
    result: &mut StepResult,
) -> Result<(), RunError> {
    let outcome = finalize_inner(ctx, image_path, result).await;
    if outcome.is_err() {
        result.clear_image();
    }
    outcome
}

async fn finalize_inner(
    ctx: &RunContext,
    image_path: &Path,
    result: &mut StepResult,
) -> Result<(), RunError> {
    info!("Converting the image to WEBP...");
    let mut bytes = ctx.codec.encode(image_path).await.map_err(|err| {
        RunError::new(
            ErrorCode::ImageConvert,
            format!("Failed to convert the image to WEBP: {err}"),
        )
    })?;

    let overlay = image_path.with_extension(OVERLAY_EXTENSION);
    if overlay.exists() {
        info!("Overlaying the graphics on the image...");
        bytes = ctx.codec.composite(&bytes, &overlay).await.map_err(|err| {
            RunError::new(
                ErrorCode::ImageOverlay,
                format!("Failed to overlay graphics on image: {err}"),
            )
        })?;
    }

    if let Some(destination) = ctx.config.write_last_image(&ctx.root) {
        info!("Saving the last image...");
        tokio::fs::write(&destination, &bytes).await.map_err(|err| {
            RunError::new(
                ErrorCode::ImageSave,
                format!("Failed to save the last WEBP: {err}"),
            )
        })?;
        result.omit_image();
    } else {
        result.embed_image(&bytes);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stale_files_are_ignored_and_fresh_selected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("leftover.bmp"), b"old").unwrap();
        sleep(Duration::from_millis(20)).await;
        // The leftover predates the dispatch stamp; the fresh capture lands
        // after it.
        let started_at = Utc::now();
        sleep(Duration::from_millis(20)).await;
        std::fs::write(dir.path().join("capture.bmp"), b"new").unwrap();
        sleep(Duration::from_millis(1100)).await;

        let selected = poll_for_artifact(None, Some(dir.path()), started_at, 3000)
            .await
            .unwrap();
        assert_eq!(selected, dir.path().join("capture.bmp"));
    }

    #[tokio::test]
    async fn file_inside_settle_window_is_deferred_not_selected() {
        let dir = tempfile::tempdir().unwrap();
        let started_at = Utc::now();
        sleep(Duration::from_millis(20)).await;
        std::fs::write(dir.path().join("capture.bmp"), b"fresh").unwrap();

        let poll_started = Instant::now();
        let selected = poll_for_artifact(None, Some(dir.path()), started_at, 5000)
            .await
            .unwrap();

        assert_eq!(selected, dir.path().join("capture.bmp"));
        // Selection had to wait out the settle window.
        assert!(poll_started.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn empty_root_gives_up_without_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let selected = poll_for_artifact(None, Some(dir.path()), Utc::now(), 250).await;
        assert!(selected.is_none());
    }

    #[tokio::test]
    async fn missing_reported_file_gives_up_without_artifact() {
        let missing = Path::new("/nonexistent/capture.bmp");
        let selected = poll_for_artifact(Some(missing), None, Utc::now(), 250).await;
        assert!(selected.is_none());
    }
}
