//! Failure-time diagnostics
//!
//! Decides which artifacts an attempt records and keeps, and collects their
//! references from the execution context once the attempt is sealed.

use gauntlet_common::{ArtifactKind, ArtifactPolicy, RecordingMode, ScreenshotMode};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::attempt::{ArtifactRef, AttemptStatus};
use crate::context::SharedContext;
use crate::matrix::WorkItemId;

/// Recordings that must be running from the start of attempt `number`
pub fn recordings_for(policy: &ArtifactPolicy, number: u32) -> Vec<ArtifactKind> {
    [(ArtifactKind::Trace, policy.trace), (ArtifactKind::Video, policy.video)]
        .into_iter()
        .filter(|(_, mode)| match mode {
            RecordingMode::Off => false,
            RecordingMode::On | RecordingMode::RetainOnFailure => true,
            RecordingMode::OnFirstRetry => number == 2,
        })
        .map(|(kind, _)| kind)
        .collect()
}

/// Artifacts to collect for an attempt sealed with `status`.
///
/// Nothing is kept for passed or skipped attempts unless a mode is `on`.
/// `on-first-retry` recordings are kept only when the first retry fails.
pub fn kinds_to_capture(
    policy: &ArtifactPolicy,
    status: AttemptStatus,
    number: u32,
) -> Vec<ArtifactKind> {
    let failed = status.is_failure();
    let mut kinds = Vec::new();

    let screenshot = match policy.screenshot {
        ScreenshotMode::Off => false,
        ScreenshotMode::On => status != AttemptStatus::Skipped,
        ScreenshotMode::OnlyOnFailure => failed,
    };
    if screenshot {
        kinds.push(ArtifactKind::Screenshot);
    }

    for (kind, mode) in [(ArtifactKind::Trace, policy.trace), (ArtifactKind::Video, policy.video)] {
        let keep = match mode {
            RecordingMode::Off => false,
            RecordingMode::On => status != AttemptStatus::Skipped,
            RecordingMode::RetainOnFailure => failed,
            RecordingMode::OnFirstRetry => failed && number == 2,
        };
        if keep {
            kinds.push(kind);
        }
    }

    kinds
}

/// `<output_dir>/<work-item-slug>/attempt-<n>`
pub fn attempt_dir(output_dir: &Path, item: &WorkItemId, number: u32) -> PathBuf {
    output_dir.join(item.slug()).join(format!("attempt-{}", number))
}

/// Ask the context for each artifact kind. Capture failures are logged and
/// skipped; they never change the attempt's status.
pub(crate) async fn capture_all(
    context: &SharedContext,
    kinds: &[ArtifactKind],
    dir: &Path,
) -> Vec<ArtifactRef> {
    if kinds.is_empty() {
        return Vec::new();
    }
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        warn!("Cannot create artifact directory {}: {}", dir.display(), e);
        return Vec::new();
    }

    let mut refs = Vec::with_capacity(kinds.len());
    let mut page = context.lock().await;
    for kind in kinds {
        let path = dir.join(kind.file_name());
        match page.capture(*kind, &path).await {
            Ok(artifact) => {
                debug!("Captured {} at {}", kind, artifact.path.display());
                refs.push(artifact);
            }
            Err(e) => warn!("Failed to capture {}: {}", kind, e),
        }
    }
    refs
}
