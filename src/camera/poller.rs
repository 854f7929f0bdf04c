//! Shot-completion observer.
//!
//! After a shutter command the camera reports the produced files through its
//! long-poll event channel. This module reposts that poll until the shot's
//! files appear or the per-shot deadline elapses.

use super::CameraControl;
use crate::errors::{ControlError, ControlResult};
use std::time::{Duration, Instant};

/// Window of a single long-poll request.
const POLL_WINDOW: Duration = Duration::from_secs(30);

/// Per-shot completion deadline: `max(8 × interval, 30 s)`.
pub fn shot_deadline(interval_seconds: f64) -> Duration {
    Duration::from_secs_f64((interval_seconds * 8.0).max(30.0))
}

/// Wait for the files produced by the shot just dispatched.
///
/// Returns the ordered list of file paths (RAW+JPEG shots produce two
/// entries). Errors are shot-level: `CAMERA_TIMEOUT` when the deadline
/// expires, `CAMERA_OFFLINE` on transport failure.
#[tracing::instrument(level = "debug", skip(camera))]
pub async fn wait_for_shot(
    camera: &dyn CameraControl,
    deadline: Duration,
) -> ControlResult<Vec<String>> {
    let started = Instant::now();
    loop {
        let remaining = deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(ControlError::camera_timeout(format!(
                "shot did not complete within {}s",
                deadline.as_secs()
            )));
        }
        let files = camera
            .poll_added_contents(remaining.min(POLL_WINDOW))
            .await?;
        if !files.is_empty() {
            tracing::debug!(count = files.len(), "shot completed");
            return Ok(files);
        }
        // Empty poll: the camera is still writing. Repost.
    }
}

/// Basename of the first produced file, the shot's canonical filename.
pub fn canonical_filename(files: &[String]) -> Option<String> {
    files.first().map(|path| {
        path.rsplit(['/', '\\'])
            .next()
            .unwrap_or(path.as_str())
            .to_owned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::testing::ScriptedCamera;

    #[test]
    fn deadline_has_a_floor() {
        assert_eq!(shot_deadline(1.0), Duration::from_secs(30));
        assert_eq!(shot_deadline(10.0), Duration::from_secs(80));
    }

    #[test]
    fn canonical_filename_takes_first_basename() {
        let files = vec![
            "100CANON/IMG_0001.CR3".to_owned(),
            "100CANON/IMG_0001.JPG".to_owned(),
        ];
        assert_eq!(canonical_filename(&files).as_deref(), Some("IMG_0001.CR3"));
        assert_eq!(canonical_filename(&[]), None);
    }

    #[tokio::test]
    async fn completed_shot_returns_files() -> eyre::Result<()> {
        let camera = ScriptedCamera::new(Duration::from_millis(20));
        camera.take_photo().await?;
        let files = wait_for_shot(&camera, Duration::from_secs(5)).await?;
        assert_eq!(files, vec!["100CANON/IMG_0001.JPG".to_owned()]);
        Ok(())
    }

    #[tokio::test]
    async fn deadline_expiry_is_a_timeout() {
        let camera = ScriptedCamera::new(Duration::from_millis(40));
        // No shot dispatched: polls keep coming back empty.
        let err = wait_for_shot(&camera, Duration::from_millis(100))
            .await
            .expect_err("deadline should expire");
        assert_eq!(err.code, crate::errors::ErrorCode::CameraTimeout);
    }
}
