//! Durable session reports.
//!
//! One JSON file per report under `<data>/timelapse-reports/reports/`, plus
//! at most one `unsaved-session.json` holding a terminal session that could
//! not be auto-saved and awaits a user decision.

use super::{SessionOptions, SessionSnapshot, SessionState, SessionStats};
use crate::clock;
use crate::errors::{ControlError, ControlResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use uuid::Uuid;

/// Current report layout. Legacy files carried the options under `settings`;
/// the reader accepts both, the writer emits only this version.
pub const REPORT_VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub completion_reason: String,
    #[serde(with = "time::serde::rfc3339")]
    pub saved_at: OffsetDateTime,
    pub version: String,
}

/// Immutable snapshot of a finished session. Once written, only `title` may
/// be updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub session_id: Uuid,
    pub title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_time: OffsetDateTime,
    /// Whole seconds between start and end.
    pub duration: i64,
    pub status: SessionState,
    #[serde(alias = "settings")]
    pub intervalometer: SessionOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_info: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_settings: Option<serde_json::Value>,
    pub results: SessionStats,
    pub metadata: ReportMetadata,
}

impl Report {
    /// Build the completion payload for a terminal session.
    pub fn from_completion(
        snapshot: &SessionSnapshot,
        reason: &str,
        camera_info: Option<serde_json::Value>,
        camera_settings: Option<serde_json::Value>,
    ) -> Self {
        let now = clock::wall_now();
        let start_time = snapshot.stats.start_time.unwrap_or(now);
        let end_time = snapshot.stats.end_time.unwrap_or(now);
        Self {
            id: format!("report-{}", Uuid::new_v4()),
            session_id: snapshot.id,
            title: snapshot.title.clone(),
            start_time,
            end_time,
            duration: (end_time - start_time).whole_seconds(),
            status: snapshot.state,
            intervalometer: snapshot.options.clone(),
            camera_info,
            camera_settings,
            results: snapshot.stats.clone(),
            metadata: ReportMetadata {
                completion_reason: reason.to_owned(),
                saved_at: start_time,
                version: REPORT_VERSION.to_owned(),
            },
        }
    }
}

/// Terminal session retained on disk until the user saves or discards it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsavedSession {
    pub session_id: Uuid,
    /// Completion payload, written before any save attempt so the save path
    /// always has one.
    pub report: Report,
    pub needs_user_decision: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

/// Filesystem layout owner for reports.
#[derive(Debug, Clone)]
pub struct ReportStore {
    reports_dir: PathBuf,
    unsaved_path: PathBuf,
}

fn io_err(operation: &str, err: &std::io::Error) -> ControlError {
    ControlError::operation_failed(format!("{operation}: {err}"))
        .in_context("reports", operation.to_owned())
}

fn valid_report_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl ReportStore {
    pub async fn open(data_dir: &Path) -> eyre::Result<Self> {
        let base = data_dir.join("timelapse-reports");
        let reports_dir = base.join("reports");
        tokio::fs::create_dir_all(&reports_dir).await?;
        Ok(Self {
            reports_dir,
            unsaved_path: base.join("unsaved-session.json"),
        })
    }

    fn path_for(&self, id: &str) -> ControlResult<PathBuf> {
        if !valid_report_id(id) {
            return Err(ControlError::session_not_found(format!(
                "invalid report id '{id}'"
            )));
        }
        Ok(self.reports_dir.join(format!("{id}.json")))
    }

    async fn write_report(&self, report: &Report) -> ControlResult<()> {
        let path = self.path_for(&report.id)?;
        let bytes = serde_json::to_vec_pretty(report)
            .map_err(|err| ControlError::operation_failed(format!("report encoding: {err}")))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|err| io_err("write report", &err))
    }

    /// Persist a report, stamping `metadata.savedAt` with the write moment.
    #[tracing::instrument(level = "info", skip(self, report), fields(id = report.id))]
    pub async fn save(&self, report: &mut Report) -> ControlResult<()> {
        report.metadata.saved_at = clock::wall_now();
        self.write_report(report).await
    }

    pub async fn load(&self, id: &str) -> ControlResult<Report> {
        let path = self.path_for(id)?;
        let bytes = tokio::fs::read(&path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ControlError::session_not_found(format!("report '{id}' not found"))
            } else {
                io_err("read report", &err)
            }
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|err| ControlError::operation_failed(format!("report '{id}' is corrupt: {err}")))
    }

    /// All reports, newest first. Unreadable files are skipped with a log.
    pub async fn list(&self) -> ControlResult<Vec<Report>> {
        let mut dir = tokio::fs::read_dir(&self.reports_dir)
            .await
            .map_err(|err| io_err("list reports", &err))?;
        let mut reports = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|err| io_err("list reports", &err))?
        {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<Report>(&bytes) {
                    Ok(report) => reports.push(report),
                    Err(err) => tracing::warn!(?path, %err, "skipping unreadable report"),
                },
                Err(err) => tracing::warn!(?path, %err, "skipping unreadable report"),
            }
        }
        reports.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(reports)
    }

    /// Idempotent: deleting an absent report succeeds.
    pub async fn delete(&self, id: &str) -> ControlResult<()> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err("delete report", &err)),
        }
    }

    /// The only mutation allowed after a report is written. `savedAt` is
    /// deliberately left untouched.
    pub async fn update_title(&self, id: &str, title: &str) -> ControlResult<Report> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ControlError::invalid_parameter("title must not be blank"));
        }
        let mut report = self.load(id).await?;
        if report.title != title {
            report.title = title.to_owned();
            self.write_report(&report).await?;
        }
        Ok(report)
    }

    pub async fn write_unsaved(&self, unsaved: &UnsavedSession) -> ControlResult<()> {
        let bytes = serde_json::to_vec_pretty(unsaved)
            .map_err(|err| ControlError::operation_failed(format!("unsaved encoding: {err}")))?;
        tokio::fs::write(&self.unsaved_path, bytes)
            .await
            .map_err(|err| io_err("write unsaved session", &err))
    }

    pub async fn read_unsaved(&self) -> Option<UnsavedSession> {
        let bytes = tokio::fs::read(&self.unsaved_path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(unsaved) => Some(unsaved),
            Err(err) => {
                tracing::warn!(%err, "unsaved-session file is corrupt; ignoring");
                None
            }
        }
    }

    /// Idempotent.
    pub async fn clear_unsaved(&self) -> ControlResult<()> {
        match tokio::fs::remove_file(&self.unsaved_path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err("clear unsaved session", &err)),
        }
    }
}
