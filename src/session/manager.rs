//! Single-session lifecycle and terminal-state persistence.

use super::report::{Report, ReportStore, UnsavedSession};
use super::{IntervalometerSession, SessionOptions, SessionSnapshot};
use crate::camera::PrimaryCamera;
use crate::clock;
use crate::errors::{ControlError, ControlResult};
use crate::events::{ActivityLevel, Event, EventBus, ManagerEvent, SessionEvent};
use std::sync::Arc;
use uuid::Uuid;

/// Owner of the active-session slot and of reports after completion.
///
/// Process-wide invariant: at most one session is in `running | paused`.
/// The slot is mutated only here, under its lock.
#[derive(derive_more::Debug)]
pub struct SessionManager {
    #[debug(skip)]
    active: tokio::sync::Mutex<Option<Arc<IntervalometerSession>>>,
    store: ReportStore,
    #[debug(skip)]
    camera: Arc<dyn PrimaryCamera>,
    #[debug(skip)]
    bus: EventBus,
}

impl SessionManager {
    pub fn new(store: ReportStore, camera: Arc<dyn PrimaryCamera>, bus: EventBus) -> Arc<Self> {
        Arc::new(Self {
            active: tokio::sync::Mutex::new(None),
            store,
            camera,
            bus,
        })
    }

    /// Create and start a session. Fails while another is active.
    #[tracing::instrument(level = "info", skip(self, options), fields(title = options.title))]
    pub async fn create_and_start(&self, options: SessionOptions) -> ControlResult<SessionSnapshot> {
        let mut slot = self.active.lock().await;
        if slot.as_ref().is_some_and(|session| session.is_active()) {
            return Err(ControlError::operation_failed(
                "an intervalometer session is already active",
            ));
        }
        options.validate()?;
        let session =
            IntervalometerSession::new(options, Arc::clone(&self.camera), self.bus.clone());
        session.start().await?;
        let snapshot = session.snapshot();
        *slot = Some(session);
        drop(slot);
        self.bus.manager(ManagerEvent::SessionStarted {
            session: snapshot.clone(),
        });
        Ok(snapshot)
    }

    pub async fn stop_active(&self) -> ControlResult<()> {
        let slot = self.active.lock().await;
        match slot.as_ref() {
            Some(session) if session.is_active() => session.stop(),
            _ => Err(ControlError::operation_failed("no active session to stop")),
        }
    }

    pub async fn pause_active(&self) -> ControlResult<()> {
        let slot = self.active.lock().await;
        match slot.as_ref() {
            Some(session) => session.pause(),
            None => Err(ControlError::operation_failed("no active session")),
        }
    }

    pub async fn resume_active(&self) -> ControlResult<()> {
        let slot = self.active.lock().await;
        match slot.as_ref() {
            Some(session) => session.resume(),
            None => Err(ControlError::operation_failed("no active session")),
        }
    }

    /// Latest session (possibly already terminal), for status snapshots.
    pub async fn current_snapshot(&self) -> Option<SessionSnapshot> {
        let slot = self.active.lock().await;
        slot.as_ref().map(|session| session.snapshot())
    }

    /// Stop and await nothing further; used during graceful shutdown.
    pub async fn shutdown(&self) {
        if let Err(err) = self.stop_active().await {
            tracing::debug!(%err, "no session to stop at shutdown");
        }
    }

    /// Subscribe to session events and persist terminal transitions.
    pub fn spawn_terminal_handler(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut rx = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(Event::Session(event)) => {
                        if event.terminal_reason().is_some() {
                            manager.handle_terminal(&event).await;
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "terminal handler lagged behind the event bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        })
    }

    #[tracing::instrument(level = "info", skip(self, event))]
    async fn handle_terminal(&self, event: &SessionEvent) {
        let snapshot = event.session();
        let reason = event.terminal_reason().unwrap_or("Unknown");

        let (camera_info, camera_settings) = {
            let slot = self.active.lock().await;
            match slot.as_ref() {
                Some(session) if session.id() == snapshot.id => {
                    (session.camera_info(), session.camera_settings())
                }
                _ => (None, None),
            }
        };

        let mut report = Report::from_completion(snapshot, reason, camera_info, camera_settings);

        // The completion payload goes into the unsaved slot before the save
        // attempt, so the save path always has a payload even if this
        // process dies mid-way.
        let unsaved = UnsavedSession {
            session_id: snapshot.id,
            report: report.clone(),
            needs_user_decision: true,
            recorded_at: clock::wall_now(),
        };
        if let Err(err) = self.store.write_unsaved(&unsaved).await {
            tracing::error!(%err, "failed to stage unsaved session");
        }

        let needs_user_decision = match self.store.save(&mut report).await {
            Ok(()) => {
                if let Err(err) = self.store.clear_unsaved().await {
                    tracing::warn!(%err, "failed to clear unsaved-session file");
                }
                self.bus.manager(ManagerEvent::ReportSaved {
                    report_id: report.id.clone(),
                });
                false
            }
            Err(err) => {
                tracing::error!(%err, "report auto-save failed; awaiting user decision");
                self.bus.activity(
                    ActivityLevel::Error,
                    format!("Failed to save report for '{}': {err}", snapshot.title),
                );
                true
            }
        };

        self.bus.manager(match event {
            SessionEvent::Completed { reason, .. } => ManagerEvent::SessionCompleted {
                session: snapshot.clone(),
                reason: reason.clone(),
                needs_user_decision,
            },
            SessionEvent::Error { reason, .. } => ManagerEvent::SessionError {
                session: snapshot.clone(),
                reason: reason.clone(),
                needs_user_decision,
            },
            _ => ManagerEvent::SessionStopped {
                session: snapshot.clone(),
                needs_user_decision,
            },
        });
    }

    /// Cross-restart recovery: surface a leftover unsaved session, if any.
    pub async fn check_unsaved_on_startup(&self) {
        if let Some(unsaved) = self.store.read_unsaved().await {
            tracing::info!(session_id = %unsaved.session_id, "found unsaved session from a previous run");
            self.bus.manager(ManagerEvent::UnsavedSessionFound {
                session_id: unsaved.session_id,
                title: unsaved.report.title.clone(),
            });
        }
    }

    pub async fn unsaved_session(&self) -> Option<UnsavedSession> {
        self.store.read_unsaved().await
    }

    /// User decision: keep the unsaved session as a report.
    pub async fn save_unsaved(
        &self,
        session_id: Uuid,
        title: Option<&str>,
    ) -> ControlResult<Report> {
        let unsaved = self
            .store
            .read_unsaved()
            .await
            .ok_or_else(|| ControlError::session_not_found("no unsaved session"))?;
        if unsaved.session_id != session_id {
            return Err(ControlError::session_not_found(format!(
                "unsaved session is not '{session_id}'"
            )));
        }
        let mut report = unsaved.report;
        if let Some(title) = title.map(str::trim).filter(|title| !title.is_empty()) {
            report.title = title.to_owned();
        }
        self.store.save(&mut report).await?;
        self.store.clear_unsaved().await?;
        self.bus.manager(ManagerEvent::ReportSaved {
            report_id: report.id.clone(),
        });
        Ok(report)
    }

    /// User decision: drop the unsaved session.
    pub async fn discard_unsaved(&self, session_id: Uuid) -> ControlResult<()> {
        let unsaved = self
            .store
            .read_unsaved()
            .await
            .ok_or_else(|| ControlError::session_not_found("no unsaved session"))?;
        if unsaved.session_id != session_id {
            return Err(ControlError::session_not_found(format!(
                "unsaved session is not '{session_id}'"
            )));
        }
        self.store.clear_unsaved().await?;
        self.bus.manager(ManagerEvent::SessionDiscarded { session_id });
        Ok(())
    }

    pub async fn list_reports(&self) -> ControlResult<Vec<Report>> {
        self.store.list().await
    }

    pub async fn get_report(&self, id: &str) -> ControlResult<Report> {
        self.store.load(id).await
    }

    pub async fn update_report_title(&self, id: &str, title: &str) -> ControlResult<Report> {
        self.store.update_title(id, title).await
    }

    pub async fn delete_report(&self, id: &str) -> ControlResult<()> {
        self.store.delete(id).await?;
        self.bus.manager(ManagerEvent::ReportDeleted {
            report_id: id.to_owned(),
        });
        Ok(())
    }
}
