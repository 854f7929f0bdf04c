//! Typed event fabric connecting the subsystems.
//!
//! Subsystems publish closed sets of event variants to a broadcast bus owned
//! by the composition root; the report manager and the WebSocket broadcaster
//! subscribe. Nothing holds a direct reference to its consumers, which keeps
//! the Session / ReportManager / Broadcast triangle acyclic.

use crate::session::SessionSnapshot;
use crate::timesync::TimeSyncStatus;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events produced by an intervalometer session. Each carries a full
/// snapshot of the session's stats at emission time.
#[derive(Debug, Clone, Serialize)]
#[serde(
    tag = "eventType",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum SessionEvent {
    Started {
        session: SessionSnapshot,
    },
    Paused {
        session: SessionSnapshot,
    },
    Resumed {
        session: SessionSnapshot,
    },
    PhotoTaken {
        shot_number: u32,
        filename: String,
        session: SessionSnapshot,
    },
    PhotoOvertime {
        shot_number: u32,
        overtime_seconds: f64,
        session: SessionSnapshot,
    },
    PhotoFailed {
        shot_number: u32,
        error: String,
        session: SessionSnapshot,
    },
    Completed {
        reason: String,
        session: SessionSnapshot,
    },
    Stopped {
        session: SessionSnapshot,
    },
    Error {
        reason: String,
        session: SessionSnapshot,
    },
}

impl SessionEvent {
    /// Snapshot carried by this event.
    pub fn session(&self) -> &SessionSnapshot {
        match self {
            Self::Started { session }
            | Self::Paused { session }
            | Self::Resumed { session }
            | Self::PhotoTaken { session, .. }
            | Self::PhotoOvertime { session, .. }
            | Self::PhotoFailed { session, .. }
            | Self::Completed { session, .. }
            | Self::Stopped { session }
            | Self::Error { session, .. } => session,
        }
    }

    /// Terminal reason, if this is a terminal event.
    pub fn terminal_reason(&self) -> Option<&str> {
        match self {
            Self::Completed { reason, .. } | Self::Error { reason, .. } => Some(reason),
            Self::Stopped { .. } => Some("Stopped by user"),
            _ => None,
        }
    }
}

/// Events produced by the session/report manager.
#[derive(Debug, Clone, Serialize)]
#[serde(
    tag = "eventType",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ManagerEvent {
    SessionStarted {
        session: SessionSnapshot,
    },
    SessionStopped {
        session: SessionSnapshot,
        needs_user_decision: bool,
    },
    SessionCompleted {
        session: SessionSnapshot,
        reason: String,
        needs_user_decision: bool,
    },
    SessionError {
        session: SessionSnapshot,
        reason: String,
        needs_user_decision: bool,
    },
    ReportSaved {
        report_id: String,
    },
    ReportDeleted {
        report_id: String,
    },
    UnsavedSessionFound {
        session_id: Uuid,
        title: String,
    },
    SessionDiscarded {
        session_id: Uuid,
    },
}

/// Events produced by camera discovery and the registry.
#[derive(Debug, Clone, Serialize)]
#[serde(
    tag = "eventType",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum DiscoveryEvent {
    CameraDiscovered {
        uuid: String,
        ip_address: String,
        model_name: Option<String>,
    },
    CameraConnected {
        uuid: String,
        ip_address: String,
    },
    CameraOffline {
        uuid: String,
    },
    CameraIpChanged {
        uuid: String,
        ip_address: String,
    },
    PrimaryCameraChanged {
        uuid: String,
    },
    PrimaryCameraDisconnected {
        uuid: String,
    },
    CameraError {
        uuid: String,
        error: String,
    },
}

/// Human-readable notice mirrored to connected UIs.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityLog {
    pub level: ActivityLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Info,
    Warning,
    Error,
}

/// Union of all bus traffic.
#[derive(Debug, Clone)]
pub enum Event {
    Session(SessionEvent),
    Manager(ManagerEvent),
    Discovery(DiscoveryEvent),
    TimeSync(TimeSyncStatus),
    Activity(ActivityLog),
}

/// Broadcast bus. Cloning is cheap; all clones publish to the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(128);
        Self { tx }
    }

    pub fn publish(&self, event: Event) {
        // A send error only means there are no subscribers yet.
        if self.tx.send(event).is_err() {
            tracing::trace!("event published with no subscribers");
        }
    }

    pub fn session(&self, event: SessionEvent) {
        self.publish(Event::Session(event));
    }

    pub fn manager(&self, event: ManagerEvent) {
        self.publish(Event::Manager(event));
    }

    pub fn discovery(&self, event: DiscoveryEvent) {
        self.publish(Event::Discovery(event));
    }

    pub fn activity(&self, level: ActivityLevel, message: impl Into<String>) {
        self.publish(Event::Activity(ActivityLog {
            level,
            message: message.into(),
        }));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
