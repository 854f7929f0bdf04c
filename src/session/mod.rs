//! Intervalometer session: state machine and absolute-time shot scheduler.
//!
//! Shots are scheduled at absolute wall-clock times `S_n = S0 + (n-1)·interval`
//! rather than by sleeping the interval after each shot, so long exposures
//! never accumulate drift. A shot whose nominal time has already passed when
//! the scheduler reaches it fires immediately and is accounted as overtime;
//! indices are never skipped.

pub mod manager;
pub mod report;

use crate::camera::{poller, PrimaryCamera};
use crate::clock;
use crate::errors::{ControlError, ControlResult};
use crate::events::{EventBus, SessionEvent};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use uuid::Uuid;

/// Lateness below this is scheduling jitter, not overtime.
const OVERTIME_EPSILON: Duration = Duration::from_millis(100);
/// Shots before the failure-rate guard may trip.
const FAILURE_GUARD_MIN_SHOTS: u32 = 5;
const FAILURE_GUARD_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Created,
    Running,
    Paused,
    Stopped,
    Completed,
    Error,
}

impl SessionState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Completed | Self::Error)
    }

    pub const fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopCondition {
    Unlimited,
    Shots,
    Time,
}

/// Immutable input to a timelapse run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    /// Seconds between nominal shot times.
    pub interval: f64,
    #[serde(default = "default_stop_condition")]
    pub stop_condition: StopCondition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_shots: Option<u32>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub stop_time: Option<OffsetDateTime>,
    #[serde(default)]
    pub title: String,
}

const fn default_stop_condition() -> StopCondition {
    StopCondition::Unlimited
}

impl SessionOptions {
    pub fn validate(&self) -> ControlResult<()> {
        if !self.interval.is_finite() || self.interval <= 0.0 {
            return Err(ControlError::invalid_parameter(
                "interval must be a positive number of seconds",
            ));
        }
        match self.stop_condition {
            StopCondition::Shots => {
                if !self.total_shots.is_some_and(|shots| shots > 0) {
                    return Err(ControlError::invalid_parameter(
                        "stop condition 'shots' requires totalShots > 0",
                    ));
                }
            }
            StopCondition::Time => {
                if self.stop_time.is_none() {
                    return Err(ControlError::missing_parameter("stopTime"));
                }
            }
            StopCondition::Unlimited => {}
        }
        Ok(())
    }
}

/// One recorded shot failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShotError {
    pub shot_number: u32,
    pub error: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Counters owned exclusively by the session's scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start_time: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    pub shots_taken: u32,
    pub shots_successful: u32,
    pub shots_failed: u32,
    pub current_shot: u32,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub next_shot_time: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_image_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_image_name: Option<String>,
    pub overtime_shots: u32,
    pub total_overtime_seconds: f64,
    pub max_overtime_seconds: f64,
    pub last_shot_duration: f64,
    pub total_shot_duration_seconds: f64,
    #[serde(default)]
    pub errors: Vec<ShotError>,
}

/// Self-contained view of a session, carried by every emitted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub title: String,
    pub state: SessionState,
    pub options: SessionOptions,
    pub stats: SessionStats,
    /// `totalShotDurationSeconds / shotsSuccessful`, zero before any success.
    pub average_shot_duration: f64,
}

/// A single timelapse run.
#[derive(derive_more::Debug)]
pub struct IntervalometerSession {
    id: Uuid,
    options: SessionOptions,
    /// Shot budget fixed at actual start (derived from `stop_time` when
    /// `total_shots` is absent).
    resolved_shots: Mutex<Option<u32>>,
    state: Mutex<SessionState>,
    stats: Mutex<SessionStats>,
    camera_info: Mutex<Option<serde_json::Value>>,
    camera_settings: Mutex<Option<serde_json::Value>>,
    stopping: AtomicBool,
    #[debug(skip)]
    stop_tx: tokio::sync::watch::Sender<bool>,
    #[debug(skip)]
    pause_tx: tokio::sync::watch::Sender<bool>,
    #[debug(skip)]
    camera: Arc<dyn PrimaryCamera>,
    #[debug(skip)]
    bus: EventBus,
}

fn lock<'mutex, T>(mutex: &'mutex Mutex<T>) -> MutexGuard<'mutex, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl IntervalometerSession {
    pub fn new(options: SessionOptions, camera: Arc<dyn PrimaryCamera>, bus: EventBus) -> Arc<Self> {
        let (stop_tx, _) = tokio::sync::watch::channel(false);
        let (pause_tx, _) = tokio::sync::watch::channel(false);
        Arc::new(Self {
            id: Uuid::new_v4(),
            options,
            resolved_shots: Mutex::new(None),
            state: Mutex::new(SessionState::Created),
            stats: Mutex::new(SessionStats::default()),
            camera_info: Mutex::new(None),
            camera_settings: Mutex::new(None),
            stopping: AtomicBool::new(false),
            stop_tx,
            pause_tx,
            camera,
            bus,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let stats = lock(&self.stats).clone();
        let average_shot_duration = if stats.shots_successful > 0 {
            stats.total_shot_duration_seconds / f64::from(stats.shots_successful)
        } else {
            0.0
        };
        SessionSnapshot {
            id: self.id,
            title: self.options.title.clone(),
            state: self.state(),
            options: self.options.clone(),
            stats,
            average_shot_duration,
        }
    }

    pub fn camera_info(&self) -> Option<serde_json::Value> {
        lock(&self.camera_info).clone()
    }

    pub fn camera_settings(&self) -> Option<serde_json::Value> {
        lock(&self.camera_settings).clone()
    }

    /// Validate preconditions, capture the report context and arm the
    /// scheduler. The first shot fires immediately.
    #[tracing::instrument(level = "info", skip(self), fields(id = %self.id))]
    pub async fn start(self: &Arc<Self>) -> ControlResult<()> {
        if self.state() != SessionState::Created {
            return Err(ControlError::operation_failed(
                "session has already been started",
            ));
        }
        self.options.validate()?;

        let camera = self
            .camera
            .primary()
            .ok_or_else(|| ControlError::camera_offline("no primary camera connected"))?;

        let validation = camera.validate_interval(self.options.interval).await?;
        if !validation.valid {
            return Err(ControlError::validation_failed(
                validation
                    .reason
                    .unwrap_or_else(|| "interval rejected".into()),
            ));
        }

        // Report context is captured before the first shot so terminal
        // persistence never has to reach a possibly-offline camera.
        let status = camera.connection_status().await;
        *lock(&self.camera_info) = serde_json::to_value(&status).ok();
        match camera.get_settings().await {
            Ok(settings) => *lock(&self.camera_settings) = serde_json::to_value(&settings).ok(),
            Err(err) => tracing::warn!(%err, "camera settings capture failed"),
        }

        // Long exposures must not interleave with background probes.
        camera.pause_info_polling();
        camera.pause_connection_monitoring();

        let start_time = clock::wall_now();
        *lock(&self.resolved_shots) = match (self.options.total_shots, self.options.stop_time) {
            (Some(shots), _) => Some(shots),
            (None, Some(stop_time)) => {
                let window = (stop_time - start_time).as_seconds_f64().max(0.0);
                let shots = (window / self.options.interval).ceil().max(1.0);
                #[expect(clippy::as_conversions)]
                let shots = shots as u32;
                Some(shots)
            }
            (None, None) => None,
        };
        {
            let mut stats = lock(&self.stats);
            stats.start_time = Some(start_time);
            stats.next_shot_time = Some(start_time);
        }
        *lock(&self.state) = SessionState::Running;
        self.bus.session(SessionEvent::Started {
            session: self.snapshot(),
        });

        let session = Arc::clone(self);
        let _ = tokio::spawn(async move { session.run(start_time).await });
        Ok(())
    }

    /// Cancel the next scheduled shot; never affects an in-flight shot.
    pub fn pause(&self) -> ControlResult<()> {
        let mut state = lock(&self.state);
        if *state != SessionState::Running {
            return Err(ControlError::operation_failed("session is not running"));
        }
        *state = SessionState::Paused;
        drop(state);
        let _ = self.pause_tx.send_replace(true);
        self.bus.session(SessionEvent::Paused {
            session: self.snapshot(),
        });
        Ok(())
    }

    /// Re-arm the scheduler. Nominal shot times are absolute, so shots whose
    /// time passed while paused fire immediately with overtime accounting.
    pub fn resume(&self) -> ControlResult<()> {
        let mut state = lock(&self.state);
        if *state != SessionState::Paused {
            return Err(ControlError::operation_failed("session is not paused"));
        }
        *state = SessionState::Running;
        drop(state);
        let _ = self.pause_tx.send_replace(false);
        self.bus.session(SessionEvent::Resumed {
            session: self.snapshot(),
        });
        Ok(())
    }

    /// Request a prompt stop. The in-flight shot's completion wait is
    /// abandoned; the dispatched shutter command cannot be recalled.
    pub fn stop(&self) -> ControlResult<()> {
        if !self.state().is_active() {
            return Err(ControlError::operation_failed("no active session to stop"));
        }
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.stop_tx.send_replace(true);
        Ok(())
    }

    fn should_stop(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    async fn stop_requested(&self) {
        let mut rx = self.stop_tx.subscribe();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Wait until `due`, honouring pause and stop. Returns `false` when the
    /// session should stop instead of shooting.
    async fn wait_until_due(&self, due: OffsetDateTime) -> bool {
        let mut pause_rx = self.pause_tx.subscribe();
        loop {
            if self.should_stop() {
                return false;
            }
            if *pause_rx.borrow() {
                tokio::select! {
                    () = self.stop_requested() => return false,
                    changed = pause_rx.changed() => {
                        if changed.is_err() {
                            return false;
                        }
                        continue;
                    }
                }
            }
            tokio::select! {
                () = self.stop_requested() => return false,
                changed = pause_rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                () = clock::sleep_until_wall(due) => return true,
            }
        }
    }

    #[tracing::instrument(level = "info", skip(self, start_time), fields(id = %self.id))]
    async fn run(self: Arc<Self>, start_time: OffsetDateTime) {
        let interval = self.options.interval;
        let mut shot_number: u32 = 0;
        loop {
            let nominal = start_time + time::Duration::seconds_f64(interval * f64::from(shot_number));
            {
                let mut stats = lock(&self.stats);
                stats.next_shot_time = Some(nominal);
            }
            if let Some(stop_time) = self.options.stop_time {
                if nominal >= stop_time {
                    self.finish(SessionState::Completed, "Stop time reached");
                    return;
                }
            }
            if !self.wait_until_due(nominal).await {
                self.finish(SessionState::Stopped, "Stopped by user");
                return;
            }

            shot_number += 1;
            // Lateness beyond jitter means the previous shot overran its
            // interval; the schedule catches up one index at a time.
            if shot_number > 1 {
                let late = nominal - clock::wall_now();
                if let Ok(behind) = Duration::try_from(-late) {
                    if behind > OVERTIME_EPSILON {
                        let overtime = behind.as_secs_f64();
                        {
                            let mut stats = lock(&self.stats);
                            stats.overtime_shots += 1;
                            stats.total_overtime_seconds += overtime;
                            stats.max_overtime_seconds = stats.max_overtime_seconds.max(overtime);
                        }
                        self.bus.session(SessionEvent::PhotoOvertime {
                            shot_number,
                            overtime_seconds: overtime,
                            session: self.snapshot(),
                        });
                    }
                }
            }

            let outcome = tokio::select! {
                () = self.stop_requested() => None,
                outcome = self.execute_shot(shot_number) => Some(outcome),
            };
            let Some(_success) = outcome else {
                // In-flight completion wait abandoned on stop.
                self.finish(SessionState::Stopped, "Stopped by user");
                return;
            };

            let (taken, failed, successful) = {
                let stats = lock(&self.stats);
                (stats.shots_taken, stats.shots_failed, stats.shots_successful)
            };
            debug_assert_eq!(taken, failed + successful);

            if taken > FAILURE_GUARD_MIN_SHOTS
                && f64::from(failed) / f64::from(taken) > FAILURE_GUARD_RATIO
            {
                self.finish(SessionState::Error, "High failure rate detected");
                return;
            }
            if let Some(total) = *lock(&self.resolved_shots) {
                if shot_number >= total {
                    self.finish(SessionState::Completed, "Shot limit reached");
                    return;
                }
            }
            if let Some(stop_time) = self.options.stop_time {
                if clock::wall_now() >= stop_time {
                    self.finish(SessionState::Completed, "Stop time reached");
                    return;
                }
            }
        }
    }

    /// Dispatch one shot and wait for its completion. Strictly serial: the
    /// session never has two in-flight shots.
    async fn execute_shot(&self, shot_number: u32) -> bool {
        {
            let mut stats = lock(&self.stats);
            stats.current_shot = shot_number;
        }

        // Resolved on every shot: the primary may have changed mid-session.
        let Some(camera) = self.camera.primary() else {
            self.record_failure(shot_number, "no primary camera connected");
            return false;
        };

        let started = Instant::now();
        let result = async {
            camera.take_photo().await?;
            poller::wait_for_shot(
                camera.as_ref(),
                poller::shot_deadline(self.options.interval),
            )
            .await
        }
        .await;

        match result {
            Ok(files) => {
                let duration = started.elapsed().as_secs_f64();
                let filename = poller::canonical_filename(&files).unwrap_or_default();
                {
                    let mut stats = lock(&self.stats);
                    stats.shots_taken += 1;
                    stats.shots_successful += 1;
                    stats.last_shot_duration = duration;
                    stats.total_shot_duration_seconds += duration;
                    if stats.first_image_name.is_none() {
                        stats.first_image_name = Some(filename.clone());
                    }
                    stats.last_image_name = Some(filename.clone());
                }
                tracing::info!(shot_number, %filename, duration, "photo taken");
                self.bus.session(SessionEvent::PhotoTaken {
                    shot_number,
                    filename,
                    session: self.snapshot(),
                });
                true
            }
            Err(err) => {
                self.record_failure(shot_number, &err.to_string());
                false
            }
        }
    }

    fn record_failure(&self, shot_number: u32, error: &str) {
        {
            let mut stats = lock(&self.stats);
            stats.shots_taken += 1;
            stats.shots_failed += 1;
            stats.errors.push(ShotError {
                shot_number,
                error: error.to_owned(),
                timestamp: clock::wall_now(),
            });
        }
        tracing::warn!(shot_number, error, "photo failed");
        self.bus.session(SessionEvent::PhotoFailed {
            shot_number,
            error: error.to_owned(),
            session: self.snapshot(),
        });
    }

    /// Terminal transition; absorbing and idempotent.
    fn finish(&self, final_state: SessionState, reason: &str) {
        {
            let mut state = lock(&self.state);
            if state.is_terminal() {
                return;
            }
            *state = final_state;
        }
        {
            let mut stats = lock(&self.stats);
            stats.end_time = Some(clock::wall_now());
            stats.next_shot_time = None;
        }
        if let Some(camera) = self.camera.primary() {
            camera.resume_info_polling();
            camera.resume_connection_monitoring();
        }
        tracing::info!(id = %self.id, ?final_state, reason, "session finished");
        let session = self.snapshot();
        self.bus.session(match final_state {
            SessionState::Completed => SessionEvent::Completed {
                reason: reason.to_owned(),
                session,
            },
            SessionState::Error => SessionEvent::Error {
                reason: reason.to_owned(),
                session,
            },
            _ => SessionEvent::Stopped { session },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::testing::{FixedPrimary, ScriptedCamera};
    use crate::events::Event;
    use tokio::sync::broadcast::Receiver;

    fn options(interval: f64, shots: Option<u32>) -> SessionOptions {
        SessionOptions {
            interval,
            stop_condition: shots.map_or(StopCondition::Unlimited, |_| StopCondition::Shots),
            total_shots: shots,
            stop_time: None,
            title: "T".into(),
        }
    }

    fn scripted(photo: Duration) -> (Arc<dyn PrimaryCamera>, Arc<ScriptedCamera>) {
        let camera = Arc::new(ScriptedCamera::new(photo));
        (
            Arc::new(FixedPrimary(Arc::clone(&camera) as Arc<_>)),
            camera,
        )
    }

    async fn drain_session_events(
        rx: &mut Receiver<Event>,
        deadline: Duration,
    ) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        let until = tokio::time::Instant::now() + deadline;
        while let Ok(received) = tokio::time::timeout_at(until, rx.recv()).await {
            match received {
                Ok(Event::Session(event)) => {
                    let terminal = event.terminal_reason().is_some();
                    events.push(event);
                    if terminal {
                        break;
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        events
    }

    #[tokio::test]
    async fn exact_scheduling_without_overtime() -> eyre::Result<()> {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let (primary, _camera) = scripted(Duration::from_millis(50));
        let session = IntervalometerSession::new(options(0.3, Some(3)), primary, bus);
        session.start().await?;

        let events = drain_session_events(&mut rx, Duration::from_secs(5)).await;
        let taken: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::PhotoTaken { filename, .. } => Some(filename.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            taken,
            vec!["IMG_0001.JPG", "IMG_0002.JPG", "IMG_0003.JPG"],
            "events: {events:?}"
        );
        assert!(matches!(
            events.last(),
            Some(SessionEvent::Completed { reason, .. }) if reason == "Shot limit reached"
        ));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.state, SessionState::Completed);
        assert_eq!(snapshot.stats.shots_taken, 3);
        assert_eq!(snapshot.stats.shots_successful, 3);
        assert_eq!(snapshot.stats.overtime_shots, 0);
        assert_eq!(snapshot.stats.first_image_name.as_deref(), Some("IMG_0001.JPG"));
        assert_eq!(snapshot.stats.last_image_name.as_deref(), Some("IMG_0003.JPG"));
        assert!(snapshot.stats.end_time >= snapshot.stats.start_time);
        Ok(())
    }

    #[tokio::test]
    async fn slow_shots_catch_up_with_overtime() -> eyre::Result<()> {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        // 350 ms exposures against a 200 ms interval: shots 2 and 3 are late.
        let (primary, _camera) = scripted(Duration::from_millis(350));
        let session = IntervalometerSession::new(options(0.2, Some(3)), primary, bus);
        let began = Instant::now();
        session.start().await?;

        let events = drain_session_events(&mut rx, Duration::from_secs(5)).await;
        assert!(matches!(
            events.last(),
            Some(SessionEvent::Completed { .. })
        ), "events: {events:?}");

        let snapshot = session.snapshot();
        assert_eq!(snapshot.stats.shots_successful, 3);
        assert_eq!(snapshot.stats.overtime_shots, 2);
        // Shot 3 is two exposures minus one interval behind: ≈ 300 ms.
        assert!(
            (0.15..=0.5).contains(&snapshot.stats.max_overtime_seconds),
            "max overtime {} out of range",
            snapshot.stats.max_overtime_seconds
        );
        // No skipped indices: three shots took three exposures back to back.
        assert!(began.elapsed() >= Duration::from_millis(1000));
        Ok(())
    }

    #[tokio::test]
    async fn failure_rate_guard_trips_after_literal_threshold() -> eyre::Result<()> {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let camera = Arc::new(
            ScriptedCamera::new(Duration::from_millis(5)).failing_on([1, 2, 3, 4, 6, 7, 8]),
        );
        let primary: Arc<dyn PrimaryCamera> =
            Arc::new(FixedPrimary(Arc::clone(&camera) as Arc<_>));
        let session = IntervalometerSession::new(options(0.05, Some(20)), primary, bus);
        session.start().await?;

        let events = drain_session_events(&mut rx, Duration::from_secs(5)).await;
        assert!(matches!(
            events.last(),
            Some(SessionEvent::Error { reason, .. }) if reason == "High failure rate detected"
        ), "events: {events:?}");

        // Four failures out of five shots do not trip the guard (5 > 5 is
        // false); the sixth shot's failure does.
        let snapshot = session.snapshot();
        assert_eq!(snapshot.stats.shots_taken, 6);
        assert_eq!(snapshot.stats.shots_failed, 5);
        assert_eq!(snapshot.stats.shots_successful, 1);
        assert_eq!(
            snapshot.stats.shots_taken,
            snapshot.stats.shots_failed + snapshot.stats.shots_successful
        );
        Ok(())
    }

    #[tokio::test]
    async fn stop_is_prompt_and_terminal() -> eyre::Result<()> {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let (primary, _camera) = scripted(Duration::from_millis(10));
        let session = IntervalometerSession::new(options(10.0, None), primary, bus);
        session.start().await?;

        tokio::time::sleep(Duration::from_millis(100)).await;
        session.stop()?;
        let events = drain_session_events(&mut rx, Duration::from_secs(2)).await;
        assert!(matches!(events.last(), Some(SessionEvent::Stopped { .. })));
        assert_eq!(session.state(), SessionState::Stopped);

        // Terminal states are absorbing.
        assert!(session.stop().is_err());
        assert!(session.pause().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn pause_skips_scheduled_shots_until_resume() -> eyre::Result<()> {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let (primary, _camera) = scripted(Duration::from_millis(10));
        let session = IntervalometerSession::new(options(0.15, Some(3)), primary, bus.clone());
        session.start().await?;

        // Let the first shot land, then pause across a full interval.
        tokio::time::sleep(Duration::from_millis(60)).await;
        session.pause()?;
        assert_eq!(session.state(), SessionState::Paused);
        tokio::time::sleep(Duration::from_millis(300)).await;
        let before_resume = session.snapshot().stats.shots_taken;
        session.resume()?;

        let events = drain_session_events(&mut rx, Duration::from_secs(5)).await;
        assert!(matches!(events.last(), Some(SessionEvent::Completed { .. })));
        let snapshot = session.snapshot();
        assert_eq!(before_resume, 1, "pause did not hold the scheduler");
        assert_eq!(snapshot.stats.shots_successful, 3);
        // Shots due during the pause fired late after resume.
        assert!(snapshot.stats.overtime_shots >= 1);
        Ok(())
    }

    #[tokio::test]
    async fn double_start_is_rejected() -> eyre::Result<()> {
        let bus = EventBus::new();
        let (primary, _camera) = scripted(Duration::from_millis(10));
        let session = IntervalometerSession::new(options(5.0, Some(1)), primary, bus);
        session.start().await?;
        let err = session.start().await.expect_err("second start must fail");
        assert_eq!(err.code, crate::errors::ErrorCode::OperationFailed);
        session.stop().ok();
        Ok(())
    }

    #[test]
    fn options_validation() {
        assert!(options(0.0, None).validate().is_err());
        assert!(options(-1.0, None).validate().is_err());
        assert!(options(5.0, Some(0)).validate().is_err());
        assert!(options(5.0, Some(10)).validate().is_ok());
        let mut time_without_stop = options(5.0, None);
        time_without_stop.stop_condition = StopCondition::Time;
        assert!(time_without_stop.validate().is_err());
    }
}
