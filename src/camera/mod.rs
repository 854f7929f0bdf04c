//! Typed client for the camera's HTTP/JSON control API.

pub mod poller;

use crate::errors::{ControlError, ControlResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;

/// API version path segment. Cameras negotiate the real set via `GET /ccapi`,
/// but every operation this service needs is in ver100.
const API_VERSION: &str = "ver100";

/// Attempts per operation before the transport failure is surfaced.
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(300);
/// Consecutive failed operations after which the connection counts as lost.
const LOST_THRESHOLD: u32 = 3;
/// Request timeout for ordinary control calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Margin added on top of a long-poll's own window.
const POLL_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);
/// Shot-to-shot processing allowance when validating an interval.
const PROCESSING_BUFFER_SECS: f64 = 2.0;

/// Immutable addressing info for a camera.
#[derive(Debug, Clone, Serialize)]
pub struct CameraDescriptor {
    pub ip: IpAddr,
    pub port: u16,
    pub model: Option<String>,
}

/// Result of a connection probe.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub ip: IpAddr,
    pub port: u16,
    pub model: Option<String>,
}

/// One entry of the camera's shooting settings map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingEntry {
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ability: Vec<serde_json::Value>,
}

pub type CameraSettings = BTreeMap<String, SettingEntry>;

/// Storage summary derived from the camera's storage list.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StorageInfo {
    pub mounted: bool,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub content_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_mode: Option<AccessMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Readwrite,
    Readonly,
}

/// Verdict on whether an interval can keep up with the current exposure.
#[derive(Debug, Clone, Serialize)]
pub struct IntervalValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Control operations every camera handle offers.
///
/// The production implementation is [`CcapiClient`]; tests substitute
/// scripted fakes behind the same trait.
#[async_trait]
pub trait CameraControl: Send + Sync + std::fmt::Debug {
    fn descriptor(&self) -> CameraDescriptor;

    /// Probe the device; never errors, reports `connected: false` instead.
    async fn connection_status(&self) -> ConnectionStatus;

    async fn get_settings(&self) -> ControlResult<CameraSettings>;

    async fn set_setting(&self, key: &str, value: &serde_json::Value) -> ControlResult<()>;

    /// Issue the shutter command. Completion of the shot is observed
    /// separately via [`poller::wait_for_shot`].
    async fn take_photo(&self) -> ControlResult<()>;

    async fn validate_interval(&self, seconds: f64) -> ControlResult<IntervalValidation>;

    async fn storage_info(&self) -> ControlResult<StorageInfo>;

    async fn battery(&self) -> ControlResult<serde_json::Value>;

    async fn camera_datetime(&self) -> ControlResult<OffsetDateTime>;

    async fn set_camera_datetime(&self, datetime: OffsetDateTime) -> ControlResult<()>;

    /// One long-poll of the camera's event channel; returns the file paths
    /// added since the previous poll (often empty).
    async fn poll_added_contents(&self, window: Duration) -> ControlResult<Vec<String>>;

    fn pause_info_polling(&self);
    fn resume_info_polling(&self);
    fn is_info_polling_paused(&self) -> bool;

    fn pause_connection_monitoring(&self);
    fn resume_connection_monitoring(&self);
    fn is_connection_monitoring_paused(&self) -> bool;

    /// True once enough consecutive transport failures have accumulated.
    fn transport_lost(&self) -> bool;
}

/// Read-through accessor for the current primary camera.
///
/// Consumers must call this on every use and never cache the returned handle
/// across suspension points; the primary can change mid-operation.
pub trait PrimaryCamera: Send + Sync + std::fmt::Debug {
    fn primary(&self) -> Option<Arc<dyn CameraControl>>;
}

/// HTTPS/JSON client for one camera.
#[derive(derive_more::Debug)]
pub struct CcapiClient {
    #[debug(skip)]
    http: reqwest::Client,
    base_url: String,
    ip: IpAddr,
    port: u16,
    model: std::sync::RwLock<Option<String>>,
    consecutive_failures: AtomicU32,
    info_polling_paused: AtomicBool,
    monitoring_paused: AtomicBool,
    /// Serializes long-polls; a new shot must not begin before the previous
    /// shot's poll has resolved or timed out.
    poll_gate: tokio::sync::Mutex<()>,
}

#[derive(Deserialize)]
struct DeviceInformation {
    #[serde(rename = "productname")]
    product_name: Option<String>,
}

#[derive(Deserialize)]
struct StorageList {
    #[serde(rename = "storagelist", default)]
    storage_list: Vec<StorageEntry>,
}

#[derive(Deserialize)]
struct StorageEntry {
    #[serde(rename = "maxsize", default)]
    max_size: u64,
    #[serde(rename = "spacesize", default)]
    space_size: u64,
    #[serde(rename = "contentsnumber", default)]
    contents_number: u64,
    #[serde(rename = "accesscapability")]
    access_capability: Option<String>,
}

#[derive(Deserialize)]
struct EventPollResponse {
    #[serde(rename = "addedcontents", default)]
    added_contents: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct CameraDateTime {
    datetime: String,
    #[serde(default)]
    dst: bool,
}

impl CcapiClient {
    /// Build a client for a camera at the given address.
    ///
    /// Cameras serve self-signed certificates, so chain validation is off;
    /// keep-alive is mandatory because TLS handshakes on camera hardware are
    /// slow enough to miss shot deadlines.
    pub fn new(ip: IpAddr, port: u16) -> eyre::Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            base_url: format!("https://{ip}:{port}/ccapi/{API_VERSION}/"),
            ip,
            port,
            model: std::sync::RwLock::new(None),
            consecutive_failures: AtomicU32::new(0),
            info_polling_paused: AtomicBool::new(false),
            monitoring_paused: AtomicBool::new(false),
            poll_gate: tokio::sync::Mutex::new(()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn note_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    fn note_transport_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures == LOST_THRESHOLD {
            tracing::warn!(ip = %self.ip, failures, "camera connection considered lost");
        }
    }

    fn map_status(status: reqwest::StatusCode, body: &str) -> ControlError {
        let detail = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or_else(|| status.to_string());
        match status.as_u16() {
            503 => ControlError::camera_busy(detail),
            400 | 404 => ControlError::validation_failed(detail),
            401 | 403 => ControlError::permission_denied(detail),
            _ => ControlError::operation_failed(detail),
        }
    }

    /// One request, no retry. Transport errors map to `CAMERA_OFFLINE`.
    async fn request_once(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&serde_json::Value>,
        timeout: Duration,
    ) -> ControlResult<serde_json::Value> {
        let mut request = self.http.request(method, self.url(path)).timeout(timeout);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|err| ControlError::camera_offline(err))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ControlError::camera_offline(err))?;
        if !status.is_success() {
            return Err(Self::map_status(
                status,
                std::str::from_utf8(&bytes).unwrap_or_default(),
            ));
        }
        if bytes.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|err| ControlError::operation_failed(format!("malformed camera response: {err}")))
    }

    /// Retrying wrapper: transport failures back off and retry, protocol
    /// rejections surface immediately.
    #[tracing::instrument(level = "debug", skip(self, body), fields(ip = %self.ip))]
    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> ControlResult<serde_json::Value> {
        let mut last = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(RETRY_BACKOFF * 2_u32.pow(attempt - 1)).await;
            }
            match self
                .request_once(method.clone(), path, body, REQUEST_TIMEOUT)
                .await
            {
                Ok(value) => {
                    self.note_success();
                    return Ok(value);
                }
                Err(err) if err.code.is_transport() => {
                    tracing::debug!(%err, attempt, "camera request transport failure");
                    last = Some(err);
                }
                Err(err) => {
                    // Protocol rejection still proves the transport works.
                    self.note_success();
                    return Err(err);
                }
            }
        }
        self.note_transport_failure();
        Err(last.unwrap_or_else(|| ControlError::camera_offline("camera unreachable")))
    }

    fn parse_json<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> ControlResult<T> {
        serde_json::from_value(value)
            .map_err(|err| ControlError::operation_failed(format!("unexpected camera schema: {err}")))
    }
}

/// Parse a Canon shutter-speed string into seconds.
///
/// Accepted forms: `1/125`, `0"5` (half a second), `1"3`, `30"`, `15`.
/// `bulb` has no fixed duration and returns `None`.
pub(crate) fn parse_shutter_seconds(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("bulb") {
        return None;
    }
    if let Some((num, den)) = value.split_once('/') {
        let num = num.parse::<f64>().ok()?;
        let den = den.parse::<f64>().ok()?;
        return (den != 0.0).then(|| num / den);
    }
    if let Some((whole, frac)) = value.split_once('"') {
        let whole = whole.parse::<f64>().ok()?;
        if frac.is_empty() {
            return Some(whole);
        }
        let digits = frac.parse::<f64>().ok()?;
        #[expect(clippy::as_conversions)]
        let scale = 10_f64.powi(frac.len() as i32);
        return Some(whole + digits / scale);
    }
    value.parse::<f64>().ok()
}

#[async_trait]
impl CameraControl for CcapiClient {
    fn descriptor(&self) -> CameraDescriptor {
        CameraDescriptor {
            ip: self.ip,
            port: self.port,
            model: self.model.read().ok().and_then(|m| m.clone()),
        }
    }

    async fn connection_status(&self) -> ConnectionStatus {
        let probe = self
            .request(reqwest::Method::GET, "deviceinformation", None)
            .await
            .and_then(Self::parse_json::<DeviceInformation>);
        let connected = match probe {
            Ok(info) => {
                if info.product_name.is_some() {
                    if let Ok(mut model) = self.model.write() {
                        *model = info.product_name;
                    }
                }
                true
            }
            Err(err) => {
                tracing::debug!(%err, ip = %self.ip, "connection probe failed");
                false
            }
        };
        ConnectionStatus {
            connected,
            ip: self.ip,
            port: self.port,
            model: self.model.read().ok().and_then(|m| m.clone()),
        }
    }

    async fn get_settings(&self) -> ControlResult<CameraSettings> {
        self.request(reqwest::Method::GET, "shooting/settings", None)
            .await
            .and_then(Self::parse_json)
    }

    async fn set_setting(&self, key: &str, value: &serde_json::Value) -> ControlResult<()> {
        let settings = self.get_settings().await?;
        let entry = settings.get(key).ok_or_else(|| {
            ControlError::validation_failed(format!("unknown camera setting '{key}'"))
        })?;
        if !entry.ability.is_empty() && !entry.ability.contains(value) {
            return Err(ControlError::validation_failed(format!(
                "value {value} is not in the ability list for '{key}'"
            )));
        }
        let path = format!("shooting/settings/{key}");
        let _ = self
            .request(
                reqwest::Method::PUT,
                &path,
                Some(&serde_json::json!({ "value": value })),
            )
            .await?;
        Ok(())
    }

    async fn take_photo(&self) -> ControlResult<()> {
        let _ = self
            .request(
                reqwest::Method::POST,
                "shooting/control/shutterbutton",
                Some(&serde_json::json!({ "af": true })),
            )
            .await
            .map_err(|err| match err.code {
                crate::errors::ErrorCode::ValidationFailed => {
                    ControlError::photo_failed(err.message)
                }
                _ => err,
            })?;
        Ok(())
    }

    async fn validate_interval(&self, seconds: f64) -> ControlResult<IntervalValidation> {
        if seconds <= 0.0 {
            return Ok(IntervalValidation {
                valid: false,
                reason: Some("Interval must be greater than zero".into()),
            });
        }
        let settings = self.get_settings().await?;
        let Some(tv) = settings.get("tv").and_then(|entry| entry.value.as_str()) else {
            // No shutter-speed setting exposed; nothing to check against.
            return Ok(IntervalValidation {
                valid: true,
                reason: None,
            });
        };
        let Some(shutter) = parse_shutter_seconds(tv) else {
            return Ok(IntervalValidation {
                valid: false,
                reason: Some(format!(
                    "Shutter speed '{tv}' has no fixed duration and cannot be scheduled"
                )),
            });
        };
        let needed = shutter + PROCESSING_BUFFER_SECS;
        if seconds < needed {
            return Ok(IntervalValidation {
                valid: false,
                reason: Some(format!(
                    "Interval {seconds}s is too short for a {shutter}s exposure; needs at least {needed}s"
                )),
            });
        }
        Ok(IntervalValidation {
            valid: true,
            reason: None,
        })
    }

    async fn storage_info(&self) -> ControlResult<StorageInfo> {
        let list: StorageList = self
            .request(reqwest::Method::GET, "devicestatus/storage", None)
            .await
            .and_then(Self::parse_json)?;
        // An empty storage list means no card is mounted.
        let Some(first) = list.storage_list.first() else {
            return Ok(StorageInfo::default());
        };
        Ok(StorageInfo {
            mounted: true,
            total_bytes: first.max_size,
            free_bytes: first.space_size,
            content_count: first.contents_number,
            access_mode: first.access_capability.as_deref().map(|cap| {
                if cap.eq_ignore_ascii_case("readwrite") {
                    AccessMode::Readwrite
                } else {
                    AccessMode::Readonly
                }
            }),
        })
    }

    async fn battery(&self) -> ControlResult<serde_json::Value> {
        self.request(reqwest::Method::GET, "devicestatus/battery", None)
            .await
    }

    async fn camera_datetime(&self) -> ControlResult<OffsetDateTime> {
        let value: CameraDateTime = self
            .request(reqwest::Method::GET, "functions/datetime", None)
            .await
            .and_then(Self::parse_json)?;
        OffsetDateTime::parse(&value.datetime, &Rfc2822).map_err(|err| {
            ControlError::operation_failed(format!(
                "unparseable camera datetime {:?}: {err}",
                value.datetime
            ))
        })
    }

    async fn set_camera_datetime(&self, datetime: OffsetDateTime) -> ControlResult<()> {
        let formatted = datetime.format(&Rfc2822).map_err(|err| {
            ControlError::operation_failed(format!("datetime formatting failed: {err}"))
        })?;
        let _ = self
            .request(
                reqwest::Method::PUT,
                "functions/datetime",
                Some(&serde_json::json!(CameraDateTime {
                    datetime: formatted,
                    dst: false,
                })),
            )
            .await?;
        Ok(())
    }

    async fn poll_added_contents(&self, window: Duration) -> ControlResult<Vec<String>> {
        let _gate = self.poll_gate.lock().await;
        match self
            .request_once(
                reqwest::Method::GET,
                "event/polling?continue=on",
                None,
                window + POLL_TIMEOUT_MARGIN,
            )
            .await
        {
            Ok(value) => {
                self.note_success();
                let events: EventPollResponse = Self::parse_json(value)?;
                Ok(events.added_contents)
            }
            // The camera holds the poll open until it has something to say;
            // running out the window with nothing is not a failure.
            Err(err) if err.code == crate::errors::ErrorCode::CameraOffline => {
                self.note_transport_failure();
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    fn pause_info_polling(&self) {
        self.info_polling_paused.store(true, Ordering::Relaxed);
    }

    fn resume_info_polling(&self) {
        self.info_polling_paused.store(false, Ordering::Relaxed);
    }

    fn is_info_polling_paused(&self) -> bool {
        self.info_polling_paused.load(Ordering::Relaxed)
    }

    fn pause_connection_monitoring(&self) {
        self.monitoring_paused.store(true, Ordering::Relaxed);
    }

    fn resume_connection_monitoring(&self) {
        self.monitoring_paused.store(false, Ordering::Relaxed);
    }

    fn is_connection_monitoring_paused(&self) -> bool {
        self.monitoring_paused.load(Ordering::Relaxed)
    }

    fn transport_lost(&self) -> bool {
        self.consecutive_failures.load(Ordering::Relaxed) >= LOST_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutter_speed_parsing() {
        assert_eq!(parse_shutter_seconds("1/125"), Some(0.008));
        assert_eq!(parse_shutter_seconds("0\"5"), Some(0.5));
        assert_eq!(parse_shutter_seconds("1\"3"), Some(1.3));
        assert_eq!(parse_shutter_seconds("30\""), Some(30.0));
        assert_eq!(parse_shutter_seconds("15"), Some(15.0));
        assert_eq!(parse_shutter_seconds("bulb"), None);
        assert_eq!(parse_shutter_seconds("junk"), None);
    }

    #[test]
    fn empty_storage_list_reads_as_unmounted() {
        let parsed: StorageList =
            serde_json::from_value(serde_json::json!({ "storagelist": [] })).expect("parse");
        assert!(parsed.storage_list.is_empty());
        let info = StorageInfo::default();
        assert!(!info.mounted);
        assert_eq!(info.total_bytes, 0);
        assert_eq!(info.free_bytes, 0);
    }

    #[test]
    fn storage_entry_schema() {
        let parsed: StorageList = serde_json::from_value(serde_json::json!({
            "storagelist": [{
                "name": "card1",
                "maxsize": 64_000_000_000_u64,
                "spacesize": 12_000_000_000_u64,
                "contentsnumber": 431,
                "accesscapability": "readwrite",
            }]
        }))
        .expect("parse");
        let entry = &parsed.storage_list[0];
        assert_eq!(entry.contents_number, 431);
        assert_eq!(entry.access_capability.as_deref(), Some("readwrite"));
    }

    #[test]
    fn camera_datetime_round_trip() {
        let raw = "Tue, 01 Jan 2019 01:23:45 +0900";
        let parsed = OffsetDateTime::parse(raw, &Rfc2822).expect("parse");
        assert_eq!(parsed.year(), 2019);
        let formatted = parsed.format(&Rfc2822).expect("format");
        assert!(formatted.contains("2019"));
    }
}

/// Scripted in-memory camera for exercising the scheduler and sync paths
/// without hardware.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct ScriptState {
        shots_issued: u32,
        pending_files: Vec<String>,
    }

    /// A fake camera whose shots take a fixed wall-clock duration and whose
    /// numbered failures are scripted up front.
    #[derive(Debug)]
    pub(crate) struct ScriptedCamera {
        photo_duration: Duration,
        failing_shots: HashSet<u32>,
        state: Mutex<ScriptState>,
        info_paused: AtomicBool,
        monitor_paused: AtomicBool,
        pub(crate) datetime: Mutex<OffsetDateTime>,
        pub(crate) datetime_writes: Mutex<Vec<OffsetDateTime>>,
    }

    impl ScriptedCamera {
        pub(crate) fn new(photo_duration: Duration) -> Self {
            Self {
                photo_duration,
                failing_shots: HashSet::new(),
                state: Mutex::default(),
                info_paused: AtomicBool::new(false),
                monitor_paused: AtomicBool::new(false),
                datetime: Mutex::new(crate::clock::wall_now()),
                datetime_writes: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing_on(mut self, shots: impl IntoIterator<Item = u32>) -> Self {
            self.failing_shots = shots.into_iter().collect();
            self
        }

        fn lock_state(&self) -> std::sync::MutexGuard<'_, ScriptState> {
            self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    #[async_trait]
    impl CameraControl for ScriptedCamera {
        fn descriptor(&self) -> CameraDescriptor {
            CameraDescriptor {
                ip: IpAddr::from([127, 0, 0, 1]),
                port: 443,
                model: Some("Scripted".into()),
            }
        }

        async fn connection_status(&self) -> ConnectionStatus {
            ConnectionStatus {
                connected: true,
                ip: IpAddr::from([127, 0, 0, 1]),
                port: 443,
                model: Some("Scripted".into()),
            }
        }

        async fn get_settings(&self) -> ControlResult<CameraSettings> {
            let mut settings = CameraSettings::new();
            let _ = settings.insert(
                "tv".into(),
                SettingEntry {
                    value: serde_json::json!("1/60"),
                    ability: vec![serde_json::json!("1/60")],
                },
            );
            Ok(settings)
        }

        async fn set_setting(&self, _key: &str, _value: &serde_json::Value) -> ControlResult<()> {
            Ok(())
        }

        async fn take_photo(&self) -> ControlResult<()> {
            let mut state = self.lock_state();
            state.shots_issued += 1;
            let shot = state.shots_issued;
            if self.failing_shots.contains(&shot) {
                return Err(ControlError::photo_failed(format!("scripted failure #{shot}")));
            }
            state
                .pending_files
                .push(format!("100CANON/IMG_{shot:04}.JPG"));
            Ok(())
        }

        async fn validate_interval(&self, seconds: f64) -> ControlResult<IntervalValidation> {
            Ok(IntervalValidation {
                valid: seconds > 0.0,
                reason: None,
            })
        }

        async fn storage_info(&self) -> ControlResult<StorageInfo> {
            Ok(StorageInfo {
                mounted: true,
                total_bytes: 64_000_000_000,
                free_bytes: 32_000_000_000,
                content_count: 10,
                access_mode: Some(AccessMode::Readwrite),
            })
        }

        async fn battery(&self) -> ControlResult<serde_json::Value> {
            Ok(serde_json::json!({ "level": "full" }))
        }

        async fn camera_datetime(&self) -> ControlResult<OffsetDateTime> {
            Ok(*self.datetime.lock().unwrap_or_else(std::sync::PoisonError::into_inner))
        }

        async fn set_camera_datetime(&self, datetime: OffsetDateTime) -> ControlResult<()> {
            self.datetime_writes
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(datetime);
            Ok(())
        }

        async fn poll_added_contents(&self, _window: Duration) -> ControlResult<Vec<String>> {
            // The scripted exposure runs its full duration, then the "added
            // contents" event fires.
            tokio::time::sleep(self.photo_duration).await;
            Ok(std::mem::take(&mut self.lock_state().pending_files))
        }

        fn pause_info_polling(&self) {
            self.info_paused.store(true, Ordering::Relaxed);
        }

        fn resume_info_polling(&self) {
            self.info_paused.store(false, Ordering::Relaxed);
        }

        fn is_info_polling_paused(&self) -> bool {
            self.info_paused.load(Ordering::Relaxed)
        }

        fn pause_connection_monitoring(&self) {
            self.monitor_paused.store(true, Ordering::Relaxed);
        }

        fn resume_connection_monitoring(&self) {
            self.monitor_paused.store(false, Ordering::Relaxed);
        }

        fn is_connection_monitoring_paused(&self) -> bool {
            self.monitor_paused.load(Ordering::Relaxed)
        }

        fn transport_lost(&self) -> bool {
            false
        }
    }

    /// A `PrimaryCamera` that always resolves to the same handle.
    #[derive(Debug)]
    pub(crate) struct FixedPrimary(pub(crate) Arc<dyn CameraControl>);

    impl PrimaryCamera for FixedPrimary {
        fn primary(&self) -> Option<Arc<dyn CameraControl>> {
            Some(Arc::clone(&self.0))
        }
    }
}
