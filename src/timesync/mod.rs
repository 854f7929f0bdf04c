//! Three-tier clock coordination: browser client → host → camera.
//!
//! The host has no battery-backed RTC, so trusted wall-clock time comes from
//! connected browser clients (`ap`-interface clients outrank `wlan` ones),
//! is applied to the host clock, and is then propagated to the camera. The
//! [`proxy::PiProxyState`] records how trustworthy the host clock currently
//! is; only this service writes it.

pub mod proxy;

use crate::camera::PrimaryCamera;
use crate::clock::{self, TimerHandle};
use crate::errors::{ControlError, ControlResult};
use crate::events::{ActivityLevel, Event, EventBus};
use async_trait::async_trait;
use proxy::{PiProxyState, ProxyInfo, ProxyState};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use time::OffsetDateTime;

/// Clock steps smaller than this are left alone.
const DRIFT_THRESHOLD: Duration = Duration::from_secs(1);

/// Which network path a browser client arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, derive_more::Display)]
#[serde(rename_all = "lowercase")]
pub enum ClientInterface {
    #[display("ap")]
    Ap,
    #[display("wlan")]
    Wlan,
}

impl ClientInterface {
    const fn proxy_state(self) -> ProxyState {
        match self {
            Self::Ap => ProxyState::ApClient,
            Self::Wlan => ProxyState::WlanClient,
        }
    }

    const fn matches(self, state: ProxyState) -> bool {
        matches!(
            (self, state),
            (Self::Ap, ProxyState::ApClient) | (Self::Wlan, ProxyState::WlanClient)
        )
    }
}

/// Snapshot for `time-sync-status` messages and status aggregation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSyncStatus {
    #[serde(flatten)]
    pub proxy: ProxyInfo,
    pub ap_clients: usize,
    pub wlan_clients: usize,
}

/// Capability for mutating the host's clock; abstracts the privileged OS
/// calls so non-Linux hosts degrade to "unsupported" in one place.
#[async_trait]
pub trait HostClock: Send + Sync + std::fmt::Debug {
    async fn set_system_time(&self, to: OffsetDateTime) -> eyre::Result<()>;
    async fn set_timezone(&self, timezone: &str) -> eyre::Result<()>;
}

/// Sets the clock through `sudo date` / `timedatectl`.
#[derive(Debug, Clone, Copy)]
pub struct LinuxHostClock;

async fn run_privileged(program: &str, args: &[&str]) -> eyre::Result<()> {
    let output = tokio::process::Command::new("sudo")
        .arg(program)
        .args(args)
        .output()
        .await?;
    eyre::ensure!(
        output.status.success(),
        "{program} exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
    );
    Ok(())
}

#[async_trait]
impl HostClock for LinuxHostClock {
    async fn set_system_time(&self, to: OffsetDateTime) -> eyre::Result<()> {
        let format =
            time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        let stamp = to.to_offset(time::UtcOffset::UTC).format(&format)?;
        run_privileged("date", &["-u", "-s", &stamp]).await
    }

    async fn set_timezone(&self, timezone: &str) -> eyre::Result<()> {
        run_privileged("timedatectl", &["set-timezone", timezone]).await
    }
}

/// Stub for hosts where stepping the clock is not available.
#[derive(Debug, Clone, Copy)]
pub struct UnsupportedHostClock;

#[async_trait]
impl HostClock for UnsupportedHostClock {
    async fn set_system_time(&self, _to: OffsetDateTime) -> eyre::Result<()> {
        eyre::bail!("setting the system clock is not supported on this host")
    }

    async fn set_timezone(&self, _timezone: &str) -> eyre::Result<()> {
        eyre::bail!("setting the timezone is not supported on this host")
    }
}

/// The platform-appropriate host clock.
pub fn host_clock() -> Arc<dyn HostClock> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(LinuxHostClock)
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(UnsupportedHostClock)
    }
}

/// Outbound path to connected clients, implemented by the WebSocket client
/// registry.
pub trait TimeRequester: Send + Sync + std::fmt::Debug {
    /// Send a `time-sync-request` to the client at `address`; `false` if the
    /// client is gone.
    fn request_time(&self, address: &str) -> bool;

    fn connected_clients(&self) -> Vec<(String, ClientInterface)>;
}

/// Orchestrates host- and camera-clock synchronization.
#[derive(derive_more::Debug)]
pub struct TimeSyncService {
    proxy: Mutex<PiProxyState>,
    #[debug(skip)]
    host_clock: Arc<dyn HostClock>,
    #[debug(skip)]
    camera: Arc<dyn PrimaryCamera>,
    #[debug(skip)]
    requester: Arc<dyn TimeRequester>,
    #[debug(skip)]
    resync_timer: Mutex<Option<TimerHandle>>,
    #[debug(skip)]
    bus: EventBus,
}

fn abs_duration(span: time::Duration) -> Duration {
    Duration::try_from(span.abs()).unwrap_or_default()
}

impl TimeSyncService {
    pub fn new(
        host_clock: Arc<dyn HostClock>,
        camera: Arc<dyn PrimaryCamera>,
        requester: Arc<dyn TimeRequester>,
        bus: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            proxy: Mutex::new(PiProxyState::new()),
            host_clock,
            camera,
            requester,
            resync_timer: Mutex::new(None),
            bus,
        })
    }

    fn lock_proxy(&self) -> MutexGuard<'_, PiProxyState> {
        self.proxy.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_timer(&self) -> MutexGuard<'_, Option<TimerHandle>> {
        self.resync_timer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Current status; lazily expires a stale proxy state.
    pub fn status(&self) -> TimeSyncStatus {
        let info = {
            let mut proxy = self.lock_proxy();
            proxy.expire();
            proxy.info()
        };
        let clients = self.requester.connected_clients();
        TimeSyncStatus {
            proxy: info,
            ap_clients: clients
                .iter()
                .filter(|(_, interface)| *interface == ClientInterface::Ap)
                .count(),
            wlan_clients: clients
                .iter()
                .filter(|(_, interface)| *interface == ClientInterface::Wlan)
                .count(),
        }
    }

    fn publish_status(&self) {
        self.bus.publish(Event::TimeSync(self.status()));
    }

    /// Connection rules: an established `ap` proxy is never displaced by a
    /// new client, and a *valid* proxy is never displaced by a lower- or
    /// equal-priority one. Returns whether the client was adopted.
    fn apply_connection_rules(
        self: &Arc<Self>,
        address: &str,
        interface: ClientInterface,
    ) -> bool {
        let adopt = {
            let proxy = self.lock_proxy();
            match (interface, proxy.state(), proxy.is_valid()) {
                (ClientInterface::Ap, ProxyState::ApClient, _)
                | (ClientInterface::Wlan, ProxyState::ApClient | ProxyState::WlanClient, true) => {
                    false
                }
                _ => true,
            }
        };
        if adopt {
            self.adopt_client(address, interface);
        }
        adopt
    }

    /// A browser client connected; maybe adopt it as the time proxy.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn handle_client_connected(self: &Arc<Self>, address: &str, interface: ClientInterface) {
        if self.apply_connection_rules(address, interface) {
            tracing::info!(address, %interface, "client adopted as time proxy");
        } else {
            tracing::debug!(address, %interface, "client ignored; proxy already held");
        }
    }

    fn adopt_client(self: &Arc<Self>, address: &str, interface: ClientInterface) {
        // Optimistic: the state is set before the client has answered, and
        // `acquiredAt` is refreshed again when its time arrives.
        {
            let mut proxy = self.lock_proxy();
            proxy.update_state(interface.proxy_state(), Some(address.to_owned()));
        }
        self.arm_resync_timer();
        let _ = self.requester.request_time(address);
        self.publish_status();
    }

    fn arm_resync_timer(self: &Arc<Self>) {
        let period = self.lock_proxy().recommended_resync_interval();
        let service = Arc::clone(self);
        let handle = clock::every(period, move || {
            let service = Arc::clone(&service);
            async move { service.resync_tick().await }
        });
        if let Some(previous) = self.lock_timer().replace(handle) {
            previous.cancel();
        }
    }

    fn cancel_resync_timer(&self) {
        if let Some(timer) = self.lock_timer().take() {
            timer.cancel();
        }
    }

    #[cfg(test)]
    fn has_resync_timer(&self) -> bool {
        self.lock_timer().is_some()
    }

    /// Failover cascade on every resync tick.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn resync_tick(self: &Arc<Self>) {
        let (state, original) = {
            let proxy = self.lock_proxy();
            (proxy.state(), proxy.client_address().map(str::to_owned))
        };
        if state == ProxyState::None {
            self.cancel_resync_timer();
            return;
        }
        let clients = self.requester.connected_clients();

        // 1. Original client still here: just ask it again.
        if let Some(original) = original {
            if clients.iter().any(|(address, _)| *address == original) {
                let _ = self.requester.request_time(&original);
                return;
            }
        }
        // 2. Another client on the same interface: fresh adoption.
        if let Some((address, interface)) = clients
            .iter()
            .find(|(_, interface)| interface.matches(state))
            .cloned()
        {
            self.adopt_client(&address, interface);
            return;
        }
        // 3./4. Cross-interface failover in either direction.
        if let Some((address, interface)) = clients.first().cloned() {
            self.adopt_client(&address, interface);
            return;
        }
        // 5. Nobody left: stop resyncing, let the state expire naturally.
        tracing::debug!("no clients left for resync; letting proxy state age out");
        self.cancel_resync_timer();
    }

    /// A client answered a `time-sync-request`.
    #[tracing::instrument(level = "info", skip(self, client_time, timezone))]
    pub async fn handle_time_response(
        self: &Arc<Self>,
        address: &str,
        client_time: OffsetDateTime,
        timezone: Option<&str>,
    ) {
        let drift = clock::wall_now() - client_time;
        let drift_ms = drift.whole_milliseconds();
        tracing::info!(address, drift_ms = %drift_ms, "client time received");

        if abs_duration(drift) > DRIFT_THRESHOLD {
            if let Err(err) = self.host_clock.set_system_time(client_time).await {
                // Failed privileged call: do not advance the proxy state.
                tracing::error!(%err, "host clock update failed");
                self.bus.activity(
                    ActivityLevel::Error,
                    format!("Failed to set host time: {err}"),
                );
                self.publish_status();
                return;
            }
            if let Some(timezone) = timezone {
                if let Err(err) = self.host_clock.set_timezone(timezone).await {
                    tracing::warn!(%err, timezone, "timezone update failed");
                }
            }
        }

        {
            #[expect(clippy::as_conversions)]
            let drift_ms = drift_ms as f64;
            let mut proxy = self.lock_proxy();
            proxy.record_sync(drift_ms);
            proxy.mark_synced();
        }
        self.publish_status();

        // Host clock is fresh; pass it on to the camera if one is connected.
        if self.camera.primary().is_some() {
            if let Err(err) = self.sync_camera_from_host().await {
                tracing::warn!(%err, "camera clock sync failed");
            }
        }
    }

    /// Host → camera, gated on the proxy being a valid time source.
    pub async fn sync_camera_from_host(&self) -> ControlResult<()> {
        if !self.lock_proxy().is_valid() {
            return Ok(());
        }
        let camera = self
            .camera
            .primary()
            .ok_or_else(|| ControlError::camera_offline("no primary camera connected"))?;
        let camera_now = camera.camera_datetime().await?;
        let drift = camera_now - clock::wall_now();
        if abs_duration(drift) > DRIFT_THRESHOLD {
            tracing::info!(drift_ms = %drift.whole_milliseconds(), "stepping camera clock");
            camera.set_camera_datetime(clock::wall_now()).await?;
        }
        Ok(())
    }

    /// A camera connected: pick the best available time source for it.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn handle_camera_connected(self: &Arc<Self>) {
        let clients = self.requester.connected_clients();
        let preferred = clients
            .iter()
            .find(|(_, interface)| *interface == ClientInterface::Ap)
            .or_else(|| clients.first())
            .cloned();

        if let Some((address, interface)) = preferred {
            // Fresh client time first; its response path syncs the camera.
            if !self.apply_connection_rules(&address, interface) {
                let _ = self.requester.request_time(&address);
            }
            return;
        }

        if self.lock_proxy().is_valid() {
            if let Err(err) = self.sync_camera_from_host().await {
                tracing::warn!(%err, "camera clock sync failed");
            }
            return;
        }

        // No client and no valid proxy: borrow the camera's RTC for the
        // host. The proxy state stays `none`; we are not a trusted source.
        let Some(camera) = self.camera.primary() else {
            return;
        };
        match camera.camera_datetime().await {
            Ok(camera_now) => {
                let drift = camera_now - clock::wall_now();
                if abs_duration(drift) > DRIFT_THRESHOLD {
                    match self.host_clock.set_system_time(camera_now).await {
                        Ok(()) => {
                            tracing::info!(
                                drift_ms = %drift.whole_milliseconds(),
                                "host clock set from camera RTC"
                            );
                            self.bus.activity(
                                ActivityLevel::Info,
                                "Host clock set from camera (no client connected)",
                            );
                        }
                        Err(err) => {
                            tracing::error!(%err, "host clock update from camera failed");
                            self.bus.activity(
                                ActivityLevel::Error,
                                format!("Failed to set host time from camera: {err}"),
                            );
                        }
                    }
                }
            }
            Err(err) => tracing::warn!(%err, "camera datetime read failed"),
        }
    }

    /// React to camera connections reported on the event bus.
    pub fn spawn_camera_watcher(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        let mut rx = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(Event::Discovery(crate::events::DiscoveryEvent::CameraConnected {
                        ..
                    })) => {
                        service.handle_camera_connected().await;
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "time sync watcher lagged behind the event bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        })
    }

    /// Manual host-time set from the REST surface.
    pub async fn set_host_time(
        &self,
        to: OffsetDateTime,
        timezone: Option<&str>,
    ) -> ControlResult<()> {
        self.host_clock
            .set_system_time(to)
            .await
            .map_err(|err| ControlError::permission_denied(err.to_string()))?;
        if let Some(timezone) = timezone {
            self.host_clock
                .set_timezone(timezone)
                .await
                .map_err(|err| ControlError::permission_denied(err.to_string()))?;
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        self.cancel_resync_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::testing::{FixedPrimary, ScriptedCamera};
    use crate::events::EventBus;

    #[derive(Debug, Default)]
    struct RecordingHostClock {
        times: Mutex<Vec<OffsetDateTime>>,
        timezones: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl HostClock for RecordingHostClock {
        async fn set_system_time(&self, to: OffsetDateTime) -> eyre::Result<()> {
            eyre::ensure!(!self.fail, "permission denied");
            self.times
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(to);
            Ok(())
        }

        async fn set_timezone(&self, timezone: &str) -> eyre::Result<()> {
            eyre::ensure!(!self.fail, "permission denied");
            self.timezones
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(timezone.to_owned());
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct FakeClients {
        clients: Mutex<Vec<(String, ClientInterface)>>,
        requests: Mutex<Vec<String>>,
    }

    impl FakeClients {
        fn set(&self, clients: Vec<(String, ClientInterface)>) {
            *self
                .clients
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = clients;
        }

        fn requests(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
        }
    }

    impl TimeRequester for FakeClients {
        fn request_time(&self, address: &str) -> bool {
            let known = self
                .clients
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .iter()
                .any(|(a, _)| a == address);
            self.requests
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(address.to_owned());
            known
        }

        fn connected_clients(&self) -> Vec<(String, ClientInterface)> {
            self.clients
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
        }
    }

    struct Fixture {
        service: Arc<TimeSyncService>,
        clients: Arc<FakeClients>,
        host_clock: Arc<RecordingHostClock>,
        camera: Arc<ScriptedCamera>,
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingHostClock::default())
    }

    fn fixture_with(host_clock: RecordingHostClock) -> Fixture {
        let host_clock = Arc::new(host_clock);
        let clients = Arc::new(FakeClients::default());
        let camera = Arc::new(ScriptedCamera::new(Duration::from_millis(1)));
        let primary: Arc<dyn PrimaryCamera> =
            Arc::new(FixedPrimary(Arc::clone(&camera) as Arc<_>));
        let service = TimeSyncService::new(
            Arc::clone(&host_clock) as Arc<dyn HostClock>,
            primary,
            Arc::clone(&clients) as Arc<dyn TimeRequester>,
            EventBus::new(),
        );
        Fixture {
            service,
            clients,
            host_clock,
            camera,
        }
    }

    fn times(host_clock: &RecordingHostClock) -> Vec<OffsetDateTime> {
        host_clock
            .times
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    #[tokio::test]
    async fn ap_proxy_is_not_displaced() {
        let f = fixture();
        f.clients.set(vec![
            ("192.168.4.2:1".into(), ClientInterface::Ap),
            ("192.168.4.3:1".into(), ClientInterface::Ap),
            ("10.0.0.9:1".into(), ClientInterface::Wlan),
        ]);

        f.service
            .handle_client_connected("192.168.4.2:1", ClientInterface::Ap);
        assert_eq!(f.service.status().proxy.state, ProxyState::ApClient);
        assert_eq!(f.clients.requests(), vec!["192.168.4.2:1"]);

        // Second ap client: ignored.
        f.service
            .handle_client_connected("192.168.4.3:1", ClientInterface::Ap);
        // wlan client while a valid ap proxy exists: ignored.
        f.service
            .handle_client_connected("10.0.0.9:1", ClientInterface::Wlan);

        let status = f.service.status();
        assert_eq!(status.proxy.state, ProxyState::ApClient);
        assert_eq!(
            status.proxy.client_address.as_deref(),
            Some("192.168.4.2:1")
        );
        assert_eq!(f.clients.requests().len(), 1);
        f.service.shutdown();
    }

    #[tokio::test]
    async fn wlan_client_is_adopted_when_idle() {
        let f = fixture();
        f.clients.set(vec![("10.0.0.9:1".into(), ClientInterface::Wlan)]);
        f.service
            .handle_client_connected("10.0.0.9:1", ClientInterface::Wlan);
        let status = f.service.status();
        assert_eq!(status.proxy.state, ProxyState::WlanClient);
        assert!(status.proxy.valid);
        assert!(f.service.has_resync_timer());
        f.service.shutdown();
    }

    #[tokio::test]
    async fn small_drift_leaves_host_clock_alone() {
        let f = fixture();
        f.clients.set(vec![("192.168.4.2:1".into(), ClientInterface::Ap)]);
        f.service
            .handle_client_connected("192.168.4.2:1", ClientInterface::Ap);

        f.service
            .handle_time_response("192.168.4.2:1", clock::wall_now(), None)
            .await;
        assert!(times(&f.host_clock).is_empty());
        assert_eq!(f.service.status().proxy.observation_count, 1);
        f.service.shutdown();
    }

    #[tokio::test]
    async fn large_drift_steps_host_clock_and_timezone() {
        let f = fixture();
        f.clients.set(vec![("192.168.4.2:1".into(), ClientInterface::Ap)]);
        f.service
            .handle_client_connected("192.168.4.2:1", ClientInterface::Ap);

        let client_time = clock::wall_now() - time::Duration::seconds(5);
        f.service
            .handle_time_response("192.168.4.2:1", client_time, Some("Pacific/Auckland"))
            .await;
        assert_eq!(times(&f.host_clock), vec![client_time]);
        assert_eq!(
            f.host_clock
                .timezones
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .as_slice(),
            ["Pacific/Auckland"]
        );
        f.service.shutdown();
    }

    #[tokio::test]
    async fn failed_host_clock_call_does_not_advance_proxy() {
        let f = fixture_with(RecordingHostClock {
            fail: true,
            ..RecordingHostClock::default()
        });
        f.clients.set(vec![("192.168.4.2:1".into(), ClientInterface::Ap)]);
        f.service
            .handle_client_connected("192.168.4.2:1", ClientInterface::Ap);
        let before = f.service.status().proxy.observation_count;

        let client_time = clock::wall_now() - time::Duration::seconds(30);
        f.service
            .handle_time_response("192.168.4.2:1", client_time, None)
            .await;
        // No drift observation was recorded for the failed sync.
        assert_eq!(f.service.status().proxy.observation_count, before);
        f.service.shutdown();
    }

    #[tokio::test]
    async fn camera_rtc_is_borrowed_when_no_client_and_no_proxy() {
        let f = fixture();
        // Camera is 3.2 s ahead of the host.
        let camera_time = clock::wall_now() + time::Duration::milliseconds(3200);
        *f.camera
            .datetime
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = camera_time;

        f.service.handle_camera_connected().await;

        // Host stepped from the camera; the camera itself was not written.
        assert_eq!(times(&f.host_clock), vec![camera_time]);
        assert!(f
            .camera
            .datetime_writes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_empty());
        assert_eq!(f.service.status().proxy.state, ProxyState::None);
        f.service.shutdown();
    }

    #[tokio::test]
    async fn camera_is_synced_from_valid_host() {
        let f = fixture();
        f.clients.set(vec![("192.168.4.2:1".into(), ClientInterface::Ap)]);
        f.service
            .handle_client_connected("192.168.4.2:1", ClientInterface::Ap);

        // Camera runs 10 s behind; a client answer triggers camera sync.
        *f.camera
            .datetime
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) =
            clock::wall_now() - time::Duration::seconds(10);
        f.service
            .handle_time_response("192.168.4.2:1", clock::wall_now(), None)
            .await;
        assert_eq!(
            f.camera
                .datetime_writes
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .len(),
            1
        );
        f.service.shutdown();
    }

    #[tokio::test]
    async fn resync_prefers_original_then_same_interface_then_failover() {
        let f = fixture();
        f.clients.set(vec![("192.168.4.2:1".into(), ClientInterface::Ap)]);
        f.service
            .handle_client_connected("192.168.4.2:1", ClientInterface::Ap);

        // Original still connected: re-request only.
        f.service.resync_tick().await;
        assert_eq!(
            f.clients.requests(),
            vec!["192.168.4.2:1", "192.168.4.2:1"]
        );
        assert_eq!(
            f.service.status().proxy.client_address.as_deref(),
            Some("192.168.4.2:1")
        );

        // Original gone, another ap client present: fresh adoption.
        f.clients.set(vec![("192.168.4.7:1".into(), ClientInterface::Ap)]);
        f.service.resync_tick().await;
        assert_eq!(
            f.service.status().proxy.client_address.as_deref(),
            Some("192.168.4.7:1")
        );
        assert_eq!(f.service.status().proxy.state, ProxyState::ApClient);

        // Only a wlan client left: fail over across interfaces.
        f.clients.set(vec![("10.0.0.9:1".into(), ClientInterface::Wlan)]);
        f.service.resync_tick().await;
        assert_eq!(f.service.status().proxy.state, ProxyState::WlanClient);

        // Nobody left: the timer is cancelled but the state is kept.
        f.clients.set(vec![]);
        f.service.resync_tick().await;
        assert!(!f.service.has_resync_timer());
        assert_eq!(f.service.status().proxy.state, ProxyState::WlanClient);
        f.service.shutdown();
    }
}
