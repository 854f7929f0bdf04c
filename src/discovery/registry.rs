//! Camera record store and primary-camera selection.

use super::SsdpAnnouncement;
use crate::camera::{CameraControl, CcapiClient, PrimaryCamera};
use crate::clock::{self, TimerHandle};
use crate::events::{DiscoveryEvent, EventBus};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// How long an offline primary keeps its flag before demotion.
const PRIMARY_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    Discovered,
    Connecting,
    Connected,
    Offline,
    Error,
}

/// One discovered (or manually added) camera. The `uuid` never rebinds to a
/// different physical device; records persist across transient offline.
#[derive(Debug, Clone, Serialize)]
pub struct CameraRecord {
    pub uuid: String,
    pub ip_address: IpAddr,
    pub port: u16,
    pub model_name: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen_at: time::OffsetDateTime,
    pub status: CameraStatus,
    pub capabilities: BTreeSet<String>,
    pub primary: bool,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, CameraRecord>,
    clients: HashMap<String, Arc<dyn CameraControl>>,
    primary: Option<String>,
}

/// Registry of cameras; the single owner of [`CameraRecord`]s.
#[derive(derive_more::Debug)]
pub struct CameraRegistry {
    inner: RwLock<Inner>,
    #[debug(skip)]
    grace: std::sync::Mutex<Option<(String, TimerHandle)>>,
    bus: EventBus,
}

/// Aggregate view for status snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoverySummary {
    pub camera_count: usize,
    pub connected_count: usize,
    pub primary: Option<CameraRecord>,
    pub cameras: Vec<CameraRecord>,
}

impl CameraRegistry {
    pub fn new(bus: EventBus) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Inner::default()),
            grace: std::sync::Mutex::new(None),
            bus,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Apply a parsed SSDP datagram to the record table.
    pub fn handle_announcement(self: &Arc<Self>, announcement: SsdpAnnouncement) {
        if announcement.byebye {
            self.mark_offline(&announcement.uuid);
            return;
        }

        enum Outcome {
            New,
            IpChanged(IpAddr),
            Seen,
        }

        let outcome = {
            let mut inner = self.write();
            match inner.records.get_mut(&announcement.uuid) {
                Some(record) => {
                    record.last_seen_at = clock::wall_now();
                    let _ = record.capabilities.insert(announcement.service.clone());
                    if record.ip_address == announcement.ip {
                        Outcome::Seen
                    } else {
                        record.ip_address = announcement.ip;
                        record.port = announcement.port;
                        // Dependents rebind through the fresh client; the
                        // record itself is never evicted.
                        let _ = inner.clients.remove(&announcement.uuid);
                        Outcome::IpChanged(announcement.ip)
                    }
                }
                None => {
                    let mut capabilities = BTreeSet::new();
                    let _ = capabilities.insert(announcement.service.clone());
                    let _ = inner.records.insert(
                        announcement.uuid.clone(),
                        CameraRecord {
                            uuid: announcement.uuid.clone(),
                            ip_address: announcement.ip,
                            port: announcement.port,
                            model_name: None,
                            last_seen_at: clock::wall_now(),
                            status: CameraStatus::Discovered,
                            capabilities,
                            primary: false,
                        },
                    );
                    Outcome::New
                }
            }
        };

        match outcome {
            Outcome::New => {
                tracing::info!(uuid = %announcement.uuid, ip = %announcement.ip, "camera discovered");
                self.bus.discovery(DiscoveryEvent::CameraDiscovered {
                    uuid: announcement.uuid.clone(),
                    ip_address: announcement.ip.to_string(),
                    model_name: None,
                });
                self.spawn_connect(announcement.uuid);
            }
            Outcome::IpChanged(ip) => {
                tracing::info!(uuid = %announcement.uuid, %ip, "camera changed address");
                self.bus.discovery(DiscoveryEvent::CameraIpChanged {
                    uuid: announcement.uuid.clone(),
                    ip_address: ip.to_string(),
                });
                self.spawn_connect(announcement.uuid);
            }
            Outcome::Seen => {}
        }
    }

    /// Register a camera that SSDP cannot see.
    pub async fn add_manual(self: &Arc<Self>, ip: IpAddr, port: u16) -> String {
        // Manual records have no advertised uuid until the probe reads one;
        // the address itself is the stable identity.
        let uuid = format!("manual-{ip}");
        {
            let mut inner = self.write();
            let _ = inner
                .records
                .entry(uuid.clone())
                .and_modify(|record| {
                    record.ip_address = ip;
                    record.port = port;
                    record.last_seen_at = clock::wall_now();
                })
                .or_insert_with(|| CameraRecord {
                    uuid: uuid.clone(),
                    ip_address: ip,
                    port,
                    model_name: None,
                    last_seen_at: clock::wall_now(),
                    status: CameraStatus::Discovered,
                    capabilities: BTreeSet::new(),
                    primary: false,
                });
        }
        self.connect(uuid.clone()).await;
        uuid
    }

    fn spawn_connect(self: &Arc<Self>, uuid: String) {
        let registry = Arc::clone(self);
        let _ = tokio::spawn(async move { registry.connect(uuid).await });
    }

    /// Connect (or reconnect) to a known camera and probe it.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn connect(self: &Arc<Self>, uuid: String) {
        let (ip, port, existing) = {
            let mut inner = self.write();
            let Some(record) = inner.records.get_mut(&uuid) else {
                return;
            };
            record.status = CameraStatus::Connecting;
            let addr = (record.ip_address, record.port);
            (addr.0, addr.1, inner.clients.get(&uuid).cloned())
        };

        let client: Arc<dyn CameraControl> = match existing {
            Some(client) => client,
            None => match CcapiClient::new(ip, port) {
                Ok(client) => Arc::new(client),
                Err(err) => {
                    tracing::error!(%err, %uuid, "failed to build camera client");
                    self.set_status(&uuid, CameraStatus::Error);
                    self.bus.discovery(DiscoveryEvent::CameraError {
                        uuid,
                        error: err.to_string(),
                    });
                    return;
                }
            },
        };

        let status = client.connection_status().await;
        if status.connected {
            {
                let mut inner = self.write();
                let _ = inner.clients.insert(uuid.clone(), client);
                if let Some(record) = inner.records.get_mut(&uuid) {
                    record.status = CameraStatus::Connected;
                    record.model_name = status.model.clone().or(record.model_name.take());
                    record.last_seen_at = clock::wall_now();
                }
            }
            self.cancel_grace_for(&uuid);
            self.bus.discovery(DiscoveryEvent::CameraConnected {
                uuid: uuid.clone(),
                ip_address: ip.to_string(),
            });
            self.maybe_promote();
        } else {
            self.set_status(&uuid, CameraStatus::Offline);
            self.bus.discovery(DiscoveryEvent::CameraError {
                uuid,
                error: "connection probe failed".into(),
            });
        }
    }

    fn set_status(&self, uuid: &str, status: CameraStatus) {
        let mut inner = self.write();
        if let Some(record) = inner.records.get_mut(uuid) {
            record.status = status;
        }
    }

    /// Transition a camera to offline, with primary flap tolerance.
    pub fn mark_offline(self: &Arc<Self>, uuid: &str) {
        let was_primary = {
            let mut inner = self.write();
            let Some(record) = inner.records.get_mut(uuid) else {
                return;
            };
            if record.status == CameraStatus::Offline {
                return;
            }
            record.status = CameraStatus::Offline;
            inner.primary.as_deref() == Some(uuid)
        };

        tracing::warn!(uuid, "camera offline");
        self.bus.discovery(DiscoveryEvent::CameraOffline {
            uuid: uuid.to_owned(),
        });

        if was_primary {
            // Do not demote immediately: transient Wi-Fi flaps are common in
            // the field and would otherwise churn the primary selection.
            let registry = Arc::clone(self);
            let expired_uuid = uuid.to_owned();
            let handle = clock::schedule_at(
                clock::wall_now() + time::Duration::try_from(PRIMARY_GRACE).unwrap_or_default(),
                move || async move { registry.expire_primary_grace(&expired_uuid) },
            );
            *self.lock_grace() = Some((uuid.to_owned(), handle));
        }
    }

    fn lock_grace(&self) -> std::sync::MutexGuard<'_, Option<(String, TimerHandle)>> {
        self.grace.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn cancel_grace_for(&self, uuid: &str) {
        let mut grace = self.lock_grace();
        if let Some((pending, handle)) = grace.as_ref() {
            if pending == uuid {
                handle.cancel();
                *grace = None;
            }
        }
    }

    fn expire_primary_grace(self: &Arc<Self>, uuid: &str) {
        {
            let mut grace = self.lock_grace();
            match grace.take() {
                Some((pending, _)) if pending == uuid => {}
                other => {
                    // Superseded while the timer was pending.
                    *grace = other;
                    return;
                }
            }
        }
        let still_offline = {
            let inner = self.read();
            inner.primary.as_deref() == Some(uuid)
                && inner
                    .records
                    .get(uuid)
                    .is_some_and(|record| record.status != CameraStatus::Connected)
        };
        if !still_offline {
            return;
        }
        self.clear_primary();
        self.maybe_promote();
    }

    fn clear_primary(&self) {
        let cleared = {
            let mut inner = self.write();
            let cleared = inner.primary.take();
            if let Some(uuid) = &cleared {
                if let Some(record) = inner.records.get_mut(uuid) {
                    record.primary = false;
                }
            }
            cleared
        };
        if let Some(uuid) = cleared {
            tracing::warn!(%uuid, "primary camera demoted");
            self.bus
                .discovery(DiscoveryEvent::PrimaryCameraDisconnected { uuid });
        }
    }

    /// Promote a connected camera if no primary exists.
    fn maybe_promote(&self) {
        let promoted = {
            let mut inner = self.write();
            if inner.primary.is_some() {
                None
            } else {
                let candidate = inner
                    .records
                    .values()
                    .filter(|record| record.status == CameraStatus::Connected)
                    .max_by_key(|record| record.last_seen_at)
                    .map(|record| record.uuid.clone());
                if let Some(uuid) = &candidate {
                    inner.primary = Some(uuid.clone());
                    if let Some(record) = inner.records.get_mut(uuid) {
                        record.primary = true;
                    }
                }
                candidate
            }
        };
        if let Some(uuid) = promoted {
            tracing::info!(%uuid, "primary camera selected");
            self.bus.discovery(DiscoveryEvent::PrimaryCameraChanged { uuid });
        }
    }

    /// Manual primary override.
    pub fn set_primary(&self, uuid: &str) -> crate::errors::ControlResult<()> {
        {
            let mut inner = self.write();
            if !inner.records.contains_key(uuid) {
                return Err(crate::errors::ControlError::session_not_found(format!(
                    "unknown camera '{uuid}'"
                )));
            }
            let previous = inner.primary.replace(uuid.to_owned());
            if let Some(previous) = previous {
                if let Some(record) = inner.records.get_mut(&previous) {
                    record.primary = false;
                }
            }
            if let Some(record) = inner.records.get_mut(uuid) {
                record.primary = true;
            }
        }
        self.cancel_grace_for(uuid);
        self.bus.discovery(DiscoveryEvent::PrimaryCameraChanged {
            uuid: uuid.to_owned(),
        });
        Ok(())
    }

    pub fn primary_uuid(&self) -> Option<String> {
        self.read().primary.clone()
    }

    pub fn records(&self) -> Vec<CameraRecord> {
        self.read().records.values().cloned().collect()
    }

    pub fn summary(&self) -> DiscoverySummary {
        let inner = self.read();
        let cameras: Vec<_> = inner.records.values().cloned().collect();
        DiscoverySummary {
            camera_count: cameras.len(),
            connected_count: cameras
                .iter()
                .filter(|record| record.status == CameraStatus::Connected)
                .count(),
            primary: inner
                .primary
                .as_ref()
                .and_then(|uuid| inner.records.get(uuid).cloned()),
            cameras,
        }
    }

    /// One pass of the connection monitor.
    pub async fn monitor_tick(self: &Arc<Self>) {
        let clients: Vec<(String, Arc<dyn CameraControl>)> = {
            let inner = self.read();
            inner
                .clients
                .iter()
                .map(|(uuid, client)| (uuid.clone(), Arc::clone(client)))
                .collect()
        };
        for (uuid, client) in clients {
            // The intervalometer parks background probes during long
            // exposures; respect the gate.
            if client.is_connection_monitoring_paused() {
                continue;
            }
            let status = client.connection_status().await;
            let previous = self.read().records.get(&uuid).map(|record| record.status);
            if status.connected {
                if previous == Some(CameraStatus::Offline) {
                    {
                        let mut inner = self.write();
                        if let Some(record) = inner.records.get_mut(&uuid) {
                            record.status = CameraStatus::Connected;
                            record.last_seen_at = clock::wall_now();
                        }
                    }
                    self.cancel_grace_for(&uuid);
                    self.bus.discovery(DiscoveryEvent::CameraConnected {
                        uuid: uuid.clone(),
                        ip_address: status.ip.to_string(),
                    });
                    self.maybe_promote();
                }
            } else if client.transport_lost() && previous == Some(CameraStatus::Connected) {
                self.mark_offline(&uuid);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn insert_for_test(
        &self,
        uuid: &str,
        client: Arc<dyn CameraControl>,
        status: CameraStatus,
    ) {
        let mut inner = self.write();
        let _ = inner.records.insert(
            uuid.to_owned(),
            CameraRecord {
                uuid: uuid.to_owned(),
                ip_address: IpAddr::from([127, 0, 0, 1]),
                port: 443,
                model_name: Some("Test".into()),
                last_seen_at: clock::wall_now(),
                status,
                capabilities: BTreeSet::new(),
                primary: false,
            },
        );
        let _ = inner.clients.insert(uuid.to_owned(), client);
    }
}

impl PrimaryCamera for CameraRegistry {
    fn primary(&self) -> Option<Arc<dyn CameraControl>> {
        let inner = self.read();
        let uuid = inner.primary.as_ref()?;
        inner.clients.get(uuid).cloned()
    }
}

/// Long-running discovery loops, spawned by the composition root.
pub mod tasks {
    use super::super::{
        bind_ssdp_socket, get_active_interfaces, join_multicast_groups, msearch_message,
        parse_announcement, SSDP_ADDR_V4, SSDP_PORT,
    };
    use super::CameraRegistry;
    use crate::clock::{self, TimerHandle};
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
    use std::sync::Arc;
    use std::time::Duration;

    /// Bind the SSDP listener and spawn the listen loop.
    ///
    /// Binding failure is a startup failure: returning the error lets the
    /// process exit rather than run without discovery.
    pub fn spawn_listener(registry: &Arc<CameraRegistry>) -> eyre::Result<tokio::task::JoinHandle<()>> {
        let socket = bind_ssdp_socket(SocketAddr::from(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            SSDP_PORT,
        )))?;
        join_multicast_groups(&socket);
        let registry = Arc::clone(registry);
        Ok(tokio::spawn(async move {
            let mut buf = vec![0_u8; 2048];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, src)) => {
                        if let Some(announcement) = parse_announcement(&buf[..len], src) {
                            registry.handle_announcement(announcement);
                        }
                    }
                    Err(err) => {
                        tracing::error!(%err, "SSDP receive failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }))
    }

    /// One active M-SEARCH pass over all running interfaces, collecting
    /// unicast responses for the MX window.
    pub async fn search_once(registry: &Arc<CameraRegistry>) -> eyre::Result<()> {
        let socket = bind_ssdp_socket(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))?;
        let message = msearch_message();
        for intf in get_active_interfaces() {
            for net in &intf.ipv4 {
                socket2::SockRef::from(&socket).set_multicast_if_v4(&net.addr())?;
                let _ = socket
                    .send_to(message.as_bytes(), (SSDP_ADDR_V4, SSDP_PORT))
                    .await?;
            }
        }
        let deadline = tokio::time::Instant::now() + Duration::from_secs(4);
        let mut buf = vec![0_u8; 2048];
        while let Ok(received) =
            tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await
        {
            let (len, src) = received?;
            if let Some(announcement) = parse_announcement(&buf[..len], src) {
                registry.handle_announcement(announcement);
            }
        }
        Ok(())
    }

    /// Periodic active M-SEARCH.
    pub fn spawn_search(registry: &Arc<CameraRegistry>, period: Duration) -> TimerHandle {
        let registry = Arc::clone(registry);
        clock::every(period, move || {
            let registry = Arc::clone(&registry);
            async move {
                if let Err(err) = search_once(&registry).await {
                    tracing::warn!(%err, "SSDP search pass failed");
                }
            }
        })
    }

    /// Periodic connection monitor.
    pub fn spawn_monitor(registry: &Arc<CameraRegistry>, period: Duration) -> TimerHandle {
        let registry = Arc::clone(registry);
        clock::every(period, move || {
            let registry = Arc::clone(&registry);
            async move { registry.monitor_tick().await }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::testing::ScriptedCamera;
    use crate::events::{DiscoveryEvent, Event, EventBus};

    fn announcement(uuid: &str, ip: &str) -> SsdpAnnouncement {
        SsdpAnnouncement {
            uuid: uuid.to_owned(),
            ip: ip.parse().expect("ip"),
            port: 443,
            service: super::super::CAMERA_SERVICE_ST.to_owned(),
            byebye: false,
        }
    }

    #[tokio::test]
    async fn discovery_creates_record_once() {
        let bus = EventBus::new();
        let registry = CameraRegistry::new(bus.clone());
        registry.handle_announcement(announcement("cam-1", "192.168.1.2"));
        registry.handle_announcement(announcement("cam-1", "192.168.1.2"));
        assert_eq!(registry.records().len(), 1);
    }

    #[tokio::test]
    async fn ip_change_keeps_record_and_emits_event() {
        let bus = EventBus::new();
        let registry = CameraRegistry::new(bus.clone());
        registry.handle_announcement(announcement("cam-1", "192.168.1.2"));
        let mut rx = bus.subscribe();
        registry.handle_announcement(announcement("cam-1", "192.168.1.9"));

        let records = registry.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ip_address.to_string(), "192.168.1.9");

        loop {
            match rx.recv().await.expect("event") {
                Event::Discovery(DiscoveryEvent::CameraIpChanged { uuid, ip_address }) => {
                    assert_eq!(uuid, "cam-1");
                    assert_eq!(ip_address, "192.168.1.9");
                    break;
                }
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn primary_promotion_and_manual_override() {
        let bus = EventBus::new();
        let registry = CameraRegistry::new(bus);
        registry.insert_for_test(
            "cam-1",
            Arc::new(ScriptedCamera::new(Duration::from_millis(1))),
            CameraStatus::Connected,
        );
        registry.insert_for_test(
            "cam-2",
            Arc::new(ScriptedCamera::new(Duration::from_millis(1))),
            CameraStatus::Connected,
        );
        registry.maybe_promote();
        assert!(registry.primary_uuid().is_some());

        registry.set_primary("cam-2").expect("set primary");
        assert_eq!(registry.primary_uuid().as_deref(), Some("cam-2"));
        assert!(registry.set_primary("cam-9").is_err());

        // Exactly one record holds the flag.
        let flagged = registry
            .records()
            .into_iter()
            .filter(|record| record.primary)
            .count();
        assert_eq!(flagged, 1);
    }

    #[tokio::test]
    async fn primary_resolves_through_accessor() {
        let bus = EventBus::new();
        let registry = CameraRegistry::new(bus);
        registry.insert_for_test(
            "cam-1",
            Arc::new(ScriptedCamera::new(Duration::from_millis(1))),
            CameraStatus::Connected,
        );
        registry.maybe_promote();
        assert!(registry.primary().is_some());
        registry.clear_primary();
        assert!(registry.primary().is_none());
    }
}
