//! Connected-client registry and the broadcast fabric.
//!
//! WebSocket clients register here; subsystem events are fanned out
//! best-effort (closed sockets are dropped), and a periodic `status_update`
//! aggregates a snapshot from every subsystem.

use crate::camera::PrimaryCamera;
use crate::clock;
use crate::config::{Config, Ipv4Network};
use crate::discovery::registry::CameraRegistry;
use crate::events::{Event, EventBus};
use crate::session::manager::SessionManager;
use crate::timesync::{ClientInterface, TimeRequester, TimeSyncService};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Budget for camera-sourced fields of a status snapshot.
const SNAPSHOT_CAMERA_BUDGET: Duration = Duration::from_secs(3);

/// One active WebSocket session.
#[derive(derive_more::Debug)]
pub struct ConnectedClient {
    pub id: Uuid,
    pub address: SocketAddr,
    pub interface: ClientInterface,
    #[debug(skip)]
    tx: mpsc::UnboundedSender<String>,
}

/// Registry of connected clients. The only mutator of the client set.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<Uuid, ConnectedClient>>,
    ap_network: Ipv4Network,
}

impl ClientRegistry {
    pub fn new(ap_network: Ipv4Network) -> Arc<Self> {
        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            ap_network,
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, ConnectedClient>> {
        self.clients
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn classify(&self, address: SocketAddr) -> ClientInterface {
        if self.ap_network.contains(address.ip()) {
            ClientInterface::Ap
        } else {
            ClientInterface::Wlan
        }
    }

    /// Register a freshly opened socket.
    pub fn add(
        &self,
        address: SocketAddr,
        tx: mpsc::UnboundedSender<String>,
    ) -> (Uuid, ClientInterface) {
        let id = Uuid::new_v4();
        let interface = self.classify(address);
        let _ = self
            .clients
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(
                id,
                ConnectedClient {
                    id,
                    address,
                    interface,
                    tx,
                },
            );
        tracing::info!(%id, %address, %interface, "client connected");
        (id, interface)
    }

    pub fn remove(&self, id: Uuid) {
        if self
            .clients
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&id)
            .is_some()
        {
            tracing::info!(%id, "client disconnected");
        }
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// Best-effort fan-out; clients whose channel is gone are dropped.
    pub fn broadcast(&self, message: &serde_json::Value) {
        let text = message.to_string();
        // Snapshot-and-iterate: additions and removals during the fan-out
        // must not invalidate the walk.
        let snapshot: Vec<(Uuid, mpsc::UnboundedSender<String>)> = self
            .read()
            .values()
            .map(|client| (client.id, client.tx.clone()))
            .collect();
        let mut dead = Vec::new();
        for (id, tx) in snapshot {
            if tx.send(text.clone()).is_err() {
                dead.push(id);
            }
        }
        for id in dead {
            self.remove(id);
        }
    }

    pub fn send_to(&self, id: Uuid, message: &serde_json::Value) -> bool {
        let Some(tx) = self.read().get(&id).map(|client| client.tx.clone()) else {
            return false;
        };
        tx.send(message.to_string()).is_ok()
    }

    /// Drop every client channel; write pumps then close their sockets.
    pub fn shutdown(&self) {
        self.clients
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }
}

impl TimeRequester for ClientRegistry {
    fn request_time(&self, address: &str) -> bool {
        let target = self
            .read()
            .values()
            .find(|client| client.address.to_string() == address)
            .map(|client| client.tx.clone());
        let Some(tx) = target else {
            return false;
        };
        let message = json!({
            "type": "time-sync-request",
            "timestamp": clock::rfc3339(clock::wall_now()),
            "requestId": Uuid::new_v4(),
        });
        tx.send(message.to_string()).is_ok()
    }

    fn connected_clients(&self) -> Vec<(String, ClientInterface)> {
        self.read()
            .values()
            .map(|client| (client.address.to_string(), client.interface))
            .collect()
    }
}

/// Wire rendering of bus events.
fn wire_message(event: &Event) -> serde_json::Value {
    let timestamp = clock::rfc3339(clock::wall_now());
    match event {
        Event::Session(inner) => {
            let mut message = serde_json::to_value(inner).unwrap_or_default();
            message["type"] = json!("timelapse_event");
            message["timestamp"] = json!(timestamp);
            message
        }
        Event::Manager(inner) => {
            let mut message = serde_json::to_value(inner).unwrap_or_default();
            message["type"] = json!("timelapse_event");
            message["timestamp"] = json!(timestamp);
            message
        }
        Event::Discovery(inner) => {
            let mut message = serde_json::to_value(inner).unwrap_or_default();
            message["type"] = json!("discovery_event");
            message["timestamp"] = json!(timestamp);
            message
        }
        Event::TimeSync(status) => json!({
            "type": "time-sync-status",
            "timestamp": timestamp,
            "data": status,
        }),
        Event::Activity(log) => json!({
            "type": "activity_log",
            "timestamp": timestamp,
            "level": log.level,
            "message": log.message,
        }),
    }
}

/// Aggregates snapshots and pumps bus events out to clients.
#[derive(derive_more::Debug)]
pub struct BroadcastFabric {
    #[debug(skip)]
    pub clients: Arc<ClientRegistry>,
    #[debug(skip)]
    registry: Arc<CameraRegistry>,
    #[debug(skip)]
    manager: Arc<SessionManager>,
    #[debug(skip)]
    timesync: Arc<TimeSyncService>,
    #[debug(skip)]
    camera: Arc<dyn PrimaryCamera>,
    #[debug(skip)]
    bus: EventBus,
    config: Config,
}

impl BroadcastFabric {
    pub fn new(
        clients: Arc<ClientRegistry>,
        registry: Arc<CameraRegistry>,
        manager: Arc<SessionManager>,
        timesync: Arc<TimeSyncService>,
        camera: Arc<dyn PrimaryCamera>,
        bus: EventBus,
        config: Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            clients,
            registry,
            manager,
            timesync,
            camera,
            bus,
            config,
        })
    }

    fn host_telemetry(&self) -> serde_json::Value {
        let load = sysinfo::System::load_average();
        let temperature = sysinfo::Components::new_with_refreshed_list()
            .iter()
            .find(|component| {
                let label = component.label().to_ascii_lowercase();
                label.contains("cpu") || label.contains("thermal")
            })
            .map(|component| component.temperature());
        json!({
            "uptimeSeconds": sysinfo::System::uptime(),
            "loadAverage": [load.one, load.five, load.fifteen],
            "cpuTemperatureC": temperature,
        })
    }

    fn network_summary(&self) -> serde_json::Value {
        let interfaces: Vec<_> = crate::discovery::get_active_interfaces()
            .map(|intf| {
                let addresses: Vec<String> =
                    intf.ipv4.iter().map(|net| net.addr().to_string()).collect();
                let is_ap = intf
                    .ipv4
                    .iter()
                    .any(|net| self.config.ap_network.contains(net.addr().into()));
                json!({
                    "name": intf.name,
                    "addresses": addresses,
                    "role": if is_ap { "ap" } else { "wlan" },
                })
            })
            .collect();
        json!({ "interfaces": interfaces })
    }

    /// Camera-sourced extras, skipped while the intervalometer has paused
    /// background probes.
    async fn camera_extras(&self) -> (serde_json::Value, serde_json::Value) {
        let Some(camera) = self.camera.primary() else {
            return (serde_json::Value::Null, serde_json::Value::Null);
        };
        if camera.is_info_polling_paused() {
            return (serde_json::Value::Null, serde_json::Value::Null);
        }
        let extras = tokio::time::timeout(SNAPSHOT_CAMERA_BUDGET, async {
            let storage = camera.storage_info().await.ok();
            let battery = camera.battery().await.ok();
            (storage, battery)
        })
        .await;
        match extras {
            Ok((storage, battery)) => (
                storage
                    .and_then(|info| serde_json::to_value(info).ok())
                    .unwrap_or(serde_json::Value::Null),
                battery.unwrap_or(serde_json::Value::Null),
            ),
            Err(_) => (serde_json::Value::Null, serde_json::Value::Null),
        }
    }

    /// The `status_update` payload, shared with `welcome`.
    pub async fn status_snapshot(&self) -> serde_json::Value {
        let (storage, battery) = self.camera_extras().await;
        json!({
            "camera": self.registry.summary(),
            "storage": storage,
            "battery": battery,
            "power": self.host_telemetry(),
            "network": self.network_summary(),
            "intervalometer": self.manager.current_snapshot().await,
            "timesync": self.timesync.status(),
            "clients": self.clients.count(),
        })
    }

    pub async fn broadcast_status(&self) {
        let mut message = self.status_snapshot().await;
        message["type"] = json!("status_update");
        message["timestamp"] = json!(clock::rfc3339(clock::wall_now()));
        self.clients.broadcast(&message);
    }

    /// Snapshot sent to a socket right after it opens.
    pub async fn welcome(&self, client_id: Uuid) -> serde_json::Value {
        let mut message = self.status_snapshot().await;
        message["type"] = json!("welcome");
        message["timestamp"] = json!(clock::rfc3339(clock::wall_now()));
        message["clientId"] = json!(client_id);
        message
    }

    /// Spawn the event pump and the periodic status broadcast.
    pub fn spawn(self: &Arc<Self>) -> (tokio::task::JoinHandle<()>, crate::clock::TimerHandle) {
        let pump = {
            let fabric = Arc::clone(self);
            let mut rx = self.bus.subscribe();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            fabric.clients.broadcast(&wire_message(&event));
                            // Discovery and manager transitions change the
                            // aggregate picture; push a fresh snapshot
                            // immediately instead of waiting for the timer.
                            if matches!(event, Event::Discovery(_) | Event::Manager(_)) {
                                fabric.broadcast_status().await;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "broadcast pump lagged; clients missed events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
            })
        };
        let status_timer = {
            let fabric = Arc::clone(self);
            clock::every(self.config.status_interval, move || {
                let fabric = Arc::clone(&fabric);
                async move { fabric.broadcast_status().await }
            })
        };
        (pump, status_timer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ActivityLevel, DiscoveryEvent};

    fn ap_network() -> Ipv4Network {
        "192.168.4.0/24".parse().expect("network")
    }

    #[tokio::test]
    async fn clients_are_classified_by_interface() {
        let registry = ClientRegistry::new(ap_network());
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_, interface) = registry.add("192.168.4.20:52000".parse().expect("addr"), tx);
        assert_eq!(interface, ClientInterface::Ap);

        let (tx, _rx) = mpsc::unbounded_channel();
        let (_, interface) = registry.add("10.1.1.5:52000".parse().expect("addr"), tx);
        assert_eq!(interface, ClientInterface::Wlan);
        assert_eq!(registry.count(), 2);
    }

    #[tokio::test]
    async fn broadcast_drops_dead_clients() {
        let registry = ClientRegistry::new(ap_network());
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        let _ = registry.add("192.168.4.20:52000".parse().expect("addr"), tx_live);
        let _ = registry.add("192.168.4.21:52000".parse().expect("addr"), tx_dead);
        drop(rx_dead);

        registry.broadcast(&json!({ "type": "status_update" }));
        assert_eq!(registry.count(), 1);
        let received = rx_live.recv().await.expect("message");
        assert!(received.contains("status_update"));
    }

    #[tokio::test]
    async fn time_requests_reach_the_addressed_client() {
        let registry = ClientRegistry::new(ap_network());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let addr: SocketAddr = "192.168.4.20:52000".parse().expect("addr");
        let _ = registry.add(addr, tx);

        assert!(registry.request_time(&addr.to_string()));
        assert!(!registry.request_time("192.168.4.99:1"));
        let message = rx.recv().await.expect("request");
        assert!(message.contains("time-sync-request"));
        assert!(message.contains("requestId"));
    }

    #[test]
    fn wire_messages_carry_type_and_timestamp() {
        let message = wire_message(&Event::Discovery(DiscoveryEvent::CameraOffline {
            uuid: "cam-1".into(),
        }));
        assert_eq!(message["type"], "discovery_event");
        assert_eq!(message["eventType"], "camera_offline");
        assert!(message["timestamp"].is_string());

        let message = wire_message(&Event::Activity(crate::events::ActivityLog {
            level: ActivityLevel::Warning,
            message: "heads up".into(),
        }));
        assert_eq!(message["type"], "activity_log");
        assert_eq!(message["level"], "warning");
    }
}
