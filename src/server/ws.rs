//! WebSocket endpoint: client registration, message dispatch, reply plumbing.

use super::AppState;
use crate::clock;
use crate::errors::{ControlError, ControlResult};
use crate::session::{SessionOptions, StopCondition};
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Everything a browser client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum ClientMessage {
    #[serde(rename = "take_photo")]
    TakePhoto,
    #[serde(rename = "get_camera_settings")]
    GetCameraSettings,
    #[serde(rename = "start_intervalometer_with_title")]
    StartIntervalometerWithTitle(StartPayload),
    #[serde(rename = "stop_intervalometer")]
    StopIntervalometer,
    #[serde(rename = "get_status")]
    GetStatus,
    #[serde(rename = "get_timelapse_reports")]
    GetTimelapseReports,
    #[serde(rename = "get_timelapse_report")]
    GetTimelapseReport { id: String },
    #[serde(rename = "update_report_title")]
    UpdateReportTitle { id: String, title: String },
    #[serde(rename = "delete_timelapse_report")]
    DeleteTimelapseReport { id: String },
    #[serde(rename = "save_session_as_report")]
    SaveSessionAsReport {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
        #[serde(default)]
        title: Option<String>,
    },
    #[serde(rename = "discard_session")]
    DiscardSession {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
    },
    #[serde(rename = "time-sync-response")]
    TimeSyncResponse {
        #[serde(rename = "clientTime")]
        client_time: ClientTime,
        #[serde(default)]
        timezone: Option<String>,
        #[serde(default)]
        gps: Option<serde_json::Value>,
    },
    #[serde(rename = "ping")]
    Ping,
}

/// Intervalometer start parameters as the UI sends them.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartPayload {
    pub(crate) interval: f64,
    #[serde(default)]
    pub(crate) shots: Option<u32>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub(crate) stop_time: Option<OffsetDateTime>,
    #[serde(default)]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) stop_condition: Option<StopCondition>,
}

impl StartPayload {
    pub(crate) fn into_options(self) -> SessionOptions {
        let stop_condition = self.stop_condition.unwrap_or(match (self.shots, self.stop_time) {
            (Some(_), _) => StopCondition::Shots,
            (None, Some(_)) => StopCondition::Time,
            (None, None) => StopCondition::Unlimited,
        });
        SessionOptions {
            interval: self.interval,
            stop_condition,
            total_shots: self.shots,
            stop_time: self.stop_time,
            title: if self.title.trim().is_empty() {
                "Untitled".to_owned()
            } else {
                self.title
            },
        }
    }
}

/// Browser `Date.now()` milliseconds, or an RFC 3339 string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ClientTime {
    Millis(f64),
    Text(String),
}

impl ClientTime {
    pub(crate) fn resolve(&self) -> ControlResult<OffsetDateTime> {
        match self {
            Self::Millis(ms) => {
                #[expect(clippy::as_conversions)]
                let nanos = (ms * 1_000_000.0) as i128;
                OffsetDateTime::from_unix_timestamp_nanos(nanos)
                    .map_err(|err| ControlError::invalid_parameter(format!("clientTime: {err}")))
            }
            Self::Text(text) => OffsetDateTime::parse(
                text,
                &time::format_description::well_known::Rfc3339,
            )
            .map_err(|err| ControlError::invalid_parameter(format!("clientTime: {err}"))),
        }
    }
}

fn event_reply(event_type: &str, data: serde_json::Value) -> serde_json::Value {
    json!({
        "type": "event",
        "timestamp": clock::rfc3339(clock::wall_now()),
        "eventType": event_type,
        "data": data,
    })
}

pub(crate) async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_socket(state, socket, addr))
}

#[tracing::instrument(level = "info", skip(state, socket))]
async fn handle_socket(state: Arc<AppState>, socket: WebSocket, addr: SocketAddr) {
    let (tx, mut outbound) = tokio::sync::mpsc::unbounded_channel::<String>();
    let (client_id, interface) = state.clients.add(addr, tx);

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        // Channel closed: orderly shutdown or client removal.
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: close_code::NORMAL,
                reason: "".into(),
            })))
            .await;
    });

    // The new client may become our time proxy.
    state
        .timesync
        .handle_client_connected(&addr.to_string(), interface);

    let welcome = state.fabric.welcome(client_id).await;
    let _ = state.clients.send_to(client_id, &welcome);

    while let Some(received) = stream.next().await {
        match received {
            Ok(Message::Text(text)) => {
                dispatch(&state, client_id, addr, text.as_str()).await;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    state.clients.remove(client_id);
    writer.abort();
}

/// Route one client message; every failure sends exactly one error envelope.
async fn dispatch(state: &Arc<AppState>, client_id: Uuid, addr: SocketAddr, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(err) => {
            let error = ControlError::invalid_parameter(format!("unparseable message: {err}"))
                .in_context("websocket", "dispatch");
            let _ = state.clients.send_to(client_id, &error.to_envelope());
            return;
        }
    };

    let reply = handle_message(state, addr, message).await;
    match reply {
        Ok(Some(reply)) => {
            let _ = state.clients.send_to(client_id, &reply);
        }
        Ok(None) => {}
        Err(error) => {
            tracing::warn!(%error, %client_id, "websocket request failed");
            let _ = state.clients.send_to(client_id, &error.to_envelope());
        }
    }
}

async fn handle_message(
    state: &Arc<AppState>,
    addr: SocketAddr,
    message: ClientMessage,
) -> ControlResult<Option<serde_json::Value>> {
    match message {
        ClientMessage::TakePhoto => {
            let camera = state.require_camera()?;
            camera
                .take_photo()
                .await
                .map_err(|err| err.in_context("camera", "take_photo"))?;
            Ok(Some(event_reply("photo_taken", json!({}))))
        }
        ClientMessage::GetCameraSettings => {
            let camera = state.require_camera()?;
            let settings = camera
                .get_settings()
                .await
                .map_err(|err| err.in_context("camera", "get_camera_settings"))?;
            Ok(Some(event_reply(
                "camera_settings",
                serde_json::to_value(settings).unwrap_or_default(),
            )))
        }
        ClientMessage::StartIntervalometerWithTitle(payload) => {
            let snapshot = state.manager.create_and_start(payload.into_options()).await?;
            Ok(Some(event_reply(
                "intervalometer_started",
                serde_json::to_value(snapshot).unwrap_or_default(),
            )))
        }
        ClientMessage::StopIntervalometer => {
            state.manager.stop_active().await?;
            Ok(Some(event_reply("intervalometer_stopping", json!({}))))
        }
        ClientMessage::GetStatus => {
            let mut status = state.fabric.status_snapshot().await;
            status["type"] = json!("status_update");
            status["timestamp"] = json!(clock::rfc3339(clock::wall_now()));
            Ok(Some(status))
        }
        ClientMessage::GetTimelapseReports => {
            let reports = state.manager.list_reports().await?;
            Ok(Some(event_reply(
                "timelapse_reports",
                json!({ "reports": reports }),
            )))
        }
        ClientMessage::GetTimelapseReport { id } => {
            let report = state.manager.get_report(&id).await?;
            Ok(Some(event_reply(
                "timelapse_report",
                serde_json::to_value(report).unwrap_or_default(),
            )))
        }
        ClientMessage::UpdateReportTitle { id, title } => {
            let report = state.manager.update_report_title(&id, &title).await?;
            Ok(Some(event_reply(
                "report_title_updated",
                serde_json::to_value(report).unwrap_or_default(),
            )))
        }
        ClientMessage::DeleteTimelapseReport { id } => {
            state.manager.delete_report(&id).await?;
            Ok(Some(event_reply("report_deleted", json!({ "id": id }))))
        }
        ClientMessage::SaveSessionAsReport { session_id, title } => {
            let report = state
                .manager
                .save_unsaved(session_id, title.as_deref())
                .await?;
            Ok(Some(event_reply(
                "session_saved",
                serde_json::to_value(report).unwrap_or_default(),
            )))
        }
        ClientMessage::DiscardSession { session_id } => {
            state.manager.discard_unsaved(session_id).await?;
            Ok(Some(event_reply(
                "session_discarded",
                json!({ "sessionId": session_id }),
            )))
        }
        ClientMessage::TimeSyncResponse {
            client_time,
            timezone,
            gps: _,
        } => {
            let client_time = client_time.resolve()?;
            state
                .timesync
                .handle_time_response(&addr.to_string(), client_time, timezone.as_deref())
                .await;
            Ok(None)
        }
        ClientMessage::Ping => Ok(Some(json!({
            "type": "pong",
            "timestamp": clock::rfc3339(clock::wall_now()),
        }))),
    }
}
