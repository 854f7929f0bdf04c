use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use thiserror::Error;

/// Closed set of error codes shared by the WebSocket and REST surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Camera unreachable over the network (retryable).
    CameraOffline,
    /// Camera rejected the command because it is busy (not retryable).
    CameraBusy,
    /// Shutter command was rejected or the shot never completed.
    PhotoFailed,
    /// Per-shot completion deadline expired.
    CameraTimeout,
    /// Wi-Fi scan failed.
    WifiScanFailed,
    /// Privileged OS operation denied.
    PermissionDenied,
    /// A required subsystem is unavailable.
    ServiceUnavailable,
    /// A parameter had an invalid value.
    InvalidParameter,
    /// A required parameter was missing.
    MissingParameter,
    /// Value not accepted by the camera's ability list, or input validation failed.
    ValidationFailed,
    /// Unknown session or report id.
    SessionNotFound,
    /// State violation or other non-retryable operation failure.
    OperationFailed,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CameraOffline => "CAMERA_OFFLINE",
            Self::CameraBusy => "CAMERA_BUSY",
            Self::PhotoFailed => "PHOTO_FAILED",
            Self::CameraTimeout => "CAMERA_TIMEOUT",
            Self::WifiScanFailed => "WIFI_SCAN_FAILED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::InvalidParameter => "INVALID_PARAMETER",
            Self::MissingParameter => "MISSING_PARAMETER",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::OperationFailed => "OPERATION_FAILED",
        }
    }

    /// Transport failures may be retried; protocol rejections may not.
    pub const fn is_transport(self) -> bool {
        matches!(self, Self::CameraOffline | Self::CameraTimeout)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service error carried in the shared error envelope.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct ControlError {
    pub code: ErrorCode,
    pub message: Cow<'static, str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Cow<'static, str>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<Cow<'static, str>>,
}

/// Result type for fallible service operations.
pub type ControlResult<T = ()> = Result<T, ControlError>;

impl ControlError {
    pub fn new(code: ErrorCode, message: impl std::fmt::Display) -> Self {
        Self {
            code,
            message: message.to_string().into(),
            operation: None,
            component: None,
        }
    }

    /// Attach origin info for the envelope; replaces any previous values.
    pub fn in_context(
        mut self,
        component: impl Into<Cow<'static, str>>,
        operation: impl Into<Cow<'static, str>>,
    ) -> Self {
        self.component = Some(component.into());
        self.operation = Some(operation.into());
        self
    }

    pub fn camera_offline(message: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::CameraOffline, message)
    }

    pub fn camera_busy(message: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::CameraBusy, message)
    }

    pub fn camera_timeout(message: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::CameraTimeout, message)
    }

    pub fn photo_failed(message: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::PhotoFailed, message)
    }

    pub fn validation_failed(message: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn invalid_parameter(message: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::InvalidParameter, message)
    }

    pub fn missing_parameter(name: &str) -> Self {
        Self::new(
            ErrorCode::MissingParameter,
            format!("Missing required parameter '{name}'"),
        )
    }

    pub fn operation_failed(message: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::OperationFailed, message)
    }

    pub fn session_not_found(message: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::SessionNotFound, message)
    }

    pub fn service_unavailable(message: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn permission_denied(message: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::PermissionDenied, message)
    }

    /// HTTP status for the REST surface: 400 validation, 404 not found,
    /// 503 no camera / unavailable, 500 otherwise.
    pub const fn http_status(&self) -> u16 {
        match self.code {
            ErrorCode::InvalidParameter
            | ErrorCode::MissingParameter
            | ErrorCode::ValidationFailed => 400,
            ErrorCode::SessionNotFound => 404,
            ErrorCode::CameraOffline | ErrorCode::ServiceUnavailable => 503,
            _ => 500,
        }
    }

    /// The single error envelope shared by WebSocket and REST.
    pub fn to_envelope(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "error",
            "timestamp": crate::clock::rfc3339(crate::clock::wall_now()),
            "error": self,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_serialization_is_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::CameraOffline).expect("serialize");
        assert_eq!(json, r#""CAMERA_OFFLINE""#);
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(ControlError::validation_failed("bad").http_status(), 400);
        assert_eq!(ControlError::session_not_found("gone").http_status(), 404);
        assert_eq!(ControlError::camera_offline("down").http_status(), 503);
        assert_eq!(ControlError::operation_failed("nope").http_status(), 500);
    }

    #[test]
    fn envelope_shape() {
        let envelope = ControlError::camera_busy("Device busy")
            .in_context("camera", "take_photo")
            .to_envelope();
        assert_eq!(envelope["type"], "error");
        assert_eq!(envelope["error"]["code"], "CAMERA_BUSY");
        assert_eq!(envelope["error"]["operation"], "take_photo");
        assert!(envelope["timestamp"].is_string());
    }
}
