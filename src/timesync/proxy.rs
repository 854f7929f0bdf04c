//! Pi Proxy State: the host's assertion that it holds a recent, trusted
//! wall-clock obtained from a connected browser client.
//!
//! Pure state machine, no I/O. Only the time-sync service writes it.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use time::OffsetDateTime;

/// Floor for the validity window; the adaptive window never shrinks below it.
const MIN_VALIDITY: Duration = Duration::from_secs(10 * 60);
/// Ceiling for the adaptive window when measured drift is negligible.
const MAX_VALIDITY: Duration = Duration::from_secs(24 * 60 * 60);
const MIN_RESYNC: Duration = Duration::from_secs(5 * 60);
/// Cumulative drift the window is sized to stay under.
const MAX_ACCEPTABLE_DRIFT_MS: f64 = 1000.0;
/// Safety factor applied to the computed window.
const VALIDITY_SAFETY: f64 = 0.8;
/// Gap above which an observation reflects a power-down, not free-run drift.
const INITIALIZATION_GAP: Duration = Duration::from_secs(60 * 60);
const MAX_OBSERVATIONS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, derive_more::Display)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyState {
    #[display("none")]
    None,
    #[display("ap-client")]
    ApClient,
    #[display("wlan-client")]
    WlanClient,
}

#[derive(Debug, Clone, Copy)]
struct DriftObservation {
    drift_ms: f64,
    interval: Duration,
    /// First sync after boot, or after a gap long enough to imply power
    /// loss. Excluded from the drift-rate computation.
    initialization: bool,
}

/// Read-only view for broadcasting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyInfo {
    pub state: ProxyState,
    pub valid: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub acquired_at: Option<OffsetDateTime>,
    pub client_address: Option<String>,
    pub validity_seconds: u64,
    pub resync_seconds: u64,
    pub observation_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift_rate_ppm: Option<f64>,
}

#[derive(Debug)]
pub struct PiProxyState {
    state: ProxyState,
    acquired_at: Option<OffsetDateTime>,
    client_address: Option<String>,
    last_sync_at: Option<OffsetDateTime>,
    history: VecDeque<DriftObservation>,
    validity_window: Duration,
}

impl PiProxyState {
    pub fn new() -> Self {
        Self {
            state: ProxyState::None,
            acquired_at: None,
            client_address: None,
            last_sync_at: None,
            history: VecDeque::with_capacity(MAX_OBSERVATIONS),
            validity_window: MIN_VALIDITY,
        }
    }

    pub const fn state(&self) -> ProxyState {
        self.state
    }

    pub fn client_address(&self) -> Option<&str> {
        self.client_address.as_deref()
    }

    /// Adopt a proxy state; `acquiredAt` is stamped now.
    pub fn update_state(&mut self, state: ProxyState, client_address: Option<String>) {
        self.state = state;
        if state == ProxyState::None {
            self.acquired_at = None;
            self.client_address = None;
        } else {
            self.acquired_at = Some(crate::clock::wall_now());
            self.client_address = client_address;
        }
    }

    /// Refresh `acquiredAt` to reflect an actual sync moment.
    pub fn mark_synced(&mut self) {
        if self.state != ProxyState::None {
            self.acquired_at = Some(crate::clock::wall_now());
        }
    }

    /// `state ≠ none ∧ now − acquiredAt < validityWindow`.
    pub fn is_valid(&self) -> bool {
        if self.state == ProxyState::None {
            return false;
        }
        let Some(acquired_at) = self.acquired_at else {
            return false;
        };
        match Duration::try_from(crate::clock::wall_now() - acquired_at) {
            Ok(age) => age < self.validity_window,
            // Clock stepped backwards past the acquisition: still fresh.
            Err(_) => true,
        }
    }

    /// Transition to `none` iff the state is no longer valid. Idempotent.
    pub fn expire(&mut self) {
        if !self.is_valid() {
            self.update_state(ProxyState::None, None);
        }
    }

    /// Record one drift observation and re-derive the validity window.
    pub fn record_sync(&mut self, drift_ms: f64) {
        let now = crate::clock::wall_now();
        let (interval, initialization) = match self.last_sync_at {
            Some(previous) => {
                let interval =
                    Duration::try_from(now - previous).unwrap_or_default();
                (interval, interval > INITIALIZATION_GAP)
            }
            None => (Duration::ZERO, true),
        };
        if self.history.len() == MAX_OBSERVATIONS {
            let _ = self.history.pop_front();
        }
        self.history.push_back(DriftObservation {
            drift_ms,
            interval,
            initialization,
        });
        self.last_sync_at = Some(now);
        self.validity_window = self.recommended_state_validity();
    }

    fn drift_rate_ppm(&self) -> Option<f64> {
        let measured: Vec<_> = self
            .history
            .iter()
            .filter(|obs| !obs.initialization)
            .collect();
        if measured.len() < 2 {
            return None;
        }
        let total_drift_ms: f64 = measured.iter().map(|obs| obs.drift_ms.abs()).sum();
        let total_interval_ms: f64 = measured
            .iter()
            .map(|obs| obs.interval.as_secs_f64() * 1000.0)
            .sum();
        (total_interval_ms > 0.0).then(|| total_drift_ms / total_interval_ms * 1_000_000.0)
    }

    /// Window sized so cumulative drift stays under the acceptable maximum,
    /// scaled for safety, clamped to `[10 min, 24 h]`.
    pub fn recommended_state_validity(&self) -> Duration {
        let Some(rate_ppm) = self.drift_rate_ppm() else {
            return self.validity_window.max(MIN_VALIDITY);
        };
        if rate_ppm <= 0.0 {
            return MAX_VALIDITY;
        }
        // rate is ms of drift per ms of elapsed time × 10⁶.
        let window_ms = MAX_ACCEPTABLE_DRIFT_MS / rate_ppm * 1_000_000.0 * VALIDITY_SAFETY;
        Duration::from_secs_f64(window_ms / 1000.0).clamp(MIN_VALIDITY, MAX_VALIDITY)
    }

    /// Half the validity window, floored at five minutes.
    pub fn recommended_resync_interval(&self) -> Duration {
        (self.recommended_state_validity() / 2).max(MIN_RESYNC)
    }

    pub fn info(&self) -> ProxyInfo {
        ProxyInfo {
            state: self.state,
            valid: self.is_valid(),
            acquired_at: self.acquired_at,
            client_address: self.client_address.clone(),
            validity_seconds: self.validity_window.as_secs(),
            resync_seconds: self.recommended_resync_interval().as_secs(),
            observation_count: self.history.len(),
            drift_rate_ppm: self.drift_rate_ppm(),
        }
    }
}

impl Default for PiProxyState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backdate(proxy: &mut PiProxyState, by: Duration) {
        proxy.acquired_at = proxy
            .acquired_at
            .map(|at| at - time::Duration::try_from(by).expect("duration"));
    }

    #[test]
    fn fresh_state_is_invalid() {
        let proxy = PiProxyState::new();
        assert_eq!(proxy.state(), ProxyState::None);
        assert!(!proxy.is_valid());
    }

    #[test]
    fn acquired_state_is_valid_until_the_window_edge() {
        let mut proxy = PiProxyState::new();
        proxy.update_state(ProxyState::ApClient, Some("192.168.4.2".into()));
        assert!(proxy.is_valid());

        // One millisecond inside the window: still valid.
        backdate(&mut proxy, MIN_VALIDITY - Duration::from_millis(1));
        assert!(proxy.is_valid());

        // Exactly the window's age: no longer valid.
        backdate(&mut proxy, Duration::from_millis(1));
        assert!(!proxy.is_valid());
    }

    #[test]
    fn expire_is_idempotent_and_gated_on_validity() {
        let mut proxy = PiProxyState::new();
        proxy.update_state(ProxyState::WlanClient, Some("10.0.0.5".into()));

        // Valid: expire is a no-op.
        proxy.expire();
        assert_eq!(proxy.state(), ProxyState::WlanClient);

        backdate(&mut proxy, MIN_VALIDITY + Duration::from_secs(1));
        proxy.expire();
        assert_eq!(proxy.state(), ProxyState::None);
        assert!(!proxy.is_valid());
        proxy.expire();
        assert_eq!(proxy.state(), ProxyState::None);
    }

    #[test]
    fn first_observation_is_initialization_only() {
        let mut proxy = PiProxyState::new();
        proxy.record_sync(5000.0);
        // A single (initialization) observation must not produce a rate.
        assert_eq!(proxy.drift_rate_ppm(), None);
        assert_eq!(proxy.recommended_state_validity(), MIN_VALIDITY);
    }

    #[test]
    fn drift_rate_needs_two_measured_observations() {
        let mut proxy = PiProxyState::new();
        proxy.record_sync(100.0); // initialization
        proxy.last_sync_at = Some(crate::clock::wall_now() - time::Duration::minutes(5));
        proxy.record_sync(30.0);
        assert_eq!(proxy.drift_rate_ppm(), None);

        proxy.last_sync_at = Some(crate::clock::wall_now() - time::Duration::minutes(5));
        proxy.record_sync(30.0);
        let rate = proxy.drift_rate_ppm().expect("rate available");
        // 30 ms over 5 min = 100 ppm.
        assert!((rate - 100.0).abs() < 5.0, "rate {rate}");

        // 1 s budget at 100 ppm is 10 000 s; × 0.8 → 8 000 s.
        let validity = proxy.recommended_state_validity().as_secs();
        assert!((7_500..=8_500).contains(&validity), "validity {validity}");
        assert_eq!(
            proxy.recommended_resync_interval().as_secs(),
            validity / 2
        );
    }

    #[test]
    fn negligible_drift_caps_at_the_ceiling() {
        let mut proxy = PiProxyState::new();
        proxy.record_sync(0.0);
        for _ in 0..3 {
            proxy.last_sync_at = Some(crate::clock::wall_now() - time::Duration::minutes(10));
            proxy.record_sync(0.0);
        }
        assert_eq!(proxy.recommended_state_validity(), MAX_VALIDITY);
        assert_eq!(
            proxy.recommended_resync_interval(),
            MAX_VALIDITY / 2
        );
    }

    #[test]
    fn gap_above_an_hour_flags_initialization() {
        let mut proxy = PiProxyState::new();
        proxy.record_sync(10.0);
        proxy.last_sync_at = Some(crate::clock::wall_now() - time::Duration::hours(2));
        proxy.record_sync(4000.0);
        // Both observations are initialization; no rate.
        assert_eq!(proxy.drift_rate_ppm(), None);
    }

    #[test]
    fn history_is_bounded() {
        let mut proxy = PiProxyState::new();
        for _ in 0..40 {
            proxy.last_sync_at = Some(crate::clock::wall_now() - time::Duration::minutes(5));
            proxy.record_sync(10.0);
        }
        assert_eq!(proxy.info().observation_count, MAX_OBSERVATIONS);
    }

    #[test]
    fn validity_never_shrinks_below_the_floor() {
        let mut proxy = PiProxyState::new();
        // Huge drift every sync: the computed window would be tiny.
        proxy.record_sync(0.0);
        for _ in 0..3 {
            proxy.last_sync_at = Some(crate::clock::wall_now() - time::Duration::seconds(30));
            proxy.record_sync(5000.0);
        }
        assert_eq!(proxy.recommended_state_validity(), MIN_VALIDITY);
    }
}
