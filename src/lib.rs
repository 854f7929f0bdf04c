//! Field control service for CCAPI stills cameras on a headless Linux host.
//!
//! Three tightly-coupled subsystems share one event fabric:
//!
//! * [`session`]: a drift-free intervalometer scheduling shots at absolute
//!   wall-clock times, with durable session reports;
//! * [`discovery`]: SSDP camera discovery, the camera record store and
//!   primary-camera selection, with [`camera`] providing the typed HTTPS
//!   client each record resolves to;
//! * [`timesync`]: three-tier clock coordination (browser client to host to
//!   camera) tracked by the Pi Proxy State.
//!
//! [`server`] exposes the REST + WebSocket surface; [`events`] carries the
//! typed broadcast bus that keeps connected UIs consistent. Subsystems are
//! wired explicitly by the binary's composition root; there are no
//! module-level singletons.

pub mod camera;
pub mod clock;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod events;
pub mod server;
pub mod session;
pub mod timesync;

pub use errors::{ControlError, ControlResult, ErrorCode};
