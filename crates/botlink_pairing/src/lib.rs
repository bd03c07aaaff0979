//! Botlink pairing — serial provisioning handshake for a robot.
//!
//! A one-shot exchange over a serial link: the host sends the robot its
//! network credentials and relay endpoint, and the robot answers with its
//! hardware identity (MAC address). The exchange gates whether the relay
//! is meaningful for a device; it runs once per device setup and is
//! independent of the relay's runtime state.
//!
//! Wire contract (newline-delimited ASCII):
//!
//! ```text
//! host → robot:  WD,<ssid>,<password>,<host_ip>,<host_port>;\n
//! robot → host:  RD,<device_mac>;\n
//! ```

pub mod error;
pub mod handshake;
pub mod wire;

// ── Re-exports for convenience ──────────────────────────────────────────

pub use error::PairingError;
pub use handshake::{PairingOptions, pair, pair_with};
pub use wire::{DeviceIdentity, PairingRequest, parse_response};
