//! Pairing wire format — request encoding and response parsing.

use std::fmt;
use std::net::Ipv4Addr;

use crate::error::PairingError;

/// Tag prefixing a provisioning request line.
pub const REQUEST_TAG: &str = "WD";

/// Tag prefixing a device response line.
pub const RESPONSE_TAG: &str = "RD";

/// A provisioning request: the credentials and relay endpoint the robot
/// needs to join the network and dial the hub.
///
/// Fields are comma-delimited on the wire, so the SSID and password must
/// not themselves contain commas or semicolons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingRequest {
    /// Network name the robot should join.
    pub ssid: String,
    /// Network password.
    pub password: String,
    /// IPv4 address of the relay host.
    pub host_ip: Ipv4Addr,
    /// Port of the relay host.
    pub host_port: u16,
}

impl PairingRequest {
    /// Serialize the request as a single record-terminated line.
    pub fn encode(&self) -> String {
        format!(
            "{REQUEST_TAG},{},{},{},{};\n",
            self.ssid, self.password, self.host_ip, self.host_port
        )
    }
}

/// A device's hardware identity (MAC address) as reported in its
/// pairing response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// The identity string, terminator stripped.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse a device response line (`RD,<mac>;`).
///
/// Leading/trailing whitespace and the trailing record terminator are
/// stripped. Any other prefix yields
/// [`MalformedResponse`](PairingError::MalformedResponse).
pub fn parse_response(line: &str) -> Result<DeviceIdentity, PairingError> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix(RESPONSE_TAG).and_then(|r| r.strip_prefix(',')) else {
        return Err(PairingError::MalformedResponse(line.to_string()));
    };

    let identity = rest.split([',', ';']).next().unwrap_or("").trim();
    if identity.is_empty() {
        return Err(PairingError::MalformedResponse(line.to_string()));
    }

    Ok(DeviceIdentity(identity.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
