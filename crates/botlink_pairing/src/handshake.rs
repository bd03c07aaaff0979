//! The pairing handshake — one-shot request/response over a serial link.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use serialport::{DataBits, FlowControl, Parity, StopBits};
use tracing::{debug, info};

use crate::error::PairingError;
use crate::wire::{DeviceIdentity, PairingRequest, parse_response};

/// Per-read poll interval; the overall exchange is bounded separately by
/// [`PairingOptions::timeout`].
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial link parameters for the handshake.
#[derive(Debug, Clone)]
pub struct PairingOptions {
    /// Baud rate of the device's provisioning port.
    pub baud_rate: u32,
    /// Overall deadline for the request/response exchange.
    pub timeout: Duration,
}

impl Default for PairingOptions {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Run the pairing handshake against the device on `port_path` with
/// default options (115200 baud, 5 second timeout).
pub fn pair(port_path: &str, request: &PairingRequest) -> Result<DeviceIdentity, PairingError> {
    pair_with(port_path, request, &PairingOptions::default())
}

/// Run the pairing handshake with explicit serial options.
///
/// Opens the port, writes the request line, reads one response line under
/// the deadline, and parses the device identity. The port handle is
/// dropped on every exit path, so a failed attempt leaves the port free
/// for the next one.
pub fn pair_with(
    port_path: &str,
    request: &PairingRequest,
    options: &PairingOptions,
) -> Result<DeviceIdentity, PairingError> {
    let mut port = serialport::new(port_path, options.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(POLL_TIMEOUT)
        .open()?;
    info!("Opened serial port {port_path} at {} baud", options.baud_rate);

    let identity = exchange(&mut *port, request, options.timeout)?;
    info!("Paired with device {identity}");
    Ok(identity)
}

/// The exchange itself, independent of the port so it can run against
/// any blocking byte stream.
fn exchange<T: Read + Write + ?Sized>(
    io: &mut T,
    request: &PairingRequest,
    deadline: Duration,
) -> Result<DeviceIdentity, PairingError> {
    io.write_all(request.encode().as_bytes())?;
    io.flush()?;
    debug!("Provisioning request sent, awaiting response");

    let line = read_line(io, deadline)?;
    parse_response(&line)
}

/// Read one newline-terminated line, polling until `deadline` elapses.
/// Per-read timeouts from the port are retried; anything else is a fault.
fn read_line<T: Read + ?Sized>(io: &mut T, deadline: Duration) -> Result<String, PairingError> {
    let start = Instant::now();
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    while start.elapsed() < deadline {
        match io.read(&mut byte) {
            Ok(0) => continue,
            Ok(_) => {
                if byte[0] == b'\n' {
                    return Ok(String::from_utf8_lossy(&line).into_owned());
                }
                line.push(byte[0]);
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(PairingError::NoResponse)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    /// A scripted serial device: records what the host writes and replays
    /// a canned response byte stream. An exhausted script times out like
    /// a silent port.
    struct ScriptedPort {
        response: VecDeque<u8>,
        written: Vec<u8>,
    }

    impl ScriptedPort {
        fn new(response: &[u8]) -> Self {
            Self {
                response: response.iter().copied().collect(),
                written: Vec::new(),
            }
        }

        fn silent() -> Self {
            Self::new(b"")
        }
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.response.pop_front() {
                Some(byte) => {
                    buf[0] = byte;
                    Ok(1)
                }
                None => Err(io::Error::new(ErrorKind::TimedOut, "no data")),
            }
        }
    }

    impl Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn request() -> PairingRequest {
        PairingRequest {
            ssid: "MyWifi".to_string(),
            password: "pass123".to_string(),
            host_ip: "192.168.1.5".parse().unwrap(),
            host_port: 8765,
        }
    }

    #[test]
    fn test_exchange_round_trip() {
        let mut port = ScriptedPort::new(b"RD,AA:BB:CC:DD:EE:FF;\n");

        let identity = exchange(&mut port, &request(), Duration::from_millis(200)).unwrap();
        assert_eq!(identity.as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(port.written, b"WD,MyWifi,pass123,192.168.1.5,8765;\n");
    }

    #[test]
    fn test_exchange_malformed_response() {
        let mut port = ScriptedPort::new(b"ERR,bad;\n");

        match exchange(&mut port, &request(), Duration::from_millis(200)) {
            Err(PairingError::MalformedResponse(_)) => {}
            other => panic!("Expected MalformedResponse, got {other:?}"),
        }
    }

    #[test]
    fn test_exchange_silence_is_no_response() {
        let mut port = ScriptedPort::silent();

        match exchange(&mut port, &request(), Duration::from_millis(50)) {
            Err(PairingError::NoResponse) => {}
            other => panic!("Expected NoResponse, got {other:?}"),
        }
    }

    #[test]
    fn test_partial_line_without_newline_is_no_response() {
        // The device started answering but never finished the line.
        let mut port = ScriptedPort::new(b"RD,AA:BB");

        match exchange(&mut port, &request(), Duration::from_millis(50)) {
            Err(PairingError::NoResponse) => {}
            other => panic!("Expected NoResponse, got {other:?}"),
        }
    }

    #[test]
    fn test_port_reusable_after_failed_attempt() {
        // First attempt times out; a fresh exchange on the same port
        // (the handle was never wedged) succeeds.
        let mut port = ScriptedPort::silent();
        assert!(matches!(
            exchange(&mut port, &request(), Duration::from_millis(50)),
            Err(PairingError::NoResponse)
        ));

        port.response = b"RD,AA:BB:CC:DD:EE:FF;\n".iter().copied().collect();
        let identity = exchange(&mut port, &request(), Duration::from_millis(200)).unwrap();
        assert_eq!(identity.as_str(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_serial_fault_propagates() {
        struct BrokenPort;

        impl Read for BrokenPort {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(ErrorKind::PermissionDenied, "denied"))
            }
        }

        impl Write for BrokenPort {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(ErrorKind::PermissionDenied, "denied"))
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut port = BrokenPort;
        match exchange(&mut port, &request(), Duration::from_millis(50)) {
            Err(PairingError::Io(e)) => {
                assert_eq!(e.kind(), ErrorKind::PermissionDenied);
            }
            other => panic!("Expected Io error, got {other:?}"),
        }
    }

    #[test]
    fn test_default_options() {
        let options = PairingOptions::default();
        assert_eq!(options.baud_rate, 115_200);
        assert_eq!(options.timeout, Duration::from_secs(5));
    }
}
