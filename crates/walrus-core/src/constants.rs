//! Shared constants for reader sessions and device identification.
//!
//! Timeouts are expressed in milliseconds, sizes in bytes.
//!
//! ```
//! use walrus_core::constants::*;
//! use std::time::Duration;
//!
//! assert_eq!(CRLF, "\r\n");
//! let timeout = Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS);
//! assert!(timeout.as_secs() >= 1);
//! ```

// ============================================================================
// Framing
// ============================================================================

/// Line delimiter used by every bundled reader.
pub const CRLF: &str = "\r\n";

/// Bare line feed, for readers that terminate lines with `\n` only.
pub const LF: &str = "\n";

// ============================================================================
// Sessions
// ============================================================================

/// Size of a single channel read performed by a session pump.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 512;

/// Unconsumed bytes after which a timed-out receive is reported as a
/// framing stall instead of a plain timeout.
pub const DEFAULT_STALL_THRESHOLD: usize = 4 * 1024; // 4 KB

/// Upper bound for the device handshake performed on connect.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 3000;

/// Default timeout for a single card scan.
pub const DEFAULT_SCAN_TIMEOUT_MS: u64 = 5000;

// ============================================================================
// Manager
// ============================================================================

/// Interval between two enumerations of the USB bus by the hotplug monitor.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Capacity of the connectivity event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

// ============================================================================
// Serial
// ============================================================================

/// Baud rate used when opening USB CDC serial ports.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

// ============================================================================
// Known readers
// ============================================================================

/// Chameleon Mini vendor id.
pub const CHAMELEON_MINI_VID: u16 = 0x16D0;

/// Chameleon Mini product id.
pub const CHAMELEON_MINI_PID: u16 = 0x04B2;

/// FTDI bridge vendor id used by the prox reader.
pub const PROX_READER_VID: u16 = 0x0403;

/// FTDI bridge product id used by the prox reader.
pub const PROX_READER_PID: u16 = 0x6001;
