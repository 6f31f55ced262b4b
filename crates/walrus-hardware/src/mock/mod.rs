//! Simulated readers for development and testing.
//!
//! [`MockTransport`] stands in for the USB bus. Readers are plugged in with a
//! [`MockReader`] script and controlled through the returned
//! [`MockReaderHandle`].

mod reader;
mod transport;

pub use reader::{MockReader, MockReaderHandle};
pub use transport::MockTransport;
