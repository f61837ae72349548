//! ax25link-test-harness: mock transports for ax25link.
//!
//! [`MockTransport`] stands in for a KISS TNC so that the frame codec, the
//! link task and session state machine can be tested deterministically
//! without radio hardware.

pub mod mock_transport;

pub use mock_transport::{MockHandle, MockTransport};
