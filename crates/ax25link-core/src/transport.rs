//! Transport trait for TNC communication.
//!
//! The [`Transport`] trait abstracts over the byte stream to a TNC or
//! software modem. Implementations exist for serial ports and TCP KISS
//! servers (in `ax25link-transport`) and a scripted mock for testing (in
//! `ax25link-test-harness`).
//!
//! A transport moves raw bytes only. KISS framing and AX.25 decoding are
//! layered on top by the link task in `ax25link-protocol`.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to a TNC.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the TNC.
    ///
    /// Implementations should wait until all bytes have been handed to the
    /// underlying device or socket.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the TNC into the provided buffer.
    ///
    /// Returns the number of bytes read. Waits up to `timeout` for data;
    /// returns [`Error::Timeout`](crate::error::Error::Timeout) if nothing
    /// arrives within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport.
    ///
    /// After `close()`, `send()` and `receive()` return
    /// [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently open.
    fn is_connected(&self) -> bool;
}
