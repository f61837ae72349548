//! Mock transport for deterministic testing of the link layer.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs: when the link writes the expected bytes, the
//! scripted reply becomes readable. An empty reply scripts silence, which is
//! how tests exercise T1 expiry.
//!
//! Once the mock has been moved into a link task, a [`MockHandle`] obtained
//! beforehand still sees everything that was sent and can inject unsolicited
//! inbound bytes.
//!
//! # Example
//!
//! ```
//! use ax25link_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // When the link sends this KISS frame, answer with that one.
//! mock.expect(&[0xC0, 0x00, 0x01, 0xC0], &[0xC0, 0x00, 0x02, 0xC0]);
//! let handle = mock.handle();
//! assert!(handle.sent().is_empty());
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ax25link_core::error::{Error, Result};
use ax25link_core::transport::Transport;

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// The bytes to return once the matching request is received.
    response: Vec<u8>,
}

/// State shared between the transport and its handles.
#[derive(Debug, Default)]
struct Shared {
    /// Log of all bytes sent through this transport.
    sent_log: Vec<Vec<u8>>,
    /// Bytes readable by `receive()`, in order.
    inbound: VecDeque<Vec<u8>>,
}

/// Test-side view of a [`MockTransport`] that has been handed off.
#[derive(Debug, Clone)]
pub struct MockHandle {
    shared: Arc<Mutex<Shared>>,
}

impl MockHandle {
    /// Every `send()` so far, one element per call.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.lock().sent_log.clone()
    }

    /// Queue unsolicited bytes for the next `receive()`.
    pub fn push_inbound(&self, bytes: &[u8]) {
        self.lock().inbound.push_back(bytes.to_vec());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A mock [`Transport`] for testing without a TNC.
///
/// Expectations are consumed in order. A `send()` that does not match the
/// next expectation, or arrives when none are left, fails with
/// [`Error::Transport`]. Responses and pushed bytes are returned by
/// `receive()` in the order they became available; with nothing available
/// `receive()` fails with [`Error::Timeout`] immediately.
#[derive(Debug)]
pub struct MockTransport {
    /// Ordered queue of expected request/response pairs.
    expectations: VecDeque<Expectation>,
    /// Whether the transport is "connected".
    connected: bool,
    shared: Arc<Mutex<Shared>>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            expectations: VecDeque::new(),
            connected: true,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    /// Add an expected request/response pair.
    ///
    /// When `send()` is called with data matching `request`, `response`
    /// becomes readable. An empty `response` means the peer stays silent.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// A handle for inspecting and feeding this transport after it has been
    /// moved into a link.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            shared: self.shared.clone(),
        }
    }

    /// Queue unsolicited bytes for the next `receive()`.
    pub fn push_inbound(&mut self, bytes: &[u8]) {
        self.handle().push_inbound(bytes);
    }

    /// Return all data that has been sent through this transport.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.handle().sent()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls will
    /// return [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        self.lock().sent_log.push(data.to_vec());

        let expectation = self.expectations.pop_front().ok_or_else(|| {
            Error::Transport(format!(
                "no more expectations in mock transport, got {data:02X?}"
            ))
        })?;
        if data != expectation.request.as_slice() {
            return Err(Error::Transport(format!(
                "unexpected send data: expected {:02X?}, got {:02X?}",
                expectation.request, data
            )));
        }
        if !expectation.response.is_empty() {
            self.lock().inbound.push_back(expectation.response);
        }
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        let mut shared = self.lock();
        let Some(chunk) = shared.inbound.front_mut() else {
            return Err(Error::Timeout);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        chunk.drain(..n);
        if chunk.is_empty() {
            shared.inbound.pop_front();
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.lock().inbound.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_exchange() {
        let mut mock = MockTransport::new();
        let request = &[0xC0, 0x00, 0x01, 0xC0];
        let response = &[0xC0, 0x00, 0x02, 0x03, 0xC0];
        mock.expect(request, response);

        mock.send(request).await.unwrap();

        let mut buf = [0u8; 64];
        let n = mock
            .receive(&mut buf, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(&buf[..n], response);
        assert_eq!(mock.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn empty_response_is_silence() {
        let mut mock = MockTransport::new();
        mock.expect(&[0x01], &[]);
        mock.send(&[0x01]).await.unwrap();

        let mut buf = [0u8; 8];
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn wrong_data_errors() {
        let mut mock = MockTransport::new();
        mock.expect(&[0x01], &[0xFF]);

        let result = mock.send(&[0x99]).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn no_expectations_errors() {
        let mut mock = MockTransport::new();
        let result = mock.send(&[0x01]).await;
        assert!(matches!(result, Err(Error::Transport(_))));
        // The attempt is still logged.
        assert_eq!(mock.sent_data(), vec![vec![0x01]]);
    }

    #[tokio::test]
    async fn handle_sees_sends_and_injects_inbound() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(&[0x01], &[]);
        mock.send(&[0x01]).await.unwrap();
        assert_eq!(handle.sent(), vec![vec![0x01]]);

        handle.push_inbound(&[0xAA, 0xBB]);
        let mut buf = [0u8; 8];
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], &[0xAA, 0xBB]);
    }

    #[tokio::test]
    async fn responses_and_pushed_bytes_keep_order() {
        let mut mock = MockTransport::new();
        mock.push_inbound(&[0x01]);
        mock.expect(&[0x10], &[0x02]);
        mock.send(&[0x10]).await.unwrap();

        let mut buf = [0u8; 8];
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], &[0x01]);
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], &[0x02]);
    }

    #[tokio::test]
    async fn partial_receive() {
        let mut mock = MockTransport::new();
        mock.push_inbound(&[0xAA, 0xBB, 0xCC, 0xDD]);

        let mut buf = [0u8; 2];
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], &[0xAA, 0xBB]);
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], &[0xCC, 0xDD]);
    }

    #[tokio::test]
    async fn closed_transport_fails() {
        let mut mock = MockTransport::new();
        assert!(mock.is_connected());
        mock.close().await.unwrap();
        assert!(!mock.is_connected());

        assert!(matches!(mock.send(&[0x01]).await, Err(Error::NotConnected)));
        let mut buf = [0u8; 8];
        assert!(matches!(
            mock.receive(&mut buf, Duration::from_millis(10)).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn set_connected() {
        let mut mock = MockTransport::new();
        mock.set_connected(false);
        assert!(matches!(mock.send(&[0x01]).await, Err(Error::NotConnected)));
    }
}
