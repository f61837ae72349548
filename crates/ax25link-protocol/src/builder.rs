//! LinkBuilder -- fluent builder for constructing [`Link`] instances.
//!
//! # Example
//!
//! ```no_run
//! use ax25link_protocol::LinkBuilder;
//! use ax25link_transport::TcpTransport;
//! use std::time::Duration;
//!
//! # async fn example() -> ax25link_core::Result<()> {
//! let transport = TcpTransport::connect("127.0.0.1:8001").await?;
//! let link = LinkBuilder::new()
//!     .max_repeaters(2)
//!     .poll_interval(Duration::from_millis(50))
//!     .build(Box::new(transport))?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use ax25link_core::error::{Error, Result};
use ax25link_core::transport::Transport;

use crate::capabilities::CapabilityCache;
use crate::dispatcher::Dispatcher;
use crate::frame::DEFAULT_MAX_REPEATERS;
use crate::io::{spawn_io_task, IoConfig};
use crate::link::Link;

/// Fluent builder for [`Link`].
#[derive(Debug, Clone)]
pub struct LinkBuilder {
    port: u8,
    max_repeaters: usize,
    event_capacity: usize,
    poll_interval: Duration,
    monitor: bool,
    capabilities: Option<Arc<CapabilityCache>>,
}

impl Default for LinkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkBuilder {
    pub fn new() -> Self {
        LinkBuilder {
            port: 0,
            max_repeaters: DEFAULT_MAX_REPEATERS,
            event_capacity: 64,
            poll_interval: Duration::from_millis(100),
            monitor: false,
            capabilities: None,
        }
    }

    /// KISS port of the TNC (default: 0).
    pub fn port(mut self, port: u8) -> Self {
        self.port = port;
        self
    }

    /// Maximum repeater addresses accepted on decode (default: 8).
    pub fn max_repeaters(mut self, n: usize) -> Self {
        self.max_repeaters = n;
        self
    }

    /// Capacity of the event broadcast channel (default: 64).
    pub fn event_capacity(mut self, n: usize) -> Self {
        self.event_capacity = n;
        self
    }

    /// Transport read timeout between requests (default: 100ms).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Publish every decoded frame as
    /// [`LinkEvent::Monitor`](crate::LinkEvent::Monitor) (default: off).
    pub fn monitor(mut self, enabled: bool) -> Self {
        self.monitor = enabled;
        self
    }

    /// Share a capability cache with other links (default: a fresh cache
    /// per link).
    pub fn capabilities(mut self, cache: Arc<CapabilityCache>) -> Self {
        self.capabilities = Some(cache);
        self
    }

    /// Spawn the link task on `transport`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self, transport: Box<dyn Transport>) -> Result<Link> {
        if self.port > 0x0F {
            return Err(Error::InvalidParameter(format!(
                "KISS port {} out of range 0-15",
                self.port
            )));
        }
        if self.event_capacity == 0 {
            return Err(Error::InvalidParameter(
                "event_capacity must be non-zero".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidParameter(
                "poll_interval must be non-zero".into(),
            ));
        }

        let (event_tx, _) = broadcast::channel(self.event_capacity);
        let dispatcher = Arc::new(Dispatcher::new(event_tx.clone(), self.max_repeaters));
        let config = IoConfig {
            port: self.port,
            max_repeaters: self.max_repeaters,
            poll_interval: self.poll_interval,
            monitor: self.monitor,
        };
        let capabilities = self.capabilities.unwrap_or_default();
        let (handle, task) =
            spawn_io_task(transport, config, dispatcher, capabilities, event_tx.clone());
        Ok(Link::new(handle, task, event_tx))
    }
}
