//! Link -- one TNC, any number of sessions.
//!
//! A [`Link`] owns the IO task that talks to the TNC. It sends
//! connectionless UI frames, opens and accepts sessions, and publishes
//! [`LinkEvent`]s for traffic that no session claims.
//!
//! # Example
//!
//! ```no_run
//! use ax25link_protocol::{Address, LinkBuilder, SessionConfig};
//! use ax25link_transport::SerialTransport;
//!
//! # async fn example() -> ax25link_core::Result<()> {
//! let transport = SerialTransport::open("/dev/ttyUSB0", 9600).await?;
//! let link = LinkBuilder::new().build(Box::new(transport))?;
//!
//! let me: Address = "N0CALL-1".parse()?;
//! let bbs: Address = "KO4LCM-2".parse()?;
//! let session = link.connect(&me, &bbs, SessionConfig::default()).await?;
//! session.send(b"hello\r").await?;
//! session.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use ax25link_core::error::{Error, Result};
use ax25link_core::transport::Transport;

use crate::address::Address;
use crate::capabilities::CapabilityCache;
use crate::config::SessionConfig;
use crate::control::FrameType;
use crate::events::{ConnectionOffer, LinkEvent};
use crate::frame::Frame;
use crate::io::{LinkHandle, Request};
use crate::session::Session;

/// A KISS TNC and the AX.25 traffic on it.
///
/// Constructed via [`LinkBuilder`](crate::LinkBuilder).
pub struct Link {
    handle: LinkHandle,
    task: Option<JoinHandle<()>>,
    event_tx: broadcast::Sender<LinkEvent>,
}

impl Drop for Link {
    fn drop(&mut self) {
        // Signal the IO loop and every session wait.
        self.handle.cancel.cancel();
        // Abort in case the task is stuck in a transport read.
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

impl Link {
    pub(crate) fn new(
        handle: LinkHandle,
        task: JoinHandle<()>,
        event_tx: broadcast::Sender<LinkEvent>,
    ) -> Self {
        Link {
            handle,
            task: Some(task),
            event_tx,
        }
    }

    /// Accept connection offers and datagrams addressed to `local`.
    pub fn listen(&self, local: &Address) {
        info!(%local, "listening");
        self.handle.dispatcher.listen(local);
    }

    pub fn unlisten(&self, local: &Address) {
        self.handle.dispatcher.unlisten(local);
    }

    /// What this link has learned about remote stations.
    pub fn capabilities(&self) -> &Arc<CapabilityCache> {
        &self.handle.capabilities
    }

    /// Subscribe to link events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.event_tx.subscribe()
    }

    /// Write one frame to the TNC.
    pub async fn transmit(&self, frame: &Frame) -> Result<()> {
        self.handle.transmit(frame).await
    }

    /// Send a connectionless UI frame.
    pub async fn send_ui(
        &self,
        source: &Address,
        destination: &Address,
        via: &[Address],
        payload: &[u8],
    ) -> Result<()> {
        let frame = Frame::builder(FrameType::Ui)
            .destination(destination.clone())
            .source(source.clone())
            .repeaters(via.iter().cloned())
            .payload(payload)
            .build()?;
        debug!(%frame, "sending UI");
        self.handle.transmit(&frame).await
    }

    /// Set a TNC parameter such as
    /// [`CMD_TXDELAY`](ax25link_transport::kiss::CMD_TXDELAY).
    pub async fn set_kiss_parameter(&self, command: u8, value: u8) -> Result<()> {
        self.handle.kiss_command(command, &[value]).await
    }

    /// Connect to `remote` from `local`.
    ///
    /// Sends SABM (or SABME at modulo 128) and waits for UA. A modulo-128
    /// request refused with DM is retried once at modulo 8.
    pub async fn connect(
        &self,
        local: &Address,
        remote: &Address,
        config: SessionConfig,
    ) -> Result<Session> {
        if self.handle.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Session::connect(self.handle.clone(), local, remote, config).await
    }

    /// Accept an inbound connection.
    pub async fn accept(&self, offer: &ConnectionOffer, config: SessionConfig) -> Result<Session> {
        Session::accept(self.handle.clone(), offer, config).await
    }

    /// Refuse an inbound connection with DM.
    pub async fn reject(&self, offer: &ConnectionOffer) -> Result<()> {
        let dm = offer.frame().reply(FrameType::Dm).build()?;
        info!(remote = %offer.remote(), "connection refused");
        self.handle.transmit(&dm).await
    }

    /// Stop the IO task and return the transport.
    ///
    /// Outstanding session waits resolve with
    /// [`Error::Cancelled`](ax25link_core::Error::Cancelled).
    pub async fn shutdown(mut self) -> Result<Box<dyn Transport>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .handle
            .cmd_tx
            .send(Request::Shutdown { reply: reply_tx })
            .await;
        let transport = reply_rx.await.map_err(|_| Error::NotConnected)?;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.handle.cancel.cancel();
        Ok(transport)
    }
}
