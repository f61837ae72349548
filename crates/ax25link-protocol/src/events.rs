//! Asynchronous link event types.
//!
//! Events are published by the link task through a
//! [`tokio::sync::broadcast`] channel. Subscribe with
//! [`Link::subscribe()`](crate::Link::subscribe). Delivery is best-effort:
//! a consumer that falls behind the channel capacity misses events.

use crate::address::Address;
use crate::control::Modulo;
use crate::frame::Frame;

/// An event emitted by the link task.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A remote station sent SABM or SABME to a listened-to address with no
    /// session. Answer with [`Link::accept`](crate::Link::accept) or
    /// [`Link::reject`](crate::Link::reject).
    ConnectionOffer(ConnectionOffer),

    /// A UI frame addressed to a listened-to address.
    Datagram(Frame),

    /// Every decoded frame, when monitoring is enabled on the link.
    Monitor(Frame),

    /// The transport failed and the link task stopped.
    TransportClosed,
}

/// An inbound connection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOffer {
    frame: Frame,
}

impl ConnectionOffer {
    pub(crate) fn new(frame: Frame) -> Self {
        Self { frame }
    }

    /// The SABM or SABME frame that opened the request.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Our address, as called by the remote station.
    pub fn local(&self) -> Address {
        self.frame.destination().plain()
    }

    /// The calling station.
    pub fn remote(&self) -> Address {
        self.frame.source().plain()
    }

    /// Modulo requested by the caller: 128 for SABME, 8 for SABM.
    pub fn modulo(&self) -> Modulo {
        self.frame.modulo()
    }

    /// Path back to the caller: the inbound path reversed, with
    /// has-been-repeated flags cleared.
    pub fn return_path(&self) -> Vec<Address> {
        self.frame.repeaters().iter().rev().map(Address::plain).collect()
    }
}
