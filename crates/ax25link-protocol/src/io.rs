//! IO task for the link.
//!
//! One spawned task owns the transport. It writes outbound frames handed to
//! it over an `mpsc` channel and, between requests, reads the transport,
//! deframes KISS, decodes AX.25 and dispatches frames in arrival order.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use ax25link_core::error::{Error, Result};
use ax25link_core::transport::Transport;
use ax25link_transport::kiss::{self, KissDecoder};

use crate::capabilities::CapabilityCache;
use crate::dispatcher::{Dispatch, Dispatcher};
use crate::events::LinkEvent;
use crate::frame::Frame;

/// Configuration for the IO task.
pub(crate) struct IoConfig {
    /// KISS port frames are sent on and accepted from.
    pub port: u8,
    /// Decode ceiling for repeater addresses.
    pub max_repeaters: usize,
    /// Transport read timeout while idle.
    pub poll_interval: Duration,
    /// Publish every decoded frame as [`LinkEvent::Monitor`].
    pub monitor: bool,
}

/// A request sent to the IO task.
pub(crate) enum Request {
    /// Write one AX.25 frame, KISS-wrapped.
    Transmit {
        frame: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Write a KISS parameter command.
    KissCommand {
        command: u8,
        value: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Graceful shutdown; returns the transport.
    Shutdown {
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
}

/// Cloneable handle to the IO task, shared by the link and its sessions.
#[derive(Clone)]
pub(crate) struct LinkHandle {
    pub cmd_tx: mpsc::Sender<Request>,
    pub dispatcher: Arc<Dispatcher>,
    pub capabilities: Arc<CapabilityCache>,
    pub cancel: CancellationToken,
}

impl LinkHandle {
    /// Queue a frame for transmission and wait until it has been written.
    pub async fn transmit(&self, frame: &Frame) -> Result<()> {
        trace!(%frame, "transmit");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Request::Transmit {
                frame: frame.encode(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)?
    }

    pub async fn kiss_command(&self, command: u8, value: &[u8]) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Request::KissCommand {
                command,
                value: value.to_vec(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)?
    }
}

/// Spawn the IO task.
pub(crate) fn spawn_io_task(
    transport: Box<dyn Transport>,
    config: IoConfig,
    dispatcher: Arc<Dispatcher>,
    capabilities: Arc<CapabilityCache>,
    event_tx: broadcast::Sender<LinkEvent>,
) -> (LinkHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<Request>(32);
    let cancel = CancellationToken::new();

    let task = tokio::spawn(io_loop(
        transport,
        config,
        dispatcher.clone(),
        event_tx,
        cmd_rx,
        cancel.clone(),
    ));

    (
        LinkHandle {
            cmd_tx,
            dispatcher,
            capabilities,
            cancel,
        },
        task,
    )
}

/// The main IO loop.
///
/// `select! { biased; }` order: cancellation, requests, idle reads.
async fn io_loop(
    mut transport: Box<dyn Transport>,
    config: IoConfig,
    dispatcher: Arc<Dispatcher>,
    event_tx: broadcast::Sender<LinkEvent>,
    mut cmd_rx: mpsc::Receiver<Request>,
    cancel: CancellationToken,
) {
    let mut decoder = KissDecoder::new();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("link task cancelled");
                break;
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Request::Transmit { frame, reply }) => {
                        let wire = kiss::encode(config.port, &frame);
                        let _ = reply.send(transport.send(&wire).await);
                    }
                    Some(Request::KissCommand { command, value, reply }) => {
                        let wire = kiss::encode_command(config.port, command, &value);
                        let _ = reply.send(transport.send(&wire).await);
                    }
                    Some(Request::Shutdown { reply }) => {
                        debug!("link task shutdown requested");
                        let _ = reply.send(transport);
                        return;
                    }
                    None => {
                        debug!("all link handles dropped, exiting link task");
                        break;
                    }
                }
            }

            read = async {
                let mut buf = [0u8; 512];
                match transport.receive(&mut buf, config.poll_interval).await {
                    Ok(n) => Ok(decoder.feed(&buf[..n])),
                    Err(e) => Err(e),
                }
            } => {
                match read {
                    Ok(frames) => {
                        for kiss_frame in frames {
                            if !kiss_frame.is_data() || kiss_frame.port != config.port {
                                trace!(
                                    port = kiss_frame.port,
                                    command = kiss_frame.command,
                                    "ignoring KISS frame"
                                );
                                continue;
                            }
                            let reply =
                                handle_inbound(&kiss_frame.data, &config, &dispatcher, &event_tx);
                            if let Some(reply) = reply {
                                let wire = kiss::encode(config.port, reply.as_bytes());
                                if let Err(e) = transport.send(&wire).await {
                                    warn!(error = %e, "failed to send DM");
                                }
                            }
                        }
                    }
                    Err(Error::Timeout) => {
                        // Yield briefly so requests and cancellation get a turn.
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    Err(e @ (Error::NotConnected | Error::ConnectionLost)) => {
                        error!(error = %e, "transport closed, stopping link task");
                        let _ = event_tx.send(LinkEvent::TransportClosed);
                        cancel.cancel();
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "transport read failed");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }
    }
}

/// Decode and dispatch one AX.25 frame. Returns a frame to send back, if
/// the dispatcher asked for one.
fn handle_inbound(
    data: &[u8],
    config: &IoConfig,
    dispatcher: &Dispatcher,
    event_tx: &broadcast::Sender<LinkEvent>,
) -> Option<Frame> {
    // A session's negotiated modulo wins over the sender's address flag.
    let modulo = Frame::stations(data)
        .ok()
        .and_then(|(local, remote)| dispatcher.route_modulo(&local, &remote));
    let frame = match Frame::decode_with(data, modulo, config.max_repeaters) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, len = data.len(), "dropping undecodable frame");
            return None;
        }
    };
    trace!(%frame, "received");
    if config.monitor {
        let _ = event_tx.send(LinkEvent::Monitor(frame.clone()));
    }
    match dispatcher.dispatch(frame) {
        Dispatch::Refuse(dm) => Some(dm),
        _ => None,
    }
}
