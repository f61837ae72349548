//! Connected-mode session state machine.
//!
//! A [`Session`] is one logical AX.25 connection between a local and a
//! remote station. It owns the sequence state (`V(S)`, `V(R)`, `V(A)`), the
//! queue of unacknowledged I frames and the T1 retransmission timer, and it
//! drives the SABM/UA/DM/DISC handshakes.
//!
//! ```text
//!                 connect()            UA
//!  Disconnected ------------> AwaitingConnect ------> Connected
//!       ^   ^                  |  DM / T1 * (N2+1)       |
//!       |   +------------------+                         | disconnect()
//!       |            UA / DM / T1 * 2                    v
//!       +------------------------------------ AwaitingDisconnect
//! ```
//!
//! Operations that wait for the peer (`connect`, `send`, `disconnect`) are
//! serialized by an internal async mutex. Every wait races the next inbound
//! frame against T1 and the session's cancellation token, so closing the
//! session or the link resolves it with [`Error::Cancelled`]. `receive`
//! takes the mutex only to handle frames already queued, and waits for more
//! without it, so a pending `receive` never holds up `send` or `disconnect`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use ax25link_core::error::{Error, Result};

use crate::address::{Address, ADDRESS_LEN};
use crate::config::SessionConfig;
use crate::control::{CommandResponse, FrameType, Modulo};
use crate::events::ConnectionOffer;
use crate::frame::Frame;
use crate::io::LinkHandle;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    AwaitingConnect,
    Connected,
    AwaitingDisconnect,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::AwaitingConnect,
            2 => SessionState::Connected,
            3 => SessionState::AwaitingDisconnect,
            _ => SessionState::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SessionState::Disconnected => 0,
            SessionState::AwaitingConnect => 1,
            SessionState::Connected => 2,
            SessionState::AwaitingDisconnect => 3,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::AwaitingConnect => "awaiting connect",
            SessionState::Connected => "connected",
            SessionState::AwaitingDisconnect => "awaiting disconnect",
        };
        f.write_str(name)
    }
}

/// What an unnumbered frame from the peer did to the connection.
enum Remote {
    /// Nothing.
    Ignored,
    /// The peer sent DISC; we answered UA and the session is down.
    Closed,
    /// The peer re-sent SABM/SABME; we answered UA and reset sequencing.
    Reset,
}

/// State touched only while holding the operation lock.
struct Inner {
    inbound: mpsc::Receiver<Frame>,
    /// V(A): oldest unacknowledged N(S).
    va: u8,
    /// Sent and not yet acknowledged, oldest first.
    unacked: VecDeque<(u8, Bytes)>,
    /// In-sequence payloads not yet handed to `receive()`.
    received: VecDeque<Bytes>,
    /// A REJ is outstanding for the current gap.
    reject_sent: bool,
    remote_busy: bool,
    remote_closed: bool,
}

/// One AX.25 connection.
///
/// Created by [`Link::connect`](crate::Link::connect) or
/// [`Link::accept`](crate::Link::accept). Dropping a session removes its
/// route without notifying the peer; call [`disconnect`](Self::disconnect)
/// first for an orderly teardown.
pub struct Session {
    link: LinkHandle,
    local: Address,
    remote: Address,
    config: SessionConfig,
    cancel: CancellationToken,
    modulo: Arc<AtomicU8>,
    /// Signalled on frame delivery and on teardown.
    wake: Arc<Notify>,
    state: AtomicU8,
    vs: AtomicU8,
    vr: AtomicU8,
    inner: Mutex<Inner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("state", &self.state())
            .field("modulo", &self.modulo())
            .field("vs", &self.send_state())
            .field("vr", &self.receive_state())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.link
            .dispatcher
            .release(&self.local, &self.remote, &self.modulo);
    }
}

impl Session {
    fn register(
        link: LinkHandle,
        local: Address,
        remote: Address,
        config: SessionConfig,
        modulo: Modulo,
    ) -> Result<Self> {
        let route = link.dispatcher.register(&local, &remote, modulo)?;
        let cancel = link.cancel.child_token();
        Ok(Session {
            link,
            local: local.plain(),
            remote: remote.plain(),
            config,
            cancel,
            modulo: route.modulo,
            wake: route.wake,
            state: AtomicU8::new(SessionState::Disconnected.as_u8()),
            vs: AtomicU8::new(0),
            vr: AtomicU8::new(0),
            inner: Mutex::new(Inner {
                inbound: route.inbound,
                va: 0,
                unacked: VecDeque::new(),
                received: VecDeque::new(),
                reject_sent: false,
                remote_busy: false,
                remote_closed: false,
            }),
        })
    }

    /// Open an outbound connection.
    pub(crate) async fn connect(
        link: LinkHandle,
        local: &Address,
        remote: &Address,
        config: SessionConfig,
    ) -> Result<Self> {
        let modulo = config.modulo();
        let session = Session::register(link, local.clone(), remote.clone(), config, modulo)?;
        session.establish().await?;
        Ok(session)
    }

    /// Answer an inbound SABM/SABME with UA.
    ///
    /// If `config` has no digipeater path, replies follow the reverse of the
    /// path the request arrived on.
    pub(crate) async fn accept(
        link: LinkHandle,
        offer: &ConnectionOffer,
        config: SessionConfig,
    ) -> Result<Self> {
        let config = if config.repeaters().is_empty() {
            config.with_repeaters(offer.return_path())
        } else {
            config
        };
        let session = Session::register(link, offer.local(), offer.remote(), config, offer.modulo())?;
        let ua = session.unnumbered(
            FrameType::Ua,
            CommandResponse::Response,
            offer.frame().poll_final(),
        )?;
        session.link.transmit(&ua).await?;
        session.set_state(SessionState::Connected);
        info!(
            local = %session.local,
            remote = %session.remote,
            modulo = session.modulo().value(),
            "connection accepted"
        );
        Ok(session)
    }

    pub fn local(&self) -> &Address {
        &self.local
    }

    pub fn remote(&self) -> &Address {
        &self.remote
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Negotiated modulo.
    pub fn modulo(&self) -> Modulo {
        Modulo::try_from(self.modulo.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// V(S): N(S) of the next new I frame.
    pub fn send_state(&self) -> u8 {
        self.vs.load(Ordering::Acquire)
    }

    /// V(R): N(S) expected on the next in-sequence I frame.
    pub fn receive_state(&self) -> u8 {
        self.vr.load(Ordering::Acquire)
    }

    /// Send `data` as one or more I frames and wait until the peer has
    /// acknowledged all of them.
    ///
    /// Data is split into frames of at most `max_info_len` bytes and sent in
    /// window-sized batches, polling on the last frame of each batch.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        self.check_open()?;
        let mut inner = self.inner.lock().await;
        self.require_connected()?;

        let modulo = self.modulo();
        let window = self.config.window_for(modulo) as usize;
        let mut chunks = data
            .chunks(self.config.max_info_len())
            .map(Bytes::copy_from_slice)
            .peekable();

        while chunks.peek().is_some() {
            let batch: Vec<Bytes> = chunks.by_ref().take(window).collect();
            let last = batch.len() - 1;
            for (i, payload) in batch.into_iter().enumerate() {
                let ns = self.send_state();
                let frame = self.information(ns, &payload, i == last)?;
                self.link.transmit(&frame).await?;
                trace!(ns, len = payload.len(), "I frame sent");
                inner.unacked.push_back((ns, payload));
                self.vs.store(modulo.next(ns), Ordering::Release);
            }
            self.await_acknowledgement(&mut inner).await?;
        }
        Ok(())
    }

    /// Wait for the next in-sequence payload from the peer.
    ///
    /// Returns `Ok(None)` once the peer has disconnected and every received
    /// payload has been delivered. Dropping the returned future loses no
    /// data: payloads already accepted stay queued for the next call.
    ///
    /// Other tasks may `send` or `disconnect` while a call is pending.
    pub async fn receive(&self) -> Result<Option<Bytes>> {
        loop {
            self.check_open()?;
            {
                let mut inner = self.inner.lock().await;
                if let Some(data) = self.drain(&mut inner).await? {
                    return Ok(Some(data));
                }
                match self.state() {
                    SessionState::Connected => {}
                    SessionState::Disconnected if inner.remote_closed => return Ok(None),
                    SessionState::Disconnected => return Err(Error::NotConnected),
                    other => {
                        return Err(Error::InvalidState(format!("cannot receive while {other}")))
                    }
                }
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                _ = self.wake.notified() => {}
            }
        }
    }

    /// Send DISC and wait for UA.
    ///
    /// DISC is sent at most twice. Without an answer the session is torn
    /// down anyway.
    pub async fn disconnect(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if self.state() == SessionState::Disconnected {
            return Ok(());
        }
        self.set_state(SessionState::AwaitingDisconnect);

        let disc = self.unnumbered(FrameType::Disc, CommandResponse::Command, true)?;
        for attempt in 0..2 {
            if attempt > 0 {
                debug!(remote = %self.remote, "retransmitting DISC");
            }
            if let Err(e) = self.link.transmit(&disc).await {
                warn!(error = %e, "failed to send DISC");
                break;
            }
            let deadline = Instant::now() + self.config.t1_for(disc.as_bytes().len());
            loop {
                match self.next_frame(&mut inner, deadline).await {
                    Ok(Some(frame)) => match frame.frame_type() {
                        FrameType::Ua | FrameType::Dm => {
                            self.terminate();
                            return Ok(());
                        }
                        FrameType::Disc => {
                            self.reply(&frame, FrameType::Ua).await?;
                            self.terminate();
                            return Ok(());
                        }
                        FrameType::Frmr => {
                            self.terminate();
                            return Err(Error::ProtocolViolation(
                                "FRMR in reply to DISC".into(),
                            ));
                        }
                        other => trace!(frame_type = %other, "ignored while disconnecting"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        self.terminate();
                        return Err(e);
                    }
                }
            }
        }

        info!(remote = %self.remote, "no answer to DISC, disconnecting anyway");
        self.terminate();
        Ok(())
    }

    /// Cancel any in-flight wait and remove the session's route.
    pub fn close(&self) {
        self.cancel.cancel();
        self.terminate();
    }

    async fn establish(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let capabilities = self.link.capabilities.clone();
        let mut modulo = self.config.modulo();
        if modulo == Modulo::OneTwentyEight
            && capabilities.get(&self.remote).extended == Some(false)
        {
            debug!(remote = %self.remote, "station refused SABME before, using SABM");
            modulo = Modulo::Eight;
        }
        loop {
            self.modulo.store(modulo.value(), Ordering::Release);
            match self.handshake(&mut inner, modulo).await {
                Ok(()) => {
                    if modulo == Modulo::OneTwentyEight {
                        capabilities.record_extended(&self.remote, true);
                    }
                    self.reset_sequencing(&mut inner);
                    self.set_state(SessionState::Connected);
                    info!(
                        local = %self.local,
                        remote = %self.remote,
                        modulo = modulo.value(),
                        "connected"
                    );
                    return Ok(());
                }
                Err(Error::ConnectionRejected) if modulo == Modulo::OneTwentyEight => {
                    info!(remote = %self.remote, "SABME refused, retrying with SABM");
                    capabilities.record_extended(&self.remote, false);
                    modulo = Modulo::Eight;
                }
                Err(e) => {
                    self.terminate();
                    return Err(e);
                }
            }
        }
    }

    /// One SABM/SABME exchange with T1 retries.
    async fn handshake(&self, inner: &mut Inner, modulo: Modulo) -> Result<()> {
        let frame_type = match modulo {
            Modulo::Eight => FrameType::Sabm,
            Modulo::OneTwentyEight => FrameType::Sabme,
        };
        let request = self.unnumbered(frame_type, CommandResponse::Command, true)?;
        self.set_state(SessionState::AwaitingConnect);

        for attempt in 0..=self.config.retries() {
            if attempt > 0 {
                debug!(attempt, remote = %self.remote, "retransmitting {frame_type}");
            }
            self.link.transmit(&request).await?;
            let deadline = Instant::now() + self.config.t1_for(request.as_bytes().len());

            while let Some(frame) = self.next_frame(inner, deadline).await? {
                match frame.frame_type() {
                    FrameType::Ua => return Ok(()),
                    FrameType::Dm => return Err(Error::ConnectionRejected),
                    FrameType::Frmr => {
                        return Err(Error::ProtocolViolation(format!(
                            "FRMR in reply to {frame_type}"
                        )))
                    }
                    FrameType::Disc => self.reply(&frame, FrameType::Dm).await?,
                    other => trace!(frame_type = %other, "ignored while connecting"),
                }
            }
        }

        warn!(remote = %self.remote, retries = self.config.retries(), "no answer to {frame_type}");
        Err(Error::Timeout)
    }

    /// Wait until every outstanding I frame is acknowledged.
    async fn await_acknowledgement(&self, inner: &mut Inner) -> Result<()> {
        let mut retries_left = self.config.retries();
        let mut deadline = self.t1_deadline(inner);

        while !inner.unacked.is_empty() {
            let Some(frame) = self.next_frame(inner, deadline).await? else {
                self.spend_retry(&mut retries_left, "T1 expired")?;
                self.retransmit(inner, None).await?;
                deadline = self.t1_deadline(inner);
                continue;
            };

            match frame.frame_type() {
                FrameType::I => {
                    if self.acknowledge(inner, frame.received_sequence()) {
                        retries_left = self.config.retries();
                        deadline = self.t1_deadline(inner);
                    }
                    self.accept_information(inner, &frame).await?;
                }
                FrameType::Rr | FrameType::Rnr => {
                    let progress = self.acknowledge(inner, frame.received_sequence());
                    inner.remote_busy = frame.frame_type() == FrameType::Rnr;
                    if progress {
                        retries_left = self.config.retries();
                        deadline = self.t1_deadline(inner);
                    }
                    if frame.is_command() && frame.poll_final() {
                        self.supervisory(FrameType::Rr, CommandResponse::Response, true)
                            .await?;
                    } else if frame.poll_final()
                        && !inner.remote_busy
                        && !inner.unacked.is_empty()
                    {
                        // Checkpoint: the peer has everything before N(R).
                        if !progress {
                            self.spend_retry(&mut retries_left, "checkpoint without progress")?;
                        }
                        self.retransmit(inner, None).await?;
                        deadline = self.t1_deadline(inner);
                    }
                }
                FrameType::Rej => {
                    let nr = frame.received_sequence().unwrap_or(inner.va);
                    if !self.acknowledge(inner, Some(nr)) {
                        self.spend_retry(&mut retries_left, "REJ without progress")?;
                    } else {
                        retries_left = self.config.retries();
                    }
                    debug!(nr, "REJ received");
                    self.retransmit(inner, None).await?;
                    deadline = self.t1_deadline(inner);
                }
                FrameType::Srej => {
                    let nr = frame.received_sequence().unwrap_or(inner.va);
                    let progress = self.config.srej_acknowledges_prior()
                        && frame.poll_final()
                        && self.acknowledge(inner, Some(nr));
                    if progress {
                        retries_left = self.config.retries();
                    } else {
                        self.spend_retry(&mut retries_left, "SREJ without progress")?;
                    }
                    debug!(nr, "SREJ received");
                    self.retransmit(inner, Some(nr)).await?;
                    deadline = self.t1_deadline(inner);
                }
                _ => match self.on_unnumbered(inner, &frame).await? {
                    Remote::Ignored => {}
                    Remote::Closed => return Err(Error::ConnectionLost),
                    Remote::Reset => {
                        return Err(Error::ProtocolViolation(
                            "link reset by remote station".into(),
                        ))
                    }
                },
            }
        }
        Ok(())
    }

    /// Handle frames already queued by the dispatcher until a payload is
    /// ready to deliver or the queue is empty.
    async fn drain(&self, inner: &mut Inner) -> Result<Option<Bytes>> {
        loop {
            if let Some(data) = inner.received.pop_front() {
                return Ok(Some(data));
            }
            if self.state() != SessionState::Connected {
                return Ok(None);
            }
            let frame = match inner.inbound.try_recv() {
                Ok(frame) => frame,
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => return Err(Error::Cancelled),
            };
            match frame.frame_type() {
                FrameType::I => {
                    self.acknowledge(inner, frame.received_sequence());
                    self.accept_information(inner, &frame).await?;
                }
                FrameType::Rr | FrameType::Rnr | FrameType::Rej | FrameType::Srej => {
                    self.acknowledge(inner, frame.received_sequence());
                    inner.remote_busy = frame.frame_type() == FrameType::Rnr;
                    if frame.is_command() && frame.poll_final() {
                        self.supervisory(FrameType::Rr, CommandResponse::Response, true)
                            .await?;
                    }
                }
                _ => {
                    self.on_unnumbered(inner, &frame).await?;
                }
            }
        }
    }

    /// Handle an unnumbered frame while connected.
    async fn on_unnumbered(&self, inner: &mut Inner, frame: &Frame) -> Result<Remote> {
        match frame.frame_type() {
            FrameType::Disc => {
                self.reply(frame, FrameType::Ua).await?;
                inner.remote_closed = true;
                info!(remote = %self.remote, "disconnected by remote station");
                self.terminate();
                Ok(Remote::Closed)
            }
            FrameType::Dm => {
                self.terminate();
                Err(Error::ConnectionRejected)
            }
            FrameType::Frmr => {
                self.terminate();
                Err(Error::ProtocolViolation("FRMR received".into()))
            }
            FrameType::Sabm | FrameType::Sabme => {
                self.modulo.store(frame.modulo().value(), Ordering::Release);
                self.reply(frame, FrameType::Ua).await?;
                self.reset_sequencing(inner);
                debug!(remote = %self.remote, "link reset by remote station");
                Ok(Remote::Reset)
            }
            other => {
                trace!(frame_type = %other, "ignored while connected");
                Ok(Remote::Ignored)
            }
        }
    }

    /// Take an I frame from the peer. In-sequence payloads are queued and
    /// acknowledged; the first frame of a gap draws one REJ.
    async fn accept_information(&self, inner: &mut Inner, frame: &Frame) -> Result<()> {
        let ns = frame.send_sequence().unwrap_or_default();
        let vr = self.receive_state();
        let poll = frame.poll_final();

        if ns == vr {
            self.vr.store(self.modulo().next(vr), Ordering::Release);
            inner.reject_sent = false;
            inner
                .received
                .push_back(Bytes::copy_from_slice(frame.payload()));
            self.supervisory(FrameType::Rr, CommandResponse::Response, poll)
                .await
        } else if !inner.reject_sent {
            inner.reject_sent = true;
            debug!(ns, expected = vr, "out of sequence, sending REJ");
            self.supervisory(FrameType::Rej, CommandResponse::Response, poll)
                .await
        } else if poll {
            self.supervisory(FrameType::Rr, CommandResponse::Response, true)
                .await
        } else {
            trace!(ns, expected = vr, "out of sequence, REJ outstanding");
            Ok(())
        }
    }

    /// Advance V(A) to `nr`. Returns `true` if any frame was acknowledged.
    fn acknowledge(&self, inner: &mut Inner, nr: Option<u8>) -> bool {
        let Some(nr) = nr else {
            return false;
        };
        let modulo = self.modulo();
        let outstanding = modulo.distance(inner.va, self.send_state());
        let acked = modulo.distance(inner.va, nr);
        if acked > outstanding {
            warn!(nr, va = inner.va, vs = self.send_state(), "N(R) outside window, ignored");
            return false;
        }
        for _ in 0..acked {
            inner.unacked.pop_front();
        }
        inner.va = nr;
        acked > 0
    }

    /// Resend one frame (`only = Some(ns)`) or every unacknowledged frame,
    /// polling on the last one sent.
    async fn retransmit(&self, inner: &mut Inner, only: Option<u8>) -> Result<()> {
        let frames: Vec<(u8, Bytes)> = inner
            .unacked
            .iter()
            .filter(|(ns, _)| only.map_or(true, |only| *ns == only))
            .cloned()
            .collect();
        let last = frames.len().saturating_sub(1);
        for (i, (ns, payload)) in frames.iter().enumerate() {
            debug!(ns = *ns, "retransmitting I frame");
            let frame = self.information(*ns, payload, i == last)?;
            self.link.transmit(&frame).await?;
        }
        Ok(())
    }

    fn spend_retry(&self, retries_left: &mut u32, reason: &str) -> Result<()> {
        if *retries_left == 0 {
            warn!(remote = %self.remote, reason, "retries exhausted, dropping connection");
            self.terminate();
            return Err(Error::Timeout);
        }
        *retries_left -= 1;
        debug!(reason, retries_left = *retries_left, "retransmission round");
        Ok(())
    }

    /// Next frame from the peer, or `None` at `deadline`.
    async fn next_frame(&self, inner: &mut Inner, deadline: Instant) -> Result<Option<Frame>> {
        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            frame = inner.inbound.recv() => frame.map(Some).ok_or(Error::Cancelled),
            _ = tokio::time::sleep_until(deadline) => Ok(None),
        }
    }

    fn t1_deadline(&self, inner: &Inner) -> Instant {
        let longest = inner
            .unacked
            .iter()
            .map(|(_, payload)| payload.len())
            .max()
            .unwrap_or(0);
        // Addresses, two-byte control field, PID.
        let header = ADDRESS_LEN * (2 + self.config.repeaters().len()) + 3;
        Instant::now() + self.config.t1_for(header + longest)
    }

    fn reset_sequencing(&self, inner: &mut Inner) {
        self.vs.store(0, Ordering::Release);
        self.vr.store(0, Ordering::Release);
        inner.va = 0;
        inner.unacked.clear();
        inner.reject_sent = false;
        inner.remote_busy = false;
    }

    fn set_state(&self, state: SessionState) {
        let old = SessionState::from_u8(self.state.swap(state.as_u8(), Ordering::AcqRel));
        if old != state {
            debug!(remote = %self.remote, from = %old, to = %state, "session state");
        }
    }

    fn terminate(&self) {
        self.set_state(SessionState::Disconnected);
        self.link
            .dispatcher
            .release(&self.local, &self.remote, &self.modulo);
        self.wake.notify_one();
    }

    fn check_open(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn require_connected(&self) -> Result<()> {
        match self.state() {
            SessionState::Connected => Ok(()),
            SessionState::Disconnected => Err(Error::NotConnected),
            other => Err(Error::InvalidState(format!("cannot send while {other}"))),
        }
    }

    fn unnumbered(&self, frame_type: FrameType, cr: CommandResponse, pf: bool) -> Result<Frame> {
        Frame::builder(frame_type)
            .destination(self.remote.clone())
            .source(self.local.clone())
            .repeaters(self.config.repeaters().iter().cloned())
            .modulo(self.modulo())
            .command_response(cr)
            .poll_final(pf)
            .build()
    }

    async fn supervisory(&self, frame_type: FrameType, cr: CommandResponse, pf: bool) -> Result<()> {
        let frame = Frame::builder(frame_type)
            .destination(self.remote.clone())
            .source(self.local.clone())
            .repeaters(self.config.repeaters().iter().cloned())
            .modulo(self.modulo())
            .command_response(cr)
            .poll_final(pf)
            .received_sequence(self.receive_state())
            .build()?;
        self.link.transmit(&frame).await
    }

    fn information(&self, ns: u8, payload: &[u8], poll: bool) -> Result<Frame> {
        Frame::builder(FrameType::I)
            .destination(self.remote.clone())
            .source(self.local.clone())
            .repeaters(self.config.repeaters().iter().cloned())
            .modulo(self.modulo())
            .command_response(CommandResponse::Command)
            .poll_final(poll)
            .send_sequence(ns)
            .received_sequence(self.receive_state())
            .pid(self.config.pid())
            .payload(payload)
            .build()
    }

    /// Answer `frame` with an unnumbered response on our own path.
    async fn reply(&self, frame: &Frame, frame_type: FrameType) -> Result<()> {
        let response = self.unnumbered(frame_type, CommandResponse::Response, frame.poll_final())?;
        self.link.transmit(&response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use ax25link_test_harness::MockTransport;
    use ax25link_transport::kiss;

    use crate::builder::LinkBuilder;
    use crate::events::LinkEvent;
    use crate::frame::FrameBuilder;
    use crate::link::Link;

    fn me() -> Address {
        "N0CALL-1".parse().unwrap()
    }

    fn peer() -> Address {
        "KO4LCM-2".parse().unwrap()
    }

    fn wire(builder: FrameBuilder) -> Vec<u8> {
        kiss::encode(0, builder.build().unwrap().as_bytes())
    }

    /// A frame we send to the peer.
    fn ours(frame_type: FrameType) -> FrameBuilder {
        Frame::builder(frame_type).destination(peer()).source(me())
    }

    /// A frame the peer sends to us.
    fn theirs(frame_type: FrameType) -> FrameBuilder {
        Frame::builder(frame_type).destination(me()).source(peer())
    }

    fn sabm() -> Vec<u8> {
        wire(ours(FrameType::Sabm))
    }

    fn ua_in() -> Vec<u8> {
        wire(theirs(FrameType::Ua))
    }

    fn i_out(ns: u8, nr: u8, poll: bool, payload: &[u8]) -> Vec<u8> {
        wire(
            ours(FrameType::I)
                .send_sequence(ns)
                .received_sequence(nr)
                .poll_final(poll)
                .payload(payload),
        )
    }

    fn i_in(ns: u8, nr: u8, poll: bool, payload: &[u8]) -> Vec<u8> {
        wire(
            theirs(FrameType::I)
                .send_sequence(ns)
                .received_sequence(nr)
                .poll_final(poll)
                .payload(payload),
        )
    }

    fn s_in(frame_type: FrameType, nr: u8, fin: bool) -> Vec<u8> {
        wire(
            theirs(frame_type)
                .command_response(CommandResponse::Response)
                .received_sequence(nr)
                .poll_final(fin),
        )
    }

    fn s_out(frame_type: FrameType, nr: u8, fin: bool) -> Vec<u8> {
        wire(
            ours(frame_type)
                .command_response(CommandResponse::Response)
                .received_sequence(nr)
                .poll_final(fin),
        )
    }

    fn start(mock: MockTransport) -> Link {
        LinkBuilder::new()
            .poll_interval(Duration::from_millis(10))
            .build(Box::new(mock))
            .unwrap()
    }

    fn one_byte_frames() -> SessionConfig {
        SessionConfig::builder().max_info_len(1).build().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn connect_and_rej_recovery() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(&sabm(), &ua_in());
        mock.expect(&i_out(0, 0, false, b"a"), &[]);
        mock.expect(&i_out(1, 0, false, b"b"), &[]);
        mock.expect(&i_out(2, 0, false, b"c"), &[]);
        mock.expect(&i_out(3, 0, true, b"d"), &s_in(FrameType::Rej, 2, true));
        mock.expect(&i_out(2, 0, false, b"c"), &[]);
        mock.expect(&i_out(3, 0, true, b"d"), &s_in(FrameType::Rr, 4, true));
        let link = start(mock);

        let session = link.connect(&me(), &peer(), one_byte_frames()).await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        session.send(b"abcd").await.unwrap();

        let sent = handle.sent();
        assert_eq!(sent.len(), 7);
        // Only frames 2 and 3 went out again, in order.
        assert_eq!(sent[5], i_out(2, 0, false, b"c"));
        assert_eq!(sent[6], i_out(3, 0, true, b"d"));
        assert_eq!(session.send_state(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_falls_back_to_modulo_8() {
        let mut mock = MockTransport::new();
        mock.expect(
            &wire(ours(FrameType::Sabme).modulo(Modulo::OneTwentyEight)),
            &wire(theirs(FrameType::Dm)),
        );
        mock.expect(&sabm(), &ua_in());
        let link = start(mock);

        let config = SessionConfig::builder()
            .modulo(Modulo::OneTwentyEight)
            .build()
            .unwrap();
        let session = link.connect(&me(), &peer(), config).await.unwrap();
        assert_eq!(session.modulo(), Modulo::Eight);
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_sabme_is_remembered() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(
            &wire(ours(FrameType::Sabme).modulo(Modulo::OneTwentyEight)),
            &wire(theirs(FrameType::Dm)),
        );
        mock.expect(&sabm(), &ua_in());
        mock.expect(&wire(ours(FrameType::Disc)), &ua_in());
        mock.expect(&sabm(), &ua_in());
        let link = start(mock);
        let extended = || {
            SessionConfig::builder()
                .modulo(Modulo::OneTwentyEight)
                .build()
                .unwrap()
        };

        let first = link.connect(&me(), &peer(), extended()).await.unwrap();
        first.disconnect().await.unwrap();
        drop(first);
        assert_eq!(link.capabilities().get(&peer()).extended, Some(false));

        // The second attempt goes straight to SABM.
        let second = link.connect(&me(), &peer(), extended()).await.unwrap();
        assert_eq!(second.modulo(), Modulo::Eight);
        assert_eq!(handle.sent().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_sabme_is_remembered() {
        let mut mock = MockTransport::new();
        mock.expect(
            &wire(ours(FrameType::Sabme).modulo(Modulo::OneTwentyEight)),
            &ua_in(),
        );
        let link = start(mock);

        let config = SessionConfig::builder()
            .modulo(Modulo::OneTwentyEight)
            .build()
            .unwrap();
        let session = link.connect(&me(), &peer(), config).await.unwrap();
        assert_eq!(session.modulo(), Modulo::OneTwentyEight);
        assert_eq!(link.capabilities().get(&peer()).extended, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_times_out_after_retries() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(&sabm(), &[]);
        mock.expect(&sabm(), &[]);
        let link = start(mock);

        let config = SessionConfig::builder().retries(1).build().unwrap();
        let err = link.connect(&me(), &peer(), config).await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert_eq!(handle.sent(), vec![sabm(), sabm()]);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_rejected_at_modulo_8() {
        let mut mock = MockTransport::new();
        mock.expect(&sabm(), &wire(theirs(FrameType::Dm)));
        let link = start(mock);

        let err = link
            .connect(&me(), &peer(), SessionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionRejected));
    }

    #[tokio::test(start_paused = true)]
    async fn send_state_wraps_at_modulo() {
        let mut mock = MockTransport::new();
        mock.expect(&sabm(), &ua_in());
        let data = b"0123456789";
        let mut ns = 0u8;
        for (i, byte) in data.iter().enumerate() {
            let poll = i == 3 || i == 7 || i == 9;
            let reply = match i {
                3 => s_in(FrameType::Rr, 4, true),
                7 => s_in(FrameType::Rr, 0, true),
                9 => s_in(FrameType::Rr, 2, true),
                _ => Vec::new(),
            };
            mock.expect(&i_out(ns, 0, poll, &[*byte]), &reply);
            ns = Modulo::Eight.next(ns);
        }
        let link = start(mock);

        let session = link.connect(&me(), &peer(), one_byte_frames()).await.unwrap();
        session.send(data).await.unwrap();
        assert_eq!(session.send_state(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn srej_resends_only_the_named_frame() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(&sabm(), &ua_in());
        mock.expect(&i_out(0, 0, false, b"a"), &[]);
        mock.expect(&i_out(1, 0, true, b"b"), &s_in(FrameType::Srej, 0, true));
        mock.expect(&i_out(0, 0, true, b"a"), &s_in(FrameType::Rr, 2, true));
        let link = start(mock);

        let session = link.connect(&me(), &peer(), one_byte_frames()).await.unwrap();
        session.send(b"ab").await.unwrap();
        assert_eq!(handle.sent().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn srej_can_acknowledge_prior_frames() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(&sabm(), &ua_in());
        mock.expect(&i_out(0, 0, false, b"a"), &[]);
        mock.expect(&i_out(1, 0, false, b"b"), &[]);
        mock.expect(&i_out(2, 0, true, b"c"), &s_in(FrameType::Srej, 1, true));
        mock.expect(&i_out(1, 0, true, b"b"), &s_in(FrameType::Rr, 3, true));
        let link = start(mock);

        let config = SessionConfig::builder()
            .max_info_len(1)
            .srej_acknowledges_prior(true)
            .build()
            .unwrap();
        let session = link.connect(&me(), &peer(), config).await.unwrap();
        session.send(b"abc").await.unwrap();

        let sent = handle.sent();
        assert_eq!(sent.len(), 5);
        assert_eq!(sent[4], i_out(1, 0, true, b"b"));
    }

    #[tokio::test(start_paused = true)]
    async fn t1_expiry_resends_window() {
        let mut mock = MockTransport::new();
        mock.expect(&sabm(), &ua_in());
        mock.expect(&i_out(0, 0, true, b"x"), &[]);
        mock.expect(&i_out(0, 0, true, b"x"), &s_in(FrameType::Rr, 1, true));
        let link = start(mock);

        let session = link
            .connect(&me(), &peer(), SessionConfig::default())
            .await
            .unwrap();
        session.send(b"x").await.unwrap();
        assert_eq!(session.send_state(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ack_with_stray_extended_flag_is_accepted() {
        let mut rr = theirs(FrameType::Rr)
            .command_response(CommandResponse::Response)
            .received_sequence(1)
            .poll_final(true)
            .build()
            .unwrap()
            .as_bytes()
            .to_vec();
        // The peer flags modulo 128 in its source address but runs modulo 8.
        rr[13] &= !0x40;

        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(&sabm(), &ua_in());
        mock.expect(&i_out(0, 0, true, b"x"), &kiss::encode(0, &rr));
        let link = start(mock);

        let config = SessionConfig::builder().retries(1).build().unwrap();
        let session = link.connect(&me(), &peer(), config).await.unwrap();
        session.send(b"x").await.unwrap();
        assert_eq!(session.modulo(), Modulo::Eight);
        assert_eq!(handle.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rej_without_progress_spends_retries() {
        let mut mock = MockTransport::new();
        mock.expect(&sabm(), &ua_in());
        mock.expect(&i_out(0, 0, true, b"x"), &s_in(FrameType::Rej, 0, true));
        let link = start(mock);

        let config = SessionConfig::builder().retries(0).build().unwrap();
        let session = link.connect(&me(), &peer(), config).await.unwrap();
        let err = session.send(b"x").await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(session.send(b"y").await, Err(Error::NotConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn receive_delivers_in_sequence_and_ends_on_disc() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(&sabm(), &ua_in());
        mock.expect(&s_out(FrameType::Rr, 1, false), &[]);
        mock.expect(&wire(ours(FrameType::Ua).poll_final(true)), &[]);
        let link = start(mock);

        let session = link
            .connect(&me(), &peer(), SessionConfig::default())
            .await
            .unwrap();
        handle.push_inbound(&i_in(0, 0, false, b"hi"));
        handle.push_inbound(&wire(theirs(FrameType::Disc)));

        assert_eq!(session.receive().await.unwrap().as_deref(), Some(&b"hi"[..]));
        assert_eq!(session.receive().await.unwrap(), None);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.receive().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn send_proceeds_while_receive_waits() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(&sabm(), &ua_in());
        mock.expect(&i_out(0, 0, true, b"x"), &s_in(FrameType::Rr, 1, true));
        mock.expect(&s_out(FrameType::Rr, 1, false), &[]);
        let link = start(mock);

        let session = Arc::new(
            link.connect(&me(), &peer(), SessionConfig::default())
                .await
                .unwrap(),
        );
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.receive().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let sent = tokio::time::timeout(Duration::from_secs(60), session.send(b"x")).await;
        assert!(matches!(sent, Ok(Ok(()))));
        assert_eq!(session.send_state(), 1);

        handle.push_inbound(&i_in(0, 1, false, b"y"));
        let received = waiter.await.unwrap().unwrap();
        assert_eq!(received.as_deref(), Some(&b"y"[..]));
        assert_eq!(handle.sent().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_sequence_draws_one_rej() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(&sabm(), &ua_in());
        mock.expect(&s_out(FrameType::Rej, 0, false), &[]);
        mock.expect(&s_out(FrameType::Rr, 1, false), &[]);
        mock.expect(&s_out(FrameType::Rr, 2, false), &[]);
        let link = start(mock);

        let session = link
            .connect(&me(), &peer(), SessionConfig::default())
            .await
            .unwrap();
        handle.push_inbound(&i_in(1, 0, false, b"b"));
        handle.push_inbound(&i_in(2, 0, false, b"c"));
        handle.push_inbound(&i_in(0, 0, false, b"a"));
        handle.push_inbound(&i_in(1, 0, false, b"b"));

        assert_eq!(session.receive().await.unwrap().as_deref(), Some(&b"a"[..]));
        assert_eq!(session.receive().await.unwrap().as_deref(), Some(&b"b"[..]));
        assert_eq!(session.receive_state(), 2);
        assert_eq!(handle.sent().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn status_poll_is_answered() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(&sabm(), &ua_in());
        mock.expect(&s_out(FrameType::Rr, 0, true), &[]);
        mock.expect(&s_out(FrameType::Rr, 1, false), &[]);
        let link = start(mock);

        let session = link
            .connect(&me(), &peer(), SessionConfig::default())
            .await
            .unwrap();
        handle.push_inbound(&wire(
            theirs(FrameType::Rr)
                .command_response(CommandResponse::Command)
                .received_sequence(0)
                .poll_final(true),
        ));
        handle.push_inbound(&i_in(0, 0, false, b"z"));

        assert_eq!(session.receive().await.unwrap().as_deref(), Some(&b"z"[..]));
        assert_eq!(handle.sent()[1], s_out(FrameType::Rr, 0, true));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_exchange() {
        let mut mock = MockTransport::new();
        mock.expect(&sabm(), &ua_in());
        mock.expect(&wire(ours(FrameType::Disc)), &ua_in());
        let link = start(mock);

        let session = link
            .connect(&me(), &peer(), SessionConfig::default())
            .await
            .unwrap();
        session.disconnect().await.unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        // Already down: nothing more is sent.
        session.disconnect().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_without_answer_is_forced() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(&sabm(), &ua_in());
        mock.expect(&wire(ours(FrameType::Disc)), &[]);
        mock.expect(&wire(ours(FrameType::Disc)), &[]);
        let link = start(mock);

        let session = link
            .connect(&me(), &peer(), SessionConfig::default())
            .await
            .unwrap();
        session.disconnect().await.unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(handle.sent().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn frmr_answer_to_disc_is_a_protocol_violation() {
        let mut mock = MockTransport::new();
        mock.expect(&sabm(), &ua_in());
        mock.expect(&wire(ours(FrameType::Disc)), &wire(theirs(FrameType::Frmr)));
        let link = start(mock);

        let session = link
            .connect(&me(), &peer(), SessionConfig::default())
            .await
            .unwrap();
        let err = session.disconnect().await.unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_pending_receive() {
        let mut mock = MockTransport::new();
        mock.expect(&sabm(), &ua_in());
        let link = start(mock);

        let session = Arc::new(
            link.connect(&me(), &peer(), SessionConfig::default())
                .await
                .unwrap(),
        );
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.receive().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.close();

        assert!(matches!(waiter.await.unwrap(), Err(Error::Cancelled)));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(session.send(b"x").await, Err(Error::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn link_shutdown_cancels_sessions() {
        let mut mock = MockTransport::new();
        mock.expect(&sabm(), &ua_in());
        let link = start(mock);

        let session = link
            .connect(&me(), &peer(), SessionConfig::default())
            .await
            .unwrap();
        let _transport = link.shutdown().await.unwrap();
        assert!(matches!(session.receive().await, Err(Error::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_offer_answers_ua() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(&wire(ours(FrameType::Ua).poll_final(true)), &[]);
        let link = start(mock);
        link.listen(&me());
        let mut events = link.subscribe();

        handle.push_inbound(&wire(theirs(FrameType::Sabm)));
        let offer = match events.recv().await.unwrap() {
            LinkEvent::ConnectionOffer(offer) => offer,
            other => panic!("unexpected event {other:?}"),
        };
        assert_eq!(offer.remote(), peer());

        let session = link.accept(&offer, SessionConfig::default()).await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.modulo(), Modulo::Eight);
        assert_eq!(handle.sent().len(), 1);
    }

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            SessionState::Disconnected,
            SessionState::AwaitingConnect,
            SessionState::Connected,
            SessionState::AwaitingDisconnect,
        ] {
            assert_eq!(SessionState::from_u8(state.as_u8()), state);
        }
    }
}
