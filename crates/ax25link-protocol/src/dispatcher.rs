//! Inbound frame routing.
//!
//! The [`Dispatcher`] matches each decoded frame to the session registered
//! for its `(local, remote)` station pair. Frames for a listened-to local
//! station with no session become [`LinkEvent`]s; everything else is
//! dropped, which is normal on a shared channel.
//!
//! Lookups take a read lock only, so sessions registering or leaving never
//! wait behind frame delivery for long.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{broadcast, mpsc, Notify};
use tracing::{debug, trace, warn};

use ax25link_core::error::{Error, Result};

use crate::address::Address;
use crate::control::{FrameKind, FrameType, Modulo};
use crate::events::{ConnectionOffer, LinkEvent};
use crate::frame::Frame;

/// Capacity of each session's inbound frame queue.
pub(crate) const SESSION_QUEUE: usize = 64;

/// `(local, remote)` with per-frame flags cleared.
type RouteKey = (Address, Address);

#[derive(Debug)]
struct Route {
    inbound: mpsc::Sender<Frame>,
    modulo: Arc<AtomicU8>,
    wake: Arc<Notify>,
}

/// A session's end of its route.
#[derive(Debug)]
pub(crate) struct Registration {
    pub(crate) inbound: mpsc::Receiver<Frame>,
    /// Shared modulo cell, updated by the session after negotiation.
    pub(crate) modulo: Arc<AtomicU8>,
    /// Signalled after every delivered frame.
    pub(crate) wake: Arc<Notify>,
}

/// What the dispatcher did with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Queued for a registered session.
    Delivered,
    /// Published as [`LinkEvent::ConnectionOffer`].
    Offered,
    /// Published as [`LinkEvent::Datagram`].
    Datagram,
    /// DISC for a listened-to station with no session; the caller should
    /// transmit this DM.
    Refuse(Frame),
    /// Not for us, or not meaningful without a session.
    Dropped,
}

/// Routes inbound frames to sessions and listeners.
#[derive(Debug)]
pub struct Dispatcher {
    routes: RwLock<HashMap<RouteKey, Route>>,
    listening: RwLock<HashSet<Address>>,
    events: broadcast::Sender<LinkEvent>,
    max_repeaters: usize,
}

impl Dispatcher {
    pub fn new(events: broadcast::Sender<LinkEvent>, max_repeaters: usize) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            listening: RwLock::new(HashSet::new()),
            events,
            max_repeaters,
        }
    }

    /// Accept connection offers and datagrams for `local`.
    pub fn listen(&self, local: &Address) {
        let mut listening = self.listening.write().unwrap_or_else(PoisonError::into_inner);
        listening.insert(local.plain());
    }

    pub fn unlisten(&self, local: &Address) {
        let mut listening = self.listening.write().unwrap_or_else(PoisonError::into_inner);
        listening.remove(&local.plain());
    }

    pub fn is_listening(&self, local: &Address) -> bool {
        let listening = self.listening.read().unwrap_or_else(PoisonError::into_inner);
        listening.contains(&local.plain())
    }

    /// Register a session route.
    ///
    /// Fails with [`Error::InvalidState`] if the pair already has a session.
    pub(crate) fn register(
        &self,
        local: &Address,
        remote: &Address,
        modulo: Modulo,
    ) -> Result<Registration> {
        let key = (local.plain(), remote.plain());
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(route) = routes.get(&key) {
            if !route.inbound.is_closed() {
                return Err(Error::InvalidState(format!(
                    "session {local} <-> {remote} already exists"
                )));
            }
        }
        let (tx, rx) = mpsc::channel(SESSION_QUEUE);
        let cell = Arc::new(AtomicU8::new(modulo.value()));
        let wake = Arc::new(Notify::new());
        routes.insert(
            key,
            Route {
                inbound: tx,
                modulo: cell.clone(),
                wake: wake.clone(),
            },
        );
        debug!(%local, %remote, "session route registered");
        Ok(Registration {
            inbound: rx,
            modulo: cell,
            wake,
        })
    }

    #[cfg(test)]
    fn remove(&self, local: &Address, remote: &Address) {
        let key = (local.plain(), remote.plain());
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        if routes.remove(&key).is_some() {
            debug!(%local, %remote, "session route removed");
        }
    }

    /// Remove the route only if it is still the one holding `cell`, so a
    /// stale session cannot evict its successor.
    pub(crate) fn release(&self, local: &Address, remote: &Address, cell: &Arc<AtomicU8>) {
        let key = (local.plain(), remote.plain());
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        if routes
            .get(&key)
            .is_some_and(|route| Arc::ptr_eq(&route.modulo, cell))
        {
            routes.remove(&key);
            debug!(%local, %remote, "session route released");
        }
    }

    #[cfg(test)]
    fn has_route(&self, local: &Address, remote: &Address) -> bool {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        routes.contains_key(&(local.plain(), remote.plain()))
    }

    /// Modulo of the session between `local` and `remote`, if there is one.
    pub(crate) fn route_modulo(&self, local: &Address, remote: &Address) -> Option<Modulo> {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        routes
            .get(&(local.plain(), remote.plain()))
            .and_then(|route| Modulo::try_from(route.modulo.load(Ordering::Acquire)).ok())
    }

    /// Route one decoded frame.
    pub fn dispatch(&self, frame: Frame) -> Dispatch {
        let local = frame.destination().plain();
        let remote = frame.source().plain();

        let route = {
            let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
            routes
                .get(&(local.clone(), remote.clone()))
                .map(|r| {
                    (
                        r.inbound.clone(),
                        r.wake.clone(),
                        r.modulo.load(Ordering::Acquire),
                    )
                })
        };

        if let Some((inbound, wake, modulo)) = route {
            let frame = match self.redecode(frame, modulo) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(
                        %local,
                        %remote,
                        error = %e,
                        "dropping frame undecodable at session modulo"
                    );
                    return Dispatch::Dropped;
                }
            };
            return match inbound.try_send(frame) {
                Ok(()) => {
                    wake.notify_one();
                    Dispatch::Delivered
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(%local, %remote, "session queue full, dropping frame");
                    Dispatch::Dropped
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    trace!(%local, %remote, "session gone, dropping frame");
                    Dispatch::Dropped
                }
            };
        }

        if !self.is_listening(&local) {
            trace!(%local, %remote, "frame for unknown station dropped");
            return Dispatch::Dropped;
        }

        match frame.frame_type() {
            FrameType::Sabm | FrameType::Sabme => {
                debug!(%local, %remote, "connection offer");
                let _ = self
                    .events
                    .send(LinkEvent::ConnectionOffer(ConnectionOffer::new(frame)));
                Dispatch::Offered
            }
            FrameType::Ui => {
                let _ = self.events.send(LinkEvent::Datagram(frame));
                Dispatch::Datagram
            }
            FrameType::Disc => match frame.reply(FrameType::Dm).build() {
                Ok(dm) => Dispatch::Refuse(dm),
                Err(e) => {
                    warn!(error = %e, "cannot build DM reply");
                    Dispatch::Dropped
                }
            },
            other => {
                trace!(%local, %remote, frame_type = %other, "no session, frame dropped");
                Dispatch::Dropped
            }
        }
    }

    /// Re-decode an I or S frame whose sender did not flag the session's
    /// modulo in its address.
    fn redecode(&self, frame: Frame, modulo: u8) -> Result<Frame> {
        let modulo = Modulo::try_from(modulo)?;
        if frame.kind() == FrameKind::Unnumbered || frame.modulo() == modulo {
            return Ok(frame);
        }
        Frame::decode_with(frame.as_bytes(), Some(modulo), self.max_repeaters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::CommandResponse;
    use crate::frame::DEFAULT_MAX_REPEATERS;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn dispatcher() -> (Dispatcher, broadcast::Receiver<LinkEvent>) {
        let (tx, rx) = broadcast::channel(16);
        (Dispatcher::new(tx, DEFAULT_MAX_REPEATERS), rx)
    }

    fn frame(frame_type: FrameType, to: &str, from: &str) -> Frame {
        Frame::builder(frame_type)
            .destination(addr(to))
            .source(addr(from))
            .build()
            .unwrap()
    }

    #[test]
    fn unknown_station_is_dropped() {
        let (d, mut rx) = dispatcher();
        assert_eq!(d.dispatch(frame(FrameType::Sabm, "N0CALL", "KO4LCM")), Dispatch::Dropped);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn sabm_for_listener_is_offered() {
        let (d, mut rx) = dispatcher();
        d.listen(&addr("N0CALL"));
        assert_eq!(d.dispatch(frame(FrameType::Sabm, "N0CALL", "KO4LCM-3")), Dispatch::Offered);
        match rx.try_recv().unwrap() {
            LinkEvent::ConnectionOffer(offer) => {
                assert_eq!(offer.local(), addr("N0CALL"));
                assert_eq!(offer.remote(), addr("KO4LCM-3"));
                assert_eq!(offer.modulo(), Modulo::Eight);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn ui_for_listener_is_a_datagram() {
        let (d, mut rx) = dispatcher();
        d.listen(&addr("N0CALL"));
        assert_eq!(d.dispatch(frame(FrameType::Ui, "N0CALL", "KO4LCM")), Dispatch::Datagram);
        assert!(matches!(rx.try_recv().unwrap(), LinkEvent::Datagram(_)));
    }

    #[test]
    fn disc_without_session_is_refused() {
        let (d, _rx) = dispatcher();
        d.listen(&addr("N0CALL"));
        match d.dispatch(frame(FrameType::Disc, "N0CALL", "KO4LCM")) {
            Dispatch::Refuse(dm) => {
                assert_eq!(dm.frame_type(), FrameType::Dm);
                assert_eq!(dm.destination(), &addr("KO4LCM"));
                assert_eq!(dm.command_response(), CommandResponse::Response);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn other_frames_for_listener_are_dropped() {
        let (d, _rx) = dispatcher();
        d.listen(&addr("N0CALL"));
        assert_eq!(d.dispatch(frame(FrameType::Rr, "N0CALL", "KO4LCM")), Dispatch::Dropped);
        d.unlisten(&addr("N0CALL"));
        assert_eq!(d.dispatch(frame(FrameType::Ui, "N0CALL", "KO4LCM")), Dispatch::Dropped);
    }

    #[test]
    fn registered_route_receives_frames() {
        let (d, _rx) = dispatcher();
        let mut route = d
            .register(&addr("N0CALL"), &addr("KO4LCM"), Modulo::Eight)
            .unwrap();
        assert_eq!(d.dispatch(frame(FrameType::Ua, "N0CALL", "KO4LCM")), Dispatch::Delivered);
        assert_eq!(route.inbound.try_recv().unwrap().frame_type(), FrameType::Ua);

        // Another remote on the same local address is not ours.
        assert_eq!(d.dispatch(frame(FrameType::Ua, "N0CALL", "KO4LCM-1")), Dispatch::Dropped);
    }

    #[test]
    fn duplicate_registration_fails() {
        let (d, _rx) = dispatcher();
        let _keep = d
            .register(&addr("N0CALL"), &addr("KO4LCM"), Modulo::Eight)
            .unwrap();
        assert!(matches!(
            d.register(&addr("N0CALL"), &addr("KO4LCM"), Modulo::Eight),
            Err(Error::InvalidState(_))
        ));
        d.remove(&addr("N0CALL"), &addr("KO4LCM"));
        assert!(!d.has_route(&addr("N0CALL"), &addr("KO4LCM")));
    }

    #[test]
    fn stale_release_keeps_newer_route() {
        let (d, _rx) = dispatcher();
        let old = d
            .register(&addr("N0CALL"), &addr("KO4LCM"), Modulo::Eight)
            .unwrap();
        d.remove(&addr("N0CALL"), &addr("KO4LCM"));
        let new = d
            .register(&addr("N0CALL"), &addr("KO4LCM"), Modulo::Eight)
            .unwrap();

        d.release(&addr("N0CALL"), &addr("KO4LCM"), &old.modulo);
        assert!(d.has_route(&addr("N0CALL"), &addr("KO4LCM")));
        d.release(&addr("N0CALL"), &addr("KO4LCM"), &new.modulo);
        assert!(!d.has_route(&addr("N0CALL"), &addr("KO4LCM")));
    }

    #[test]
    fn frames_are_redecoded_at_session_modulo() {
        let (d, _rx) = dispatcher();
        let mut route = d
            .register(&addr("N0CALL"), &addr("KO4LCM"), Modulo::OneTwentyEight)
            .unwrap();

        let rr = Frame::builder(FrameType::Rr)
            .destination(addr("N0CALL"))
            .source(addr("KO4LCM"))
            .modulo(Modulo::OneTwentyEight)
            .received_sequence(77)
            .build()
            .unwrap();
        let mut bytes = rr.as_bytes().to_vec();
        bytes[13] |= 0x40;
        let unflagged = Frame::decode(&bytes).unwrap();
        assert_eq!(unflagged.modulo(), Modulo::Eight);

        assert_eq!(d.dispatch(unflagged), Dispatch::Delivered);
        let delivered = route.inbound.try_recv().unwrap();
        assert_eq!(delivered.modulo(), Modulo::OneTwentyEight);
        assert_eq!(delivered.received_sequence(), Some(77));
    }

    #[test]
    fn route_modulo_follows_the_session_cell() {
        let (d, _rx) = dispatcher();
        assert_eq!(d.route_modulo(&addr("N0CALL"), &addr("KO4LCM")), None);

        let route = d
            .register(&addr("N0CALL"), &addr("KO4LCM"), Modulo::OneTwentyEight)
            .unwrap();
        assert_eq!(
            d.route_modulo(&addr("N0CALL"), &addr("KO4LCM")),
            Some(Modulo::OneTwentyEight)
        );
        route.modulo.store(Modulo::Eight.value(), Ordering::Release);
        assert_eq!(
            d.route_modulo(&addr("N0CALL"), &addr("KO4LCM")),
            Some(Modulo::Eight)
        );
    }

    #[tokio::test]
    async fn delivery_wakes_the_session() {
        let (d, _rx) = dispatcher();
        let route = d
            .register(&addr("N0CALL"), &addr("KO4LCM"), Modulo::Eight)
            .unwrap();
        assert_eq!(d.dispatch(frame(FrameType::Rr, "N0CALL", "KO4LCM")), Dispatch::Delivered);
        // The permit is stored even though nobody was waiting yet.
        route.wake.notified().await;
    }
}
