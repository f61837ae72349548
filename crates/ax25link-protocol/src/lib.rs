//! AX.25 protocol engine for ax25link.
//!
//! This crate implements the AX.25 link layer on top of a KISS
//! [`Transport`](ax25link_core::Transport). It provides:
//!
//! - **Frame codec** ([`frame`], [`address`], [`control`]) -- bit-exact
//!   encode and decode of address fields, control fields and every frame
//!   type, driven by a single control field table.
//! - **Session** ([`session`]) -- the connected-mode state machine: SABM/UA
//!   handshakes, windowed I frame transmission, T1 retransmission and
//!   REJ/SREJ recovery at modulo 8 or 128.
//! - **Link** ([`link`], [`builder`]) -- the IO task that owns the transport
//!   and the [`Dispatcher`] that routes inbound frames to sessions.
//! - **Capabilities** ([`capabilities`]) -- what remote stations are known
//!   to support.
//!
//! # Example
//!
//! ```
//! use ax25link_protocol::{Address, CommandResponse, Frame, FrameKind, FrameType};
//!
//! let frame = Frame::builder(FrameType::Ui)
//!     .destination("KO4LCM-15".parse().unwrap())
//!     .source("N0CALL-12".parse().unwrap())
//!     .repeater("WH6CMO-10".parse().unwrap())
//!     .command_response(CommandResponse::Response)
//!     .poll_final(true)
//!     .payload("HELLO WORLD!")
//!     .build()
//!     .unwrap();
//!
//! let decoded = Frame::decode(frame.as_bytes()).unwrap();
//! assert_eq!(decoded.kind(), FrameKind::Unnumbered);
//! assert_eq!(decoded.payload(), b"HELLO WORLD!");
//! assert!(decoded.repeaters()[0].same_station(&Address::new("WH6CMO", 10).unwrap()));
//! ```

pub mod address;
pub mod bitfield;
pub mod builder;
pub mod capabilities;
pub mod config;
pub mod control;
pub mod dispatcher;
pub mod events;
pub mod frame;
mod io;
pub mod link;
pub mod session;

pub use address::Address;
pub use builder::LinkBuilder;
pub use capabilities::{Capabilities, CapabilityCache};
pub use config::{SessionConfig, SessionConfigBuilder};
pub use control::{CommandResponse, FrameKind, FrameType, Modulo};
pub use dispatcher::{Dispatch, Dispatcher};
pub use events::{ConnectionOffer, LinkEvent};
pub use frame::{Frame, FrameBuilder};
pub use link::Link;
pub use session::{Session, SessionState};
