//! Transport implementations and KISS framing for ax25link.
//!
//! This crate provides concrete implementations of the
//! [`Transport`](ax25link_core::Transport) trait:
//!
//! - [`SerialTransport`]: hardware TNCs and USB KISS modems on a serial port
//! - [`TcpTransport`]: software modems exposing KISS over TCP (Direwolf,
//!   soundmodem, ...)
//!
//! and the [`kiss`] module, which wraps raw AX.25 frames for the wire and
//! recovers them from the inbound byte stream.
//!
//! # Example
//!
//! ```no_run
//! use ax25link_transport::{kiss, TcpTransport};
//! use ax25link_core::transport::Transport;
//!
//! # async fn example(raw_frame: &[u8]) -> ax25link_core::Result<()> {
//! let mut transport = TcpTransport::connect("127.0.0.1:8001").await?;
//! transport.send(&kiss::encode(0, raw_frame)).await?;
//! # Ok(())
//! # }
//! ```

pub mod kiss;
pub mod serial;
pub mod tcp;

pub use kiss::{KissDecoder, KissFrame};
pub use serial::{DataBits, FlowControl, Parity, SerialConfig, SerialTransport, StopBits};
pub use tcp::TcpTransport;
