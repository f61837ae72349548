//! # ax25link -- AX.25 Packet Radio over KISS
//!
//! `ax25link` is an asynchronous Rust library for talking AX.25 through a
//! KISS TNC or software modem. It encodes and decodes AX.25 v2.2 frames,
//! sends connectionless UI traffic along digipeater paths, and runs
//! connected-mode sessions with windowed, acknowledged delivery.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ax25link::{Address, LinkBuilder, SessionConfig};
//! use ax25link::transport::TcpTransport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = TcpTransport::connect("127.0.0.1:8001").await?;
//!     let link = LinkBuilder::new().build(Box::new(transport))?;
//!
//!     let me: Address = "N0CALL-1".parse()?;
//!     let bbs: Address = "KO4LCM-2".parse()?;
//!     let session = link.connect(&me, &bbs, SessionConfig::default()).await?;
//!     session.send(b"hello\r").await?;
//!     while let Some(data) = session.receive().await? {
//!         print!("{}", String::from_utf8_lossy(&data));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                   | Purpose                                         |
//! |-------------------------|-------------------------------------------------|
//! | `ax25link-core`         | [`Transport`] trait and [`Error`]               |
//! | `ax25link-transport`    | Serial and TCP transports, KISS framing         |
//! | `ax25link-protocol`     | Frame codec, link task, sessions                |
//! | **`ax25link`**          | This facade crate -- re-exports everything      |
//!
//! ## Decoding Frames
//!
//! Frames can be decoded without a link, for example from a capture:
//!
//! ```
//! use ax25link::{Address, Frame, FrameType};
//!
//! let frame = Frame::builder(FrameType::Ui)
//!     .destination(Address::new("KO4LCM", 15).unwrap())
//!     .source(Address::new("N0CALL", 12).unwrap())
//!     .payload(&b"HELLO"[..])
//!     .build()
//!     .unwrap();
//!
//! let decoded = Frame::decode(frame.as_bytes()).unwrap();
//! assert_eq!(decoded.frame_type(), FrameType::Ui);
//! assert_eq!(decoded.payload(), b"HELLO");
//! ```

pub use ax25link_core::*;
pub use ax25link_protocol::*;

/// Serial and TCP transports plus KISS framing.
pub mod transport {
    pub use ax25link_transport::*;
}
