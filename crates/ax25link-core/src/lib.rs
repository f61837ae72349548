//! ax25link-core: error definitions and the transport trait shared by every
//! ax25link crate.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level channel to a TNC
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod transport;

pub use error::{Error, Result};
pub use transport::Transport;
