//! Session configuration.
//!
//! [`SessionConfig`] collects the parameters a [`Session`](crate::Session)
//! negotiates or times itself with. Build one with
//! [`SessionConfig::builder()`]; every field has a default, so
//! `SessionConfig::default()` is a working modulo-8 configuration.
//!
//! # Example
//!
//! ```
//! use ax25link_protocol::{Modulo, SessionConfig};
//! use std::time::Duration;
//!
//! let config = SessionConfig::builder()
//!     .modulo(Modulo::OneTwentyEight)
//!     .t1_base(Duration::from_secs(5))
//!     .retries(5)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.window(), 32);
//! ```

use std::time::Duration;

use ax25link_core::error::{Error, Result};

use crate::address::Address;
use crate::control::Modulo;
use crate::frame::{DEFAULT_PID, PID_ESCAPE};

/// Default maximum information field length (N1).
pub const DEFAULT_MAX_INFO_LEN: usize = 256;

/// Default fixed T1 margin.
pub const DEFAULT_T1_BASE: Duration = Duration::from_secs(3);

/// Default on-air bit rate used to scale T1.
pub const DEFAULT_TX_BAUD: u32 = 1200;

/// Default retry budget (N2).
pub const DEFAULT_RETRIES: u32 = 3;

/// Retransmission timeout for a frame of `bits` bits sent at `baud` over
/// `hops` repeaters.
///
/// `(bits / baud) * max(1, hops) * 2 + base`: one way per hop, doubled for
/// the response.
pub fn t1_duration(bits: usize, baud: u32, hops: usize, base: Duration) -> Duration {
    let airtime = bits as f64 / baud.max(1) as f64;
    Duration::from_secs_f64(airtime * hops.max(1) as f64 * 2.0) + base
}

/// Parameters for one connected-mode session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    modulo: Modulo,
    pid: u8,
    t1_base: Duration,
    tx_baud: u32,
    retries: u32,
    window: u8,
    max_info_len: usize,
    srej_acknowledges_prior: bool,
    repeaters: Vec<Address>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            modulo: Modulo::Eight,
            pid: DEFAULT_PID,
            t1_base: DEFAULT_T1_BASE,
            tx_baud: DEFAULT_TX_BAUD,
            retries: DEFAULT_RETRIES,
            window: default_window(Modulo::Eight),
            max_info_len: DEFAULT_MAX_INFO_LEN,
            srej_acknowledges_prior: false,
            repeaters: Vec::new(),
        }
    }
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Requested sequence modulo. A modulo-128 connect falls back to 8 if
    /// the peer refuses SABME.
    pub fn modulo(&self) -> Modulo {
        self.modulo
    }

    pub fn pid(&self) -> u8 {
        self.pid
    }

    pub fn t1_base(&self) -> Duration {
        self.t1_base
    }

    pub fn tx_baud(&self) -> u32 {
        self.tx_baud
    }

    /// Retransmissions allowed after the first attempt.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Maximum outstanding I frames at the configured modulo.
    pub fn window(&self) -> u8 {
        self.window
    }

    /// Window to use at `modulo`, which may differ from the configured one
    /// after a fallback.
    pub fn window_for(&self, modulo: Modulo) -> u8 {
        self.window.min(modulo.max_window())
    }

    pub fn max_info_len(&self) -> usize {
        self.max_info_len
    }

    pub fn srej_acknowledges_prior(&self) -> bool {
        self.srej_acknowledges_prior
    }

    /// Digipeater path, with has-been-repeated flags cleared.
    pub fn repeaters(&self) -> &[Address] {
        &self.repeaters
    }

    /// T1 for a frame of `frame_len` bytes over this configuration's path.
    pub fn t1_for(&self, frame_len: usize) -> Duration {
        t1_duration(frame_len * 8, self.tx_baud, self.repeaters.len(), self.t1_base)
    }

    pub(crate) fn with_repeaters(mut self, repeaters: Vec<Address>) -> Self {
        self.repeaters = repeaters;
        self
    }
}

fn default_window(modulo: Modulo) -> u8 {
    match modulo {
        Modulo::Eight => 4,
        Modulo::OneTwentyEight => 32,
    }
}

/// Fluent builder for [`SessionConfig`].
#[derive(Debug, Clone, Default)]
pub struct SessionConfigBuilder {
    modulo: Option<Modulo>,
    pid: Option<u8>,
    t1_base: Option<Duration>,
    tx_baud: Option<u32>,
    retries: Option<u32>,
    window: Option<u8>,
    max_info_len: Option<usize>,
    srej_acknowledges_prior: bool,
    repeaters: Vec<Address>,
}

impl SessionConfigBuilder {
    /// Sequence modulo to request (default: 8).
    pub fn modulo(mut self, modulo: Modulo) -> Self {
        self.modulo = Some(modulo);
        self
    }

    /// PID for outbound I frames (default: 0xF0).
    pub fn pid(mut self, pid: u8) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Fixed margin added to the computed T1 (default: 3s).
    pub fn t1_base(mut self, base: Duration) -> Self {
        self.t1_base = Some(base);
        self
    }

    /// On-air bit rate used to scale T1 (default: 1200).
    pub fn tx_baud(mut self, baud: u32) -> Self {
        self.tx_baud = Some(baud);
        self
    }

    /// Retry budget (default: 3).
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Outstanding frame window (default: 4 at modulo 8, 32 at modulo 128).
    pub fn window(mut self, window: u8) -> Self {
        self.window = Some(window);
        self
    }

    /// Maximum I field length per frame (default: 256).
    pub fn max_info_len(mut self, len: usize) -> Self {
        self.max_info_len = Some(len);
        self
    }

    /// Treat an SREJ with P/F set as acknowledging every earlier frame
    /// (default: false, SREJ acknowledges nothing).
    pub fn srej_acknowledges_prior(mut self, enabled: bool) -> Self {
        self.srej_acknowledges_prior = enabled;
        self
    }

    /// Append a digipeater to the path.
    pub fn via(mut self, repeater: Address) -> Self {
        self.repeaters.push(repeater);
        self
    }

    /// Replace the digipeater path.
    pub fn repeaters(mut self, path: impl IntoIterator<Item = Address>) -> Self {
        self.repeaters = path.into_iter().collect();
        self
    }

    pub fn build(self) -> Result<SessionConfig> {
        let modulo = self.modulo.unwrap_or_default();
        let window = self
            .window
            .unwrap_or_else(|| default_window(modulo))
            .min(modulo.max_window());
        if window == 0 {
            return Err(Error::InvalidParameter("window must be at least 1".into()));
        }

        let pid = self.pid.unwrap_or(DEFAULT_PID);
        if pid == PID_ESCAPE {
            return Err(Error::InvalidPid(pid));
        }

        let tx_baud = self.tx_baud.unwrap_or(DEFAULT_TX_BAUD);
        if tx_baud == 0 {
            return Err(Error::InvalidParameter("tx_baud must be non-zero".into()));
        }

        let max_info_len = self.max_info_len.unwrap_or(DEFAULT_MAX_INFO_LEN);
        if max_info_len == 0 {
            return Err(Error::InvalidParameter(
                "max_info_len must be non-zero".into(),
            ));
        }

        Ok(SessionConfig {
            modulo,
            pid,
            t1_base: self.t1_base.unwrap_or(DEFAULT_T1_BASE),
            tx_baud,
            retries: self.retries.unwrap_or(DEFAULT_RETRIES),
            window,
            max_info_len,
            srej_acknowledges_prior: self.srej_acknowledges_prior,
            repeaters: self
                .repeaters
                .iter()
                .map(|r| r.plain())
                .collect(),
        })
    }
}
