//! KISS framing between the host and a TNC.
//!
//! KISS wraps each raw AX.25 frame in `FEND` delimiters and escapes any
//! `FEND`/`FESC` bytes inside it. The first byte after the opening `FEND` is
//! a type byte: the high nibble selects the TNC port, the low nibble the
//! command (`0x00` for data, `0x01..=0x06` for TNC parameters).
//!
//! # Frame format
//!
//! ```text
//! 0xC0 <port<<4 | cmd> <escaped payload...> 0xC0
//! ```

use bytes::{BufMut, BytesMut};
use tracing::{trace, warn};

/// Frame delimiter.
pub const FEND: u8 = 0xC0;

/// Escape introducer.
pub const FESC: u8 = 0xDB;

/// Escaped `FEND` (follows `FESC`).
pub const TFEND: u8 = 0xDC;

/// Escaped `FESC` (follows `FESC`).
pub const TFESC: u8 = 0xDD;

/// Data frame: the payload is a raw AX.25 frame.
pub const CMD_DATA: u8 = 0x00;
/// Transmitter keyup delay, in 10 ms units.
pub const CMD_TXDELAY: u8 = 0x01;
/// Persistence parameter for p-persistent CSMA.
pub const CMD_PERSISTENCE: u8 = 0x02;
/// Slot interval, in 10 ms units.
pub const CMD_SLOTTIME: u8 = 0x03;
/// Time to hold the transmitter after the frame, in 10 ms units.
pub const CMD_TXTAIL: u8 = 0x04;
/// Full duplex on (non-zero) or off.
pub const CMD_FULLDUPLEX: u8 = 0x05;
/// Hardware-specific setting.
pub const CMD_SETHARDWARE: u8 = 0x06;
/// Leave KISS mode. Always sent with port nibble `0xF`.
pub const CMD_RETURN: u8 = 0xFF;

/// Upper bound on an unescaped frame. Anything longer is line noise or a
/// missed `FEND`, and is discarded.
pub const MAX_FRAME_LEN: usize = 2048;

/// Wrap a raw AX.25 frame as a KISS data frame for `port`.
///
/// # Example
///
/// ```
/// use ax25link_transport::kiss::encode;
///
/// assert_eq!(encode(0, &[0x01, 0xC0]), vec![0xC0, 0x00, 0x01, 0xDB, 0xDC, 0xC0]);
/// ```
pub fn encode(port: u8, data: &[u8]) -> Vec<u8> {
    encode_command(port, CMD_DATA, data)
}

/// Build a KISS frame carrying `command` for `port`.
///
/// [`CMD_RETURN`] is emitted as the bare `0xFF` type byte regardless of
/// `port`.
pub fn encode_command(port: u8, command: u8, value: &[u8]) -> Vec<u8> {
    let type_byte = if command == CMD_RETURN {
        CMD_RETURN
    } else {
        ((port & 0x0F) << 4) | (command & 0x0F)
    };

    let mut buf = BytesMut::with_capacity(value.len() + value.len() / 8 + 3);
    buf.put_u8(FEND);
    buf.put_u8(type_byte);
    for &b in value {
        match b {
            FEND => buf.put_slice(&[FESC, TFEND]),
            FESC => buf.put_slice(&[FESC, TFESC]),
            _ => buf.put_u8(b),
        }
    }
    buf.put_u8(FEND);
    buf.to_vec()
}

/// One frame recovered from the KISS byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KissFrame {
    /// TNC port (high nibble of the type byte).
    pub port: u8,
    /// KISS command (low nibble of the type byte).
    pub command: u8,
    /// Unescaped payload.
    pub data: Vec<u8>,
}

impl KissFrame {
    /// Returns `true` if this frame carries an AX.25 frame.
    pub fn is_data(&self) -> bool {
        self.command == CMD_DATA
    }
}

/// Streaming KISS deframer.
///
/// Bytes may arrive split at arbitrary points; the decoder keeps partial
/// frames between calls to [`feed`](KissDecoder::feed). Bytes outside a
/// `FEND` pair are ignored.
#[derive(Debug, Default)]
pub struct KissDecoder {
    buf: BytesMut,
    in_frame: bool,
    escape: bool,
}

impl KissDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from the transport and return every frame completed
    /// by them, in arrival order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<KissFrame> {
        let mut frames = Vec::new();

        for &byte in bytes {
            if byte == FEND {
                if self.in_frame {
                    if let Some(frame) = self.take_frame() {
                        frames.push(frame);
                    }
                }
                // A closing FEND may double as the next opening FEND.
                self.in_frame = true;
                self.escape = false;
                continue;
            }

            if !self.in_frame {
                continue;
            }

            if self.escape {
                self.escape = false;
                match byte {
                    TFEND => self.buf.put_u8(FEND),
                    TFESC => self.buf.put_u8(FESC),
                    other => {
                        trace!(byte = other, "invalid KISS escape, passing through");
                        self.buf.put_u8(other);
                    }
                }
            } else if byte == FESC {
                self.escape = true;
            } else {
                self.buf.put_u8(byte);
            }

            if self.buf.len() > MAX_FRAME_LEN {
                warn!(len = self.buf.len(), "KISS frame overflow, discarding");
                self.buf.clear();
                self.in_frame = false;
                self.escape = false;
            }
        }

        frames
    }

    /// Number of buffered bytes belonging to an unfinished frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn take_frame(&mut self) -> Option<KissFrame> {
        if self.buf.is_empty() {
            return None;
        }
        let raw = self.buf.split();
        let type_byte = raw[0];
        let (port, command) = if type_byte == CMD_RETURN {
            (0x0F, CMD_RETURN)
        } else {
            (type_byte >> 4, type_byte & 0x0F)
        };
        Some(KissFrame {
            port,
            command,
            data: raw[1..].to_vec(),
        })
    }
}
