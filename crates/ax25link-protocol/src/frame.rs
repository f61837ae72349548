//! AX.25 frame codec.
//!
//! A [`Frame`] is immutable. Outbound frames are assembled with
//! [`FrameBuilder`], which validates every field, encodes once, and parses
//! its own output so that a built frame and the same bytes decoded off the
//! air compare equal. Inbound frames come from [`Frame::decode`] with every
//! field resolved up front.
//!
//! Wire layout after KISS unwrapping:
//!
//! ```text
//! dest(7) | source(7) | repeater(7) * n | control(1-2) | [pid(1)] | [info...]
//! ```

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use ax25link_core::error::{Error, Result};

use crate::address::{Address, ADDRESS_LEN};
use crate::control::{lookup, CommandResponse, Control, FrameKind, FrameType, Modulo};

/// Smallest pre-KISS frame: two addresses and a one-byte control field.
///
/// The 136-bit AX.25 minimum includes the 16-bit FCS appended by the TNC,
/// which never reaches this layer.
pub const MIN_FRAME_LEN: usize = 2 * ADDRESS_LEN + 1;

/// PID for "no layer 3 protocol".
pub const DEFAULT_PID: u8 = 0xF0;

/// PID escape value reserved by AX.25.
pub const PID_ESCAPE: u8 = 0xFF;

/// Default ceiling on decoded repeater addresses. Strict AX.25 2.2 allows 2.
pub const DEFAULT_MAX_REPEATERS: usize = 8;

/// XID information field sent by this station (AX.25 2.2 §4.3.3.7).
///
/// ```text
/// 82 80 00 17     format indicator, group id, group length 23
/// 02 02 00 21     classes of procedure: balanced ABM, half duplex
/// 03 03 86 A8 02  HDLC optional functions: REJ, SREJ, extended addr,
///                 modulo 8/128, TEST, 16-bit FCS, synchronous TX
/// 06 02 08 00     I field length RX: 2048 bits
/// 08 01 07        window size RX: 7
/// 09 02 0B B8     acknowledge timer: 3000 ms
/// 0A 01 03        retries: 3
/// ```
pub const XID_PARAMETERS: [u8; 27] = [
    0x82, 0x80, 0x00, 0x17, //
    0x02, 0x02, 0x00, 0x21, //
    0x03, 0x03, 0x86, 0xA8, 0x02, //
    0x06, 0x02, 0x08, 0x00, //
    0x08, 0x01, 0x07, //
    0x09, 0x02, 0x0B, 0xB8, //
    0x0A, 0x01, 0x03,
];

const FEND: u8 = 0xC0;
const KISS_DATA: u8 = 0x00;

/// One AX.25 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    destination: Address,
    source: Address,
    repeaters: Vec<Address>,
    control: Control,
    command_response: CommandResponse,
    pid: Option<u8>,
    payload: Bytes,
    raw: Bytes,
}

impl Frame {
    /// Start building a frame of `frame_type`.
    pub fn builder(frame_type: FrameType) -> FrameBuilder {
        FrameBuilder::new(frame_type)
    }

    /// Decode a frame, inferring the modulo from the source address.
    ///
    /// Accepts bytes with or without a leading KISS marker (`C0 00`, `C0`,
    /// or the `00` data command byte). A trailing `C0` is removed when the
    /// frame opened with one.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::decode_with(bytes, None, DEFAULT_MAX_REPEATERS)
    }

    /// Decode a frame.
    ///
    /// `modulo` overrides the extended-sequencing flag of the source
    /// address; sessions pass the modulo they negotiated. At most
    /// `max_repeaters` repeater addresses are accepted.
    pub fn decode_with(bytes: &[u8], modulo: Option<Modulo>, max_repeaters: usize) -> Result<Self> {
        let bytes = strip_kiss(bytes);
        ensure_min_length(bytes.len())?;
        let raw = Bytes::copy_from_slice(bytes);

        let destination = Address::decode(&raw[..ADDRESS_LEN])?;
        let source = Address::decode(&raw[ADDRESS_LEN..2 * ADDRESS_LEN])?;

        let mut offset = 2 * ADDRESS_LEN;
        let mut repeaters = Vec::new();
        let mut last_final = source.is_final();
        while !last_final {
            if repeaters.len() >= max_repeaters {
                return Err(Error::TooManyRepeaters(max_repeaters));
            }
            let end = offset + ADDRESS_LEN;
            if end > raw.len() {
                return Err(Error::Truncated);
            }
            let repeater = Address::decode(&raw[offset..end])?;
            last_final = repeater.is_final();
            repeaters.push(repeater);
            offset = end;
        }

        let modulo = modulo.unwrap_or(if source.reserved_bit_one() {
            Modulo::OneTwentyEight
        } else {
            Modulo::Eight
        });
        let control = Control::decode(&raw[offset..], modulo)?;
        offset += control.len();

        let pid = if control.frame_type.has_pid() {
            let pid = *raw.get(offset).ok_or(Error::Truncated)?;
            offset += 1;
            Some(pid)
        } else {
            None
        };

        let payload = if control.frame_type.allows_payload() {
            raw.slice(offset..)
        } else {
            Bytes::new()
        };

        let command_response = CommandResponse::from_bits(
            destination.command_or_repeated(),
            source.command_or_repeated(),
        );

        Ok(Self {
            destination,
            source,
            repeaters,
            control,
            command_response,
            pid,
            payload,
            raw,
        })
    }

    /// Destination and source of an encoded frame, without decoding the
    /// rest. Used to pick a decode modulo before the control field is read.
    pub fn stations(bytes: &[u8]) -> Result<(Address, Address)> {
        let bytes = strip_kiss(bytes);
        if bytes.len() < 2 * ADDRESS_LEN {
            return Err(Error::Truncated);
        }
        Ok((
            Address::decode(&bytes[..ADDRESS_LEN])?,
            Address::decode(&bytes[ADDRESS_LEN..2 * ADDRESS_LEN])?,
        ))
    }

    pub fn destination(&self) -> &Address {
        &self.destination
    }

    pub fn source(&self) -> &Address {
        &self.source
    }

    /// Repeater path in transmission order.
    pub fn repeaters(&self) -> &[Address] {
        &self.repeaters
    }

    pub fn kind(&self) -> FrameKind {
        self.control.frame_type.kind()
    }

    pub fn frame_type(&self) -> FrameType {
        self.control.frame_type
    }

    /// Sequence modulo. Unnumbered frames report 8 except SABME.
    pub fn modulo(&self) -> Modulo {
        self.control.modulo
    }

    pub fn control(&self) -> &Control {
        &self.control
    }

    pub fn command_response(&self) -> CommandResponse {
        self.command_response
    }

    pub fn is_command(&self) -> bool {
        self.command_response == CommandResponse::Command
    }

    pub fn is_response(&self) -> bool {
        self.command_response == CommandResponse::Response
    }

    pub fn poll_final(&self) -> bool {
        self.control.poll_final
    }

    /// N(S), present on information frames.
    pub fn send_sequence(&self) -> Option<u8> {
        self.control.send_sequence
    }

    /// N(R), present on information and supervisory frames.
    pub fn received_sequence(&self) -> Option<u8> {
        self.control.received_sequence
    }

    /// PID, present on I and UI frames.
    pub fn pid(&self) -> Option<u8> {
        self.pid
    }

    /// Information field. Empty for frame types without one.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The encoded frame, without KISS framing.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// The encoded frame as a cheaply cloneable buffer.
    pub fn encode(&self) -> Bytes {
        self.raw.clone()
    }

    /// Returns `true` if this frame travels from `remote` to `local`.
    pub fn is_between(&self, local: &Address, remote: &Address) -> bool {
        self.destination.same_station(local) && self.source.same_station(remote)
    }

    /// Start a response to this frame: addresses swapped, repeater path
    /// reversed with the has-been-repeated flags cleared, same modulo,
    /// response bits set, and the poll bit echoed as final.
    ///
    /// ```
    /// use ax25link_protocol::{Address, Frame, FrameType};
    ///
    /// let sabm = Frame::builder(FrameType::Sabm)
    ///     .destination(Address::new("N0CALL", 1).unwrap())
    ///     .source(Address::new("KO4LCM", 2).unwrap())
    ///     .build()
    ///     .unwrap();
    /// let ua = sabm.reply(FrameType::Ua).build().unwrap();
    /// assert_eq!(ua.destination().callsign(), "KO4LCM");
    /// assert!(ua.is_response() && ua.poll_final());
    /// ```
    pub fn reply(&self, frame_type: FrameType) -> FrameBuilder {
        FrameBuilder::new(frame_type)
            .destination(self.source.plain())
            .source(self.destination.plain())
            .repeaters(self.repeaters.iter().rev().map(Address::plain))
            .modulo(self.modulo())
            .command_response(CommandResponse::Response)
            .poll_final(self.poll_final())
    }
}

impl fmt::Display for Frame {
    /// Monitor-style one-line summary, e.g.
    /// `N0CALL-12>KO4LCM-15,WH6CMO-10*: <UI C> HELLO`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}>{}", self.source, self.destination)?;
        for repeater in &self.repeaters {
            write!(f, ",{repeater}")?;
            if repeater.has_been_repeated() {
                f.write_str("*")?;
            }
        }
        write!(f, ": <{}", self.frame_type())?;
        match self.command_response {
            CommandResponse::Command => f.write_str(" C")?,
            CommandResponse::Response => f.write_str(" R")?,
            CommandResponse::Legacy => {}
        }
        if self.poll_final() {
            f.write_str(if self.is_response() { " F" } else { " P" })?;
        }
        if let Some(ns) = self.send_sequence() {
            write!(f, " S{ns}")?;
        }
        if let Some(nr) = self.received_sequence() {
            write!(f, " R{nr}")?;
        }
        f.write_str(">")?;
        if !self.payload.is_empty() {
            write!(f, " {}", String::from_utf8_lossy(&self.payload).trim_end())?;
        }
        Ok(())
    }
}

/// Builder for outbound frames.
///
/// Defaults come from the control field table: command/response and
/// poll/final follow the frame type, PID is [`DEFAULT_PID`], sequence
/// numbers are zero, and modulo is 8.
///
/// # Example
///
/// ```
/// use ax25link_protocol::{Address, Frame, FrameType};
///
/// let frame = Frame::builder(FrameType::Ui)
///     .destination("APRS".parse().unwrap())
///     .source(Address::new("N0CALL", 7).unwrap())
///     .payload("hello")
///     .build()
///     .unwrap();
/// assert_eq!(frame.pid(), Some(0xF0));
/// ```
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    frame_type: FrameType,
    destination: Option<Address>,
    source: Option<Address>,
    repeaters: Vec<Address>,
    modulo: Modulo,
    command_response: Option<CommandResponse>,
    poll_final: Option<bool>,
    send_sequence: u8,
    received_sequence: u8,
    pid: u8,
    payload: Vec<u8>,
}

impl FrameBuilder {
    pub fn new(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            destination: None,
            source: None,
            repeaters: Vec::new(),
            modulo: Modulo::Eight,
            command_response: None,
            poll_final: None,
            send_sequence: 0,
            received_sequence: 0,
            pid: DEFAULT_PID,
            payload: Vec::new(),
        }
    }

    pub fn destination(mut self, address: Address) -> Self {
        self.destination = Some(address);
        self
    }

    pub fn source(mut self, address: Address) -> Self {
        self.source = Some(address);
        self
    }

    /// Append one repeater to the path.
    pub fn repeater(mut self, address: Address) -> Self {
        self.repeaters.push(address);
        self
    }

    /// Replace the repeater path.
    pub fn repeaters(mut self, path: impl IntoIterator<Item = Address>) -> Self {
        self.repeaters = path.into_iter().collect();
        self
    }

    pub fn modulo(mut self, modulo: Modulo) -> Self {
        self.modulo = modulo;
        self
    }

    pub fn command_response(mut self, value: CommandResponse) -> Self {
        self.command_response = Some(value);
        self
    }

    pub fn poll_final(mut self, value: bool) -> Self {
        self.poll_final = Some(value);
        self
    }

    pub fn send_sequence(mut self, ns: u8) -> Self {
        self.send_sequence = ns;
        self
    }

    pub fn received_sequence(mut self, nr: u8) -> Self {
        self.received_sequence = nr;
        self
    }

    pub fn pid(mut self, pid: u8) -> Self {
        self.pid = pid;
        self
    }

    /// Information field. Ignored for XID, which always carries
    /// [`XID_PARAMETERS`].
    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Validate, encode, and seal the frame.
    pub fn build(self) -> Result<Frame> {
        let destination = self
            .destination
            .ok_or_else(|| Error::InvalidParameter("frame has no destination".into()))?;
        let source = self
            .source
            .ok_or_else(|| Error::InvalidParameter("frame has no source".into()))?;

        let entry = lookup(self.frame_type, self.modulo)?;
        let frame_type = self.frame_type;

        if frame_type.has_pid() && self.pid == PID_ESCAPE {
            return Err(Error::InvalidPid(self.pid));
        }
        let payload: &[u8] = match frame_type {
            FrameType::Xid => &XID_PARAMETERS,
            _ if frame_type.allows_payload() => &self.payload,
            _ if self.payload.is_empty() => &[],
            _ => {
                return Err(Error::InvalidParameter(format!(
                    "{frame_type} frames carry no information field"
                )))
            }
        };

        let command_response = self
            .command_response
            .unwrap_or(entry.default_command_response);
        let (dest_bit, source_bit) = command_response.to_bits();
        let extended = entry.kind != FrameKind::Unnumbered && self.modulo == Modulo::OneTwentyEight;

        let control = Control {
            frame_type,
            modulo: entry.modulo,
            poll_final: self.poll_final.unwrap_or(entry.default_poll_final),
            send_sequence: frame_type.has_send_sequence().then_some(self.send_sequence),
            received_sequence: frame_type
                .has_received_sequence()
                .then_some(self.received_sequence),
        };

        let mut buf = BytesMut::with_capacity(
            ADDRESS_LEN * (2 + self.repeaters.len()) + control.len() + 1 + payload.len(),
        );
        buf.put_slice(&destination.plain().with_command_or_repeated(dest_bit).encode(false));
        buf.put_slice(
            &source
                .plain()
                .with_command_or_repeated(source_bit)
                .with_reserved(extended, false)
                .encode(self.repeaters.is_empty()),
        );
        let last = self.repeaters.len().saturating_sub(1);
        for (i, repeater) in self.repeaters.iter().enumerate() {
            let repeater = repeater
                .plain()
                .with_command_or_repeated(repeater.has_been_repeated());
            buf.put_slice(&repeater.encode(i == last));
        }
        control.encode(&mut buf)?;
        if frame_type.has_pid() {
            buf.put_u8(self.pid);
        }
        buf.put_slice(payload);

        ensure_min_length(buf.len())?;
        Frame::decode_with(&buf, Some(entry.modulo), self.repeaters.len())
    }
}

/// Fail with [`Error::FrameTooShort`] below [`MIN_FRAME_LEN`].
pub fn ensure_min_length(len: usize) -> Result<()> {
    if len < MIN_FRAME_LEN {
        return Err(Error::FrameTooShort(len));
    }
    Ok(())
}

fn strip_kiss(bytes: &[u8]) -> &[u8] {
    let (bytes, framed) = match bytes {
        [FEND, KISS_DATA, rest @ ..] => (rest, true),
        [FEND, rest @ ..] => (rest, true),
        [KISS_DATA, rest @ ..] => (rest, false),
        _ => (bytes, false),
    };
    match bytes {
        [rest @ .., FEND] if framed => rest,
        _ => bytes,
    }
}
