//! Control field table and codec.
//!
//! The control field identifies the frame type and carries the sequence
//! numbers and the poll/final bit. Its layout depends on the frame kind and,
//! for information and supervisory frames, on the sequence modulo:
//!
//! ```text
//! modulo 8, one byte                 modulo 128, two bytes
//! I:  N(R) N(R) N(R) P N(S) N(S) N(S) 0     N(S)x7 0 | N(R)x7 P
//! S:  N(R) N(R) N(R) P/F  S S 0 1           0 0 0 0 S S 0 1 | N(R)x7 P/F
//! U:  M M M P/F M M 1 1                     (always one byte)
//! ```
//!
//! [`CONTROL_FIELDS`] is the single source of truth for the static bit
//! patterns. Encoding looks a pattern up by frame type; decoding classifies
//! the low bits and then searches the entries of that kind.

use std::fmt;

use bytes::{BufMut, BytesMut};

use ax25link_core::error::{Error, Result};

use crate::bitfield::{bit, field, with_bit, with_field};

/// Broad frame category, selected by the low control bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// `..11`: link management and connectionless frames.
    Unnumbered,
    /// `..01`: acknowledgement and flow control.
    Supervisory,
    /// `...0`: sequenced data.
    Information,
}

/// Specific frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Sabm,
    Sabme,
    Disc,
    Dm,
    Ua,
    Frmr,
    Ui,
    Xid,
    Test,
    Rr,
    Rnr,
    Rej,
    Srej,
    I,
}

impl FrameType {
    /// The kind this frame type belongs to.
    pub fn kind(self) -> FrameKind {
        match self {
            FrameType::Sabm
            | FrameType::Sabme
            | FrameType::Disc
            | FrameType::Dm
            | FrameType::Ua
            | FrameType::Frmr
            | FrameType::Ui
            | FrameType::Xid
            | FrameType::Test => FrameKind::Unnumbered,
            FrameType::Rr | FrameType::Rnr | FrameType::Rej | FrameType::Srej => {
                FrameKind::Supervisory
            }
            FrameType::I => FrameKind::Information,
        }
    }

    /// Only information frames carry N(S).
    pub fn has_send_sequence(self) -> bool {
        self.kind() == FrameKind::Information
    }

    /// Information and supervisory frames carry N(R).
    pub fn has_received_sequence(self) -> bool {
        matches!(self.kind(), FrameKind::Information | FrameKind::Supervisory)
    }

    /// Information and UI frames carry a PID byte.
    pub fn has_pid(self) -> bool {
        matches!(self, FrameType::I | FrameType::Ui)
    }

    /// Frame types with an information field.
    pub fn allows_payload(self) -> bool {
        matches!(
            self,
            FrameType::I | FrameType::Ui | FrameType::Test | FrameType::Xid | FrameType::Frmr
        )
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameType::Sabm => "SABM",
            FrameType::Sabme => "SABME",
            FrameType::Disc => "DISC",
            FrameType::Dm => "DM",
            FrameType::Ua => "UA",
            FrameType::Frmr => "FRMR",
            FrameType::Ui => "UI",
            FrameType::Xid => "XID",
            FrameType::Test => "TEST",
            FrameType::Rr => "RR",
            FrameType::Rnr => "RNR",
            FrameType::Rej => "REJ",
            FrameType::Srej => "SREJ",
            FrameType::I => "I",
        };
        f.write_str(name)
    }
}

/// Sequence number space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Modulo {
    /// Three-bit sequence numbers, one-byte control field.
    #[default]
    Eight,
    /// Seven-bit sequence numbers, two-byte control field for I/S frames.
    OneTwentyEight,
}

impl Modulo {
    /// Size of the sequence space.
    pub fn value(self) -> u8 {
        match self {
            Modulo::Eight => 8,
            Modulo::OneTwentyEight => 128,
        }
    }

    /// Largest usable window: `modulo - 1`.
    pub fn max_window(self) -> u8 {
        self.value() - 1
    }

    /// Control field length for frames of `kind`.
    pub fn control_len(self, kind: FrameKind) -> usize {
        match (self, kind) {
            (_, FrameKind::Unnumbered) | (Modulo::Eight, _) => 1,
            (Modulo::OneTwentyEight, _) => 2,
        }
    }

    /// `seq + 1`, wrapping at the modulo.
    pub fn next(self, seq: u8) -> u8 {
        self.add(seq, 1)
    }

    /// `seq + n`, wrapping at the modulo.
    pub fn add(self, seq: u8, n: u8) -> u8 {
        ((seq as u16 + n as u16) % self.value() as u16) as u8
    }

    /// Distance from `from` forward to `to`.
    pub fn distance(self, from: u8, to: u8) -> u8 {
        ((to as u16 + self.value() as u16 - from as u16) % self.value() as u16) as u8
    }
}

impl TryFrom<u8> for Modulo {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            8 => Ok(Modulo::Eight),
            128 => Ok(Modulo::OneTwentyEight),
            other => Err(Error::InvalidParameter(format!(
                "modulo must be 8 or 128, got {other}"
            ))),
        }
    }
}

/// Command/response status, derived from the C bits of the destination and
/// source addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandResponse {
    /// Destination C=1, source C=0.
    Command,
    /// Destination C=0, source C=1.
    Response,
    /// Both bits equal: AX.25 v1 frame without command/response semantics.
    Legacy,
}

impl CommandResponse {
    /// Derive from the destination and source C bits.
    pub fn from_bits(destination: bool, source: bool) -> Self {
        match (destination, source) {
            (true, false) => CommandResponse::Command,
            (false, true) => CommandResponse::Response,
            _ => CommandResponse::Legacy,
        }
    }

    /// The (destination, source) C bits to emit.
    pub fn to_bits(self) -> (bool, bool) {
        match self {
            CommandResponse::Command => (true, false),
            CommandResponse::Response => (false, true),
            CommandResponse::Legacy => (false, false),
        }
    }
}

/// One row of the control field table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFieldCombination {
    pub kind: FrameKind,
    pub frame_type: FrameType,
    /// First control byte with every variable bit (N(S), N(R), P/F) zero.
    pub pattern_one: u8,
    /// Second control byte for two-byte forms.
    pub pattern_two: Option<u8>,
    pub default_command_response: CommandResponse,
    pub default_poll_final: bool,
    pub modulo: Modulo,
}

const fn u_entry(
    frame_type: FrameType,
    pattern: u8,
    cr: CommandResponse,
    pf: bool,
    modulo: Modulo,
) -> ControlFieldCombination {
    ControlFieldCombination {
        kind: FrameKind::Unnumbered,
        frame_type,
        pattern_one: pattern,
        pattern_two: None,
        default_command_response: cr,
        default_poll_final: pf,
        modulo,
    }
}

const fn s_entry(frame_type: FrameType, pattern: u8, modulo: Modulo) -> ControlFieldCombination {
    ControlFieldCombination {
        kind: FrameKind::Supervisory,
        frame_type,
        pattern_one: pattern,
        pattern_two: match modulo {
            Modulo::Eight => None,
            Modulo::OneTwentyEight => Some(0x00),
        },
        default_command_response: CommandResponse::Response,
        default_poll_final: false,
        modulo,
    }
}

const fn i_entry(modulo: Modulo) -> ControlFieldCombination {
    ControlFieldCombination {
        kind: FrameKind::Information,
        frame_type: FrameType::I,
        pattern_one: 0x00,
        pattern_two: match modulo {
            Modulo::Eight => None,
            Modulo::OneTwentyEight => Some(0x00),
        },
        default_command_response: CommandResponse::Command,
        default_poll_final: false,
        modulo,
    }
}

use CommandResponse::{Command, Response};
use Modulo::{Eight, OneTwentyEight};

/// Every legal control field combination.
///
/// Unnumbered frames are listed once at modulo 8 (their encoding does not
/// depend on the modulo) except SABME, which only exists with extended
/// sequencing.
pub static CONTROL_FIELDS: [ControlFieldCombination; 19] = [
    u_entry(FrameType::Sabm, 0x2F, Command, true, Eight),
    u_entry(FrameType::Sabme, 0x6F, Command, true, OneTwentyEight),
    u_entry(FrameType::Disc, 0x43, Command, true, Eight),
    u_entry(FrameType::Dm, 0x0F, Response, true, Eight),
    u_entry(FrameType::Ua, 0x63, Response, true, Eight),
    u_entry(FrameType::Frmr, 0x87, Response, true, Eight),
    u_entry(FrameType::Ui, 0x03, Command, false, Eight),
    u_entry(FrameType::Xid, 0xAF, Command, true, Eight),
    u_entry(FrameType::Test, 0xE3, Command, true, Eight),
    s_entry(FrameType::Rr, 0x01, Eight),
    s_entry(FrameType::Rnr, 0x05, Eight),
    s_entry(FrameType::Rej, 0x09, Eight),
    s_entry(FrameType::Srej, 0x0D, Eight),
    s_entry(FrameType::Rr, 0x01, OneTwentyEight),
    s_entry(FrameType::Rnr, 0x05, OneTwentyEight),
    s_entry(FrameType::Rej, 0x09, OneTwentyEight),
    s_entry(FrameType::Srej, 0x0D, OneTwentyEight),
    i_entry(Eight),
    i_entry(OneTwentyEight),
];

const POLL_FINAL_BIT: u8 = 4;
/// Bits of an unnumbered control byte that identify the type.
const U_TYPE_MASK: u8 = 0xEF;
/// Bits of a supervisory control byte that identify the type.
const S_TYPE_MASK: u8 = 0x0F;

/// Look up the table row for `frame_type` at `modulo`.
///
/// Unnumbered frames normalize to modulo 8; SABME at modulo 8 has no row.
pub fn lookup(frame_type: FrameType, modulo: Modulo) -> Result<&'static ControlFieldCombination> {
    CONTROL_FIELDS
        .iter()
        .find(|entry| {
            entry.frame_type == frame_type
                && (entry.modulo == modulo
                    || (entry.kind == FrameKind::Unnumbered && entry.modulo == Modulo::Eight))
        })
        .ok_or_else(|| {
            Error::UnsupportedCombination(format!("{frame_type} at modulo {}", modulo.value()))
        })
}

/// Static bit pattern for `frame_type` at `modulo`.
pub fn encode_pattern(frame_type: FrameType, modulo: Modulo) -> Result<(u8, Option<u8>)> {
    let entry = lookup(frame_type, modulo)?;
    Ok((entry.pattern_one, entry.pattern_two))
}

/// Classify a control field into its table row.
///
/// `bytes` starts at the control field and may run on into the rest of the
/// frame; only the first one or two bytes are inspected.
pub fn classify(bytes: &[u8], modulo: Modulo) -> Result<&'static ControlFieldCombination> {
    let first = *bytes.first().ok_or(Error::Truncated)?;
    let kind = match first & 0x03 {
        0b11 => FrameKind::Unnumbered,
        0b01 => FrameKind::Supervisory,
        _ => FrameKind::Information,
    };
    if modulo.control_len(kind) > bytes.len() {
        return Err(Error::Truncated);
    }

    let found = CONTROL_FIELDS.iter().find(|entry| {
        if entry.kind != kind {
            return false;
        }
        match kind {
            FrameKind::Unnumbered => first & U_TYPE_MASK == entry.pattern_one,
            FrameKind::Supervisory => {
                entry.modulo == modulo && first & S_TYPE_MASK == entry.pattern_one
            }
            FrameKind::Information => entry.modulo == modulo,
        }
    });
    found.ok_or(Error::UnknownControlField(first))
}

/// Resolve the kind and type of a control field.
pub fn decode_pattern(bytes: &[u8], modulo: Modulo) -> Result<(FrameKind, FrameType)> {
    classify(bytes, modulo).map(|entry| (entry.kind, entry.frame_type))
}

/// A fully decoded control field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Control {
    pub frame_type: FrameType,
    pub modulo: Modulo,
    pub poll_final: bool,
    pub send_sequence: Option<u8>,
    pub received_sequence: Option<u8>,
}

impl Control {
    /// Number of bytes this control field occupies.
    pub fn len(&self) -> usize {
        self.modulo.control_len(self.frame_type.kind())
    }

    /// Always `false`; a control field is never empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Append the encoded control field to `out`.
    pub fn encode(&self, out: &mut BytesMut) -> Result<()> {
        let entry = lookup(self.frame_type, self.modulo)?;
        let ns = self.sequence(self.send_sequence, self.frame_type.has_send_sequence(), "N(S)")?;
        let nr = self.sequence(
            self.received_sequence,
            self.frame_type.has_received_sequence(),
            "N(R)",
        )?;

        let mut first = entry.pattern_one;
        match (entry.kind, self.modulo) {
            (FrameKind::Unnumbered, _) => {
                first = with_bit(first, POLL_FINAL_BIT, self.poll_final);
                out.put_u8(first);
            }
            (FrameKind::Supervisory, Modulo::Eight) => {
                first = with_field(first, 5, 3, nr);
                first = with_bit(first, POLL_FINAL_BIT, self.poll_final);
                out.put_u8(first);
            }
            (FrameKind::Information, Modulo::Eight) => {
                first = with_field(first, 5, 3, nr);
                first = with_bit(first, POLL_FINAL_BIT, self.poll_final);
                first = with_field(first, 1, 3, ns);
                out.put_u8(first);
            }
            (FrameKind::Supervisory, Modulo::OneTwentyEight) => {
                let second = with_field(entry.pattern_two.unwrap_or(0), 1, 7, nr);
                out.put_u8(first);
                out.put_u8(with_bit(second, 0, self.poll_final));
            }
            (FrameKind::Information, Modulo::OneTwentyEight) => {
                first = with_field(first, 1, 7, ns);
                let second = with_field(entry.pattern_two.unwrap_or(0), 1, 7, nr);
                out.put_u8(first);
                out.put_u8(with_bit(second, 0, self.poll_final));
            }
        }
        Ok(())
    }

    /// Decode the control field at the start of `bytes`.
    pub fn decode(bytes: &[u8], modulo: Modulo) -> Result<Self> {
        let entry = classify(bytes, modulo)?;
        let first = bytes[0];
        let (poll_final, ns, nr) = match (entry.kind, modulo) {
            (FrameKind::Unnumbered, _) => (bit(first, POLL_FINAL_BIT), None, None),
            (FrameKind::Supervisory, Modulo::Eight) => {
                (bit(first, POLL_FINAL_BIT), None, Some(field(first, 5, 3)))
            }
            (FrameKind::Information, Modulo::Eight) => (
                bit(first, POLL_FINAL_BIT),
                Some(field(first, 1, 3)),
                Some(field(first, 5, 3)),
            ),
            (FrameKind::Supervisory, Modulo::OneTwentyEight) => {
                (bit(bytes[1], 0), None, Some(field(bytes[1], 1, 7)))
            }
            (FrameKind::Information, Modulo::OneTwentyEight) => (
                bit(bytes[1], 0),
                Some(field(first, 1, 7)),
                Some(field(bytes[1], 1, 7)),
            ),
        };
        Ok(Self {
            frame_type: entry.frame_type,
            // Unnumbered frames are modulo-agnostic; report the table's view.
            modulo: if entry.kind == FrameKind::Unnumbered {
                entry.modulo
            } else {
                modulo
            },
            poll_final,
            send_sequence: ns,
            received_sequence: nr,
        })
    }

    fn sequence(&self, value: Option<u8>, required: bool, name: &str) -> Result<u8> {
        if !required {
            return Ok(0);
        }
        let value = value.ok_or_else(|| {
            Error::InvalidParameter(format!("{} frame requires {name}", self.frame_type))
        })?;
        if value >= self.modulo.value() {
            return Err(Error::InvalidParameter(format!(
                "{name} {value} out of range for modulo {}",
                self.modulo.value()
            )));
        }
        Ok(value)
    }
}
