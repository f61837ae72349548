//! AX.25 address field codec.
//!
//! Every address block is seven bytes: six callsign characters, each
//! shifted left by one bit and padded with shifted spaces, followed by the
//! SSID byte:
//!
//! ```text
//!  bit   7      6     5     4 3 2 1    0
//!       C/H    R1    R2      SSID     final
//! ```
//!
//! - `C/H`: command/response bit on destination and source, has-been-repeated
//!   bit on repeater addresses.
//! - `R1`, `R2`: reserved bits, inverted on the wire (`0` = in use). On the
//!   source address `R1` flags extended (modulo 128) sequencing.
//! - `final`: set only on the last address of the header.

use std::fmt;
use std::str::FromStr;

use ax25link_core::error::{Error, Result};

use crate::bitfield::{bit, field, with_bit, with_field};

/// Encoded length of one address block.
pub const ADDRESS_LEN: usize = 7;

/// Maximum callsign length.
pub const MAX_CALLSIGN_LEN: usize = 6;

/// Highest legal SSID.
pub const MAX_SSID: u8 = 15;

/// A space, pre-shifted into address position.
const PAD: u8 = b' ' << 1;

const BIT_COMMAND: u8 = 7;
const BIT_RESERVED_ONE: u8 = 6;
const BIT_RESERVED_TWO: u8 = 5;
const SSID_SHIFT: u8 = 1;
const SSID_WIDTH: u8 = 4;
const BIT_FINAL: u8 = 0;

/// One destination, source, or repeater address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    callsign: String,
    ssid: u8,
    command_or_repeated: bool,
    reserved_bit_one: bool,
    reserved_bit_two: bool,
    is_final: bool,
}

impl Address {
    /// Build an address from a callsign and SSID.
    ///
    /// The callsign is trimmed and uppercased. It must be 1-6 ASCII letters
    /// or digits.
    ///
    /// # Example
    ///
    /// ```
    /// use ax25link_protocol::Address;
    ///
    /// let addr = Address::new("n0call", 12).unwrap();
    /// assert_eq!(addr.callsign(), "N0CALL");
    /// assert_eq!(addr.to_string(), "N0CALL-12");
    /// ```
    pub fn new(callsign: &str, ssid: u8) -> Result<Self> {
        let callsign = callsign.trim().to_ascii_uppercase();
        if callsign.is_empty()
            || callsign.len() > MAX_CALLSIGN_LEN
            || !callsign.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return Err(Error::InvalidCallsign(callsign));
        }
        if ssid > MAX_SSID {
            return Err(Error::InvalidSsid(ssid));
        }
        Ok(Self {
            callsign,
            ssid,
            command_or_repeated: false,
            reserved_bit_one: false,
            reserved_bit_two: false,
            is_final: false,
        })
    }

    /// The callsign without padding.
    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    /// The secondary station identifier, `0..=15`.
    pub fn ssid(&self) -> u8 {
        self.ssid
    }

    /// Bit 7 of the SSID byte.
    pub fn command_or_repeated(&self) -> bool {
        self.command_or_repeated
    }

    /// Alias of [`command_or_repeated`](Self::command_or_repeated) for
    /// repeater addresses.
    pub fn has_been_repeated(&self) -> bool {
        self.command_or_repeated
    }

    /// First reserved bit, as a logical "in use" flag.
    pub fn reserved_bit_one(&self) -> bool {
        self.reserved_bit_one
    }

    /// Second reserved bit, as a logical "in use" flag.
    pub fn reserved_bit_two(&self) -> bool {
        self.reserved_bit_two
    }

    /// Whether this was the last address of a decoded header.
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// Returns the address with bit 7 set to `value`.
    pub fn with_command_or_repeated(mut self, value: bool) -> Self {
        self.command_or_repeated = value;
        self
    }

    /// Returns the address with both reserved flags replaced.
    pub fn with_reserved(mut self, one: bool, two: bool) -> Self {
        self.reserved_bit_one = one;
        self.reserved_bit_two = two;
        self
    }

    /// The same station with every per-frame flag cleared.
    ///
    /// Two addresses name the same station exactly when their plain forms
    /// are equal.
    pub fn plain(&self) -> Self {
        Self {
            callsign: self.callsign.clone(),
            ssid: self.ssid,
            command_or_repeated: false,
            reserved_bit_one: false,
            reserved_bit_two: false,
            is_final: false,
        }
    }

    /// Returns `true` if both addresses name the same station.
    pub fn same_station(&self, other: &Address) -> bool {
        self.ssid == other.ssid && self.callsign == other.callsign
    }

    /// Encode into the seven-byte wire form.
    ///
    /// `is_final` marks the last address of the header.
    pub fn encode(&self, is_final: bool) -> [u8; ADDRESS_LEN] {
        let mut out = [PAD; ADDRESS_LEN];
        for (slot, ch) in out.iter_mut().zip(self.callsign.bytes()) {
            *slot = ch << 1;
        }

        let mut ssid_byte = 0u8;
        ssid_byte = with_bit(ssid_byte, BIT_COMMAND, self.command_or_repeated);
        ssid_byte = with_bit(ssid_byte, BIT_RESERVED_ONE, !self.reserved_bit_one);
        ssid_byte = with_bit(ssid_byte, BIT_RESERVED_TWO, !self.reserved_bit_two);
        ssid_byte = with_field(ssid_byte, SSID_SHIFT, SSID_WIDTH, self.ssid);
        ssid_byte = with_bit(ssid_byte, BIT_FINAL, is_final);
        out[ADDRESS_LEN - 1] = ssid_byte;
        out
    }

    /// Decode one address block.
    ///
    /// The callsign ends at the first character that unshifts to NUL or
    /// space. Decoding is lenient about the characters themselves so that
    /// nonconforming stations can still be heard.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ADDRESS_LEN {
            return Err(Error::Truncated);
        }

        let callsign: String = bytes[..MAX_CALLSIGN_LEN]
            .iter()
            .map(|&b| b >> 1)
            .take_while(|&c| c != 0x00 && c != b' ')
            .map(char::from)
            .collect();
        if callsign.is_empty() {
            return Err(Error::InvalidCallsign(callsign));
        }

        let ssid_byte = bytes[ADDRESS_LEN - 1];
        Ok(Self {
            callsign,
            ssid: field(ssid_byte, SSID_SHIFT, SSID_WIDTH),
            command_or_repeated: bit(ssid_byte, BIT_COMMAND),
            reserved_bit_one: !bit(ssid_byte, BIT_RESERVED_ONE),
            reserved_bit_two: !bit(ssid_byte, BIT_RESERVED_TWO),
            is_final: bit(ssid_byte, BIT_FINAL),
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ssid == 0 {
            write!(f, "{}", self.callsign)
        } else {
            write!(f, "{}-{}", self.callsign, self.ssid)
        }
    }
}

impl FromStr for Address {
    type Err = Error;

    /// Parse `CALL` or `CALL-SSID`. A trailing `*` marks a repeater that
    /// has already relayed the frame.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (s, repeated) = match s.strip_suffix('*') {
            Some(rest) => (rest, true),
            None => (s, false),
        };
        let (call, ssid) = match s.split_once('-') {
            Some((call, ssid)) => {
                let ssid = ssid
                    .parse::<u8>()
                    .map_err(|_| Error::InvalidParameter(format!("bad SSID in {s:?}")))?;
                (call, ssid)
            }
            None => (s, 0),
        };
        Ok(Address::new(call, ssid)?.with_command_or_repeated(repeated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_normalizes_callsign() {
        let addr = Address::new("  ko4lcm ", 15).unwrap();
        assert_eq!(addr.callsign(), "KO4LCM");
        assert_eq!(addr.ssid(), 15);
    }

    #[test]
    fn new_rejects_bad_callsigns() {
        assert!(matches!(Address::new("", 0), Err(Error::InvalidCallsign(_))));
        assert!(matches!(
            Address::new("TOOLONG", 0),
            Err(Error::InvalidCallsign(_))
        ));
        assert!(matches!(
            Address::new("N0-CA", 0),
            Err(Error::InvalidCallsign(_))
        ));
    }

    #[test]
    fn new_rejects_ssid_above_15() {
        assert!(matches!(Address::new("N0CALL", 16), Err(Error::InvalidSsid(16))));
    }

    #[test]
    fn encode_pads_and_shifts() {
        let addr = Address::new("N0CALL", 12).unwrap();
        let bytes = addr.encode(false);
        assert_eq!(
            &bytes[..6],
            &[b'N' << 1, b'0' << 1, b'C' << 1, b'A' << 1, b'L' << 1, b'L' << 1]
        );
        // Reserved bits unused (1), SSID 12, not final.
        assert_eq!(bytes[6], 0b0111_1000);

        let short = Address::new("AB1", 0).unwrap().encode(true);
        assert_eq!(&short[3..6], &[0x40, 0x40, 0x40]);
        assert_eq!(short[6], 0b0110_0001);
    }

    #[test]
    fn reserved_bits_are_inverted_on_the_wire() {
        let addr = Address::new("N0CALL", 0).unwrap().with_reserved(true, false);
        let bytes = addr.encode(false);
        assert!(!bit(bytes[6], 6));
        assert!(bit(bytes[6], 5));

        let decoded = Address::decode(&bytes).unwrap();
        assert!(decoded.reserved_bit_one());
        assert!(!decoded.reserved_bit_two());
    }

    #[test]
    fn command_bit_is_bit_seven() {
        let bytes = Address::new("WH6CMO", 10)
            .unwrap()
            .with_command_or_repeated(true)
            .encode(true);
        assert_eq!(bytes[6], 0b1111_0101);
        let decoded = Address::decode(&bytes).unwrap();
        assert!(decoded.has_been_repeated());
        assert!(decoded.is_final());
        assert_eq!(decoded.ssid(), 10);
    }

    #[test]
    fn decode_stops_at_padding() {
        let bytes = Address::new("K1A", 3).unwrap().encode(false);
        let decoded = Address::decode(&bytes).unwrap();
        assert_eq!(decoded.callsign(), "K1A");
        assert_eq!(decoded.ssid(), 3);
        assert!(!decoded.is_final());
    }

    #[test]
    fn decode_rejects_short_and_empty() {
        assert!(matches!(Address::decode(&[0x40; 6]), Err(Error::Truncated)));
        assert!(matches!(
            Address::decode(&[0x40, 0x40, 0x40, 0x40, 0x40, 0x40, 0x60]),
            Err(Error::InvalidCallsign(_))
        ));
    }

    #[test]
    fn parse_and_display() {
        let addr: Address = "ko4lcm-15".parse().unwrap();
        assert_eq!(addr.to_string(), "KO4LCM-15");
        let addr: Address = "WIDE1-1*".parse().unwrap();
        assert!(addr.has_been_repeated());
        let addr: Address = "N0CALL".parse().unwrap();
        assert_eq!(addr.ssid(), 0);
        assert_eq!(addr.to_string(), "N0CALL");
        assert!("N0CALL-x".parse::<Address>().is_err());
        assert!(matches!(
            "N0CALL-16".parse::<Address>(),
            Err(Error::InvalidSsid(16))
        ));
    }

    #[test]
    fn plain_clears_flags() {
        let a = Address::new("N0CALL", 1)
            .unwrap()
            .with_command_or_repeated(true)
            .with_reserved(true, true);
        let b = Address::new("N0CALL", 1).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.plain(), b);
        assert!(a.same_station(&b));
    }
}
