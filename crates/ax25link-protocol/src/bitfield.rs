//! Fixed-width bit fields inside a single byte.
//!
//! AX.25 packs several sub-fields into one octet (the SSID byte of an
//! address, the control byte of a frame). These helpers read and write them
//! by bit offset, counted from the least significant bit.

/// Returns `true` if bit `pos` of `byte` is set.
#[inline]
pub fn bit(byte: u8, pos: u8) -> bool {
    debug_assert!(pos < 8);
    byte & (1 << pos) != 0
}

/// Returns `byte` with bit `pos` set to `value`.
#[inline]
pub fn with_bit(byte: u8, pos: u8, value: bool) -> u8 {
    debug_assert!(pos < 8);
    if value {
        byte | (1 << pos)
    } else {
        byte & !(1 << pos)
    }
}

/// Extracts the `width`-bit field starting at bit `shift`.
#[inline]
pub fn field(byte: u8, shift: u8, width: u8) -> u8 {
    debug_assert!(width >= 1 && shift + width <= 8);
    (byte >> shift) & mask(width)
}

/// Returns `byte` with the `width`-bit field at `shift` replaced by `value`.
///
/// Bits of `value` beyond `width` are discarded.
#[inline]
pub fn with_field(byte: u8, shift: u8, width: u8, value: u8) -> u8 {
    debug_assert!(width >= 1 && shift + width <= 8);
    let m = mask(width) << shift;
    (byte & !m) | ((value << shift) & m)
}

#[inline]
fn mask(width: u8) -> u8 {
    if width >= 8 {
        0xFF
    } else {
        (1u8 << width) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_and_writes_single_bits() {
        assert!(bit(0b1000_0000, 7));
        assert!(!bit(0b1000_0000, 6));
        assert_eq!(with_bit(0, 7, true), 0x80);
        assert_eq!(with_bit(0xFF, 0, false), 0xFE);
    }

    #[test]
    fn ssid_nibble_field() {
        // SSID 12 with reserved bits unset and the final bit on.
        let byte = 0b0111_1001;
        assert_eq!(field(byte, 1, 4), 12);
        assert_eq!(with_field(0b0110_0000, 1, 4, 15), 0b0111_1110);
    }

    #[test]
    fn field_write_truncates_value() {
        assert_eq!(with_field(0, 5, 3, 0xFF), 0b1110_0000);
    }

    #[test]
    fn full_width_field() {
        assert_eq!(field(0xA5, 0, 8), 0xA5);
        assert_eq!(with_field(0x00, 0, 8, 0x5A), 0x5A);
    }
}
