//! CRC-16/XMODEM (CCITT), the checksum used over both the on-air frame and
//! the persisted config record (`spec.md` §4.C).

use crc::{Crc, CRC_16_XMODEM};

const CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Computes the CRC-16/XMODEM checksum of `data`.
pub fn checksum(data: &[u8]) -> u16 {
    CRC.checksum(data)
}

/// Returns whether `data`'s checksum matches `expected`.
pub fn verify(data: &[u8], expected: u16) -> bool {
    checksum(data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(checksum(&[]), 0x0000);
    }

    #[test]
    fn verify_matches_checksum() {
        let data = b"ping";
        let sum = checksum(data);
        assert!(verify(data, sum));
        assert!(!verify(data, sum ^ 1));
    }
}
