//! On-air frame codec: pack and the byte-by-byte `Scanner` (`spec.md`
//! §3/§4.G).
//!
//! ```text
//! | H0 H1 | VER | FLAGS | SRC(2) | DST(2) | SEQ(2) | LEN(2) | PAYLOAD[LEN] | CRC16(2) | T0 T1 |
//! ```
//! CRC covers `VER..PAYLOAD` inclusive. A mismatching `VER`, a `LEN`
//! beyond the MTU, a failing CRC, or a bad trailer all revert the scanner
//! to `SeekH0` and drop only the current candidate frame.

use crate::config::wire::*;
use crate::crc16;
use heapless::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Data,
    Ack,
    Nak,
}

impl FrameKind {
    fn to_flags(self) -> u8 {
        match self {
            FrameKind::Data => FLAG_DATA,
            FrameKind::Ack => FLAG_ACK,
            FrameKind::Nak => FLAG_NAK,
        }
    }

    fn from_flags(flags: u8) -> Option<Self> {
        match flags {
            FLAG_DATA => Some(FrameKind::Data),
            FLAG_ACK => Some(FrameKind::Ack),
            FLAG_NAK => Some(FrameKind::Nak),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub src: u16,
    pub dst: u16,
    pub seq: u16,
    pub payload: Vec<u8, MTU>,
}

/// Packs `kind/src/dst/seq/payload` into the on-air byte layout, returning
/// the encoded frame. Fails only if `payload` exceeds the MTU.
pub fn pack(
    kind: FrameKind,
    src: u16,
    dst: u16,
    seq: u16,
    payload: &[u8],
) -> Option<Vec<u8, { MTU + FRAME_OVERHEAD }>> {
    if payload.len() > MTU {
        return None;
    }
    let mut out: Vec<u8, { MTU + FRAME_OVERHEAD }> = Vec::new();
    let _ = out.push(H0);
    let _ = out.push(H1);
    let crc_region_start = out.len(); // H0/H1 are excluded from the CRC region
    let _ = out.push(VERSION);
    let _ = out.push(kind.to_flags());
    let _ = out.extend_from_slice(&src.to_be_bytes());
    let _ = out.extend_from_slice(&dst.to_be_bytes());
    let _ = out.extend_from_slice(&seq.to_be_bytes());
    let _ = out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    let _ = out.extend_from_slice(payload);
    let crc = crc16::checksum(&out[crc_region_start..]);
    let _ = out.extend_from_slice(&crc.to_be_bytes());
    let _ = out.push(T0);
    let _ = out.push(T1);
    Some(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekH0,
    SeekH1,
    ReadFixed,
    ReadPayload,
    ReadCrc,
    SeekT0,
    SeekT1,
}

const FIXED_LEN: usize = 1 + 1 + 2 + 2 + 2 + 2; // VER,FLAGS,SRC,DST,SEQ,LEN

/// Byte-by-byte frame scanner. Feed bytes one at a time with
/// [`Scanner::push`]; it returns `Some(Frame)` once a complete, valid
/// frame has been assembled.
pub struct Scanner {
    state: State,
    fixed: Vec<u8, FIXED_LEN>,
    payload: Vec<u8, MTU>,
    crc_bytes: Vec<u8, 2>,
    payload_len: usize,
}

impl Scanner {
    pub fn new() -> Self {
        Scanner {
            state: State::SeekH0,
            fixed: Vec::new(),
            payload: Vec::new(),
            crc_bytes: Vec::new(),
            payload_len: 0,
        }
    }

    fn reset(&mut self) {
        self.state = State::SeekH0;
        self.fixed.clear();
        self.payload.clear();
        self.crc_bytes.clear();
        self.payload_len = 0;
    }

    /// Feeds a single byte into the scanner. Returns `Some(Frame)` exactly
    /// when that byte completes a valid frame.
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            State::SeekH0 => {
                if byte == H0 {
                    self.state = State::SeekH1;
                }
                None
            }
            State::SeekH1 => {
                if byte == H1 {
                    self.state = State::ReadFixed;
                } else if byte == H0 {
                    // stay in SeekH1: this byte could itself be H0
                } else {
                    self.state = State::SeekH0;
                }
                None
            }
            State::ReadFixed => {
                let _ = self.fixed.push(byte);
                if self.fixed.len() == FIXED_LEN {
                    // fixed layout: VER(0) FLAGS(1) SRC(2..4) DST(4..6) SEQ(6..8) LEN(8..10)
                    let len = u16::from_be_bytes([self.fixed[8], self.fixed[9]]) as usize;
                    if self.fixed[0] != VERSION || len > MTU {
                        self.reset();
                        return None;
                    }
                    self.payload_len = len;
                    self.state = if len == 0 {
                        State::ReadCrc
                    } else {
                        State::ReadPayload
                    };
                }
                None
            }
            State::ReadPayload => {
                let _ = self.payload.push(byte);
                if self.payload.len() == self.payload_len {
                    self.state = State::ReadCrc;
                }
                None
            }
            State::ReadCrc => {
                let _ = self.crc_bytes.push(byte);
                if self.crc_bytes.len() == 2 {
                    self.state = State::SeekT0;
                }
                None
            }
            State::SeekT0 => {
                if byte == T0 {
                    self.state = State::SeekT1;
                } else {
                    self.reset();
                }
                None
            }
            State::SeekT1 => {
                let result = if byte == T1 {
                    self.verify_and_build()
                } else {
                    None
                };
                self.reset();
                result
            }
        }
    }

    fn verify_and_build(&self) -> Option<Frame> {
        let expected_crc = u16::from_be_bytes([self.crc_bytes[0], self.crc_bytes[1]]);
        // CRC covers VER..PAYLOAD, i.e. the fixed fields followed by the payload.
        let mut full: Vec<u8, { FIXED_LEN + MTU }> = Vec::new();
        let _ = full.extend_from_slice(&self.fixed);
        let _ = full.extend_from_slice(&self.payload);
        if !crc16::verify(&full, expected_crc) {
            return None;
        }
        let kind = FrameKind::from_flags(self.fixed[1])?;
        let src = u16::from_be_bytes([self.fixed[2], self.fixed[3]]);
        let dst = u16::from_be_bytes([self.fixed[4], self.fixed[5]]);
        let seq = u16::from_be_bytes([self.fixed[6], self.fixed[7]]);
        let mut payload: Vec<u8, MTU> = Vec::new();
        let _ = payload.extend_from_slice(&self.payload);
        Some(Frame {
            kind,
            src,
            dst,
            seq,
            payload,
        })
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_all(bytes: &[u8]) -> Option<Frame> {
        let mut scanner = Scanner::new();
        let mut frame = None;
        for &b in bytes {
            if let Some(f) = scanner.push(b) {
                frame = Some(f);
            }
        }
        frame
    }

    #[test]
    fn round_trip_pack_and_scan() {
        let packed = pack(FrameKind::Data, 0x0001, 0x0002, 0, b"ping").unwrap();
        let frame = scan_all(&packed).expect("frame should parse");
        assert_eq!(frame.kind, FrameKind::Data);
        assert_eq!(frame.src, 0x0001);
        assert_eq!(frame.dst, 0x0002);
        assert_eq!(frame.seq, 0);
        assert_eq!(&frame.payload[..], b"ping");
    }

    #[test]
    fn matches_literal_scenario_bytes() {
        // spec.md scenario 1: A(addr=1) -> B(addr=2), DATA, seq=0, "ping".
        let packed = pack(FrameKind::Data, 0x0001, 0x0002, 0, b"ping").unwrap();
        let expected_prefix = [
            0x43, 0x4D, 0x01, 0x00, 0x00, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x04, 0x70, 0x69,
            0x6E, 0x67,
        ];
        assert_eq!(&packed[..expected_prefix.len()], &expected_prefix);
        assert_eq!(&packed[packed.len() - 2..], &[0x0D, 0x0A]);
    }

    #[test]
    fn rejects_wrong_version() {
        let mut packed = pack(FrameKind::Data, 1, 2, 0, b"x").unwrap();
        packed[2] = 0xFF; // corrupt VER
        assert_eq!(scan_all(&packed), None);
    }

    #[test]
    fn rejects_corrupted_crc() {
        let mut packed = pack(FrameKind::Data, 1, 2, 0, b"ping").unwrap();
        let last = packed.len() - 3;
        packed[last] ^= 0xFF;
        assert_eq!(scan_all(&packed), None);
    }

    #[test]
    fn resyncs_after_garbage_prefix() {
        let mut stream: heapless::Vec<u8, 64> = heapless::Vec::new();
        let _ = stream.extend_from_slice(&[0x00, 0x11, H0]); // garbage, then a lone H0
        let packed = pack(FrameKind::Ack, 2, 1, 5, &[]).unwrap();
        let _ = stream.extend_from_slice(&packed);
        let frame = scan_all(&stream).expect("should resync onto the real frame");
        assert_eq!(frame.kind, FrameKind::Ack);
        assert_eq!(frame.seq, 5);
    }

    #[test]
    fn back_to_back_h0_bytes_resync_correctly() {
        // H0 H0 H1 ... : the scanner must not drop the second H0's frame.
        let packed = pack(FrameKind::Data, 1, 2, 9, b"hi").unwrap();
        let mut stream: heapless::Vec<u8, 64> = heapless::Vec::new();
        let _ = stream.push(H0);
        let _ = stream.extend_from_slice(&packed);
        let frame = scan_all(&stream).expect("should parse despite the leading extra H0");
        assert_eq!(frame.seq, 9);
    }
}
