//! # Frame codec
//!
//! Fixed-size wire frame shared with the radio peer. Every field is written
//! explicitly in little-endian order; nothing is reinterpreted from memory.
//!
//! ```text
//!  0       8    9     10    11     12     13        15          143   145
//!  +-------+----+-----+-----+------+------+---------+-----------+-----+----+
//!  |  tag  |7E  | ctl | seq | !ctl | !seq |data_len |  data[128]| fcs | 7E |
//!  +-------+----+-----+-----+------+------+---------+-----------+-----+----+
//! ```
//!
//! The FCS covers `data_len ‖ data` only (see [`crate::crc`]). The complement
//! bytes after `ctl`/`seq` let the receiver trust the sequence number of a
//! frame whose FCS failed, so a damaged data frame can be NACKed by number.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::crc;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Synchronisation tag: the words `0x26FF60A6`, `0x00CC8FDE`, little-endian.
pub const SYNC_TAG: [u8; 8] = [0xA6, 0x60, 0xFF, 0x26, 0xDE, 0x8F, 0xCC, 0x00];
/// Tag length in bytes.
pub const TAG_LEN: usize = SYNC_TAG.len();
/// Head and tail synchronisation marker.
pub const SYNC_MARK: u8 = 0x7E;
/// Payload region size; longer application writes are split by the caller.
pub const MAX_PAYLOAD: usize = 128;
/// Number of distinct sequence numbers (`0..SEQ_LIMIT`).
pub const SEQ_LIMIT: u8 = 126;
/// Total encoded frame length.
pub const FRAME_LEN: usize = TAG_LEN + 1 + 4 + 2 + MAX_PAYLOAD + 2 + 1;

const _: () = assert!(FRAME_LEN == 146);

// ─── Frame Kind ─────────────────────────────────────────────────────────────

/// Frame type carried in the `ctl` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    Data = 0x00,
    Nack = 0x01,
    Ack = 0x03,
}

impl FrameKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(FrameKind::Data),
            0x01 => Some(FrameKind::Nack),
            0x03 => Some(FrameKind::Ack),
            _ => None,
        }
    }

    /// ACK and NACK frames are meta frames and jump the data queue.
    pub fn is_meta(self) -> bool {
        !matches!(self, FrameKind::Data)
    }
}

// ─── Errors ─────────────────────────────────────────────────────────────────

/// Reasons a candidate frame is rejected.
///
/// [`FrameError::Checksum`] is the only checksum failure; every other variant
/// is a protocol violation and the frame is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame truncated: {len} bytes, expected 146")]
    Truncated { len: usize },
    #[error("synchronisation pattern missing")]
    MissingSync,
    #[error("header check bytes do not match ctl/seq")]
    BadHeader,
    #[error("checksum mismatch on seq {seq}: computed {computed:#06x}, received {received:#06x}")]
    Checksum {
        seq: u8,
        kind: Option<FrameKind>,
        computed: u16,
        received: u16,
    },
    #[error("payload length {len} exceeds 128")]
    Oversize { len: usize },
    #[error("tail sync marker missing")]
    MissingTail,
    #[error("unknown frame kind {code:#04x}")]
    UnknownKind { code: u8 },
    #[error("sequence number {seq} out of range")]
    BadSequence { seq: u8 },
}

impl FrameError {
    pub fn is_checksum(&self) -> bool {
        matches!(self, FrameError::Checksum { .. })
    }

    /// Sequence number to NACK, if this failure identifies a damaged data
    /// frame whose header survived.
    pub fn nack_seq(&self) -> Option<u8> {
        match *self {
            FrameError::Checksum {
                seq,
                kind: Some(FrameKind::Data),
                ..
            } if seq < SEQ_LIMIT => Some(seq),
            _ => None,
        }
    }
}

// ─── Frame ──────────────────────────────────────────────────────────────────

/// A decoded frame. The payload holds exactly `data_len` bytes; padding is
/// added on encode and stripped on decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub seq: u8,
    pub payload: Bytes,
}

impl Frame {
    /// Build a data frame. Payloads longer than [`MAX_PAYLOAD`] are rejected,
    /// never truncated.
    pub fn data(seq: u8, payload: Bytes) -> Result<Self, FrameError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::Oversize { len: payload.len() });
        }
        if seq >= SEQ_LIMIT {
            return Err(FrameError::BadSequence { seq });
        }
        Ok(Frame {
            kind: FrameKind::Data,
            seq,
            payload,
        })
    }

    pub fn ack(seq: u8) -> Self {
        debug_assert!(seq < SEQ_LIMIT);
        Frame {
            kind: FrameKind::Ack,
            seq,
            payload: Bytes::new(),
        }
    }

    pub fn nack(seq: u8) -> Self {
        debug_assert!(seq < SEQ_LIMIT);
        Frame {
            kind: FrameKind::Nack,
            seq,
            payload: Bytes::new(),
        }
    }

    pub fn is_meta(&self) -> bool {
        self.kind.is_meta()
    }

    /// Append the wire encoding to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        let ctl = self.kind as u8;
        let mut data = [0u8; MAX_PAYLOAD];
        data[..self.payload.len()].copy_from_slice(&self.payload);
        let data_len = self.payload.len() as u16;

        buf.reserve(FRAME_LEN);
        buf.put_slice(&SYNC_TAG);
        buf.put_u8(SYNC_MARK);
        buf.put_u8(ctl);
        buf.put_u8(self.seq);
        buf.put_u8(!ctl);
        buf.put_u8(!self.seq);
        buf.put_u16_le(data_len);
        buf.put_slice(&data);
        buf.put_u16_le(crc::frame_check(data_len, &data));
        buf.put_u8(SYNC_MARK);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_LEN);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Parse one frame from the first [`FRAME_LEN`] bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < FRAME_LEN {
            return Err(FrameError::Truncated { len: buf.len() });
        }
        let mut buf = &buf[..FRAME_LEN];
        if buf[..TAG_LEN] != SYNC_TAG || buf[TAG_LEN] != SYNC_MARK {
            return Err(FrameError::MissingSync);
        }
        buf.advance(TAG_LEN + 1);

        let ctl = buf.get_u8();
        let seq = buf.get_u8();
        let ctl_check = buf.get_u8();
        let seq_check = buf.get_u8();
        if ctl_check != !ctl || seq_check != !seq {
            return Err(FrameError::BadHeader);
        }

        let data_len = buf.get_u16_le();
        let (data, mut rest) = buf.split_at(MAX_PAYLOAD);
        let received = rest.get_u16_le();
        let computed = crc::frame_check(data_len, data);
        if computed != received {
            return Err(FrameError::Checksum {
                seq,
                kind: FrameKind::from_byte(ctl),
                computed,
                received,
            });
        }

        let len = data_len as usize;
        if len > MAX_PAYLOAD {
            return Err(FrameError::Oversize { len });
        }
        if rest.get_u8() != SYNC_MARK {
            return Err(FrameError::MissingTail);
        }
        let kind = FrameKind::from_byte(ctl).ok_or(FrameError::UnknownKind { code: ctl })?;
        if seq >= SEQ_LIMIT {
            return Err(FrameError::BadSequence { seq });
        }

        Ok(Frame {
            kind,
            seq,
            payload: Bytes::copy_from_slice(&data[..len]),
        })
    }
}
