//! Frame encoding for trace.log.
//!
//! Each record is one frame: `u32 LE payload length | SHA-256(payload) | payload`,
//! where the payload is the record's JSON. Frames are only ever appended.

use sha2::{Digest, Sha256};

use crate::error::{CoreError, CorruptionPoint};
use crate::model::CommunicationRecord;

const LEN_BYTES: usize = 4;
const DIGEST_BYTES: usize = 32;
pub const FRAME_HEADER_LEN: usize = LEN_BYTES + DIGEST_BYTES;

/// Encode a record as one frame.
pub fn encode_frame(record: &CommunicationRecord, max_frame_bytes: u32) -> Result<Vec<u8>, CoreError> {
    let payload = serde_json::to_vec(record)?;
    if payload.len() > max_frame_bytes as usize {
        return Err(CoreError::InvalidArgument(format!(
            "encoded record is {} bytes, limit is {max_frame_bytes}",
            payload.len()
        )));
    }
    let digest = Sha256::digest(&payload);
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&digest);
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Why a scan stopped before the end of the data.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanStop {
    /// An incomplete frame at the very end: the expected result of a crash
    /// mid-write. Everything from `offset` on can be discarded.
    TornTail { offset: u64, bytes: u64 },
    /// A damaged or out-of-sequence frame with the log continuing past it.
    Corrupt(CorruptionPoint),
}

/// Result of walking the frames of a log.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameScan {
    pub records: Vec<CommunicationRecord>,
    /// Byte length covered by `records`.
    pub valid_len: u64,
    pub stop: Option<ScanStop>,
}

impl FrameScan {
    pub fn last_seq(&self) -> u64 {
        self.records.last().map(|r| r.seq).unwrap_or(0)
    }
}

/// Walk every frame in `data`, verifying checksums and that sequence numbers
/// start at 1 and are contiguous.
pub fn scan_frames(data: &[u8], max_frame_bytes: u32) -> FrameScan {
    let total = data.len();
    let mut records = Vec::new();
    let mut offset = 0usize;
    let mut expected_seq = 1u64;

    let stop = loop {
        if offset == total {
            break None;
        }
        let remaining = total - offset;
        let torn = ScanStop::TornTail {
            offset: offset as u64,
            bytes: remaining as u64,
        };
        let corrupt = |detail: String| {
            ScanStop::Corrupt(CorruptionPoint {
                offset: offset as u64,
                expected_seq,
                detail,
            })
        };

        if remaining < FRAME_HEADER_LEN {
            break Some(torn);
        }
        let mut len_buf = [0u8; LEN_BYTES];
        len_buf.copy_from_slice(&data[offset..offset + LEN_BYTES]);
        let len = u32::from_le_bytes(len_buf);
        if len > max_frame_bytes {
            break Some(corrupt(format!(
                "frame length {len} exceeds limit {max_frame_bytes}"
            )));
        }
        let frame_end = offset + FRAME_HEADER_LEN + len as usize;
        if frame_end > total {
            break Some(torn);
        }

        let stored_digest = &data[offset + LEN_BYTES..offset + FRAME_HEADER_LEN];
        let payload = &data[offset + FRAME_HEADER_LEN..frame_end];
        if Sha256::digest(payload).as_slice() != stored_digest {
            if frame_end == total {
                break Some(torn);
            }
            break Some(corrupt("checksum mismatch".into()));
        }

        let record: CommunicationRecord = match serde_json::from_slice(payload) {
            Ok(r) => r,
            Err(e) => break Some(corrupt(format!("undecodable record: {e}"))),
        };
        if record.seq != expected_seq {
            break Some(corrupt(format!("found seq {}", record.seq)));
        }

        records.push(record);
        expected_seq += 1;
        offset = frame_end;
    };

    FrameScan {
        records,
        valid_len: offset as u64,
        stop,
    }
}
