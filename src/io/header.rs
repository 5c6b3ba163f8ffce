//! Fixed-size header at the front of every native annotation-state file.
//!
//! Layout (little endian):
//! `[magic: 8][format: u16][flags: u16][reserved: 4][stamp: u64][fingerprint: 32]
//!  [payload_len: u64][checksum: 32]`
//!
//! The header alone answers metadata queries, so listing or validating a slot never
//! touches the payload.

use std::io::{ErrorKind, Read};

use crate::constants::{FORMAT_VERSION, HEADER_SIZE, MAGIC, MAX_PAYLOAD_BYTES};
use crate::error::{Result, StoreError};
use crate::types::{SchemaFingerprint, VersionStamp};

const FORMAT_OFFSET: usize = 8;
const FLAGS_OFFSET: usize = 10;
const STAMP_OFFSET: usize = 16;
const FINGERPRINT_OFFSET: usize = 24;
const PAYLOAD_LEN_OFFSET: usize = 56;
const CHECKSUM_OFFSET: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateHeader {
    pub format: u16,
    pub flags: u16,
    pub stamp: VersionStamp,
    pub fingerprint: SchemaFingerprint,
    pub payload_len: u64,
    /// blake3 of the payload bytes.
    pub checksum: [u8; 32],
}

pub struct HeaderCodec;

impl HeaderCodec {
    #[must_use]
    pub fn encode(header: &StateHeader) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..FORMAT_OFFSET].copy_from_slice(&MAGIC);
        buf[FORMAT_OFFSET..FLAGS_OFFSET].copy_from_slice(&header.format.to_le_bytes());
        buf[FLAGS_OFFSET..FLAGS_OFFSET + 2].copy_from_slice(&header.flags.to_le_bytes());
        buf[STAMP_OFFSET..FINGERPRINT_OFFSET].copy_from_slice(&header.stamp.0.to_le_bytes());
        buf[FINGERPRINT_OFFSET..PAYLOAD_LEN_OFFSET].copy_from_slice(&header.fingerprint.0);
        buf[PAYLOAD_LEN_OFFSET..CHECKSUM_OFFSET]
            .copy_from_slice(&header.payload_len.to_le_bytes());
        buf[CHECKSUM_OFFSET..HEADER_SIZE].copy_from_slice(&header.checksum);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<StateHeader> {
        if bytes.len() < HEADER_SIZE {
            return Err(StoreError::InvalidEncoding {
                reason: format!("header truncated ({} of {HEADER_SIZE} bytes)", bytes.len()),
            });
        }
        if bytes[..FORMAT_OFFSET] != MAGIC {
            return Err(StoreError::InvalidEncoding {
                reason: "bad magic".into(),
            });
        }
        let format = u16::from_le_bytes(field(bytes, FORMAT_OFFSET));
        if format != FORMAT_VERSION {
            return Err(StoreError::InvalidEncoding {
                reason: format!("unsupported format revision {format}"),
            });
        }
        let payload_len = u64::from_le_bytes(field(bytes, PAYLOAD_LEN_OFFSET));
        if payload_len > MAX_PAYLOAD_BYTES {
            return Err(StoreError::InvalidEncoding {
                reason: format!("payload length {payload_len} exceeds safety limit"),
            });
        }
        Ok(StateHeader {
            format,
            flags: u16::from_le_bytes(field(bytes, FLAGS_OFFSET)),
            stamp: VersionStamp(u64::from_le_bytes(field(bytes, STAMP_OFFSET))),
            fingerprint: SchemaFingerprint(field(bytes, FINGERPRINT_OFFSET)),
            payload_len,
            checksum: field(bytes, CHECKSUM_OFFSET),
        })
    }

    /// Read and decode just the header from the start of `reader`.
    pub fn read<R: Read>(reader: &mut R) -> Result<StateHeader> {
        let mut buf = [0u8; HEADER_SIZE];
        match reader.read_exact(&mut buf) {
            Ok(()) => Self::decode(&buf),
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                Err(StoreError::InvalidEncoding {
                    reason: "header truncated".into(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Overwrite the stamp field of an encoded file in place.
    pub fn patch_stamp(bytes: &mut [u8], stamp: VersionStamp) -> Result<()> {
        if bytes.len() < HEADER_SIZE {
            return Err(StoreError::InvalidEncoding {
                reason: "header truncated".into(),
            });
        }
        bytes[STAMP_OFFSET..FINGERPRINT_OFFSET].copy_from_slice(&stamp.0.to_le_bytes());
        Ok(())
    }
}

fn field<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}
