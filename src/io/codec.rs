//! Native encoding of an [`AnnotationState`]: header followed by a bincode payload.

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};

use super::header::{HeaderCodec, StateHeader};
use crate::constants::{FORMAT_VERSION, HEADER_SIZE};
use crate::error::{Result, StoreError};
use crate::types::{AnnotationState, SchemaFingerprint, VersionStamp};

fn payload_config() -> impl Config {
    config::standard()
        .with_fixed_int_encoding()
        .with_little_endian()
}

pub fn encode_state(
    state: &AnnotationState,
    stamp: VersionStamp,
    fingerprint: SchemaFingerprint,
) -> Result<Vec<u8>> {
    let payload = encode_to_vec(state, payload_config())?;
    let header = StateHeader {
        format: FORMAT_VERSION,
        flags: 0,
        stamp,
        fingerprint,
        payload_len: payload.len() as u64,
        checksum: blake3::hash(&payload).into(),
    };
    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&HeaderCodec::encode(&header));
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Verify header, length and checksum without decoding the payload.
pub fn validate(bytes: &[u8]) -> Result<StateHeader> {
    let header = HeaderCodec::decode(bytes)?;
    let payload = &bytes[HEADER_SIZE..];
    if payload.len() as u64 != header.payload_len {
        return Err(StoreError::InvalidEncoding {
            reason: format!(
                "payload length mismatch (header {}, actual {})",
                header.payload_len,
                payload.len()
            ),
        });
    }
    let checksum: [u8; 32] = blake3::hash(payload).into();
    if checksum != header.checksum {
        return Err(StoreError::InvalidEncoding {
            reason: "payload checksum mismatch".into(),
        });
    }
    Ok(header)
}

pub fn decode_state(bytes: &[u8]) -> Result<(StateHeader, AnnotationState)> {
    let header = validate(bytes)?;
    let (state, consumed): (AnnotationState, usize) =
        decode_from_slice(&bytes[HEADER_SIZE..], payload_config())?;
    if consumed as u64 != header.payload_len {
        return Err(StoreError::InvalidEncoding {
            reason: format!(
                "trailing bytes after payload ({} unread)",
                header.payload_len - consumed as u64
            ),
        });
    }
    Ok((header, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeatureValue, Record, RecordId};

    fn random_state(seed: u64) -> AnnotationState {
        let mut rng = fastrand::Rng::with_seed(seed);
        let text: String = (0..rng.usize(10..200))
            .map(|_| rng.alphanumeric())
            .collect();
        let len = u32::try_from(text.len()).expect("short text");
        let mut state = AnnotationState::new(text);
        let mut ids = Vec::new();
        for _ in 0..rng.usize(1..50) {
            let begin = rng.u32(0..len);
            let end = rng.u32(begin..=len);
            let record = match rng.u8(0..4) {
                0 => Record::token(begin, end),
                1 => Record::span("NamedEntity", begin, end)
                    .with_feature("value", FeatureValue::Text("PER".into()))
                    .with_feature("score", FeatureValue::Float(0.5)),
                2 if ids.len() >= 2 => {
                    let source = ids[rng.usize(0..ids.len())];
                    let target = ids[rng.usize(0..ids.len())];
                    Record::relation("Dependency", source, target)
                }
                _ => Record::metadata("DocumentMetaData")
                    .with_feature("finished", FeatureValue::Bool(rng.bool())),
            };
            ids.push(state.add(record));
        }
        if let Some(first) = ids.first().copied() {
            state.remove(first);
        }
        state.add_unindexed(
            Record::span("Chain", 0, 0).with_feature("next", FeatureValue::RefList(ids.clone())),
        );
        state
    }

    #[test]
    fn parse_of_serialize_is_structurally_equal() {
        for seed in 0..32 {
            let state = random_state(seed);
            let bytes =
                encode_state(&state, VersionStamp(seed + 1), SchemaFingerprint::of(b"v1"))
                    .expect("encode");
            let (header, decoded) = decode_state(&bytes).expect("decode");
            assert_eq!(decoded, state, "seed {seed}");
            assert_eq!(header.stamp, VersionStamp(seed + 1));
        }
    }

    #[test]
    fn freed_slots_keep_their_ids() {
        let mut state = AnnotationState::new("abc");
        let a = state.add(Record::token(0, 1));
        let b = state.add(Record::token(1, 2));
        state.remove(a);
        let bytes = encode_state(&state, VersionStamp(1), SchemaFingerprint::default())
            .expect("encode");
        let (_, decoded) = decode_state(&bytes).expect("decode");
        assert!(decoded.get(RecordId(0)).is_none());
        assert_eq!(decoded.get(b), state.get(b));
    }

    #[test]
    fn flipped_payload_byte_fails_checksum() {
        let state = random_state(3);
        let mut bytes = encode_state(&state, VersionStamp(1), SchemaFingerprint::default())
            .expect("encode");
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let err = decode_state(&bytes).expect_err("corrupt payload");
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn truncated_file_is_rejected() {
        let state = random_state(4);
        let bytes = encode_state(&state, VersionStamp(1), SchemaFingerprint::default())
            .expect("encode");
        assert!(validate(&bytes[..bytes.len() - 3]).is_err());
    }
}
