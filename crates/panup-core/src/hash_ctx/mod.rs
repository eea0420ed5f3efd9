//! Durable incremental SHA-1 context.
//!
//! The object store verifies every non-first part against the SHA-1 state
//! reached after all previous parts. [`capture`] snapshots an accumulator
//! into a serializable [`HashState`]; [`restore`] rebuilds an accumulator
//! that continues the digest bit-for-bit.

mod accumulator;

pub use accumulator::Sha1Accumulator;

use accumulator::BLOCK_LEN;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{PanupError, Result};

/// Snapshot of a [`Sha1Accumulator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashState {
    /// Chaining words h0..h4.
    pub h: [u32; 5],
    /// Low 32 bits of the processed-byte counter.
    pub len_lo: u32,
    /// High 32 bits of the processed-byte counter.
    pub len_hi: u32,
    /// Bytes fed since the last full block.
    #[serde(with = "base64_bytes")]
    pub block: Vec<u8>,
    pub block_len: u32,
}

impl HashState {
    pub fn bytes_hashed(&self) -> u64 {
        ((self.len_hi as u64) << 32) | self.len_lo as u64
    }
}

pub fn capture(acc: &Sha1Accumulator) -> HashState {
    HashState {
        h: acc.state,
        len_lo: acc.len as u32,
        len_hi: (acc.len >> 32) as u32,
        block: acc.buffer[..acc.buffer_len].to_vec(),
        block_len: acc.buffer_len as u32,
    }
}

pub fn restore(state: &HashState) -> Result<Sha1Accumulator> {
    let block_len = state.block_len as usize;
    if block_len >= BLOCK_LEN {
        return Err(PanupError::InvalidHashState(format!(
            "partial block of {block_len} bytes"
        )));
    }
    if state.block.len() != block_len {
        return Err(PanupError::InvalidHashState(format!(
            "partial block holds {} bytes, length says {block_len}",
            state.block.len()
        )));
    }
    if state.bytes_hashed() % BLOCK_LEN as u64 != block_len as u64 {
        return Err(PanupError::InvalidHashState(format!(
            "{} bytes hashed cannot leave {block_len} pending",
            state.bytes_hashed()
        )));
    }

    let mut buffer = [0u8; BLOCK_LEN];
    buffer[..block_len].copy_from_slice(&state.block);
    Ok(Sha1Accumulator {
        state: state.h,
        len: state.bytes_hashed(),
        buffer,
        buffer_len: block_len,
    })
}

/// Wire form of the `X-Oss-Hash-Ctx` header: every value a decimal string.
#[derive(Debug, Serialize, Deserialize)]
struct HashCtxWire {
    hash_type: String,
    h0: String,
    h1: String,
    h2: String,
    h3: String,
    h4: String,
    #[serde(rename = "Nl")]
    nl: String,
    #[serde(rename = "Nh")]
    nh: String,
    data: String,
    num: String,
}

/// Encode a state as the base64 JSON value of the `X-Oss-Hash-Ctx` header.
pub fn encode_header(state: &HashState) -> Result<String> {
    let wire = HashCtxWire {
        hash_type: "sha1".to_string(),
        h0: state.h[0].to_string(),
        h1: state.h[1].to_string(),
        h2: state.h[2].to_string(),
        h3: state.h[3].to_string(),
        h4: state.h[4].to_string(),
        nl: state.len_lo.to_string(),
        nh: state.len_hi.to_string(),
        data: if state.block.is_empty() {
            String::new()
        } else {
            STANDARD.encode(&state.block)
        },
        num: state.block_len.to_string(),
    };
    Ok(STANDARD.encode(serde_json::to_vec(&wire)?))
}

pub fn decode_header(value: &str) -> Result<HashState> {
    let raw = STANDARD
        .decode(value)
        .map_err(|e| PanupError::InvalidHashState(format!("header is not base64: {e}")))?;
    let wire: HashCtxWire = serde_json::from_slice(&raw)?;
    if wire.hash_type != "sha1" {
        return Err(PanupError::InvalidHashState(format!(
            "unsupported hash type {}",
            wire.hash_type
        )));
    }

    fn num<T: std::str::FromStr>(field: &str, v: &str) -> Result<T> {
        v.parse()
            .map_err(|_| PanupError::InvalidHashState(format!("{field} is not a number: {v:?}")))
    }

    let block = if wire.data.is_empty() {
        Vec::new()
    } else {
        STANDARD
            .decode(&wire.data)
            .map_err(|e| PanupError::InvalidHashState(format!("data is not base64: {e}")))?
    };

    Ok(HashState {
        h: [
            num("h0", &wire.h0)?,
            num("h1", &wire.h1)?,
            num("h2", &wire.h2)?,
            num("h3", &wire.h3)?,
            num("h4", &wire.h4)?,
        ],
        len_lo: num("Nl", &wire.nl)?,
        len_hi: num("Nh", &wire.nh)?,
        block,
        block_len: num("num", &wire.num)?,
    })
}

/// Serde helper for Vec<u8> as base64.
mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        use serde::de::Error;
        let s = String::deserialize(d)?;
        STANDARD.decode(s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha1::{Digest, Sha1};

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    fn one_pass(data: &[u8]) -> [u8; 20] {
        Sha1::digest(data).into()
    }

    #[test]
    fn resume_matches_one_pass_hash() {
        let data = sample(64 * 5 + 17 + 300);
        // empty prefix, 1 byte, one full block, several blocks + partial
        for split in [0usize, 1, 64, 64 * 5 + 17] {
            let (p, q) = data.split_at(split);
            let mut acc = Sha1Accumulator::new();
            acc.update(p);
            let snapshot = capture(&acc);
            assert_eq!(snapshot.bytes_hashed(), split as u64);

            let mut resumed = restore(&snapshot).unwrap();
            resumed.update(q);
            assert_eq!(resumed.digest(), one_pass(&data), "split at {split}");
        }
    }

    #[test]
    fn resume_survives_json_round_trip() {
        let data = sample(1000);
        let mut acc = Sha1Accumulator::new();
        acc.update(&data[..333]);
        let json = serde_json::to_string(&capture(&acc)).unwrap();
        let state: HashState = serde_json::from_str(&json).unwrap();
        let mut resumed = restore(&state).unwrap();
        resumed.update(&data[333..]);
        assert_eq!(resumed.digest(), one_pass(&data));
    }

    #[test]
    fn capture_splits_counter() {
        let mut acc = Sha1Accumulator::new();
        acc.len = (7u64 << 32) | 128;
        let state = capture(&acc);
        assert_eq!(state.len_hi, 7);
        assert_eq!(state.len_lo, 128);
        assert_eq!(state.bytes_hashed(), (7u64 << 32) | 128);
    }

    #[test]
    fn restore_rejects_inconsistent_state() {
        let mut acc = Sha1Accumulator::new();
        acc.update(&sample(70));
        let good = capture(&acc);
        assert_eq!(good.block_len, 6);

        let mut bad = good.clone();
        bad.block_len = 64;
        assert!(restore(&bad).is_err());

        let mut bad = good.clone();
        bad.block.pop();
        assert!(restore(&bad).is_err());

        let mut bad = good;
        bad.len_lo += 1;
        assert!(restore(&bad).is_err());
    }

    #[test]
    fn header_matches_captured_browser_value() {
        let observed = "eyJoYXNoX3R5cGUiOiJzaGExIiwiaDAiOiIxMTI1MjcyNjU2IiwiaDEiOiIyNzk0MzIzMzc0IiwiaDIiOiIxNjk3MTkxNjg4IiwiaDMiOiIyNDc2MTkzMDk4IiwiaDQiOiIyNDM3ODY2NjA1IiwiTmwiOiI0MzYyMDc2MTYiLCJOaCI6IjAiLCJkYXRhIjoiIiwibnVtIjoiMCJ9";
        let state = decode_header(observed).unwrap();
        assert_eq!(state.h[0], 1_125_272_656);
        assert_eq!(state.h[4], 2_437_866_605);
        assert_eq!(state.len_lo, 436_207_616);
        assert_eq!(state.len_hi, 0);
        assert!(state.block.is_empty());
        assert_eq!(encode_header(&state).unwrap(), observed);
    }

    #[test]
    fn header_carries_partial_block() {
        let mut acc = Sha1Accumulator::new();
        acc.update(&sample(100));
        let state = capture(&acc);
        let decoded = decode_header(&encode_header(&state).unwrap()).unwrap();
        assert_eq!(decoded, state);
        assert_eq!(decoded.block_len, 36);
    }

    #[test]
    fn zero_state_survives_json() {
        let state = HashState {
            h: [0; 5],
            len_lo: 0,
            len_hi: 0,
            block: Vec::new(),
            block_len: 0,
        };
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(serde_json::from_str::<HashState>(&json).unwrap(), state);
    }
}
