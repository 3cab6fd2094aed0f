//! Wire form of accumulators crossing the shuffle boundary.
//!
//! A partial aggregator emits one [`WireValue`] per closed group. The host
//! routes it by key to a final aggregator, which folds it back in. The
//! payload bytes are opaque to the host: only the user function's value
//! domain defines their shape.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{AggregateError, Result};

/// Single-field wire tuple crossing the stage boundary.
///
/// `Sentinel` means "no real value has been folded into this accumulator
/// yet". It is distinct from any valid payload: a user's identity element
/// (e.g. 0 for sum) is a real accumulator value and must not be confused
/// with absence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireValue {
    /// No contribution observed for the group.
    Sentinel,
    /// Serialized accumulator produced by [`encode`].
    Payload(Vec<u8>),
}

impl WireValue {
    /// True if this value carries no contribution.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, WireValue::Sentinel)
    }

    /// Payload bytes, or `None` for the sentinel.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            WireValue::Sentinel => None,
            WireValue::Payload(bytes) => Some(bytes),
        }
    }
}

/// Encode a value into its opaque wire payload.
///
/// Round-trip with [`decode`] is exact for every serde-serializable value,
/// including nested container structures.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|source| AggregateError::Codec {
        context: "encoding accumulator",
        source,
    })
}

/// Decode a wire payload produced by [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|source| AggregateError::Codec {
        context: "decoding payload",
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_scalar() {
        let bytes = encode(&42i64).unwrap();
        let back: i64 = decode(&bytes).unwrap();
        assert_eq!(back, 42);
    }

    #[test]
    fn test_round_trip_nested_containers() {
        let value: Vec<(String, Vec<i64>)> = vec![
            ("a".to_string(), vec![1, 2, 3]),
            ("b".to_string(), vec![]),
            ("c".to_string(), vec![-7]),
        ];
        let bytes = encode(&value).unwrap();
        let back: Vec<(String, Vec<i64>)> = decode(&bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_identity_payload_is_not_sentinel() {
        // A zero accumulator is a real value; only Sentinel means absence.
        let zero = WireValue::Payload(encode(&0i64).unwrap());
        assert!(!zero.is_sentinel());
        assert_ne!(zero, WireValue::Sentinel);
    }

    #[test]
    fn test_wire_value_survives_its_own_encoding() {
        // The host ships WireValue as a single-field tuple; it must
        // round-trip through the same codec.
        for value in [
            WireValue::Sentinel,
            WireValue::Payload(vec![]),
            WireValue::Payload(vec![1, 2, 3]),
        ] {
            let bytes = encode(&value).unwrap();
            let back: WireValue = decode(&bytes).unwrap();
            assert_eq!(back, value);
        }
    }

    #[test]
    fn test_decode_garbage_is_codec_error() {
        let err = decode::<Vec<String>>(&[0xff; 3]).unwrap_err();
        assert!(matches!(err, AggregateError::Codec { .. }));
    }
}
