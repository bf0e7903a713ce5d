//! Fixed-width opaque identifiers.
//!
//! Addresses are 20 bytes, object ids and hashes are 32 bytes. All three
//! render as lowercase hex without a prefix, and serialize to JSON as that
//! hex string — the same convention on both sides of the host/guest
//! bridge.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Identifier parsing errors shared by all fixed-width types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("invalid hex encoding")]
    InvalidHex,
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

macro_rules! fixed_id {
    ($(#[$doc:meta])* $name:ident, $len:expr) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name([u8; $len]);

        impl $name {
            /// The all-zero value.
            pub const ZERO: Self = Self([0u8; $len]);

            /// Byte width of this identifier.
            pub const LEN: usize = $len;

            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from a lowercase or uppercase hex string.
            pub fn from_hex(s: &str) -> Result<Self, IdError> {
                let bytes = hex::decode(s).map_err(|_| IdError::InvalidHex)?;
                Self::from_slice(&bytes)
            }

            /// Build from a byte slice of exactly `LEN` bytes.
            pub fn from_slice(bytes: &[u8]) -> Result<Self, IdError> {
                if bytes.len() != $len {
                    return Err(IdError::InvalidLength {
                        expected: $len,
                        got: bytes.len(),
                    });
                }
                let mut arr = [0u8; $len];
                arr.copy_from_slice(bytes);
                Ok(Self(arr))
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; $len]
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(DeError::custom)
            }
        }
    };
}

fixed_id!(
    /// Account or contract address (20 bytes).
    ///
    /// `Address::ZERO` means "no sender"; when a zero value appears where
    /// an [`ObjectId`] is expected, it selects the contract's default
    /// object instead.
    Address,
    20
);

fixed_id!(
    /// State object identifier (32 bytes).
    ObjectId,
    32
);

fixed_id!(
    /// Block or transaction hash (32 bytes).
    Hash,
    32
);

impl Address {
    /// Derive a contract address from its source bytes.
    /// Content-addressed: first 20 bytes of blake3(source).
    pub fn for_source(source: &[u8]) -> Self {
        let digest = blake3::hash(source);
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&digest.as_bytes()[..20]);
        Self(addr)
    }
}

impl ObjectId {
    /// The default object id of a contract: the 20 address bytes copied
    /// into the low 20 bytes of a zeroed 32-byte id. This mapping is
    /// fixed; both context backings resolve the zero id through it.
    pub fn default_for(contract: &Address) -> Self {
        let mut id = [0u8; 32];
        id[..20].copy_from_slice(contract.as_bytes());
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn address_hex_round_trip() {
        let addr = Address::from_bytes([0xab; 20]);
        let hex = addr.to_hex();
        assert_eq!(hex.len(), 40);
        assert_eq!(Address::from_hex(&hex).unwrap(), addr);
    }

    #[test]
    fn address_rejects_wrong_length() {
        assert_eq!(
            Address::from_hex("ab"),
            Err(IdError::InvalidLength {
                expected: 20,
                got: 1
            })
        );
        assert_eq!(Address::from_hex("zz"), Err(IdError::InvalidHex));
    }

    #[test]
    fn zero_is_zero() {
        assert!(Address::ZERO.is_zero());
        assert!(ObjectId::ZERO.is_zero());
        assert!(!Address::from_bytes([1; 20]).is_zero());
    }

    #[test]
    fn default_object_id_is_zero_padded_address() {
        let addr = Address::from_bytes([7; 20]);
        let id = ObjectId::default_for(&addr);
        assert_eq!(&id.as_bytes()[..20], addr.as_bytes());
        assert_eq!(&id.as_bytes()[20..], &[0u8; 12]);
    }

    #[test]
    fn source_address_is_deterministic() {
        let a = Address::for_source(b"package counter");
        let b = Address::for_source(b"package counter");
        let c = Address::for_source(b"package other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn serde_uses_hex_strings() {
        let addr = Address::from_bytes([0x01; 20]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(20)));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    proptest! {
        #[test]
        fn object_id_round_trips(bytes in prop::array::uniform32(any::<u8>())) {
            let id = ObjectId::from_bytes(bytes);
            prop_assert_eq!(ObjectId::from_hex(&id.to_hex()).unwrap(), id);
        }

        #[test]
        fn from_hex_never_panics(s in ".{0,80}") {
            let _ = Address::from_hex(&s);
            let _ = Hash::from_hex(&s);
        }
    }
}
