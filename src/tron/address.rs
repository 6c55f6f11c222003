//! TRON address codec.
//!
//! An address is 21 bytes: the `0x41` network prefix followed by the 20-byte
//! account id. Users and configuration see the base58check form (`T...`);
//! event indexes frequently report hex, either `41`-prefixed or as a bare
//! 20-byte `0x...` EVM-style value.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const ADDRESS_PREFIX: u8 = 0x41;
const ADDRESS_LEN: usize = 21;
const CHECKSUM_LEN: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid base58 address {0:?}")]
    Base58(String),

    #[error("Invalid hex address {0:?}")]
    Hex(String),

    #[error("Checksum mismatch for address {0:?}")]
    Checksum(String),

    #[error("Address {0:?} must be 21 bytes with prefix 0x41")]
    Length(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TronAddress([u8; ADDRESS_LEN]);

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(Sha256::digest(payload));
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

impl TronAddress {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AddressError> {
        let raw: [u8; ADDRESS_LEN] = bytes
            .try_into()
            .map_err(|_| AddressError::Length(hex::encode(bytes)))?;
        if raw[0] != ADDRESS_PREFIX {
            return Err(AddressError::Length(hex::encode(bytes)));
        }
        Ok(TronAddress(raw))
    }

    pub fn from_base58(s: &str) -> Result<Self, AddressError> {
        let decoded = bs58::decode(s)
            .into_vec()
            .map_err(|_| AddressError::Base58(s.to_string()))?;
        if decoded.len() != ADDRESS_LEN + CHECKSUM_LEN {
            return Err(AddressError::Length(s.to_string()));
        }
        let (payload, check) = decoded.split_at(ADDRESS_LEN);
        if checksum(payload) != check {
            return Err(AddressError::Checksum(s.to_string()));
        }
        Self::from_bytes(payload)
    }

    /// Accepts `41…` (21 bytes) or a 20-byte value with or without `0x`.
    pub fn from_hex(s: &str) -> Result<Self, AddressError> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|_| AddressError::Hex(s.to_string()))?;
        match bytes.len() {
            20 => {
                let mut raw = [0u8; ADDRESS_LEN];
                raw[0] = ADDRESS_PREFIX;
                raw[1..].copy_from_slice(&bytes);
                Ok(TronAddress(raw))
            }
            ADDRESS_LEN => Self::from_bytes(&bytes),
            _ => Err(AddressError::Length(s.to_string())),
        }
    }

    /// Decodes any of the supported textual forms.
    pub fn parse_any(s: &str) -> Result<Self, AddressError> {
        let s = s.trim();
        if s.starts_with('T') {
            Self::from_base58(s)
        } else {
            Self::from_hex(s)
        }
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        let mut payload = Vec::with_capacity(ADDRESS_LEN + CHECKSUM_LEN);
        payload.extend_from_slice(&self.0);
        payload.extend_from_slice(&checksum(&self.0));
        bs58::encode(payload).into_string()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for TronAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_any(s)
    }
}

impl fmt::Display for TronAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl Serialize for TronAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TronAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
