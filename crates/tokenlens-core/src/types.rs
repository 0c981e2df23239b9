//! Shared value types.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::chain::ChainId;
use crate::error::ResolveError;

/// A 20-byte contract address. Stored lowercase for key equality; displayed in
/// checksum form via [`ContractAddress::checksum`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractAddress(#[serde(with = "addr_serde")] pub [u8; 20]);

mod addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 20], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 20], D::Error> {
        let s = String::deserialize(d)?;
        super::ContractAddress::parse(&s)
            .map(|a| a.0)
            .map_err(serde::de::Error::custom)
    }
}

impl ContractAddress {
    /// Parses a `0x`-prefixed or bare 40-hex-char address. Case-insensitive.
    pub fn parse(raw: &str) -> Result<Self, ResolveError> {
        let hex_part = raw.strip_prefix("0x").unwrap_or(raw);
        if hex_part.len() != 40 {
            return Err(ResolveError::parsing(format!(
                "invalid contract address length: {raw}"
            )));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex_part, &mut bytes)
            .map_err(|e| ResolveError::parsing(format!("invalid contract address: {e}")))?;
        Ok(Self(bytes))
    }

    /// Lowercase `0x`-prefixed form, used as the cache/map key.
    pub fn lower_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// EIP-55 checksummed display form.
    pub fn checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = keccak256(lower.as_bytes());
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            if c.is_ascii_alphabetic() {
                let nibble = if i % 2 == 0 { hash[i / 2] >> 4 } else { hash[i / 2] & 0x0f };
                if nibble >= 8 {
                    out.push(c.to_ascii_uppercase());
                } else {
                    out.push(c);
                }
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl std::fmt::Display for ContractAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.checksum())
    }
}

/// EIP-55 checksum hashing delegates to `alloy-primitives`' keccak256 (already a
/// workspace dependency for address/word encoding elsewhere in this crate).
fn keccak256(input: &[u8]) -> [u8; 32] {
    *alloy_primitives::keccak256(input)
}

/// An arbitrary-precision, non-negative token id, canonically represented as a
/// decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenId(BigUint);

impl TokenId {
    pub fn parse(raw: &str) -> Result<Self, ResolveError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ResolveError::parsing(format!("invalid token id: {raw}")));
        }
        let value = trimmed
            .parse::<BigUint>()
            .map_err(|e| ResolveError::parsing(format!("invalid token id: {e}")))?;
        Ok(Self(value))
    }

    /// Canonical decimal string form (also the Display impl).
    pub fn to_decimal_string(&self) -> String {
        self.0.to_string()
    }

    /// 32-byte big-endian representation, used for ABI encoding the `tokenId`
    /// parameter. Tokens too large to fit in 256 bits cannot exist on any real EVM
    /// chain, so this is a `parsing` error rather than a silent truncation.
    pub fn to_u256_be_bytes(&self) -> Result<[u8; 32], ResolveError> {
        let be = self.0.to_bytes_be();
        if be.len() > 32 {
            return Err(ResolveError::parsing("token id exceeds 256 bits"));
        }
        let mut out = [0u8; 32];
        out[32 - be.len()..].copy_from_slice(&be);
        Ok(out)
    }

    /// 64 lowercase hex chars, unprefixed — the ERC-1155 `{id}` substitution form.
    pub fn to_erc1155_hex(&self) -> Result<String, ResolveError> {
        Ok(hex::encode(self.to_u256_be_bytes()?))
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_decimal_string())
    }
}

/// Triple identifying one token across any cache or lookup in this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenKey {
    pub chain: ChainId,
    pub contract: ContractAddress,
    pub token_id: TokenId,
}

impl TokenKey {
    pub fn new(chain: ChainId, contract: ContractAddress, token_id: TokenId) -> Self {
        Self { chain, contract, token_id }
    }
}

impl std::fmt::Display for TokenKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.chain, self.contract.lower_hex(), self.token_id)
    }
}

/// Canonical fetched-and-normalized metadata for one token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub contract: String,
    pub token_id: String,
    /// Raw contract-returned URI string.
    pub metadata_uri: String,
    /// HTTP-resolved form of `metadata_uri` (`data:` passes through unchanged).
    pub metadata_url: String,
    pub metadata: serde_json::Value,
    /// Raw image field value as found in the metadata JSON, before substitution.
    pub image_uri: Option<String>,
    /// `image_uri` after `{id}` substitution and IPFS gateway rewrite.
    pub image_url: Option<String>,
}

/// Storage provenance categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageKind {
    OnChain,
    Ipfs,
    Arweave,
    Centralized,
    Unknown,
}

/// IPFS pin status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinStatus {
    Pinned,
    Available,
    Unavailable,
    Unknown,
}

/// Sniffed/declared image container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
    Svg,
    Bmp,
    Avif,
    Unknown,
}

/// Per-token audit result produced by the health classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub metadata_ok: bool,
    pub image_ok: bool,

    pub error_kind: Option<crate::error::ErrorKind>,
    pub is_transient: Option<bool>,
    pub error_message: Option<String>,

    pub metadata_storage: Option<StorageKind>,
    pub image_storage: Option<StorageKind>,

    pub metadata_ipfs_pin_status: Option<PinStatus>,
    pub image_ipfs_pin_status: Option<PinStatus>,

    pub metadata_centralized_domain: Option<String>,
    pub image_centralized_domain: Option<String>,

    pub metadata_response_time_ms: Option<u64>,
    pub image_response_time_ms: Option<u64>,
    pub metadata_is_slow: Option<bool>,
    pub image_is_slow: Option<bool>,

    pub image_format: Option<ImageFormat>,
    pub image_size_bytes: Option<u64>,

    pub metadata_uri: Option<String>,
    pub image_uri: Option<String>,
}

impl AuditRecord {
    /// Threshold above which a fetch is flagged `is_slow`.
    pub const SLOW_THRESHOLD_MS: u64 = 1000;

    pub fn slow(ms: u64) -> bool {
        ms > Self::SLOW_THRESHOLD_MS
    }
}
