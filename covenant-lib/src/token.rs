//!
//! Fungible and non-fungible token payloads attached to outputs.
//!
//! On the wire a payload is a prefix in front of the locking bytecode:
//!
//! ```text
//! 0xef <category:32> <bitfield:1> [<commitment_len:compactsize> <commitment>] [<amount:compactsize>]
//! ```
//!

use std::fmt;
use std::str::FromStr;

use bitcoin::{Script, ScriptBuf, Txid};
use bitcoin::consensus::encode::{deserialize_partial, serialize, VarInt};
use bitcoin::hashes::Hash;


/// The byte that marks the start of a token prefix.
pub const PREFIX_TOKEN: u8 = 0xef;

/// The maximum length of an NFT commitment.
pub const MAX_COMMITMENT_LEN: usize = 40;

/// The maximum fungible amount of a single output.
pub const MAX_FUNGIBLE_AMOUNT: u64 = i64::MAX as u64;

const HAS_COMMITMENT_LENGTH: u8 = 0x40;
const HAS_NFT: u8 = 0x20;
const HAS_AMOUNT: u8 = 0x10;
const RESERVED_BIT: u8 = 0x80;
const CAPABILITY_MASK: u8 = 0x0f;


#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
	#[error("token prefix is truncated")]
	Truncated,
	#[error("token prefix uses reserved bits: {0:#04x}")]
	ReservedBits(u8),
	#[error("unknown NFT capability {0}")]
	Capability(u8),
	#[error("NFT commitment of {0} bytes exceeds the maximum")]
	CommitmentTooLong(usize),
	#[error("commitment present without an NFT")]
	CommitmentWithoutNft,
	#[error("invalid fungible amount {0}")]
	InvalidAmount(u64),
	#[error("token payload carries neither an NFT nor an amount")]
	Empty,
}

/// Identity of a token category.
///
/// A category is created from the outpoint at output index 0 of the
/// genesis input, so it shares the representation of a [Txid].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenCategory(Txid);

impl TokenCategory {
	/// The category minted by spending the output at index 0 of `genesis`.
	pub fn from_genesis(genesis: Txid) -> TokenCategory {
		TokenCategory(genesis)
	}

	pub fn to_byte_array(&self) -> [u8; 32] {
		self.0.to_byte_array()
	}

	pub fn from_byte_array(b: [u8; 32]) -> TokenCategory {
		TokenCategory(Txid::from_byte_array(b))
	}
}

impl fmt::Display for TokenCategory {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Display::fmt(&self.0, f)
	}
}

impl fmt::Debug for TokenCategory {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

impl FromStr for TokenCategory {
	type Err = <Txid as FromStr>::Err;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(TokenCategory(Txid::from_str(s)?))
	}
}

/// Capability of a non-fungible token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NftCapability {
	/// Immutable.
	None = 0,
	/// The commitment may be changed when spent.
	Mutable = 1,
	/// New NFTs of the category may be created when spent.
	Minting = 2,
}

impl TryFrom<u8> for NftCapability {
	type Error = TokenError;
	fn try_from(v: u8) -> Result<Self, Self::Error> {
		match v {
			0 => Ok(NftCapability::None),
			1 => Ok(NftCapability::Mutable),
			2 => Ok(NftCapability::Minting),
			v => Err(TokenError::Capability(v)),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nft {
	pub capability: NftCapability,
	#[serde(with = "crate::tx::serde_hex")]
	pub commitment: Vec<u8>,
}

/// Token payload of an output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenData {
	pub category: TokenCategory,
	/// Fungible amount, zero if none.
	#[serde(default)]
	pub amount: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub nft: Option<Nft>,
}

impl TokenData {
	pub fn fungible(category: TokenCategory, amount: u64) -> TokenData {
		TokenData { category, amount, nft: None }
	}

	/// A mutable NFT carrying a covenant state commitment.
	pub fn state(category: TokenCategory, commitment: Vec<u8>) -> TokenData {
		TokenData {
			category,
			amount: 0,
			nft: Some(Nft { capability: NftCapability::Mutable, commitment }),
		}
	}

	pub fn validate(&self) -> Result<(), TokenError> {
		if self.amount > MAX_FUNGIBLE_AMOUNT {
			return Err(TokenError::InvalidAmount(self.amount));
		}
		if let Some(ref nft) = self.nft {
			if nft.commitment.len() > MAX_COMMITMENT_LEN {
				return Err(TokenError::CommitmentTooLong(nft.commitment.len()));
			}
		} else if self.amount == 0 {
			return Err(TokenError::Empty);
		}
		Ok(())
	}

	fn bitfield(&self) -> u8 {
		let mut ret = 0;
		if let Some(ref nft) = self.nft {
			ret |= HAS_NFT | nft.capability as u8;
			if !nft.commitment.is_empty() {
				ret |= HAS_COMMITMENT_LENGTH;
			}
		}
		if self.amount > 0 {
			ret |= HAS_AMOUNT;
		}
		ret
	}

	/// Append the serialized prefix to the buffer.
	pub fn encode_prefix(&self, buf: &mut Vec<u8>) {
		buf.push(PREFIX_TOKEN);
		buf.extend_from_slice(&self.category.to_byte_array());
		buf.push(self.bitfield());
		if let Some(ref nft) = self.nft {
			if !nft.commitment.is_empty() {
				buf.extend(serialize(&VarInt(nft.commitment.len() as u64)));
				buf.extend_from_slice(&nft.commitment);
			}
		}
		if self.amount > 0 {
			buf.extend(serialize(&VarInt(self.amount)));
		}
	}

	/// Split a prefixed locking bytecode into its payload and the actual locking bytecode.
	pub fn decode_prefix(bytes: &[u8]) -> Result<(Option<TokenData>, &[u8]), TokenError> {
		if bytes.first() != Some(&PREFIX_TOKEN) {
			return Ok((None, bytes));
		}
		let rest = &bytes[1..];
		if rest.len() < 33 {
			return Err(TokenError::Truncated);
		}
		let mut category = [0u8; 32];
		category.copy_from_slice(&rest[..32]);
		let bitfield = rest[32];
		let mut rest = &rest[33..];

		if bitfield & RESERVED_BIT != 0 {
			return Err(TokenError::ReservedBits(bitfield));
		}
		let has_nft = bitfield & HAS_NFT != 0;
		let capability = NftCapability::try_from(bitfield & CAPABILITY_MASK)?;
		if !has_nft && (bitfield & HAS_COMMITMENT_LENGTH != 0 || bitfield & CAPABILITY_MASK != 0) {
			return Err(TokenError::CommitmentWithoutNft);
		}

		let commitment = if bitfield & HAS_COMMITMENT_LENGTH != 0 {
			let (VarInt(len), used) = deserialize_partial::<VarInt>(rest)
				.map_err(|_| TokenError::Truncated)?;
			let len = len as usize;
			if len == 0 || len > MAX_COMMITMENT_LEN {
				return Err(TokenError::CommitmentTooLong(len));
			}
			rest = &rest[used..];
			if rest.len() < len {
				return Err(TokenError::Truncated);
			}
			let c = rest[..len].to_vec();
			rest = &rest[len..];
			c
		} else {
			Vec::new()
		};

		let amount = if bitfield & HAS_AMOUNT != 0 {
			let (VarInt(amount), used) = deserialize_partial::<VarInt>(rest)
				.map_err(|_| TokenError::Truncated)?;
			if amount == 0 || amount > MAX_FUNGIBLE_AMOUNT {
				return Err(TokenError::InvalidAmount(amount));
			}
			rest = &rest[used..];
			amount
		} else {
			0
		};

		let ret = TokenData {
			category: TokenCategory::from_byte_array(category),
			amount,
			nft: if has_nft { Some(Nft { capability, commitment }) } else { None },
		};
		ret.validate()?;
		Ok((Some(ret), rest))
	}
}

/// Build the locking bytecode field of an output, prefixed with the
/// token payload if any.
pub fn prefixed_script(token: Option<&TokenData>, script: &Script) -> ScriptBuf {
	let mut buf = Vec::with_capacity(script.len() + 80);
	if let Some(token) = token {
		token.encode_prefix(&mut buf);
	}
	buf.extend_from_slice(script.as_bytes());
	ScriptBuf::from_bytes(buf)
}
