//!
//! Locking bytecode of covenant and owner outputs and their cashaddr
//! representation.
//!

use std::fmt;
use std::str::FromStr;

use bitcoin::{PubkeyHash, Script, ScriptBuf};
use bitcoin::hashes::{hash160, sha256d, Hash};
use bitcoin::opcodes::all::{OP_EQUAL, OP_HASH160, OP_HASH256};
use bitcoin::script::Builder;
use serde::{Deserialize, Deserializer, Serialize, Serializer};


const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

const CHECKSUM_LEN: usize = 8;

const TYPE_P2PKH: u8 = 0;
const TYPE_P2SH: u8 = 1;
const TYPE_TOKEN_P2PKH: u8 = 2;
const TYPE_TOKEN_P2SH: u8 = 3;

const SIZE_20: u8 = 0;
const SIZE_32: u8 = 3;


#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
	#[error("address has no network prefix")]
	MissingPrefix,
	#[error("unknown network prefix: {0}")]
	UnknownPrefix(String),
	#[error("address mixes upper and lower case")]
	MixedCase,
	#[error("invalid character {0:?}")]
	InvalidChar(char),
	#[error("invalid checksum")]
	Checksum,
	#[error("invalid padding")]
	Padding,
	#[error("unsupported version byte {0:#04x}")]
	Version(u8),
	#[error("hash length {actual} does not match the version byte")]
	HashLength {
		actual: usize,
	},
	#[error("locking bytecode has no address form")]
	UnsupportedScript,
}

/// The network an address is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
	Mainnet,
	Testnet,
	Regtest,
}

impl Network {
	pub fn prefix(&self) -> &'static str {
		match self {
			Network::Mainnet => "bitcoincash",
			Network::Testnet => "bchtest",
			Network::Regtest => "bchreg",
		}
	}

	pub fn from_prefix(prefix: &str) -> Option<Network> {
		match prefix {
			"bitcoincash" => Some(Network::Mainnet),
			"bchtest" => Some(Network::Testnet),
			"bchreg" => Some(Network::Regtest),
			_ => None,
		}
	}
}

impl Default for Network {
	fn default() -> Self {
		Network::Mainnet
	}
}

impl fmt::Display for Network {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(match self {
			Network::Mainnet => "mainnet",
			Network::Testnet => "testnet",
			Network::Regtest => "regtest",
		})
	}
}

impl FromStr for Network {
	type Err = AddressError;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"mainnet" | "bitcoincash" => Ok(Network::Mainnet),
			"testnet" | "chipnet" | "bchtest" => Ok(Network::Testnet),
			"regtest" | "bchreg" => Ok(Network::Regtest),
			_ => Err(AddressError::UnknownPrefix(s.to_owned())),
		}
	}
}

/// P2PKH locking bytecode for the owner of the public key hash.
pub fn p2pkh_script(hash: &hash160::Hash) -> ScriptBuf {
	ScriptBuf::new_p2pkh(&PubkeyHash::from_raw_hash(*hash))
}

/// P2SH32 locking bytecode for the redeem script.
pub fn p2sh32_script(redeem: &Script) -> ScriptBuf {
	let hash = sha256d::Hash::hash(redeem.as_bytes());
	Builder::new()
		.push_opcode(OP_HASH256)
		.push_slice(hash.to_byte_array())
		.push_opcode(OP_EQUAL)
		.into_script()
}

/// What an address pays to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressPayload {
	P2pkh(hash160::Hash),
	P2sh20(hash160::Hash),
	P2sh32(sha256d::Hash),
}

impl AddressPayload {
	fn type_bits(&self) -> u8 {
		match self {
			AddressPayload::P2pkh(_) => TYPE_P2PKH,
			_ => TYPE_P2SH,
		}
	}

	fn hash_bytes(&self) -> &[u8] {
		match self {
			AddressPayload::P2pkh(h) => h.as_byte_array(),
			AddressPayload::P2sh20(h) => h.as_byte_array(),
			AddressPayload::P2sh32(h) => h.as_byte_array(),
		}
	}
}

/// A cashaddr address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CashAddress {
	pub network: Network,
	pub payload: AddressPayload,
	/// Whether the address signals that the receiver supports tokens.
	pub token_aware: bool,
}

impl CashAddress {
	/// The address of a covenant with the given redeem script.
	pub fn p2sh32(network: Network, redeem: &Script) -> CashAddress {
		CashAddress {
			network,
			payload: AddressPayload::P2sh32(sha256d::Hash::hash(redeem.as_bytes())),
			token_aware: true,
		}
	}

	pub fn p2pkh(network: Network, hash: hash160::Hash) -> CashAddress {
		CashAddress { network, payload: AddressPayload::P2pkh(hash), token_aware: false }
	}

	/// The same address with the token-awareness signal set or cleared.
	pub fn with_token_support(mut self, token_aware: bool) -> CashAddress {
		self.token_aware = token_aware;
		self
	}

	pub fn script_pubkey(&self) -> ScriptBuf {
		match self.payload {
			AddressPayload::P2pkh(ref h) => p2pkh_script(h),
			AddressPayload::P2sh20(h) => Builder::new()
				.push_opcode(OP_HASH160)
				.push_slice(h.to_byte_array())
				.push_opcode(OP_EQUAL)
				.into_script(),
			AddressPayload::P2sh32(h) => Builder::new()
				.push_opcode(OP_HASH256)
				.push_slice(h.to_byte_array())
				.push_opcode(OP_EQUAL)
				.into_script(),
		}
	}

	/// Recover the address paid to by the locking bytecode.
	pub fn from_script(network: Network, script: &Script) -> Result<CashAddress, AddressError> {
		let b = script.as_bytes();
		let payload = if script.is_p2pkh() {
			AddressPayload::P2pkh(hash160::Hash::from_slice(&b[3..23]).map_err(|_| AddressError::UnsupportedScript)?)
		} else if script.is_p2sh() {
			AddressPayload::P2sh20(hash160::Hash::from_slice(&b[2..22]).map_err(|_| AddressError::UnsupportedScript)?)
		} else if b.len() == 35 && b[0] == OP_HASH256.to_u8() && b[1] == 32 && b[34] == OP_EQUAL.to_u8() {
			AddressPayload::P2sh32(sha256d::Hash::from_slice(&b[2..34]).map_err(|_| AddressError::UnsupportedScript)?)
		} else {
			return Err(AddressError::UnsupportedScript);
		};
		Ok(CashAddress { network, payload, token_aware: false })
	}

	fn version_byte(&self) -> u8 {
		let ty = match (self.payload.type_bits(), self.token_aware) {
			(TYPE_P2PKH, true) => TYPE_TOKEN_P2PKH,
			(_, true) => TYPE_TOKEN_P2SH,
			(ty, false) => ty,
		};
		let size = match self.payload {
			AddressPayload::P2sh32(_) => SIZE_32,
			_ => SIZE_20,
		};
		ty << 3 | size
	}
}

impl fmt::Display for CashAddress {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let prefix = self.network.prefix();
		let mut raw = Vec::with_capacity(33);
		raw.push(self.version_byte());
		raw.extend_from_slice(self.payload.hash_bytes());
		let mut data = convert_bits(&raw, 8, 5, true).ok_or(fmt::Error)?;

		let checksum = polymod(&checksum_input(prefix, &data, true));
		for i in 0..CHECKSUM_LEN {
			data.push(((checksum >> (5 * (CHECKSUM_LEN - 1 - i))) & 0x1f) as u8);
		}

		f.write_str(prefix)?;
		f.write_str(":")?;
		for d in data {
			write!(f, "{}", CHARSET[d as usize] as char)?;
		}
		Ok(())
	}
}

impl FromStr for CashAddress {
	type Err = AddressError;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let has_lower = s.chars().any(|c| c.is_ascii_lowercase());
		let has_upper = s.chars().any(|c| c.is_ascii_uppercase());
		if has_lower && has_upper {
			return Err(AddressError::MixedCase);
		}
		let s = s.to_ascii_lowercase();
		let (prefix, payload) = s.split_once(':').ok_or(AddressError::MissingPrefix)?;
		let network = Network::from_prefix(prefix)
			.ok_or_else(|| AddressError::UnknownPrefix(prefix.to_owned()))?;

		let data = payload.chars().map(|c| {
			CHARSET.iter().position(|x| *x as char == c)
				.map(|p| p as u8)
				.ok_or(AddressError::InvalidChar(c))
		}).collect::<Result<Vec<u8>, _>>()?;
		if data.len() <= CHECKSUM_LEN {
			return Err(AddressError::Checksum);
		}

		if polymod(&checksum_input(prefix, &data, false)) != 0 {
			return Err(AddressError::Checksum);
		}

		let raw = convert_bits(&data[..data.len() - CHECKSUM_LEN], 5, 8, false)
			.ok_or(AddressError::Padding)?;
		let (version, hash) = raw.split_first().ok_or(AddressError::HashLength { actual: 0 })?;
		if version & 0x80 != 0 {
			return Err(AddressError::Version(*version));
		}
		let ty = version >> 3;
		let size = version & 0x07;
		let expected = match size {
			SIZE_20 => 20,
			SIZE_32 => 32,
			_ => return Err(AddressError::Version(*version)),
		};
		if hash.len() != expected {
			return Err(AddressError::HashLength { actual: hash.len() });
		}

		let bad_len = |_| AddressError::HashLength { actual: hash.len() };
		let (payload, token_aware) = match (ty, size) {
			(TYPE_P2PKH, SIZE_20) | (TYPE_TOKEN_P2PKH, SIZE_20) => (
				AddressPayload::P2pkh(hash160::Hash::from_slice(hash).map_err(bad_len)?),
				ty == TYPE_TOKEN_P2PKH,
			),
			(TYPE_P2SH, SIZE_20) | (TYPE_TOKEN_P2SH, SIZE_20) => (
				AddressPayload::P2sh20(hash160::Hash::from_slice(hash).map_err(bad_len)?),
				ty == TYPE_TOKEN_P2SH,
			),
			(TYPE_P2SH, SIZE_32) | (TYPE_TOKEN_P2SH, SIZE_32) => (
				AddressPayload::P2sh32(sha256d::Hash::from_slice(hash).map_err(bad_len)?),
				ty == TYPE_TOKEN_P2SH,
			),
			_ => return Err(AddressError::Version(*version)),
		};
		Ok(CashAddress { network, payload, token_aware })
	}
}

impl Serialize for CashAddress {
	fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
		s.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for CashAddress {
	fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
		let s = String::deserialize(d)?;
		CashAddress::from_str(&s).map_err(serde::de::Error::custom)
	}
}

/// Whether two address strings denote the same address, ignoring case.
pub fn same_address(a: &str, b: &str) -> bool {
	a.trim().eq_ignore_ascii_case(b.trim())
}

/// The prefix expanded to its low five bits, a zero separator, the data and
/// optionally room for the checksum.
fn checksum_input(prefix: &str, data: &[u8], with_template: bool) -> Vec<u8> {
	let mut ret = Vec::with_capacity(prefix.len() + 1 + data.len() + CHECKSUM_LEN);
	ret.extend(prefix.bytes().map(|b| b & 0x1f));
	ret.push(0);
	ret.extend_from_slice(data);
	if with_template {
		ret.extend_from_slice(&[0; CHECKSUM_LEN]);
	}
	ret
}

fn polymod(values: &[u8]) -> u64 {
	let mut c: u64 = 1;
	for d in values {
		let c0 = (c >> 35) as u8;
		c = ((c & 0x07_ffff_ffff) << 5) ^ *d as u64;
		if c0 & 0x01 != 0 { c ^= 0x98_f2bc_8e61; }
		if c0 & 0x02 != 0 { c ^= 0x79_b76d_99e2; }
		if c0 & 0x04 != 0 { c ^= 0xf3_3e5f_b3c4; }
		if c0 & 0x08 != 0 { c ^= 0xae_2eab_e2a8; }
		if c0 & 0x10 != 0 { c ^= 0x1e_4f43_e470; }
	}
	c ^ 1
}

fn convert_bits(data: &[u8], from: u32, to: u32, pad: bool) -> Option<Vec<u8>> {
	let mut acc: u32 = 0;
	let mut bits: u32 = 0;
	let maxv: u32 = (1 << to) - 1;
	let mut ret = Vec::with_capacity(data.len() * from as usize / to as usize + 1);
	for value in data {
		let v = *value as u32;
		if v >> from != 0 {
			return None;
		}
		acc = (acc << from) | v;
		bits += from;
		while bits >= to {
			bits -= to;
			ret.push(((acc >> bits) & maxv) as u8);
		}
	}
	if pad {
		if bits > 0 {
			ret.push(((acc << (to - bits)) & maxv) as u8);
		}
	} else if bits >= from || ((acc << (to - bits)) & maxv) != 0 {
		return None;
	}
	Some(ret)
}
