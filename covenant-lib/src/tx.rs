//!
//! Unsigned transaction descriptors and the bundle handed to external signers.
//!

use std::collections::BTreeSet;
use std::fmt;

use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::transaction::Version;

use crate::token::{self, TokenCategory, TokenData};
use crate::utxo::Utxo;


/// Serde helpers to (de)serialize byte vectors as hex strings.
pub mod serde_hex {
	use bitcoin::hex::{DisplayHex, FromHex};
	use serde::{de, Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(v: &[u8], s: S) -> Result<S::Ok, S::Error> {
		s.collect_str(&v.as_hex())
	}

	pub fn deserialize<'d, D: Deserializer<'d>>(d: D) -> Result<Vec<u8>, D::Error> {
		let s = <std::borrow::Cow<str>>::deserialize(d)?;
		Vec::<u8>::from_hex(&s).map_err(de::Error::custom)
	}
}

/// Identity of an external party that has to sign.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignerId(String);

impl SignerId {
	pub fn new(id: impl Into<String>) -> SignerId {
		SignerId(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for SignerId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl fmt::Debug for SignerId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

impl From<&str> for SignerId {
	fn from(s: &str) -> Self {
		SignerId(s.to_owned())
	}
}

impl From<String> for SignerId {
	fn from(s: String) -> Self {
		SignerId(s)
	}
}

/// How an input is going to be unlocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InputUnlock {
	/// Through a covenant function, no private key involved.
	Covenant {
		function: String,
		redeem_script: ScriptBuf,
	},
	/// With a plain signature of the signer.
	Signature {
		signer: SignerId,
	},
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorInput {
	/// The output being spent.
	pub utxo: Utxo,
	/// Locking bytecode of the spent output, without token prefix.
	pub locking_script: ScriptBuf,
	pub unlock: InputUnlock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorOutput {
	pub script_pubkey: ScriptBuf,
	#[serde(with = "bitcoin::amount::serde::as_sat")]
	pub value: Amount,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token: Option<TokenData>,
}

impl DescriptorOutput {
	pub fn plain(script_pubkey: ScriptBuf, value: Amount) -> DescriptorOutput {
		DescriptorOutput { script_pubkey, value, token: None }
	}

	pub fn with_token(script_pubkey: ScriptBuf, value: Amount, token: TokenData) -> DescriptorOutput {
		DescriptorOutput { script_pubkey, value, token: Some(token) }
	}

	pub fn to_txout(&self) -> TxOut {
		TxOut {
			value: self.value,
			script_pubkey: token::prefixed_script(self.token.as_ref(), &self.script_pubkey),
		}
	}
}

/// A fully specified transaction, still missing all unlocking data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransactionDescriptor {
	pub inputs: Vec<DescriptorInput>,
	pub outputs: Vec<DescriptorOutput>,
	#[serde(with = "bitcoin::amount::serde::as_sat")]
	pub fee: Amount,
	/// External signers that still have to sign before broadcast.
	pub required_signers: BTreeSet<SignerId>,
	/// Locktime of the tx, zero if not time-gated.
	pub lock_time: u32,
}

impl UnsignedTransactionDescriptor {
	pub fn total_input_value(&self) -> Amount {
		self.inputs.iter().map(|i| i.utxo.value).sum()
	}

	pub fn total_output_value(&self) -> Amount {
		self.outputs.iter().map(|o| o.value).sum()
	}

	/// Whether inputs exactly pay for outputs and fee.
	pub fn is_balanced(&self) -> bool {
		self.total_input_value() == self.total_output_value() + self.fee
	}

	pub fn input_tokens(&self, category: TokenCategory) -> u64 {
		self.inputs.iter().map(|i| i.utxo.fungible_amount(category)).sum()
	}

	pub fn output_tokens(&self, category: TokenCategory) -> u64 {
		self.outputs.iter()
			.filter_map(|o| o.token.as_ref())
			.filter(|t| t.category == category)
			.map(|t| t.amount)
			.sum()
	}

	/// The raw skeleton transaction with empty unlocking scripts.
	pub fn to_transaction(&self) -> Transaction {
		let sequence = if self.lock_time > 0 {
			Sequence::ENABLE_LOCKTIME_NO_RBF
		} else {
			Sequence::MAX
		};
		Transaction {
			version: Version::TWO,
			lock_time: LockTime::from_consensus(self.lock_time),
			input: self.inputs.iter().map(|i| TxIn {
				previous_output: i.utxo.outpoint,
				script_sig: ScriptBuf::new(),
				sequence,
				witness: Witness::new(),
			}).collect(),
			output: self.outputs.iter().map(|o| o.to_txout()).collect(),
		}
	}

	pub fn skeleton_hex(&self) -> String {
		serialize_hex(&self.to_transaction())
	}

	pub fn skeleton_txid(&self) -> Txid {
		self.to_transaction().compute_txid()
	}

	/// Whether `tx` spends the same inputs into the same outputs.
	///
	/// Unlocking data is ignored, so a signed tx matches its skeleton.
	pub fn matches(&self, tx: &Transaction) -> bool {
		let skeleton = self.to_transaction();
		skeleton.lock_time == tx.lock_time
			&& skeleton.output == tx.output
			&& skeleton.input.len() == tx.input.len()
			&& skeleton.input.iter().zip(&tx.input).all(|(a, b)| {
				a.previous_output == b.previous_output && a.sequence == b.sequence
			})
	}

	pub fn signing_bundle(&self) -> SigningBundle {
		SigningBundle {
			transaction: self.skeleton_hex(),
			source_outputs: self.inputs.iter().map(|i| SourceOutput {
				outpoint: i.utxo.outpoint,
				value: i.utxo.value,
				locking_bytecode: token::prefixed_script(i.utxo.token.as_ref(), &i.locking_script),
				token: i.utxo.token.clone(),
				unlock: i.unlock.clone(),
			}).collect(),
			required_signers: self.required_signers.iter().cloned().collect(),
		}
	}
}

/// The output spent by one input, as needed by a signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOutput {
	pub outpoint: OutPoint,
	#[serde(with = "bitcoin::amount::serde::as_sat")]
	pub value: Amount,
	/// Locking bytecode including the token prefix, as it is on chain.
	pub locking_bytecode: ScriptBuf,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token: Option<TokenData>,
	pub unlock: InputUnlock,
}

/// Everything an external signer needs to authorize the inputs it controls
/// without querying the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningBundle {
	/// Hex of the unsigned transaction.
	pub transaction: String,
	/// One entry per input, in input order.
	pub source_outputs: Vec<SourceOutput>,
	pub required_signers: Vec<SignerId>,
}
