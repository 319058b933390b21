
use std::cmp::Ordering;

use bitcoin::{Amount, OutPoint};

use crate::token::{NftCapability, TokenCategory, TokenData};


/// An unspent output as reported by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Utxo {
	pub outpoint: OutPoint,
	#[serde(with = "bitcoin::amount::serde::as_sat")]
	pub value: Amount,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token: Option<TokenData>,
}

impl Utxo {
	pub fn new(outpoint: OutPoint, value: Amount) -> Utxo {
		Utxo { outpoint, value, token: None }
	}

	pub fn with_token(outpoint: OutPoint, value: Amount, token: TokenData) -> Utxo {
		Utxo { outpoint, value, token: Some(token) }
	}

	/// Whether this output carries no token at all.
	pub fn is_plain(&self) -> bool {
		self.token.is_none()
	}

	/// Whether this output carries a non-fungible token.
	///
	/// Such outputs are reserved for state-carrying covenant outputs.
	pub fn has_nft(&self) -> bool {
		self.token.as_ref().map(|t| t.nft.is_some()).unwrap_or(false)
	}

	/// The fungible amount of the given category held by this output.
	pub fn fungible_amount(&self, category: TokenCategory) -> u64 {
		match self.token {
			Some(ref t) if t.category == category => t.amount,
			_ => 0,
		}
	}

	/// Whether this output is usable as fungible token funding for the category.
	pub fn is_token_funding(&self, category: TokenCategory) -> bool {
		match self.token {
			Some(ref t) => t.category == category && t.nft.is_none() && t.amount > 0,
			None => false,
		}
	}

	/// The mutable NFT commitment carried by this output, if any.
	pub fn state_commitment(&self) -> Option<&[u8]> {
		let token = self.token.as_ref()?;
		let nft = token.nft.as_ref()?;
		if nft.capability == NftCapability::Mutable {
			Some(&nft.commitment)
		} else {
			None
		}
	}
}

/// The deterministic order used to pick outputs: largest value first,
/// ties broken by outpoint.
pub fn cmp_by_value(a: &Utxo, b: &Utxo) -> Ordering {
	b.value.cmp(&a.value).then_with(|| a.outpoint.cmp(&b.outpoint))
}

/// Sum the value of the outputs.
pub fn total_value<'a>(utxos: impl IntoIterator<Item = &'a Utxo>) -> Amount {
	utxos.into_iter().map(|u| u.value).sum()
}

/// Sum the fungible amount of the category held by the outputs.
///
/// Returns [None] if the sum doesn't fit a u64.
pub fn total_tokens<'a>(
	utxos: impl IntoIterator<Item = &'a Utxo>,
	category: TokenCategory,
) -> Option<u64> {
	utxos.into_iter().try_fold(0u64, |acc, u| acc.checked_add(u.fungible_amount(category)))
}
