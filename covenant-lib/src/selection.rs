//!
//! Selection of unspent outputs to fund a transaction.
//!
//! All selections are deterministic: candidates are ordered by value (or by
//! token amount) descending, ties broken by outpoint, and accumulated until
//! the requirement plus the estimated fee is covered.
//!

use bitcoin::Amount;

use crate::fee::FeeModel;
use crate::token::TokenCategory;
use crate::utxo::{self, Utxo};


#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
	#[error("insufficient funds: required {} sat, available {} sat", .required.to_sat(), .available.to_sat())]
	InsufficientFunds {
		required: Amount,
		available: Amount,
	},
	#[error("insufficient tokens of category {category}: required {required}, available {available}")]
	InsufficientTokens {
		category: TokenCategory,
		required: u64,
		available: u64,
	},
	#[error("no plain unspent output at index 0 to anchor a new token category")]
	MissingGenesisAnchor,
	#[error("token amounts of category {category} add up to more than {}", u64::MAX)]
	TokenOverflow {
		category: TokenCategory,
	},
}

/// The shape of the transaction the selection is going to fund.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxShape {
	/// Inputs that are part of the tx but not chosen by the selector.
	pub extra_inputs: usize,
	/// All outputs of the tx, including a potential change output.
	pub nb_outputs: usize,
}

impl TxShape {
	pub fn new(extra_inputs: usize, nb_outputs: usize) -> TxShape {
		TxShape { extra_inputs, nb_outputs }
	}
}

/// The result of a successful selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoSelection {
	/// The selected inputs, in the order they should appear in the tx.
	pub inputs: Vec<Utxo>,
	/// Total value of the selected inputs.
	pub value: Amount,
	/// Total fungible amount of the requested category, zero if none requested.
	pub tokens: u64,
	/// Estimated fee for the whole transaction.
	pub fee: Amount,
	/// Value left after covering the target and the fee. Never negative.
	pub change: Amount,
	/// The category a new state token will get, only set for genesis selections.
	pub genesis_category: Option<TokenCategory>,
}

impl UtxoSelection {
	/// Amount of tokens left after paying out `spent` tokens.
	pub fn token_change(&self, spent: u64) -> u64 {
		self.tokens.saturating_sub(spent)
	}
}

/// Chooses unspent outputs to cover a requirement plus fees.
#[derive(Debug, Clone, Copy)]
pub struct UtxoSelector {
	pub fees: FeeModel,
}

impl UtxoSelector {
	pub fn new(fees: FeeModel) -> UtxoSelector {
		UtxoSelector { fees }
	}

	fn fee_for(&self, shape: TxShape, nb_selected: usize) -> Amount {
		self.fees.fee(shape.extra_inputs + nb_selected, shape.nb_outputs)
	}

	/// Add plain outputs from `candidates` to `selected` until `value`
	/// covers `target` plus fee. At least `min_plain` plain outputs are added.
	fn accumulate_plain(
		&self,
		candidates: &[&Utxo],
		selected: &mut Vec<Utxo>,
		value: &mut Amount,
		target: Amount,
		shape: TxShape,
		min_plain: usize,
	) -> Result<Amount, SelectionError> {
		let base = *value;
		let mut nb_plain = 0;
		for utxo in candidates {
			let fee = self.fee_for(shape, selected.len());
			if nb_plain >= min_plain && *value >= target + fee {
				break;
			}
			*value += utxo.value;
			selected.push((*utxo).clone());
			nb_plain += 1;
		}

		let fee = self.fee_for(shape, selected.len());
		let required = target + fee;
		if *value < required || nb_plain < min_plain {
			let available = base + utxo::total_value(candidates.iter().copied());
			return Err(SelectionError::InsufficientFunds { required, available });
		}
		Ok(fee)
	}

	/// Select plain outputs to cover `target` in the base currency.
	pub fn select_funds(
		&self,
		utxos: &[Utxo],
		target: Amount,
		shape: TxShape,
	) -> Result<UtxoSelection, SelectionError> {
		let mut candidates = utxos.iter().filter(|u| u.is_plain()).collect::<Vec<_>>();
		candidates.sort_by(|a, b| utxo::cmp_by_value(a, b));

		let mut inputs = Vec::new();
		let mut value = Amount::ZERO;
		let fee = self.accumulate_plain(&candidates, &mut inputs, &mut value, target, shape, 0)?;

		Ok(UtxoSelection {
			change: value - target - fee,
			inputs,
			value,
			tokens: 0,
			fee,
			genesis_category: None,
		})
	}

	/// Select only fungible token outputs of `category` covering `token_target`,
	/// largest amounts first.
	///
	/// Outputs that carry an NFT are never selected, they hold covenant state.
	pub fn select_token_inputs(
		&self,
		utxos: &[Utxo],
		category: TokenCategory,
		token_target: u64,
	) -> Result<Vec<Utxo>, SelectionError> {
		let mut candidates = utxos.iter()
			.filter(|u| u.is_token_funding(category))
			.collect::<Vec<_>>();
		candidates.sort_by(|a, b| {
			b.fungible_amount(category).cmp(&a.fungible_amount(category))
				.then_with(|| a.outpoint.cmp(&b.outpoint))
		});

		let mut ret = Vec::new();
		let mut tokens = 0u64;
		for utxo in &candidates {
			if tokens >= token_target {
				break;
			}
			tokens = tokens.checked_add(utxo.fungible_amount(category))
				.ok_or(SelectionError::TokenOverflow { category })?;
			ret.push((*utxo).clone());
		}
		if tokens < token_target {
			// every candidate was taken
			return Err(SelectionError::InsufficientTokens {
				category,
				required: token_target,
				available: tokens,
			});
		}
		Ok(ret)
	}

	/// Select fungible token outputs of `category` to cover `token_target`,
	/// plus at least one plain output so the base-currency `value_target`
	/// and the fee are covered.
	pub fn select_tokens(
		&self,
		utxos: &[Utxo],
		category: TokenCategory,
		token_target: u64,
		value_target: Amount,
		shape: TxShape,
	) -> Result<UtxoSelection, SelectionError> {
		let mut inputs = self.select_token_inputs(utxos, category, token_target)?;
		let tokens = utxo::total_tokens(&inputs, category)
			.ok_or(SelectionError::TokenOverflow { category })?;
		let mut value = utxo::total_value(&inputs);

		let mut plain = utxos.iter().filter(|u| u.is_plain()).collect::<Vec<_>>();
		plain.sort_by(|a, b| utxo::cmp_by_value(a, b));
		let fee = self.accumulate_plain(&plain, &mut inputs, &mut value, value_target, shape, 1)?;

		Ok(UtxoSelection {
			change: value - value_target - fee,
			inputs,
			value,
			tokens,
			fee,
			genesis_category: None,
		})
	}

	/// Select outputs to fund a brand-new state-carrying output.
	///
	/// The first input is always a plain output at index 0, its txid becomes
	/// the category of the newly minted state token.
	pub fn select_genesis(
		&self,
		utxos: &[Utxo],
		target: Amount,
		shape: TxShape,
	) -> Result<UtxoSelection, SelectionError> {
		let mut plain = utxos.iter().filter(|u| u.is_plain()).collect::<Vec<_>>();
		plain.sort_by(|a, b| utxo::cmp_by_value(a, b));

		let anchor_idx = plain.iter().position(|u| u.outpoint.vout == 0)
			.ok_or(SelectionError::MissingGenesisAnchor)?;
		let anchor = plain.remove(anchor_idx);

		let mut inputs = vec![anchor.clone()];
		let mut value = anchor.value;
		let fee = self.accumulate_plain(&plain, &mut inputs, &mut value, target, shape, 0)?;

		Ok(UtxoSelection {
			change: value - target - fee,
			inputs,
			value,
			tokens: 0,
			fee,
			genesis_category: Some(TokenCategory::from_genesis(anchor.outpoint.txid)),
		})
	}
}
