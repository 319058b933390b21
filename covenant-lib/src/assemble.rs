//!
//! Turning a requested transition into an unsigned transaction descriptor.
//!
//! The state-carrying covenant output is always the first input and, unless
//! the state is burned, the first output. For resources denominated in the
//! base currency the covenant value pays payouts and fee. Token denominated
//! resources hold their tokens in fungible outputs at the covenant address
//! and take their fee from plain funding provided by the caller.
//!

use std::collections::BTreeSet;

use bitcoin::{Amount, OutPoint, ScriptBuf};

use crate::address::p2sh32_script;
use crate::commitment::{AnyCommitment, InvalidCommitment};
use crate::fee::{self, FeeModel, DUST, TOKEN_DUST};
use crate::selection::{SelectionError, TxShape, UtxoSelector};
use crate::terms::{InvalidTerms, ResourceTerms};
use crate::token::{TokenCategory, TokenData};
use crate::transition::{self, Operation, Payout, Transition, TransitionError};
use crate::tx::{
	DescriptorInput, DescriptorOutput, InputUnlock, SignerId, UnsignedTransactionDescriptor,
};
use crate::utxo::{self, Utxo};
use crate::Timestamp;


/// Name of the pseudo-function used for funding transactions.
pub const FUND_FUNCTION: &str = "fund";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssembleError {
	#[error(transparent)]
	Commitment(#[from] InvalidCommitment),
	#[error(transparent)]
	Selection(#[from] SelectionError),
	#[error(transparent)]
	Transition(#[from] TransitionError),
	#[error(transparent)]
	Terms(#[from] InvalidTerms),
	#[error("insufficient contract balance: required {} sat, available {} sat", .required.to_sat(), .available.to_sat())]
	InsufficientContractBalance {
		required: Amount,
		available: Amount,
	},
	#[error("output of {} sat would be below the dust limit", .0.to_sat())]
	DustOutput(Amount),
	#[error("covenant input {0} does not carry a mutable state token")]
	MissingState(OutPoint),
	#[error("token denominated resources need plain funding for fees")]
	MissingFunding,
	#[error("lock time {0} out of range")]
	LockTime(Timestamp),
}

/// The state-carrying output of a deployed covenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CovenantInput {
	pub utxo: Utxo,
	pub redeem_script: ScriptBuf,
	pub terms: ResourceTerms,
}

impl CovenantInput {
	pub fn locking_script(&self) -> ScriptBuf {
		p2sh32_script(&self.redeem_script)
	}

	/// The category of the state token.
	pub fn category(&self) -> Result<TokenCategory, AssembleError> {
		match self.utxo.token {
			Some(ref t) if self.utxo.state_commitment().is_some() => Ok(t.category),
			_ => Err(AssembleError::MissingState(self.utxo.outpoint)),
		}
	}

	/// The current state carried by the output.
	pub fn state(&self) -> Result<AnyCommitment, AssembleError> {
		let bytes = self.utxo.state_commitment()
			.ok_or(AssembleError::MissingState(self.utxo.outpoint))?;
		Ok(AnyCommitment::decode(self.terms.kind(), bytes)?)
	}

	fn descriptor_input(&self, function: &str) -> DescriptorInput {
		DescriptorInput {
			utxo: self.utxo.clone(),
			locking_script: self.locking_script(),
			unlock: InputUnlock::Covenant {
				function: function.to_owned(),
				redeem_script: self.redeem_script.clone(),
			},
		}
	}
}

/// Outputs of the caller's wallet used to pay fees or deposit tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Funding {
	pub utxos: Vec<Utxo>,
	/// Where base-currency and token change goes.
	pub change_script: ScriptBuf,
	/// Locking bytecode of the funding outputs.
	pub locking_script: ScriptBuf,
	pub signer: SignerId,
}

impl Funding {
	fn descriptor_input(&self, utxo: Utxo) -> DescriptorInput {
		DescriptorInput {
			utxo,
			locking_script: self.locking_script.clone(),
			unlock: InputUnlock::Signature { signer: self.signer.clone() },
		}
	}
}

/// The result of assembling a spend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledSpend {
	pub descriptor: UnsignedTransactionDescriptor,
	pub function: &'static str,
	/// The state committed by the new covenant output, [None] if burned.
	pub new_state: Option<AnyCommitment>,
	/// Category of the state token.
	pub category: TokenCategory,
	pub payouts: Vec<Payout>,
}

impl AssembledSpend {
	pub fn new_state_hex(&self) -> Option<String> {
		use bitcoin::hex::DisplayHex;
		self.new_state.as_ref().map(|s| s.encode().to_lower_hex_string())
	}
}

/// Builds unsigned transactions for covenant transitions.
#[derive(Debug, Clone, Copy)]
pub struct Assembler {
	pub selector: UtxoSelector,
	/// Minimum value of any plain output.
	pub dust: Amount,
	/// Value attached to every token-carrying output.
	pub token_dust: Amount,
}

impl Default for Assembler {
	fn default() -> Self {
		Assembler::new(FeeModel::default(), DUST)
	}
}

/// Inputs and outputs of a tx being built.
struct Draft {
	inputs: Vec<DescriptorInput>,
	outputs: Vec<DescriptorOutput>,
	signers: BTreeSet<SignerId>,
}

impl Draft {
	fn input_value(&self) -> Amount {
		self.inputs.iter().map(|i| i.utxo.value).sum()
	}

	fn output_value(&self) -> Amount {
		self.outputs.iter().map(|o| o.value).sum()
	}
}

impl Assembler {
	pub fn new(fees: FeeModel, dust: Amount) -> Assembler {
		Assembler {
			selector: UtxoSelector::new(fees),
			dust,
			token_dust: TOKEN_DUST.max(dust),
		}
	}

	pub fn fees(&self) -> &FeeModel {
		&self.selector.fees
	}

	fn lock_time(t: Option<Timestamp>) -> Result<u32, AssembleError> {
		match t {
			Some(t) => u32::try_from(t).map_err(|_| AssembleError::LockTime(t)),
			None => Ok(0),
		}
	}

	fn check_dust(&self, value: Amount) -> Result<(), AssembleError> {
		if value < self.dust {
			return Err(AssembleError::DustOutput(value));
		}
		Ok(())
	}

	/// Add a change output if worth it and compute the final fee.
	fn finish(
		&self,
		mut draft: Draft,
		change_script: &ScriptBuf,
		lock_time: u32,
	) -> Result<UnsignedTransactionDescriptor, AssembleError> {
		let input_value = draft.input_value();
		let output_value = draft.output_value();
		let nb_in = draft.inputs.len();

		let fee_with_change = self.fees().fee(nb_in, draft.outputs.len() + 1);
		let change = input_value.checked_sub(output_value + fee_with_change);
		let fee = match change {
			Some(change) if fee::above_dust(change, self.dust) => {
				draft.outputs.push(DescriptorOutput::plain(change_script.clone(), change));
				fee_with_change
			},
			_ => {
				let required = output_value + self.fees().fee(nb_in, draft.outputs.len());
				if input_value < required {
					return Err(SelectionError::InsufficientFunds {
						required,
						available: input_value,
					}.into());
				}
				input_value - output_value
			},
		};

		Ok(UnsignedTransactionDescriptor {
			inputs: draft.inputs,
			outputs: draft.outputs,
			fee,
			required_signers: draft.signers,
			lock_time,
		})
	}

	/// Assemble the spend of `input` for operation `op`.
	///
	/// `covenant_utxos` are the other unspent outputs at the covenant address,
	/// holding the token balance of token denominated resources. `funding`
	/// is required for those, it pays the fee and provides deposits.
	pub fn assemble(
		&self,
		input: &CovenantInput,
		op: &Operation,
		covenant_utxos: &[Utxo],
		funding: Option<&Funding>,
	) -> Result<AssembledSpend, AssembleError> {
		let category = input.category()?;
		let state = input.state()?;
		let transition = transition::apply(&input.terms, &state, op)?;
		let lock_time = Assembler::lock_time(transition.lock_time)?;

		let descriptor = match input.terms.token() {
			None => self.assemble_base(input, category, &transition, lock_time)?,
			Some(token) => {
				let funding = funding.ok_or(AssembleError::MissingFunding)?;
				self.assemble_token(input, category, token, &transition, covenant_utxos, funding, lock_time)?
			},
		};
		debug_assert!(descriptor.is_balanced());

		Ok(AssembledSpend {
			descriptor,
			function: transition.function,
			new_state: transition.next_state,
			category,
			payouts: transition.payouts,
		})
	}

	fn assemble_base(
		&self,
		input: &CovenantInput,
		category: TokenCategory,
		transition: &Transition,
		lock_time: u32,
	) -> Result<UnsignedTransactionDescriptor, AssembleError> {
		let mut outputs = Vec::with_capacity(transition.payouts.len() + 1);
		for payout in &transition.payouts {
			let value = Amount::from_sat(payout.amount);
			self.check_dust(value)?;
			outputs.push(DescriptorOutput::plain(payout.script_pubkey.clone(), value));
		}
		let payout_value = Amount::from_sat(transition.total_payout());
		let available = input.utxo.value;
		let inputs = vec![input.descriptor_input(transition.function)];

		let (outputs, fee) = if let Some(ref next) = transition.next_state {
			let fee = self.fees().fee(1, outputs.len() + 1);
			let required = payout_value + fee + self.dust;
			if available < required {
				return Err(AssembleError::InsufficientContractBalance { required, available });
			}
			let state_output = DescriptorOutput::with_token(
				input.locking_script(),
				available - payout_value - fee,
				TokenData::state(category, next.encode()),
			);
			outputs.insert(0, state_output);
			(outputs, fee)
		} else {
			let sweep_to = transition.sweep_to.clone().unwrap_or_else(|| input.terms.owner_script());
			let fee_with_sweep = self.fees().fee(1, outputs.len() + 1);
			let sweep = available.checked_sub(payout_value + fee_with_sweep);
			match sweep {
				Some(sweep) if fee::above_dust(sweep, self.dust) => {
					outputs.push(DescriptorOutput::plain(sweep_to, sweep));
					(outputs, fee_with_sweep)
				},
				_ => {
					let required = payout_value + self.fees().fee(1, outputs.len());
					if available < required {
						return Err(AssembleError::InsufficientContractBalance { required, available });
					}
					(outputs, available - payout_value)
				},
			}
		};

		Ok(UnsignedTransactionDescriptor {
			inputs,
			outputs,
			fee,
			required_signers: BTreeSet::new(),
			lock_time,
		})
	}

	#[allow(clippy::too_many_arguments)]
	fn assemble_token(
		&self,
		input: &CovenantInput,
		category: TokenCategory,
		token: TokenCategory,
		transition: &Transition,
		covenant_utxos: &[Utxo],
		funding: &Funding,
		lock_time: u32,
	) -> Result<UnsignedTransactionDescriptor, AssembleError> {
		let covenant_spk = input.locking_script();
		let mut draft = Draft {
			inputs: vec![input.descriptor_input(transition.function)],
			outputs: Vec::new(),
			signers: BTreeSet::new(),
		};

		if let Some(ref next) = transition.next_state {
			draft.outputs.push(DescriptorOutput::with_token(
				covenant_spk.clone(),
				input.utxo.value.max(self.token_dust),
				TokenData::state(category, next.encode()),
			));
		}
		for payout in &transition.payouts {
			draft.outputs.push(DescriptorOutput::with_token(
				payout.script_pubkey.clone(),
				self.token_dust,
				TokenData::fungible(token, payout.amount),
			));
		}
		if transition.deposit > 0 {
			draft.outputs.push(DescriptorOutput::with_token(
				covenant_spk.clone(),
				self.token_dust,
				TokenData::fungible(token, transition.deposit),
			));
		}

		// token inputs held by the covenant itself
		let held = covenant_utxos.iter()
			.filter(|u| u.outpoint != input.utxo.outpoint)
			.cloned()
			.collect::<Vec<_>>();
		let covenant_tokens = if let Some(ref sweep_to) = transition.sweep_to {
			let all = held.into_iter().filter(|u| u.is_token_funding(token)).collect::<Vec<_>>();
			let swept = utxo::total_tokens(&all, token)
				.ok_or(SelectionError::TokenOverflow { category: token })?;
			if swept > 0 {
				draft.outputs.push(DescriptorOutput::with_token(
					sweep_to.clone(), self.token_dust, TokenData::fungible(token, swept),
				));
			}
			all
		} else if transition.total_payout() > 0 {
			let payout = transition.total_payout();
			let selected = self.selector.select_token_inputs(&held, token, payout)?;
			let change = utxo::total_tokens(&selected, token)
				.ok_or(SelectionError::TokenOverflow { category: token })? - payout;
			if change > 0 {
				draft.outputs.push(DescriptorOutput::with_token(
					covenant_spk.clone(), self.token_dust, TokenData::fungible(token, change),
				));
			}
			selected
		} else {
			Vec::new()
		};
		for utxo in covenant_tokens {
			draft.inputs.push(input.descriptor_input(transition.function).with_utxo(utxo));
		}

		// plain funding for the fee, and wallet tokens for deposits
		let wallet_token_change = if transition.deposit > 0 { 1 } else { 0 };
		let fixed_value = draft.output_value() + self.token_dust * wallet_token_change;
		let target = fixed_value.checked_sub(draft.input_value()).unwrap_or(Amount::ZERO);
		let shape = TxShape::new(draft.inputs.len(), draft.outputs.len() + wallet_token_change as usize + 1);
		let plain_funding = funding.utxos.iter()
			.filter(|u| u.is_plain() || (transition.deposit > 0 && u.is_token_funding(token)))
			.cloned()
			.collect::<Vec<_>>();
		let selection = if transition.deposit > 0 {
			let sel = self.selector.select_tokens(&plain_funding, token, transition.deposit, target, shape)?;
			let change = sel.token_change(transition.deposit);
			if change > 0 {
				draft.outputs.push(DescriptorOutput::with_token(
					funding.change_script.clone(), self.token_dust, TokenData::fungible(token, change),
				));
			}
			sel
		} else {
			self.selector.select_funds(&plain_funding, target, shape)?
		};
		if !selection.inputs.is_empty() {
			draft.signers.insert(funding.signer.clone());
		}
		for utxo in selection.inputs {
			draft.inputs.push(funding.descriptor_input(utxo));
		}

		self.finish(draft, &funding.change_script, lock_time)
	}

	/// Build the genesis transaction creating the first state output.
	///
	/// The category of the state token is derived from the anchor input,
	/// the plain funding output at index 0 that is spent first.
	pub fn fund(
		&self,
		terms: &ResourceTerms,
		redeem_script: &ScriptBuf,
		funding: &Funding,
		amount: u64,
	) -> Result<AssembledSpend, AssembleError> {
		let mut state = terms.initial_state()?;
		if let AnyCommitment::VoteLock(ref mut s) = state {
			s.locked_amount = amount;
		}
		let covenant_spk = p2sh32_script(redeem_script);

		let mut draft = Draft { inputs: Vec::new(), outputs: Vec::new(), signers: BTreeSet::new() };
		draft.signers.insert(funding.signer.clone());

		let (state_value, token_inputs) = match terms.token() {
			None => {
				let value = Amount::from_sat(amount);
				self.check_dust(value)?;
				(value, Vec::new())
			},
			Some(token) => {
				let inputs = self.selector.select_token_inputs(&funding.utxos, token, amount)?;
				draft.outputs.push(DescriptorOutput::with_token(
					covenant_spk.clone(), self.token_dust, TokenData::fungible(token, amount),
				));
				let change = utxo::total_tokens(&inputs, token)
					.ok_or(SelectionError::TokenOverflow { category: token })? - amount;
				if change > 0 {
					draft.outputs.push(DescriptorOutput::with_token(
						funding.change_script.clone(), self.token_dust, TokenData::fungible(token, change),
					));
				}
				(self.token_dust, inputs)
			},
		};

		let token_value = utxo::total_value(&token_inputs);
		let target = (state_value + draft.output_value()).checked_sub(token_value).unwrap_or(Amount::ZERO);
		let shape = TxShape::new(token_inputs.len(), draft.outputs.len() + 2);
		let selection = self.selector.select_genesis(&funding.utxos, target, shape)?;
		let category = selection.genesis_category.ok_or(SelectionError::MissingGenesisAnchor)?;

		draft.outputs.insert(0, DescriptorOutput::with_token(
			covenant_spk, state_value, TokenData::state(category, state.encode()),
		));
		for utxo in selection.inputs.into_iter().chain(token_inputs) {
			draft.inputs.push(funding.descriptor_input(utxo));
		}

		let descriptor = self.finish(draft, &funding.change_script, 0)?;
		debug_assert!(descriptor.is_balanced());
		Ok(AssembledSpend {
			descriptor,
			function: FUND_FUNCTION,
			new_state: Some(state),
			category,
			payouts: Vec::new(),
		})
	}
}

impl DescriptorInput {
	fn with_utxo(mut self, utxo: Utxo) -> DescriptorInput {
		self.utxo = utxo;
		self
	}
}
