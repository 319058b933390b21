//! Dummy fixtures for tests.
//!
//! None of these need to be valid on chain. They give tests deterministic
//! outpoints, hashes, terms and templates without having to spell them out.
//!
//! The module is only available if the test-util feature is used.

use bitcoin::{Amount, OutPoint, ScriptBuf, Txid};
use bitcoin::hashes::{hash160, Hash};

use crate::commitment::{Flags, ResourceKind};
use crate::params::ParamType;
use crate::script::{ScriptRegistry, ScriptTemplate, TemplateInput};
use crate::terms::{RecurringTerms, VestingTerms};
use crate::token::TokenCategory;
use crate::utxo::Utxo;

/// 2026-01-01T00:00:00Z
pub const DUMMY_START: u64 = 1_767_225_600;

/// Returns a dummy outpoint at output index 1.
/// You can use the index to make the outpoints unique, they sort by index.
pub fn dummy_outpoint(idx: u8) -> OutPoint {
	OutPoint::new(Txid::from_byte_array([idx; 32]), 1)
}

pub fn dummy_hash(idx: u8) -> hash160::Hash {
	hash160::Hash::from_byte_array([idx; 20])
}

pub fn dummy_category(idx: u8) -> TokenCategory {
	TokenCategory::from_byte_array([0xc0 ^ idx; 32])
}

/// A plain output worth `sat` satoshis.
pub fn dummy_utxo(idx: u8, sat: u64) -> Utxo {
	Utxo::new(dummy_outpoint(idx), Amount::from_sat(sat))
}

/// Three milestones of 100k sat, one day apart, starting at [DUMMY_START].
pub fn dummy_vesting_terms() -> VestingTerms {
	VestingTerms {
		recipient: dummy_hash(1),
		sender: dummy_hash(2),
		total_amount: 300_000,
		step_amount: 100_000,
		interval: 86_400,
		start: DUMMY_START,
		milestone_count: 3,
		flags: Flags::CANCELABLE,
		token: None,
	}
}

/// Hourly payments of 5k sat up to 50k sat, the first one at [DUMMY_START].
pub fn dummy_recurring_terms() -> RecurringTerms {
	RecurringTerms {
		recipient: dummy_hash(1),
		sender: dummy_hash(2),
		amount_per_payment: 5_000,
		interval: 3_600,
		total_amount: 50_000,
		start: DUMMY_START,
		flags: Flags::CANCELABLE.with(Flags::PAUSABLE),
		token: None,
	}
}

fn inputs(types: &[(&str, ParamType)]) -> Vec<TemplateInput> {
	types.iter().map(|(name, ty)| TemplateInput { name: (*name).into(), ty: *ty }).collect()
}

/// A v1.0.0 template of the kind. The bytecode is meaningless.
pub fn dummy_template(kind: ResourceKind) -> ScriptTemplate {
	let constructor_inputs = match kind {
		ResourceKind::Vesting => inputs(&[
			("recipient", ParamType::Bytes20),
			("sender", ParamType::Bytes20),
			("totalAmount", ParamType::Int),
			("stepAmount", ParamType::Int),
			("interval", ParamType::Int),
			("startTime", ParamType::Int),
			("milestoneCount", ParamType::Int),
		]),
		ResourceKind::RecurringPayment => inputs(&[
			("recipient", ParamType::Bytes20),
			("sender", ParamType::Bytes20),
			("amountPerPayment", ParamType::Int),
			("interval", ParamType::Int),
			("totalAmount", ParamType::Int),
			("startTime", ParamType::Int),
		]),
		ResourceKind::VoteLock => inputs(&[
			("voter", ParamType::Bytes20),
			("tokenCategory", ParamType::Bytes32),
			("unlockTime", ParamType::Int),
		]),
		ResourceKind::Airdrop => inputs(&[
			("sender", ParamType::Bytes20),
			("merkleRoot", ParamType::Bytes32),
			("totalAmount", ParamType::Int),
			("expiry", ParamType::Int),
		]),
	};
	ScriptTemplate {
		kind,
		version: semver::Version::new(1, 0, 0),
		constructor_inputs,
		bytecode: ScriptBuf::from_bytes(vec![0x75, 0x51, kind as u8]),
	}
}

/// A registry with a v1.0.0 template of every kind.
pub fn dummy_registry() -> ScriptRegistry {
	let mut ret = ScriptRegistry::new();
	for kind in ResourceKind::ALL {
		ret.register(dummy_template(kind)).expect("fresh registry");
	}
	ret
}

/// The redeem script of [dummy_vesting_terms] under [dummy_template].
pub fn dummy_redeem_script() -> ScriptBuf {
	dummy_template(ResourceKind::Vesting)
		.redeem_script(&dummy_vesting_terms().constructor_args())
		.expect("valid dummy args")
}
