//!
//! The immutable terms a covenant is deployed with.
//!
//! Terms are what the constructor arguments of a template are derived from.
//! They never change after deployment, only the [AnyCommitment] state does.
//!

use bitcoin::ScriptBuf;
use bitcoin::hashes::{hash160, sha256, Hash};

use crate::Timestamp;
use crate::address;
use crate::commitment::{
	AirdropState, AnyCommitment, Flags, RecurringState, ResourceKind, Status, U40, VestingState,
	VoteLockState,
};
use crate::params::ConstructorArg;
use crate::token::TokenCategory;


#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid terms: {0}")]
pub struct InvalidTerms(pub &'static str);

/// A flattened milestone schedule.
///
/// The on-chain state only stores a single step amount and interval, so an
/// uneven list of milestone amounts is reduced to its average step. The last
/// milestone releases whatever remains, so the total is always paid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneSchedule {
	pub total: u64,
	pub step: u64,
	pub count: u64,
	pub interval: u64,
}

impl MilestoneSchedule {
	pub fn normalize(amounts: &[u64], interval: u64) -> Result<MilestoneSchedule, InvalidTerms> {
		if amounts.is_empty() {
			return Err(InvalidTerms("no milestones"));
		}
		if amounts.iter().any(|a| *a == 0) {
			return Err(InvalidTerms("zero milestone amount"));
		}
		if interval == 0 {
			return Err(InvalidTerms("zero interval"));
		}
		let total = amounts.iter().try_fold(0u64, |acc, a| acc.checked_add(*a))
			.ok_or(InvalidTerms("milestone total overflows"))?;
		let count = amounts.len() as u64;
		Ok(MilestoneSchedule { total, step: total / count, count, interval })
	}

	/// Whether normalization lost the per-milestone amounts.
	pub fn is_lossy(&self, amounts: &[u64]) -> bool {
		amounts.iter().any(|a| *a != self.step)
	}
}

/// Callers check the value with [check_ints] first.
fn to_int(v: u64) -> ConstructorArg {
	ConstructorArg::Int(v.min(i64::MAX as u64) as i64)
}

/// Script integers are signed 64-bit.
fn check_ints(values: &[u64]) -> Result<(), InvalidTerms> {
	if values.iter().any(|v| *v > i64::MAX as u64) {
		return Err(InvalidTerms("value exceeds the script integer range"));
	}
	Ok(())
}

fn check_token(flags: Flags, token: Option<TokenCategory>) -> Result<(), InvalidTerms> {
	if flags.contains(Flags::USES_TOKEN) != token.is_some() {
		return Err(InvalidTerms("token flag and token category disagree"));
	}
	Ok(())
}

fn check_time(t: Timestamp) -> Result<U40, InvalidTerms> {
	U40::new(t).ok_or(InvalidTerms("time does not fit 40 bits"))
}

/// Terms of a vesting or milestone budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VestingTerms {
	pub recipient: hash160::Hash,
	pub sender: hash160::Hash,
	pub total_amount: u64,
	pub step_amount: u64,
	/// Seconds between two milestones.
	pub interval: u64,
	pub start: Timestamp,
	pub milestone_count: u64,
	pub flags: Flags,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token: Option<TokenCategory>,
}

impl VestingTerms {
	pub fn from_schedule(
		recipient: hash160::Hash,
		sender: hash160::Hash,
		schedule: MilestoneSchedule,
		start: Timestamp,
		flags: Flags,
		token: Option<TokenCategory>,
	) -> VestingTerms {
		VestingTerms {
			recipient,
			sender,
			total_amount: schedule.total,
			step_amount: schedule.step,
			interval: schedule.interval,
			start,
			milestone_count: schedule.count,
			flags,
			token,
		}
	}

	/// The time at which milestone `index` (zero-based) unlocks.
	pub fn unlock_time(&self, index: u64) -> Timestamp {
		self.start.saturating_add(index.saturating_add(1).saturating_mul(self.interval))
	}

	/// The amount released by milestone `index`.
	///
	/// The final milestone releases everything that is left.
	pub fn milestone_amount(&self, index: u64, released: u64) -> u64 {
		let remaining = self.total_amount.saturating_sub(released);
		if index + 1 >= self.milestone_count {
			remaining
		} else {
			self.step_amount.min(remaining)
		}
	}

	pub fn validate(&self) -> Result<(), InvalidTerms> {
		if self.total_amount == 0 || self.step_amount == 0 {
			return Err(InvalidTerms("zero amount"));
		}
		check_ints(&[self.total_amount, self.step_amount, self.interval, self.milestone_count])?;
		if self.interval == 0 {
			return Err(InvalidTerms("zero interval"));
		}
		if self.milestone_count == 0 {
			return Err(InvalidTerms("no milestones"));
		}
		if self.step_amount.saturating_mul(self.milestone_count) > self.total_amount {
			return Err(InvalidTerms("steps exceed the total"));
		}
		check_time(self.unlock_time(self.milestone_count))?;
		check_token(self.flags, self.token)
	}

	pub fn constructor_args(&self) -> Vec<ConstructorArg> {
		vec![
			self.recipient.into(),
			self.sender.into(),
			to_int(self.total_amount),
			to_int(self.step_amount),
			to_int(self.interval),
			to_int(self.start),
			to_int(self.milestone_count),
		]
	}
}

/// Terms of a recurring payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringTerms {
	pub recipient: hash160::Hash,
	pub sender: hash160::Hash,
	pub amount_per_payment: u64,
	pub interval: u64,
	/// Cap on the cumulative amount paid.
	pub total_amount: u64,
	/// Time of the first payment.
	pub start: Timestamp,
	pub flags: Flags,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token: Option<TokenCategory>,
}

impl RecurringTerms {
	pub fn validate(&self) -> Result<(), InvalidTerms> {
		if self.amount_per_payment == 0 || self.total_amount == 0 {
			return Err(InvalidTerms("zero amount"));
		}
		check_ints(&[self.amount_per_payment, self.interval, self.total_amount])?;
		if self.interval == 0 {
			return Err(InvalidTerms("zero interval"));
		}
		check_time(self.start)?;
		check_token(self.flags, self.token)
	}

	pub fn constructor_args(&self) -> Vec<ConstructorArg> {
		vec![
			self.recipient.into(),
			self.sender.into(),
			to_int(self.amount_per_payment),
			to_int(self.interval),
			to_int(self.total_amount),
			to_int(self.start),
		]
	}
}

/// Terms of a token vote-lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteLockTerms {
	pub voter: hash160::Hash,
	/// The token being locked.
	pub token: TokenCategory,
	pub unlock_time: Timestamp,
	pub flags: Flags,
}

impl VoteLockTerms {
	pub fn validate(&self) -> Result<(), InvalidTerms> {
		check_time(self.unlock_time)?;
		if !self.flags.contains(Flags::USES_TOKEN) {
			return Err(InvalidTerms("vote-locks always lock tokens"));
		}
		Ok(())
	}

	pub fn constructor_args(&self) -> Vec<ConstructorArg> {
		vec![
			self.voter.into(),
			ConstructorArg::Bytes(self.token.to_byte_array().to_vec()),
			to_int(self.unlock_time),
		]
	}
}

/// Terms of a claim-based distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirdropTerms {
	pub sender: hash160::Hash,
	pub merkle_root: sha256::Hash,
	pub total_amount: u64,
	/// After this time, the sender can reclaim what is left.
	pub expiry: Timestamp,
	pub flags: Flags,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token: Option<TokenCategory>,
}

impl AirdropTerms {
	pub fn validate(&self) -> Result<(), InvalidTerms> {
		if self.total_amount == 0 {
			return Err(InvalidTerms("zero amount"));
		}
		check_ints(&[self.total_amount])?;
		check_time(self.expiry)?;
		check_token(self.flags, self.token)
	}

	pub fn constructor_args(&self) -> Vec<ConstructorArg> {
		vec![
			self.sender.into(),
			ConstructorArg::Bytes(self.merkle_root.to_byte_array().to_vec()),
			to_int(self.total_amount),
			to_int(self.expiry),
		]
	}
}

/// Terms of any resource kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResourceTerms {
	Vesting(VestingTerms),
	RecurringPayment(RecurringTerms),
	VoteLock(VoteLockTerms),
	Airdrop(AirdropTerms),
}

impl ResourceTerms {
	pub fn kind(&self) -> ResourceKind {
		match self {
			ResourceTerms::Vesting(_) => ResourceKind::Vesting,
			ResourceTerms::RecurringPayment(_) => ResourceKind::RecurringPayment,
			ResourceTerms::VoteLock(_) => ResourceKind::VoteLock,
			ResourceTerms::Airdrop(_) => ResourceKind::Airdrop,
		}
	}

	pub fn validate(&self) -> Result<(), InvalidTerms> {
		match self {
			ResourceTerms::Vesting(t) => t.validate(),
			ResourceTerms::RecurringPayment(t) => t.validate(),
			ResourceTerms::VoteLock(t) => t.validate(),
			ResourceTerms::Airdrop(t) => t.validate(),
		}
	}

	pub fn flags(&self) -> Flags {
		match self {
			ResourceTerms::Vesting(t) => t.flags,
			ResourceTerms::RecurringPayment(t) => t.flags,
			ResourceTerms::VoteLock(t) => t.flags,
			ResourceTerms::Airdrop(t) => t.flags,
		}
	}

	/// The token category paid out, if the resource is token denominated.
	pub fn token(&self) -> Option<TokenCategory> {
		match self {
			ResourceTerms::Vesting(t) => t.token,
			ResourceTerms::RecurringPayment(t) => t.token,
			ResourceTerms::VoteLock(t) => Some(t.token),
			ResourceTerms::Airdrop(t) => t.token,
		}
	}

	/// The party that funded the resource and gets the remainder back.
	pub fn owner(&self) -> hash160::Hash {
		match self {
			ResourceTerms::Vesting(t) => t.sender,
			ResourceTerms::RecurringPayment(t) => t.sender,
			ResourceTerms::VoteLock(t) => t.voter,
			ResourceTerms::Airdrop(t) => t.sender,
		}
	}

	pub fn owner_script(&self) -> ScriptBuf {
		address::p2pkh_script(&self.owner())
	}

	/// The constructor arguments, in template declaration order.
	pub fn constructor_args(&self) -> Vec<ConstructorArg> {
		match self {
			ResourceTerms::Vesting(t) => t.constructor_args(),
			ResourceTerms::RecurringPayment(t) => t.constructor_args(),
			ResourceTerms::VoteLock(t) => t.constructor_args(),
			ResourceTerms::Airdrop(t) => t.constructor_args(),
		}
	}

	/// The state committed by the genesis output.
	pub fn initial_state(&self) -> Result<AnyCommitment, InvalidTerms> {
		self.validate()?;
		let flags = self.flags();
		Ok(match self {
			ResourceTerms::Vesting(t) => VestingState::initial(flags, t.recipient).into(),
			ResourceTerms::RecurringPayment(t) => {
				RecurringState::initial(flags, check_time(t.start)?).into()
			},
			ResourceTerms::VoteLock(t) => VoteLockState {
				status: Status::Active,
				flags,
				locked_amount: 0,
				unlock_time: check_time(t.unlock_time)?,
				voter_hash: t.voter,
			}.into(),
			ResourceTerms::Airdrop(_) => AirdropState {
				status: Status::Active,
				flags,
				total_claimed: 0,
				claim_count: U40::ZERO,
				last_claim: U40::ZERO,
			}.into(),
		})
	}
}

impl From<VestingTerms> for ResourceTerms {
	fn from(t: VestingTerms) -> Self {
		ResourceTerms::Vesting(t)
	}
}

impl From<RecurringTerms> for ResourceTerms {
	fn from(t: RecurringTerms) -> Self {
		ResourceTerms::RecurringPayment(t)
	}
}

impl From<VoteLockTerms> for ResourceTerms {
	fn from(t: VoteLockTerms) -> Self {
		ResourceTerms::VoteLock(t)
	}
}

impl From<AirdropTerms> for ResourceTerms {
	fn from(t: AirdropTerms) -> Self {
		ResourceTerms::Airdrop(t)
	}
}

#[cfg(test)]
mod test {
	use crate::test::dummy::{dummy_hash, dummy_recurring_terms, dummy_vesting_terms};

	use super::*;

	#[test]
	fn milestones_average_step() {
		let s = MilestoneSchedule::normalize(&[10, 20, 30], 86_400).unwrap();
		assert_eq!(s.total, 60);
		assert_eq!(s.step, 20);
		assert_eq!(s.count, 3);
		assert!(s.is_lossy(&[10, 20, 30]));
		assert!(!s.is_lossy(&[20, 20, 20]));

		let s = MilestoneSchedule::normalize(&[10, 10, 11], 1).unwrap();
		assert_eq!(s.step, 10);
		assert_eq!(s.total, 31);

		assert!(MilestoneSchedule::normalize(&[], 1).is_err());
		assert!(MilestoneSchedule::normalize(&[1], 0).is_err());
		assert!(MilestoneSchedule::normalize(&[u64::MAX, 1], 1).is_err());
	}

	#[test]
	fn last_milestone_takes_remainder() {
		let s = MilestoneSchedule::normalize(&[10, 10, 11], 100).unwrap();
		let terms = VestingTerms::from_schedule(
			dummy_hash(1), dummy_hash(2), s, 1_000, Flags::NONE, None,
		);
		terms.validate().unwrap();
		assert_eq!(terms.unlock_time(0), 1_100);
		assert_eq!(terms.unlock_time(2), 1_300);
		assert_eq!(terms.milestone_amount(0, 0), 10);
		assert_eq!(terms.milestone_amount(1, 10), 10);
		assert_eq!(terms.milestone_amount(2, 20), 11);
	}

	#[test]
	fn token_flag_consistency() {
		let mut terms = dummy_vesting_terms();
		terms.flags = terms.flags.with(Flags::USES_TOKEN);
		assert!(terms.validate().is_err());
		terms.token = Some(crate::test::dummy::dummy_category(1));
		terms.validate().unwrap();
	}

	#[test]
	fn amounts_must_fit_script_ints() {
		let mut terms = dummy_vesting_terms();
		terms.total_amount = i64::MAX as u64;
		terms.validate().unwrap();
		assert_eq!(terms.constructor_args()[2], ConstructorArg::Int(i64::MAX));
		terms.total_amount = i64::MAX as u64 + 1;
		assert!(terms.validate().is_err());

		let mut terms = dummy_recurring_terms();
		terms.amount_per_payment = u64::MAX;
		assert!(ResourceTerms::from(terms).validate().is_err());
	}

	#[test]
	fn initial_state_matches_kind() {
		let terms = ResourceTerms::from(dummy_vesting_terms());
		let state = terms.initial_state().unwrap();
		assert_eq!(state.kind(), ResourceKind::Vesting);
		assert_eq!(state.status(), Status::Active);
		assert_eq!(terms.constructor_args().len(), 7);
	}
}
